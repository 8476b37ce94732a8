use std::sync::Arc;

use formula_model::{CellId, SheetLimits, SheetRange};
use smallvec::SmallVec;

use super::expr::{BinaryOp, Expr, UnaryOp};
use super::functions;
use crate::context::EvalContext;
use crate::lookup_cache::{LookupIndex, LookupKey};
use crate::store::FormulaId;
use crate::value::{ErrorKind, Value};

/// Result of reading one cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Probe {
    Ready(Value),
    /// A dirty formula that has to be evaluated first.
    Pending(FormulaId),
    /// A formula that is already being evaluated further up the chain.
    Cycle(FormulaId),
}

/// Precedents that were not ready while evaluating a formula.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Blocked {
    pub pending: SmallVec<[FormulaId; 4]>,
    pub cycle: Option<FormulaId>,
}

impl Blocked {
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.cycle.is_none()
    }

    pub fn push_pending(&mut self, id: FormulaId) {
        if !self.pending.contains(&id) {
            self.pending.push(id);
        }
    }

    pub fn record_cycle(&mut self, id: FormulaId) {
        self.cycle.get_or_insert(id);
    }

    pub fn merge(&mut self, other: Blocked) {
        for id in other.pending {
            self.push_pending(id);
        }
        if let Some(id) = other.cycle {
            self.record_cycle(id);
        }
    }

    fn marker(&self) -> (usize, bool) {
        (self.pending.len(), self.cycle.is_some())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Done(Value),
    Blocked(Blocked),
}

/// Read access to the workbook for the interpreter.
///
/// Implementations never evaluate anything themselves: a formula that is not current is
/// reported as [`Probe::Pending`] so the caller can schedule it, which keeps evaluation of
/// long dependency chains off the native stack.
pub trait CellSource {
    fn limits(&self) -> &SheetLimits;

    fn probe(&self, cell: CellId) -> Probe;

    /// Visit the populated cells of `range`, column by column. Formulas that are not ready are
    /// recorded in `blocked` instead of being visited.
    fn scan(&self, range: &SheetRange, blocked: &mut Blocked, visit: &mut dyn FnMut(CellId, &Value));

    /// A (possibly cached) lookup index over `key.range`.
    fn lookup(&self, key: LookupKey) -> Result<Arc<LookupIndex>, Blocked>;

    fn external_value(&self, link: &str) -> Value;
}

/// Evaluate `expr` as hosted at `host`.
pub fn evaluate<S: CellSource + ?Sized>(
    source: &S,
    ctx: &mut EvalContext,
    host: CellId,
    expr: &Expr,
) -> Outcome {
    let mut interp = Interpreter {
        source,
        ctx,
        host,
        blocked: Blocked::default(),
    };
    let value = interp.eval(expr);
    let Interpreter { ctx, blocked, .. } = interp;
    ctx.stats.formulas_evaluated += 1;
    if blocked.is_empty() {
        Outcome::Done(value)
    } else {
        Outcome::Blocked(blocked)
    }
}

pub(crate) enum Operand {
    Value(Value),
    Ref(SheetRange),
}

pub(crate) struct Interpreter<'a, S: CellSource + ?Sized> {
    pub(crate) source: &'a S,
    pub(crate) ctx: &'a mut EvalContext,
    pub(crate) host: CellId,
    pub(crate) blocked: Blocked,
}

impl<S: CellSource + ?Sized> Interpreter<'_, S> {
    pub(crate) fn eval(&mut self, expr: &Expr) -> Value {
        match self.eval_operand(expr) {
            Operand::Value(v) => v,
            Operand::Ref(range) => self.deref(&range),
        }
    }

    /// Evaluate without dereferencing, so functions can see ranges.
    pub(crate) fn eval_operand(&mut self, expr: &Expr) -> Operand {
        match expr {
            Expr::Number(n) => Operand::Value(Value::Number(*n)),
            Expr::Text(s) => Operand::Value(Value::Text(s.clone())),
            Expr::Bool(b) => Operand::Value(Value::Bool(*b)),
            Expr::Error(e) => Operand::Value(Value::Error(*e)),
            Expr::Cell(r) => match r.resolve(self.host, self.source.limits()) {
                Some(cell) => Operand::Ref(SheetRange::cell(cell)),
                None => Operand::Value(Value::Error(ErrorKind::Ref)),
            },
            Expr::Range(r) => match r.resolve(self.host, self.source.limits()) {
                Some(range) => Operand::Ref(range),
                None => Operand::Value(Value::Error(ErrorKind::Ref)),
            },
            Expr::External(link) => Operand::Value(self.source.external_value(link)),
            Expr::Unary(UnaryOp::Neg, operand) => {
                let v = self.eval(operand);
                Operand::Value(match v.to_number() {
                    Ok(n) => Value::number(-n),
                    Err(e) => Value::Error(e),
                })
            }
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.eval(lhs);
                let rhs = self.eval(rhs);
                Operand::Value(binary(*op, &lhs, &rhs))
            }
            Expr::Call(func, args) => Operand::Value(functions::call(self, *func, args)),
        }
    }

    pub(crate) fn deref(&mut self, range: &SheetRange) -> Value {
        if range.is_single_cell() {
            self.read_cell(CellId {
                sheet_id: range.first_sheet,
                cell: range.range.start,
            })
        } else {
            Value::Error(ErrorKind::Value)
        }
    }

    pub(crate) fn read_cell(&mut self, cell: CellId) -> Value {
        match self.source.probe(cell) {
            Probe::Ready(v) => v,
            Probe::Pending(id) => {
                self.blocked.push_pending(id);
                Value::Blank
            }
            Probe::Cycle(id) => {
                self.blocked.record_cycle(id);
                Value::Blank
            }
        }
    }

    pub(crate) fn scan(&mut self, range: &SheetRange, visit: &mut dyn FnMut(CellId, &Value)) {
        let source = self.source;
        source.scan(range, &mut self.blocked, visit);
    }

    /// Run `f` and report whether it left any precedent unresolved.
    pub(crate) fn settled<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> Option<T> {
        let before = self.blocked.marker();
        let out = f(self);
        (self.blocked.marker() == before).then_some(out)
    }
}

fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Value {
    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Pow => {
            let (a, b) = match (lhs.to_number(), rhs.to_number()) {
                (Ok(a), Ok(b)) => (a, b),
                (Err(e), _) | (_, Err(e)) => return Value::Error(e),
            };
            match op {
                BinaryOp::Add => Value::number(a + b),
                BinaryOp::Sub => Value::number(a - b),
                BinaryOp::Mul => Value::number(a * b),
                BinaryOp::Div if b == 0.0 => Value::Error(ErrorKind::Div0),
                BinaryOp::Div => Value::number(a / b),
                BinaryOp::Pow if a == 0.0 && b == 0.0 => Value::Error(ErrorKind::Num),
                _ => Value::number(a.powf(b)),
            }
        }
        BinaryOp::Concat => match (lhs.to_text(), rhs.to_text()) {
            (Ok(a), Ok(b)) => Value::Text(Arc::from(format!("{a}{b}"))),
            (Err(e), _) | (_, Err(e)) => Value::Error(e),
        },
        _ => {
            let ord = match lhs.compare(rhs) {
                Ok(ord) => ord,
                Err(e) => return Value::Error(e),
            };
            Value::Bool(match op {
                BinaryOp::Eq => ord.is_eq(),
                BinaryOp::Ne => ord.is_ne(),
                BinaryOp::Lt => ord.is_lt(),
                BinaryOp::Le => ord.is_le(),
                BinaryOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            })
        }
    }
}
