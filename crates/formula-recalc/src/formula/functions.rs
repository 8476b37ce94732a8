use formula_model::{CellId, CellRef, Range, SheetRange};

use super::expr::{Expr, Function};
use super::interpret::{CellSource, Interpreter, Operand};
use crate::lookup_cache::{LookupKey, QueryShape};
use crate::value::{ErrorKind, Value};

pub(crate) fn call<S: CellSource + ?Sized>(
    interp: &mut Interpreter<'_, S>,
    func: Function,
    args: &[Expr],
) -> Value {
    match func {
        Function::Sum | Function::Average | Function::Min | Function::Max => {
            aggregate(interp, func, args)
        }
        Function::Count => count(interp, args),
        Function::Abs => match args {
            [arg] => match interp.eval(arg).to_number() {
                Ok(n) => Value::Number(n.abs()),
                Err(e) => Value::Error(e),
            },
            _ => Value::Error(ErrorKind::Value),
        },
        Function::If => if_(interp, args),
        Function::Match => match_(interp, args),
        Function::Vlookup => vlookup(interp, args),
        Function::Rand => {
            if args.is_empty() {
                Value::Number(interp.ctx.next_random())
            } else {
                Value::Error(ErrorKind::Value)
            }
        }
    }
}

fn aggregate<S: CellSource + ?Sized>(
    interp: &mut Interpreter<'_, S>,
    func: Function,
    args: &[Expr],
) -> Value {
    if args.is_empty() {
        return Value::Error(ErrorKind::Value);
    }

    let mut numbers = std::mem::take(&mut interp.ctx.scratch);
    numbers.clear();
    let mut error: Option<ErrorKind> = None;

    for arg in args {
        match interp.eval_operand(arg) {
            Operand::Value(Value::Blank) => {}
            Operand::Value(Value::Error(e)) => {
                error.get_or_insert(e);
            }
            Operand::Value(v) => match v.to_number() {
                Ok(n) => numbers.push(n),
                Err(e) => {
                    error.get_or_insert(e);
                }
            },
            // Text and booleans inside ranges are ignored.
            Operand::Ref(range) => interp.scan(&range, &mut |_, v| match v {
                Value::Number(n) => numbers.push(*n),
                Value::Error(e) => {
                    error.get_or_insert(*e);
                }
                _ => {}
            }),
        }
    }

    let result = match error {
        Some(e) => Value::Error(e),
        None => match func {
            Function::Sum => Value::number(numbers.iter().sum()),
            Function::Average if numbers.is_empty() => Value::Error(ErrorKind::Div0),
            Function::Average => Value::number(numbers.iter().sum::<f64>() / numbers.len() as f64),
            Function::Min => Value::Number(numbers.iter().copied().reduce(f64::min).unwrap_or(0.0)),
            _ => Value::Number(numbers.iter().copied().reduce(f64::max).unwrap_or(0.0)),
        },
    };
    interp.ctx.scratch = numbers;
    result
}

fn count<S: CellSource + ?Sized>(interp: &mut Interpreter<'_, S>, args: &[Expr]) -> Value {
    let mut n = 0usize;
    for arg in args {
        match interp.eval_operand(arg) {
            Operand::Value(Value::Number(_) | Value::Bool(_)) => n += 1,
            Operand::Value(Value::Text(t)) => n += usize::from(t.trim().parse::<f64>().is_ok()),
            Operand::Value(_) => {}
            Operand::Ref(range) => interp.scan(&range, &mut |_, v| {
                n += usize::from(matches!(v, Value::Number(_)));
            }),
        }
    }
    Value::Number(n as f64)
}

fn if_<S: CellSource + ?Sized>(interp: &mut Interpreter<'_, S>, args: &[Expr]) -> Value {
    let (cond, then, otherwise) = match args {
        [cond, then] => (cond, then, None),
        [cond, then, otherwise] => (cond, then, Some(otherwise)),
        _ => return Value::Error(ErrorKind::Value),
    };
    // The branch to take is unknown until the condition is current.
    let Some(cond) = interp.settled(|i| i.eval(cond)) else {
        return Value::Blank;
    };
    match cond.to_bool() {
        Ok(true) => interp.eval(then),
        Ok(false) => otherwise.map_or(Value::Bool(false), |e| interp.eval(e)),
        Err(e) => Value::Error(e),
    }
}

/// `MATCH(lookup, vector, [match_type = 1])`.
fn match_<S: CellSource + ?Sized>(interp: &mut Interpreter<'_, S>, args: &[Expr]) -> Value {
    let (needle, haystack, kind) = match args {
        [needle, haystack] => (needle, haystack, None),
        [needle, haystack, kind] => (needle, haystack, Some(kind)),
        _ => return Value::Error(ErrorKind::Value),
    };

    let needle = interp.eval(needle);
    if let Value::Error(e) = needle {
        return Value::Error(e);
    }
    let range = match interp.eval_operand(haystack) {
        Operand::Ref(range) if range.is_single_sheet() => range,
        Operand::Ref(_) => return Value::Error(ErrorKind::NA),
        Operand::Value(Value::Error(e)) => return Value::Error(e),
        Operand::Value(_) => return Value::Error(ErrorKind::NA),
    };
    if range.range.width() > 1 && range.range.height() > 1 {
        return Value::Error(ErrorKind::NA);
    }
    let kind = match kind.map(|k| interp.eval(k).to_number()) {
        None => 1.0,
        Some(Ok(n)) => n.trunc(),
        Some(Err(e)) => return Value::Error(e),
    };

    let position = if kind < 0.0 {
        match_descending(interp, &range, &needle)
    } else {
        let shape = if kind == 0.0 {
            QueryShape::Exact
        } else {
            QueryShape::SortedAscending
        };
        match interp.source.lookup(LookupKey { range, shape }) {
            Ok(index) => index.find(&needle),
            Err(blocked) => {
                interp.blocked.merge(blocked);
                return Value::Blank;
            }
        }
    };
    match position {
        Some(pos) => Value::Number(f64::from(pos) + 1.0),
        None => Value::Error(ErrorKind::NA),
    }
}

/// Descending approximate match: the last position whose value is `>= needle`.
fn match_descending<S: CellSource + ?Sized>(
    interp: &mut Interpreter<'_, S>,
    range: &SheetRange,
    needle: &Value,
) -> Option<u32> {
    let key = LookupKey {
        range: *range,
        shape: QueryShape::Exact,
    };
    let mut best = None;
    let mut stopped = false;
    interp.scan(range, &mut |cell, v| {
        if stopped {
            return;
        }
        match v.compare(needle) {
            Ok(ord) if ord.is_ge() => best = Some(key.position_of(cell)),
            Ok(_) => stopped = true,
            Err(_) => {}
        }
    });
    best
}

/// `VLOOKUP(lookup, table, col_index, [approximate = TRUE])`.
fn vlookup<S: CellSource + ?Sized>(interp: &mut Interpreter<'_, S>, args: &[Expr]) -> Value {
    let (needle, table, col, approximate) = match args {
        [needle, table, col] => (needle, table, col, None),
        [needle, table, col, approximate] => (needle, table, col, Some(approximate)),
        _ => return Value::Error(ErrorKind::Value),
    };

    let needle = interp.eval(needle);
    if let Value::Error(e) = needle {
        return Value::Error(e);
    }
    let table = match interp.eval_operand(table) {
        Operand::Ref(range) if range.is_single_sheet() => range,
        Operand::Ref(_) => return Value::Error(ErrorKind::Ref),
        Operand::Value(Value::Error(e)) => return Value::Error(e),
        Operand::Value(_) => return Value::Error(ErrorKind::Value),
    };
    let col = match interp.eval(col).to_number() {
        Ok(n) if n < 1.0 => return Value::Error(ErrorKind::Value),
        Ok(n) if n.trunc() > f64::from(table.range.width()) => return Value::Error(ErrorKind::Ref),
        Ok(n) => n.trunc() as u32,
        Err(e) => return Value::Error(e),
    };
    let approximate = match approximate.map(|a| interp.eval(a).to_bool()) {
        None => true,
        Some(Ok(b)) => b,
        Some(Err(e)) => return Value::Error(e),
    };

    let start = table.range.start;
    let first_column = SheetRange::new(
        table.first_sheet,
        Range::new(start, CellRef::new(table.range.end.row, start.col)),
    );
    let shape = if approximate {
        QueryShape::SortedAscending
    } else {
        QueryShape::Exact
    };
    let index = match interp.source.lookup(LookupKey {
        range: first_column,
        shape,
    }) {
        Ok(index) => index,
        Err(blocked) => {
            interp.blocked.merge(blocked);
            return Value::Blank;
        }
    };
    match index.find(&needle) {
        Some(pos) => interp.read_cell(CellId::new(
            table.first_sheet,
            start.row + pos,
            start.col + col - 1,
        )),
        None => Value::Error(ErrorKind::NA),
    }
}
