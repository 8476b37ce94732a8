use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Null,
    Div0,
    Value,
    Ref,
    Name,
    Num,
    NA,
    /// A circular reference evaluated with iterative calculation disabled.
    Circular,
    Calc,
}

impl ErrorKind {
    pub fn as_code(self) -> &'static str {
        match self {
            ErrorKind::Null => "#NULL!",
            ErrorKind::Div0 => "#DIV/0!",
            ErrorKind::Value => "#VALUE!",
            ErrorKind::Ref => "#REF!",
            ErrorKind::Name => "#NAME?",
            ErrorKind::Num => "#NUM!",
            ErrorKind::NA => "#N/A",
            ErrorKind::Circular => "#CIRC!",
            ErrorKind::Calc => "#CALC!",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

/// A computed cell value.
///
/// Errors are ordinary values: they are stored in the cell that produced them and flow into
/// dependents like any other input.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    Number(f64),
    Text(Arc<str>),
    Bool(bool),
    #[default]
    Blank,
    Error(ErrorKind),
}

impl Value {
    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Value::Blank)
    }

    /// Wrap an arithmetic result, mapping non-finite numbers to `#NUM!`.
    pub fn number(n: f64) -> Value {
        if n.is_finite() {
            Value::Number(n)
        } else {
            Value::Error(ErrorKind::Num)
        }
    }

    /// Numeric coercion used by arithmetic operators. Blank is zero.
    pub fn to_number(&self) -> Result<f64, ErrorKind> {
        match self {
            Value::Number(n) => Ok(*n),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Blank => Ok(0.0),
            Value::Text(s) => {
                let t = s.trim();
                if t.is_empty() {
                    return Err(ErrorKind::Value);
                }
                t.parse::<f64>()
                    .ok()
                    .filter(|n| n.is_finite())
                    .ok_or(ErrorKind::Value)
            }
            Value::Error(e) => Err(*e),
        }
    }

    pub fn to_bool(&self) -> Result<bool, ErrorKind> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Number(n) => Ok(*n != 0.0),
            Value::Blank => Ok(false),
            Value::Text(s) => {
                if s.eq_ignore_ascii_case("TRUE") {
                    Ok(true)
                } else if s.eq_ignore_ascii_case("FALSE") {
                    Ok(false)
                } else {
                    Err(ErrorKind::Value)
                }
            }
            Value::Error(e) => Err(*e),
        }
    }

    pub fn to_text(&self) -> Result<Arc<str>, ErrorKind> {
        match self {
            Value::Text(s) => Ok(s.clone()),
            Value::Number(n) => Ok(Arc::from(format_number(*n))),
            Value::Bool(true) => Ok(Arc::from("TRUE")),
            Value::Bool(false) => Ok(Arc::from("FALSE")),
            Value::Blank => Ok(Arc::from("")),
            Value::Error(e) => Err(*e),
        }
    }

    /// Excel comparison order: numbers < text < booleans. Text compares case-insensitively.
    ///
    /// Blank compares as `0` against numbers, `""` against text and `FALSE` against booleans.
    pub fn compare(&self, other: &Value) -> Result<Ordering, ErrorKind> {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Number(_) | Value::Blank => 0,
                Value::Text(_) => 1,
                Value::Bool(_) => 2,
                Value::Error(_) => 3,
            }
        }

        match (self, other) {
            (Value::Error(e), _) | (_, Value::Error(e)) => Err(*e),
            (Value::Blank, Value::Text(t)) => Ok("".cmp(&*t.to_lowercase())),
            (Value::Text(t), Value::Blank) => Ok(t.to_lowercase().as_str().cmp("")),
            (Value::Blank, Value::Bool(b)) => Ok(false.cmp(b)),
            (Value::Bool(b), Value::Blank) => Ok(b.cmp(&false)),
            (Value::Text(a), Value::Text(b)) => Ok(a.to_lowercase().cmp(&b.to_lowercase())),
            (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
            (a, b) if rank(a) == 0 && rank(b) == 0 => {
                let x = a.to_number()?;
                let y = b.to_number()?;
                Ok(x.partial_cmp(&y).unwrap_or(Ordering::Equal))
            }
            (a, b) => Ok(rank(a).cmp(&rank(b))),
        }
    }

    /// Distance between two successive iterates of a circular reference.
    ///
    /// Non-numeric values count as converged only when they are identical.
    pub fn delta(&self, other: &Value) -> f64 {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => (a - b).abs(),
            (Value::Blank, Value::Number(n)) | (Value::Number(n), Value::Blank) => n.abs(),
            (a, b) if a == b => 0.0,
            _ => f64::INFINITY,
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(Arc::from(value))
    }
}

impl From<ErrorKind> for Value {
    fn from(value: ErrorKind) -> Self {
        Value::Error(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::Text(s) => f.write_str(s),
            Value::Bool(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            Value::Blank => f.write_str(""),
            Value::Error(e) => write!(f, "{e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_coerces_to_zero_and_errors_propagate() {
        assert_eq!(Value::Blank.to_number(), Ok(0.0));
        assert_eq!(Value::from(" 2.5 ").to_number(), Ok(2.5));
        assert_eq!(Value::from("abc").to_number(), Err(ErrorKind::Value));
        assert_eq!(Value::Error(ErrorKind::Div0).to_number(), Err(ErrorKind::Div0));
        assert_eq!(Value::number(f64::INFINITY), Value::Error(ErrorKind::Num));
    }

    #[test]
    fn comparison_follows_type_order() {
        assert_eq!(Value::from(5.0).compare(&Value::from("a")), Ok(Ordering::Less));
        assert_eq!(Value::from("B").compare(&Value::from("a")), Ok(Ordering::Greater));
        assert_eq!(Value::from("abc").compare(&Value::from("ABC")), Ok(Ordering::Equal));
        assert_eq!(Value::Blank.compare(&Value::from(0.0)), Ok(Ordering::Equal));
        assert_eq!(Value::from(true).compare(&Value::from(99.0)), Ok(Ordering::Greater));
    }

    #[test]
    fn delta_measures_numeric_change() {
        assert_eq!(Value::from(1.5).delta(&Value::from(1.0)), 0.5);
        assert_eq!(Value::Blank.delta(&Value::from(-2.0)), 2.0);
        assert_eq!(Value::from("x").delta(&Value::from("x")), 0.0);
        assert!(Value::from("x").delta(&Value::from(1.0)).is_infinite());
    }
}
