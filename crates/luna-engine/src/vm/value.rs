//! Dynamically-typed runtime values.

use std::fmt;
use std::rc::Rc;

use super::function::Function;
use super::table::TableRef;
use super::userdata::UserData;

/// A runtime value.
///
/// Tables, functions and userdata are reference types: cloning a `Value`
/// clones the handle and equality between them is identity.
#[derive(Clone, Default)]
pub enum Value {
    /// Absence of a value
    #[default]
    Nil,
    /// `true` or `false`
    Boolean(bool),
    /// Double-precision number
    Number(f64),
    /// Immutable string
    String(Rc<str>),
    /// Table handle
    Table(TableRef),
    /// Native or script function
    Function(Function),
    /// Host payload with optional metatable
    UserData(Rc<UserData>),
}

/// Type tag of a stack slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    /// Index does not refer to a slot
    None,
    /// `nil`
    Nil,
    /// `boolean`
    Boolean,
    /// `number`
    Number,
    /// `string`
    String,
    /// `table`
    Table,
    /// `function`
    Function,
    /// `userdata`
    UserData,
}

impl Type {
    /// Name as reported by the `type` builtin.
    pub fn name(self) -> &'static str {
        match self {
            Type::None => "no value",
            Type::Nil => "nil",
            Type::Boolean => "boolean",
            Type::Number => "number",
            Type::String => "string",
            Type::Table => "table",
            Type::Function => "function",
            Type::UserData => "userdata",
        }
    }
}

impl Value {
    /// Type tag of this value.
    pub fn type_of(&self) -> Type {
        match self {
            Value::Nil => Type::Nil,
            Value::Boolean(_) => Type::Boolean,
            Value::Number(_) => Type::Number,
            Value::String(_) => Type::String,
            Value::Table(_) => Type::Table,
            Value::Function(_) => Type::Function,
            Value::UserData(_) => Type::UserData,
        }
    }

    /// Type name of this value.
    pub fn type_name(&self) -> &'static str {
        self.type_of().name()
    }

    /// Whether this value is `nil`.
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Only `nil` and `false` are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    /// Numeric view with string coercion.
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::String(s) => parse_number(s),
            _ => None,
        }
    }

    /// String view with number coercion.
    pub fn to_str(&self) -> Option<Rc<str>> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(Rc::from(format_number(*n))),
            _ => None,
        }
    }

    /// Identity comparison for reference types, value comparison otherwise.
    pub fn raw_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::UserData(a), Value::UserData(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Address of the referenced object, for reference types.
    pub fn address(&self) -> Option<usize> {
        match self {
            Value::Table(t) => Some(Rc::as_ptr(t) as *const () as usize),
            Value::Function(f) => Some(f.address()),
            Value::UserData(u) => Some(Rc::as_ptr(u) as *const () as usize),
            _ => None,
        }
    }

    /// Message used when this value escapes as an error.
    pub fn error_message(&self) -> String {
        match self.to_str() {
            Some(s) => s.to_string(),
            None => format!("(error object is a {} value)", self.type_name()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{:?}", s),
            other => write!(
                f,
                "{}: 0x{:x}",
                other.type_name(),
                other.address().unwrap_or(0)
            ),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<Rc<str>> for Value {
    fn from(s: Rc<str>) -> Self {
        Value::String(s)
    }
}

impl From<TableRef> for Value {
    fn from(t: TableRef) -> Self {
        Value::Table(t)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Value::Function(f)
    }
}

impl From<Rc<UserData>> for Value {
    fn from(u: Rc<UserData>) -> Self {
        Value::UserData(u)
    }
}

/// Format a number the way `%.14g` does.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return if n.is_sign_negative() { "-nan" } else { "nan" }.to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if n == n.trunc() && n.abs() < 1e15 {
        return format!("{}", n as i64);
    }

    // 14 significant digits
    let sci = format!("{:.13e}", n);
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((&sci, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if !(-4..14).contains(&exponent) {
        let mantissa = trim_fraction(mantissa);
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exponent.abs())
    } else {
        let decimals = (13 - exponent).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, n)).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Parse a numeric string (decimal, exponent, or `0x` hex), ignoring
/// surrounding whitespace.
pub fn parse_number(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        let value = u64::from_str_radix(hex, 16).ok()? as f64;
        return Some(if negative { -value } else { value });
    }

    // Reject the words Rust accepts but scripts do not ("inf", "nan")
    if !s
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
    {
        return None;
    }
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(24.0), "24");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(3.14159), "3.14159");
        assert_eq!(format_number(1e100), "1e+100");
        assert_eq!(format_number(1.0 / 3.0), "0.33333333333333");
        assert_eq!(format_number(f64::INFINITY), "inf");
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("12"), Some(12.0));
        assert_eq!(parse_number("  -1.5e1 "), Some(-15.0));
        assert_eq!(parse_number("0x10"), Some(16.0));
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number("12abc"), None);
        assert_eq!(parse_number(""), None);
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Boolean(false).is_truthy());
        assert!(Value::Number(0.0).is_truthy());
        assert!(Value::from("").is_truthy());
    }

    #[test]
    fn test_coercions() {
        assert_eq!(Value::from("7").to_number(), Some(7.0));
        assert_eq!(Value::Number(24.0).to_str().as_deref(), Some("24"));
        assert_eq!(Value::Boolean(true).to_str(), None);
    }

    #[test]
    fn test_error_message() {
        assert_eq!(Value::from("boom").error_message(), "boom");
        assert_eq!(
            Value::Boolean(true).error_message(),
            "(error object is a boolean value)"
        );
    }
}
