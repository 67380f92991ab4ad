//! Builtin operations on values.
//!
//! One function per operator family of the COP: math, comparison, logic.
//! Errors are returned to the caller, which decides the pathway: the folder
//! leaves the site unfolded (recording division by zero for later reporting),
//! the engine converts them into failure values.

use std::str::FromStr;

use crate::{
    builtins::Builtins,
    num::Decimal,
    value::Value,
};

/// Binary operators, with their source spellings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum BinaryOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    Ne,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Ge,
    #[strum(serialize = "&&")]
    And,
    #[strum(serialize = "||")]
    Or,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum UnaryOp {
    #[strum(serialize = "+")]
    Pos,
    #[strum(serialize = "-")]
    Neg,
    #[strum(serialize = "!!")]
    Not,
}

impl BinaryOp {
    /// Parses a source operator spelling.
    #[must_use]
    pub fn parse(op: &str) -> Option<Self> {
        Self::from_str(op).ok()
    }
}

impl UnaryOp {
    #[must_use]
    pub fn parse(op: &str) -> Option<Self> {
        Self::from_str(op).ok()
    }
}

/// Why an operation could not be carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpError {
    /// An operand had the wrong type for the operator.
    Type { op: String, detail: String },
    DivideByZero,
}

impl OpError {
    fn type_error(op: impl std::fmt::Display, detail: &str) -> Self {
        Self::Type { op: op.to_string(), detail: detail.to_string() }
    }
}

fn number_operand(op: BinaryOp, value: &Value) -> Result<Decimal, OpError> {
    // A one-field struct carrying a number still counts; pipelines produce
    // wrapped scalars routinely.
    match value.as_scalar() {
        Value::Number(n) => Ok(n),
        other => Err(OpError::type_error(op, &format!("operand is not a number: {other}"))),
    }
}

/// Math binary operation; numeric operands only.
///
/// # Errors
/// Type errors for non-numbers, [`OpError::DivideByZero`] for `/ 0`.
pub fn math_binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, OpError> {
    let lhs = number_operand(op, left)?;
    let rhs = number_operand(op, right)?;
    let result = match op {
        BinaryOp::Add => lhs.add(&rhs),
        BinaryOp::Sub => lhs.sub(&rhs),
        BinaryOp::Mul => lhs.mul(&rhs),
        BinaryOp::Div => lhs.checked_div(&rhs).map_err(|_| OpError::DivideByZero)?,
        _ => return Err(OpError::type_error(op, "not a math operator")),
    };
    Ok(Value::Number(result))
}

/// Math unary operation. Unary `+` is a no-op.
///
/// # Errors
/// Type error for non-numbers.
pub fn math_unary(op: UnaryOp, operand: &Value) -> Result<Value, OpError> {
    match op {
        UnaryOp::Pos => Ok(operand.clone()),
        UnaryOp::Neg => match operand.as_scalar() {
            Value::Number(n) => Ok(Value::Number(n.neg())),
            other => Err(OpError::type_error(op, &format!("operand is not a number: {other}"))),
        },
        UnaryOp::Not => Err(OpError::type_error(op, "'!!' is a logic operator")),
    }
}

/// Comparison. Equality is structural and works on any values; ordering works
/// on numbers and on text.
///
/// # Errors
/// Type error when ordering operands that have no order.
pub fn compare(op: BinaryOp, left: &Value, right: &Value, builtins: &Builtins) -> Result<Value, OpError> {
    let result = match op {
        BinaryOp::Eq => left.as_scalar() == right.as_scalar(),
        BinaryOp::Ne => left.as_scalar() != right.as_scalar(),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (left.as_scalar(), right.as_scalar()) {
                (Value::Number(a), Value::Number(b)) => a.cmp(&b),
                (Value::Text(a), Value::Text(b)) => a.cmp(&b),
                (a, b) => {
                    return Err(OpError::type_error(op, &format!("cannot order {a} against {b}")));
                }
            };
            match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }
        }
        _ => return Err(OpError::type_error(op, "not a comparison operator")),
    };
    Ok(builtins.bool_value(result))
}

/// Logic binary operation on `#bool.true` / `#bool.false` tags.
///
/// Both operands are already evaluated; Comp's logic operators do not short
/// circuit.
///
/// # Errors
/// Type error for non-boolean operands.
pub fn logic_binary(op: BinaryOp, left: &Value, right: &Value, builtins: &Builtins) -> Result<Value, OpError> {
    let lhs = builtins
        .as_bool(left)
        .ok_or_else(|| OpError::type_error(op, &format!("operand is not a boolean: {left}")))?;
    let rhs = builtins
        .as_bool(right)
        .ok_or_else(|| OpError::type_error(op, &format!("operand is not a boolean: {right}")))?;
    let result = match op {
        BinaryOp::And => lhs && rhs,
        BinaryOp::Or => lhs || rhs,
        _ => return Err(OpError::type_error(op, "not a logic operator")),
    };
    Ok(builtins.bool_value(result))
}

/// Logic negation.
///
/// # Errors
/// Type error for non-boolean operands.
pub fn logic_unary(op: UnaryOp, operand: &Value, builtins: &Builtins) -> Result<Value, OpError> {
    match op {
        UnaryOp::Not => {
            let value = builtins
                .as_bool(operand)
                .ok_or_else(|| OpError::type_error(op, &format!("operand is not a boolean: {operand}")))?;
            Ok(builtins.bool_value(!value))
        }
        _ => Err(OpError::type_error(op, "not a logic operator")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: i64) -> Value {
        Value::Number(Decimal::from_i64(n))
    }

    #[test]
    fn math() {
        assert_eq!(math_binary(BinaryOp::Add, &num(1), &num(2)).unwrap(), num(3));
        assert_eq!(math_binary(BinaryOp::Mul, &num(3), &num(4)).unwrap(), num(12));
        assert_eq!(
            math_binary(BinaryOp::Div, &num(1), &num(0)),
            Err(OpError::DivideByZero)
        );
        assert!(math_binary(BinaryOp::Add, &Value::text("x"), &num(1)).is_err());
        assert_eq!(math_unary(UnaryOp::Neg, &num(5)).unwrap(), num(-5));
        assert_eq!(math_unary(UnaryOp::Pos, &num(5)).unwrap(), num(5));
    }

    #[test]
    fn wrapped_scalars_still_compute() {
        let wrapped = num(6).as_struct();
        assert_eq!(math_binary(BinaryOp::Add, &wrapped, &num(1)).unwrap(), num(7));
    }

    #[test]
    fn comparisons() {
        let builtins = Builtins::new();
        let t = compare(BinaryOp::Lt, &num(1), &num(2), &builtins).unwrap();
        assert_eq!(builtins.as_bool(&t), Some(true));
        let f = compare(BinaryOp::Eq, &num(1), &Value::text("1"), &builtins).unwrap();
        assert_eq!(builtins.as_bool(&f), Some(false));
        assert!(compare(BinaryOp::Lt, &num(1), &Value::text("1"), &builtins).is_err());
    }

    #[test]
    fn logic() {
        let builtins = Builtins::new();
        let t = builtins.bool_value(true);
        let f = builtins.bool_value(false);
        let and = logic_binary(BinaryOp::And, &t, &f, &builtins).unwrap();
        assert_eq!(builtins.as_bool(&and), Some(false));
        let not = logic_unary(UnaryOp::Not, &f, &builtins).unwrap();
        assert_eq!(builtins.as_bool(&not), Some(true));
        assert!(logic_binary(BinaryOp::And, &num(1), &t, &builtins).is_err());
    }
}
