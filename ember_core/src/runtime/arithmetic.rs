use std::cmp::Ordering;

use crate::{error::EmberError, runtime::Opcode, value::TaggedValue};

fn extract_number(opcode: Opcode, value: &TaggedValue) -> Result<f64, EmberError> {
    value.as_number().ok_or_else(|| {
        EmberError::invalid_operands(format!(
            "{:?} expects numbers, got {}",
            opcode,
            value.type_tag()
        ))
    })
}

/// Add is the one binary operator that also works on strings.
pub fn perform_addition(left: TaggedValue, right: TaggedValue) -> Result<TaggedValue, EmberError> {
    match (left, right) {
        (TaggedValue::Number(a), TaggedValue::Number(b)) => Ok(TaggedValue::Number(a + b)),
        (TaggedValue::Str(mut a), TaggedValue::Str(b)) => {
            a.push_str(&b);
            Ok(TaggedValue::Str(a))
        }
        (left, right) => Err(EmberError::invalid_operands(format!(
            "Cannot add {} and {}",
            left.type_tag(),
            right.type_tag()
        ))),
    }
}

pub fn perform_arithmetic(
    opcode: Opcode,
    left: TaggedValue,
    right: TaggedValue,
) -> Result<TaggedValue, EmberError> {
    if opcode == Opcode::Add {
        return perform_addition(left, right);
    }
    let a = extract_number(opcode, &left)?;
    let b = extract_number(opcode, &right)?;
    let result = match opcode {
        Opcode::Sub => a - b,
        Opcode::Mul => a * b,
        Opcode::Div => a / b,
        Opcode::Mod => a % b,
        Opcode::Pow => a.powf(b),
        other => {
            return Err(EmberError::internal(format!(
                "{:?} is not a binary arithmetic opcode",
                other
            )))
        }
    };
    Ok(TaggedValue::Number(result))
}

pub fn perform_unary(opcode: Opcode, value: TaggedValue) -> Result<TaggedValue, EmberError> {
    match opcode {
        Opcode::Not => Ok(TaggedValue::Bool(!value.is_truthy())),
        Opcode::Neg => Ok(TaggedValue::Number(-extract_number(opcode, &value)?)),
        Opcode::Inc | Opcode::IncLocal | Opcode::IncGlobal => {
            Ok(TaggedValue::Number(extract_number(opcode, &value)? + 1.0))
        }
        Opcode::Dec | Opcode::DecLocal | Opcode::DecGlobal => {
            Ok(TaggedValue::Number(extract_number(opcode, &value)? - 1.0))
        }
        other => Err(EmberError::internal(format!(
            "{:?} is not a unary opcode",
            other
        ))),
    }
}

/// Relational operators. Pointers must already be resolved by the caller.
pub fn perform_comparison(
    opcode: Opcode,
    left: &TaggedValue,
    right: &TaggedValue,
) -> Result<bool, EmberError> {
    match opcode {
        Opcode::Eq => return Ok(left == right),
        Opcode::Ne => return Ok(left != right),
        _ => {}
    }

    let ordering = match (left, right) {
        (TaggedValue::Number(a), TaggedValue::Number(b)) => a.partial_cmp(b),
        (TaggedValue::Str(a), TaggedValue::Str(b)) => Some(a.cmp(b)),
        _ => {
            return Err(EmberError::invalid_operands(format!(
                "Cannot compare {} and {} with {:?}",
                left.type_tag(),
                right.type_tag(),
                opcode
            )))
        }
    };

    // NaN compares false against everything
    let Some(ordering) = ordering else {
        return Ok(false);
    };
    match opcode {
        Opcode::Lt => Ok(ordering == Ordering::Less),
        Opcode::Le => Ok(ordering != Ordering::Greater),
        Opcode::Gt => Ok(ordering == Ordering::Greater),
        Opcode::Ge => Ok(ordering != Ordering::Less),
        other => Err(EmberError::internal(format!(
            "{:?} is not a comparison opcode",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EmberErrorType;

    fn num(n: f64) -> TaggedValue {
        TaggedValue::number(n)
    }

    #[test]
    fn operand_order_is_left_then_right() {
        assert_eq!(perform_arithmetic(Opcode::Sub, num(3.0), num(1.0)).unwrap(), num(2.0));
        assert_eq!(perform_arithmetic(Opcode::Div, num(1.0), num(4.0)).unwrap(), num(0.25));
        assert_eq!(perform_arithmetic(Opcode::Pow, num(2.0), num(3.0)).unwrap(), num(8.0));
        assert_eq!(perform_arithmetic(Opcode::Mod, num(-7.0), num(3.0)).unwrap(), num(-1.0));
    }

    #[test]
    fn add_concatenates_strings_only_with_strings() {
        let joined = perform_addition(TaggedValue::string("ab"), TaggedValue::string("c")).unwrap();
        assert_eq!(joined, TaggedValue::string("abc"));
        let err = perform_addition(TaggedValue::string("a"), num(1.0)).unwrap_err();
        assert_eq!(err.error_type, EmberErrorType::InvalidOperands);
    }

    #[test]
    fn comparisons_on_numbers_and_strings() {
        assert!(!perform_comparison(Opcode::Gt, &num(10.0), &num(11.0)).unwrap());
        assert!(perform_comparison(Opcode::Le, &num(2.0), &num(2.0)).unwrap());
        assert!(perform_comparison(Opcode::Lt, &TaggedValue::string("a"), &TaggedValue::string("b")).unwrap());
        assert!(perform_comparison(Opcode::Ne, &num(1.0), &TaggedValue::string("1")).unwrap());
        assert!(perform_comparison(Opcode::Lt, &num(1.0), &TaggedValue::boolean(true)).is_err());
        assert!(!perform_comparison(Opcode::Ge, &num(f64::NAN), &num(0.0)).unwrap());
    }

    #[test]
    fn unary_operators() {
        assert_eq!(perform_unary(Opcode::Neg, num(3.0)).unwrap(), num(-3.0));
        assert_eq!(perform_unary(Opcode::Inc, num(3.0)).unwrap(), num(4.0));
        assert_eq!(perform_unary(Opcode::Not, TaggedValue::string("")).unwrap(), TaggedValue::boolean(true));
        assert!(perform_unary(Opcode::Dec, TaggedValue::null()).is_err());
    }
}
