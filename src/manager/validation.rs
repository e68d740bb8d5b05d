use crate::core::{MapperError, Result};
use crate::meta::Entity;
use std::fmt;

/// One failed constraint reported by `Entity::validate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintViolation {
    pub property: String,
    pub message: String,
}

impl ConstraintViolation {
    pub fn new(property: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.property, self.message)
    }
}

/// Fails with every violation of `entity`, one per line.
pub fn check<T: Entity>(entity: &T) -> Result<()> {
    let violations = entity.validate();
    if violations.is_empty() {
        return Ok(());
    }
    let lines = violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n\t");
    Err(MapperError::Validation(format!(
        "Bean validation error : \n\t{}",
        lines
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;
    use crate::meta::EntityMeta;

    #[derive(Default)]
    struct Account {
        owner: String,
        balance: i64,
    }

    impl Entity for Account {
        fn entity_meta() -> Result<EntityMeta> {
            EntityMeta::builder("Account", "accounts").id("owner").build()
        }

        fn get_raw(&self, _property: &str) -> Result<Value> {
            Ok(Value::Null)
        }

        fn set_raw(&mut self, _property: &str, _value: Value) -> Result<()> {
            Ok(())
        }

        fn validate(&self) -> Vec<ConstraintViolation> {
            let mut violations = Vec::new();
            if self.owner.is_empty() {
                violations.push(ConstraintViolation::new("owner", "may not be empty"));
            }
            if self.balance < 0 {
                violations.push(ConstraintViolation::new("balance", "must be positive"));
            }
            violations
        }
    }

    #[test]
    fn test_valid_entity_passes() {
        let account = Account {
            owner: "john".to_string(),
            balance: 10,
        };
        assert!(check(&account).is_ok());
    }

    #[test]
    fn test_violations_are_aggregated() {
        let account = Account {
            owner: String::new(),
            balance: -1,
        };
        let err = check(&account).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Bean validation error : \n\towner: may not be empty\n\tbalance: must be positive"
        );
    }
}
