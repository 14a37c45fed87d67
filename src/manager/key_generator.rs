use std::fmt;

use uuid::Uuid;

use crate::core::{DataType, Result, TrackError, Value};
use crate::metadata::EntityType;

/// Produces temporary keys for entities whose real key is assigned by the store.
///
/// A generator only sees single-part keys through the manager, but must
/// reject anything else when called directly.
pub trait KeyGenerator: Send + Sync + fmt::Debug {
    fn generate_temp_key(&mut self, entity_type: &EntityType) -> Result<Value>;
}

/// Negative integers for numeric keys (-1, -2, ...), fresh v4 uuids for Guid keys.
#[derive(Debug, Default)]
pub struct DefaultKeyGenerator {
    next_number: i64,
}

impl DefaultKeyGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyGenerator for DefaultKeyGenerator {
    fn generate_temp_key(&mut self, entity_type: &EntityType) -> Result<Value> {
        let data_type = single_key_type(entity_type)?;
        match data_type {
            DataType::Integer => {
                self.next_number -= 1;
                Ok(Value::Integer(self.next_number))
            }
            DataType::Float => {
                self.next_number -= 1;
                Ok(Value::Float(self.next_number as f64))
            }
            DataType::Guid => Ok(Value::Guid(Uuid::new_v4())),
            other => Err(TrackError::UnsupportedKeyType(format!(
                "{} key on '{}'",
                other,
                entity_type.name()
            ))),
        }
    }
}

/// Data type of the type's only key property.
pub fn single_key_type(entity_type: &EntityType) -> Result<DataType> {
    match entity_type.key_properties().as_slice() {
        [key] => Ok(key.data_type()),
        [] => Err(TrackError::UnsupportedKeyType(format!(
            "'{}' has no key property",
            entity_type.name()
        ))),
        _ => Err(TrackError::MultiPartKey(entity_type.name().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::PropertyDescriptor;

    fn ty(key_type: DataType) -> EntityType {
        EntityType::new("Order").property(PropertyDescriptor::new("OrderID", key_type).key())
    }

    #[test]
    fn test_numeric_keys_count_down() {
        let mut generator = DefaultKeyGenerator::new();
        let order = ty(DataType::Integer);
        assert_eq!(generator.generate_temp_key(&order).unwrap(), Value::Integer(-1));
        assert_eq!(generator.generate_temp_key(&order).unwrap(), Value::Integer(-2));
    }

    #[test]
    fn test_guid_keys_are_fresh() {
        let mut generator = DefaultKeyGenerator::new();
        let customer = ty(DataType::Guid);
        let a = generator.generate_temp_key(&customer).unwrap();
        let b = generator.generate_temp_key(&customer).unwrap();
        assert!(a.as_guid().is_some());
        assert_ne!(a, b);
    }

    #[test]
    fn test_unsupported_shapes() {
        let mut generator = DefaultKeyGenerator::new();
        let detail = EntityType::new("OrderDetail")
            .property(PropertyDescriptor::new("OrderID", DataType::Integer).key())
            .property(PropertyDescriptor::new("ProductID", DataType::Integer).key());
        assert!(matches!(
            generator.generate_temp_key(&detail),
            Err(TrackError::MultiPartKey(_))
        ));
        assert!(matches!(
            generator.generate_temp_key(&ty(DataType::Text)),
            Err(TrackError::UnsupportedKeyType(_))
        ));
    }
}
