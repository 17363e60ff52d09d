//! ObjectID derivation
//!
//! Peers identify objects by a 32-bit hash of the definition, not by name,
//! so this algorithm must match the flight controller's bit for bit. Strings
//! are hashed as ISO-8859-1 bytes and the feed order is fixed: name,
//! settings flag, single-instance flag, then per field (in XML declaration
//! order, after clone resolution but before the wire sort) its name, element
//! count, and type index, plus every option string for enums.

use crate::error::SchemaError;
use crate::types::{FieldDefinition, ObjectId};

/// Rolling 32-bit hash state.
#[derive(Clone, Copy, Debug, Default)]
pub struct ObjectIdHasher {
    state: u32,
}

impl ObjectIdHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mix one value into the state.
    pub fn write_u32(&mut self, value: u32) {
        let mixed = self
            .state
            .wrapping_shl(5)
            .wrapping_add(self.state >> 2)
            .wrapping_add(value);
        self.state ^= mixed;
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u32(u32::from(value));
    }

    /// Mix a string as Latin-1 bytes. Characters outside ISO-8859-1 have no
    /// byte representation and fail the load.
    pub fn write_str(&mut self, object: &str, text: &str) -> Result<(), SchemaError> {
        for ch in text.chars() {
            let code = ch as u32;
            if code > 0xFF {
                return Err(SchemaError::NonLatin1Name {
                    object: object.to_string(),
                    text: text.to_string(),
                });
            }
            self.write_u32(code);
        }
        Ok(())
    }

    /// Final ObjectID, with the low bit cleared so the Meta companion can
    /// live at `id + 1`.
    pub fn finish(self) -> ObjectId {
        ObjectId(self.state & 0xFFFF_FFFE)
    }
}

/// Compute the ObjectID for a definition whose fields are still in
/// declaration order.
pub fn object_id(
    name: &str,
    settings: bool,
    single_instance: bool,
    fields: &[FieldDefinition],
) -> Result<ObjectId, SchemaError> {
    let mut hasher = ObjectIdHasher::new();
    hasher.write_str(name, name)?;
    hasher.write_bool(settings);
    hasher.write_bool(single_instance);

    for field in fields {
        hasher.write_str(name, &field.name)?;
        hasher.write_u32(field.elements as u32);
        hasher.write_u32(field.field_type.type_index());
        if field.field_type == crate::types::FieldType::Enum {
            for option in &field.options {
                hasher.write_str(name, option)?;
            }
        }
    }

    Ok(hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_byte_feed() {
        let mut hasher = ObjectIdHasher::new();
        hasher.write_u32(u32::from(b'A'));
        // h = 0 ^ ((0 << 5) + (0 >> 2) + 65)
        assert_eq!(hasher.state, 65);
    }

    #[test]
    fn latin1_high_bytes_are_accepted() {
        let mut hasher = ObjectIdHasher::new();
        hasher.write_str("x", "Höhe").unwrap();
    }

    #[test]
    fn non_latin1_is_rejected() {
        let mut hasher = ObjectIdHasher::new();
        let err = hasher.write_str("x", "高度").unwrap_err();
        assert!(matches!(err, SchemaError::NonLatin1Name { .. }));
    }

    #[test]
    fn low_bit_is_always_clear() {
        for text in ["a", "ab", "abc", "abcd"] {
            let mut hasher = ObjectIdHasher::new();
            hasher.write_str("x", text).unwrap();
            assert_eq!(hasher.finish().0 & 1, 0);
        }
    }
}
