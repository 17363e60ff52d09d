//! Error types for the UAVTalk core

use thiserror::Error;

/// Schema errors are fatal at catalog load time.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// IO error reading the definitions directory
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed XML in a definition file
    #[error("xml error in {file}: {message}")]
    Xml { file: String, message: String },

    /// Field type name not in the primitive table
    #[error("unknown field type {field_type:?} on field {field:?} of {object:?}")]
    UnknownType {
        object: String,
        field: String,
        field_type: String,
    },

    /// `cloneof` names a sibling field that does not exist
    #[error("field {field:?} of {object:?} clones unknown field {clone_of:?}")]
    UnknownClone {
        object: String,
        field: String,
        clone_of: String,
    },

    /// Element-name list length disagrees with the declared element count
    #[error("field {field:?} of {object:?} declares {elements} elements but names {names}")]
    BadElementNames {
        object: String,
        field: String,
        elements: usize,
        names: usize,
    },

    /// A hashed string contains a character outside ISO-8859-1
    #[error("{text:?} in {object:?} is not representable in Latin-1")]
    NonLatin1Name { object: String, text: String },

    /// Two definitions hashed to the same ObjectID
    #[error("ObjectID collision: {name:?} and {existing:?} both hash to {id}")]
    DuplicateObjectId {
        id: crate::types::ObjectId,
        name: String,
        existing: String,
    },

    /// A definition file with no `<object>` root
    #[error("no <object> element in {file}")]
    MissingObject { file: String },
}

/// Codec errors drop the offending packet; the link is not reset.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Value tree has no entry for a defined field
    #[error("missing value for field {0:?}")]
    MissingField(String),

    /// Map-shaped field value lacks one of the element names
    #[error("field {field:?} is missing element {element:?}")]
    MissingElement { field: String, element: String },

    /// Enum value string is not one of the definition's options
    #[error("field {field:?} has no option {option:?}")]
    UnknownOption { field: String, option: String },

    /// Wire enum index past the end of the options list
    #[error("field {field:?} enum index {index} out of range")]
    EnumOutOfRange { field: String, index: u8 },

    /// Fractional number supplied for an integer field
    #[error("field {field:?} requires an integral value")]
    NonIntegralValue { field: String },

    /// Payload ended before all fields were decoded
    #[error("payload too short: wanted {wanted} more bytes for field {field:?}")]
    ShortPayload { field: String, wanted: usize },

    /// Value tree shape does not match the field (scalar/list/map mismatch,
    /// or a list of the wrong length)
    #[error("field {field:?} expects {expected}")]
    WrongShape {
        field: String,
        expected: &'static str,
    },

    /// Non-finite float cannot be surfaced in the value tree
    #[error("field {field:?} decoded a non-finite float")]
    NonFiniteFloat { field: String },
}
