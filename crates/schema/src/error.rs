//! Error types for schema loading.

use thiserror::Error;

/// Errors raised while reading or validating a schema document.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Error reading schema file
    #[error("Failed to read schema file: {0}")]
    Io(#[from] std::io::Error),

    /// Error parsing or shaping the JSON document
    #[error("Failed to parse schema: {0}")]
    Json(#[from] serde_json::Error),

    /// The document root (or its `schema` envelope) is not an object
    #[error("Schema document must be a JSON object")]
    NotAnObject,

    /// A section required by the requested run is absent
    #[error("Schema has no `{0}` section")]
    MissingSection(&'static str),

    /// An extract unit declares a leaf type no extractor exists for
    #[error("Unsupported extract type '{kind}' for unit '{unit}'")]
    UnsupportedExtractType { unit: String, kind: String },

    /// The load section declares a strategy no loader exists for
    #[error("Unsupported load type '{0}'")]
    UnsupportedLoadType(String),

    /// A `unitField` / `unitData` rule could not be parsed
    #[error("Invalid address rule '{rule}': {reason}")]
    InvalidAddress { rule: String, reason: String },

    /// A renamed field entry must hold exactly one `column: name` pair
    #[error("Renamed field entry must map exactly one column, found {0}")]
    InvalidField(usize),
}
