use thiserror::Error;

/// Errors raised while tokenizing a document.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Malformed JSON
    #[error("Invalid JSON at byte {offset}: {message}")]
    Json { offset: usize, message: String },

    /// Malformed XML
    #[error("Invalid XML at byte {position}: {message}")]
    Xml { position: u64, message: String },

    /// Input ended inside a value
    #[error("Unexpected end of {0} input")]
    UnexpectedEof(&'static str),

    #[error("I/O error while parsing: {0}")]
    Io(#[from] std::io::Error),
}
