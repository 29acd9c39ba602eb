//! Streaming extraction of sub-objects from JSON and XML documents.
//!
//! Consumers register path patterns (`!.orders.*`, `!.*.item`) and receive
//! every value whose nesting path matches, as soon as that value is complete.
//! Documents are read in chunks; nothing outside the matched sub-trees is
//! kept in memory.
//!
//! ```no_run
//! # async fn demo() -> Result<(), ei_path_parser::ParseError> {
//! use ei_path_parser::{JsonParser, JsonStream, ObjectStream};
//!
//! let file = tokio::fs::File::open("orders.json").await?;
//! let mut parser = JsonParser::new(false);
//! parser.on_path("!.orders.*");
//! let mut stream = JsonStream::new(file, parser);
//! while let Some(order) = stream.next_object().await? {
//!     println!("{order}");
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod json;
mod pattern;
mod stream;
mod tokenizer;
mod xml;

pub use error::ParseError;
pub use json::{JsonParser, ARRAY_SEGMENT, ROOT_SEGMENT};
pub use pattern::PathPattern;
pub use stream::{JsonStream, ObjectStream, XmlStream, DEFAULT_CHUNK_SIZE};
pub use tokenizer::{JsonEvent, Tokenizer};
pub use xml::{XmlParser, TEXT_KEY};
