//! Pull-style object streams over async readers.
//!
//! A stream reads from its source only when no matched object is waiting,
//! so a consumer that stops asking stops the reads.

use crate::{JsonParser, ParseError, XmlParser};
use async_trait::async_trait;
use quick_xml::events::Event;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tracing::debug;

/// Bytes requested from the source per read.
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// A source of path-matched objects.
#[async_trait]
pub trait ObjectStream: Send {
    /// The next matched object, or `None` once the document is exhausted.
    async fn next_object(&mut self) -> Result<Option<Value>, ParseError>;
}

/// Objects matched in a JSON byte stream.
pub struct JsonStream<R> {
    reader: R,
    parser: JsonParser,
    buf: Vec<u8>,
    finished: bool,
}

impl<R: AsyncRead + Unpin + Send> JsonStream<R> {
    pub fn new(reader: R, parser: JsonParser) -> Self {
        Self::with_chunk_size(reader, parser, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(reader: R, parser: JsonParser, chunk_size: usize) -> Self {
        Self {
            reader,
            parser,
            buf: vec![0; chunk_size.max(1)],
            finished: false,
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> ObjectStream for JsonStream<R> {
    async fn next_object(&mut self) -> Result<Option<Value>, ParseError> {
        loop {
            if let Some(value) = self.parser.next_ready() {
                return Ok(Some(value));
            }
            if self.finished {
                return Ok(None);
            }
            let n = self.reader.read(&mut self.buf).await?;
            if n == 0 {
                debug!("JSON input exhausted");
                self.finished = true;
                self.parser.end()?;
            } else {
                self.parser.write(&self.buf[..n])?;
            }
        }
    }
}

/// Elements matched in an XML byte stream.
pub struct XmlStream<R> {
    reader: quick_xml::Reader<BufReader<R>>,
    parser: XmlParser,
    buf: Vec<u8>,
    finished: bool,
}

impl<R: AsyncRead + Unpin + Send> XmlStream<R> {
    pub fn new(source: R, parser: XmlParser) -> Self {
        let mut reader = quick_xml::Reader::from_reader(BufReader::new(source));
        let config = reader.config_mut();
        config.trim_text(true);
        config.expand_empty_elements = true;
        Self {
            reader,
            parser,
            buf: Vec::new(),
            finished: false,
        }
    }
}

fn syntax(position: u64, message: impl ToString) -> ParseError {
    ParseError::Xml {
        position,
        message: message.to_string(),
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> ObjectStream for XmlStream<R> {
    async fn next_object(&mut self) -> Result<Option<Value>, ParseError> {
        loop {
            if let Some(value) = self.parser.next_ready() {
                return Ok(Some(value));
            }
            if self.finished {
                return Ok(None);
            }

            self.buf.clear();
            let event = match self.reader.read_event_into_async(&mut self.buf).await {
                Ok(event) => event,
                Err(e) => return Err(syntax(self.reader.buffer_position() as u64, e)),
            };
            let position = self.reader.buffer_position() as u64;
            match event {
                Event::Start(start) => {
                    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                    let mut attributes = Vec::new();
                    for attribute in start.attributes() {
                        let attribute = match attribute {
                            Ok(attribute) => attribute,
                            Err(e) => return Err(syntax(position, e)),
                        };
                        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
                        let value = match attribute.unescape_value() {
                            Ok(value) => value.into_owned(),
                            Err(e) => return Err(syntax(position, e)),
                        };
                        attributes.push((key, value));
                    }
                    self.parser.open_tag(name, attributes);
                }
                Event::End(_) => self.parser.close_tag()?,
                Event::Text(text) => {
                    let text = match text.unescape() {
                        Ok(text) => text.into_owned(),
                        Err(e) => return Err(syntax(position, e)),
                    };
                    self.parser.text(&text);
                }
                Event::CData(data) => {
                    let text = String::from_utf8_lossy(&data.into_inner()).into_owned();
                    self.parser.text(&text);
                }
                Event::Eof => {
                    debug!("XML input exhausted");
                    self.finished = true;
                    if !self.parser.is_balanced() {
                        return Err(ParseError::UnexpectedEof("XML"));
                    }
                }
                // Declarations, comments, processing instructions and doctypes
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn collect(mut stream: impl ObjectStream) -> Result<Vec<Value>, ParseError> {
        let mut out = Vec::new();
        while let Some(value) = stream.next_object().await? {
            out.push(value);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn test_json_stream_small_chunks() {
        let doc = br#"{"var1": {"a": {"f1": "v1"}, "b": {"f1": "v2"}}}"#;
        let mut parser = JsonParser::new(false);
        parser.on_path("!.var1.*");
        let stream = JsonStream::with_chunk_size(&doc[..], parser, 3);
        let out = collect(stream).await.unwrap();
        assert_eq!(out, vec![json!({"f1": "v1"}), json!({"f1": "v2"})]);
    }

    #[tokio::test]
    async fn test_json_stream_reports_syntax_error() {
        let doc = br#"{"var1": {"a": }"#;
        let mut parser = JsonParser::new(false);
        parser.on_path("!.var1.*");
        let result = collect(JsonStream::new(&doc[..], parser)).await;
        assert!(matches!(result, Err(ParseError::Json { .. })));
    }

    #[tokio::test]
    async fn test_xml_stream() {
        let doc = br#"<?xml version="1.0"?>
            <catalog>
                <item id="1"><name>First</name></item>
                <item id="2"><name>Second &amp; last</name><tag/></item>
            </catalog>"#;
        let mut parser = XmlParser::new();
        parser.on_path("!.*.item");
        let out = collect(XmlStream::new(&doc[..], parser)).await.unwrap();
        assert_eq!(
            out,
            vec![
                json!({"id": "1", "name": "First"}),
                json!({"id": "2", "name": "Second & last", "tag": {}}),
            ]
        );
    }

    #[tokio::test]
    async fn test_xml_stream_truncated_document() {
        let doc = b"<catalog><item id=\"1\">";
        let mut parser = XmlParser::new();
        parser.on_path("!.*.item");
        let result = collect(XmlStream::new(&doc[..], parser)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_xml_stream_mismatched_tags() {
        let doc = b"<catalog><item></catalog>";
        let mut parser = XmlParser::new();
        parser.on_path("!.*.item");
        let result = collect(XmlStream::new(&doc[..], parser)).await;
        assert!(matches!(result, Err(ParseError::Xml { .. })));
    }
}
