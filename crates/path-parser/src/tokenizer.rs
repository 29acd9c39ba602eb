//! Push-style JSON tokenizer.
//!
//! Bytes may arrive in chunks of any size; strings, escapes, numbers and
//! literals are buffered across chunk boundaries. Each structural step is
//! reported as a [`JsonEvent`]. Scalar decoding is delegated to `serde_json`.

use crate::ParseError;
use serde_json::Value;

/// A primitive tokenizer event.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonEvent {
    /// A complete scalar value
    Value(Value),
    /// An object opened; carries its first key (`None` for `{}`)
    OpenObject(Option<String>),
    /// A subsequent key of the current object
    Key(String),
    CloseObject,
    OpenArray,
    CloseArray,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Expecting a value
    Value,
    /// Just after `[`: a value or `]`
    ArrayFirst,
    /// Just after `{`: a key or `}`
    ObjectFirst,
    /// After `,` in an object
    Key,
    Colon,
    CommaOrClose,
    /// The top-level value is complete
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Object,
    Array,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StrRole {
    Value,
    FirstKey,
    Key,
}

#[derive(Debug)]
enum Lexeme {
    Str {
        buf: Vec<u8>,
        escaped: bool,
        role: StrRole,
    },
    Number(Vec<u8>),
    Literal(Vec<u8>),
}

/// What a byte did to the pending lexeme.
enum Step {
    Consumed,
    Completed,
    Delimiter,
}

#[derive(Debug)]
pub struct Tokenizer {
    state: State,
    containers: Vec<Container>,
    lexeme: Option<Lexeme>,
    offset: usize,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer {
    pub fn new() -> Self {
        Self {
            state: State::Value,
            containers: Vec::new(),
            lexeme: None,
            offset: 0,
        }
    }

    /// Consume a chunk, appending the events it completes to `out`.
    pub fn feed(&mut self, chunk: &[u8], out: &mut Vec<JsonEvent>) -> Result<(), ParseError> {
        for &byte in chunk {
            self.byte(byte, out)?;
            self.offset += 1;
        }
        Ok(())
    }

    /// Signal end of input, flushing a pending number or literal.
    pub fn end(&mut self, out: &mut Vec<JsonEvent>) -> Result<(), ParseError> {
        match self.lexeme {
            Some(Lexeme::Str { .. }) => return Err(ParseError::UnexpectedEof("JSON")),
            Some(_) => self.finish_lexeme(out)?,
            None => {}
        }
        match self.state {
            State::Done => Ok(()),
            // Whitespace-only input carries no value and no error
            State::Value if self.containers.is_empty() => Ok(()),
            _ => Err(ParseError::UnexpectedEof("JSON")),
        }
    }

    fn byte(&mut self, byte: u8, out: &mut Vec<JsonEvent>) -> Result<(), ParseError> {
        if let Some(lexeme) = self.lexeme.as_mut() {
            let step = match lexeme {
                Lexeme::Str { buf, escaped, .. } => {
                    buf.push(byte);
                    if *escaped {
                        *escaped = false;
                        Step::Consumed
                    } else if byte == b'\\' {
                        *escaped = true;
                        Step::Consumed
                    } else if byte == b'"' {
                        Step::Completed
                    } else {
                        Step::Consumed
                    }
                }
                Lexeme::Number(buf) if is_number_byte(byte) => {
                    buf.push(byte);
                    Step::Consumed
                }
                Lexeme::Literal(buf) if byte.is_ascii_alphabetic() => {
                    buf.push(byte);
                    Step::Consumed
                }
                _ => Step::Delimiter,
            };
            match step {
                Step::Consumed => return Ok(()),
                Step::Completed => return self.finish_lexeme(out),
                // The byte ends the lexeme and is then read as structure
                Step::Delimiter => self.finish_lexeme(out)?,
            }
        }

        if matches!(byte, b' ' | b'\t' | b'\n' | b'\r') {
            return Ok(());
        }

        match self.state {
            State::Done => Err(self.syntax("unexpected data after the top-level value")),
            State::ArrayFirst if byte == b']' => self.close(Container::Array, out),
            State::Value | State::ArrayFirst => self.begin_value(byte, out),
            State::ObjectFirst if byte == b'}' => {
                out.push(JsonEvent::OpenObject(None));
                self.close(Container::Object, out)
            }
            State::ObjectFirst | State::Key if byte == b'"' => {
                let role = if self.state == State::ObjectFirst {
                    StrRole::FirstKey
                } else {
                    StrRole::Key
                };
                self.lexeme = Some(Lexeme::Str {
                    buf: vec![byte],
                    escaped: false,
                    role,
                });
                Ok(())
            }
            State::ObjectFirst | State::Key => Err(self.syntax("expected an object key")),
            State::Colon if byte == b':' => {
                self.state = State::Value;
                Ok(())
            }
            State::Colon => Err(self.syntax("expected ':'")),
            State::CommaOrClose => match (byte, self.containers.last()) {
                (b',', Some(Container::Object)) => {
                    self.state = State::Key;
                    Ok(())
                }
                (b',', Some(Container::Array)) => {
                    self.state = State::Value;
                    Ok(())
                }
                (b'}', Some(Container::Object)) => self.close(Container::Object, out),
                (b']', Some(Container::Array)) => self.close(Container::Array, out),
                _ => Err(self.syntax("expected ',' or a closing bracket")),
            },
        }
    }

    fn begin_value(&mut self, byte: u8, out: &mut Vec<JsonEvent>) -> Result<(), ParseError> {
        match byte {
            b'{' => {
                // OpenObject is reported once the first key is known
                self.containers.push(Container::Object);
                self.state = State::ObjectFirst;
            }
            b'[' => {
                self.containers.push(Container::Array);
                out.push(JsonEvent::OpenArray);
                self.state = State::ArrayFirst;
            }
            b'"' => {
                self.lexeme = Some(Lexeme::Str {
                    buf: vec![byte],
                    escaped: false,
                    role: StrRole::Value,
                })
            }
            b'-' | b'0'..=b'9' => self.lexeme = Some(Lexeme::Number(vec![byte])),
            b't' | b'f' | b'n' => self.lexeme = Some(Lexeme::Literal(vec![byte])),
            _ => return Err(self.syntax(&format!("unexpected character '{}'", byte as char))),
        }
        Ok(())
    }

    fn finish_lexeme(&mut self, out: &mut Vec<JsonEvent>) -> Result<(), ParseError> {
        let Some(lexeme) = self.lexeme.take() else {
            return Ok(());
        };
        match lexeme {
            Lexeme::Str { buf, role, .. } => {
                let text: String = serde_json::from_slice(&buf)
                    .map_err(|e| self.syntax(&format!("invalid string: {e}")))?;
                match role {
                    StrRole::Value => self.emit_value(Value::String(text), out),
                    StrRole::FirstKey => {
                        out.push(JsonEvent::OpenObject(Some(text)));
                        self.state = State::Colon;
                    }
                    StrRole::Key => {
                        out.push(JsonEvent::Key(text));
                        self.state = State::Colon;
                    }
                }
            }
            Lexeme::Number(buf) => {
                let number: serde_json::Number = serde_json::from_slice(&buf).map_err(|_| {
                    self.syntax(&format!("invalid number '{}'", String::from_utf8_lossy(&buf)))
                })?;
                self.emit_value(Value::Number(number), out);
            }
            Lexeme::Literal(buf) => {
                let value = match buf.as_slice() {
                    b"true" => Value::Bool(true),
                    b"false" => Value::Bool(false),
                    b"null" => Value::Null,
                    other => {
                        return Err(self.syntax(&format!(
                            "invalid literal '{}'",
                            String::from_utf8_lossy(other)
                        )))
                    }
                };
                self.emit_value(value, out);
            }
        }
        Ok(())
    }

    fn emit_value(&mut self, value: Value, out: &mut Vec<JsonEvent>) {
        out.push(JsonEvent::Value(value));
        self.after_value();
    }

    fn close(&mut self, container: Container, out: &mut Vec<JsonEvent>) -> Result<(), ParseError> {
        self.containers.pop();
        out.push(match container {
            Container::Object => JsonEvent::CloseObject,
            Container::Array => JsonEvent::CloseArray,
        });
        self.after_value();
        Ok(())
    }

    fn after_value(&mut self) {
        self.state = if self.containers.is_empty() {
            State::Done
        } else {
            State::CommaOrClose
        };
    }

    fn syntax(&self, message: &str) -> ParseError {
        ParseError::Json {
            offset: self.offset,
            message: message.to_string(),
        }
    }
}

fn is_number_byte(byte: u8) -> bool {
    matches!(byte, b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tokenize_chunks(chunks: &[&str]) -> Result<Vec<JsonEvent>, ParseError> {
        let mut tokenizer = Tokenizer::new();
        let mut out = Vec::new();
        for chunk in chunks {
            tokenizer.feed(chunk.as_bytes(), &mut out)?;
        }
        tokenizer.end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn test_object_events() {
        let events = tokenize_chunks(&[r#"{"a": 1, "b": [true, null], "c": {}}"#]).unwrap();
        assert_eq!(
            events,
            vec![
                JsonEvent::OpenObject(Some("a".to_string())),
                JsonEvent::Value(json!(1)),
                JsonEvent::Key("b".to_string()),
                JsonEvent::OpenArray,
                JsonEvent::Value(json!(true)),
                JsonEvent::Value(Value::Null),
                JsonEvent::CloseArray,
                JsonEvent::Key("c".to_string()),
                JsonEvent::OpenObject(None),
                JsonEvent::CloseObject,
                JsonEvent::CloseObject,
            ]
        );
    }

    #[test]
    fn test_chunk_boundaries_inside_tokens() {
        let events = tokenize_chunks(&["[\"he", "l\\", "\"lo\", -1", "2.5e", "1, fa", "lse]"])
            .unwrap();
        assert_eq!(
            events,
            vec![
                JsonEvent::OpenArray,
                JsonEvent::Value(json!("hel\"lo")),
                JsonEvent::Value(json!(-12.5e1)),
                JsonEvent::Value(json!(false)),
                JsonEvent::CloseArray,
            ]
        );
    }

    #[test]
    fn test_unicode_escapes() {
        let events = tokenize_chunks(&[r#"["\u041b\u043e\u0433", "Лог"]"#]).unwrap();
        assert_eq!(events[1], JsonEvent::Value(json!("Лог")));
        assert_eq!(events[2], JsonEvent::Value(json!("Лог")));
    }

    #[test]
    fn test_top_level_number_flushed_at_end() {
        let events = tokenize_chunks(&["42"]).unwrap();
        assert_eq!(events, vec![JsonEvent::Value(json!(42))]);
    }

    #[test]
    fn test_empty_input_is_not_an_error() {
        assert!(tokenize_chunks(&["  \n"]).unwrap().is_empty());
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(
            tokenize_chunks(&["{\"a\" 1}"]),
            Err(ParseError::Json { .. })
        ));
        assert!(matches!(
            tokenize_chunks(&["[1 2]"]),
            Err(ParseError::Json { .. })
        ));
        assert!(matches!(
            tokenize_chunks(&["[tru]"]),
            Err(ParseError::Json { .. })
        ));
        assert!(matches!(
            tokenize_chunks(&["{} {}"]),
            Err(ParseError::Json { .. })
        ));
        assert!(matches!(
            tokenize_chunks(&["[1, {\"a\": 2"]),
            Err(ParseError::UnexpectedEof("JSON"))
        ));
        assert!(matches!(
            tokenize_chunks(&["\"open"]),
            Err(ParseError::UnexpectedEof("JSON"))
        ));
    }

    #[test]
    fn test_error_offset() {
        match tokenize_chunks(&["[1,", " x]"]) {
            Err(ParseError::Json { offset, .. }) => assert_eq!(offset, 4),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
