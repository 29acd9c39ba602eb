//! Incremental JSON parser emitting path-matched sub-objects.
//!
//! The parser mirrors the document nesting with a path stack (`!` for the
//! root, object keys, `*` for array positions) and a stack of partially built
//! containers. Whenever a value completes, its full path is tested against
//! every registered pattern and each match queues a copy of the value.
//!
//! A completed value is kept in its parent only while some registered
//! pattern can still observe it through an enclosing container; otherwise it
//! is dropped once emitted, so memory follows the matched sub-trees rather
//! than the document.

use crate::pattern::{count_matches, PathPattern};
use crate::tokenizer::{JsonEvent, Tokenizer};
use crate::ParseError;
use serde_json::{Map, Value};
use std::collections::VecDeque;

/// Path segment for array positions.
pub const ARRAY_SEGMENT: &str = "*";
/// Path segment for the document root.
pub const ROOT_SEGMENT: &str = "!";

#[derive(Debug)]
struct Frame {
    value: Value,
    /// Whether this container (or an ancestor) matches a pattern
    observed: bool,
}

/// Push-style JSON parser.
#[derive(Debug)]
pub struct JsonParser {
    tokenizer: Tokenizer,
    patterns: Vec<PathPattern>,
    value_scoped: bool,
    path: Vec<String>,
    stack: Vec<Frame>,
    ready: VecDeque<Value>,
    events: Vec<JsonEvent>,
}

impl JsonParser {
    /// Create a parser; with `value_scoped` each match is emitted inside
    /// its single-key enclosing container.
    pub fn new(value_scoped: bool) -> Self {
        Self {
            tokenizer: Tokenizer::new(),
            patterns: Vec::new(),
            value_scoped,
            path: vec![ROOT_SEGMENT.to_string()],
            stack: vec![Frame {
                value: Value::Object(Map::new()),
                observed: false,
            }],
            ready: VecDeque::new(),
            events: Vec::new(),
        }
    }

    /// Register a pattern. Patterns must be registered before bytes arrive.
    pub fn on_path(&mut self, pattern: &str) {
        self.patterns.push(PathPattern::parse(pattern));
    }

    pub fn patterns(&self) -> &[PathPattern] {
        &self.patterns
    }

    /// Feed a chunk of the document.
    pub fn write(&mut self, chunk: &[u8]) -> Result<(), ParseError> {
        let mut events = std::mem::take(&mut self.events);
        let result = self.tokenizer.feed(chunk, &mut events);
        for event in events.drain(..) {
            self.handle(event);
        }
        self.events = events;
        result
    }

    /// Finish the document.
    pub fn end(&mut self) -> Result<(), ParseError> {
        let mut events = std::mem::take(&mut self.events);
        let result = self.tokenizer.end(&mut events);
        for event in events.drain(..) {
            self.handle(event);
        }
        self.events = events;
        result
    }

    /// Next matched value, in document order.
    pub fn next_ready(&mut self) -> Option<Value> {
        self.ready.pop_front()
    }

    fn handle(&mut self, event: JsonEvent) {
        match event {
            JsonEvent::Value(value) => self.add_value(value),
            JsonEvent::OpenObject(key) => {
                self.open(Value::Object(Map::new()));
                self.path.push(key.unwrap_or_else(|| "#".to_string()));
            }
            JsonEvent::Key(key) => {
                if let Some(last) = self.path.last_mut() {
                    *last = key;
                }
            }
            JsonEvent::OpenArray => {
                self.open(Value::Array(Vec::new()));
                self.path.push(ARRAY_SEGMENT.to_string());
            }
            JsonEvent::CloseObject | JsonEvent::CloseArray => {
                self.path.pop();
                if let Some(frame) = self.stack.pop() {
                    self.add_value(frame.value);
                }
            }
        }
    }

    /// Push a container located at the current path.
    fn open(&mut self, container: Value) {
        let observed = self.stack.last().is_some_and(|frame| frame.observed)
            || count_matches(&self.patterns, &self.path) > 0;
        self.stack.push(Frame {
            value: container,
            observed,
        });
    }

    fn add_value(&mut self, value: Value) {
        let matches = count_matches(&self.patterns, &self.path);
        let segment = self.path.last().cloned().unwrap_or_default();
        for _ in 0..matches {
            let emitted = if self.value_scoped {
                scoped(&segment, value.clone())
            } else {
                value.clone()
            };
            self.ready.push_back(emitted);
        }

        let Some(parent) = self.stack.last_mut() else {
            return;
        };
        if !parent.observed {
            return;
        }
        match &mut parent.value {
            Value::Array(items) => items.push(value),
            Value::Object(map) => {
                map.insert(segment, value);
            }
            _ => {}
        }
    }
}

/// The single-key container around a value at `segment`.
fn scoped(segment: &str, value: Value) -> Value {
    if segment == ARRAY_SEGMENT {
        Value::Array(vec![value])
    } else {
        let mut map = Map::new();
        map.insert(segment.to_string(), value);
        Value::Object(map)
    }
}
