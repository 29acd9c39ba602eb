//! Incremental XML parser emitting path-matched elements.
//!
//! Each element becomes an object of its attributes and child values. On
//! close, an element whose path matches a registered pattern is emitted and
//! discarded; any other element folds into its parent under its tag name,
//! with repeated siblings coalescing into an array.

use crate::pattern::{count_matches, PathPattern};
use crate::ParseError;
use serde_json::{Map, Value};
use std::collections::VecDeque;

/// Key holding text content of elements that also have attributes or children.
pub const TEXT_KEY: &str = "#text";

#[derive(Debug)]
struct Element {
    fields: Map<String, Value>,
    text: String,
}

impl Element {
    fn new(fields: Map<String, Value>) -> Self {
        Self {
            fields,
            text: String::new(),
        }
    }

    fn into_value(mut self) -> Value {
        if self.text.is_empty() {
            return Value::Object(self.fields);
        }
        if self.fields.is_empty() {
            return Value::String(self.text);
        }
        self.fields
            .insert(TEXT_KEY.to_string(), Value::String(self.text));
        Value::Object(self.fields)
    }

    fn fold(&mut self, name: String, value: Value) {
        match self.fields.get_mut(&name) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                self.fields.insert(name, value);
            }
        }
    }
}

/// Event-driven XML parser; tokens are supplied by [`crate::XmlStream`].
#[derive(Debug)]
pub struct XmlParser {
    patterns: Vec<PathPattern>,
    path: Vec<String>,
    stack: Vec<Element>,
    ready: VecDeque<Value>,
}

impl Default for XmlParser {
    fn default() -> Self {
        Self::new()
    }
}

impl XmlParser {
    pub fn new() -> Self {
        Self {
            patterns: Vec::new(),
            path: vec![crate::json::ROOT_SEGMENT.to_string()],
            stack: vec![Element::new(Map::new())],
            ready: VecDeque::new(),
        }
    }

    /// Register a pattern. Patterns must be registered before tokens arrive.
    pub fn on_path(&mut self, pattern: &str) {
        self.patterns.push(PathPattern::parse(pattern));
    }

    pub fn patterns(&self) -> &[PathPattern] {
        &self.patterns
    }

    /// An element opened with its attributes.
    pub fn open_tag(&mut self, name: String, attributes: Vec<(String, String)>) {
        let fields = attributes
            .into_iter()
            .map(|(key, value)| (key, Value::String(value)))
            .collect();
        self.path.push(name);
        self.stack.push(Element::new(fields));
    }

    /// Text content of the current element.
    pub fn text(&mut self, text: &str) {
        // Text outside the document element has nowhere to go
        if self.stack.len() < 2 {
            return;
        }
        if let Some(element) = self.stack.last_mut() {
            element.text.push_str(text);
        }
    }

    /// The current element closed.
    pub fn close_tag(&mut self) -> Result<(), ParseError> {
        if self.stack.len() < 2 {
            return Err(ParseError::Xml {
                position: 0,
                message: "closing tag without a matching opening tag".to_string(),
            });
        }
        let value = match self.stack.pop() {
            Some(element) => element.into_value(),
            None => return Ok(()),
        };

        let matches = count_matches(&self.patterns, &self.path);
        let name = self.path.pop().unwrap_or_default();
        if matches > 0 {
            for _ in 1..matches {
                self.ready.push_back(value.clone());
            }
            self.ready.push_back(value);
        } else if let Some(parent) = self.stack.last_mut() {
            parent.fold(name, value);
        }
        Ok(())
    }

    /// Whether every opened element has been closed.
    pub fn is_balanced(&self) -> bool {
        self.stack.len() == 1
    }

    /// Next matched element, in document order.
    pub fn next_ready(&mut self) -> Option<Value> {
        self.ready.pop_front()
    }
}
