//! Declaration model.
//!
//! A [`Declaration`] pairs one [`RequestPattern`] with an ordered, non-empty
//! list of [`ResponseSpec`]s. Declarations are immutable once built; a reload
//! replaces them wholesale. Use the builders in [`crate::builder`] to create
//! them outside of configuration loading.

use regex::Regex;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A configured value matched literally or as a whole-string regex.
///
/// Any value that compiles as a regular expression is also tried as one, so
/// `/invoice` matches only itself while `^/invoice/\d+$` matches
/// `/invoice/42`. Values that are not valid patterns stay literal.
#[derive(Debug, Clone)]
pub struct ValueMatcher {
    raw: String,
    pattern: Option<Regex>,
}

impl ValueMatcher {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let pattern = Regex::new(&format!("^(?:{})$", raw)).ok();
        Self { raw, pattern }
    }

    /// Same as [`ValueMatcher::new`], but `.` also matches line breaks.
    pub fn multiline(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let pattern = Regex::new(&format!("(?s)^(?:{})$", raw)).ok();
        Self { raw, pattern }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the configured value compiled as a regular expression.
    pub fn is_pattern(&self) -> bool {
        self.pattern.is_some()
    }

    pub fn matches(&self, candidate: &str) -> bool {
        candidate == self.raw
            || self
                .pattern
                .as_ref()
                .is_some_and(|pattern| pattern.is_match(candidate))
    }
}

impl PartialEq for ValueMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for ValueMatcher {}

/// Ordered header list with case-insensitive names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<(String, String)>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, replacing an existing one with the same name in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Add a header without replacing earlier values of the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value for `name`, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderList {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut list = HeaderList::new();
        for (name, value) in iter {
            list.insert(name, value);
        }
        list
    }
}

impl Serialize for HeaderList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for HeaderList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(HeaderListVisitor)
    }
}

struct HeaderListVisitor;

impl<'de> Visitor<'de> for HeaderListVisitor {
    type Value = HeaderList;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of header names to values")
    }

    fn visit_unit<E: serde::de::Error>(self) -> Result<HeaderList, E> {
        Ok(HeaderList::new())
    }

    fn visit_none<E: serde::de::Error>(self) -> Result<HeaderList, E> {
        Ok(HeaderList::new())
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<HeaderList, A::Error> {
        let mut list = HeaderList::new();
        while let Some((name, value)) = access.next_entry::<String, ScalarValue>()? {
            list.insert(name, value.into_string());
        }
        Ok(list)
    }
}

/// A YAML scalar read as text; `content-length: 30` yields `"30"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl ScalarValue {
    pub fn into_string(self) -> String {
        match self {
            ScalarValue::Text(text) => text,
            ScalarValue::Integer(number) => number.to_string(),
            ScalarValue::Float(number) => number.to_string(),
            ScalarValue::Boolean(flag) => flag.to_string(),
        }
    }
}

/// Where a response body comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodySource {
    /// Single-line text served verbatim
    Literal(String),
    /// Multi-line text; served exactly like a literal
    Folded(String),
    /// File read on every serve
    File(PathBuf),
}

impl BodySource {
    pub fn kind(&self) -> &'static str {
        match self {
            BodySource::Literal(_) => "literal",
            BodySource::Folded(_) => "folded",
            BodySource::File(_) => "file",
        }
    }

    /// Inline text, if this is not a file reference.
    pub fn text(&self) -> Option<&str> {
        match self {
            BodySource::Literal(text) | BodySource::Folded(text) => Some(text),
            BodySource::File(_) => None,
        }
    }

    pub fn file(&self) -> Option<&Path> {
        match self {
            BodySource::File(path) => Some(path),
            _ => None,
        }
    }
}

/// Expected shape of an inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPattern {
    pub(crate) methods: Vec<String>,
    pub(crate) url: ValueMatcher,
    pub(crate) query: Vec<(String, ValueMatcher)>,
    pub(crate) headers: Vec<(String, ValueMatcher)>,
    pub(crate) post: Option<ValueMatcher>,
}

impl RequestPattern {
    /// Upper-cased verbs, never empty.
    pub fn methods(&self) -> &[String] {
        &self.methods
    }

    pub fn url(&self) -> &ValueMatcher {
        &self.url
    }

    pub fn query(&self) -> &[(String, ValueMatcher)] {
        &self.query
    }

    pub fn headers(&self) -> &[(String, ValueMatcher)] {
        &self.headers
    }

    pub fn post(&self) -> Option<&ValueMatcher> {
        self.post.as_ref()
    }
}

/// One canned response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSpec {
    pub(crate) status: u16,
    pub(crate) headers: HeaderList,
    pub(crate) body: Option<BodySource>,
    pub(crate) latency: Option<Duration>,
}

impl ResponseSpec {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &HeaderList {
        &self.headers
    }

    /// `None` serves an empty body.
    pub fn body(&self) -> Option<&BodySource> {
        self.body.as_ref()
    }

    /// Delay the transport applies before writing the response.
    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }
}

/// A request pattern with its response sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub(crate) id: String,
    pub(crate) request: RequestPattern,
    pub(crate) responses: Vec<ResponseSpec>,
}

impl Declaration {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn request(&self) -> &RequestPattern {
        &self.request
    }

    /// The response sequence; never empty.
    pub fn responses(&self) -> &[ResponseSpec] {
        &self.responses
    }

    pub fn response(&self, index: usize) -> Option<&ResponseSpec> {
        self.responses.get(index)
    }

    pub fn is_sequenced(&self) -> bool {
        self.responses.len() > 1
    }
}
