//! Fluent builders for declarations.
//!
//! Used by configuration loading and handy for assembling fixtures in tests:
//!
//! ```
//! use stubby_server::builder::{DeclarationBuilder, RequestPatternBuilder, ResponseSpecBuilder};
//!
//! let declaration = DeclarationBuilder::new("invoice")
//!     .request(RequestPatternBuilder::new("/invoice").method("GET").build().unwrap())
//!     .response(ResponseSpecBuilder::new().status(200).body("OK").build().unwrap())
//!     .response(ResponseSpecBuilder::new().status(500).body("FAIL").build().unwrap())
//!     .build()
//!     .unwrap();
//! assert_eq!(declaration.responses().len(), 2);
//! ```

use crate::declaration::{
    BodySource, Declaration, HeaderList, RequestPattern, ResponseSpec, ValueMatcher,
};
use crate::error::{ConfigError, FieldError};
use std::path::PathBuf;
use std::time::Duration;

/// Builder for [`RequestPattern`].
#[derive(Debug, Clone, Default)]
pub struct RequestPatternBuilder {
    methods: Vec<String>,
    url: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    post: Option<String>,
}

impl RequestPatternBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Add an accepted verb. Duplicates are ignored.
    pub fn method(mut self, method: impl AsRef<str>) -> Self {
        let method = method.as_ref().trim().to_uppercase();
        if !method.is_empty() && !self.methods.contains(&method) {
            self.methods.push(method);
        }
        self
    }

    pub fn methods<I, S>(self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        methods.into_iter().fold(self, |builder, m| builder.method(m))
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Expected request body, literal or regex. Surrounding whitespace is ignored.
    pub fn post(mut self, body: impl Into<String>) -> Self {
        self.post = Some(body.into());
        self
    }

    pub fn build(self) -> Result<RequestPattern, FieldError> {
        if self.methods.is_empty() {
            return Err(FieldError::new("method", "at least one HTTP method is required"));
        }
        if self.url.trim().is_empty() {
            return Err(FieldError::new("url", "must not be empty"));
        }

        Ok(RequestPattern {
            methods: self.methods,
            url: ValueMatcher::new(self.url),
            query: self
                .query
                .into_iter()
                .map(|(name, value)| (name, ValueMatcher::new(value)))
                .collect(),
            headers: self
                .headers
                .into_iter()
                .map(|(name, value)| (name, ValueMatcher::new(value)))
                .collect(),
            post: self
                .post
                .map(|body| ValueMatcher::multiline(body.trim().to_string())),
        })
    }
}

/// Builder for [`ResponseSpec`]. Status defaults to 200.
#[derive(Debug, Clone)]
pub struct ResponseSpecBuilder {
    status: u16,
    headers: HeaderList,
    body: Option<BodySource>,
    latency: Option<Duration>,
}

impl Default for ResponseSpecBuilder {
    fn default() -> Self {
        Self {
            status: 200,
            headers: HeaderList::new(),
            body: None,
            latency: None,
        }
    }
}

impl ResponseSpecBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn headers(mut self, headers: HeaderList) -> Self {
        self.headers = headers;
        self
    }

    /// Literal body. Replaces any earlier body source.
    pub fn body(mut self, text: impl Into<String>) -> Self {
        self.body = Some(BodySource::Literal(text.into()));
        self
    }

    /// Multi-line body. Replaces any earlier body source.
    pub fn folded_body(mut self, text: impl Into<String>) -> Self {
        self.body = Some(BodySource::Folded(text.into()));
        self
    }

    /// Body read from `path` on every serve. Replaces any earlier body source.
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.body = Some(BodySource::File(path.into()));
        self
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn build(self) -> Result<ResponseSpec, FieldError> {
        if !(100..=599).contains(&self.status) {
            return Err(FieldError::new(
                "status",
                format!("{} is not between 100 and 599", self.status),
            ));
        }
        Ok(ResponseSpec {
            status: self.status,
            headers: self.headers,
            body: self.body,
            latency: self.latency,
        })
    }
}

/// Builder for [`Declaration`].
#[derive(Debug, Clone)]
pub struct DeclarationBuilder {
    id: String,
    request: Option<RequestPattern>,
    responses: Vec<ResponseSpec>,
}

impl DeclarationBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            request: None,
            responses: Vec::new(),
        }
    }

    pub fn request(mut self, request: RequestPattern) -> Self {
        self.request = Some(request);
        self
    }

    /// Append a response to the sequence.
    pub fn response(mut self, response: ResponseSpec) -> Self {
        self.responses.push(response);
        self
    }

    pub fn responses(mut self, responses: impl IntoIterator<Item = ResponseSpec>) -> Self {
        self.responses.extend(responses);
        self
    }

    pub fn build(self) -> Result<Declaration, ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::field(
                &self.id,
                FieldError::new("id", "must not be empty"),
            ));
        }
        let request = self.request.ok_or_else(|| {
            ConfigError::field(&self.id, FieldError::new("request", "is required"))
        })?;
        if self.responses.is_empty() {
            return Err(ConfigError::field(
                &self.id,
                FieldError::new("response", "at least one response is required"),
            ));
        }
        Ok(Declaration {
            id: self.id,
            request,
            responses: self.responses,
        })
    }
}
