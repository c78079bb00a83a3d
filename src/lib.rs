//! Stubby Server
//!
//! An HTTP stub server that answers requests with canned responses declared
//! in a YAML document.
//!
//! # Features
//!
//! - **Request Matching**: method, URL, query subset, headers subset and body,
//!   each as a literal or a full-match regex
//! - **Response Sequences**: consecutive matches walk through a list of
//!   responses and then repeat the last one
//! - **File Bodies**: bodies read from disk on every serve, so edits show up
//!   without a reload
//! - **Hot Reload**: the whole configuration is swapped atomically; a broken
//!   document leaves the running one untouched
//! - **Latency Simulation**: fixed delay per response
//!
//! # Example Configuration
//!
//! ```yaml
//! - id: invoice
//!   request:
//!     method: [GET]
//!     url: ^/invoice$
//!     query:
//!       status: active
//!   response:
//!     - status: 200
//!       body: OK
//!     - status: 500
//!       body: FAIL
//!
//! - request:
//!     method: [POST]
//!     url: /invoice
//!     headers:
//!       content-type: application/json
//!     post: '\{"name": ".+"\}'
//!   response:
//!     status: 201
//!     headers:
//!       location: /invoice/1
//!     file: responses/created.json
//!     latency: 250
//! ```

pub mod builder;
pub mod config;
pub mod content;
pub mod declaration;
pub mod error;
pub mod http;
pub mod matcher;
pub mod sequence;
pub mod server;
pub mod status;
pub mod store;
pub mod watch;

pub use builder::{DeclarationBuilder, RequestPatternBuilder, ResponseSpecBuilder};
pub use config::{ServerSettings, StubConfig};
pub use declaration::{BodySource, Declaration, HeaderList, RequestPattern, ResponseSpec};
pub use error::{ConfigError, StubError};
pub use matcher::{InboundRequest, MatchResult, NoMatch};
pub use server::{ResponseDescriptor, ServedResponse, StubHandler, StubServer};
pub use store::{ConfigurationSnapshot, ConfigurationStore};
pub use watch::ConfigWatcher;
