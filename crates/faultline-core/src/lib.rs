//! Faultline Core - Notice model and processing primitives
//!
//! This crate contains everything needed to turn an error into a deliverable
//! payload, without any I/O:
//! - **Values** - `Value`, a dynamic tree with shared containers
//! - **Truncation** - `Truncator` and size-bounded `Notice::serialize`
//! - **Filters** - `FilterChain` plus the built-in filters
//! - **Promises** - `Promise`, a single-settlement result handle
//! - **Configuration** - YAML config, validation and builder
//!
//! Delivery (workers, HTTP, backlog) lives in `faultline-delivery`.

pub mod config;
pub mod context;
pub mod error_info;
pub mod filter_chain;
pub mod filters;
pub mod host_info;
pub mod logging;
pub mod notice;
pub mod promise;
pub mod truncator;
pub mod value;

pub use config::{Config, ConfigBuilder, ValidationError};
pub use context::Context;
pub use error_info::{ErrorInfo, Frame};
pub use filter_chain::{weighted, Filter, FilterChain, FilterError};
pub use notice::{Notice, NoticeError};
pub use promise::Promise;
pub use truncator::Truncator;
pub use value::{Map, Value};
