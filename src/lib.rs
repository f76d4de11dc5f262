//! Request-scoped structured access logs for actix-web and tonic.
//!
//! Every request gets a log entry. Handlers can attach extra fields to it
//! while the request is in flight, and exactly one event is written when the
//! request completes, with the elapsed time.
//!
//! # Examples:
//! ## By default events are emitted through the standard `log` crate.
//! Example usage with the `structured_logger` crate:
//! ```rust,no_run
//! use actix_web::{web, App, HttpServer};
//! use actix_web_middleware_accesslog::{AccessLog, HttpConfig, Scope};
//! use structured_logger::{Builder, async_json::new_writer};
//!
//! #[actix_web::main] // or #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     Builder::new()
//!         .with_target_writer("*", new_writer(tokio::io::stdout()))
//!         .init();
//!
//!     HttpServer::new(|| {
//!         App::new()
//!             .wrap(AccessLog::with_config(
//!                 HttpConfig::builder()
//!                     .with_headers(["x-request-id:rid", ":authority"])
//!                     .with_ignored_paths("GET", ["/health"])
//!                     .with_client_ip()
//!                     .build(),
//!             ))
//!             .route("/ping", web::get().to(|scope: Scope| async move {
//!                 scope.add(|e| {
//!                     e.json("data", &serde_json::json!({"foo": "bar"}));
//!                 });
//!                 "pong"
//!             }))
//!     })
//!     .bind("127.0.0.1:8080")?
//!     .run()
//!     .await
//! }
//! ```
//! ## Writing JSON lines instead
//! ```rust
//! use actix_web::App;
//! use actix_web_middleware_accesslog::{
//!     AccessLog, DefaultHttpLogFormatter, HttpConfig, HttpLogger, JsonWriter,
//! };
//!
//! let logger = HttpLogger::new(
//!     JsonWriter::stdout(),
//!     DefaultHttpLogFormatter::new(HttpConfig::default()),
//! );
//! let app = App::new().wrap(AccessLog::new(logger));
//! ```
//!
//! # Emitted fields
//!
//! HTTP, in this order:
//! - `protocol` - always `http`
//! - `path` - Request path
//! - `status` - Response status code
//! - `ua` - User agent
//! - `time` - Request start in RFC3339 format
//! - `elapsed(ms)` - Processing time in milliseconds
//! - `qs` - Query string, when present
//! - configured headers, under their alias if one was given
//! - `client-ip` - Client address, when enabled
//! - fields added by handlers
//!
//! gRPC: `protocol` (`grpc`), `method`, `status` (code name), `time`,
//! `elapsed(ms)`, `peer`, configured metadata, `metadata`, `req`, `res`, then fields
//! added by handlers.
//!
//! # Selectors
//!
//! Headers and metadata are selected with `name` or `name:alias` strings.
//! Pseudo-fields keep their leading colon: `:authority:host` captures
//! `:authority` as `host`.
//!
//! # Feature Flags
//!
//! - `grpc` (default) - tonic interceptor and gRPC log entries

pub mod client_ip;
mod config;
mod entry;
mod error;
mod event;
#[cfg(feature = "grpc")]
pub mod grpc;
pub mod http;
mod ignore;
mod middleware;
mod selector;
mod sink;
#[cfg(test)]
mod testing;

pub use crate::config::{
    GrpcConfig, GrpcConfigBuilder, GrpcSettings, HttpConfig, HttpConfigBuilder, HttpSettings,
};
pub use crate::entry::{Contributor, EntryHandle, LogEntry, Scope, add_field};
pub use crate::error::Error;
pub use crate::event::{Event, Value};
#[cfg(feature = "grpc")]
pub use crate::grpc::{
    DefaultGrpcLogFormatter, GrpcLogEntry, GrpcLogFormatter, GrpcLogger, GrpcRequestInfo, Payloads,
    RpcOutcome,
};
pub use crate::http::{
    DefaultHttpLogFormatter, HttpLogEntry, HttpLogFormatter, HttpLogger, HttpRequestInfo,
    ResponseStatus,
};
pub use crate::ignore::{Glob, IgnoredPaths};
pub use crate::middleware::{AccessLog, AccessLogMiddlewareService, AccessLogResponse, StreamLog};
pub use crate::selector::{Selector, Selectors};
pub use crate::sink::{JsonWriter, LogSink, Sink};
