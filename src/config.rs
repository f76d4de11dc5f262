//! What each logger captures. Built once, read by every request.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use crate::ignore::IgnoredPaths;
use crate::selector::Selectors;

/// Capture settings of the HTTP logger.
#[derive(Debug, Clone, Default)]
pub struct HttpConfig {
    pub(crate) headers: Selectors,
    pub(crate) ignored_paths: IgnoredPaths,
    pub(crate) client_ip: bool,
}

impl HttpConfig {
    pub fn builder() -> HttpConfigBuilder {
        HttpConfigBuilder::default()
    }

    pub fn headers(&self) -> &Selectors {
        &self.headers
    }

    pub fn ignored_paths(&self) -> &IgnoredPaths {
        &self.ignored_paths
    }

    pub fn client_ip(&self) -> bool {
        self.client_ip
    }
}

#[derive(Debug, Default)]
pub struct HttpConfigBuilder {
    cfg: HttpConfig,
}

impl HttpConfigBuilder {
    pub fn build(self) -> HttpConfig {
        self.cfg
    }

    /// Captures the given request headers, each written as `name` or `name:alias`.
    pub fn with_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.cfg.headers = headers.into_iter().collect();
        self
    }

    /// Does not log `method` requests whose path matches one of `patterns`.
    pub fn with_ignored_paths<I, S>(mut self, method: &str, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for p in patterns {
            self.cfg.ignored_paths.insert(method, p.as_ref());
        }
        self
    }

    pub fn with_client_ip(mut self) -> Self {
        self.cfg.client_ip = true;
        self
    }
}

/// Flat, deserializable form of [`HttpConfig`].
///
/// ```rust
/// use actix_web_middleware_accesslog::{HttpConfig, HttpSettings};
///
/// let settings: HttpSettings = serde_json::from_str(r#"{
///     "headers": ["x-request-id:rid", ":authority"],
///     "ignored_paths": {"GET": ["/health"]},
///     "client_ip": true
/// }"#).unwrap();
///
/// let cfg = HttpConfig::from(settings);
/// assert!(cfg.ignored_paths().is_ignored("GET", "/health"));
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub headers: Vec<String>,
    pub ignored_paths: HashMap<String, Vec<String>>,
    pub client_ip: bool,
}

impl From<HttpSettings> for HttpConfig {
    fn from(settings: HttpSettings) -> Self {
        HttpConfig {
            headers: settings.headers.iter().collect(),
            ignored_paths: settings.ignored_paths.into_iter().collect(),
            client_ip: settings.client_ip,
        }
    }
}

/// Capture settings of the gRPC logger.
#[derive(Debug, Clone, Default)]
pub struct GrpcConfig {
    pub(crate) metadata: Selectors,
    pub(crate) metadata_field: bool,
    pub(crate) ignored_metadata: HashSet<String>,
    pub(crate) ignored_methods: HashSet<String>,
    pub(crate) peer: bool,
    pub(crate) request: bool,
    pub(crate) response: bool,
}

impl GrpcConfig {
    pub fn builder() -> GrpcConfigBuilder {
        GrpcConfigBuilder::default()
    }

    pub fn metadata(&self) -> &Selectors {
        &self.metadata
    }

    pub fn metadata_field(&self) -> bool {
        self.metadata_field
    }

    /// Whether `key` is left out of the `metadata` field.
    pub fn is_ignored_metadata(&self, key: &str) -> bool {
        self.ignored_metadata.contains(&key.to_ascii_lowercase())
    }

    pub fn is_ignored(&self, full_method: &str) -> bool {
        self.ignored_methods.contains(full_method)
    }

    pub fn peer(&self) -> bool {
        self.peer
    }

    pub fn request(&self) -> bool {
        self.request
    }

    pub fn response(&self) -> bool {
        self.response
    }
}

#[derive(Debug, Default)]
pub struct GrpcConfigBuilder {
    cfg: GrpcConfig,
}

impl GrpcConfigBuilder {
    pub fn build(self) -> GrpcConfig {
        self.cfg
    }

    /// Captures the given metadata entries, each written as `name` or `name:alias`.
    pub fn with_metadata<I, S>(mut self, metadata: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.cfg.metadata = metadata.into_iter().collect();
        self
    }

    /// Logs all incoming metadata as one JSON object under `metadata`.
    pub fn with_metadata_field(mut self) -> Self {
        self.cfg.metadata_field = true;
        self
    }

    /// Leaves the given keys out of the `metadata` field.
    pub fn with_ignored_metadata<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.cfg.ignored_metadata = lowercase(keys);
        self
    }

    /// Does not log calls to the given full methods, e.g. `/grpc.health.v1.Health/Check`.
    pub fn with_ignored_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cfg.ignored_methods = methods.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_peer(mut self) -> Self {
        self.cfg.peer = true;
        self
    }

    /// Logs request messages as JSON under `req`.
    pub fn with_request(mut self) -> Self {
        self.cfg.request = true;
        self
    }

    /// Logs response messages as JSON under `res`.
    pub fn with_response(mut self) -> Self {
        self.cfg.response = true;
        self
    }
}

/// Flat, deserializable form of [`GrpcConfig`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GrpcSettings {
    pub metadata: Vec<String>,
    pub metadata_field: bool,
    pub ignored_metadata: Vec<String>,
    pub ignored_methods: Vec<String>,
    pub peer: bool,
    pub request: bool,
    pub response: bool,
}

impl From<GrpcSettings> for GrpcConfig {
    fn from(settings: GrpcSettings) -> Self {
        GrpcConfig {
            metadata: settings.metadata.iter().collect(),
            metadata_field: settings.metadata_field,
            ignored_metadata: lowercase(settings.ignored_metadata),
            ignored_methods: settings.ignored_methods.into_iter().collect(),
            peer: settings.peer,
            request: settings.request,
            response: settings.response,
        }
    }
}

fn lowercase<I, S>(keys: I) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    keys.into_iter()
        .map(|k| k.as_ref().to_ascii_lowercase())
        .collect()
}
