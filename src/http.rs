//! HTTP log entries and the logger that creates them.

use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};

use actix_web::HttpRequest;
use actix_web::http::StatusCode;
use actix_web::http::header::{self, HeaderMap, HeaderName, HeaderValue};

use crate::client_ip::{client_ip, split_host};
use crate::config::HttpConfig;
use crate::entry::{Contributor, EntryHandle, Extras, LogEntry, Started};
use crate::event::Event;
use crate::sink::{LogSink, Sink};

/// Snapshot of an inbound HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequestInfo {
    method: String,
    path: String,
    query: String,
    scheme: String,
    authority: Option<String>,
    headers: HeaderMap,
    remote_addr: Option<String>,
}

impl HttpRequestInfo {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        HttpRequestInfo {
            method: method.into(),
            path: path.into(),
            query: String::new(),
            scheme: "http".to_string(),
            authority: None,
            headers: HeaderMap::new(),
            remote_addr: None,
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = Some(authority.into());
        self
    }

    /// Peer address as `host:port`.
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn remote_addr(&self) -> Option<&str> {
        self.remote_addr.as_deref()
    }

    pub fn user_agent(&self) -> &str {
        self.headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }

    /// Value of a captured field: a header, or a pseudo-field such as `:authority`.
    pub fn field(&self, name: &str) -> Option<Cow<'_, str>> {
        let val = match name {
            ":authority" => self.authority.as_deref().map(Cow::Borrowed),
            ":method" => Some(Cow::Borrowed(self.method.as_str())),
            ":scheme" => Some(Cow::Borrowed(self.scheme.as_str())),
            ":path" if self.query.is_empty() => Some(Cow::Borrowed(self.path.as_str())),
            ":path" => Some(Cow::Owned(format!("{}?{}", self.path, self.query))),
            _ => self
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(Cow::Borrowed),
        };
        val.filter(|v| !v.is_empty())
    }
}

impl From<&HttpRequest> for HttpRequestInfo {
    fn from(req: &HttpRequest) -> Self {
        let authority = req.uri().authority().map(|a| a.to_string()).or_else(|| {
            req.headers()
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        });

        HttpRequestInfo {
            method: req.method().to_string(),
            path: req.path().to_string(),
            query: req.query_string().to_string(),
            scheme: req.connection_info().scheme().to_string(),
            authority,
            headers: req.headers().clone(),
            remote_addr: req.peer_addr().map(|addr| addr.to_string()),
        }
    }
}

/// Status code of the response, filled in once the handler has finished.
#[derive(Debug, Clone, Default)]
pub struct ResponseStatus(Arc<AtomicU16>);

impl ResponseStatus {
    pub fn set(&self, status: StatusCode) {
        self.0.store(status.as_u16(), Ordering::Release);
    }

    /// `None` while no response has been produced.
    pub fn get(&self) -> Option<StatusCode> {
        StatusCode::from_u16(self.0.load(Ordering::Acquire)).ok()
    }
}

/// Log entry of one HTTP request.
pub struct HttpLogEntry {
    cfg: Arc<HttpConfig>,
    sink: Arc<dyn Sink>,
    req: HttpRequestInfo,
    status: ResponseStatus,
    started: Started,
    extras: Extras,
}

impl HttpLogEntry {
    pub fn new(
        cfg: Arc<HttpConfig>,
        sink: Arc<dyn Sink>,
        req: HttpRequestInfo,
        status: ResponseStatus,
    ) -> Self {
        HttpLogEntry {
            cfg,
            sink,
            req,
            status,
            started: Started::now(),
            extras: Extras::new(),
        }
    }

    fn is_ignored(&self) -> bool {
        self.cfg
            .ignored_paths
            .is_ignored(&self.req.method, &self.req.path)
    }

    fn event(&self, extras: Vec<Contributor>) -> Event {
        let status = self.status.get().map_or(0, |s| s.as_u16());

        let mut e = Event::new();
        e.str("protocol", "http")
            .str("path", self.req.path.as_str())
            .str("status", status.to_string())
            .str("ua", self.req.user_agent());
        self.started.render(&mut e);

        if !self.req.query.is_empty() {
            e.str("qs", self.req.query.as_str());
        }

        for sel in &self.cfg.headers {
            if let Some(val) = self.req.field(sel.name()) {
                e.str(sel.label(), val);
            }
        }

        if self.cfg.client_ip {
            let ip = client_ip(&self.req.headers)
                .or_else(|| self.req.remote_addr.as_deref().and_then(split_host));
            if let Some(ip) = ip {
                e.str("client-ip", ip);
            }
        }

        for f in extras {
            f(&mut e);
        }
        e
    }
}

impl LogEntry for HttpLogEntry {
    fn add(&self, f: Contributor) {
        self.extras.push(f);
    }

    fn write(&self) {
        let Some(extras) = self.extras.take() else {
            return;
        };
        if self.is_ignored() {
            return;
        }

        let event = self.event(extras);
        if let Err(err) = self.sink.write(&event) {
            log::warn!("failed to write access log: {err}");
        }
    }
}

/// Creates the log entry of each HTTP request.
pub trait HttpLogFormatter: Send + Sync {
    fn new_log_entry(
        &self,
        sink: Arc<dyn Sink>,
        req: HttpRequestInfo,
        status: ResponseStatus,
    ) -> EntryHandle;
}

/// Formatter producing [`HttpLogEntry`] values from an [`HttpConfig`].
#[derive(Debug, Clone, Default)]
pub struct DefaultHttpLogFormatter {
    cfg: Arc<HttpConfig>,
}

impl DefaultHttpLogFormatter {
    pub fn new(cfg: HttpConfig) -> Self {
        DefaultHttpLogFormatter { cfg: Arc::new(cfg) }
    }
}

impl HttpLogFormatter for DefaultHttpLogFormatter {
    fn new_log_entry(
        &self,
        sink: Arc<dyn Sink>,
        req: HttpRequestInfo,
        status: ResponseStatus,
    ) -> EntryHandle {
        EntryHandle::new(HttpLogEntry::new(self.cfg.clone(), sink, req, status))
    }
}

/// Access logger for HTTP requests: a sink plus a formatter.
///
/// Construct one at startup and hand it to [`AccessLog`](crate::AccessLog).
#[derive(Clone)]
pub struct HttpLogger {
    sink: Arc<dyn Sink>,
    formatter: Arc<dyn HttpLogFormatter>,
}

impl HttpLogger {
    pub fn new<S, F>(sink: S, formatter: F) -> Self
    where
        S: Sink + 'static,
        F: HttpLogFormatter + 'static,
    {
        HttpLogger {
            sink: Arc::new(sink),
            formatter: Arc::new(formatter),
        }
    }

    /// Logger writing through `log` with the default formatter over `cfg`.
    pub fn with_config(cfg: HttpConfig) -> Self {
        HttpLogger::new(LogSink::default(), DefaultHttpLogFormatter::new(cfg))
    }

    pub fn new_log_entry(&self, req: HttpRequestInfo, status: ResponseStatus) -> EntryHandle {
        self.formatter
            .new_log_entry(self.sink.clone(), req, status)
    }
}

impl Default for HttpLogger {
    fn default() -> Self {
        HttpLogger::with_config(HttpConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingSink, str_field};
    use actix_web::test::TestRequest;

    fn logger(cfg: HttpConfig) -> (HttpLogger, RecordingSink) {
        let sink = RecordingSink::default();
        let logger = HttpLogger::new(sink.clone(), DefaultHttpLogFormatter::new(cfg));
        (logger, sink)
    }

    #[test]
    fn test_fixed_fields() {
        let (logger, sink) = logger(HttpConfig::default());
        let status = ResponseStatus::default();
        let req = HttpRequestInfo::new("GET", "/ping")
            .with_query("a=1")
            .with_header(header::USER_AGENT, HeaderValue::from_static("test-agent"));

        let entry = logger.new_log_entry(req, status.clone());
        status.set(StatusCode::CREATED);
        entry.write();

        let events = sink.events();
        assert_eq!(events.len(), 1);
        let e = &events[0];
        let keys: Vec<_> = e.keys().collect();
        assert_eq!(
            keys,
            vec!["protocol", "path", "status", "ua", "time", "elapsed(ms)", "qs"]
        );
        assert_eq!(str_field(e, "protocol"), Some("http"));
        assert_eq!(str_field(e, "path"), Some("/ping"));
        assert_eq!(str_field(e, "status"), Some("201"));
        assert_eq!(str_field(e, "ua"), Some("test-agent"));
        assert_eq!(str_field(e, "qs"), Some("a=1"));
    }

    #[test]
    fn test_headers_and_client_ip() {
        let cfg = HttpConfig::builder()
            .with_headers(["x-request-id:rid", ":authority", "x-missing"])
            .with_client_ip()
            .build();
        let (logger, sink) = logger(cfg);
        let req = HttpRequestInfo::new("GET", "/")
            .with_authority("example.com")
            .with_header(
                HeaderName::from_static("x-request-id"),
                HeaderValue::from_static("abc"),
            )
            .with_header(
                HeaderName::from_static("x-forwarded-for"),
                HeaderValue::from_static("203.0.113.5, 70.41.3.18"),
            )
            .with_remote_addr("10.0.0.1:5000");

        logger.new_log_entry(req, ResponseStatus::default()).write();

        let e = &sink.events()[0];
        let keys: Vec<_> = e.keys().skip(6).collect();
        assert_eq!(keys, vec!["rid", ":authority", "client-ip"]);
        assert_eq!(str_field(e, "rid"), Some("abc"));
        assert_eq!(str_field(e, ":authority"), Some("example.com"));
        assert_eq!(str_field(e, "client-ip"), Some("203.0.113.5"));
        assert_eq!(str_field(e, "status"), Some("0"));
    }

    #[test]
    fn test_client_ip_falls_back_to_peer() {
        let cfg = HttpConfig::builder().with_client_ip().build();
        let (logger, sink) = logger(cfg);

        let req = HttpRequestInfo::new("GET", "/").with_remote_addr("[::1]:5000");
        logger.new_log_entry(req, ResponseStatus::default()).write();
        let req = HttpRequestInfo::new("GET", "/");
        logger.new_log_entry(req, ResponseStatus::default()).write();

        let events = sink.events();
        assert_eq!(str_field(&events[0], "client-ip"), Some("::1"));
        assert!(events[1].get("client-ip").is_none());
    }

    #[test]
    fn test_blank_forwarded_for_falls_back_to_peer() {
        let cfg = HttpConfig::builder().with_client_ip().build();
        let (logger, sink) = logger(cfg);

        let req = HttpRequestInfo::new("GET", "/")
            .with_header(
                HeaderName::from_static("x-forwarded-for"),
                HeaderValue::from_static(", 70.41.3.18"),
            )
            .with_remote_addr("10.0.0.1:5000");
        logger.new_log_entry(req, ResponseStatus::default()).write();

        assert_eq!(str_field(&sink.events()[0], "client-ip"), Some("10.0.0.1"));
    }

    #[test]
    fn test_extras_after_fixed_fields() {
        let (logger, sink) = logger(HttpConfig::default());
        let entry = logger.new_log_entry(HttpRequestInfo::new("GET", "/"), ResponseStatus::default());

        entry.add(|e| {
            e.str("A", "1");
        });
        entry.add(|e| {
            e.str("B", "2");
        });
        entry.write();
        entry.write();

        let events = sink.events();
        assert_eq!(events.len(), 1);
        let keys: Vec<_> = events[0].keys().collect();
        assert_eq!(&keys[keys.len() - 2..], &["A", "B"]);
    }

    #[test]
    fn test_ignored_request_is_not_written() {
        let cfg = HttpConfig::builder()
            .with_ignored_paths("GET", ["/health"])
            .build();
        let (logger, sink) = logger(cfg);

        logger
            .new_log_entry(HttpRequestInfo::new("GET", "/health"), ResponseStatus::default())
            .write();
        logger
            .new_log_entry(HttpRequestInfo::new("POST", "/health"), ResponseStatus::default())
            .write();

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(str_field(&events[0], "path"), Some("/health"));
    }

    #[test]
    fn test_request_info_from_http_request() {
        let req = TestRequest::get()
            .uri("/items?page=2")
            .insert_header(("host", "example.com"))
            .insert_header(("user-agent", "test-agent"))
            .peer_addr("127.0.0.1:8080".parse().unwrap())
            .to_http_request();

        let info = HttpRequestInfo::from(&req);
        assert_eq!(info.method(), "GET");
        assert_eq!(info.path(), "/items");
        assert_eq!(info.query(), "page=2");
        assert_eq!(info.user_agent(), "test-agent");
        assert_eq!(info.remote_addr(), Some("127.0.0.1:8080"));
        assert_eq!(info.field(":authority").as_deref(), Some("example.com"));
        assert_eq!(info.field(":path").as_deref(), Some("/items?page=2"));
        assert_eq!(info.field(":method").as_deref(), Some("GET"));
        assert_eq!(info.field("Host").as_deref(), Some("example.com"));
    }

    #[test]
    fn test_response_status() {
        let status = ResponseStatus::default();
        assert_eq!(status.get(), None);
        status.set(StatusCode::NOT_FOUND);
        assert_eq!(status.clone().get(), Some(StatusCode::NOT_FOUND));
    }
}
