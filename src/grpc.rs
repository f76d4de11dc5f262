//! gRPC log entries, the logger that creates them, and the unary interceptor.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use http::Uri;
use serde::Serialize;
use tonic::metadata::{KeyAndValueRef, MetadataMap};
use tonic::{Code, Request, Response, Status};

use crate::config::GrpcConfig;
use crate::entry::{Contributor, EntryHandle, Extras, Finalizer, LogEntry, Scope, Started};
use crate::event::Event;
use crate::sink::{LogSink, Sink};

/// Snapshot of an inbound unary call.
#[derive(Debug, Clone)]
pub struct GrpcRequestInfo {
    full_method: String,
    authority: Option<String>,
    metadata: MetadataMap,
    peer: Option<String>,
}

impl GrpcRequestInfo {
    pub fn new(full_method: impl Into<String>) -> Self {
        GrpcRequestInfo {
            full_method: full_method.into(),
            authority: None,
            metadata: MetadataMap::new(),
            peer: None,
        }
    }

    /// Captures metadata, authority and peer address of `req`.
    ///
    /// tonic does not keep the request URI, so the authority comes from an
    /// [`http::Uri`] that a layer in front of the service stored in the
    /// request extensions, or else from the `host` metadata entry.
    pub fn from_request<T>(full_method: impl Into<String>, req: &Request<T>) -> Self {
        let authority = req
            .extensions()
            .get::<Uri>()
            .and_then(Uri::authority)
            .map(|a| a.to_string())
            .or_else(|| {
                req.metadata()
                    .get("host")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            });

        GrpcRequestInfo {
            full_method: full_method.into(),
            authority,
            metadata: req.metadata().clone(),
            peer: req.remote_addr().map(|addr| addr.to_string()),
        }
    }

    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = Some(authority.into());
        self
    }

    pub fn with_metadata(mut self, metadata: MetadataMap) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = Some(peer.into());
        self
    }

    pub fn full_method(&self) -> &str {
        &self.full_method
    }

    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    pub fn peer(&self) -> Option<&str> {
        self.peer.as_deref()
    }

    /// Value of a captured field: a metadata entry, or one of the pseudo-fields
    /// `:authority`, `:method`, `:path` and `:scheme`.
    pub fn field(&self, name: &str) -> Option<Cow<'_, str>> {
        let val = match name {
            ":authority" => self.authority.as_deref(),
            ":method" => Some("POST"),
            ":path" => Some(self.full_method.as_str()),
            ":scheme" => None,
            _ => self.metadata.get(name).and_then(|v| v.to_str().ok()),
        };
        val.filter(|v| !v.is_empty()).map(Cow::Borrowed)
    }

    /// All metadata except the `ignored` keys, as a JSON object of value lists.
    ///
    /// Binary entries keep their base64 wire form. `None` when nothing is left.
    fn metadata_json(&self, ignored: &HashSet<String>) -> Option<String> {
        let mut all: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for kv in self.metadata.iter() {
            let (key, val) = match kv {
                KeyAndValueRef::Ascii(k, v) => (k.as_str(), v.to_str().ok()),
                KeyAndValueRef::Binary(k, v) => {
                    (k.as_str(), std::str::from_utf8(v.as_encoded_bytes()).ok())
                }
            };
            if ignored.contains(key) {
                continue;
            }
            if let Some(val) = val {
                all.entry(key).or_default().push(val);
            }
        }
        if all.is_empty() {
            return None;
        }

        match serde_json::to_string(&all) {
            Ok(text) => Some(text),
            Err(err) => {
                log::debug!("skipping grpc metadata: {err}");
                None
            }
        }
    }
}

#[derive(Debug, Default)]
struct Outcome {
    code: Option<Code>,
    request: Option<String>,
    response: Option<String>,
}

/// Result of a call, filled in by the interceptor as the call progresses.
#[derive(Debug, Clone, Default)]
pub struct RpcOutcome(Arc<Mutex<Outcome>>);

impl RpcOutcome {
    pub fn set_code(&self, code: Code) {
        self.lock().code = Some(code);
    }

    /// `None` while the call has not completed.
    pub fn code(&self) -> Option<Code> {
        self.lock().code
    }

    /// Records the request message as JSON. Unserializable messages are skipped.
    pub fn set_request<T: Serialize + ?Sized>(&self, msg: &T) {
        self.lock().request = payload(msg);
    }

    /// Records the response message as JSON. Unserializable messages are skipped.
    pub fn set_response<T: Serialize + ?Sized>(&self, msg: &T) {
        self.lock().response = payload(msg);
    }

    fn lock(&self) -> MutexGuard<'_, Outcome> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn payload<T: Serialize + ?Sized>(msg: &T) -> Option<String> {
    match serde_json::to_string(msg) {
        Ok(text) => Some(text),
        Err(err) => {
            log::debug!("skipping grpc payload: {err}");
            None
        }
    }
}

/// Conventional name of a gRPC status code, e.g. `OK` or `NotFound`.
pub fn code_name(code: Code) -> &'static str {
    match code {
        Code::Ok => "OK",
        Code::Cancelled => "Canceled",
        Code::Unknown => "Unknown",
        Code::InvalidArgument => "InvalidArgument",
        Code::DeadlineExceeded => "DeadlineExceeded",
        Code::NotFound => "NotFound",
        Code::AlreadyExists => "AlreadyExists",
        Code::PermissionDenied => "PermissionDenied",
        Code::ResourceExhausted => "ResourceExhausted",
        Code::FailedPrecondition => "FailedPrecondition",
        Code::Aborted => "Aborted",
        Code::OutOfRange => "OutOfRange",
        Code::Unimplemented => "Unimplemented",
        Code::Internal => "Internal",
        Code::Unavailable => "Unavailable",
        Code::DataLoss => "DataLoss",
        Code::Unauthenticated => "Unauthenticated",
        #[allow(unreachable_patterns)]
        _ => "Unknown",
    }
}

/// Log entry of one gRPC call.
pub struct GrpcLogEntry {
    cfg: Arc<GrpcConfig>,
    sink: Arc<dyn Sink>,
    req: GrpcRequestInfo,
    outcome: RpcOutcome,
    started: Started,
    extras: Extras,
}

impl GrpcLogEntry {
    pub fn new(
        cfg: Arc<GrpcConfig>,
        sink: Arc<dyn Sink>,
        req: GrpcRequestInfo,
        outcome: RpcOutcome,
    ) -> Self {
        GrpcLogEntry {
            cfg,
            sink,
            req,
            outcome,
            started: Started::now(),
            extras: Extras::new(),
        }
    }

    fn event(&self, extras: Vec<Contributor>) -> Event {
        let outcome = self.outcome.lock();
        // a call that never completed was dropped by the server or the client
        let code = outcome.code.unwrap_or(Code::Cancelled);

        let mut e = Event::new();
        e.str("protocol", "grpc")
            .str("method", self.req.full_method.as_str())
            .str("status", code_name(code));
        self.started.render(&mut e);

        if self.cfg.peer {
            if let Some(peer) = self.req.peer() {
                e.str("peer", peer);
            }
        }

        for sel in &self.cfg.metadata {
            if let Some(val) = self.req.field(sel.name()) {
                e.str(sel.label(), val);
            }
        }

        if self.cfg.metadata_field {
            if let Some(all) = self.req.metadata_json(&self.cfg.ignored_metadata) {
                e.str("metadata", all);
            }
        }

        if self.cfg.request {
            if let Some(req) = &outcome.request {
                e.str("req", req.as_str());
            }
        }
        if self.cfg.response {
            if let Some(res) = &outcome.response {
                e.str("res", res.as_str());
            }
        }
        drop(outcome);

        for f in extras {
            f(&mut e);
        }
        e
    }
}

impl LogEntry for GrpcLogEntry {
    fn add(&self, f: Contributor) {
        self.extras.push(f);
    }

    fn write(&self) {
        let Some(extras) = self.extras.take() else {
            return;
        };
        if self.cfg.is_ignored(&self.req.full_method) {
            return;
        }

        let event = self.event(extras);
        if let Err(err) = self.sink.write(&event) {
            log::warn!("failed to write access log: {err}");
        }
    }
}

/// Which messages a formatter wants recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Payloads {
    pub request: bool,
    pub response: bool,
}

/// Creates the log entry of each gRPC call.
pub trait GrpcLogFormatter: Send + Sync {
    fn new_log_entry(
        &self,
        sink: Arc<dyn Sink>,
        req: GrpcRequestInfo,
        outcome: RpcOutcome,
    ) -> EntryHandle;

    /// Messages the interceptor should serialize into the outcome.
    fn payloads(&self) -> Payloads {
        Payloads::default()
    }
}

/// Formatter producing [`GrpcLogEntry`] values from a [`GrpcConfig`].
#[derive(Debug, Clone, Default)]
pub struct DefaultGrpcLogFormatter {
    cfg: Arc<GrpcConfig>,
}

impl DefaultGrpcLogFormatter {
    pub fn new(cfg: GrpcConfig) -> Self {
        DefaultGrpcLogFormatter { cfg: Arc::new(cfg) }
    }
}

impl GrpcLogFormatter for DefaultGrpcLogFormatter {
    fn new_log_entry(
        &self,
        sink: Arc<dyn Sink>,
        req: GrpcRequestInfo,
        outcome: RpcOutcome,
    ) -> EntryHandle {
        EntryHandle::new(GrpcLogEntry::new(self.cfg.clone(), sink, req, outcome))
    }

    fn payloads(&self) -> Payloads {
        Payloads {
            request: self.cfg.request,
            response: self.cfg.response,
        }
    }
}

/// Access logger for gRPC calls: a sink plus a formatter.
#[derive(Clone)]
pub struct GrpcLogger {
    sink: Arc<dyn Sink>,
    formatter: Arc<dyn GrpcLogFormatter>,
}

impl GrpcLogger {
    pub fn new<S, F>(sink: S, formatter: F) -> Self
    where
        S: Sink + 'static,
        F: GrpcLogFormatter + 'static,
    {
        GrpcLogger {
            sink: Arc::new(sink),
            formatter: Arc::new(formatter),
        }
    }

    /// Logger writing through `log` with the default formatter over `cfg`.
    pub fn with_config(cfg: GrpcConfig) -> Self {
        GrpcLogger::new(LogSink::default(), DefaultGrpcLogFormatter::new(cfg))
    }

    pub fn new_log_entry(&self, req: GrpcRequestInfo, outcome: RpcOutcome) -> EntryHandle {
        self.formatter
            .new_log_entry(self.sink.clone(), req, outcome)
    }

    pub fn payloads(&self) -> Payloads {
        self.formatter.payloads()
    }
}

impl Default for GrpcLogger {
    fn default() -> Self {
        GrpcLogger::with_config(GrpcConfig::default())
    }
}

/// Runs a unary `handler` and writes one access log event for the call.
///
/// The handler finds the call's [`Scope`] in the request extensions via
/// [`Scope::from_tonic`]. The event is written when the call completes,
/// fails, or is dropped before completing.
///
/// ```rust
/// use actix_web_middleware_accesslog::{GrpcLogger, Scope, grpc};
/// use tonic::{Request, Response, Status};
///
/// async fn say_hello(
///     logger: &GrpcLogger,
///     request: Request<String>,
/// ) -> Result<Response<String>, Status> {
///     grpc::unary(logger, "/hello.Greeter/SayHello", request, |req| async move {
///         Scope::from_tonic(&req).add(|e| {
///             e.str("user", "alice");
///         });
///         Ok(Response::new(format!("hello {}", req.into_inner())))
///     })
///     .await
/// }
/// ```
pub async fn unary<Req, Res, F, Fut>(
    logger: &GrpcLogger,
    full_method: &str,
    mut request: Request<Req>,
    handler: F,
) -> Result<Response<Res>, Status>
where
    Req: Serialize,
    Res: Serialize,
    F: FnOnce(Request<Req>) -> Fut,
    Fut: Future<Output = Result<Response<Res>, Status>>,
{
    let outcome = RpcOutcome::default();
    let entry = logger.new_log_entry(
        GrpcRequestInfo::from_request(full_method, &request),
        outcome.clone(),
    );
    let _finalizer = Finalizer::new(entry.clone());

    let payloads = logger.payloads();
    if payloads.request {
        outcome.set_request(request.get_ref());
    }
    request
        .extensions_mut()
        .insert(Scope::default().attach(entry));

    let result = handler(request).await;
    match &result {
        Ok(res) => {
            outcome.set_code(Code::Ok);
            if payloads.response {
                outcome.set_response(res.get_ref());
            }
        }
        Err(status) => outcome.set_code(status.code()),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingSink, str_field};
    use std::collections::HashMap;

    #[derive(Serialize, Debug)]
    struct Ping {
        msg: String,
    }

    fn logger(cfg: GrpcConfig) -> (GrpcLogger, RecordingSink) {
        let sink = RecordingSink::default();
        let logger = GrpcLogger::new(sink.clone(), DefaultGrpcLogFormatter::new(cfg));
        (logger, sink)
    }

    fn ping(msg: &str) -> Request<Ping> {
        let mut req = Request::new(Ping {
            msg: msg.to_string(),
        });
        req.metadata_mut()
            .insert("user-agent", "grpc-test".parse().unwrap());
        req.metadata_mut()
            .insert("x-request-id", "abc".parse().unwrap());
        req
    }

    #[tokio::test]
    async fn test_unary_ok() {
        let cfg = GrpcConfig::builder()
            .with_metadata(["x-request-id:rid", "user-agent", "x-missing"])
            .with_request()
            .with_response()
            .build();
        let (logger, sink) = logger(cfg);

        let res = unary(&logger, "/test.Svc/Ping", ping("hi"), |req| async move {
            Scope::from_tonic(&req).add(|e| {
                e.str("A", "1");
            });
            Ok(Response::new(Ping {
                msg: format!("re: {}", req.into_inner().msg),
            }))
        })
        .await
        .unwrap();
        assert_eq!(res.get_ref().msg, "re: hi");

        let events = sink.events();
        assert_eq!(events.len(), 1);
        let e = &events[0];
        let keys: Vec<_> = e.keys().collect();
        assert_eq!(
            keys,
            vec![
                "protocol",
                "method",
                "status",
                "time",
                "elapsed(ms)",
                "rid",
                "user-agent",
                "req",
                "res",
                "A"
            ]
        );
        assert_eq!(str_field(e, "protocol"), Some("grpc"));
        assert_eq!(str_field(e, "method"), Some("/test.Svc/Ping"));
        assert_eq!(str_field(e, "status"), Some("OK"));
        assert_eq!(str_field(e, "rid"), Some("abc"));
        assert_eq!(str_field(e, "req"), Some(r#"{"msg":"hi"}"#));
        assert_eq!(str_field(e, "res"), Some(r#"{"msg":"re: hi"}"#));
    }

    #[tokio::test]
    async fn test_unary_error_status() {
        let (logger, sink) = logger(GrpcConfig::builder().with_response().build());

        let res = unary(&logger, "/test.Svc/Ping", ping("hi"), |_req| async {
            Err::<Response<Ping>, _>(Status::not_found("no such ping"))
        })
        .await;
        assert_eq!(res.unwrap_err().code(), Code::NotFound);

        let e = &sink.events()[0];
        assert_eq!(str_field(e, "status"), Some("NotFound"));
        assert!(e.get("res").is_none());
    }

    #[tokio::test]
    async fn test_ignored_method() {
        let cfg = GrpcConfig::builder()
            .with_ignored_methods(["/grpc.health.v1.Health/Check"])
            .build();
        let (logger, sink) = logger(cfg);

        let res = unary(&logger, "/grpc.health.v1.Health/Check", ping(""), |_req| async {
            Ok(Response::new(Ping { msg: "SERVING".to_string() }))
        })
        .await;
        assert!(res.is_ok());
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_call_is_canceled() {
        let (logger, sink) = logger(GrpcConfig::default());

        let call = unary(&logger, "/test.Svc/Slow", ping(""), |_req| {
            std::future::pending::<Result<Response<Ping>, Status>>()
        });
        tokio::select! {
            biased;
            _ = call => unreachable!("handler never completes"),
            _ = std::future::ready(()) => {}
        }

        assert_eq!(sink.count(), 1);
        assert_eq!(str_field(&sink.events()[0], "status"), Some("Canceled"));
    }

    #[test]
    fn test_peer_and_failed_payload() {
        let cfg = GrpcConfig::builder().with_peer().with_request().build();
        let (logger, sink) = logger(cfg);

        let outcome = RpcOutcome::default();
        let req = GrpcRequestInfo::new("/test.Svc/Ping").with_peer("10.0.0.1:5000");
        let entry = logger.new_log_entry(req, outcome.clone());

        let mut bad = HashMap::new();
        bad.insert(vec![1u8], 1);
        outcome.set_request(&bad);
        outcome.set_code(Code::Unavailable);
        entry.write();
        entry.write();

        assert_eq!(sink.count(), 1);
        let e = &sink.events()[0];
        assert_eq!(str_field(e, "peer"), Some("10.0.0.1:5000"));
        assert_eq!(str_field(e, "status"), Some("Unavailable"));
        assert!(e.get("req").is_none());
    }

    #[tokio::test]
    async fn test_authority_pseudo_field() {
        let cfg = GrpcConfig::builder()
            .with_metadata([":authority:host", ":path"])
            .build();
        let (logger, sink) = logger(cfg);

        let mut req = ping("hi");
        req.extensions_mut()
            .insert(Uri::from_static("http://grpc.example.com:50051/test.Svc/Ping"));
        unary(&logger, "/test.Svc/Ping", req, |_req| async {
            Ok(Response::new(Ping { msg: "pong".to_string() }))
        })
        .await
        .unwrap();

        let e = &sink.events()[0];
        assert_eq!(str_field(e, "host"), Some("grpc.example.com:50051"));
        assert_eq!(str_field(e, ":path"), Some("/test.Svc/Ping"));
    }

    #[test]
    fn test_authority_from_host_metadata() {
        let mut req = Request::new(());
        req.metadata_mut()
            .insert("host", "api.example.com".parse().unwrap());
        let info = GrpcRequestInfo::from_request("/test.Svc/Ping", &req);
        assert_eq!(info.authority(), Some("api.example.com"));
        assert_eq!(info.field(":authority").as_deref(), Some("api.example.com"));

        let info = GrpcRequestInfo::new("/test.Svc/Ping");
        assert_eq!(info.field(":authority"), None);
        assert_eq!(info.field(":scheme"), None);
    }

    #[test]
    fn test_metadata_field() {
        let cfg = GrpcConfig::builder()
            .with_metadata_field()
            .with_ignored_metadata(["User-Agent"])
            .build();
        let (logger, sink) = logger(cfg);

        let mut metadata = MetadataMap::new();
        metadata.insert("user-agent", "grpc-test".parse().unwrap());
        metadata.append("x-tag", "a".parse().unwrap());
        metadata.append("x-tag", "b".parse().unwrap());
        metadata.insert("x-request-id", "abc".parse().unwrap());
        let req = GrpcRequestInfo::new("/test.Svc/Ping").with_metadata(metadata);
        logger.new_log_entry(req, RpcOutcome::default()).write();

        let mut metadata = MetadataMap::new();
        metadata.insert("user-agent", "grpc-test".parse().unwrap());
        let req = GrpcRequestInfo::new("/test.Svc/Ping").with_metadata(metadata);
        logger.new_log_entry(req, RpcOutcome::default()).write();

        let events = sink.events();
        assert_eq!(
            str_field(&events[0], "metadata"),
            Some(r#"{"x-request-id":["abc"],"x-tag":["a","b"]}"#)
        );
        // nothing left after the ignored keys
        assert!(events[1].get("metadata").is_none());
    }

    #[test]
    fn test_peer_not_captured_by_default() {
        let (logger, sink) = logger(GrpcConfig::default());
        let req = GrpcRequestInfo::new("/test.Svc/Ping").with_peer("10.0.0.1:5000");
        let outcome = RpcOutcome::default();
        outcome.set_code(Code::Ok);
        logger.new_log_entry(req, outcome).write();

        assert!(sink.events()[0].get("peer").is_none());
    }

    #[test]
    fn test_code_names() {
        assert_eq!(code_name(Code::Ok), "OK");
        assert_eq!(code_name(Code::Cancelled), "Canceled");
        assert_eq!(code_name(Code::DeadlineExceeded), "DeadlineExceeded");
    }

    #[test]
    fn test_default_payloads() {
        assert_eq!(GrpcLogger::default().payloads(), Payloads::default());
        let logger = GrpcLogger::with_config(GrpcConfig::builder().with_request().build());
        assert_eq!(
            logger.payloads(),
            Payloads {
                request: true,
                response: false
            }
        );
    }
}
