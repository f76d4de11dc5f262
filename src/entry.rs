//! Request-scoped log entries and the scope token that carries them.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use actix_utils::future::{Ready, ready};
use actix_web::dev::Payload;
use actix_web::{Error, FromRequest, HttpMessage, HttpRequest};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::event::Event;

/// Deferred field contribution. Runs once, when the entry is written.
pub type Contributor = Box<dyn FnOnce(&mut Event) + Send>;

/// Capability shared by the HTTP and gRPC log entries.
pub trait LogEntry: Send + Sync {
    /// Queues a contributor that adds fields after the fixed ones.
    fn add(&self, f: Contributor);

    /// Finalizes the entry and hands the event to the sink.
    ///
    /// Only the first call emits; later calls do nothing.
    fn write(&self);
}

/// Cloneable handle to the log entry of one request.
#[derive(Clone)]
pub struct EntryHandle(Arc<dyn LogEntry>);

impl EntryHandle {
    pub fn new<E: LogEntry + 'static>(entry: E) -> Self {
        EntryHandle(Arc::new(entry))
    }

    /// Queues `f` to add fields to the event when the request completes.
    pub fn add<F>(&self, f: F)
    where
        F: FnOnce(&mut Event) + Send + 'static,
    {
        self.0.add(Box::new(f));
    }

    pub fn write(&self) {
        self.0.write();
    }
}

impl fmt::Debug for EntryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EntryHandle")
    }
}

/// Appends `f` to `entry`. Without an entry nothing happens.
pub fn add_field<F>(entry: Option<&EntryHandle>, f: F)
where
    F: FnOnce(&mut Event) + Send + 'static,
{
    if let Some(entry) = entry {
        entry.add(f);
    }
}

/// Request-scoped token that carries the current log entry.
///
/// The actix middleware stores it in the request extensions, so handlers
/// receive it as an extractor:
///
/// ```rust
/// use actix_web::HttpResponse;
/// use actix_web_middleware_accesslog::Scope;
///
/// async fn ping(scope: Scope) -> HttpResponse {
///     scope.add(|e| {
///         e.str("cache", "hit");
///     });
///     HttpResponse::Ok().body("pong")
/// }
/// ```
///
/// Without the middleware the scope is empty and `add` does nothing.
#[derive(Clone, Debug, Default)]
pub struct Scope {
    entry: Option<EntryHandle>,
}

impl Scope {
    /// Derives a scope that carries `entry`.
    pub fn attach(&self, entry: EntryHandle) -> Scope {
        Scope { entry: Some(entry) }
    }

    /// Entry attached to this scope, if any.
    pub fn entry(&self) -> Option<&EntryHandle> {
        self.entry.as_ref()
    }

    pub fn add<F>(&self, f: F)
    where
        F: FnOnce(&mut Event) + Send + 'static,
    {
        add_field(self.entry(), f);
    }

    /// Scope stored in the extensions of an actix request.
    pub fn of(req: &HttpRequest) -> Scope {
        req.extensions().get::<Scope>().cloned().unwrap_or_default()
    }

    /// Scope stored in the extensions of a tonic request.
    #[cfg(feature = "grpc")]
    pub fn from_tonic<T>(req: &tonic::Request<T>) -> Scope {
        req.extensions().get::<Scope>().cloned().unwrap_or_default()
    }
}

impl FromRequest for Scope {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(Ok(Scope::of(req)))
    }
}

/// Pending contributors of an entry; `None` once the entry has been written.
pub(crate) struct Extras(Mutex<Option<Vec<Contributor>>>);

impl Extras {
    pub(crate) fn new() -> Self {
        Extras(Mutex::new(Some(Vec::new())))
    }

    pub(crate) fn push(&self, f: Contributor) {
        if let Some(list) = self.lock().as_mut() {
            list.push(f);
        }
    }

    /// Takes the contributors, marking the entry as finalized.
    pub(crate) fn take(&self) -> Option<Vec<Contributor>> {
        self.lock().take()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Vec<Contributor>>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Extras {
    fn default() -> Self {
        Extras::new()
    }
}

/// Moment an entry was created.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Started(OffsetDateTime);

impl Started {
    pub(crate) fn now() -> Self {
        Started(OffsetDateTime::now_utc())
    }

    /// Start time in RFC 3339 with sub-second precision.
    pub(crate) fn time(&self) -> Option<String> {
        self.0.format(&Rfc3339).ok()
    }

    pub(crate) fn elapsed_ms(&self) -> f64 {
        let rt = OffsetDateTime::now_utc() - self.0;
        (rt.whole_nanoseconds() as f64) / 1_000_000.0
    }

    /// Writes `time` and `elapsed(ms)`.
    pub(crate) fn render(&self, e: &mut Event) {
        if let Some(time) = self.time() {
            e.str("time", time);
        }
        e.float("elapsed(ms)", self.elapsed_ms());
    }
}

/// Writes the entry when dropped, whichever way the request ends.
pub struct Finalizer(EntryHandle);

impl Finalizer {
    pub(crate) fn new(entry: EntryHandle) -> Self {
        Finalizer(entry)
    }
}

impl Drop for Finalizer {
    fn drop(&mut self) {
        self.0.write();
    }
}
