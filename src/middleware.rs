use std::{
    future::Future,
    marker::PhantomData,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures_core::ready;
use pin_project_lite::pin_project;

use actix_service::{Service, Transform};
use actix_utils::future::{Ready, ready};
use actix_web::HttpMessage;
use actix_web::body::{BodySize, MessageBody};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::{Error, Result};

use crate::config::HttpConfig;
use crate::entry::{Finalizer, Scope};
use crate::http::{HttpLogger, HttpRequestInfo, ResponseStatus};

/// Middleware writing one structured access log event per request.
///
/// Each request gets a log entry that handlers reach through the [`Scope`]
/// extractor. The event is written once the response body has been sent,
/// or when the request ends in any other way.
///
/// # Examples
/// ```rust
/// use actix_web::App;
/// use actix_web_middleware_accesslog::{AccessLog, HttpConfig};
///
/// let app = App::new().wrap(AccessLog::with_config(
///     HttpConfig::builder()
///         .with_headers(["x-request-id:rid"])
///         .with_ignored_paths("GET", ["/health"])
///         .with_client_ip()
///         .build(),
/// ));
/// ```
pub struct AccessLog(Rc<HttpLogger>);

impl AccessLog {
    /// Create `AccessLog` middleware around `logger`.
    pub fn new(logger: HttpLogger) -> AccessLog {
        AccessLog(Rc::new(logger))
    }

    /// Create `AccessLog` middleware logging through `log` with `cfg`.
    pub fn with_config(cfg: HttpConfig) -> AccessLog {
        AccessLog::new(HttpLogger::with_config(cfg))
    }
}

impl Default for AccessLog {
    fn default() -> Self {
        AccessLog::new(HttpLogger::default())
    }
}

impl<S, B> Transform<S, ServiceRequest> for AccessLog
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    B: MessageBody,
{
    type Response = ServiceResponse<StreamLog<B>>;
    type Error = Error;
    type Transform = AccessLogMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AccessLogMiddlewareService {
            service,
            logger: Rc::clone(&self.0),
        }))
    }
}

pin_project! {
    /// Response body that writes the access log once it is dropped.
    pub struct StreamLog<B> {
        #[pin]
        body: B,
        finalizer: Option<Finalizer>,
    }
}

impl<B: MessageBody> MessageBody for StreamLog<B> {
    type Error = B::Error;

    #[inline]
    fn size(&self) -> BodySize {
        self.body.size()
    }

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Bytes, Self::Error>>> {
        self.project().body.poll_next(cx)
    }
}

/// Access log middleware service.
pub struct AccessLogMiddlewareService<S> {
    logger: Rc<HttpLogger>,
    service: S,
}

impl<S, B> Service<ServiceRequest> for AccessLogMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    B: MessageBody,
{
    type Response = ServiceResponse<StreamLog<B>>;
    type Error = Error;
    type Future = AccessLogResponse<S, B>;

    actix_service::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let status = ResponseStatus::default();
        let entry = self
            .logger
            .new_log_entry(HttpRequestInfo::from(req.request()), status.clone());

        req.extensions_mut()
            .insert(Scope::default().attach(entry.clone()));

        AccessLogResponse {
            fut: self.service.call(req),
            status,
            finalizer: Some(Finalizer::new(entry)),
            _phantom: PhantomData,
        }
    }
}

pin_project! {
    pub struct AccessLogResponse<S, B>
    where
        B: MessageBody,
        S: Service<ServiceRequest>,
    {
        #[pin]
        fut: S::Future,
        status: ResponseStatus,
        finalizer: Option<Finalizer>,
        _phantom: PhantomData<B>,
    }
}

impl<S, B> Future for AccessLogResponse<S, B>
where
    B: MessageBody,
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
{
    type Output = Result<ServiceResponse<StreamLog<B>>, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        let res = match ready!(this.fut.poll(cx)) {
            Ok(res) => res,
            Err(err) => {
                this.status
                    .set(err.as_response_error().status_code());
                // dropping the finalizer writes the entry
                drop(this.finalizer.take());
                return Poll::Ready(Err(err));
            }
        };

        if let Some(error) = res.response().error() {
            log::debug!("Error in response: {:?}", error);
        }

        this.status.set(res.status());
        let finalizer = this.finalizer.take();

        Poll::Ready(Ok(res.map_body(move |_, body| StreamLog { body, finalizer })))
    }
}
