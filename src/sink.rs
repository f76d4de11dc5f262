//! Destinations for finished access log events.

use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::Error;
use crate::event::{Event, Value};

/// Accepts finished events. Failures are reported, never retried.
pub trait Sink: Send + Sync {
    fn write(&self, event: &Event) -> Result<(), Error>;
}

impl<S: Sink + ?Sized> Sink for Arc<S> {
    fn write(&self, event: &Event) -> Result<(), Error> {
        (**self).write(event)
    }
}

/// Emits events as `log` records with key-values.
///
/// Pair it with a structured `log` backend such as `structured-logger`:
///
/// ```rust
/// use actix_web_middleware_accesslog::LogSink;
///
/// let sink = LogSink::default()
///     .target("access")
///     .level(log::Level::Info);
/// ```
#[derive(Debug, Clone)]
pub struct LogSink {
    level: log::Level,
    target: Cow<'static, str>,
}

impl LogSink {
    pub fn new() -> Self {
        LogSink {
            level: log::Level::Info,
            target: Cow::Borrowed(module_path!()),
        }
    }

    /// Sets the level of emitted records. Defaults to `Info`.
    pub fn level(mut self, level: log::Level) -> Self {
        self.level = level;
        self
    }

    /// Sets the logging target to `target`.
    ///
    /// By default, the target is `actix_web_middleware_accesslog::sink`.
    pub fn target(mut self, target: impl Into<Cow<'static, str>>) -> Self {
        self.target = target.into();
        self
    }
}

impl Default for LogSink {
    fn default() -> Self {
        LogSink::new()
    }
}

impl Sink for LogSink {
    fn write(&self, event: &Event) -> Result<(), Error> {
        if self.level > log::max_level() {
            return Ok(());
        }

        let kvs: Vec<(&str, &Value)> = event
            .fields()
            .iter()
            .map(|(k, v)| (k.as_str(), v))
            .collect();
        let kvs = kvs.as_slice();

        let mut builder = log::Record::builder();

        builder
            .args(format_args!("access log"))
            .level(self.level)
            .target(self.target.as_ref())
            .module_path_static(Some(module_path!()))
            .file_static(Some(file!()))
            .line(Some(line!()))
            .key_values(&kvs);

        log::logger().log(&builder.build());
        Ok(())
    }
}

/// Writes one JSON object per line.
pub struct JsonWriter<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonWriter<W> {
    pub fn new(out: W) -> Self {
        JsonWriter {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl JsonWriter<io::Stdout> {
    pub fn stdout() -> Self {
        JsonWriter::new(io::stdout())
    }
}

impl JsonWriter<LineWriter<File>> {
    /// Appends to the file at `path`, creating it if needed.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| Error::Open {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(JsonWriter::new(LineWriter::new(file)))
    }
}

impl<W: Write + Send> Sink for JsonWriter<W> {
    fn write(&self, event: &Event) -> Result<(), Error> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        out.write_all(&line)?;
        out.flush()?;
        Ok(())
    }
}
