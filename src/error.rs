use std::io;
use std::path::PathBuf;

/// Errors raised by sinks. Request handling never sees them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("open access log {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("write access log: {0}")]
    Io(#[from] io::Error),

    #[error("encode access log: {0}")]
    Encode(#[from] serde_json::Error),
}
