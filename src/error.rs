#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// an OS-level failure outside the send path (socket setup, polling)
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// a send failure that is not a would-block condition; ends the owning worker
    #[error("stream {stream}: send failed: {source}")]
    Send { stream: usize, source: std::io::Error },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// the scheduler found itself in a state its own bookkeeping rules out
    #[error("scheduler invariant violated: {0}")]
    Invariant(String),

    #[error("worker {0} panicked")]
    WorkerPanicked(usize),
}

impl Error {
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}

impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => e,
            Error::Send { source, .. } => source,
            _ => std::io::Error::new(std::io::ErrorKind::Other, e),
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Config(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Config(s)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// builds a configuration error from a format string
#[macro_export]
macro_rules! error_gen {
    ($fmt:literal) => {
        $crate::error::Error::from(format!($fmt))
    };
    ($e:expr) => {
        $crate::error::Error::from($e)
    };
    ($fmt:literal, $($arg:tt)+) => {
        $crate::error::Error::from(format!($fmt, $($arg)+))
    };
}

#[test]
fn test_error_gen_produces_config_errors() {
    let e = error_gen!("{} streams cannot be split across {} workers", 10, 3);
    assert!(e.is_config());
    assert_eq!(
        e.to_string(),
        "invalid configuration: 10 streams cannot be split across 3 workers"
    );
}

#[test]
fn test_send_error_converts_back_to_io() {
    let e = Error::Send {
        stream: 4,
        source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
    };
    assert!(!e.is_config());
    assert!(e.to_string().starts_with("stream 4: send failed"));
    let io: std::io::Error = e.into();
    assert_eq!(io.kind(), std::io::ErrorKind::PermissionDenied);
}
