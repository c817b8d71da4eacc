use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Wiring,
    Hook,
    Registry,
    Store,
    Monitor,
    Ingest,
    Rollup,
    Runtime,
}

impl ErrorKind {
    /// Stable label used as the error-histogram bucket at registry close.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Wiring => "wiring",
            ErrorKind::Hook => "hook",
            ErrorKind::Registry => "registry",
            ErrorKind::Store => "store",
            ErrorKind::Monitor => "monitor",
            ErrorKind::Ingest => "ingest",
            ErrorKind::Rollup => "rollup",
            ErrorKind::Runtime => "runtime",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

pub struct ErrorInner {
    pub kind: ErrorKind,
    pub source: Option<BoxError>,
    pub message: Option<String>,
}

pub struct Error {
    pub inner: Box<ErrorInner>,
}

impl Error {
    pub fn new<E>(kind: ErrorKind, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(ErrorInner {
                kind,
                source: source.map(Into::into),
                message: None,
            }),
        }
    }

    pub fn with_message<E>(kind: ErrorKind, message: String, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(ErrorInner {
                kind,
                source: source.map(Into::into),
                message: Some(message),
            }),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Error {
        Error::with_message(ErrorKind::Runtime, message.into(), None::<BoxError>)
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.inner.kind
    }

    /// Histogram bucket for this error. Mirrors the close-time bookkeeping:
    /// a known kind maps to its label, anything unclassifiable is `uncoded`.
    pub fn code(&self) -> &'static str {
        self.inner.kind.code()
    }

    pub fn is_config(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Config)
    }

    pub fn is_wiring(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Wiring)
    }

    pub fn is_hook(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Hook)
    }

    pub fn is_registry(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Registry)
    }

    pub fn is_store(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Store)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_struct("lattice::Error");
        f.field("kind", &self.inner.kind);
        if let Some(ref message) = self.inner.message {
            f.field("message", message);
        }
        if let Some(ref source) = self.inner.source {
            f.field("source", source);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref message) = self.inner.message {
            write!(f, "{} error: {}", self.inner.kind, message)?;
        } else {
            write!(f, "{} error", self.inner.kind)?;
        }

        if let Some(ref source) = self.inner.source {
            write!(f, ": {source}")?;
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .source
            .as_ref()
            .map(|e| &**e as &(dyn StdError + 'static))
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::new(ErrorKind::Config, Some(err))
    }
}

impl From<WiringError> for Error {
    fn from(err: WiringError) -> Self {
        Error::new(ErrorKind::Wiring, Some(err))
    }
}

impl From<HookError> for Error {
    fn from(err: HookError) -> Self {
        Error::new(ErrorKind::Hook, Some(err))
    }
}

impl From<RegistryError> for Error {
    fn from(err: RegistryError) -> Self {
        Error::new(ErrorKind::Registry, Some(err))
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Error::new(ErrorKind::Store, Some(err))
    }
}

impl From<IngestError> for Error {
    fn from(err: IngestError) -> Self {
        Error::new(ErrorKind::Ingest, Some(err))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[source] BoxError),
    #[error("failed to parse config file: {0}")]
    Parse(#[source] BoxError),
    #[error("unit spec declares no name")]
    MissingUnitName,
    #[error("duplicate unit name: {0}")]
    DuplicateUnitName(String),
    #[error("loop delay must be a non-negative integer string, got '{0}'")]
    InvalidLoopDelay(String),
}

#[derive(Debug, Error)]
pub enum WiringError {
    #[error("unit '{unit}' peer alias '{alias}' references unknown unit '{target}'")]
    UnknownPeer {
        unit: String,
        alias: String,
        target: String,
    },
    #[error("unit '{unit}' peer alias '{alias}' references '{target}' constructed later in the launch list")]
    ForwardReference {
        unit: String,
        alias: String,
        target: String,
    },
}

#[derive(Debug, Error)]
pub enum HookError {
    #[error("{hook} hook of unit '{unit}' failed: {source}")]
    Failed {
        unit: String,
        hook: &'static str,
        #[source]
        source: BoxError,
    },
    #[error("injected fault: {0}")]
    FaultInjected(String),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry write failed: {0}")]
    WriteFailed(#[source] BoxError),
    #[error("registry read failed: {0}")]
    ReadFailed(#[source] BoxError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection pool unavailable: {0}")]
    Pool(String),
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
    #[error("malformed stream entry: {0}")]
    MalformedEntry(String),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("stream entry id '{0}' carries no parsable timestamp")]
    BadEntryId(String),
    #[error("stream entry '{0}' is missing field '{1}'")]
    MissingField(String, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::from(ConfigError::MissingUnitName);
        assert_eq!(err.to_string(), "config error: unit spec declares no name");
        assert!(err.is_config());
    }

    #[test]
    fn test_error_code_buckets() {
        assert_eq!(Error::from(ConfigError::MissingUnitName).code(), "config");
        assert_eq!(
            Error::from(HookError::FaultInjected("loop:service:x".into())).code(),
            "hook"
        );
        assert_eq!(Error::runtime("runners resolved").code(), "runtime");
    }

    #[test]
    fn test_error_source_chain() {
        let io_err = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        let err = Error::from(StoreError::Pool(io_err.to_string()));
        assert!(err.is_store());
        assert!(err.source().is_some());
    }
}
