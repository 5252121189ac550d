use thiserror::Error;

/// A request that must not start a scan. Raised before any network activity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("port out of range: {0} (expected 1-65535)")]
    PortOutOfRange(u32),

    #[error("invalid port value: {0}")]
    InvalidPort(String),

    #[error("start port {start} is greater than end port {end}")]
    InvertedRange { start: u16, end: u16 },

    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    #[error("unknown preset: {0} (expected common, top100 or full)")]
    UnknownPreset(String),
}

/// The target could not be turned into an address. Fatal for the whole scan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("could not resolve target {target:?}: {cause}")]
pub struct ResolveError {
    pub target: String,
    pub cause: String,
}

impl ResolveError {
    pub fn new(target: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            cause: cause.into(),
        }
    }
}

/// Failures collecting a scan's outcome. Validation and resolution problems are
/// reported through `ValidationError` and the event stream instead.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan worker ended abnormally: {0}")]
    Worker(#[from] tokio::task::JoinError),
}
