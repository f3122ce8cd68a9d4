/// Result alias that carries the custom [`SpatialError`] type.
pub type Result<T> = std::result::Result<T, SpatialError>;

/// Common error type for the core crate.
///
/// The tick path never produces one of these: a stream that is not ready or
/// has nothing salient degrades to "skip this tick" or a null peak. Errors only
/// come out of parameter loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum SpatialError {
    /// A tunable constant is outside the range the engine can work with.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter {
        name: &'static str,
        reason: &'static str,
    },
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Parameter file could not be parsed.
    #[error("malformed parameter file: {0}")]
    Json(#[from] serde_json::Error),
}

impl SpatialError {
    pub(crate) fn invalid(name: &'static str, reason: &'static str) -> Self {
        Self::InvalidParameter { name, reason }
    }
}
