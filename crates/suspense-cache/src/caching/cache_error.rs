use std::time::Duration;

use thiserror::Error;

/// An error that happens while producing a cached resource.
///
/// Whatever a producer fails with is captured exactly once, stored in the
/// [`CacheEntry`](super::CacheEntry), and handed out again on every subsequent read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The resource does not exist at the remote source.
    #[error("not found")]
    NotFound,
    /// The resource could not be fetched due to missing permissions.
    ///
    /// The attached string contains the remote source's response.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The resource could not be fetched due to a timeout.
    #[error("download timed out after {0:?}")]
    Timeout(Duration),
    /// The resource could not be fetched due to another problem,
    /// like connection loss, DNS resolution, or a 5xx server response.
    ///
    /// The attached string contains the remote source's response.
    #[error("download failed: {0}")]
    DownloadError(String),
    /// The resource was fetched successfully, but is invalid in some way.
    #[error("malformed: {0}")]
    Malformed(String),
    /// The production failed unexpectedly, for example because it panicked or its runtime shut
    /// down before it finished.
    #[error("internal error")]
    InternalError,
}

impl CacheError {
    /// A short, stable name of the error variant, used to tag metrics.
    pub fn metrics_tag(&self) -> &'static str {
        match self {
            CacheError::NotFound => "notfound",
            CacheError::PermissionDenied(_) => "permissiondenied",
            CacheError::Timeout(_) => "timeout",
            CacheError::DownloadError(_) => "downloaderror",
            CacheError::Malformed(_) => "malformed",
            CacheError::InternalError => "internalerror",
        }
    }
}

/// The outcome of a production, either `Ok(T)` or an error denoting the reason why the
/// resource could not be produced.
pub type CacheContents<T = ()> = Result<T, CacheError>;
