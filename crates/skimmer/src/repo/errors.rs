use thiserror::Error;

use crate::http::HttpError;

/// Errors surfaced by repository operations.
#[derive(Debug, Error)]
pub enum RepoError {
    /// The requested item does not exist in the source.
    #[error("item not found: {id}")]
    NotFound { id: String },

    /// The request is malformed or misconfigured. Never retried.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// The upstream failed in a way that may succeed on retry.
    #[error("transient upstream error: {message}")]
    Transient { message: String },

    /// The upstream was reachable but rejected the request.
    #[error("API error: {message}")]
    Api { message: String },

    /// The sync bridge observed a protocol violation. Never retried.
    #[error("bridge error: {message}")]
    Bridge { message: String },

    /// Deferred construction of a shared resource failed.
    #[error("initialization failed: {message}")]
    Init { message: String },
}

impl RepoError {
    /// Create a not-found error for `id`.
    #[inline]
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create an invalid-request error.
    #[inline]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create a transient upstream error.
    #[inline]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Create an API error.
    #[inline]
    pub fn api(message: impl Into<String>) -> Self {
        Self::Api {
            message: message.into(),
        }
    }

    /// Create a bridge error.
    #[inline]
    pub fn bridge(message: impl Into<String>) -> Self {
        Self::Bridge {
            message: message.into(),
        }
    }

    /// Create an initialization error.
    #[inline]
    pub fn init(message: impl Into<String>) -> Self {
        Self::Init {
            message: message.into(),
        }
    }

    /// Classify a non-success upstream status.
    ///
    /// Rate limiting and server-side failures are transient; client-side
    /// rejections of the request shape are invalid requests. Everything else
    /// maps to a plain API error. A 404 is classified here as an API error
    /// because only the caller knows whether an identifier was being resolved;
    /// connectors map 404 to [`RepoError::NotFound`] at their `get` sites.
    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        let message = format!("HTTP {status}: {}", message.into());
        match status {
            429 => Self::Transient { message },
            s if s >= 500 => Self::Transient { message },
            400 | 422 => Self::InvalidRequest { message },
            _ => Self::Api { message },
        }
    }

    /// Check if this error is worth retrying.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Check if this error means the item does not exist.
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<HttpError> for RepoError {
    fn from(err: HttpError) -> Self {
        Self::Transient {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_classifies_statuses() {
        assert!(RepoError::upstream(429, "slow down").is_transient());
        assert!(RepoError::upstream(500, "boom").is_transient());
        assert!(RepoError::upstream(503, "unavailable").is_transient());
        assert!(matches!(
            RepoError::upstream(400, "bad"),
            RepoError::InvalidRequest { .. }
        ));
        assert!(matches!(
            RepoError::upstream(422, "unprocessable"),
            RepoError::InvalidRequest { .. }
        ));
        assert!(matches!(
            RepoError::upstream(404, "missing"),
            RepoError::Api { .. }
        ));
        assert!(matches!(
            RepoError::upstream(403, "forbidden"),
            RepoError::Api { .. }
        ));
    }

    #[test]
    fn upstream_keeps_status_in_message() {
        let err = RepoError::upstream(502, "bad gateway");
        assert_eq!(err.to_string(), "transient upstream error: HTTP 502: bad gateway");
    }

    #[test]
    fn not_found_carries_the_identifier() {
        let err = RepoError::not_found("PROJ-42");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "item not found: PROJ-42");
    }

    #[test]
    fn transport_failures_are_transient() {
        let err: RepoError = HttpError::Transport("connection reset".to_string()).into();
        assert!(err.is_transient());
    }
}
