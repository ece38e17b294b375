use thiserror::Error;

/// Failures of a single forecast refresh.
///
/// Only `Resolution` and `Transport` are reported; `Cancelled` marks a refresh
/// that was superseded by a newer query and is dropped silently.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForecastError {
    /// Geocoding returned no candidates.
    #[error("Location not found: {query}")]
    Resolution { query: String },

    /// Network failure, non-2xx status or malformed body from either remote call.
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Refresh was superseded by a newer query")]
    Cancelled,
}

impl ForecastError {
    pub fn resolution<S: Into<String>>(query: S) -> Self {
        Self::Resolution { query: query.into() }
    }

    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport { message: message.into() }
    }

    /// Whether this error should reach the log / `last_error`.
    pub fn is_reportable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}
