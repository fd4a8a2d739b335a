use chrono::NaiveDate;
use thiserror::Error;

use crate::model::QueryKind;

/// Failures surfaced by the weather store and its providers.
///
/// Cloneable so every caller coalesced onto one provider fetch receives the
/// same failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WeatherError {
    #[error("Invalid coordinate ({latitude}, {longitude}): latitude must be within [-90, 90] and longitude within [-180, 180]")]
    InvalidCoordinate { latitude: f64, longitude: f64 },

    #[error("Date {date} is outside the {kind} window ({earliest} .. {latest})")]
    DateOutOfRange {
        kind: QueryKind,
        date: NaiveDate,
        earliest: NaiveDate,
        latest: NaiveDate,
    },

    #[error("No {kind} data available: {detail}")]
    NotFound { kind: QueryKind, detail: String },

    #[error("Weather provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Weather provider rejected the request: {0}")]
    ProviderRejected(String),

    #[error("Weather provider returned invalid data: {0}")]
    InvalidPayload(String),
}

impl WeatherError {
    /// True only for transient failures a backoff layer may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WeatherError::ProviderUnavailable(_))
    }

    pub(crate) fn not_found(kind: QueryKind, detail: impl Into<String>) -> Self {
        WeatherError::NotFound { kind, detail: detail.into() }
    }

    /// Classify a transport-level reqwest failure.
    pub(crate) fn from_transport(kind: QueryKind, context: &str, err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(kind, context, status, &err.to_string());
        }
        if err.is_decode() {
            return WeatherError::InvalidPayload(format!("{context}: {err}"));
        }
        // Timeouts, connection resets and anything else on the wire.
        WeatherError::ProviderUnavailable(format!("{context}: {err}"))
    }

    /// Classify a non-success HTTP status of a `kind` query.
    pub(crate) fn from_status(
        kind: QueryKind,
        context: &str,
        status: reqwest::StatusCode,
        body: &str,
    ) -> Self {
        use reqwest::StatusCode;

        let message = format!("{context} failed with status {status}: {}", truncate_body(body));
        if status.is_server_error()
            || status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
        {
            WeatherError::ProviderUnavailable(message)
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            WeatherError::ProviderRejected(message)
        } else if status == StatusCode::NOT_FOUND {
            WeatherError::NotFound { kind, detail: message }
        } else {
            WeatherError::ProviderRejected(message)
        }
    }
}

pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    } else {
        body.to_string()
    }
}
