//! Scripted in-memory provider for tests and offline use.

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use crate::{
    error::WeatherError,
    model::{Coordinate, QueryKind, RawPayload},
};

use super::{ProviderLimits, WeatherProvider};

/// Answers each query kind with a scripted outcome and counts fetches.
#[derive(Debug, Default)]
pub struct InMemoryProvider {
    responses: Mutex<HashMap<QueryKind, Result<RawPayload, WeatherError>>>,
    latency: Duration,
    limits: ProviderLimits,
    fetches: AtomicUsize,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, kind: QueryKind, payload: RawPayload) -> Self {
        self.set_response(kind, Ok(payload));
        self
    }

    pub fn with_failure(self, kind: QueryKind, error: WeatherError) -> Self {
        self.set_response(kind, Err(error));
        self
    }

    /// Delay every fetch by `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_limits(mut self, limits: ProviderLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Replace the scripted outcome for `kind`.
    pub fn set_response(&self, kind: QueryKind, outcome: Result<RawPayload, WeatherError>) {
        self.responses.lock().insert(kind, outcome);
    }

    /// Number of fetches started so far, including cancelled ones.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WeatherProvider for InMemoryProvider {
    fn id(&self) -> &'static str {
        "memory"
    }

    fn limits(&self) -> ProviderLimits {
        self.limits
    }

    async fn fetch(
        &self,
        kind: QueryKind,
        coordinate: Coordinate,
        date: Option<NaiveDate>,
    ) -> Result<RawPayload, WeatherError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(%kind, %coordinate, ?date, "in-memory fetch");

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let scripted = self.responses.lock().get(&kind).cloned();
        scripted.unwrap_or_else(|| {
            Err(WeatherError::not_found(kind, format!("no scripted {kind} response")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unscripted_kinds_are_not_found() {
        let provider = InMemoryProvider::new();
        let err = provider
            .fetch(QueryKind::Almanac, Coordinate::new(0.0, 0.0), None)
            .await
            .unwrap_err();
        assert!(matches!(err, WeatherError::NotFound { kind: QueryKind::Almanac, .. }));
        assert_eq!(provider.fetch_count(), 1);
    }

    #[tokio::test]
    async fn scripted_responses_can_be_replaced() {
        let provider = InMemoryProvider::new().with_response(QueryKind::Current, RawPayload::default());
        let coord = Coordinate::new(10.0, 10.0);
        assert!(provider.fetch(QueryKind::Current, coord, None).await.is_ok());

        provider.set_response(QueryKind::Current, Err(WeatherError::ProviderUnavailable("down".into())));
        let err = provider.fetch(QueryKind::Current, coord, None).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(provider.fetch_count(), 2);
    }
}
