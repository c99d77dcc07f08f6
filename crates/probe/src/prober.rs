use std::sync::Arc;

use tlc_core::{now_seconds, source_url, Config, CoverageRecord, PartitionKey};
use tracing::{debug, warn};

use crate::retry::{RetryPolicy, Sleeper, TokioSleeper};
use crate::throttle::Throttle;
use crate::transport::{HeadResponse, HeadTransport, ReqwestTransport, TransportError, TransportErrorKind};

/// Classified result of one HEAD attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// 200 with a positive or unknown content length.
    Available { content_length: Option<u64> },
    /// 200 with an explicit zero content length.
    Empty,
    Missing,
    /// 403; may be rate limiting, so it is retried before being accepted.
    Forbidden,
    ServerError(u16),
    Unexpected(u16),
    Transport(TransportErrorKind),
}

impl ProbeOutcome {
    pub fn classify(result: &Result<HeadResponse, TransportError>) -> Self {
        match result {
            Ok(resp) => match resp.status {
                200 => match resp.content_length {
                    Some(0) => ProbeOutcome::Empty,
                    content_length => ProbeOutcome::Available { content_length },
                },
                404 => ProbeOutcome::Missing,
                403 => ProbeOutcome::Forbidden,
                code @ 500..=599 => ProbeOutcome::ServerError(code),
                code => ProbeOutcome::Unexpected(code),
            },
            Err(e) => ProbeOutcome::Transport(e.kind),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProbeOutcome::Forbidden | ProbeOutcome::ServerError(_) | ProbeOutcome::Transport(_)
        )
    }

    pub fn is_available(&self) -> bool {
        matches!(self, ProbeOutcome::Available { .. })
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProbeOutcome::Available { .. } | ProbeOutcome::Empty => Some(200),
            ProbeOutcome::Missing => Some(404),
            ProbeOutcome::Forbidden => Some(403),
            ProbeOutcome::ServerError(code) | ProbeOutcome::Unexpected(code) => Some(*code),
            ProbeOutcome::Transport(_) => None,
        }
    }

    pub fn content_length(&self) -> Option<u64> {
        match self {
            ProbeOutcome::Available { content_length } => *content_length,
            ProbeOutcome::Empty => Some(0),
            _ => None,
        }
    }

    /// Note persisted in the coverage ledger.
    pub fn note(&self) -> Option<String> {
        match self {
            ProbeOutcome::Available { .. } => None,
            ProbeOutcome::Empty => Some("empty".into()),
            ProbeOutcome::Missing => Some("missing".into()),
            ProbeOutcome::Forbidden => Some("forbidden".into()),
            ProbeOutcome::ServerError(code) => Some(format!("error:http_{}", code)),
            ProbeOutcome::Unexpected(code) => Some(format!("unexpected_status_{}", code)),
            ProbeOutcome::Transport(kind) => Some(format!("error:{}", kind)),
        }
    }
}

/// Checks whether a partition's source file exists. Never fails: every
/// outcome, including exhausted retries, becomes a [`CoverageRecord`].
#[derive(Clone)]
pub struct Prober {
    transport: Arc<dyn HeadTransport>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    base_url: String,
}

impl Prober {
    pub fn new(transport: Arc<dyn HeadTransport>, policy: RetryPolicy, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            policy,
            sleeper: Arc::new(TokioSleeper),
            base_url: base_url.into(),
        }
    }

    /// Prober over HTTP with the configured timeouts and retry policy.
    pub fn from_config(config: &Config) -> Result<Self, TransportError> {
        let (connect, read) = config.source.probe_timeouts();
        let transport = ReqwestTransport::new(&config.source.user_agent, connect, read)?;
        Ok(Self::new(
            Arc::new(transport),
            RetryPolicy::from_config(&config.probe),
            config.source.base_url.clone(),
        ))
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn probe(&self, key: &PartitionKey) -> CoverageRecord {
        self.probe_throttled(key, None).await
    }

    /// Like [`probe`](Self::probe), but every attempt, retries included,
    /// claims a slot on `throttle` before its request goes out.
    pub async fn probe_throttled(&self, key: &PartitionKey, throttle: Option<&Throttle>) -> CoverageRecord {
        let url = source_url(&self.base_url, key);
        let label = key.label();
        let max_attempts = self.policy.max_attempts;

        let (outcome, attempts) = {
            let url = url.as_str();
            let label = label.as_str();
            self.policy
                .run(
                    self.sleeper.as_ref(),
                    |attempt| async move {
                        if let Some(throttle) = throttle {
                            throttle.wait().await;
                        }
                        let outcome = ProbeOutcome::classify(&self.transport.head(url).await);
                        if outcome.is_retryable() && attempt < max_attempts {
                            warn!(url, attempt, "[{}] probe retry: {:?}", label, outcome);
                        }
                        outcome
                    },
                    ProbeOutcome::is_retryable,
                )
                .await
        };

        debug!(url = %url, attempts, "[{}] probe outcome: {:?}", label, outcome);

        CoverageRecord {
            key: *key,
            source_url: url,
            is_available: outcome.is_available(),
            probe_status_code: outcome.status_code(),
            content_length: outcome.content_length(),
            checked_at: now_seconds(),
            note: outcome.note(),
        }
    }
}
