//! Integration tests for probing against a scripted HEAD transport.
//!
//! The transport replays a per-URL queue of responses, so each test fixes
//! exactly what the remote host says on every attempt.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tlc_core::{cancel_pair, enumerate, CancelSignal, PartitionKey, Service};
use tlc_probe::{
    probe_all, HeadResponse, HeadTransport, ProbeRunOptions, ProbeSummary, Prober,
    RecordingSleeper, RetryPolicy, TransportError, TransportErrorKind,
};

const BASE: &str = "https://host/trip-data";

type Reply = Result<HeadResponse, TransportError>;

#[derive(Default)]
struct ScriptedTransport {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn script(&self, key: &PartitionKey, replies: Vec<Reply>) {
        let url = tlc_core::source_url(BASE, key);
        self.replies.lock().unwrap().insert(url, replies.into());
    }

    fn calls_for(&self, key: &PartitionKey) -> usize {
        let url = tlc_core::source_url(BASE, key);
        self.calls.lock().unwrap().iter().filter(|u| **u == url).count()
    }
}

#[async_trait]
impl HeadTransport for ScriptedTransport {
    async fn head(&self, url: &str) -> Result<HeadResponse, TransportError> {
        self.calls.lock().unwrap().push(url.to_string());
        let mut replies = self.replies.lock().unwrap();
        // Unscripted URLs exist with a known size.
        match replies.get_mut(url).and_then(|q| q.pop_front()) {
            Some(reply) => reply,
            None => Ok(status(200, Some(1024))),
        }
    }
}

fn status(code: u16, len: Option<u64>) -> HeadResponse {
    HeadResponse {
        status: code,
        content_length: len,
    }
}

fn key(service: Service, year: i32, month: u32) -> PartitionKey {
    PartitionKey::new(service, year, month).unwrap()
}

fn prober(transport: Arc<ScriptedTransport>, sleeper: Arc<RecordingSleeper>) -> Prober {
    let policy = RetryPolicy::new(3, Duration::from_millis(500), Duration::from_millis(250))
        .with_jitter(|_| Duration::ZERO);
    Prober::new(transport, policy, BASE).with_sleeper(sleeper)
}

#[tokio::test]
async fn server_error_then_success_is_available() {
    let transport = Arc::new(ScriptedTransport::default());
    let sleeper = Arc::new(RecordingSleeper::new());
    let k = key(Service::Yellow, 2024, 1);
    transport.script(&k, vec![Ok(status(503, None)), Ok(status(200, Some(50_000_000)))]);

    let record = prober(transport.clone(), sleeper.clone()).probe(&k).await;

    assert!(record.is_available);
    assert_eq!(record.probe_status_code, Some(200));
    assert_eq!(record.content_length, Some(50_000_000));
    assert_eq!(record.note, None);
    assert_eq!(record.source_url, "https://host/trip-data/yellow_tripdata_2024-01.parquet");
    assert_eq!(transport.calls_for(&k), 2);
    assert_eq!(sleeper.slept(), vec![Duration::from_millis(500)]);
}

#[tokio::test]
async fn not_found_is_terminal_without_retry() {
    let transport = Arc::new(ScriptedTransport::default());
    let sleeper = Arc::new(RecordingSleeper::new());
    let k = key(Service::Green, 2025, 11);
    transport.script(&k, vec![Ok(status(404, None))]);

    let record = prober(transport.clone(), sleeper.clone()).probe(&k).await;

    assert!(!record.is_available);
    assert_eq!(record.probe_status_code, Some(404));
    assert_eq!(record.note.as_deref(), Some("missing"));
    assert_eq!(transport.calls_for(&k), 1);
    assert!(sleeper.slept().is_empty());
}

#[tokio::test]
async fn forbidden_is_retried_then_accepted() {
    let transport = Arc::new(ScriptedTransport::default());
    let sleeper = Arc::new(RecordingSleeper::new());
    let k = key(Service::Yellow, 2015, 2);
    transport.script(
        &k,
        vec![Ok(status(403, None)), Ok(status(403, None)), Ok(status(403, None))],
    );

    let record = prober(transport.clone(), sleeper.clone()).probe(&k).await;

    assert!(!record.is_available);
    assert_eq!(record.probe_status_code, Some(403));
    assert_eq!(record.note.as_deref(), Some("forbidden"));
    assert!(!record.is_error());
    assert_eq!(transport.calls_for(&k), 3);
    assert_eq!(
        sleeper.slept(),
        vec![Duration::from_millis(500), Duration::from_millis(1000)]
    );
}

#[tokio::test]
async fn forbidden_twice_then_ok_is_available() {
    let transport = Arc::new(ScriptedTransport::default());
    let sleeper = Arc::new(RecordingSleeper::new());
    let k = key(Service::Green, 2016, 8);
    transport.script(
        &k,
        vec![Ok(status(403, None)), Ok(status(403, None)), Ok(status(200, Some(9_000)))],
    );

    let record = prober(transport.clone(), sleeper.clone()).probe(&k).await;

    assert!(record.is_available);
    assert_eq!(record.probe_status_code, Some(200));
    assert_eq!(record.content_length, Some(9_000));
    assert_eq!(record.note, None);
    assert!(!record.is_error());
    assert_eq!(transport.calls_for(&k), 3);
    assert_eq!(sleeper.slept().len(), 2);
}

#[tokio::test]
async fn exhausted_timeouts_become_error_note() {
    let transport = Arc::new(ScriptedTransport::default());
    let sleeper = Arc::new(RecordingSleeper::new());
    let k = key(Service::Yellow, 2019, 6);
    let timeout = || Err(TransportError::new(TransportErrorKind::Timeout, "read timed out"));
    transport.script(&k, vec![timeout(), timeout(), timeout()]);

    let record = prober(transport.clone(), sleeper).probe(&k).await;

    assert!(!record.is_available);
    assert_eq!(record.probe_status_code, None);
    assert_eq!(record.note.as_deref(), Some("error:timeout"));
    assert!(record.is_error());
    assert_eq!(transport.calls_for(&k), 3);
}

#[tokio::test]
async fn zero_length_is_not_available() {
    let transport = Arc::new(ScriptedTransport::default());
    let k = key(Service::Green, 2020, 4);
    transport.script(&k, vec![Ok(status(200, Some(0)))]);

    let record = prober(transport, Arc::new(RecordingSleeper::new())).probe(&k).await;

    assert!(!record.is_available);
    assert_eq!(record.content_length, Some(0));
    assert_eq!(record.note.as_deref(), Some("empty"));
}

#[tokio::test(start_paused = true)]
async fn probe_all_preserves_key_order() {
    let transport = Arc::new(ScriptedTransport::default());
    let keys = enumerate(&[Service::Yellow, Service::Green], 2024, 2024);
    transport.script(&keys[3], vec![Ok(status(404, None))]);
    transport.script(&keys[20], vec![Ok(status(418, None))]);

    let p = prober(transport, Arc::new(RecordingSleeper::new()));
    let options = ProbeRunOptions {
        concurrency: 4,
        throttle: Duration::from_millis(10),
    };
    let records = probe_all(&p, &keys, &options, &CancelSignal::never()).await;

    let probed: Vec<PartitionKey> = records.iter().map(|r| r.key).collect();
    assert_eq!(probed, keys);
    assert_eq!(
        ProbeSummary::from_records(&records),
        ProbeSummary {
            available: 22,
            unavailable: 2,
            errors: 0
        }
    );
    assert_eq!(records[20].note.as_deref(), Some("unexpected_status_418"));
}

#[tokio::test]
async fn cancelled_run_issues_no_probes() {
    let transport = Arc::new(ScriptedTransport::default());
    let keys = enumerate(&[Service::Yellow], 2023, 2023);
    let (handle, signal) = cancel_pair();
    handle.cancel();

    let p = prober(transport.clone(), Arc::new(RecordingSleeper::new()));
    let records = probe_all(&p, &keys, &ProbeRunOptions::default(), &signal).await;

    assert!(records.is_empty());
    assert!(transport.calls.lock().unwrap().is_empty());
}

/// Always answers 503 and records when each request started.
#[derive(Default)]
struct FlakyHost {
    starts: Mutex<Vec<tokio::time::Instant>>,
}

#[async_trait]
impl HeadTransport for FlakyHost {
    async fn head(&self, _url: &str) -> Result<HeadResponse, TransportError> {
        self.starts.lock().unwrap().push(tokio::time::Instant::now());
        Ok(status(503, None))
    }
}

#[tokio::test(start_paused = true)]
async fn retries_share_the_throttle_with_first_attempts() {
    let host = Arc::new(FlakyHost::default());
    let policy = RetryPolicy::new(3, Duration::from_millis(500), Duration::from_millis(250))
        .with_jitter(|_| Duration::ZERO);
    // Real (paused-clock) sleeps so retries interleave with other workers.
    let p = Prober::new(host.clone(), policy, BASE);
    let keys = enumerate(&[Service::Yellow], 2024, 2024);
    let options = ProbeRunOptions {
        concurrency: 8,
        throttle: Duration::from_millis(200),
    };

    let records = probe_all(&p, &keys[..8], &options, &CancelSignal::never()).await;

    assert_eq!(records.len(), 8);
    assert!(records.iter().all(|r| r.note.as_deref() == Some("error:http_503")));

    let mut starts = host.starts.lock().unwrap().clone();
    assert_eq!(starts.len(), 24);
    starts.sort();
    let min_gap = starts.windows(2).map(|w| w[1] - w[0]).min().unwrap();
    assert!(min_gap >= Duration::from_millis(200), "requests {min_gap:?} apart");
}
