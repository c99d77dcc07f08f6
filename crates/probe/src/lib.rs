//! Availability prober: metadata-only existence checks against the remote
//! trip-data host, with bounded retries, throttling and a small worker pool.

pub mod prober;
pub mod retry;
pub mod runner;
pub mod throttle;
pub mod transport;

pub use prober::{ProbeOutcome, Prober};
pub use retry::{RecordingSleeper, RetryPolicy, Sleeper, TokioSleeper};
pub use runner::{probe_all, ProbeRunOptions, ProbeSummary};
pub use throttle::Throttle;
pub use transport::{HeadResponse, HeadTransport, ReqwestTransport, TransportError, TransportErrorKind};
