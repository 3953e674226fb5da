//! Optional call timing hooks

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Observer notified around every call
pub trait CallObserver: Send {
    /// A call to `job` is about to be sent
    fn call_started(&mut self, job: &str);

    /// The call to `job` returned, successfully or not
    fn call_finished(&mut self, job: &str, elapsed: Duration);
}

/// Recorder of call durations, grouped by job
///
/// Clones share the same records.
///
/// # Example
///
/// ```
/// use palava_client::instrument::{Benchmarks, CallObserver};
/// use std::time::Duration;
///
/// let bench = Benchmarks::new();
/// let mut observer = bench.clone();
/// observer.call_started("user.load");
/// observer.call_finished("user.load", Duration::from_millis(12));
/// assert_eq!(bench.timings("user.load"), vec![Duration::from_millis(12)]);
/// ```
#[derive(Debug, Default, Clone)]
pub struct Benchmarks {
    records: Arc<Mutex<BTreeMap<String, Vec<Duration>>>>,
}

impl Benchmarks {
    /// Empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded durations of one job, in call order
    #[must_use]
    pub fn timings(&self, job: &str) -> Vec<Duration> {
        self.records.lock().get(job).cloned().unwrap_or_default()
    }

    /// All recorded durations, keyed by job
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Vec<Duration>> {
        self.records.lock().clone()
    }

    /// Total time spent per job
    #[must_use]
    pub fn totals(&self) -> BTreeMap<String, Duration> {
        self.records
            .lock()
            .iter()
            .map(|(job, times)| (job.clone(), times.iter().sum()))
            .collect()
    }
}

impl CallObserver for Benchmarks {
    fn call_started(&mut self, job: &str) {
        self.records.lock().entry(job.to_string()).or_default();
    }

    fn call_finished(&mut self, job: &str, elapsed: Duration) {
        self.records
            .lock()
            .entry(job.to_string())
            .or_default()
            .push(elapsed);
    }
}
