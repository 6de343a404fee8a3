//! Bounded-concurrency polling of all registered collectors.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::{Collector, CollectorError};
use crate::resource::ResourceSet;

/// Maximum number of collector polls in flight at once.
pub const MAX_CONCURRENT_POLLS: usize = 3;

/// Outcome of polling one collector.
#[derive(Debug)]
pub struct PollResult {
    pub collector: String,
    pub outcome: Result<ResourceSet, CollectorError>,
}

/// All failures of one polling round.
#[derive(Debug, Error)]
#[error("{} collector(s) failed: {}", .failures.len(), Summary(.failures))]
pub struct PollErrors {
    pub failures: Vec<(String, CollectorError)>,
}

struct Summary<'a>(&'a [(String, CollectorError)]);

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (collector, err)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{collector}: {err}")?;
        }
        Ok(())
    }
}

/// One entry per polled collector, in the order the collectors were given.
#[derive(Debug, Default)]
pub struct PollReport {
    pub results: Vec<PollResult>,
}

impl PollReport {
    /// Split into the successful sets (still in collector order) and the
    /// aggregate of all failures, if any.
    pub fn into_parts(self) -> (Vec<ResourceSet>, Option<PollErrors>) {
        let mut sets = Vec::with_capacity(self.results.len());
        let mut failures = Vec::new();
        for result in self.results {
            match result.outcome {
                Ok(set) => sets.push(set),
                Err(e) => failures.push((result.collector, e)),
            }
        }
        let errors = (!failures.is_empty()).then_some(PollErrors { failures });
        (sets, errors)
    }
}

/// Poll every collector once, at most [`MAX_CONCURRENT_POLLS`] at a time.
///
/// Each poll runs in its own task, so a slow or failing collector never holds
/// up the others beyond its own permit. The tasks belong to this call:
/// dropping the returned future aborts every poll still running. Returns
/// exactly one result per collector, ordered like `collectors` rather than by
/// completion.
pub async fn poll_all(collectors: &[Arc<dyn Collector>], cancel: &CancellationToken) -> PollReport {
    let total = collectors.len();
    let gate = Arc::new(Semaphore::new(MAX_CONCURRENT_POLLS));
    let mut tasks = JoinSet::new();
    let mut positions = HashMap::with_capacity(total);

    for (index, collector) in collectors.iter().enumerate() {
        let collector = Arc::clone(collector);
        let gate = Arc::clone(&gate);
        let cancel = cancel.clone();

        let task = tasks.spawn(async move {
            let Ok(_permit) = gate.acquire_owned().await else {
                return Err(CollectorError::Aborted);
            };
            debug!(collector = %collector.name(), "Polling collector");
            collector.poll(&cancel).await
        });
        positions.insert(task.id(), index);
    }

    let mut slots: Vec<Option<Result<ResourceSet, CollectorError>>> =
        (0..total).map(|_| None).collect();
    while let Some(joined) = tasks.join_next_with_id().await {
        let (id, outcome) = match joined {
            Ok((id, outcome)) => (id, outcome),
            Err(e) => {
                error!(error = %e, "Collector poll task failed");
                (e.id(), Err(CollectorError::Aborted))
            }
        };
        if let Some(&index) = positions.get(&id) {
            slots[index] = Some(outcome);
        }
    }

    let results = slots
        .into_iter()
        .zip(collectors)
        .map(|(outcome, collector)| {
            let outcome = outcome.unwrap_or(Err(CollectorError::Aborted));
            if let Err(e) = &outcome {
                // Failures are reported together by the caller.
                debug!(collector = %collector.name(), error = %e, "Collector poll failed");
            }
            PollResult {
                collector: collector.name().to_string(),
                outcome,
            }
        })
        .collect();

    PollReport { results }
}
