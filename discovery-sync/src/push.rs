//! Batched push of a diff onto the event stream.
//!
//! A cycle goes out as:
//! ```text
//! Upsert(≤500) … Upsert(≤500)  Delete(≤500) … Delete(≤500)  Sync
//! ```
//! The sync marker is always sent, even for an empty diff, so the remote
//! side sees every cycle complete. A failed send stops the push; whatever
//! went out stays out and the next connection's full resync repairs it.

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::reconcile::Diff;
use crate::resource::Resource;

/// Maximum number of resources in one upsert or delete message.
pub const BATCH_SIZE: usize = 500;

/// One message on the event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Upsert(Vec<Resource>),
    Delete(Vec<Resource>),
    /// End of the current cycle's diff.
    Sync,
}

#[derive(Debug, Error)]
pub enum PushError {
    /// The stream is gone; the connection has to be re-established.
    #[error("event stream closed")]
    StreamClosed,

    #[error("push cancelled")]
    Cancelled,
}

/// Write side of the event stream.
#[async_trait]
pub trait EventSink: Send {
    /// Send one event. May wait for transport backpressure.
    async fn send(&mut self, event: SyncEvent) -> Result<(), PushError>;
}

/// Counts of what a push sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushSummary {
    pub upsert_batches: usize,
    pub delete_batches: usize,
}

/// Send `diff` as upsert batches, then delete batches, then one sync marker.
pub async fn push<S>(sink: &mut S, diff: &Diff) -> Result<PushSummary, PushError>
where
    S: EventSink + ?Sized,
{
    let mut summary = PushSummary::default();

    for chunk in diff.upsert.chunks(BATCH_SIZE) {
        sink.send(SyncEvent::Upsert(chunk.to_vec())).await?;
        summary.upsert_batches += 1;
    }

    for chunk in diff.delete.chunks(BATCH_SIZE) {
        sink.send(SyncEvent::Delete(chunk.to_vec())).await?;
        summary.delete_batches += 1;
    }

    sink.send(SyncEvent::Sync).await?;

    debug!(
        upserts = diff.upsert.len(),
        deletes = diff.delete.len(),
        upsert_batches = summary.upsert_batches,
        delete_batches = summary.delete_batches,
        "Pushed diff"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records every event; fails once `fail_after` sends have succeeded.
    #[derive(Default)]
    struct Recorder {
        events: Vec<SyncEvent>,
        fail_after: Option<usize>,
    }

    #[async_trait]
    impl EventSink for Recorder {
        async fn send(&mut self, event: SyncEvent) -> Result<(), PushError> {
            if self.fail_after == Some(self.events.len()) {
                return Err(PushError::StreamClosed);
            }
            self.events.push(event);
            Ok(())
        }
    }

    fn resources(kind: &str, n: usize) -> Vec<Resource> {
        (0..n).map(|i| Resource::new(kind, format!("{kind}-{i}"))).collect()
    }

    /// Compact view of a recorded stream, e.g. `["U500", "D3", "S"]`.
    fn shape(events: &[SyncEvent]) -> Vec<String> {
        events
            .iter()
            .map(|e| match e {
                SyncEvent::Upsert(r) => format!("U{}", r.len()),
                SyncEvent::Delete(r) => format!("D{}", r.len()),
                SyncEvent::Sync => "S".to_string(),
            })
            .collect()
    }

    #[tokio::test]
    async fn upserts_are_split_into_batches() {
        let diff = Diff {
            upsert: resources("user", 1200),
            delete: vec![],
        };
        let mut sink = Recorder::default();

        let summary = push(&mut sink, &diff).await.unwrap();

        assert_eq!(shape(&sink.events), vec!["U500", "U500", "U200", "S"]);
        assert_eq!(
            summary,
            PushSummary {
                upsert_batches: 3,
                delete_batches: 0
            }
        );
    }

    #[tokio::test]
    async fn upserts_then_deletes_then_sync() {
        let diff = Diff {
            upsert: resources("user", 501),
            delete: resources("role", 1000),
        };
        let mut sink = Recorder::default();

        push(&mut sink, &diff).await.unwrap();

        assert_eq!(shape(&sink.events), vec!["U500", "U1", "D500", "D500", "S"]);
    }

    #[tokio::test]
    async fn batches_preserve_every_resource_once() {
        let diff = Diff {
            upsert: resources("user", 1234),
            delete: resources("role", 17),
        };
        let mut sink = Recorder::default();
        push(&mut sink, &diff).await.unwrap();

        let mut sent_upserts = Vec::new();
        let mut sent_deletes = Vec::new();
        for event in sink.events {
            match event {
                SyncEvent::Upsert(r) => sent_upserts.extend(r),
                SyncEvent::Delete(r) => sent_deletes.extend(r),
                SyncEvent::Sync => {}
            }
        }
        assert_eq!(sent_upserts, diff.upsert);
        assert_eq!(sent_deletes, diff.delete);
    }

    #[tokio::test]
    async fn empty_diff_still_sends_sync() {
        let mut sink = Recorder::default();
        let summary = push(&mut sink, &Diff::default()).await.unwrap();

        assert_eq!(sink.events, vec![SyncEvent::Sync]);
        assert_eq!(summary, PushSummary::default());
    }

    #[tokio::test]
    async fn send_failure_aborts_remaining_batches() {
        let diff = Diff {
            upsert: resources("user", 1200),
            delete: resources("role", 10),
        };
        let mut sink = Recorder {
            fail_after: Some(2),
            ..Default::default()
        };

        let err = push(&mut sink, &diff).await.unwrap_err();

        assert!(matches!(err, PushError::StreamClosed));
        // Nothing after the failed send, in particular no sync marker.
        assert_eq!(shape(&sink.events), vec!["U500", "U500"]);
    }

    #[tokio::test]
    async fn failure_on_sync_marker_is_reported() {
        let mut sink = Recorder {
            fail_after: Some(0),
            ..Default::default()
        };
        assert!(push(&mut sink, &Diff::default()).await.is_err());
        assert!(sink.events.is_empty());
    }
}
