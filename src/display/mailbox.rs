//! Label results handed from the pipeline worker to the display layer.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::trace;

use crate::inference::RankedResult;

/// Receives one ranked result per classified frame. Called from the pipeline
/// worker thread; implementations do their own thread hop.
pub trait ResultSink: Send + Sync {
    fn publish(&self, result: RankedResult);
}

/// Single-slot, latest-value-wins mailbox.
///
/// Publishing never blocks and overwrites any value the display has not read
/// yet, so the display renders at its own cadence.
#[derive(Debug, Clone)]
pub struct LabelMailbox {
    tx: Arc<watch::Sender<Option<Arc<RankedResult>>>>,
}

impl Default for LabelMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl LabelMailbox {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<RankedResult>>> {
        self.tx.subscribe()
    }

    /// Most recent result, if any.
    pub fn latest(&self) -> Option<Arc<RankedResult>> {
        self.tx.borrow().clone()
    }
}

impl ResultSink for LabelMailbox {
    fn publish(&self, result: RankedResult) {
        trace!("Publishing labels for frame {}", result.sequence);
        self.tx.send_replace(Some(Arc::new(result)));
    }
}

/// Text shown for a result: the best label prefixed by its percentage,
/// e.g. `"87.3% cereal"`.
pub fn headline(result: &RankedResult) -> Option<String> {
    result
        .top()
        .map(|best| format!("{} {}", best.probability_string(), best.label()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::Detection;

    fn result(sequence: u64, label: &str, score: f32) -> RankedResult {
        RankedResult {
            sequence,
            items: vec![Detection::new(label, score)],
        }
    }

    #[test]
    fn headline_shows_best_entry() {
        assert_eq!(
            headline(&result(1, "cereal", 0.873)).as_deref(),
            Some("87.3% cereal")
        );
        assert_eq!(headline(&RankedResult::default()), None);
    }

    #[tokio::test]
    async fn keeps_only_latest_value() {
        let mailbox = LabelMailbox::new();
        let mut rx = mailbox.subscribe();
        mailbox.publish(result(1, "a", 0.5));
        mailbox.publish(result(2, "b", 0.5));

        rx.changed().await.unwrap();
        let seen = rx.borrow_and_update().clone().unwrap();
        assert_eq!(seen.sequence, 2);
        assert!(!rx.has_changed().unwrap());
        assert_eq!(mailbox.latest().map(|r| r.sequence), Some(2));
    }

    #[test]
    fn publishing_without_subscribers_is_retained() {
        let mailbox = LabelMailbox::new();
        mailbox.publish(result(3, "c", 0.1));
        assert_eq!(mailbox.latest().map(|r| r.sequence), Some(3));
    }
}
