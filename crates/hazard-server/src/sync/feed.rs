//! In-process change feed.
//!
//! The SQLite store publishes here after every committed write. Slow
//! subscribers that fall behind receive a resync hint instead of the
//! events they missed.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::error::HazardError;
use crate::ports::{ChangeEvent, ChangeFeed, ChangeKind, ChangeStream};

const FEED_CAPACITY: usize = 1024;

pub struct LocalChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl Default for LocalChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalChangeFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        Self { tx }
    }

    /// Returns the number of subscribers that will see the event.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl ChangeFeed for LocalChangeFeed {
    async fn subscribe(&self, table: &str, kinds: &[ChangeKind]) -> Result<ChangeStream, HazardError> {
        let rx = self.tx.subscribe();
        let state = (rx, table.to_string(), kinds.to_vec());

        let events = stream::unfold(state, |(mut rx, table, kinds)| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if event.table == table && kinds.contains(&event.kind) {
                            return Some((event, (rx, table, kinds)));
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Change feed subscriber lagged by {} events; resyncing", skipped);
                        let hint = ChangeEvent::resync(&table);
                        return Some((hint, (rx, table, kinds)));
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });

        Ok(events.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(table: &str, kind: ChangeKind, id: &str) -> ChangeEvent {
        ChangeEvent {
            table: table.to_string(),
            kind,
            entity_id: Some(id.to_string()),
            record: None,
        }
    }

    #[tokio::test]
    async fn subscription_filters_table_and_kind() {
        let feed = LocalChangeFeed::new();
        let mut events = feed
            .subscribe("presence", &[ChangeKind::Delete])
            .await
            .unwrap();

        feed.publish(event("reports", ChangeKind::Delete, "r"));
        feed.publish(event("presence", ChangeKind::Insert, "a"));
        feed.publish(event("presence", ChangeKind::Delete, "b"));

        let received = events.next().await.unwrap();
        assert_eq!(received.entity_id.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn dropping_the_stream_unsubscribes() {
        let feed = LocalChangeFeed::new();
        let events = feed.subscribe("presence", &ChangeKind::ALL).await.unwrap();
        assert_eq!(feed.subscriber_count(), 1);
        drop(events);
        assert_eq!(feed.subscriber_count(), 0);
        assert_eq!(feed.publish(event("presence", ChangeKind::Insert, "a")), 0);
    }
}
