//! Position source fed from an mpsc channel.
//!
//! Used by tests and by embedders that already own a positioning stream.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::{mpsc, Mutex};

use crate::error::PositionError;
use crate::ports::{PositionFix, PositionSource, PositionStream};

pub type FixSender = mpsc::Sender<Result<PositionFix, PositionError>>;

pub struct ChannelPositionSource {
    rx: Mutex<Option<mpsc::Receiver<Result<PositionFix, PositionError>>>>,
}

impl ChannelPositionSource {
    pub fn new(capacity: usize) -> (Self, FixSender) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                rx: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

#[async_trait]
impl PositionSource for ChannelPositionSource {
    /// The channel can only be consumed once.
    async fn subscribe(&self) -> Result<PositionStream, PositionError> {
        let rx = self
            .rx
            .lock()
            .await
            .take()
            .ok_or_else(|| PositionError::Unavailable("channel already subscribed".to_string()))?;

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }
}
