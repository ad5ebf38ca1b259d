//! Change feed served by a peer instance's `/v1/feed` WebSocket.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Url;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::error::HazardError;
use crate::ports::{ChangeEvent, ChangeFeed, ChangeKind, ChangeStream};

const SERVICE: &str = "peer change feed";

pub struct WsChangeFeed {
    base_url: String,
}

impl WsChangeFeed {
    /// `base_url` is the peer's HTTP(S) or WS(S) origin.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    fn feed_url(&self, table: &str) -> Result<Url, HazardError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| HazardError::upstream(SERVICE, e))?;
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => other,
        }
        .to_string();
        url.set_scheme(&scheme)
            .map_err(|_| HazardError::upstream(SERVICE, "invalid base URL scheme"))?;
        url.set_path("/v1/feed");
        url.query_pairs_mut().append_pair("table", table);
        Ok(url)
    }
}

#[async_trait]
impl ChangeFeed for WsChangeFeed {
    async fn subscribe(&self, table: &str, kinds: &[ChangeKind]) -> Result<ChangeStream, HazardError> {
        let url = self.feed_url(table)?;
        let (socket, _) = connect_async(url.as_str())
            .await
            .map_err(|e| HazardError::upstream(SERVICE, e))?;
        tracing::info!("Subscribed to peer change feed at {}", url);

        let table = table.to_string();
        let kinds = kinds.to_vec();
        let events = socket
            .take_while(|msg| {
                let open = !matches!(msg, Ok(Message::Close(_)) | Err(_));
                if let Err(err) = msg {
                    tracing::warn!("Peer change feed closed: {}", err);
                }
                futures::future::ready(open)
            })
            .filter_map(move |msg| {
                let event = match msg {
                    Ok(Message::Text(text)) => decode(&text),
                    Ok(Message::Binary(data)) => String::from_utf8(data).ok().and_then(|t| decode(&t)),
                    _ => None,
                };
                let keep = event.filter(|e| e.table == table && kinds.contains(&e.kind));
                futures::future::ready(keep)
            });

        Ok(events.boxed())
    }
}

fn decode(text: &str) -> Option<ChangeEvent> {
    match serde_json::from_str(text) {
        Ok(event) => Some(event),
        Err(err) => {
            tracing::debug!("Ignoring undecodable feed message: {}", err);
            None
        }
    }
}
