use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use url::Url;

use super::{Link, Transport};
use crate::error::{Result, SyncError};

/// Websocket transport: one reader and one writer task per connection,
/// bridged to the channel client through unbounded queues.
#[derive(Clone)]
pub struct WsTransport {
    url: Url,
}

impl WsTransport {
    pub fn new(url: Url) -> Self {
        Self { url }
    }
}

impl Transport for WsTransport {
    async fn open(&self, token: &str) -> Result<Link> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| SyncError::Channel(e.to_string()))?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| SyncError::Channel(e.to_string()))?;
        request.headers_mut().insert("Authorization", auth);

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| SyncError::Channel(e.to_string()))?;
        log::debug!("websocket connected to {}", self.url);

        let (mut write, mut read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = write.send(WsMessage::Text(text)).await {
                    log::warn!("websocket write failed: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        if in_tx.send(text).is_err() {
                            break;
                        }
                    }
                    Ok(WsMessage::Close(frame)) => {
                        log::info!("websocket closed by server: {:?}", frame);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::warn!("websocket read failed: {}", e);
                        break;
                    }
                }
            }
            // dropping in_tx tells the channel client the link is gone
        });

        Ok(Link {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}
