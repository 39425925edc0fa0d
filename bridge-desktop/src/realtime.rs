//! Realtime channel implementation using tokio-tungstenite

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    realtime::{RealtimeChannel, RealtimeConnector},
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{
        client::IntoClientRequest,
        protocol::{Message as WsMessage, WebSocketConfig},
        Error as WsError,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, trace};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket connector for the audience request channel.
#[derive(Debug, Default, Clone)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RealtimeConnector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn RealtimeChannel>> {
        let request = url
            .into_client_request()
            .map_err(|e| BridgeError::OperationFailed(format!("Invalid channel URL: {}", e)))?;

        let (ws, response) =
            connect_async_with_config(request, Some(WebSocketConfig::default()), false)
                .await
                .map_err(map_ws_error)?;

        debug!(status = ?response.status(), "WebSocket connected");
        Ok(Box::new(TungsteniteChannel { ws }))
    }
}

struct TungsteniteChannel {
    ws: WsStream,
}

#[async_trait]
impl RealtimeChannel for TungsteniteChannel {
    async fn next_text(&mut self) -> Option<Result<String>> {
        while let Some(frame) = self.ws.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => return Some(Ok(text.to_string())),
                Ok(WsMessage::Close(frame)) => {
                    debug!(?frame, "RX: Close");
                    return None;
                }
                Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => {
                    // tungstenite answers pings on the next read/flush
                    trace!("RX: Ping/Pong");
                }
                Ok(WsMessage::Binary(data)) => {
                    trace!(len = data.len(), "RX: Binary frame ignored");
                }
                Ok(WsMessage::Frame(_)) => {}
                Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => return None,
                Err(e) => return Some(Err(map_ws_error(e))),
            }
        }
        None
    }

    async fn close(&mut self) -> Result<()> {
        match self.ws.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(map_ws_error(e)),
        }
    }
}

fn map_ws_error(e: WsError) -> BridgeError {
    match e {
        WsError::Io(io) => BridgeError::Network(io.to_string()),
        WsError::Http(response) => BridgeError::OperationFailed(format!(
            "Channel handshake rejected (HTTP {})",
            response.status()
        )),
        other => BridgeError::Network(other.to_string()),
    }
}
