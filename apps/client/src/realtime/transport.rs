//! Wire transport for the real-time channel.
//!
//! Frames are JSON objects `{"event": <name>, "data": <payload>}` carried in
//! WebSocket text messages.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self,
        client::IntoClientRequest,
        http::{header::AUTHORIZATION, HeaderValue},
        Message,
    },
};
use tracing::debug;

use crate::realtime::events::AUTH_EVENT;

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            event: event.to_string(),
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed frame: {0}")]
    Frame(String),

    #[error("connection closed by server")]
    Closed,
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = ChannelError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, ChannelError>> + Send>>;

/// Opens one authenticated connection. Reconnect policy lives above this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, token: &str) -> Result<(FrameSink, FrameStream), ChannelError>;
}

pub struct WebSocketTransport {
    url: String,
    handshake_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, token: &str) -> Result<(FrameSink, FrameStream), ChannelError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ChannelError::Connect(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| ChannelError::Connect(format!("invalid credential header: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (ws, _) = timeout(self.handshake_timeout, connect_async(request))
            .await
            .map_err(|_| ChannelError::Connect("handshake timed out".into()))?
            .map_err(|e| ChannelError::Connect(e.to_string()))?;

        let (mut sink, stream) = ws.split();

        let auth = encode_frame(&Frame::new(AUTH_EVENT, json!({ "token": token })))?;
        sink.send(Message::Text(auth))
            .await
            .map_err(|e| ChannelError::Connect(format!("failed to authenticate: {e}")))?;
        debug!(url = %self.url, "WebSocket handshake complete");

        let sink = sink
            .sink_map_err(|e| ChannelError::Transport(e.to_string()))
            .with(|frame: Frame| async move { encode_frame(&frame).map(Message::Text) });
        let stream = stream.filter_map(|message| async move { decode_message(message) });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

pub(crate) fn encode_frame(frame: &Frame) -> Result<String, ChannelError> {
    serde_json::to_string(frame).map_err(|e| ChannelError::Frame(e.to_string()))
}

/// Control frames are swallowed; tungstenite answers pings on its own.
fn decode_message(
    message: Result<Message, tungstenite::Error>,
) -> Option<Result<Frame, ChannelError>> {
    match message {
        Ok(Message::Text(text)) => {
            Some(serde_json::from_str(&text).map_err(|e| ChannelError::Frame(e.to_string())))
        }
        Ok(Message::Binary(bytes)) => {
            Some(serde_json::from_slice(&bytes).map_err(|e| ChannelError::Frame(e.to_string())))
        }
        Ok(Message::Close(_)) => Some(Err(ChannelError::Closed)),
        Ok(_) => None,
        Err(e) => Some(Err(ChannelError::Transport(e.to_string()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_text_frame() {
        let message = Message::Text(r#"{"event":"job:updated","data":{"id":"j1"}}"#.to_string());
        let frame = decode_message(Ok(message)).unwrap().unwrap();
        assert_eq!(frame, Frame::new("job:updated", json!({"id": "j1"})));
    }

    #[test]
    fn test_missing_data_defaults_to_null() {
        let message = Message::Text(r#"{"event":"resume:completed"}"#.to_string());
        let frame = decode_message(Ok(message)).unwrap().unwrap();
        assert_eq!(frame.data, Value::Null);
    }

    #[test]
    fn test_malformed_and_control_frames() {
        let garbage = decode_message(Ok(Message::Text("not json".to_string())));
        assert!(matches!(garbage, Some(Err(ChannelError::Frame(_)))));

        assert!(decode_message(Ok(Message::Ping(vec![1]))).is_none());
        assert_eq!(
            decode_message(Ok(Message::Close(None))),
            Some(Err(ChannelError::Closed))
        );
    }

    #[tokio::test]
    async fn test_silent_server_hits_handshake_timeout() {
        // Accepts TCP but never answers the upgrade.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());

        let transport = WebSocketTransport::new(&url).with_timeout(Duration::from_millis(100));
        let err = match transport.connect("abc").await {
            Ok(_) => panic!("handshake should not complete"),
            Err(e) => e,
        };
        assert_eq!(err, ChannelError::Connect("handshake timed out".into()));
        drop(listener);
    }

    #[test]
    fn test_encode_round_trips_event_name() {
        let text = encode_frame(&Frame::new("chat:send", json!({"to": 4}))).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["event"], "chat:send");
        assert_eq!(value["data"]["to"], 4);
    }
}
