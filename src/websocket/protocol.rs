//! Terminal WebSocket protocol
//!
//! Inbound frames are JSON; outbound frames are raw terminal text.

use async_trait::async_trait;
use serde::Deserialize;
use termbridge_core::{FrameTransport, TransportError};
use tokio::sync::mpsc;

/// Frames buffered between the output pump and the socket writer
pub const FRAME_BUFFER: usize = 256;

/// Message from the browser terminal
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Keystrokes, written to the PTY as-is
    Input { data: String },
    /// Terminal size change
    Resize {
        #[serde(default = "default_cols")]
        cols: u16,
        #[serde(default = "default_rows")]
        rows: u16,
    },
    /// Keepalive
    Ping,
}

fn default_cols() -> u16 {
    80
}

fn default_rows() -> u16 {
    24
}

impl ClientFrame {
    /// Parse one text frame
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Frame sink feeding a socket writer through a bounded channel
pub struct ChannelFrames {
    tx: mpsc::Sender<String>,
}

impl ChannelFrames {
    /// Sink and the receiver the socket loop drains
    pub fn channel() -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl FrameTransport for ChannelFrames {
    async fn send_frame(&self, text: String) -> Result<(), TransportError> {
        self.tx
            .send(text)
            .await
            .map_err(|_| TransportError::Failed("socket closed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input() {
        assert_eq!(
            ClientFrame::parse(r#"{"type":"input","data":"ls\r"}"#).unwrap(),
            ClientFrame::Input {
                data: "ls\r".into()
            }
        );
    }

    #[test]
    fn test_parse_resize_with_defaults() {
        assert_eq!(
            ClientFrame::parse(r#"{"type":"resize","cols":120,"rows":40}"#).unwrap(),
            ClientFrame::Resize { cols: 120, rows: 40 }
        );
        assert_eq!(
            ClientFrame::parse(r#"{"type":"resize"}"#).unwrap(),
            ClientFrame::Resize { cols: 80, rows: 24 }
        );
    }

    #[test]
    fn test_rejects_unknown_frames() {
        assert!(ClientFrame::parse(r#"{"type":"exec","cmd":"rm"}"#).is_err());
        assert!(ClientFrame::parse("ls").is_err());
    }

    #[tokio::test]
    async fn test_channel_frames_deliver_in_order() {
        let (sink, mut rx) = ChannelFrames::channel();
        sink.send_frame("a".into()).await.unwrap();
        sink.send_frame("b".into()).await.unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("a"));
        assert_eq!(rx.recv().await.as_deref(), Some("b"));

        drop(rx);
        assert!(sink.send_frame("c".into()).await.is_err());
    }
}
