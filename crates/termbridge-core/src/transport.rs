//! Outbound transport contracts
//!
//! The engine talks to front-ends only through these traits. A chat sink is
//! bound to one conversation; a frame sink is bound to one socket.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Identifier of a sent chat message
pub type MessageId = i64;

/// Transport send failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// An edit carried the same content as the message already shows
    #[error("message not modified")]
    NotModified,
    /// The send did not finish in time
    #[error("send timed out")]
    Timeout,
    /// Any other failure
    #[error("{0}")]
    Failed(String),
}

/// Chat-style sink: new messages, in-place edits and file uploads
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a new message and return its id
    async fn send_message(&self, text: &str) -> Result<MessageId, TransportError>;

    /// Replace the text of a message sent earlier
    async fn edit_message(&self, id: MessageId, text: &str) -> Result<(), TransportError>;

    /// Upload `data` as a file named `file_name`
    async fn send_file(
        &self,
        file_name: &str,
        data: Vec<u8>,
        caption: &str,
    ) -> Result<(), TransportError>;
}

/// Frame-style sink: raw terminal text for a browser terminal
#[async_trait]
pub trait FrameTransport: Send + Sync {
    /// Send one frame of terminal output
    async fn send_frame(&self, text: String) -> Result<(), TransportError>;
}

/// Where a session's output goes
#[derive(Clone)]
pub enum Sink {
    /// Filtered, edit-in-place chat output
    Chat(Arc<dyn ChatTransport>),
    /// Raw terminal frames
    Frames(Arc<dyn FrameTransport>),
}

impl Sink {
    /// Whether both values point at the same transport instance
    pub fn same_as(&self, other: &Sink) -> bool {
        match (self, other) {
            (Sink::Chat(a), Sink::Chat(b)) => {
                std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
            }
            (Sink::Frames(a), Sink::Frames(b)) => {
                std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
            }
            _ => false,
        }
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Sink::Chat(_) => "chat",
            Sink::Frames(_) => "frames",
        }
    }
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sink::{}", self.kind())
    }
}

/// Run a transport call with an upper bound on its duration
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(TransportError::Timeout))
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording transports for tests

    use super::*;
    use std::sync::Mutex;

    /// Everything a [`RecordingChat`] was asked to do
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum ChatCall {
        Send(MessageId, String),
        Edit(MessageId, String),
        File(String, usize),
    }

    #[derive(Default)]
    pub struct RecordingChat {
        pub calls: Mutex<Vec<ChatCall>>,
        pub fail_edits: std::sync::atomic::AtomicBool,
        next_id: std::sync::atomic::AtomicI64,
    }

    impl RecordingChat {
        pub fn calls(&self) -> Vec<ChatCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn files(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| matches!(c, ChatCall::File(..)))
                .count()
        }
    }

    #[async_trait]
    impl ChatTransport for RecordingChat {
        async fn send_message(&self, text: &str) -> Result<MessageId, TransportError> {
            let id = self
                .next_id
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
                + 1;
            self.calls
                .lock()
                .unwrap()
                .push(ChatCall::Send(id, text.to_string()));
            Ok(id)
        }

        async fn edit_message(&self, id: MessageId, text: &str) -> Result<(), TransportError> {
            if self.fail_edits.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(TransportError::Failed("message to edit not found".into()));
            }
            let mut calls = self.calls.lock().unwrap();
            let unchanged = calls.iter().rev().find_map(|c| match c {
                ChatCall::Send(i, t) | ChatCall::Edit(i, t) if *i == id => Some(t == text),
                _ => None,
            });
            if unchanged == Some(true) {
                return Err(TransportError::NotModified);
            }
            calls.push(ChatCall::Edit(id, text.to_string()));
            Ok(())
        }

        async fn send_file(
            &self,
            file_name: &str,
            data: Vec<u8>,
            _caption: &str,
        ) -> Result<(), TransportError> {
            self.calls
                .lock()
                .unwrap()
                .push(ChatCall::File(file_name.to_string(), data.len()));
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct RecordingFrames {
        pub frames: Mutex<Vec<String>>,
    }

    impl RecordingFrames {
        pub fn joined(&self) -> String {
            self.frames.lock().unwrap().concat()
        }
    }

    #[async_trait]
    impl FrameTransport for RecordingFrames {
        async fn send_frame(&self, text: String) -> Result<(), TransportError> {
            self.frames.lock().unwrap().push(text);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: Result<(), TransportError> = bounded(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(TransportError::Timeout));
    }

    #[test]
    fn test_sink_identity() {
        let chat: Arc<dyn ChatTransport> = Arc::new(RecordingChat::default());
        let a = Sink::Chat(chat.clone());
        let b = Sink::Chat(chat);
        let c = Sink::Chat(Arc::new(RecordingChat::default()));
        let d = Sink::Frames(Arc::new(RecordingFrames::default()));
        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
        assert!(!a.same_as(&d));
    }
}
