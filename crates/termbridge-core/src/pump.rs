//! Output pump
//!
//! One task per session polls the PTY, coalesces output and hands it to the
//! current sink. It is the only writer of terminal output for its session.

use crate::auth::{classify_bytes, AuthState};
use crate::coalesce::Coalescer;
use crate::config::PumpConfig;
use crate::error::Error;
use crate::filter::{tail_chars, AnsiStripper, Utf8Stream};
use crate::pty::PtyRead;
use crate::session::{Session, SessionState};
use crate::transport::{bounded, ChatTransport, FrameTransport, MessageId, Sink, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reads drained per poll tick before yielding
const MAX_READS_PER_TICK: usize = 64;

/// File name used when output overflows a chat message
pub const SPILL_FILE_NAME: &str = "output.txt";

/// Why the pump stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// The session was cancelled by disconnect, sweep or shutdown
    Cancelled,
    /// The child exited or the PTY closed
    ProcessExited,
}

/// Lifecycle notices delivered alongside output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Manual login input led to a shell prompt
    Authenticated,
    /// The remote side closed the session
    Closed,
}

/// Renders output for a chat transport: filtered text in one live message
pub(crate) struct ChatRenderer {
    transport: Arc<dyn ChatTransport>,
    live: Option<MessageId>,
    accumulated: String,
    decoder: Utf8Stream,
    stripper: AnsiStripper,
    window_chars: usize,
    ceiling: usize,
    send_timeout: Duration,
}

impl ChatRenderer {
    pub(crate) fn new(transport: Arc<dyn ChatTransport>, config: &PumpConfig) -> Self {
        Self {
            transport,
            live: None,
            accumulated: String::new(),
            decoder: Utf8Stream::default(),
            stripper: AnsiStripper::default(),
            window_chars: config.live_window_chars,
            ceiling: config.message_ceiling,
            send_timeout: config.send_timeout,
        }
    }

    pub(crate) async fn render(&mut self, bytes: &[u8]) {
        let text = self.stripper.strip(&self.decoder.decode(bytes));
        if text.is_empty() {
            return;
        }
        self.accumulated.push_str(&text);

        if self.accumulated.len() > self.ceiling {
            self.spill().await;
            return;
        }

        let window = tail_chars(&self.accumulated, self.window_chars).to_string();
        if window.trim().is_empty() {
            return;
        }
        self.show(&window).await;
    }

    /// Send the whole accumulated text as a file and start over
    async fn spill(&mut self) {
        let data = std::mem::take(&mut self.accumulated).into_bytes();
        let size = data.len();
        let result = bounded(
            self.send_timeout,
            self.transport
                .send_file(SPILL_FILE_NAME, data, "📄 Output too long, sent as file"),
        )
        .await;
        match result {
            Ok(()) => debug!(bytes = size, "Output spilled to file"),
            Err(e) => warn!(bytes = size, error = %e, "Failed to send output file"),
        }
        self.live = None;
    }

    async fn show(&mut self, window: &str) {
        if let Some(id) = self.live {
            match bounded(self.send_timeout, self.transport.edit_message(id, window)).await {
                Ok(()) | Err(TransportError::NotModified) => return,
                Err(TransportError::Timeout) => {
                    warn!(message_id = id, "Live message edit timed out");
                    return;
                }
                Err(e) => {
                    debug!(message_id = id, error = %e, "Live message edit failed, sending new message");
                }
            }
        }
        match bounded(self.send_timeout, self.transport.send_message(window)).await {
            Ok(id) => self.live = Some(id),
            Err(e) => warn!(error = %e, "Failed to send output message"),
        }
    }

    async fn notify(&mut self, event: SessionEvent) {
        let text = match event {
            SessionEvent::Authenticated => "✅ Authentication successful",
            SessionEvent::Closed => "🔌 Session closed",
        };
        if let Err(e) = bounded(self.send_timeout, self.transport.send_message(text)).await {
            warn!(error = %e, ?event, "Failed to send session event");
        }
        // Later output goes below the notice
        self.live = None;
        self.accumulated.clear();
    }

    async fn finish(&mut self) {
        let rest = self.decoder.finish();
        if !rest.is_empty() {
            self.render(rest.as_bytes()).await;
        }
        self.stripper.finish();
    }
}

/// Renders output for a frame transport: raw text, no filtering
pub(crate) struct FrameRenderer {
    transport: Arc<dyn FrameTransport>,
    decoder: Utf8Stream,
    send_timeout: Duration,
}

impl FrameRenderer {
    pub(crate) fn new(transport: Arc<dyn FrameTransport>, config: &PumpConfig) -> Self {
        Self {
            transport,
            decoder: Utf8Stream::default(),
            send_timeout: config.send_timeout,
        }
    }

    async fn send(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        if let Err(e) = bounded(self.send_timeout, self.transport.send_frame(text)).await {
            warn!(error = %e, "Failed to send terminal frame");
        }
    }

    pub(crate) async fn render(&mut self, bytes: &[u8]) {
        let text = self.decoder.decode(bytes);
        self.send(text).await;
    }

    async fn notify(&mut self, event: SessionEvent) {
        if event == SessionEvent::Closed {
            self.send("\r\n[session closed]\r\n".to_string()).await;
        }
    }

    async fn finish(&mut self) {
        let rest = self.decoder.finish();
        self.send(rest).await;
    }
}

pub(crate) enum Renderer {
    Chat(ChatRenderer),
    Frames(FrameRenderer),
}

impl Renderer {
    pub(crate) fn for_sink(sink: Sink, config: &PumpConfig) -> Self {
        match sink {
            Sink::Chat(t) => Renderer::Chat(ChatRenderer::new(t, config)),
            Sink::Frames(t) => Renderer::Frames(FrameRenderer::new(t, config)),
        }
    }

    fn coalescer(&self, config: &PumpConfig, now: Instant) -> Coalescer {
        match self {
            Renderer::Chat(_) => Coalescer::new(config.flush_bytes, config.flush_interval, now),
            Renderer::Frames(_) => Coalescer::immediate(now),
        }
    }

    async fn render(&mut self, bytes: &[u8]) {
        match self {
            Renderer::Chat(r) => r.render(bytes).await,
            Renderer::Frames(r) => r.render(bytes).await,
        }
    }

    async fn notify(&mut self, event: SessionEvent) {
        match self {
            Renderer::Chat(r) => r.notify(event).await,
            Renderer::Frames(r) => r.notify(event).await,
        }
    }

    async fn finish(&mut self) {
        match self {
            Renderer::Chat(r) => r.finish().await,
            Renderer::Frames(r) => r.finish().await,
        }
    }
}

/// Per-session output loop
pub struct OutputPump {
    session: Arc<Session>,
    config: PumpConfig,
    sink: watch::Receiver<Sink>,
    cancel: CancellationToken,
}

impl OutputPump {
    pub(crate) fn new(session: Arc<Session>, config: PumpConfig, cancel: CancellationToken) -> Self {
        let sink = session.sink.subscribe();
        Self {
            session,
            config,
            sink,
            cancel,
        }
    }

    /// Run until cancelled or the child exits, then flush once.
    pub async fn run(mut self) -> PumpExit {
        let key = self.session.key().clone();
        let mut renderer = Renderer::for_sink(self.sink.borrow_and_update().clone(), &self.config);
        let mut coalescer = renderer.coalescer(&self.config, Instant::now());

        // Output read during the login phase goes out first
        let backlog = self.session.take_backlog();
        if !backlog.is_empty() {
            renderer.render(&backlog).await;
        }

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let exit = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break PumpExit::Cancelled,
                _ = ticker.tick() => {}
            }

            if self.sink.has_changed().unwrap_or(false) {
                if let Some(pending) = coalescer.drain() {
                    renderer.render(&pending).await;
                }
                renderer.finish().await;
                let sink = self.sink.borrow_and_update().clone();
                debug!(session_key = %key, sink = sink.kind(), "Output sink switched");
                renderer = Renderer::for_sink(sink, &self.config);
                coalescer = renderer.coalescer(&self.config, Instant::now());
            }

            let closed = self.drain_once(&mut renderer, &mut coalescer).await;

            if let Some(out) = coalescer.poll(Instant::now()) {
                renderer.render(&out).await;
            }

            if closed || !self.session.pty.is_alive().await {
                // Pick up anything written between the last read and exit
                self.drain_once(&mut renderer, &mut coalescer).await;
                break PumpExit::ProcessExited;
            }
        };

        if let Some(rest) = coalescer.drain() {
            renderer.render(&rest).await;
        }
        renderer.finish().await;

        if exit == PumpExit::ProcessExited {
            info!(session_key = %key, "Remote side closed the session");
            renderer.notify(SessionEvent::Closed).await;
        } else {
            debug!(session_key = %key, "Output pump cancelled");
        }
        exit
    }

    /// Read everything available this tick; true if the PTY reported closed.
    async fn drain_once(&self, renderer: &mut Renderer, coalescer: &mut Coalescer) -> bool {
        for _ in 0..MAX_READS_PER_TICK {
            match self.session.pty.read_nonblocking(self.config.read_chunk).await {
                Ok(PtyRead::Data(bytes)) => {
                    self.session.touch();
                    self.check_manual_login(&bytes, renderer).await;
                    if let Some(out) = coalescer.push(&bytes, Instant::now()) {
                        renderer.render(&out).await;
                    }
                }
                Ok(PtyRead::Empty) => return false,
                Err(Error::Closed) => return true,
                Err(e) => {
                    debug!(session_key = %self.session.key(), error = %e, "PTY read failed, retrying next tick");
                    return false;
                }
            }
        }
        false
    }

    async fn check_manual_login(&self, bytes: &[u8], renderer: &mut Renderer) {
        if self.session.state() != SessionState::AwaitingAuth {
            return;
        }
        if let AuthState::LoginSucceeded(prompt) = classify_bytes(bytes) {
            if self.session.promote_to_authenticated() {
                info!(session_key = %self.session.key(), prompt = %prompt, "Manual authentication succeeded");
                renderer.notify(SessionEvent::Authenticated).await;
            }
        }
    }
}
