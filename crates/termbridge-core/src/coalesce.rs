//! Output coalescing
//!
//! Pure buffering policy: the caller supplies the clock, which keeps the
//! thresholds testable without a runtime.

use crate::auth::trailing_prompt;
use crate::filter::strip_ansi;
use std::time::Duration;
use tokio::time::Instant;

/// Bytes of buffer tail inspected for a shell prompt
const PROMPT_PROBE_BYTES: usize = 256;

/// Buffers PTY output until one of the flush conditions holds
#[derive(Debug)]
pub struct Coalescer {
    buffer: Vec<u8>,
    flush_bytes: usize,
    flush_interval: Duration,
    last_flush: Instant,
}

impl Coalescer {
    /// Flush when the buffer exceeds `flush_bytes`, when `flush_interval` has
    /// passed since the last flush, or when the buffer ends in a shell prompt.
    pub fn new(flush_bytes: usize, flush_interval: Duration, now: Instant) -> Self {
        Self {
            buffer: Vec::new(),
            flush_bytes,
            flush_interval,
            last_flush: now,
        }
    }

    /// Flush on every non-empty push
    pub fn immediate(now: Instant) -> Self {
        Self::new(0, Duration::ZERO, now)
    }

    /// Buffer `bytes`; returns everything buffered if a threshold was crossed.
    pub fn push(&mut self, bytes: &[u8], now: Instant) -> Option<Vec<u8>> {
        self.buffer.extend_from_slice(bytes);
        if self.buffer.is_empty() {
            return None;
        }
        if self.buffer.len() > self.flush_bytes
            || self.interval_elapsed(now)
            || self.ends_with_prompt()
        {
            return self.take(now);
        }
        None
    }

    /// Time-based flush when no new bytes arrived
    pub fn poll(&mut self, now: Instant) -> Option<Vec<u8>> {
        if !self.buffer.is_empty() && self.interval_elapsed(now) {
            return self.take(now);
        }
        None
    }

    /// Take everything left, regardless of thresholds
    pub fn drain(&mut self) -> Option<Vec<u8>> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }

    /// Buffered byte count
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn interval_elapsed(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_flush) >= self.flush_interval
    }

    fn ends_with_prompt(&self) -> bool {
        let start = self.buffer.len().saturating_sub(PROMPT_PROBE_BYTES);
        let tail = strip_ansi(&String::from_utf8_lossy(&self.buffer[start..]));
        trailing_prompt(&tail).is_some()
    }

    fn take(&mut self, now: Instant) -> Option<Vec<u8>> {
        self.last_flush = now;
        Some(std::mem::take(&mut self.buffer))
    }
}
