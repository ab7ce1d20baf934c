//! Scripted transport for testing
//!
//! Replies are served from a FIFO script. The transport provides:
//! - Call logging for test verification
//! - Controllable failure injection
//! - Simulated latency
//!
//! Clones share state, so a test can keep a handle after giving the
//! transport to a device.

use super::{AsyncTransport, BlockingTransport};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct MockState {
    replies: VecDeque<String>,
    call_log: Vec<String>,
    fail_next: bool,
    closed: bool,
}

/// Scripted line transport.
///
/// # Example
///
/// ```
/// use pace_scpi::transport::{BlockingTransport, MockTransport};
///
/// let mut mock = MockTransport::new().with_replies([":SENS1:PRES 34.567"]);
/// assert_eq!(mock.write_readline(":SENS1:PRES?").unwrap(), ":SENS1:PRES 34.567");
/// assert_eq!(mock.get_call_log(), vec![":SENS1:PRES?"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    latency: Duration,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set simulated latency in milliseconds
    pub fn with_latency(mut self, ms: u64) -> Self {
        self.latency = Duration::from_millis(ms);
        self
    }

    /// Queue replies, in order.
    pub fn with_replies<I, S>(self, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut state = self.state.lock();
            state.replies.extend(replies.into_iter().map(Into::into));
        }
        self
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.state.lock().replies.push_back(reply.into());
    }

    /// Trigger a failure on the next operation
    pub fn trigger_failure(&self) {
        self.state.lock().fail_next = true;
    }

    /// Get a copy of the call log for verification
    pub fn get_call_log(&self) -> Vec<String> {
        self.state.lock().call_log.clone()
    }

    /// Clear the call log
    pub fn clear_call_log(&self) {
        self.state.lock().call_log.clear();
    }

    /// Number of lines written so far
    pub fn call_count(&self) -> usize {
        self.state.lock().call_log.len()
    }

    pub fn remaining_replies(&self) -> usize {
        self.state.lock().replies.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn log_call(&self, line: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.call_log.push(line.to_string());
        if state.fail_next {
            state.fail_next = false;
            return Err(anyhow!("Mock transport failure"));
        }
        Ok(())
    }

    fn next_reply(&self, line: &str) -> Result<String> {
        self.state
            .lock()
            .replies
            .pop_front()
            .ok_or_else(|| anyhow!("No scripted reply for '{}'", line))
    }

    fn close_now(&self) {
        self.state.lock().closed = true;
    }
}

impl BlockingTransport for MockTransport {
    fn write(&mut self, line: &str) -> Result<()> {
        self.log_call(line)
    }

    fn write_readline(&mut self, line: &str) -> Result<String> {
        self.log_call(line)?;
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        self.next_reply(line)
    }

    fn close(&mut self) -> Result<()> {
        self.close_now();
        Ok(())
    }
}

#[async_trait]
impl AsyncTransport for MockTransport {
    async fn write(&mut self, line: &str) -> Result<()> {
        self.log_call(line)
    }

    async fn write_readline(&mut self, line: &str) -> Result<String> {
        self.log_call(line)?;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.next_reply(line)
    }

    async fn close(&mut self) -> Result<()> {
        self.close_now();
        Ok(())
    }
}
