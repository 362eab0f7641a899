//! In-memory sensor double.
//!
//! [`ScriptedTransport`] stands in for a serial port: every write is recorded
//! and answered with the next queued reply (or a generated one), and writes can
//! be made to fail on demand. Clones share state, so a test can keep a handle
//! after boxing the transport into a [`PortSession`](crate::PortSession).

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

/// Produces the reply to one request frame.
pub type ReplyFn = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

/// How long a read on an empty transport pretends to block.
const EMPTY_READ_DELAY: Duration = Duration::from_millis(1);

#[derive(Default)]
struct ScriptState {
    replies: VecDeque<Vec<u8>>,
    responder: Option<ReplyFn>,
    pending: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    failing_writes: usize,
    always_fail: bool,
    trickle: Option<Trickle>,
}

/// Hand out pending bytes `chunk` at a time, one piece per `gap`.
#[derive(Clone, Copy)]
struct Trickle {
    chunk: usize,
    gap: Duration,
    next_ready: Option<Instant>,
}

#[derive(Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedTransport {
    /// A transport that never answers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request by calling `responder` with the request bytes.
    pub fn with_responder(responder: impl FnMut(&[u8]) -> Vec<u8> + Send + 'static) -> Self {
        let transport = Self::new();
        transport.lock().responder = Some(Box::new(responder));
        transport
    }

    /// Queue a reply for the next request. Queued replies take precedence over
    /// the responder.
    pub fn push_reply(&self, reply: Vec<u8>) {
        self.lock().replies.push_back(reply);
    }

    /// Make bytes readable immediately, without waiting for a request.
    pub fn inject(&self, bytes: &[u8]) {
        self.lock().pending.extend(bytes.iter().copied());
    }

    /// Deliver pending bytes in pieces of at most `chunk` bytes, `gap` apart,
    /// the way a slow line splits a reply across several reads.
    pub fn trickle(&self, chunk: usize, gap: Duration) {
        self.lock().trickle = Some(Trickle {
            chunk: chunk.max(1),
            gap,
            next_ready: None,
        });
    }

    /// Fail the next `count` writes.
    pub fn fail_writes(&self, count: usize) {
        self.lock().failing_writes = count;
    }

    /// Fail every write from now on (unplugged device).
    pub fn fail_all_writes(&self, fail: bool) {
        self.lock().always_fail = fail;
    }

    /// Every frame written so far, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    /// Number of write attempts that reached the transport, including failed ones.
    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Write for ScriptedTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        state.writes.push(buf.to_vec());

        if state.always_fail || state.failing_writes > 0 {
            state.failing_writes = state.failing_writes.saturating_sub(1);
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "simulated write failure",
            ));
        }

        let reply = match state.replies.pop_front() {
            Some(reply) => Some(reply),
            None => state.responder.as_mut().map(|respond| respond(buf)),
        };
        if let Some(reply) = reply {
            state.pending.extend(reply);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for ScriptedTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        {
            let mut state = self.lock();
            let mut limit = buf.len();
            if let Some(trickle) = state.trickle.as_mut() {
                let now = Instant::now();
                if trickle.next_ready.is_some_and(|ready| now < ready) {
                    limit = 0;
                } else {
                    limit = limit.min(trickle.chunk);
                }
            }
            if limit > 0 && !state.pending.is_empty() {
                if let Some(trickle) = state.trickle.as_mut() {
                    trickle.next_ready = Some(Instant::now() + trickle.gap);
                }
                let n = limit.min(state.pending.len());
                for (slot, byte) in buf.iter_mut().zip(state.pending.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
        }
        thread::sleep(EMPTY_READ_DELAY);
        Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
    }
}
