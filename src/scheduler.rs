//! Fixed-period request/response polling.
//!
//! A [`PollScheduler`] owns one worker thread while running. Each tick of its
//! timer performs a poll cycle: write the request frame, collect bytes for the
//! read deadline, decode. Outcomes are published as [`PollEvent`]s on a
//! channel; the scheduler never touches the sample buffer or the display.
//!
//! # Fault handling
//!
//! - An empty read is the normal state while the sensor has not answered yet
//!   and produces no event.
//! - Undecodable replies produce `FrameError` and polling carries on.
//! - Write failures produce `LinkError`. After `max_write_failures` in a row
//!   the scheduler becomes `Faulted`, its timer stops and nothing is written
//!   again until the operator closes and reopens the port.
//!
//! Stopping is cooperative: the worker checks for the stop signal between
//! ticks, so the read deadline bounds how long `stop` can wait.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{select, tick, Receiver, Sender};
use log::{debug, error, info, warn};

use crate::codec::FrameCodec;
use crate::config::AcquisitionConfig;
use crate::errors::{DecodeError, IoError, SchedulerError};
use crate::port::PortSession;
use crate::sample::{Sample, SessionClock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Faulted,
}

/// What one poll cycle produced.
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    Sample(Sample),
    FrameError(DecodeError),
    LinkError(IoError),
    /// The write-failure threshold was reached and polling stopped.
    Faulted { failures: u32 },
}

/// Port handle shared between the controller and the poll worker.
pub type SharedPort = Arc<Mutex<PortSession>>;

pub(crate) fn lock_port(port: &SharedPort) -> MutexGuard<'_, PortSession> {
    port.lock().unwrap_or_else(|e| e.into_inner())
}

struct Shared {
    state: Mutex<SchedulerState>,
    consecutive_failures: AtomicU32,
}

impl Shared {
    fn state(&self) -> SchedulerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: SchedulerState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != next {
            debug!("scheduler {:?} -> {:?}", *state, next);
            *state = next;
        }
    }
}

struct Worker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct PollScheduler {
    port: SharedPort,
    codec: FrameCodec,
    clock: SessionClock,
    period: Duration,
    read_deadline: Duration,
    max_write_failures: u32,
    events: Sender<PollEvent>,
    shared: Arc<Shared>,
    worker: Option<Worker>,
}

impl PollScheduler {
    pub fn new(
        port: SharedPort,
        codec: FrameCodec,
        config: &AcquisitionConfig,
        events: Sender<PollEvent>,
    ) -> Self {
        Self {
            port,
            codec,
            clock: SessionClock::new(),
            period: config.poll_period,
            read_deadline: config.read_deadline,
            max_write_failures: config.max_write_failures.max(1),
            events,
            shared: Arc::new(Shared {
                state: Mutex::new(SchedulerState::Idle),
                consecutive_failures: AtomicU32::new(0),
            }),
            worker: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.shared.state()
    }

    pub fn consecutive_write_failures(&self) -> u32 {
        self.shared.consecutive_failures.load(Ordering::SeqCst)
    }

    /// Begin polling. A no-op when already running.
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        match self.state() {
            SchedulerState::Running => return Ok(()),
            SchedulerState::Faulted => return Err(SchedulerError::Faulted),
            SchedulerState::Idle => {}
        }
        if !lock_port(&self.port).is_open() {
            return Err(SchedulerError::PortNotOpen);
        }

        // A worker that exited on its own is still waiting to be joined.
        self.join_worker();

        self.shared.consecutive_failures.store(0, Ordering::SeqCst);
        self.shared.set_state(SchedulerState::Running);

        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let cycle = PollCycle {
            port: Arc::clone(&self.port),
            codec: self.codec,
            clock: self.clock,
            read_deadline: self.read_deadline,
            max_write_failures: self.max_write_failures,
            events: self.events.clone(),
            shared: Arc::clone(&self.shared),
        };
        let period = self.period;
        let handle = thread::Builder::new()
            .name("thermopoll-poll".into())
            .spawn(move || run_worker(cycle, period, stop_rx))
            .map_err(|e| {
                self.shared.set_state(SchedulerState::Idle);
                SchedulerError::Spawn(e.to_string())
            })?;

        info!("polling every {:?}", period);
        self.worker = Some(Worker {
            stop: stop_tx,
            handle,
        });
        Ok(())
    }

    /// Stop polling and wait for the worker. A no-op when not running.
    ///
    /// A faulted scheduler stays faulted; only [`reset`](Self::reset) clears it.
    pub fn stop(&mut self) {
        let was_running = self.worker.is_some();
        self.join_worker();
        if self.state() == SchedulerState::Running {
            self.shared.set_state(SchedulerState::Idle);
        }
        if was_running {
            info!("polling stopped");
        }
    }

    /// Stop and return to `Idle` regardless of faults. Called when the port closes.
    pub fn reset(&mut self) {
        self.stop();
        self.shared.consecutive_failures.store(0, Ordering::SeqCst);
        self.shared.set_state(SchedulerState::Idle);
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop.send(());
            drop(worker.stop);
            if worker.handle.join().is_err() {
                error!("poll worker panicked");
            }
        }
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.join_worker();
    }
}

fn run_worker(mut cycle: PollCycle, period: Duration, stop: Receiver<()>) {
    let ticker = tick(period);
    loop {
        select! {
            recv(stop) -> _ => break,
            recv(ticker) -> _ => {
                if cycle.run() == CycleOutcome::Faulted {
                    break;
                }
            }
        }
    }
    debug!("poll worker exiting");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleOutcome {
    Continue,
    Faulted,
}

/// Everything one poll cycle needs, moved into the worker thread.
struct PollCycle {
    port: SharedPort,
    codec: FrameCodec,
    clock: SessionClock,
    read_deadline: Duration,
    max_write_failures: u32,
    events: Sender<PollEvent>,
    shared: Arc<Shared>,
}

impl PollCycle {
    fn run(&mut self) -> CycleOutcome {
        let request = self.codec.encode_request();
        let bytes = {
            let mut port = lock_port(&self.port);
            if let Err(e) = port.write(&request) {
                drop(port);
                return self.write_failed(e);
            }
            self.shared.consecutive_failures.store(0, Ordering::SeqCst);
            port.read_with_deadline(self.read_deadline)
        };

        if bytes.is_empty() {
            debug!("no reply within {:?}", self.read_deadline);
            return CycleOutcome::Continue;
        }

        match self.codec.decode_reply_at(&bytes, self.clock.now()) {
            Ok(sample) => {
                debug!("sample {:.2} at {:.3}", sample.value, sample.timestamp);
                self.emit(PollEvent::Sample(sample));
            }
            Err(e) => {
                warn!("discarding reply {:02X?}: {}", bytes, e);
                self.emit(PollEvent::FrameError(e));
            }
        }
        CycleOutcome::Continue
    }

    fn write_failed(&self, err: IoError) -> CycleOutcome {
        let failures = self.shared.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(
            "request write failed ({}/{}): {}",
            failures, self.max_write_failures, err
        );
        self.emit(PollEvent::LinkError(err));

        if failures >= self.max_write_failures {
            error!(
                "{} consecutive write failures; polling halted until the port is reopened",
                failures
            );
            self.shared.set_state(SchedulerState::Faulted);
            self.emit(PollEvent::Faulted { failures });
            return CycleOutcome::Faulted;
        }
        CycleOutcome::Continue
    }

    fn emit(&self, event: PollEvent) {
        // Nobody listening is not an acquisition error.
        let _ = self.events.send(event);
    }
}
