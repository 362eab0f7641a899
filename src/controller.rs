//! Session lifecycle and event fan-out.
//!
//! The [`AcquisitionController`] owns exactly one port session, one
//! [`PollScheduler`] and one [`SampleBuffer`] for its whole life. Poll events
//! flow over a channel into a dispatcher thread which admits samples into the
//! buffer and notifies the [`DisplaySink`]. The display keeps its own redraw
//! cadence; nothing here assumes it matches the poll period.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info, warn};

use crate::buffer::SampleBuffer;
use crate::codec::FrameCodec;
use crate::config::AcquisitionConfig;
use crate::errors::{ConfigError, DecodeError, IoError, OpenError, SchedulerError};
use crate::export;
use crate::port::{PortConfig, PortSession, Transport};
use crate::sample::Sample;
use crate::scheduler::{lock_port, PollEvent, PollScheduler, SchedulerState, SharedPort};

// ============================================================================
// Display Sink
// ============================================================================

/// Receiver of everything the operator should see.
///
/// Callbacks run on the controller's dispatcher thread and should return
/// quickly; a sink that needs to do real work should forward to its own thread
/// (see [`ChannelSink`]).
pub trait DisplaySink: Send + Sync {
    /// A sample was admitted. `window` is the buffer's current display window,
    /// oldest first, ending with `sample`.
    fn on_sample(&self, sample: &Sample, window: &[Sample]);

    fn on_frame_error(&self, _error: &DecodeError) {}

    fn on_link_error(&self, _error: &IoError) {}

    /// Polling halted after repeated write failures; the port must be reopened.
    fn on_faulted(&self, _failures: u32) {}
}

/// Display notification in channel form.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayEvent {
    Sample { sample: Sample, window: Vec<Sample> },
    FrameError(DecodeError),
    LinkError(IoError),
    Faulted { failures: u32 },
}

/// Forwards every notification to a channel owned by the display.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<DisplayEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, Receiver<DisplayEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }

    fn forward(&self, event: DisplayEvent) {
        if self.tx.send(event).is_err() {
            debug!("display channel closed; dropping notification");
        }
    }
}

impl DisplaySink for ChannelSink {
    fn on_sample(&self, sample: &Sample, window: &[Sample]) {
        self.forward(DisplayEvent::Sample {
            sample: *sample,
            window: window.to_vec(),
        });
    }

    fn on_frame_error(&self, error: &DecodeError) {
        self.forward(DisplayEvent::FrameError(error.clone()));
    }

    fn on_link_error(&self, error: &IoError) {
        self.forward(DisplayEvent::LinkError(error.clone()));
    }

    fn on_faulted(&self, failures: u32) {
        self.forward(DisplayEvent::Faulted { failures });
    }
}

// ============================================================================
// Controller
// ============================================================================

/// Operator-visible snapshot of the acquisition pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub port_open: bool,
    pub port_name: Option<String>,
    pub scheduler: SchedulerState,
    pub consecutive_write_failures: u32,
    pub retained: usize,
}

pub struct AcquisitionController {
    port: SharedPort,
    // Only `None` while dropping, so the event channel closes before the
    // dispatcher is joined.
    scheduler: Option<PollScheduler>,
    buffer: Arc<SampleBuffer>,
    dispatcher: Option<JoinHandle<()>>,
}

impl AcquisitionController {
    pub fn new(
        config: AcquisitionConfig,
        sink: Arc<dyn DisplaySink>,
    ) -> Result<Self, ConfigError> {
        Self::with_codec(config, FrameCodec::new(), sink)
    }

    /// Build a controller around `codec`. Fails when `config` does not validate.
    pub fn with_codec(
        config: AcquisitionConfig,
        codec: FrameCodec,
        sink: Arc<dyn DisplaySink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let port: SharedPort = Arc::new(Mutex::new(
            PortSession::new().with_read_slice(config.read_slice),
        ));
        let buffer = Arc::new(SampleBuffer::new(config.buffer));

        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let scheduler = PollScheduler::new(Arc::clone(&port), codec, &config, events_tx);

        let dispatcher = {
            let buffer = Arc::clone(&buffer);
            thread::Builder::new()
                .name("thermopoll-dispatch".into())
                .spawn(move || {
                    for event in events_rx {
                        dispatch(event, &buffer, sink.as_ref());
                    }
                    debug!("dispatcher exiting");
                })
        };
        let dispatcher = match dispatcher {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("failed to spawn dispatcher; events will not reach the display: {}", e);
                None
            }
        };

        Ok(Self {
            port,
            scheduler: Some(scheduler),
            buffer,
            dispatcher,
        })
    }

    // ------------------------------------------------------------------------
    // Operator Commands
    // ------------------------------------------------------------------------

    /// Open the port and start polling. The port is released again when
    /// polling cannot start.
    pub fn start_session(&mut self, config: &PortConfig) -> Result<(), OpenError> {
        self.open(config)?;
        let started = self.start();
        self.release_unless_started(started)
    }

    fn release_unless_started(
        &mut self,
        started: Result<(), SchedulerError>,
    ) -> Result<(), OpenError> {
        started.map_err(|e| {
            warn!("polling did not start, releasing the port: {}", e);
            self.close();
            OpenError::Other(e.to_string())
        })
    }

    /// Stop polling and close the port. Idempotent.
    pub fn stop_session(&mut self) {
        self.close();
    }

    /// Acquire the device. Reopening closes the previous handle and clears a fault.
    pub fn open(&mut self, config: &PortConfig) -> Result<(), OpenError> {
        self.close();
        lock_port(&self.port).open(config)
    }

    /// Attach an already-connected transport instead of a named device.
    pub fn open_transport(&mut self, name: &str, transport: Box<dyn Transport>) {
        self.close();
        lock_port(&self.port).open_with(name, transport);
    }

    /// Release the device. Returns a faulted scheduler to idle.
    pub fn close(&mut self) {
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.reset();
        }
        lock_port(&self.port).close();
    }

    /// Resume polling on an open port. A no-op while running.
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        match self.scheduler.as_mut() {
            Some(scheduler) => scheduler.start(),
            None => Err(SchedulerError::PortNotOpen),
        }
    }

    /// Pause polling; the port stays open and the buffer keeps its data.
    pub fn stop(&mut self) {
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.stop();
        }
    }

    /// Empty the display window and the session history in one step.
    pub fn clear_buffer(&self) {
        self.buffer.clear();
        info!("sample buffer cleared");
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// `(timestamp, value)` pairs of the current display window.
    pub fn export_current_buffer(&self) -> Vec<(f64, f64)> {
        self.buffer
            .current_window()
            .into_iter()
            .map(|s| (s.timestamp, s.value))
            .collect()
    }

    /// `(timestamp, value)` pairs of every sample admitted since the last clear.
    pub fn export_history(&self) -> Vec<(f64, f64)> {
        self.buffer
            .history()
            .into_iter()
            .map(|s| (s.timestamp, s.value))
            .collect()
    }

    /// Write the session history to `path` as a table. Returns the row count.
    pub fn save_history(&self, path: impl AsRef<Path>) -> crate::Result<usize> {
        let rows = self.export_history();
        export::save_to_path(path, &rows)?;
        Ok(rows.len())
    }

    pub fn latest(&self) -> Option<Sample> {
        self.buffer.latest()
    }

    pub fn current_window(&self) -> Vec<Sample> {
        self.buffer.current_window()
    }

    pub fn buffer(&self) -> Arc<SampleBuffer> {
        Arc::clone(&self.buffer)
    }

    pub fn status(&self) -> SessionStatus {
        let port = lock_port(&self.port);
        SessionStatus {
            port_open: port.is_open(),
            port_name: port.port_name().map(str::to_string),
            scheduler: self
                .scheduler
                .as_ref()
                .map_or(SchedulerState::Idle, PollScheduler::state),
            consecutive_write_failures: self
                .scheduler
                .as_ref()
                .map_or(0, PollScheduler::consecutive_write_failures),
            retained: self.buffer.retained(),
        }
    }
}

impl Drop for AcquisitionController {
    fn drop(&mut self) {
        self.close();
        // Dropping the scheduler drops the last event sender, which ends the
        // dispatcher's loop once it has drained the channel.
        drop(self.scheduler.take());
        if let Some(handle) = self.dispatcher.take() {
            if handle.join().is_err() {
                error!("dispatcher panicked");
            }
        }
    }
}

/// Route one poll event: admit samples, notify the display.
fn dispatch(event: PollEvent, buffer: &SampleBuffer, sink: &dyn DisplaySink) {
    match event {
        PollEvent::Sample(sample) => match buffer.admit_with_window(sample) {
            Some(window) => sink.on_sample(&sample, &window),
            None => debug!("sample at {:.3} debounced", sample.timestamp),
        },
        PollEvent::FrameError(e) => sink.on_frame_error(&e),
        PollEvent::LinkError(e) => sink.on_link_error(&e),
        PollEvent::Faulted { failures } => {
            warn!("acquisition faulted after {} write failures", failures);
            sink.on_faulted(failures);
        }
    }
}
