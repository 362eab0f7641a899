//! Serial temperature sensor acquisition.
//!
//! This crate polls a temperature sensor over a serial link with a fixed
//! request/reply protocol, decodes each reply into a [`Sample`], and keeps a
//! time-windowed [`SampleBuffer`] that a display can read at its own pace.
//!
//! # Pipeline
//!
//! 1. [`AcquisitionController`] opens a [`PortSession`] and starts the
//!    [`PollScheduler`].
//! 2. Every poll period the scheduler writes the request frame, collects bytes
//!    for a short read deadline and decodes them with [`FrameCodec`].
//! 3. Decoded samples are debounced into the [`SampleBuffer`]; admitted ones are
//!    pushed to the [`DisplaySink`] together with the current display window.
//!
//! # Example
//! ```ignore
//! let (sink, events) = ChannelSink::new();
//! let mut controller = AcquisitionController::new(AcquisitionConfig::default(), Arc::new(sink))?;
//! controller.start_session(&PortConfig::new("/dev/ttyUSB0", 9600))?;
//! for event in events.iter().take(10) {
//!     println!("{event:?}");
//! }
//! controller.stop_session();
//! ```

pub mod buffer;
pub mod codec;
pub mod config;
pub mod controller;
pub mod errors;
pub mod export;
pub mod logging;
pub mod mock;
pub mod port;
pub mod sample;
pub mod scheduler;

pub use buffer::{BufferConfig, SampleBuffer};
pub use codec::FrameCodec;
pub use config::AcquisitionConfig;
pub use controller::{AcquisitionController, ChannelSink, DisplayEvent, DisplaySink, SessionStatus};
pub use errors::*;
pub use port::{available_ports, Parity, PortConfig, PortSession, Transport};
pub use sample::{Sample, SessionClock};
pub use scheduler::{PollEvent, PollScheduler, SchedulerState, SharedPort};
