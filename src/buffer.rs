//! Time-windowed store of admitted samples.
//!
//! The buffer decouples arrival rate from display rate: [`SampleBuffer::admit`]
//! debounces incoming samples by a minimum spacing and
//! [`SampleBuffer::current_window`] hands out the trailing span the display
//! shows. It also records every admitted sample since the last clear for
//! export. All state sits behind one mutex so the poll thread can admit while
//! display and export threads read, and a clear can never split the window
//! from the history.

use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::sample::Sample;

/// Trailing span shown by the display, in seconds.
pub const DEFAULT_WINDOW_SPAN: f64 = 10.0;

/// Minimum gap between two admitted samples, in seconds.
pub const DEFAULT_MIN_SPACING: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub window_span: f64,
    pub min_spacing: f64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            window_span: DEFAULT_WINDOW_SPAN,
            min_spacing: DEFAULT_MIN_SPACING,
        }
    }
}

#[derive(Debug, Default)]
struct BufferState {
    samples: Vec<Sample>,
    history: Vec<Sample>,
    last_admitted: Option<Sample>,
}

#[derive(Debug, Default)]
pub struct SampleBuffer {
    config: BufferConfig,
    state: Mutex<BufferState>,
}

impl SampleBuffer {
    pub fn new(config: BufferConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BufferState::default()),
        }
    }

    pub fn config(&self) -> BufferConfig {
        self.config
    }

    /// Retain `sample` unless it arrives closer than `min_spacing` to the last
    /// admitted one. Returns whether it was retained.
    ///
    /// Samples older than the last admitted one are always rejected, which
    /// keeps the stored timestamps non-decreasing.
    pub fn admit(&self, sample: Sample) -> bool {
        let mut state = self.lock();
        self.admit_locked(&mut state, sample)
    }

    /// Like [`admit`](Self::admit), but also returns the display window taken
    /// under the same lock, so it always ends with `sample`.
    pub fn admit_with_window(&self, sample: Sample) -> Option<Vec<Sample>> {
        let mut state = self.lock();
        if self.admit_locked(&mut state, sample) {
            Some(self.window_of(&state))
        } else {
            None
        }
    }

    /// Admitted samples within `window_span` of the newest one, oldest first.
    pub fn current_window(&self) -> Vec<Sample> {
        let state = self.lock();
        self.window_of(&state)
    }

    /// Every sample admitted since the last clear, oldest first.
    pub fn history(&self) -> Vec<Sample> {
        self.lock().history.clone()
    }

    /// The most recently admitted sample.
    pub fn latest(&self) -> Option<Sample> {
        self.lock().last_admitted
    }

    /// Drop every sample, the history included, and forget the debounce reference.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.samples.clear();
        state.history.clear();
        state.last_admitted = None;
    }

    /// Number of samples currently held, including stale ones not yet pruned.
    pub fn retained(&self) -> usize {
        self.lock().samples.len()
    }

    fn admit_locked(&self, state: &mut BufferState, sample: Sample) -> bool {
        if let Some(last) = state.last_admitted {
            if sample.timestamp - last.timestamp < self.config.min_spacing
                || sample.timestamp < last.timestamp
            {
                return false;
            }
        }

        state.samples.push(sample);
        state.history.push(sample);
        state.last_admitted = Some(sample);
        self.prune(&mut state.samples, sample.timestamp);
        true
    }

    fn window_of(&self, state: &BufferState) -> Vec<Sample> {
        let Some(latest) = state.last_admitted else {
            return Vec::new();
        };
        let cutoff = latest.timestamp - self.config.window_span;
        let start = state.samples.partition_point(|s| s.timestamp < cutoff);
        state.samples[start..].to_vec()
    }

    /// Stale samples are only dropped once they cover another full window span,
    /// so steady-state admission does not shift the vector on every call.
    fn prune(&self, samples: &mut Vec<Sample>, latest: f64) {
        let span = self.config.window_span;
        let stale_before = latest - 2.0 * span;
        if samples.first().is_some_and(|s| s.timestamp < stale_before) {
            let cutoff = latest - span;
            let keep_from = samples.partition_point(|s| s.timestamp < cutoff);
            samples.drain(..keep_from);
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
