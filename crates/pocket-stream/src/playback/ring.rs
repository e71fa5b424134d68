//! Fixed-capacity sample ring owned by the render context
//!
//! `buffered = (write - read) mod capacity` and the safety margin keeps
//! `buffered` strictly below capacity, so the cursors never alias.

use crate::config::PlaybackConfig;
use std::time::Instant;

/// Backpressure report sent to the producer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityUpdate {
    pub buffered: usize,
    /// Samples the producer may push right now
    pub available: usize,
    /// Suggested push size to reach the target level, 0 at or above it
    pub request: usize,
    pub playing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerEvent {
    Capacity(CapacityUpdate),
    PlaybackStarted { buffered: usize, at: Instant },
    Underrun { buffered: usize, needed: usize },
    PlaybackComplete,
    /// The producer pushed more than advertised; oldest samples were dropped
    Overflow {
        dropped: usize,
        incoming: usize,
        available: usize,
    },
}

#[derive(Debug)]
pub struct PlaybackRing {
    buffer: Box<[f32]>,
    read: usize,
    write: usize,
    margin: usize,
    min_buffer: usize,
    target_buffer: usize,
    report_interval: u32,
    render_calls: u32,
    playing: bool,
    stream_ended: bool,
    complete_reported: bool,
}

impl PlaybackRing {
    pub fn new(config: &PlaybackConfig, sample_rate: u32) -> Self {
        let capacity = config.capacity(sample_rate).max(config.safety_margin + 1);
        Self {
            buffer: vec![0.0; capacity].into_boxed_slice(),
            read: 0,
            write: 0,
            margin: config.safety_margin.max(1),
            min_buffer: config.min_buffer_samples(sample_rate).max(1),
            target_buffer: config.target_buffer_samples(sample_rate),
            report_interval: config.report_interval.max(1),
            render_calls: 0,
            playing: false,
            stream_ended: false,
            complete_reported: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffered(&self) -> usize {
        let cap = self.buffer.len();
        (self.write + cap - self.read) % cap
    }

    /// Largest amount that can ever be buffered
    pub fn max_buffered(&self) -> usize {
        self.buffer.len() - self.margin
    }

    pub fn available(&self) -> usize {
        self.max_buffered().saturating_sub(self.buffered())
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn capacity_update(&self) -> CapacityUpdate {
        let buffered = self.buffered();
        let available = self.available();
        let request = if buffered < self.target_buffer {
            available.min(self.target_buffer - buffered)
        } else {
            0
        };
        CapacityUpdate {
            buffered,
            available,
            request,
            playing: self.playing,
        }
    }

    /// Append samples, dropping the oldest buffered audio if the push
    /// exceeds the advertised space.
    pub fn push(&mut self, samples: &[f32], emit: &mut dyn FnMut(PlayerEvent)) {
        let incoming = samples.len();
        let samples = if incoming > self.max_buffered() {
            &samples[incoming - self.max_buffered()..]
        } else {
            samples
        };

        let available = self.available();
        let overflow = samples.len().saturating_sub(available);
        if overflow > 0 {
            self.read = (self.read + overflow) % self.buffer.len();
        }
        let dropped = overflow + (incoming - samples.len());
        if dropped > 0 {
            emit(PlayerEvent::Overflow {
                dropped,
                incoming,
                available,
            });
        }

        let cap = self.buffer.len();
        let first = samples.len().min(cap - self.write);
        self.buffer[self.write..self.write + first].copy_from_slice(&samples[..first]);
        let rest = samples.len() - first;
        self.buffer[..rest].copy_from_slice(&samples[first..]);
        self.write = (self.write + samples.len()) % cap;

        let buffered = self.buffered();
        if !self.playing && buffered >= self.min_buffer {
            self.playing = true;
            emit(PlayerEvent::PlaybackStarted {
                buffered,
                at: Instant::now(),
            });
        }
        emit(PlayerEvent::Capacity(self.capacity_update()));
    }

    /// Fill `out` from the ring. Never blocks and never allocates.
    pub fn render(&mut self, out: &mut [f32], emit: &mut dyn FnMut(PlayerEvent)) {
        self.render_calls = self.render_calls.wrapping_add(1);
        if self.render_calls % self.report_interval == 0 {
            emit(PlayerEvent::Capacity(self.capacity_update()));
        }

        if !self.playing {
            out.fill(0.0);
            return;
        }

        let needed = out.len();
        let buffered = self.buffered();
        if buffered >= needed {
            self.read_into(out);
            if self.stream_ended && buffered == needed {
                self.finish(emit);
            }
            return;
        }

        self.read_into(&mut out[..buffered]);
        out[buffered..].fill(0.0);

        if self.stream_ended {
            self.finish(emit);
        } else {
            emit(PlayerEvent::Underrun { buffered, needed });
            emit(PlayerEvent::Capacity(self.capacity_update()));
        }
    }

    /// No more audio will arrive for this utterance.
    ///
    /// Audio still below the prebuffer threshold starts playing so it can
    /// drain; an empty ring completes immediately.
    pub fn mark_stream_ended(&mut self, emit: &mut dyn FnMut(PlayerEvent)) {
        self.stream_ended = true;
        if self.playing {
            return;
        }
        let buffered = self.buffered();
        if buffered > 0 {
            self.playing = true;
            emit(PlayerEvent::PlaybackStarted {
                buffered,
                at: Instant::now(),
            });
        } else {
            self.finish(emit);
        }
    }

    pub fn reset(&mut self, emit: &mut dyn FnMut(PlayerEvent)) {
        self.read = 0;
        self.write = 0;
        self.buffer.fill(0.0);
        self.playing = false;
        self.stream_ended = false;
        self.complete_reported = false;
        emit(PlayerEvent::Capacity(self.capacity_update()));
    }

    fn finish(&mut self, emit: &mut dyn FnMut(PlayerEvent)) {
        if !self.complete_reported {
            self.complete_reported = true;
            emit(PlayerEvent::PlaybackComplete);
        }
        self.playing = false;
        self.stream_ended = false;
    }

    fn read_into(&mut self, out: &mut [f32]) {
        let cap = self.buffer.len();
        let first = out.len().min(cap - self.read);
        out[..first].copy_from_slice(&self.buffer[self.read..self.read + first]);
        let rest = out.len() - first;
        out[first..].copy_from_slice(&self.buffer[..rest]);
        self.read = (self.read + out.len()) % cap;
    }
}
