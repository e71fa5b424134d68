//! Producer-side backpressure discipline
//!
//! Segments wait in a local queue and at most one push is issued per
//! capacity update. After a push the advertised space is treated as spent
//! until the consumer reports again.

use super::consumer::PlayerCommand;
use super::ring::{CapacityUpdate, PlayerEvent};
use crossbeam_channel::Sender;
use std::collections::VecDeque;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct PlaybackProducer {
    commands: Sender<PlayerCommand>,
    pending: VecDeque<Vec<f32>>,
    available: usize,
    has_capacity: bool,
    pending_stream_end: bool,
    min_partial: usize,
    underruns: u64,
    disconnected: bool,
}

impl PlaybackProducer {
    pub fn new(commands: Sender<PlayerCommand>, min_partial: usize) -> Self {
        Self {
            commands,
            pending: VecDeque::new(),
            available: 0,
            has_capacity: false,
            pending_stream_end: false,
            min_partial,
            underruns: 0,
            disconnected: false,
        }
    }

    /// Queue a segment for playback.
    pub fn enqueue(&mut self, samples: Vec<f32>) {
        if samples.is_empty() {
            return;
        }
        self.pending.push_back(samples);
        if self.has_capacity && self.available > 0 {
            self.pump();
        }
    }

    pub fn handle_event(&mut self, event: &PlayerEvent) {
        match event {
            PlayerEvent::Capacity(update) => self.on_capacity(update),
            PlayerEvent::Underrun { .. } => {
                self.underruns += 1;
                self.pump();
            }
            _ => {}
        }
    }

    /// Forward end-of-stream once everything queued has been pushed.
    pub fn notify_stream_ended(&mut self) {
        if self.pending.is_empty() {
            self.send(PlayerCommand::StreamEnded);
        } else {
            self.pending_stream_end = true;
        }
    }

    /// Drop queued audio and clear the player.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.pending_stream_end = false;
        self.available = 0;
        self.underruns = 0;
        self.send(PlayerCommand::Reset);
    }

    pub fn pending_samples(&self) -> usize {
        self.pending.iter().map(Vec::len).sum()
    }

    pub fn underruns(&self) -> u64 {
        self.underruns
    }

    /// Every report refreshes the advertised space and may release the next
    /// queued segment. `request` is only a refill hint, so a ring already
    /// above its target level still accepts the next segment if it fits.
    fn on_capacity(&mut self, update: &CapacityUpdate) {
        self.available = update.available;
        self.has_capacity = true;
        if self.available > 0 && !self.pending.is_empty() {
            self.pump();
        }
    }

    fn pump(&mut self) {
        if self.available == 0 {
            return;
        }
        let Some(front) = self.pending.front_mut() else {
            return;
        };

        if front.len() <= self.available {
            if let Some(segment) = self.pending.pop_front() {
                self.send(PlayerCommand::Audio(segment));
            }
            self.available = 0;
        } else if self.available > self.min_partial {
            let rest = front.split_off(self.available);
            let prefix = std::mem::replace(front, rest);
            debug!(pushed = prefix.len(), remaining = front.len(), "partial push");
            self.send(PlayerCommand::Audio(prefix));
            self.available = 0;
        } else {
            return;
        }

        if self.pending.is_empty() && self.pending_stream_end {
            self.pending_stream_end = false;
            self.send(PlayerCommand::StreamEnded);
        }
    }

    fn send(&mut self, command: PlayerCommand) {
        if self.commands.send(command).is_err() && !self.disconnected {
            self.disconnected = true;
            warn!("player disconnected, dropping audio");
        }
    }
}
