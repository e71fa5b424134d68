//! Render-side half of the player
//!
//! The consumer owns the ring outright. Audio and control reach it as
//! messages that are drained at the start of every render call, and
//! events leave through a bounded channel with `try_send`, so the render
//! path never waits on the producer.

use super::ring::{PlaybackRing, PlayerEvent};
use crate::config::PlaybackConfig;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, unbounded};

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCommand {
    Audio(Vec<f32>),
    StreamEnded,
    Reset,
}

/// Producer-side endpoints of a player
#[derive(Debug, Clone)]
pub struct PlayerHandle {
    pub commands: Sender<PlayerCommand>,
    pub events: Receiver<PlayerEvent>,
}

pub struct PlaybackConsumer {
    ring: PlaybackRing,
    commands: Receiver<PlayerCommand>,
    events: Sender<PlayerEvent>,
    dropped_events: u64,
}

/// Create a connected player. The initial capacity report is already queued.
pub fn playback_channel(config: &PlaybackConfig, sample_rate: u32) -> (PlayerHandle, PlaybackConsumer) {
    let (command_tx, command_rx) = unbounded();
    let (event_tx, event_rx) = bounded(config.event_queue.max(1));
    let ring = PlaybackRing::new(config, sample_rate);
    let _ = event_tx.try_send(PlayerEvent::Capacity(ring.capacity_update()));

    let handle = PlayerHandle {
        commands: command_tx,
        events: event_rx,
    };
    let consumer = PlaybackConsumer {
        ring,
        commands: command_rx,
        events: event_tx,
        dropped_events: 0,
    };
    (handle, consumer)
}

impl PlaybackConsumer {
    /// Called by the output device for every block.
    pub fn render(&mut self, out: &mut [f32]) {
        let events = &self.events;
        let dropped = &mut self.dropped_events;
        let mut emit = |event: PlayerEvent| {
            if let Err(TrySendError::Full(_)) = events.try_send(event) {
                *dropped += 1;
            }
        };

        while let Ok(command) = self.commands.try_recv() {
            match command {
                PlayerCommand::Audio(samples) => self.ring.push(&samples, &mut emit),
                PlayerCommand::StreamEnded => self.ring.mark_stream_ended(&mut emit),
                PlayerCommand::Reset => self.ring.reset(&mut emit),
            }
        }
        self.ring.render(out, &mut emit);
    }

    /// Render an interleaved multi-channel block by duplicating the mono
    /// stream into every channel.
    pub fn render_interleaved(&mut self, out: &mut [f32], channels: usize, scratch: &mut [f32]) {
        let channels = channels.max(1);
        let frames = (out.len() / channels).min(scratch.len());
        self.render(&mut scratch[..frames]);
        for (frame, sample) in out.chunks_mut(channels).zip(&scratch[..frames]) {
            frame.fill(*sample);
        }
        if frames * channels < out.len() {
            out[frames * channels..].fill(0.0);
        }
    }

    pub fn ring(&self) -> &PlaybackRing {
        &self.ring
    }

    /// Events lost because the event queue was full
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PlaybackConfig {
        PlaybackConfig {
            min_buffer_ms: 100,
            capacity_secs: 2,
            safety_margin: 16,
            report_interval: 1000,
            event_queue: 64,
            ..Default::default()
        }
    }

    #[test]
    fn test_initial_capacity_is_queued() {
        let (handle, _consumer) = playback_channel(&config(), 1000);
        match handle.events.try_recv() {
            Ok(PlayerEvent::Capacity(update)) => {
                assert_eq!(update.buffered, 0);
                assert_eq!(update.available, 2000 - 16);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_commands_apply_before_render() -> anyhow::Result<()> {
        let (handle, mut consumer) = playback_channel(&config(), 1000);
        handle.commands.send(PlayerCommand::Audio(vec![0.5; 150]))?;
        let mut out = [0.0f32; 100];
        consumer.render(&mut out);
        assert!(out.iter().all(|v| *v == 0.5));
        assert_eq!(consumer.ring().buffered(), 50);

        let events: Vec<_> = handle.events.try_iter().collect();
        assert!(events.iter().any(|e| matches!(e, PlayerEvent::PlaybackStarted { .. })));
        Ok(())
    }

    #[test]
    fn test_full_event_queue_never_blocks() -> anyhow::Result<()> {
        let cfg = PlaybackConfig {
            event_queue: 2,
            ..config()
        };
        let (handle, mut consumer) = playback_channel(&cfg, 1000);
        handle.commands.send(PlayerCommand::Audio(vec![0.1; 120]))?;
        let mut out = [0.0f32; 1000];
        for _ in 0..10 {
            consumer.render(&mut out);
        }
        assert!(consumer.dropped_events() > 0);
        Ok(())
    }

    #[test]
    fn test_interleaved_duplicates_channels() -> anyhow::Result<()> {
        let (handle, mut consumer) = playback_channel(&config(), 1000);
        handle.commands.send(PlayerCommand::Audio(vec![0.25; 200]))?;
        let mut out = [0.0f32; 8];
        let mut scratch = [0.0f32; 4];
        consumer.render_interleaved(&mut out, 2, &mut scratch);
        assert!(out.iter().all(|v| *v == 0.25));
        Ok(())
    }
}
