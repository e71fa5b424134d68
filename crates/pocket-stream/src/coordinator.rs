//! Stream coordinator
//!
//! Routes engine segments to the player. Each utterance starts in
//! [`PlaybackMode::Pending`] and settles on streaming as soon as a segment
//! is known to be generated faster than real time, or on buffering the
//! whole utterance when synthesis stays slow even at reduced quality.

use crate::audio::{fade_in, fade_out};
use crate::config::PlaybackConfig;
use crate::engine::AudioSegment;
use crate::playback::{PlaybackProducer, PlayerCommand, PlayerEvent};
use crate::quality::{Observation, QualityController};
use crossbeam_channel::Sender;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    Pending,
    Stream,
    BufferAll,
}

impl std::fmt::Display for PlaybackMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Stream => "stream",
            Self::BufferAll => "buffer_all",
        };
        f.write_str(name)
    }
}

/// What happened while routing one segment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentReport {
    pub observation: Observation,
    pub mode_change: Option<PlaybackMode>,
}

pub struct StreamCoordinator {
    producer: PlaybackProducer,
    quality: QualityController,
    mode: PlaybackMode,
    held: Vec<Vec<f32>>,
    fade_samples: usize,
    threshold: f64,
    active: bool,
}

impl StreamCoordinator {
    pub fn new(commands: Sender<PlayerCommand>, config: &PlaybackConfig) -> Self {
        Self {
            producer: PlaybackProducer::new(commands, config.min_partial_push),
            quality: QualityController::new(config.realtime_threshold),
            mode: PlaybackMode::Pending,
            held: Vec::new(),
            fade_samples: config.fade_samples,
            threshold: config.realtime_threshold as f64,
            active: false,
        }
    }

    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn quality(&self) -> &QualityController {
        &self.quality
    }

    pub fn producer(&self) -> &PlaybackProducer {
        &self.producer
    }

    /// Prepare for a new utterance. Anything still queued or playing is dropped.
    pub fn begin(&mut self, now: Instant) {
        self.producer.reset();
        self.quality.start_utterance(now);
        self.mode = PlaybackMode::Pending;
        self.held.clear();
        self.active = true;
    }

    /// Drop queued and playing audio, ignoring segments still in flight.
    pub fn cancel(&mut self) {
        self.producer.reset();
        self.held.clear();
        self.active = false;
    }

    pub fn on_segment(&mut self, segment: AudioSegment, now: Instant) -> SegmentReport {
        let mut report = SegmentReport::default();
        if !self.active {
            return report;
        }

        let metrics = segment.metrics;
        let mut samples = segment.samples;
        if metrics.is_silence {
            self.quality.observe(&metrics, now);
            self.buffer_or_play(samples);
            return report;
        }

        if metrics.is_first || metrics.chunk_start {
            fade_in(&mut samples, self.fade_samples);
        }
        if metrics.is_last {
            fade_out(&mut samples, self.fade_samples);
        }

        report.observation = self.quality.observe(&metrics, now);
        if self.mode == PlaybackMode::Pending {
            let instantaneous = report.observation.rtf.instantaneous;
            if instantaneous.is_some_and(|rtf| rtf >= self.threshold) {
                report.mode_change = Some(self.switch(PlaybackMode::Stream));
            } else if !metrics.is_first
                && self.quality.reduced()
                && instantaneous.unwrap_or(0.0) < self.threshold
            {
                report.mode_change = Some(self.switch(PlaybackMode::BufferAll));
            }
        }

        self.buffer_or_play(samples);
        report
    }

    /// Generation is over. Returns the mode change made on the way out, if any.
    pub fn on_stream_end(&mut self) -> Option<PlaybackMode> {
        if !self.active {
            return None;
        }
        self.active = false;
        let mut change = None;
        if self.mode == PlaybackMode::Pending {
            change = Some(self.switch(PlaybackMode::BufferAll));
        }
        if self.mode == PlaybackMode::BufferAll {
            self.flush_held();
        }
        self.producer.notify_stream_ended();
        change
    }

    pub fn handle_player_event(&mut self, event: &PlayerEvent) {
        self.producer.handle_event(event);
    }

    fn switch(&mut self, mode: PlaybackMode) -> PlaybackMode {
        info!(from = %self.mode, to = %mode, held = self.held.len(), "playback mode");
        self.mode = mode;
        if mode == PlaybackMode::Stream {
            self.flush_held();
        }
        mode
    }

    fn buffer_or_play(&mut self, samples: Vec<f32>) {
        if self.mode == PlaybackMode::Stream {
            self.producer.enqueue(samples);
        } else {
            self.held.push(samples);
        }
    }

    fn flush_held(&mut self) {
        for samples in self.held.drain(..) {
            self.producer.enqueue(samples);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SegmentMetrics;
    use crate::playback::CapacityUpdate;
    use crossbeam_channel::{Receiver, unbounded};
    use std::time::Duration;

    fn setup() -> (StreamCoordinator, Receiver<PlayerCommand>) {
        let (tx, rx) = unbounded();
        (StreamCoordinator::new(tx, &PlaybackConfig::default()), rx)
    }

    /// Stand-in for the capacity report a real player sends after a reset
    fn grant(coordinator: &mut StreamCoordinator) {
        coordinator.handle_player_event(&PlayerEvent::Capacity(CapacityUpdate {
            buffered: 0,
            available: 1_000_000,
            request: 14_400,
            playing: false,
        }));
    }

    fn segment(duration: f64, gen_time: f64, first: bool, last: bool) -> AudioSegment {
        let len = (duration * 24_000.0) as usize;
        AudioSegment {
            samples: vec![1.0; len],
            sample_rate: 24_000,
            chunk_index: 0,
            metrics: SegmentMetrics {
                duration_sec: duration,
                gen_time_sec: gen_time,
                is_first: first,
                is_last: last,
                chunk_start: first,
                is_silence: false,
            },
        }
    }

    fn audio(rx: &Receiver<PlayerCommand>) -> Vec<Vec<f32>> {
        rx.try_iter()
            .filter_map(|c| match c {
                PlayerCommand::Audio(samples) => Some(samples),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_fast_first_segment_streams() {
        let (mut coordinator, rx) = setup();
        let t0 = Instant::now();
        coordinator.begin(t0);
        grant(&mut coordinator);
        let report = coordinator.on_segment(segment(0.24, 0.1, true, false), t0);
        assert_eq!(report.mode_change, Some(PlaybackMode::Stream));

        let pushed = audio(&rx);
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0][0], 0.0, "first segment fades in");
        assert_eq!(pushed[0][480], 1.0);
    }

    #[test]
    fn test_slow_reduced_run_buffers_everything() {
        let (mut coordinator, rx) = setup();
        let t0 = Instant::now();
        coordinator.begin(t0);
        grant(&mut coordinator);

        let r1 = coordinator.on_segment(segment(0.5, 1.0, true, false), t0);
        assert_eq!(r1.mode_change, None);
        let r2 = coordinator.on_segment(segment(0.5, 1.0, false, false), t0 + Duration::from_secs(1));
        assert!(r2.observation.command.is_some());
        assert_eq!(r2.mode_change, Some(PlaybackMode::BufferAll));
        coordinator.on_segment(segment(0.5, 1.0, false, true), t0 + Duration::from_secs(2));
        assert!(audio(&rx).is_empty());

        assert_eq!(coordinator.on_stream_end(), None);
        let commands: Vec<_> = rx.try_iter().collect();
        assert_eq!(commands.len(), 1, "one push, then wait for capacity");

        // the remaining held segments drain on later capacity updates
        for _ in 0..3 {
            grant(&mut coordinator);
        }
        let commands: Vec<_> = rx.try_iter().collect();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[2], PlayerCommand::StreamEnded);
    }

    #[test]
    fn test_stream_end_while_pending_buffers_all() {
        let (mut coordinator, rx) = setup();
        let t0 = Instant::now();
        coordinator.begin(t0);
        grant(&mut coordinator);
        let _ = rx.try_iter().count();

        // no generation time and no previous arrival: instantaneous rtf unknown
        coordinator.on_segment(segment(0.2, 0.0, true, true), t0);
        assert_eq!(coordinator.mode(), PlaybackMode::Pending);
        assert_eq!(coordinator.on_stream_end(), Some(PlaybackMode::BufferAll));

        let commands: Vec<_> = rx.try_iter().collect();
        assert!(matches!(commands[0], PlayerCommand::Audio(_)));
        assert_eq!(commands[1], PlayerCommand::StreamEnded);
    }

    #[test]
    fn test_silence_is_not_faded_or_measured() {
        let (mut coordinator, rx) = setup();
        let t0 = Instant::now();
        coordinator.begin(t0);
        grant(&mut coordinator);
        coordinator.on_segment(segment(0.2, 0.05, true, false), t0);
        let gap = AudioSegment::silence(6000, 24_000, 0);
        let report = coordinator.on_segment(gap, t0 + Duration::from_secs(5));
        assert_eq!(report, SegmentReport::default());
        let pushed = audio(&rx);
        assert_eq!(pushed.len(), 1);
    }

    #[test]
    fn test_cancel_ignores_late_segments() {
        let (mut coordinator, rx) = setup();
        let t0 = Instant::now();
        coordinator.begin(t0);
        grant(&mut coordinator);
        coordinator.cancel();
        let _ = rx.try_iter().count();
        coordinator.on_segment(segment(0.2, 0.05, true, false), t0);
        assert!(audio(&rx).is_empty());
        assert_eq!(coordinator.on_stream_end(), None);
    }

    #[test]
    fn test_last_segment_fades_out() {
        let (mut coordinator, rx) = setup();
        let t0 = Instant::now();
        coordinator.begin(t0);
        grant(&mut coordinator);
        coordinator.on_segment(segment(0.1, 0.01, true, false), t0);
        let mut last = segment(0.1, 0.01, false, true);
        last.metrics.chunk_start = false;
        coordinator.on_segment(last, t0 + Duration::from_millis(50));
        grant(&mut coordinator);
        let pushed = audio(&rx);
        let tail = pushed.last().map(|s| s[s.len() - 1]).unwrap_or(1.0);
        assert!(tail < 0.01);
        assert_eq!(pushed.last().map(|s| s[0]), Some(1.0));
    }

    #[test]
    fn test_buffer_all_plays_back_to_back_at_24khz() {
        const BLOCK: usize = 480;
        const SEGMENT: usize = 23_040;
        let config = PlaybackConfig::default();
        let (player, mut consumer) = crate::playback::playback_channel(&config, 24_000);
        let mut coordinator = StreamCoordinator::new(player.commands.clone(), &config);
        let relay = |coordinator: &mut StreamCoordinator, events: &mut Vec<PlayerEvent>| {
            for event in player.events.try_iter() {
                coordinator.handle_player_event(&event);
                events.push(event);
            }
        };
        let mut events = Vec::new();

        let t0 = Instant::now();
        coordinator.begin(t0);
        relay(&mut coordinator, &mut events);

        // every segment takes twice its duration to generate
        for i in 0..5 {
            let mut segment = segment(0.96, 1.92, i == 0, i == 4);
            segment.metrics.chunk_start = i == 0;
            segment.samples = vec![1.0; SEGMENT];
            let at = t0 + Duration::from_secs_f64(1.92 * (i + 1) as f64);
            coordinator.on_segment(segment, at);
        }
        assert_eq!(coordinator.mode(), PlaybackMode::BufferAll);
        coordinator.on_stream_end();

        let mut out = vec![0.0f32; BLOCK];
        let mut rendered = 0;
        while !events.contains(&PlayerEvent::PlaybackComplete) && rendered < 10 * 5 * SEGMENT {
            consumer.render(&mut out);
            rendered += BLOCK;
            relay(&mut coordinator, &mut events);
        }

        let underruns = events
            .iter()
            .filter(|e| matches!(e, PlayerEvent::Underrun { .. }))
            .count();
        assert_eq!(underruns, 0);
        assert_eq!(rendered, 5 * SEGMENT);
    }
}
