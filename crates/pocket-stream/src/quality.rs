//! Adaptive quality control
//!
//! Watches how fast audio segments arrive relative to their duration and
//! drops refinement to a single step the first time synthesis falls behind
//! real time. The reduction is one-way for the rest of the utterance.

use crate::engine::SegmentMetrics;
use std::time::{Duration, Instant};
use tracing::info;

/// Refinement step count used once quality has been reduced
pub const MIN_QUALITY: usize = 1;

const EMA_HISTORY: f64 = 0.8;
const EMA_SAMPLE: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityCommand {
    Reduce { steps: usize },
}

/// Real-time factors derived from one segment
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RtfSample {
    /// Time to first byte, set on the first segment only
    pub ttfb: Option<Duration>,
    /// duration / gap since the previous segment
    pub arrival: Option<f64>,
    /// duration / generation time, falling back to arrival
    pub instantaneous: Option<f64>,
    /// Moving average for display
    pub average: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Observation {
    pub rtf: RtfSample,
    pub command: Option<QualityCommand>,
}

#[derive(Debug)]
pub struct QualityController {
    threshold: f64,
    average: f64,
    started_at: Option<Instant>,
    last_arrival: Option<Instant>,
    skip_next: bool,
    reduced: bool,
}

impl QualityController {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold: threshold as f64,
            average: 0.0,
            started_at: None,
            last_arrival: None,
            skip_next: false,
            reduced: false,
        }
    }

    /// Reset for a new utterance. Quality returns to maximum.
    pub fn start_utterance(&mut self, now: Instant) {
        self.average = 0.0;
        self.started_at = Some(now);
        self.last_arrival = None;
        self.skip_next = false;
        self.reduced = false;
    }

    pub fn reduced(&self) -> bool {
        self.reduced
    }

    pub fn average(&self) -> f64 {
        self.average
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn observe(&mut self, metrics: &SegmentMetrics, now: Instant) -> Observation {
        if metrics.is_silence {
            self.skip_next = true;
            return Observation::default();
        }

        let mut rtf = RtfSample::default();
        if metrics.is_first {
            rtf.ttfb = self.started_at.map(|start| now.saturating_duration_since(start));
            self.last_arrival = Some(now);
        } else if self.skip_next {
            self.skip_next = false;
            self.last_arrival = Some(now);
        } else if let Some(last) = self.last_arrival.replace(now) {
            let gap = now.saturating_duration_since(last).as_secs_f64();
            if gap > 0.0 {
                rtf.arrival = Some(metrics.duration_sec / gap);
            }
        }

        rtf.instantaneous = if metrics.gen_time_sec > 0.0 {
            Some(metrics.duration_sec / metrics.gen_time_sec)
        } else {
            rtf.arrival
        };

        if let Some(inst) = rtf.instantaneous.filter(|v| *v > 0.0) {
            self.average = if self.average == 0.0 {
                inst
            } else {
                self.average * EMA_HISTORY + inst * EMA_SAMPLE
            };
        }
        rtf.average = self.average;

        let mut command = None;
        if let Some(arrival) = rtf.arrival
            && !self.reduced
            && arrival < self.threshold
        {
            self.reduced = true;
            info!(arrival_rtf = arrival, steps = MIN_QUALITY, "synthesis behind real time, reducing quality");
            command = Some(QualityCommand::Reduce { steps: MIN_QUALITY });
        }

        Observation { rtf, command }
    }
}
