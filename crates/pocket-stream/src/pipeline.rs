//! Playback pipeline
//!
//! Runs the coordinator on its own thread, between a spawned [`Session`]
//! and a player. Session segments go through the [`StreamCoordinator`],
//! player events feed its backpressure queue, quality reductions go back to
//! the session, and everything observable is republished as
//! [`PipelineEvent`]s.
//!
//! [`Session`]: crate::session::Session

use crate::config::PlaybackConfig;
use crate::coordinator::{PlaybackMode, StreamCoordinator};
use crate::playback::{PlayerEvent, PlayerHandle};
use crate::quality::QualityCommand;
use crate::session::{SessionEvent, SessionHandle, SessionRequest, SessionState};
use crossbeam_channel::{Receiver, Sender, never, select, unbounded};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Status { state: SessionState, message: String },
    VoicesLoaded { voices: Vec<String>, default_voice: Option<String> },
    GenerationStarted,
    /// Time from the speak request to the first audio segment
    FirstByte { ttfb: Duration },
    Rtf {
        arrival: Option<f64>,
        instantaneous: Option<f64>,
        average: f64,
    },
    QualityReduced { steps: usize },
    QualityChanged { steps: usize },
    ModeChanged(PlaybackMode),
    /// Audible output began `latency` after the speak request
    PlaybackStarted { buffered: usize, latency: Duration },
    Underrun { buffered: usize, needed: usize, count: u64 },
    Overflow { dropped: usize, incoming: usize, available: usize },
    PlaybackComplete,
    VoiceEncoded { id: String },
    VoiceSet { name: String },
    StreamEnded,
    Finished {
        rtfx: f64,
        gen_time: f64,
        total_time: f64,
        audio_seconds: f64,
    },
    Error(String),
}

#[derive(Debug)]
enum PipelineRequest {
    Speak { text: String, voice: Option<String> },
    Stop,
    Session(SessionRequest),
    Shutdown,
}

pub struct Pipeline {
    requests: Sender<PipelineRequest>,
    events: Receiver<PipelineEvent>,
    thread: Option<JoinHandle<()>>,
}

impl Pipeline {
    pub fn start(
        session: SessionHandle,
        player: PlayerHandle,
        config: &PlaybackConfig,
    ) -> std::io::Result<Self> {
        let (request_tx, request_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();
        let coordinator = StreamCoordinator::new(player.commands.clone(), config);
        let runner = Runner {
            session,
            coordinator,
            events: event_tx,
            generating: false,
            requested_at: None,
            underruns: 0,
        };
        let thread = std::thread::Builder::new()
            .name("pocket-stream-coordinator".into())
            .spawn(move || runner.run(request_rx, player.events))?;
        Ok(Self {
            requests: request_tx,
            events: event_rx,
            thread: Some(thread),
        })
    }

    pub fn speak(&self, text: impl Into<String>, voice: Option<String>) {
        self.send(PipelineRequest::Speak {
            text: text.into(),
            voice,
        });
    }

    /// Cancel generation and silence playback.
    pub fn stop(&self) {
        self.send(PipelineRequest::Stop);
    }

    pub fn set_voice(&self, name: impl Into<String>) {
        self.send(PipelineRequest::Session(SessionRequest::SetVoice(name.into())));
    }

    pub fn encode_voice(&self, pcm: Vec<f32>, sample_rate: u32) {
        self.send(PipelineRequest::Session(SessionRequest::EncodeVoice { pcm, sample_rate }));
    }

    pub fn set_quality(&self, steps: usize) {
        self.send(PipelineRequest::Session(SessionRequest::SetQuality(steps)));
    }

    pub fn events(&self) -> &Receiver<PipelineEvent> {
        &self.events
    }

    pub fn shutdown(mut self) {
        self.close();
    }

    fn send(&self, request: PipelineRequest) {
        if self.requests.send(request).is_err() {
            debug!("pipeline already shut down");
        }
    }

    fn close(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.requests.send(PipelineRequest::Shutdown);
            let _ = thread.join();
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.close();
    }
}

struct Runner {
    session: SessionHandle,
    coordinator: StreamCoordinator,
    events: Sender<PipelineEvent>,
    generating: bool,
    requested_at: Option<Instant>,
    underruns: u64,
}

impl Runner {
    fn emit(&self, event: PipelineEvent) {
        let _ = self.events.send(event);
    }

    fn run(mut self, requests: Receiver<PipelineRequest>, mut player_events: Receiver<PlayerEvent>) {
        let mut session_events = self.session.events().clone();
        loop {
            let mut shutdown = false;
            let mut session_closed = false;
            let mut player_closed = false;
            select! {
                recv(requests) -> msg => match msg {
                    Ok(PipelineRequest::Shutdown) | Err(_) => shutdown = true,
                    Ok(request) => self.on_request(request),
                },
                recv(session_events) -> msg => match msg {
                    Ok(event) => self.on_session_event(event),
                    Err(_) => session_closed = true,
                },
                recv(player_events) -> msg => match msg {
                    Ok(event) => self.on_player_event(event),
                    Err(_) => player_closed = true,
                },
            }
            if shutdown {
                break;
            }
            if session_closed {
                self.emit(PipelineEvent::Error("session worker exited".into()));
                session_events = never();
            }
            if player_closed {
                warn!("player disconnected");
                player_events = never();
            }
        }
        self.coordinator.cancel();
    }

    fn on_request(&mut self, request: PipelineRequest) {
        match request {
            PipelineRequest::Speak { text, voice } => {
                if self.generating {
                    self.emit(PipelineEvent::Error(
                        crate::SynthesisError::Busy.to_string(),
                    ));
                    return;
                }
                let now = Instant::now();
                self.generating = true;
                self.requested_at = Some(now);
                self.underruns = 0;
                self.coordinator.begin(now);
                self.session.generate(text, voice);
            }
            PipelineRequest::Stop => {
                info!("stop requested");
                self.session.stop();
                self.coordinator.cancel();
            }
            PipelineRequest::Session(request) => {
                self.session.send(request);
            }
            PipelineRequest::Shutdown => {}
        }
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Segment(segment) => {
                let report = self.coordinator.on_segment(segment, Instant::now());
                let rtf = report.observation.rtf;
                if let Some(ttfb) = rtf.ttfb {
                    self.emit(PipelineEvent::FirstByte { ttfb });
                }
                if rtf.arrival.is_some() || rtf.instantaneous.is_some() {
                    self.emit(PipelineEvent::Rtf {
                        arrival: rtf.arrival,
                        instantaneous: rtf.instantaneous,
                        average: rtf.average,
                    });
                }
                if let Some(QualityCommand::Reduce { steps }) = report.observation.command {
                    self.session.send(SessionRequest::SetQuality(steps));
                    self.emit(PipelineEvent::QualityReduced { steps });
                }
                if let Some(mode) = report.mode_change {
                    self.emit(PipelineEvent::ModeChanged(mode));
                }
            }
            SessionEvent::StreamEnded => {
                self.generating = false;
                if let Some(mode) = self.coordinator.on_stream_end() {
                    self.emit(PipelineEvent::ModeChanged(mode));
                }
                self.emit(PipelineEvent::StreamEnded);
            }
            SessionEvent::Status { state, message } => {
                self.emit(PipelineEvent::Status { state, message })
            }
            SessionEvent::VoicesLoaded {
                voices,
                default_voice,
            } => self.emit(PipelineEvent::VoicesLoaded {
                voices,
                default_voice,
            }),
            SessionEvent::GenerationStarted => self.emit(PipelineEvent::GenerationStarted),
            SessionEvent::VoiceEncoded { id } => self.emit(PipelineEvent::VoiceEncoded { id }),
            SessionEvent::VoiceSet { name } => self.emit(PipelineEvent::VoiceSet { name }),
            SessionEvent::QualityChanged { steps } => {
                self.emit(PipelineEvent::QualityChanged { steps })
            }
            SessionEvent::Error(message) => self.emit(PipelineEvent::Error(message)),
            SessionEvent::Finished {
                rtfx,
                gen_time,
                total_time,
                audio_seconds,
            } => self.emit(PipelineEvent::Finished {
                rtfx,
                gen_time,
                total_time,
                audio_seconds,
            }),
        }
    }

    fn on_player_event(&mut self, event: PlayerEvent) {
        self.coordinator.handle_player_event(&event);
        match event {
            PlayerEvent::PlaybackStarted { buffered, at } => {
                let latency = self
                    .requested_at
                    .map(|start| at.saturating_duration_since(start))
                    .unwrap_or_default();
                info!(buffered, latency_ms = latency.as_millis() as u64, "playback started");
                self.emit(PipelineEvent::PlaybackStarted { buffered, latency });
            }
            PlayerEvent::Underrun { buffered, needed } => {
                self.underruns += 1;
                debug!(buffered, needed, count = self.underruns, "underrun");
                self.emit(PipelineEvent::Underrun {
                    buffered,
                    needed,
                    count: self.underruns,
                });
            }
            PlayerEvent::Overflow {
                dropped,
                incoming,
                available,
            } => {
                warn!(dropped, incoming, available, "player overflow, dropped oldest audio");
                self.emit(PipelineEvent::Overflow {
                    dropped,
                    incoming,
                    available,
                });
            }
            PlayerEvent::PlaybackComplete => {
                info!(underruns = self.underruns, "playback complete");
                self.emit(PipelineEvent::PlaybackComplete);
            }
            PlayerEvent::Capacity(_) => {}
        }
    }
}
