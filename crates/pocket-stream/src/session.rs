//! Synthesis session
//!
//! A `Session` owns everything one client needs to synthesize: the model
//! ports, the tokenizer, the voice bank and the current voice. It can be
//! driven synchronously with [`Session::synthesize`] or moved onto a worker
//! thread with [`Session::spawn`], which speaks typed messages in both
//! directions.

use crate::config::GenerationConfig;
use crate::engine::{AudioSegment, Control, GenerationEngine, RunSummary};
use crate::error::{Result, SynthesisError};
use crate::ports::{ModelPorts, VoiceEncoder};
use crate::text::{TextChunk, Tokenizer, prepare_chunks};
use crate::voice::VoiceBank;
use candle_core::Tensor;
use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Loading,
    Ready,
    Generating,
    Error,
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionRequest {
    Generate { text: String, voice: Option<String> },
    /// Mono reference audio at `sample_rate`
    EncodeVoice { pcm: Vec<f32>, sample_rate: u32 },
    SetVoice(String),
    SetQuality(usize),
    Stop,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Status { state: SessionState, message: String },
    VoicesLoaded { voices: Vec<String>, default_voice: Option<String> },
    GenerationStarted,
    Segment(AudioSegment),
    VoiceEncoded { id: String },
    VoiceSet { name: String },
    QualityChanged { steps: usize },
    Error(String),
    StreamEnded,
    Finished {
        rtfx: f64,
        gen_time: f64,
        total_time: f64,
        audio_seconds: f64,
    },
}

impl SessionEvent {
    fn status(state: SessionState, message: impl Into<String>) -> Self {
        Self::Status {
            state,
            message: message.into(),
        }
    }

    fn finished(summary: &RunSummary) -> Self {
        Self::Finished {
            rtfx: summary.rtfx,
            gen_time: summary.gen_time,
            total_time: summary.total_time,
            audio_seconds: summary.audio_seconds,
        }
    }
}

pub struct Session {
    engine: GenerationEngine,
    tokenizer: Arc<dyn Tokenizer>,
    voice_encoder: Option<Arc<dyn VoiceEncoder>>,
    voices: VoiceBank,
    current_voice: Option<String>,
}

impl Session {
    pub fn new(
        ports: ModelPorts,
        tokenizer: Arc<dyn Tokenizer>,
        voices: VoiceBank,
        config: GenerationConfig,
    ) -> Self {
        let voice_encoder = ports.voice_encoder.clone();
        let current_voice = voices.default_voice().map(str::to_string);
        Self {
            engine: GenerationEngine::new(ports, tokenizer.clone(), config),
            tokenizer,
            voice_encoder,
            voices,
            current_voice,
        }
    }

    pub fn config(&self) -> &GenerationConfig {
        self.engine.config()
    }

    pub fn voices(&self) -> &VoiceBank {
        &self.voices
    }

    pub fn current_voice(&self) -> Option<&str> {
        self.current_voice.as_deref()
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.engine.cancel_flag()
    }

    pub fn quality(&self) -> usize {
        self.engine.quality()
    }

    pub fn set_quality(&mut self, steps: usize) -> usize {
        self.engine.set_quality(steps);
        self.engine.quality()
    }

    pub fn set_voice(&mut self, name: &str) -> Result<()> {
        self.voices.get(name)?;
        self.current_voice = Some(name.to_string());
        Ok(())
    }

    /// Encode reference audio and make it the current voice.
    pub fn encode_voice(&mut self, pcm: &[f32], sample_rate: u32) -> Result<String> {
        let encoder = self
            .voice_encoder
            .clone()
            .ok_or_else(|| SynthesisError::backend("voice_encoder", "no voice encoder loaded"))?;
        let target_rate = self.engine.config().sample_rate;
        let (id, _) = self
            .voices
            .encode_reference(encoder.as_ref(), pcm, sample_rate, target_rate)?;
        self.current_voice = Some(id.clone());
        Ok(id)
    }

    /// Normalize and chunk text with this session's tokenizer and budget.
    pub fn prepare(&self, text: &str) -> Result<Vec<TextChunk>> {
        prepare_chunks(text, self.tokenizer.as_ref(), self.engine.config().chunk_tokens)
    }

    /// Run one utterance to completion on the calling thread.
    pub fn synthesize(
        &mut self,
        text: &str,
        voice: Option<&str>,
        control: &mut dyn FnMut() -> Option<Control>,
        sink: &mut dyn FnMut(AudioSegment),
    ) -> Result<RunSummary> {
        // a stop from the previous run must not leak into this one
        self.engine.cancel_flag().store(false, Ordering::SeqCst);
        let chunks = self.prepare(text)?;
        let embedding = self.resolve_voice(voice)?;
        info!(
            chunks = chunks.len(),
            voice = self.current_voice.as_deref().unwrap_or_default(),
            "starting generation"
        );
        self.engine.run(&embedding, &chunks, control, sink)
    }

    /// Synthesize into one buffer.
    pub fn synthesize_to_vec(&mut self, text: &str, voice: Option<&str>) -> Result<(Vec<f32>, RunSummary)> {
        let mut audio = Vec::new();
        let summary = self.synthesize(text, voice, &mut || None, &mut |segment| {
            audio.extend_from_slice(&segment.samples)
        })?;
        Ok((audio, summary))
    }

    fn resolve_voice(&mut self, voice: Option<&str>) -> Result<Tensor> {
        match voice {
            Some(name) => {
                let embedding = self.voices.get(name)?;
                self.current_voice = Some(name.to_string());
                Ok(embedding)
            }
            None => {
                let name = self.current_voice.as_deref().ok_or(SynthesisError::MissingVoice)?;
                self.voices.get(name)
            }
        }
    }

    /// Move the session onto a dedicated worker thread.
    pub fn spawn(self) -> std::io::Result<SessionHandle> {
        let (request_tx, request_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();
        let cancel = self.cancel_flag();
        let thread = std::thread::Builder::new()
            .name("pocket-stream-session".into())
            .spawn(move || Worker::new(self, request_rx, event_tx).run())?;
        Ok(SessionHandle {
            requests: request_tx,
            events: event_rx,
            cancel,
            thread: Some(thread),
        })
    }
}

/// Client side of a spawned session
pub struct SessionHandle {
    requests: Sender<SessionRequest>,
    events: Receiver<SessionEvent>,
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Returns false once the worker has exited.
    pub fn send(&self, request: SessionRequest) -> bool {
        self.requests.send(request).is_ok()
    }

    pub fn generate(&self, text: impl Into<String>, voice: Option<String>) -> bool {
        self.send(SessionRequest::Generate {
            text: text.into(),
            voice,
        })
    }

    /// Raise the stop flag immediately and queue a stop request for the
    /// next yield point.
    pub fn stop(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        self.send(SessionRequest::Stop);
    }

    pub fn events(&self) -> &Receiver<SessionEvent> {
        &self.events
    }

    pub fn requests(&self) -> Sender<SessionRequest> {
        self.requests.clone()
    }

    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.cancel.store(true, Ordering::SeqCst);
            let _ = self.requests.send(SessionRequest::Shutdown);
            if thread.join().is_err() {
                error!("session worker panicked");
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

struct Worker {
    session: Session,
    requests: Receiver<SessionRequest>,
    events: Sender<SessionEvent>,
}

impl Worker {
    fn new(session: Session, requests: Receiver<SessionRequest>, events: Sender<SessionEvent>) -> Self {
        Self {
            session,
            requests,
            events,
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("session event receiver dropped");
        }
    }

    fn run(mut self) {
        self.emit(SessionEvent::VoicesLoaded {
            voices: self.session.voices().names(),
            default_voice: self.session.voices().default_voice().map(str::to_string),
        });
        self.emit(SessionEvent::status(SessionState::Ready, "Ready"));

        while let Ok(request) = self.requests.recv() {
            let mut queue = vec![request];
            while let Some(request) = queue.pop() {
                match request {
                    SessionRequest::Generate { text, voice } => {
                        let (deferred, shutdown) = self.generate(&text, voice.as_deref());
                        if shutdown {
                            return;
                        }
                        queue.extend(deferred.into_iter().rev());
                    }
                    SessionRequest::Shutdown => return,
                    other => self.handle_idle(other),
                }
            }
        }
    }

    fn handle_idle(&mut self, request: SessionRequest) {
        match request {
            SessionRequest::EncodeVoice { pcm, sample_rate } => {
                match self.session.encode_voice(&pcm, sample_rate) {
                    Ok(id) => self.emit(SessionEvent::VoiceEncoded { id }),
                    Err(e) => self.emit(SessionEvent::Error(format!("Failed to encode voice: {}", e))),
                }
            }
            SessionRequest::SetVoice(name) => match self.session.set_voice(&name) {
                Ok(()) => self.emit(SessionEvent::VoiceSet { name }),
                Err(e) => self.emit(SessionEvent::Error(e.to_string())),
            },
            SessionRequest::SetQuality(steps) => {
                let steps = self.session.set_quality(steps);
                self.emit(SessionEvent::QualityChanged { steps });
            }
            SessionRequest::Stop => self.emit(SessionEvent::status(SessionState::Stopped, "Stopped")),
            SessionRequest::Generate { .. } | SessionRequest::Shutdown => {}
        }
    }

    /// Run one utterance. Returns requests that arrived mid-run and must be
    /// handled afterwards, and whether a shutdown was requested.
    fn generate(&mut self, text: &str, voice: Option<&str>) -> (Vec<SessionRequest>, bool) {
        self.emit(SessionEvent::status(SessionState::Generating, "Generating..."));
        self.emit(SessionEvent::GenerationStarted);

        let max_quality = self.session.config().max_quality;
        let mut deferred = Vec::new();
        let mut shutdown = false;
        let result = {
            let requests = &self.requests;
            let events = &self.events;
            let mut control = || -> Option<Control> {
                loop {
                    match requests.try_recv() {
                        Ok(SessionRequest::Stop) => return Some(Control::Stop),
                        Ok(SessionRequest::Shutdown) => {
                            shutdown = true;
                            return Some(Control::Stop);
                        }
                        Ok(SessionRequest::SetQuality(steps)) => {
                            let steps = steps.clamp(1, max_quality);
                            let _ = events.send(SessionEvent::QualityChanged { steps });
                            return Some(Control::SetQuality(steps));
                        }
                        Ok(SessionRequest::Generate { .. }) => {
                            warn!("generate request while busy, rejected");
                            let _ = events.send(SessionEvent::Error(SynthesisError::Busy.to_string()));
                        }
                        Ok(other) => deferred.push(other),
                        Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return None,
                    }
                }
            };
            let mut sink = |segment: AudioSegment| {
                let _ = events.send(SessionEvent::Segment(segment));
            };
            self.session.synthesize(text, voice, &mut control, &mut sink)
        };

        match result {
            Ok(summary) => {
                self.emit(SessionEvent::finished(&summary));
                self.emit(SessionEvent::StreamEnded);
                if summary.cancelled {
                    self.emit(SessionEvent::status(SessionState::Stopped, "Stopped"));
                } else {
                    self.emit(SessionEvent::status(SessionState::Ready, "Finished"));
                }
            }
            Err(e) => {
                error!(error = %e, "generation failed");
                self.emit(SessionEvent::Error(e.to_string()));
                self.emit(SessionEvent::StreamEnded);
                let state = if e.is_fatal() {
                    SessionState::Error
                } else {
                    SessionState::Ready
                };
                self.emit(SessionEvent::status(state, e.to_string()));
            }
        }
        (deferred, shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VoiceConfig;
    use crate::synthetic::SyntheticModel;
    use crate::text::WordTokenizer;

    fn session() -> anyhow::Result<Session> {
        let config = GenerationConfig {
            sample_rate: 2400,
            samples_per_frame: 24,
            latent_dim: 4,
            max_quality: 2,
            seed: Some(1),
            ..Default::default()
        };
        let model = SyntheticModel::new(config.latent_dim, config.samples_per_frame, config.sample_rate);
        let voices = VoiceBank::new(vec![("alba".to_string(), model.voice()?)], &VoiceConfig::default());
        Ok(Session::new(model.ports(), Arc::new(WordTokenizer::new()), voices, config))
    }

    #[test]
    fn test_stop_does_not_leak_into_next_run() -> anyhow::Result<()> {
        let mut session = session()?;
        let text = "One two three four five six seven eight.";

        let stopped = session.synthesize(text, None, &mut || Some(Control::Stop), &mut |_| {})?;
        assert!(stopped.cancelled);

        let (audio, summary) = session.synthesize_to_vec(text, None)?;
        assert!(!summary.cancelled);
        assert!(!audio.is_empty());
        Ok(())
    }

    #[test]
    fn test_unknown_voice_keeps_current() -> anyhow::Result<()> {
        let mut session = session()?;
        let err = session.synthesize_to_vec("Hi.", Some("nobody")).unwrap_err();
        assert!(err.is_input_error());
        assert_eq!(session.current_voice(), Some("alba"));
        Ok(())
    }
}
