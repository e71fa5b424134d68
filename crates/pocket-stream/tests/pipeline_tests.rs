#[cfg(test)]
mod tests {
    use anyhow::{Result, bail};
    use crossbeam_channel::Receiver;
    use pocket_stream::config::{GenerationConfig, PlaybackConfig, VoiceConfig};
    use pocket_stream::{
        Pipeline, PipelineEvent, PlaybackMode, Session, SessionEvent, SessionHandle,
        SessionRequest, SessionState, SyntheticModel, VoiceBank, WordTokenizer, playback_channel,
    };
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    const TIMEOUT: Duration = Duration::from_secs(30);

    // 10 ms of audio per frame
    fn generation() -> GenerationConfig {
        GenerationConfig {
            sample_rate: 2400,
            samples_per_frame: 24,
            latent_dim: 4,
            max_quality: 4,
            seed: Some(3),
            ..Default::default()
        }
    }

    fn session(step_delay: Duration) -> Result<Session> {
        session_with(generation(), step_delay)
    }

    fn session_with(cfg: GenerationConfig, step_delay: Duration) -> Result<Session> {
        let model = SyntheticModel::new(cfg.latent_dim, cfg.samples_per_frame, cfg.sample_rate)
            .with_step_delay(step_delay);
        let voices = VoiceBank::new(
            vec![("alba".to_string(), model.voice()?)],
            &VoiceConfig::default(),
        );
        Ok(Session::new(
            model.ports(),
            Arc::new(WordTokenizer::new()),
            voices,
            cfg,
        ))
    }

    fn collect_until<T>(rx: &Receiver<T>, mut done: impl FnMut(&T) -> bool) -> Result<Vec<T>> {
        let deadline = Instant::now() + TIMEOUT;
        let mut events = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = rx.recv_timeout(remaining)?;
            let stop = done(&event);
            events.push(event);
            if stop {
                return Ok(events);
            }
        }
    }

    fn until_idle(handle: &SessionHandle) -> Result<Vec<SessionEvent>> {
        let mut ended = false;
        collect_until(handle.events(), |e| {
            if matches!(e, SessionEvent::StreamEnded) {
                ended = true;
            }
            ended && matches!(e, SessionEvent::Status { state, .. } if *state != SessionState::Generating)
        })
    }

    fn count<T>(events: &[T], pred: impl Fn(&T) -> bool) -> usize {
        events.iter().filter(|e| pred(e)).count()
    }

    #[test]
    fn test_session_generates_and_ends_once() -> Result<()> {
        let handle = session(Duration::ZERO)?.spawn()?;
        let startup = collect_until(handle.events(), |e| {
            matches!(e, SessionEvent::Status { state: SessionState::Ready, .. })
        })?;
        assert!(matches!(
            &startup[0],
            SessionEvent::VoicesLoaded { default_voice: Some(v), .. } if v == "alba"
        ));

        handle.generate("Hello there. This is a short test.", None);
        let events = until_idle(&handle)?;

        assert_eq!(count(&events, |e| matches!(e, SessionEvent::StreamEnded)), 1);
        assert_eq!(count(&events, |e| matches!(e, SessionEvent::Finished { .. })), 1);
        let segments: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Segment(s) => Some(s),
                _ => None,
            })
            .collect();
        assert!(segments.len() >= 2);
        assert!(segments[0].metrics.is_first);
        assert!(segments.last().is_some_and(|s| s.metrics.is_last));
        assert_eq!(count(&segments, |s| s.metrics.is_first), 1);

        let finished = events.iter().position(|e| matches!(e, SessionEvent::Finished { .. }));
        let ended = events.iter().position(|e| matches!(e, SessionEvent::StreamEnded));
        assert!(finished < ended);
        Ok(())
    }

    #[test]
    fn test_empty_and_unknown_voice_errors_end_stream() -> Result<()> {
        let handle = session(Duration::ZERO)?.spawn()?;

        handle.generate("   ", None);
        let events = until_idle(&handle)?;
        assert!(events.iter().any(|e| matches!(e, SessionEvent::Error(m) if m.contains("no text"))));
        assert_eq!(count(&events, |e| matches!(e, SessionEvent::Segment(_))), 0);

        handle.generate("Hello.", Some("nobody".to_string()));
        let events = until_idle(&handle)?;
        assert!(events.iter().any(|e| matches!(e, SessionEvent::Error(m) if m.contains("nobody"))));
        assert_eq!(count(&events, |e| matches!(e, SessionEvent::StreamEnded)), 1);
        assert!(matches!(
            events.last(),
            Some(SessionEvent::Status { state: SessionState::Ready, .. })
        ));
        Ok(())
    }

    #[test]
    fn test_second_generate_is_rejected_while_busy() -> Result<()> {
        let handle = session(Duration::from_millis(5))?.spawn()?;
        let text = "one two three four five six seven eight nine ten eleven twelve.";
        handle.generate(text, None);
        handle.generate("another request.", None);
        let events = until_idle(&handle)?;

        assert!(events.iter().any(|e| matches!(e, SessionEvent::Error(m) if m.contains("already in progress"))));
        assert_eq!(count(&events, |e| matches!(e, SessionEvent::StreamEnded)), 1);
        assert!(handle.events().recv_timeout(Duration::from_millis(200)).is_err());
        Ok(())
    }

    #[test]
    fn test_stop_cancels_generation() -> Result<()> {
        let handle = session(Duration::from_millis(10))?.spawn()?;
        let text = "This sentence is long enough to keep the synthetic model busy for a while.";
        handle.generate(text, None);
        collect_until(handle.events(), |e| matches!(e, SessionEvent::Segment(_)))?;
        handle.stop();
        let events = until_idle(&handle)?;

        assert_eq!(count(&events, |e| matches!(e, SessionEvent::StreamEnded)), 1);
        assert!(matches!(
            events.last(),
            Some(SessionEvent::Status { state: SessionState::Stopped, .. })
        ));
        Ok(())
    }

    #[test]
    fn test_encoded_voice_becomes_current() -> Result<()> {
        let handle = session(Duration::ZERO)?.spawn()?;
        let tone: Vec<f32> = (0..4800).map(|i| (i as f32 * 0.05).sin() * 0.3).collect();
        handle.send(SessionRequest::EncodeVoice {
            pcm: tone,
            sample_rate: 4800,
        });
        let events = collect_until(handle.events(), |e| {
            matches!(e, SessionEvent::VoiceEncoded { .. } | SessionEvent::Error(_))
        })?;
        let Some(SessionEvent::VoiceEncoded { id }) = events.last() else {
            bail!("voice was not encoded: {:?}", events.last());
        };
        assert!(id.starts_with("ref-"));

        handle.generate("Hello.", Some("custom".to_string()));
        let events = until_idle(&handle)?;
        assert!(!events.iter().any(|e| matches!(e, SessionEvent::Error(_))));
        Ok(())
    }

    /// Drive the player from the test thread the way an audio callback would.
    fn play(pipeline: &Pipeline, consumer: &mut pocket_stream::PlaybackConsumer) -> Result<Vec<PipelineEvent>> {
        let deadline = Instant::now() + TIMEOUT;
        let mut events = Vec::new();
        let mut out = vec![0.0f32; 120];
        loop {
            consumer.render(&mut out);
            while let Ok(event) = pipeline.events().try_recv() {
                events.push(event);
            }
            if events.iter().any(|e| matches!(e, PipelineEvent::PlaybackComplete)) {
                return Ok(events);
            }
            if Instant::now() > deadline {
                bail!("playback did not complete: {:?}", events);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_fast_synthesis_streams_to_completion() -> Result<()> {
        let handle = session(Duration::ZERO)?.spawn()?;
        let playback = PlaybackConfig::default();
        let (player, mut consumer) = playback_channel(&playback, generation().sample_rate);
        let pipeline = Pipeline::start(handle, player, &playback)?;

        pipeline.speak("Hello there. This is a streaming test.", None);
        let events = play(&pipeline, &mut consumer)?;

        assert!(events.contains(&PipelineEvent::ModeChanged(PlaybackMode::Stream)));
        assert_eq!(count(&events, |e| matches!(e, PipelineEvent::StreamEnded)), 1);
        assert_eq!(count(&events, |e| matches!(e, PipelineEvent::FirstByte { .. })), 1);
        let started = events
            .iter()
            .position(|e| matches!(e, PipelineEvent::PlaybackStarted { .. }));
        let complete = events
            .iter()
            .position(|e| matches!(e, PipelineEvent::PlaybackComplete));
        assert!(started.is_some() && started < complete);
        assert_eq!(consumer.ring().buffered(), 0);
        Ok(())
    }

    #[test]
    fn test_slow_synthesis_reduces_quality_and_buffers() -> Result<()> {
        // 20 ms per 10 ms frame: half real time
        let handle = session(Duration::from_millis(20))?.spawn()?;
        let playback = PlaybackConfig::default();
        let (player, mut consumer) = playback_channel(&playback, generation().sample_rate);
        let pipeline = Pipeline::start(handle, player, &playback)?;

        pipeline.speak("one two three four five six seven eight.", None);
        let events = play(&pipeline, &mut consumer)?;

        assert_eq!(count(&events, |e| matches!(e, PipelineEvent::QualityReduced { .. })), 1);
        assert!(events.contains(&PipelineEvent::ModeChanged(PlaybackMode::BufferAll)));
        assert!(!events.contains(&PipelineEvent::ModeChanged(PlaybackMode::Stream)));
        assert_eq!(count(&events, |e| matches!(e, PipelineEvent::Underrun { .. })), 0);
        Ok(())
    }

    #[test]
    fn test_speak_while_generating_reports_busy() -> Result<()> {
        let handle = session(Duration::from_millis(5))?.spawn()?;
        let playback = PlaybackConfig::default();
        let (player, mut consumer) = playback_channel(&playback, generation().sample_rate);
        let pipeline = Pipeline::start(handle, player, &playback)?;

        pipeline.speak("one two three four five six seven eight nine ten.", None);
        pipeline.speak("interrupting.", None);
        let events = play(&pipeline, &mut consumer)?;

        assert!(events.iter().any(|e| matches!(e, PipelineEvent::Error(m) if m.contains("already in progress"))));
        assert_eq!(count(&events, |e| matches!(e, PipelineEvent::StreamEnded)), 1);
        Ok(())
    }

    // Real model rate: 80 ms of audio per frame, 12-frame segments of 23,040
    // samples, which is more than the 14,400-sample target level
    fn real_rate() -> GenerationConfig {
        GenerationConfig {
            seed: Some(3),
            ..Default::default()
        }
    }

    /// Render 480-sample blocks on a real-time clock, like a device callback.
    fn play_paced(
        pipeline: &Pipeline,
        consumer: &mut pocket_stream::PlaybackConsumer,
        sample_rate: u32,
    ) -> Result<Vec<PipelineEvent>> {
        const BLOCK: usize = 480;
        let period = Duration::from_secs_f64(BLOCK as f64 / sample_rate as f64);
        let deadline = Instant::now() + TIMEOUT;
        let mut events = Vec::new();
        let mut out = vec![0.0f32; BLOCK];
        let mut next = Instant::now();
        loop {
            consumer.render(&mut out);
            events.extend(pipeline.events().try_iter());
            if events.iter().any(|e| matches!(e, PipelineEvent::PlaybackComplete)) {
                return Ok(events);
            }
            if Instant::now() > deadline {
                bail!("playback did not complete: {:?}", events);
            }
            next += period;
            if let Some(wait) = next.checked_duration_since(Instant::now()) {
                std::thread::sleep(wait);
            }
        }
    }

    fn underruns_before_complete(events: &[PipelineEvent]) -> usize {
        events
            .iter()
            .take_while(|e| !matches!(e, PipelineEvent::PlaybackComplete))
            .filter(|e| matches!(e, PipelineEvent::Underrun { .. }))
            .count()
    }

    #[test]
    fn test_real_rate_stream_has_no_underruns() -> Result<()> {
        let cfg = real_rate();
        let sample_rate = cfg.sample_rate;
        let handle = session_with(cfg, Duration::ZERO)?.spawn()?;
        let playback = PlaybackConfig::default();
        let (player, mut consumer) = playback_channel(&playback, sample_rate);
        let pipeline = Pipeline::start(handle, player, &playback)?;

        pipeline.speak("Hello there, this is a real rate test.", None);
        let events = play_paced(&pipeline, &mut consumer, sample_rate)?;

        assert!(events.contains(&PipelineEvent::ModeChanged(PlaybackMode::Stream)));
        assert_eq!(underruns_before_complete(&events), 0);
        assert!(!events.iter().any(|e| matches!(e, PipelineEvent::Overflow { .. })));
        Ok(())
    }

    #[test]
    fn test_real_rate_buffer_all_plays_back_to_back() -> Result<()> {
        let cfg = real_rate();
        let sample_rate = cfg.sample_rate;
        // 120 ms per 80 ms frame
        let handle = session_with(cfg, Duration::from_millis(120))?.spawn()?;
        let playback = PlaybackConfig::default();
        let (player, mut consumer) = playback_channel(&playback, sample_rate);
        let pipeline = Pipeline::start(handle, player, &playback)?;

        pipeline.speak("one two three four five six.", None);
        let events = play_paced(&pipeline, &mut consumer, sample_rate)?;

        assert!(events.contains(&PipelineEvent::ModeChanged(PlaybackMode::BufferAll)));
        assert_eq!(count(&events, |e| matches!(e, PipelineEvent::QualityReduced { .. })), 1);
        assert_eq!(underruns_before_complete(&events), 0);
        Ok(())
    }
}
