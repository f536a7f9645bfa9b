//! Spoken replies and the playback state the avatar window follows.
//!
//! Components:
//! - `tts`: Kokoro ONNX synthesis + rodio playback
//! - `playback`: single-slot (is_playing, duration) cell

pub mod playback;
pub mod tts;

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::TtsError;
use playback::{PlaybackCell, PlaybackState};
use tts::Utterance;

/// Text-to-speech backend. Both calls block.
pub trait Speaker: Send + Sync {
    fn synthesize(&self, text: &str) -> Result<Utterance, TtsError>;

    /// Play the utterance and return once it has finished.
    fn play(&self, utterance: &Utterance) -> Result<(), TtsError>;
}

/// Speaks replies and publishes the playback state for the avatar window.
pub struct SpeechAvatar<S> {
    speaker: S,
    playback: Arc<PlaybackCell>,
}

impl<S: Speaker> SpeechAvatar<S> {
    pub fn new(speaker: S, playback: Arc<PlaybackCell>) -> Self {
        Self { speaker, playback }
    }

    /// Synthesize `text`, mark playback active for its duration, play it, and
    /// return to idle. Blocks until the audio is done.
    pub fn speak(&self, text: &str) -> Result<(), TtsError> {
        if text.trim().is_empty() {
            debug!("Nothing to speak");
            return Ok(());
        }

        let utterance = self.speaker.synthesize(text)?;
        let duration = utterance.duration_secs();
        info!("Speaking {} chars ({duration:.1}s)", text.len());

        self.playback.set(PlaybackState::playing(duration));
        let result = self.speaker.play(&utterance);
        self.playback.set(PlaybackState::IDLE);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Produces silence of a fixed length and records the playback state seen
    /// while "playing".
    struct FakeSpeaker {
        seconds: f32,
        fail_playback: bool,
        cell: Arc<PlaybackCell>,
        observed: Mutex<Vec<PlaybackState>>,
    }

    impl Speaker for Arc<FakeSpeaker> {
        fn synthesize(&self, text: &str) -> Result<Utterance, TtsError> {
            if text == "roto" {
                return Err(TtsError::Synthesis("bad input".into()));
            }
            Ok(Utterance {
                samples: vec![0.0; (self.seconds * 1000.0) as usize],
                sample_rate: 1000,
            })
        }

        fn play(&self, _utterance: &Utterance) -> Result<(), TtsError> {
            self.observed.lock().unwrap().push(self.cell.get());
            if self.fail_playback {
                Err(TtsError::Playback("device unplugged".into()))
            } else {
                Ok(())
            }
        }
    }

    fn setup(
        seconds: f32,
        fail_playback: bool,
    ) -> (SpeechAvatar<Arc<FakeSpeaker>>, Arc<FakeSpeaker>) {
        let cell = Arc::new(PlaybackCell::new());
        let fake = Arc::new(FakeSpeaker {
            seconds,
            fail_playback,
            cell: cell.clone(),
            observed: Mutex::default(),
        });
        (SpeechAvatar::new(fake.clone(), cell), fake)
    }

    #[test]
    fn playback_state_follows_utterance() {
        let (speech, fake) = setup(3.0, false);
        assert_eq!(fake.cell.get(), PlaybackState::IDLE);

        speech.speak("Hola a todos.").unwrap();

        assert_eq!(*fake.observed.lock().unwrap(), vec![PlaybackState::playing(3.0)]);
        assert_eq!(fake.cell.get(), PlaybackState::IDLE);
    }

    #[test]
    fn playback_failure_still_returns_to_idle() {
        let (speech, fake) = setup(1.5, true);
        assert!(matches!(speech.speak("Hola."), Err(TtsError::Playback(_))));
        assert_eq!(fake.cell.get(), PlaybackState::IDLE);
    }

    #[test]
    fn synthesis_failure_never_marks_playing() {
        let (speech, fake) = setup(1.0, false);
        assert!(speech.speak("roto").is_err());
        assert!(fake.observed.lock().unwrap().is_empty());
        assert_eq!(fake.cell.get(), PlaybackState::IDLE);
    }

    #[test]
    fn blank_text_is_skipped() {
        let (speech, fake) = setup(1.0, false);
        speech.speak("   ").unwrap();
        assert!(fake.observed.lock().unwrap().is_empty());
    }
}
