//! Kokoro TTS engine: text → phonemes → ONNX inference → audio playback.
//!
//! Pipeline:
//! 1. Text → sentences (split on .!?)
//! 2. Sentence → phonemes (misaki-rs G2P for English, espeak-ng otherwise)
//! 3. Phonemes → token IDs (tokenizer.json vocabulary)
//! 4. Token IDs + voice style + speed → ONNX inference → f32 audio (24kHz)
//! 5. Sentences concatenated into one utterance, played on a rodio Sink

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use misaki_rs::{Language, G2P};
use ndarray::{Array2, Array3};
use ndarray_npy::NpzReader;
use ort::value::Tensor;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamBuilder, Sink};
use tracing::{debug, info, warn};

use super::Speaker;
use crate::config::VoiceConfig;
use crate::error::TtsError;

const SAMPLE_RATE: u32 = 24000;
const MAX_TOKENS: usize = 510; // Voice style array first dimension

/// Synthesized speech ready to play.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Utterance {
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Loaded voice style data: shape (510, 1, 256) f32.
struct VoiceData {
    /// Style vectors indexed by token count. shape: (510, 256)
    styles: Array2<f32>,
}

/// Grapheme-to-phoneme front end selected from the voice language.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PhonemizerKind {
    EnglishUs,
    EnglishGb,
    /// espeak-ng voice name, e.g. `es`.
    Espeak(String),
}

impl PhonemizerKind {
    /// `language` wins when set; otherwise the Kokoro voice prefix decides
    /// (`em_alex` → `es`, `af_heart` → US English).
    fn resolve(language: &str, voice: &str) -> Self {
        let language = language.trim().to_ascii_lowercase();
        let language = if language.is_empty() {
            language_for_voice(voice).to_string()
        } else {
            language
        };

        match language.as_str() {
            "en" | "en-us" | "a" => Self::EnglishUs,
            "en-gb" | "b" => Self::EnglishGb,
            _ => Self::Espeak(language),
        }
    }
}

/// espeak-ng language for a Kokoro voice name.
fn language_for_voice(voice: &str) -> &'static str {
    match voice.chars().next() {
        Some('a') => "en-us",
        Some('b') => "en-gb",
        Some('e') => "es",
        Some('f') => "fr-fr",
        Some('h') => "hi",
        Some('i') => "it",
        Some('j') => "ja",
        Some('p') => "pt-br",
        Some('z') => "cmn",
        _ => "es",
    }
}

enum Phonemizer {
    Misaki(G2P),
    Espeak(String),
}

impl Phonemizer {
    fn new(kind: &PhonemizerKind) -> Self {
        match kind {
            PhonemizerKind::EnglishUs => Self::Misaki(G2P::new(Language::EnglishUS)),
            PhonemizerKind::EnglishGb => Self::Misaki(G2P::new(Language::EnglishGB)),
            PhonemizerKind::Espeak(voice) => Self::Espeak(voice.clone()),
        }
    }

    fn phonemize(&self, text: &str) -> Result<String, TtsError> {
        match self {
            Self::Misaki(g2p) => g2p
                .g2p(text)
                .map(|(phonemes, _tokens)| phonemes)
                .map_err(|e| TtsError::Synthesis(format!("phonemization: {e}"))),
            Self::Espeak(voice) => espeak_rs::text_to_phonemes(text, voice, None, true, false)
                .map(|clauses| clauses.join(" "))
                .map_err(|e| TtsError::Synthesis(format!("espeak-ng ({voice}): {e}"))),
        }
    }
}

/// Native Kokoro TTS engine.
pub struct KokoroTtsEngine {
    // ONNX model (Mutex because ort 2.0 Session::run needs &mut)
    session: Mutex<Option<ort::session::Session>>,

    phonemizer_kind: PhonemizerKind,
    phonemizer: Option<Phonemizer>,

    // Tokenizer vocabulary: char → token ID
    vocab: HashMap<char, i64>,

    voices: HashMap<String, VoiceData>,

    voice: String,
    speed: f32,

    // Audio output (kept alive for process lifetime)
    output_stream: Option<OutputStream>,

    model_path: PathBuf,
    voices_path: PathBuf,
    tokenizer_path: PathBuf,
}

fn asset_path(configured: &str, base_dir: &Path, default_name: &str) -> PathBuf {
    if configured.is_empty() {
        base_dir.join(default_name)
    } else {
        PathBuf::from(configured)
    }
}

impl KokoroTtsEngine {
    pub fn new(config: &VoiceConfig) -> Self {
        let base_dir = std::env::current_dir().unwrap_or_default();

        Self {
            session: Mutex::new(None),
            phonemizer_kind: PhonemizerKind::resolve(&config.language, &config.voice),
            phonemizer: None,
            vocab: HashMap::new(),
            voices: HashMap::new(),
            voice: config.voice.clone(),
            speed: config.speed,
            output_stream: None,
            model_path: asset_path(&config.model_path, &base_dir, "kokoro-v1.0.onnx"),
            voices_path: asset_path(&config.voices_path, &base_dir, "voices-v1.0.bin"),
            tokenizer_path: asset_path(&config.tokenizer_path, &base_dir, "tokenizer.json"),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.session.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Load the ONNX model, tokenizer, voices, phonemizer and audio output.
    /// Blocking; call once at startup.
    pub fn load_model_sync(&mut self) -> Result<(), TtsError> {
        let t0 = Instant::now();

        info!("Loading tokenizer from {}", self.tokenizer_path.display());
        self.vocab = load_tokenizer(&self.tokenizer_path)?;
        info!("Tokenizer loaded: {} tokens", self.vocab.len());

        info!("Loading voices from {}", self.voices_path.display());
        self.voices = load_voices(&self.voices_path)?;
        info!("Loaded {} voices", self.voices.len());
        if !self.voices.contains_key(&self.voice) {
            return Err(TtsError::Load(format!("unknown voice: {}", self.voice)));
        }

        info!("Loading ONNX model from {}", self.model_path.display());
        let session = ort::session::Session::builder()
            .map_err(|e| TtsError::Load(format!("ONNX session builder: {e}")))?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
            .map_err(|e| TtsError::Load(format!("optimization level: {e}")))?
            .with_intra_threads(4)
            .map_err(|e| TtsError::Load(format!("thread count: {e}")))?
            .commit_from_file(&self.model_path)
            .map_err(|e| TtsError::Load(format!("ONNX model: {e}")))?;
        *self
            .session
            .lock()
            .map_err(|_| TtsError::Load("session lock poisoned".into()))? = Some(session);

        info!("Phonemizer: {:?}", self.phonemizer_kind);
        self.phonemizer = Some(Phonemizer::new(&self.phonemizer_kind));

        let stream = OutputStreamBuilder::open_default_stream()
            .map_err(|e| TtsError::Load(format!("audio output: {e}")))?;
        self.output_stream = Some(stream);

        info!(
            "Kokoro TTS loaded in {}ms (voice: {}, speed: {})",
            t0.elapsed().as_millis(),
            self.voice,
            self.speed
        );
        Ok(())
    }

    /// Generate audio samples for a single sentence.
    fn generate_sentence(&self, text: &str) -> Result<Vec<f32>, TtsError> {
        let mut session_guard = self
            .session
            .lock()
            .map_err(|_| TtsError::Synthesis("session lock poisoned".into()))?;
        let session = session_guard.as_mut().ok_or(TtsError::NotLoaded)?;
        let phonemizer = self.phonemizer.as_ref().ok_or(TtsError::NotLoaded)?;

        let phonemes = phonemizer.phonemize(text)?;

        if phonemes.is_empty() {
            return Ok(Vec::new());
        }

        let mut token_ids: Vec<i64> = Vec::with_capacity(phonemes.len() + 2);
        token_ids.push(0); // Start padding
        token_ids.extend(phonemes.chars().filter_map(|ch| self.vocab.get(&ch).copied()));
        token_ids.push(0); // End padding

        let n_tokens = token_ids.len().min(MAX_TOKENS);
        token_ids.truncate(n_tokens);

        let voice_data = self
            .voices
            .get(&self.voice)
            .ok_or_else(|| TtsError::Synthesis(format!("voice not found: {}", self.voice)))?;

        // Index into style array by token count (clamped to max)
        let style_idx = (n_tokens.saturating_sub(2)).min(voice_data.styles.nrows() - 1);
        let style_vec: Vec<f32> = voice_data.styles.row(style_idx).to_vec();

        let tensor_err = |e: &dyn std::fmt::Display| TtsError::Synthesis(format!("tensor: {e}"));

        let tokens_array =
            Array2::from_shape_vec((1, n_tokens), token_ids).map_err(|e| tensor_err(&e))?;
        let tokens_tensor = Tensor::from_array(tokens_array).map_err(|e| tensor_err(&e))?;

        let style_array = Array2::from_shape_vec((1, 256), style_vec).map_err(|e| tensor_err(&e))?;
        let style_tensor = Tensor::from_array(style_array).map_err(|e| tensor_err(&e))?;

        let speed_array = ndarray::Array1::from_vec(vec![self.speed]);
        let speed_tensor = Tensor::from_array(speed_array).map_err(|e| tensor_err(&e))?;

        let outputs = session
            .run(ort::inputs![
                "tokens" => tokens_tensor,
                "style" => style_tensor,
                "speed" => speed_tensor
            ])
            .map_err(|e| TtsError::Synthesis(format!("ONNX inference: {e}")))?;

        let first_output = outputs
            .iter()
            .next()
            .ok_or_else(|| TtsError::Synthesis("no output tensor from model".into()))?;

        let (_shape, audio_slice) = first_output
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e| TtsError::Synthesis(format!("audio tensor: {e}")))?;

        Ok(audio_slice.to_vec())
    }
}

impl Speaker for KokoroTtsEngine {
    fn synthesize(&self, text: &str) -> Result<Utterance, TtsError> {
        if !self.is_loaded() {
            return Err(TtsError::NotLoaded);
        }

        let t0 = Instant::now();
        let sentences = split_sentences(text.trim());

        let mut samples = Vec::new();
        for (i, sentence) in sentences.iter().enumerate() {
            match self.generate_sentence(sentence) {
                Ok(audio) => samples.extend(audio),
                Err(e) => warn!("TTS generation failed for sentence {}: {e}", i + 1),
            }
        }

        if samples.is_empty() && !sentences.is_empty() {
            return Err(TtsError::Synthesis("no audio generated".into()));
        }

        let utterance = Utterance {
            samples,
            sample_rate: SAMPLE_RATE,
        };
        debug!(
            "Synthesized {} sentences ({:.1}s audio) in {}ms",
            sentences.len(),
            utterance.duration_secs(),
            t0.elapsed().as_millis()
        );
        Ok(utterance)
    }

    fn play(&self, utterance: &Utterance) -> Result<(), TtsError> {
        let stream = self
            .output_stream
            .as_ref()
            .ok_or_else(|| TtsError::Playback("no audio output stream".into()))?;

        if utterance.samples.is_empty() {
            return Ok(());
        }

        // rodio 0.21: Sink::connect_new takes &Mixer
        let sink = Sink::connect_new(stream.mixer());
        sink.append(SamplesBuffer::new(1, utterance.sample_rate, utterance.samples.clone()));
        sink.sleep_until_end();
        Ok(())
    }
}

// --- Helper functions ---

/// Load tokenizer vocabulary from tokenizer.json.
fn load_tokenizer(path: &Path) -> Result<HashMap<char, i64>, TtsError> {
    let contents = fs::read_to_string(path)
        .map_err(|e| TtsError::Load(format!("tokenizer {}: {e}", path.display())))?;

    let data: serde_json::Value = serde_json::from_str(&contents)
        .map_err(|e| TtsError::Load(format!("tokenizer JSON: {e}")))?;

    let vocab = data["model"]["vocab"]
        .as_object()
        .ok_or_else(|| TtsError::Load("missing model.vocab in tokenizer.json".into()))?;

    let mut map = HashMap::new();
    for (token, id) in vocab {
        let id = id
            .as_i64()
            .ok_or_else(|| TtsError::Load(format!("token id for {token:?} is not an integer")))?;
        if let Some(ch) = token.chars().next() {
            map.insert(ch, id);
        }
    }

    Ok(map)
}

/// Load all voice styles from an NPZ file.
fn load_voices(path: &Path) -> Result<HashMap<String, VoiceData>, TtsError> {
    let load_err =
        |e: &dyn std::fmt::Display| TtsError::Load(format!("voices {}: {e}", path.display()));

    let file = fs::File::open(path).map_err(|e| load_err(&e))?;
    let mut npz = NpzReader::new(file).map_err(|e| load_err(&e))?;

    let names: Vec<String> = npz
        .names()
        .map_err(|e| load_err(&e))?
        .into_iter()
        .map(|n| n.trim_end_matches(".npy").to_string())
        .collect();

    let mut voices = HashMap::new();
    for name in names {
        let arr: Array3<f32> = npz.by_name(&format!("{name}.npy")).map_err(|e| load_err(&e))?;

        // Shape is (510, 1, 256). Squeeze the middle dimension to (510, 256).
        let dim0 = arr.shape()[0];
        let dim2 = arr.shape()[2];
        let styles = arr
            .into_shape_with_order((dim0, dim2))
            .map_err(|e| load_err(&e))?;

        voices.insert(name, VoiceData { styles });
    }

    Ok(voices)
}

/// Split text into sentences at .!? boundaries.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();

    for (i, &b) in bytes.iter().enumerate() {
        let at_boundary = i + 1 < bytes.len() && bytes[i + 1].is_ascii_whitespace();
        if matches!(b, b'.' | b'!' | b'?') && at_boundary {
            let end = i + 1;
            let s = text[start..end].trim();
            if !s.is_empty() {
                sentences.push(s);
            }
            start = end;
        }
    }

    let s = text[start..].trim();
    if !s.is_empty() {
        sentences.push(s);
    }

    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_sentence_punctuation() {
        assert_eq!(
            split_sentences("¡Hola Ana! ¿Qué tal el directo? Vamos allá."),
            vec!["¡Hola Ana!", "¿Qué tal el directo?", "Vamos allá."]
        );
        assert_eq!(split_sentences("v1.2 sin espacio"), vec!["v1.2 sin espacio"]);
        assert!(split_sentences("   ").is_empty());
    }

    #[test]
    fn utterance_duration_from_samples() {
        let utterance = Utterance {
            samples: vec![0.0; 72_000],
            sample_rate: SAMPLE_RATE,
        };
        assert_eq!(utterance.duration_secs(), 3.0);
    }

    #[test]
    fn spanish_voice_uses_espeak() {
        let engine = KokoroTtsEngine::new(&VoiceConfig::default());
        assert_eq!(engine.phonemizer_kind, PhonemizerKind::Espeak("es".into()));
    }

    #[test]
    fn configured_language_overrides_voice() {
        let config = VoiceConfig {
            language: "en-GB".into(),
            ..VoiceConfig::default()
        };
        let engine = KokoroTtsEngine::new(&config);
        assert_eq!(engine.phonemizer_kind, PhonemizerKind::EnglishGb);

        assert_eq!(PhonemizerKind::resolve("", "af_heart"), PhonemizerKind::EnglishUs);
        assert_eq!(
            PhonemizerKind::resolve("", "ff_siwis"),
            PhonemizerKind::Espeak("fr-fr".into())
        );
        assert_eq!(
            PhonemizerKind::resolve(" es ", "af_heart"),
            PhonemizerKind::Espeak("es".into())
        );
    }

    #[test]
    fn unloaded_engine_refuses_to_speak() {
        let engine = KokoroTtsEngine::new(&VoiceConfig::default());
        assert!(!engine.is_loaded());
        assert!(matches!(engine.synthesize("Hola."), Err(TtsError::NotLoaded)));
    }
}
