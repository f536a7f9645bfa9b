//! twitch-commentarist: Twitch chat commentator with voice and avatar.

mod assistant;
mod avatar;
mod bot;
mod config;
mod error;
mod speech;
mod twitch;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::task::{JoinError, JoinHandle};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::assistant::{ConversationAgent, OpenAiChatClient};
use crate::bot::BotShell;
use crate::error::ConfigError;
use crate::speech::playback::PlaybackCell;
use crate::speech::tts::KokoroTtsEngine;
use crate::speech::SpeechAvatar;

#[derive(Parser, Debug)]
#[command(
    name = "twitch-commentarist",
    about = "Twitch chat commentator with voice and avatar"
)]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run without the avatar window
    #[arg(long)]
    no_window: bool,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging (suppress noisy ort/irc/gl internals)
    let filter = if args.verbose {
        EnvFilter::new("debug,ort=info,twitch_irc=info,eframe=info,egui_glow=info")
    } else {
        EnvFilter::new("info,ort=warn,twitch_irc=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("twitch-commentarist starting");

    let config = config::Config::load(args.config.as_deref());
    info!("Config loaded: {:?}", config.twitch);

    // Language model and conversation history
    let chat_client = OpenAiChatClient::new(&config.lm)?;
    let agent = ConversationAgent::new(&config.assistant, chat_client);
    info!("Conversation ready with {} turns", agent.store().len());

    // Voice
    let playback = Arc::new(PlaybackCell::new());
    info!("Loading Kokoro TTS model...");
    let mut tts = KokoroTtsEngine::new(&config.voice);
    if let Err(e) = tts.load_model_sync() {
        warn!("Failed to load TTS model: {e}");
        info!("TTS disabled, continuing without voice output");
    }
    let speech = Arc::new(SpeechAvatar::new(tts, playback.clone()));

    // Chat runs on the tokio runtime; the window owns the main thread.
    let runtime = Runtime::new().map_err(ConfigError::Runtime)?;
    let _guard = runtime.enter();

    let (chat, incoming) = twitch::connect(&config.twitch)?;
    let shell = BotShell::new(agent, chat, speech, &config.twitch.prefix);
    let startup_phrase = config.voice.startup_phrase.clone();

    let bot = runtime.spawn(async move {
        if let Err(e) = shell.speak(startup_phrase).await {
            warn!("Failed to speak startup phrase: {e}");
        }
        twitch::run(incoming, shell).await;
    });

    if args.no_window {
        info!("Avatar window disabled");
        runtime.block_on(bot)?;
    } else {
        let avatar_config = config.avatar.clone();
        show_window_then_wait(&runtime, bot, move || {
            avatar::window::run(&avatar_config, playback)
        })?;
    }

    Ok(())
}

/// Run the avatar window on this thread, then wait for the chat task.
/// A window that fails to open is logged; the chat task keeps running.
fn show_window_then_wait<E: std::fmt::Display>(
    runtime: &Runtime,
    bot: JoinHandle<()>,
    window: impl FnOnce() -> Result<(), E>,
) -> Result<(), JoinError> {
    match window() {
        Ok(()) => info!("Avatar window closed, chat keeps running"),
        Err(e) => warn!("Avatar window failed: {e}, chat keeps running"),
    }
    runtime.block_on(bot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[test]
    fn window_failure_leaves_chat_running() {
        let runtime = Runtime::new().unwrap();
        let handled = Arc::new(AtomicBool::new(false));

        let flag = handled.clone();
        let bot = runtime.spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, Ordering::SeqCst);
        });

        let result = show_window_then_wait(&runtime, bot, || Err("no display available"));

        assert!(result.is_ok());
        assert!(handled.load(Ordering::SeqCst));
    }

    #[test]
    fn closed_window_waits_for_chat() {
        let runtime = Runtime::new().unwrap();
        let handled = Arc::new(AtomicBool::new(false));

        let flag = handled.clone();
        let bot = runtime.spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag.store(true, Ordering::SeqCst);
        });

        show_window_then_wait(&runtime, bot, || Ok::<(), String>(())).unwrap();
        assert!(handled.load(Ordering::SeqCst));
    }
}
