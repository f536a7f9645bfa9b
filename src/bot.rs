//! Bot shell: one chat message in, one spoken reply out.
//!
//! Each stage returns its own error type; failures are logged and the shell
//! moves on, so a single bad message never stops the bot.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::assistant::{ChatBackend, ConversationAgent};
use crate::error::{ChatError, TtsError};
use crate::speech::{Speaker, SpeechAvatar};

const REVERSE_USAGE: &str = "personaje, tienes que enviar el mensaje que quieres ver al revés.";

/// A chat message as the shell sees it, independent of the chat library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub channel: String,
    pub message_id: String,
    pub author: String,
    pub content: String,
}

/// Sending side of the chat connection.
#[async_trait]
pub trait ChatReplier: Send + Sync {
    async fn reply(&self, to: &ChatMessage, text: &str) -> Result<(), ChatError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `changevoice <text>` (alias `reverse`): echo the text reversed.
    /// `None` when no text was given.
    Reverse(Option<String>),
}

impl Command {
    /// Parse `<prefix><name> [args]`. Unknown commands yield `None`.
    pub fn parse(prefix: &str, content: &str) -> Option<Self> {
        let rest = content.strip_prefix(prefix)?;
        let (name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (rest, ""),
        };

        match name {
            "changevoice" | "reverse" => {
                Some(Self::Reverse((!args.is_empty()).then(|| args.to_string())))
            }
            _ => None,
        }
    }
}

pub fn reverse_text(text: &str) -> String {
    text.chars().rev().collect()
}

pub struct BotShell<B, R, S> {
    agent: ConversationAgent<B>,
    chat: R,
    speech: Arc<SpeechAvatar<S>>,
    prefix: String,
}

impl<B, R, S> BotShell<B, R, S>
where
    B: ChatBackend,
    R: ChatReplier,
    S: Speaker + 'static,
{
    pub fn new(
        agent: ConversationAgent<B>,
        chat: R,
        speech: Arc<SpeechAvatar<S>>,
        prefix: &str,
    ) -> Self {
        Self {
            agent,
            chat,
            speech,
            prefix: prefix.to_string(),
        }
    }

    #[cfg(test)]
    pub fn agent(&self) -> &ConversationAgent<B> {
        &self.agent
    }

    /// Handle one incoming chat message to completion.
    pub async fn handle_message(&mut self, message: &ChatMessage) {
        info!("{}: {}", message.author, message.content);

        match self
            .agent
            .send_message(&format!("{}: {}", message.author, message.content))
            .await
        {
            Ok(reply) => {
                info!("IA: {reply}");
                if let Err(e) = self.speak(reply).await {
                    warn!("Failed to speak reply: {e}");
                }
            }
            Err(e) => warn!("No reply for message from {}: {e}", message.author),
        }

        self.dispatch_command(message).await;
    }

    /// Speak on the blocking pool and wait for playback to finish.
    pub async fn speak(&self, text: String) -> Result<(), TtsError> {
        let speech = self.speech.clone();
        tokio::task::spawn_blocking(move || speech.speak(&text))
            .await
            .map_err(|e| TtsError::Playback(format!("speech task failed: {e}")))?
    }

    async fn dispatch_command(&self, message: &ChatMessage) {
        let Some(command) = Command::parse(&self.prefix, &message.content) else {
            return;
        };
        debug!("Command from {}: {command:?}", message.author);

        let response = match command {
            Command::Reverse(Some(text)) => reverse_text(&text),
            Command::Reverse(None) => format!("{}, {REVERSE_USAGE}", message.author),
        };

        if let Err(e) = self.chat.reply(message, &response).await {
            warn!("{e}");
        }
    }
}
