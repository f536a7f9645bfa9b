//! Twitch IRC connection via `twitch-irc`.
//!
//! Joins the configured channel, turns `PRIVMSG`s into [`ChatMessage`]s and
//! feeds them to the bot shell one at a time.

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};
use twitch_irc::login::StaticLoginCredentials;
use twitch_irc::message::{PrivmsgMessage, ServerMessage};
use twitch_irc::{ClientConfig, SecureTCPTransport, TwitchIRCClient};

use crate::assistant::ChatBackend;
use crate::bot::{BotShell, ChatMessage, ChatReplier};
use crate::config::TwitchConfig;
use crate::error::{ChatError, ConfigError};
use crate::speech::Speaker;

type IrcClient = TwitchIRCClient<SecureTCPTransport, StaticLoginCredentials>;

pub struct TwitchChat {
    client: IrcClient,
}

impl From<PrivmsgMessage> for ChatMessage {
    fn from(msg: PrivmsgMessage) -> Self {
        Self {
            channel: msg.channel_login,
            message_id: msg.message_id,
            author: msg.sender.name,
            content: msg.message_text,
        }
    }
}

fn credentials(config: &TwitchConfig) -> StaticLoginCredentials {
    let token = config.access_token.trim();
    let token = token.strip_prefix("oauth:").unwrap_or(token);

    if !config.client_secret.is_empty() {
        debug!("Client secret configured; chat login only uses the access token");
    }

    if token.is_empty() || config.login.is_empty() {
        warn!("No Twitch login/token configured, joining anonymously (replies disabled)");
        StaticLoginCredentials::anonymous()
    } else {
        StaticLoginCredentials::new(config.login.to_lowercase(), Some(token.to_string()))
    }
}

/// Connect and join the configured channel. Must run inside a tokio runtime.
pub fn connect(
    config: &TwitchConfig,
) -> Result<(TwitchChat, UnboundedReceiver<ServerMessage>), ConfigError> {
    let channel = config.channel.trim().trim_start_matches('#').to_lowercase();
    if channel.is_empty() {
        return Err(ConfigError::MissingTwitchField("channel"));
    }

    let client_config = ClientConfig::new_simple(credentials(config));
    let (incoming, client) = IrcClient::new(client_config);

    client
        .join(channel.clone())
        .map_err(|e| ConfigError::InvalidChannel(format!("{channel}: {e}")))?;
    let login = if config.login.is_empty() {
        "anonymous"
    } else {
        config.login.as_str()
    };
    info!("Joining #{channel} as {login}");

    Ok((TwitchChat { client }, incoming))
}

#[async_trait]
impl ChatReplier for TwitchChat {
    async fn reply(&self, to: &ChatMessage, text: &str) -> Result<(), ChatError> {
        self.client
            .say_in_reply_to(&(to.channel.as_str(), to.message_id.as_str()), text.to_string())
            .await
            .map_err(|e| ChatError(e.to_string()))
    }
}

/// Drain incoming IRC messages until the connection closes.
pub async fn run<B, R, S>(
    mut incoming: UnboundedReceiver<ServerMessage>,
    mut shell: BotShell<B, R, S>,
) where
    B: ChatBackend,
    R: ChatReplier,
    S: Speaker + 'static,
{
    while let Some(message) = incoming.recv().await {
        match message {
            ServerMessage::Privmsg(msg) => shell.handle_message(&ChatMessage::from(msg)).await,
            ServerMessage::Join(join) => info!("Joined #{}", join.channel_login),
            ServerMessage::Notice(notice) => warn!("Twitch notice: {}", notice.message_text),
            _ => {}
        }
    }
    warn!("Twitch connection closed");
}
