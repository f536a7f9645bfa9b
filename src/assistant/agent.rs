//! Conversation agent: history, summaries and persistence around a chat backend.

use tracing::{info, warn};

use super::chat_client::ChatBackend;
use super::store::ConversationStore;
use super::summarizer::{learned_system_prompt, summary_request, SummarySchedule};
use super::turn::Role;
use crate::config::AssistantConfig;
use crate::error::RemoteCallError;

pub struct ConversationAgent<B> {
    backend: B,
    store: ConversationStore,
    schedule: SummarySchedule,
    initial_prompt: String,
    auto_save: bool,
}

impl<B: ChatBackend> ConversationAgent<B> {
    /// Build an agent, restoring the named personality when its file exists
    /// and seeding the initial prompt otherwise.
    pub fn new(config: &AssistantConfig, backend: B) -> Self {
        let mut store =
            ConversationStore::new(&config.personalities_path, &config.personality_name);

        if store.exists() {
            store.load();
        } else {
            info!(
                "No saved personality at {}, starting fresh",
                store.path().display()
            );
        }
        store.ensure_system(&config.initial_prompt);

        Self {
            backend,
            store,
            schedule: SummarySchedule::new(config.summarization_frequency, config.summary_failure),
            initial_prompt: config.initial_prompt.clone(),
            auto_save: config.auto_save,
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    #[cfg(test)]
    pub fn schedule(&self) -> &SummarySchedule {
        &self.schedule
    }

    /// Send a user message and return the assistant's reply.
    ///
    /// The user turn stays in the history even when the call fails.
    pub async fn send_message(&mut self, text: &str) -> Result<String, RemoteCallError> {
        self.store.append(Role::User, text);

        let reply = match self.backend.complete(self.store.turns()).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Chat completion failed: {e}");
                return Err(e);
            }
        };
        self.store.append(Role::Assistant, reply.clone());

        if self.schedule.record_exchange() {
            info!("Performing summarization after {} exchanges...", self.schedule.counter());
            self.summarize().await;
        }

        Ok(reply)
    }

    /// Collapse the history into a single system turn carrying a fresh summary.
    ///
    /// On failure the history is left as it was.
    pub async fn summarize(&mut self) {
        let request = summary_request(self.store.system_content());
        self.store.append(Role::User, request);

        match self.backend.complete(self.store.turns()).await {
            Ok(summary) => {
                let prompt = learned_system_prompt(&self.initial_prompt, &summary);
                info!("(System) {prompt}");
                self.store.replace_with_system(prompt);
                self.schedule.summary_succeeded();
                if self.auto_save {
                    self.store.save();
                }
            }
            Err(e) => {
                warn!("Summarization failed: {e}");
                self.store.pop();
                self.schedule.summary_failed();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::turn::Turn;
    use crate::config::SummaryFailurePolicy;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Replays canned replies and records every history it was sent.
    #[derive(Default)]
    struct ScriptedBackend {
        replies: Mutex<VecDeque<Result<String, RemoteCallError>>>,
        seen: Mutex<Vec<Vec<Turn>>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Result<&str, &str>>) -> Self {
            let replies = replies
                .into_iter()
                .map(|r| r.map(str::to_string).map_err(|e| RemoteCallError::Malformed(e.into())))
                .collect();
            Self {
                replies: Mutex::new(replies),
                seen: Mutex::default(),
            }
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn complete(&self, history: &[Turn]) -> Result<String, RemoteCallError> {
            self.seen.lock().unwrap().push(history.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(RemoteCallError::Malformed("script exhausted".into())))
        }
    }

    fn assistant_config(dir: &TempDir, frequency: i64) -> AssistantConfig {
        AssistantConfig {
            initial_prompt: "Eres un comentarista".into(),
            personalities_path: dir.path().to_path_buf(),
            personality_name: "X".into(),
            summarization_frequency: frequency,
            auto_save: true,
            summary_failure: SummaryFailurePolicy::RetryNextExchange,
        }
    }

    #[tokio::test]
    async fn fresh_personality_seeds_initial_prompt() {
        let dir = TempDir::new().unwrap();
        let agent = ConversationAgent::new(&assistant_config(&dir, 5), ScriptedBackend::default());

        assert!(!agent.store().exists());
        assert_eq!(agent.store().turns(), &[Turn::system("Eres un comentarista")]);
    }

    #[tokio::test]
    async fn saved_personality_is_restored() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("X.her"), "system|/=You are helpful.\n").unwrap();

        let agent = ConversationAgent::new(&assistant_config(&dir, 5), ScriptedBackend::default());
        assert_eq!(agent.store().turns(), &[Turn::system("You are helpful.")]);
    }

    #[tokio::test]
    async fn blank_saved_prompt_gets_initial_prompt() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("X.her"),
            "system|/=\nPrompt partido\nen varias líneas\n",
        )
        .unwrap();

        let agent = ConversationAgent::new(&assistant_config(&dir, 5), ScriptedBackend::default());
        assert_eq!(agent.store().turns(), &[Turn::system("Eres un comentarista")]);
    }

    #[tokio::test]
    async fn exchange_appends_user_and_assistant_turns() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::new(vec![Ok("¡Hola!")]);
        let mut agent = ConversationAgent::new(&assistant_config(&dir, 5), backend);

        let reply = agent.send_message("ana: hola").await.unwrap();
        assert_eq!(reply, "¡Hola!");
        assert_eq!(
            agent.store().turns(),
            &[
                Turn::system("Eres un comentarista"),
                Turn::user("ana: hola"),
                Turn::assistant("¡Hola!"),
            ]
        );
        assert_eq!(agent.schedule().counter(), 1);
    }

    #[tokio::test]
    async fn failed_call_keeps_user_turn() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::new(vec![Err("connection refused")]);
        let mut agent = ConversationAgent::new(&assistant_config(&dir, 5), backend);

        assert!(agent.send_message("ana: hola").await.is_err());
        assert_eq!(agent.store().len(), 2);
        assert_eq!(agent.store().turns()[1], Turn::user("ana: hola"));
        assert_eq!(agent.schedule().counter(), 0);
    }

    #[tokio::test]
    async fn summary_collapses_history_and_saves() {
        let dir = TempDir::new().unwrap();
        let backend =
            ScriptedBackend::new(vec![Ok("uno"), Ok("dos"), Ok("a Ana le gusta el ajedrez")]);
        let mut agent = ConversationAgent::new(&assistant_config(&dir, 2), backend);

        agent.send_message("ana: hola").await.unwrap();
        let reply = agent.send_message("ana: juego al ajedrez").await.unwrap();
        assert_eq!(reply, "dos");

        let turns = agent.store().turns();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, Role::System);
        assert!(turns[0].content.starts_with("Eres un comentarista"));
        assert_eq!(
            turns[0].content,
            "Eres un comentarista. Aprendido en conversaciones anteriores:|/= a Ana le gusta el ajedrez"
        );
        assert_eq!(agent.schedule().counter(), 0);

        // The summary request went out with the full history plus the instruction.
        let seen = agent.backend.seen.lock().unwrap();
        let request = seen.last().unwrap();
        assert_eq!(request.len(), 6);
        assert!(request[5].content.starts_with("Hazte un resumen"));

        let saved = std::fs::read_to_string(dir.path().join("X.her")).unwrap();
        assert_eq!(saved, format!("system|/={}\n", turns[0].content));
    }

    #[tokio::test]
    async fn second_summary_carries_previous_one() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::new(vec![
            Ok("r1"),
            Ok("primer resumen"),
            Ok("r2"),
            Ok("segundo resumen"),
        ]);
        let mut agent = ConversationAgent::new(&assistant_config(&dir, 1), backend);

        agent.send_message("a").await.unwrap();
        agent.send_message("b").await.unwrap();

        let seen = agent.backend.seen.lock().unwrap();
        let instruction = &seen[3].last().unwrap().content;
        assert!(instruction.ends_with("En conversaciones anteriores:  primer resumen"));
        drop(seen);

        assert!(agent.store().turns()[0].content.ends_with("|/= segundo resumen"));
    }

    #[tokio::test]
    async fn failed_summary_leaves_history_and_retries() {
        let dir = TempDir::new().unwrap();
        let backend =
            ScriptedBackend::new(vec![Ok("uno"), Err("timeout"), Ok("dos"), Ok("resumen")]);
        let mut agent = ConversationAgent::new(&assistant_config(&dir, 1), backend);

        agent.send_message("a").await.unwrap();
        assert_eq!(agent.store().len(), 3);
        assert_eq!(agent.schedule().counter(), 1);
        assert!(!dir.path().join("X.her").exists());

        agent.send_message("b").await.unwrap();
        assert_eq!(agent.store().len(), 1);
    }

    #[tokio::test]
    async fn negative_frequency_never_summarizes() {
        let dir = TempDir::new().unwrap();
        let replies = (0..30).map(|_| Ok("ok")).collect();
        let backend = ScriptedBackend::new(replies);
        let mut agent = ConversationAgent::new(&assistant_config(&dir, -1), backend);

        for i in 0..30 {
            agent.send_message(&format!("msg {i}")).await.unwrap();
        }
        assert_eq!(agent.store().len(), 61);
    }
}
