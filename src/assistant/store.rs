//! Conversation history and its personality file.
//!
//! A personality file lives at `<personalities_path>/<name>.her` and holds one
//! turn per line as `role|/=content`. Everything after the first delimiter is
//! content, so a learned summary embedded after a second delimiter survives.
//! Backslashes and line breaks in content are escaped to keep one turn per line.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::turn::{Role, Turn};
use crate::error::PersistenceError;

pub const FIELDS_SEPARATOR: &str = "|/=";
const PERSONALITY_EXTENSION: &str = "her";

pub struct ConversationStore {
    turns: Vec<Turn>,
    path: PathBuf,
}

impl ConversationStore {
    pub fn new(personalities_path: &Path, personality_name: &str) -> Self {
        let path = personalities_path.join(format!("{personality_name}.{PERSONALITY_EXTENSION}"));
        Self {
            turns: Vec::new(),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn append(&mut self, role: Role, content: impl Into<String>) {
        self.turns.push(Turn::new(role, content));
    }

    /// Remove and return the newest turn.
    pub fn pop(&mut self) -> Option<Turn> {
        self.turns.pop()
    }

    /// Content of the first system turn, if any.
    pub fn system_content(&self) -> Option<&str> {
        self.turns
            .iter()
            .find(|t| t.role == Role::System)
            .map(|t| t.content.as_str())
    }

    /// Drop the whole history and keep a single system turn.
    pub fn replace_with_system(&mut self, content: impl Into<String>) {
        self.turns.clear();
        self.turns.push(Turn::system(content));
    }

    /// Put `prompt` in front as a system turn unless the history already has
    /// one. A blank system turn counts as missing and is filled in place.
    pub fn ensure_system(&mut self, prompt: &str) {
        match self.turns.iter_mut().find(|t| t.role == Role::System) {
            Some(turn) if turn.content.trim().is_empty() => turn.content = prompt.to_string(),
            Some(_) => {}
            None => self.turns.insert(0, Turn::system(prompt)),
        }
    }

    /// Whether the personality file can be opened for reading.
    pub fn exists(&self) -> bool {
        fs::File::open(&self.path).is_ok()
    }

    /// Replace the history with the personality file contents.
    ///
    /// Returns the number of turns loaded. Failures are logged and leave the
    /// history untouched so the caller can seed it.
    pub fn load(&mut self) -> usize {
        match self.read_turns() {
            Ok(turns) => {
                let count = turns.len();
                self.turns = turns;
                info!("Loaded {count} turns from {}", self.path.display());
                count
            }
            Err(e) => {
                warn!("Failed to load personality: {e}");
                0
            }
        }
    }

    /// Write the history to the personality file, creating its directory.
    ///
    /// Failures are logged and the save is skipped.
    pub fn save(&self) -> bool {
        match self.write_turns() {
            Ok(()) => {
                debug!("Saved {} turns to {}", self.turns.len(), self.path.display());
                true
            }
            Err(e) => {
                warn!("Failed to save personality: {e}");
                false
            }
        }
    }

    fn read_turns(&self) -> Result<Vec<Turn>, PersistenceError> {
        let contents = fs::read_to_string(&self.path).map_err(|source| PersistenceError::Read {
            path: self.path.clone(),
            source,
        })?;

        Ok(contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match parse_line(line) {
                Ok(turn) => Some(turn),
                Err(e) => {
                    warn!("Skipping personality line: {e}");
                    None
                }
            })
            .collect())
    }

    fn write_turns(&self) -> Result<(), PersistenceError> {
        let write_err = |source| PersistenceError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(write_err)?;
        }

        let mut out = String::new();
        for turn in &self.turns {
            out.push_str(&format_line(turn));
            out.push('\n');
        }
        fs::write(&self.path, out).map_err(write_err)
    }
}

fn format_line(turn: &Turn) -> String {
    format!("{}{FIELDS_SEPARATOR}{}", turn.role, escape(&turn.content))
}

fn parse_line(line: &str) -> Result<Turn, String> {
    // At most three fields: role, content, and a summary fragment that belongs
    // to the content.
    let mut fields = line.splitn(3, FIELDS_SEPARATOR);
    let role = fields.next().unwrap_or_default();
    let Some(content) = fields.next() else {
        return Err(format!("missing separator in {line:?}"));
    };
    let role: Role = role.parse()?;

    let mut content = content.to_string();
    if let Some(rest) = fields.next() {
        content.push_str(FIELDS_SEPARATOR);
        content.push_str(rest);
    }
    Ok(Turn::new(role, unescape(&content)))
}

fn escape(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    for ch in content.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut chars = content.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            // Unknown escapes are kept verbatim (hand-edited files).
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir, name: &str) -> ConversationStore {
        ConversationStore::new(dir.path(), name)
    }

    #[test]
    fn save_then_load_reproduces_turns() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir, "streamer");
        store.append(Role::System, "Eres un comentarista.");
        store.append(Role::User, "ana: hola!");
        store.append(Role::Assistant, "Hola Ana, bienvenida al directo.");
        assert!(store.save());

        let mut fresh = store_in(&dir, "streamer");
        assert!(fresh.exists());
        assert_eq!(fresh.load(), 3);
        assert_eq!(fresh.turns(), store.turns());
    }

    #[test]
    fn multiline_and_delimiter_content_round_trips() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir, "tricky");
        store.append(
            Role::System,
            format!("Prompt. Aprendido en conversaciones anteriores:{FIELDS_SEPARATOR} resumen"),
        );
        store.append(Role::Assistant, "línea uno\nlínea dos\\fin\r");
        store.append(Role::User, "a|/=b|/=c|/=d");
        store.save();

        let mut fresh = store_in(&dir, "tricky");
        fresh.load();
        assert_eq!(fresh.turns(), store.turns());
    }

    #[test]
    fn loads_plain_system_line() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("bot.her"), "system|/=You are helpful.").unwrap();

        let mut store = store_in(&dir, "bot");
        assert_eq!(store.load(), 1);
        assert_eq!(store.turns(), &[Turn::system("You are helpful.")]);
    }

    #[test]
    fn three_field_line_keeps_summary_fragment() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("bot.her"),
            "system|/=Prompt. Aprendido en conversaciones anteriores:|/= le gusta el ajedrez\n",
        )
        .unwrap();

        let mut store = store_in(&dir, "bot");
        store.load();
        assert_eq!(
            store.system_content(),
            Some("Prompt. Aprendido en conversaciones anteriores:|/= le gusta el ajedrez")
        );
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("bot.her"),
            "no separator here\nwizard|/=spells\n\nuser|/=hola\n",
        )
        .unwrap();

        let mut store = store_in(&dir, "bot");
        assert_eq!(store.load(), 1);
        assert_eq!(store.turns(), &[Turn::user("hola")]);
    }

    #[test]
    fn missing_file_leaves_history_untouched() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir, "X");
        assert!(!store.exists());

        store.append(Role::System, "seed");
        assert_eq!(store.load(), 0);
        assert_eq!(store.turns(), &[Turn::system("seed")]);
    }

    #[test]
    fn save_creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        let mut store = ConversationStore::new(&nested, "deep");
        store.append(Role::System, "prompt");

        assert!(store.save());
        assert_eq!(
            fs::read_to_string(nested.join("deep.her")).unwrap(),
            "system|/=prompt\n"
        );
    }

    #[test]
    fn save_failure_is_reported_not_raised() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "not a directory").unwrap();

        let mut store = ConversationStore::new(&blocker, "bot");
        store.append(Role::System, "prompt");
        assert!(!store.save());
    }

    #[test]
    fn ensure_system_only_seeds_when_missing() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir, "bot");
        store.append(Role::User, "hola");
        store.ensure_system("prompt");
        store.ensure_system("other");

        assert_eq!(store.turns()[0], Turn::system("prompt"));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn raw_multiline_prompt_file_is_reseeded() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir, "legacy");
        fs::write(
            store.path(),
            "system|/=\nTu propósito es comentar.\nSin emotes.\nuser|/=hola\n",
        )
        .unwrap();

        assert_eq!(store.load(), 2);
        assert_eq!(store.system_content(), Some(""));

        store.ensure_system("prompt");
        assert_eq!(store.turns()[0], Turn::system("prompt"));
        assert_eq!(store.turns()[1].content, "hola");
        assert_eq!(store.len(), 2);
    }
}
