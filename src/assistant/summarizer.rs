//! Periodic summarization of the conversation history.
//!
//! Every `frequency` exchanges the whole history is collapsed into one system
//! turn: the initial prompt followed by what the model learned so far.

use tracing::{debug, info};

use super::store::FIELDS_SEPARATOR;
use crate::config::SummaryFailurePolicy;

const SUMMARY_INSTRUCTION: &str = "Hazte un resumen mínimo de los aspectos más relevantes de la conversación \
que has mantenido actualmente y lo aprendido en conversaciones anteriores, con el fin de poder recordarlos más adelante.";

const PREVIOUS_SUMMARY_HEADER: &str = "\n\nEn conversaciones anteriores: ";

const LEARNED_MARKER: &str = ". Aprendido en conversaciones anteriores:";

/// Counts completed exchanges and decides when to summarize.
#[derive(Debug)]
pub struct SummarySchedule {
    frequency: i64,
    counter: i64,
    on_failure: SummaryFailurePolicy,
}

impl SummarySchedule {
    pub fn new(frequency: i64, on_failure: SummaryFailurePolicy) -> Self {
        if frequency <= 0 {
            info!("Summarization disabled (frequency {frequency})");
        }
        Self {
            frequency,
            counter: 0,
            on_failure,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.frequency > 0
    }

    pub fn counter(&self) -> i64 {
        self.counter
    }

    /// Count one exchange. Returns true when a summary is due.
    pub fn record_exchange(&mut self) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.counter += 1;
        debug!("Exchange {}/{}", self.counter, self.frequency);
        self.counter >= self.frequency
    }

    pub fn summary_succeeded(&mut self) {
        self.counter = 0;
    }

    pub fn summary_failed(&mut self) {
        if self.on_failure == SummaryFailurePolicy::ResetCounter {
            self.counter = 0;
        }
    }
}

/// The learned-summary fragment stored after the delimiter of a system turn.
pub fn previous_summary(system_content: &str) -> Option<&str> {
    system_content.split(FIELDS_SEPARATOR).nth(1)
}

/// Instruction appended to the history to ask for a new summary.
pub fn summary_request(system_content: Option<&str>) -> String {
    let mut text = SUMMARY_INSTRUCTION.to_string();
    if let Some(previous) = system_content.and_then(previous_summary) {
        text.push_str(PREVIOUS_SUMMARY_HEADER);
        text.push_str(previous);
    }
    text
}

/// System prompt that replaces the history after a successful summary.
pub fn learned_system_prompt(initial_prompt: &str, summary: &str) -> String {
    format!("{initial_prompt}{LEARNED_MARKER}{FIELDS_SEPARATOR} {summary}")
}
