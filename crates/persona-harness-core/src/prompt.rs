//! Special prompts and final prompt rendering.
//!
//! A special prompt is a reserved query string (e.g. a UI chip such as
//! `be_my_boss`) that swaps in a hand-tuned retrieval query and injects an
//! instruction block. Two modes exist:
//!
//! | Mode | Instructions |
//! |------|--------------|
//! | [`SpecialPromptMode::Static`] | the same block every time |
//! | [`SpecialPromptMode::AssignTask`] | one random incomplete task, or a celebration block when none remain |
//!
//! [`PromptRequest::render`] lays out the user turn in a fixed order:
//! conversation context, style reference, special instructions, then the
//! literal query.

use std::collections::BTreeMap;

use crate::models::{PersonaLabels, RetrievalDocument};
use crate::persona::style_reference;
use crate::tasks::Task;

/// Placeholder replaced by the task text in assign-task templates.
pub const TASK_PLACEHOLDER: &str = "{task}";

/// Separator between retrieved documents in the context block.
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// How a special prompt produces its instruction block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialPromptMode {
    /// Persona quirk: a fixed instruction block, no state.
    Static { instructions: String },
    /// Assign one incomplete task. `template` contains [`TASK_PLACEHOLDER`].
    AssignTask { template: String, all_done: String },
}

/// A reserved query string with its retrieval query and instruction mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialPrompt {
    pub id: String,
    /// Replaces the literal query when searching the corpus.
    pub retrieval_query: String,
    pub mode: SpecialPromptMode,
}

/// The fixed set of recognized special prompts, keyed by ID.
#[derive(Debug, Clone, Default)]
pub struct SpecialPromptSet {
    prompts: BTreeMap<String, SpecialPrompt>,
}

impl SpecialPromptSet {
    pub fn new<I>(prompts: I) -> Self
    where
        I: IntoIterator<Item = SpecialPrompt>,
    {
        Self {
            prompts: prompts.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&SpecialPrompt> {
        self.prompts.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.prompts.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

/// Instruction block injected into a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SpecialInstructions {
    #[default]
    NoInstructions,
    Static(String),
    /// Instructions assigning a task, with the ID of the selected task.
    Task { text: String, task_id: i64 },
}

impl SpecialInstructions {
    pub fn text(&self) -> Option<&str> {
        match self {
            SpecialInstructions::NoInstructions => None,
            SpecialInstructions::Static(text) | SpecialInstructions::Task { text, .. } => {
                Some(text.as_str())
            }
        }
    }

    pub fn task_id(&self) -> Option<i64> {
        match self {
            SpecialInstructions::Task { task_id, .. } => Some(*task_id),
            _ => None,
        }
    }
}

/// Instructions for the assign-task mode given the selected task (if any).
pub fn task_instructions(template: &str, all_done: &str, task: Option<&Task>) -> SpecialInstructions {
    match task {
        Some(task) => SpecialInstructions::Task {
            text: template.replace(TASK_PLACEHOLDER, &task.task),
            task_id: task.id,
        },
        None => SpecialInstructions::Static(all_done.to_string()),
    }
}

/// Everything needed to build one generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    /// The literal user input.
    pub query: String,
    /// The query actually sent to retrieval (substituted for special prompts).
    pub retrieval_query: String,
    pub retrieved_documents: Vec<RetrievalDocument>,
    pub instructions: SpecialInstructions,
}

impl PromptRequest {
    pub fn special_instructions(&self) -> Option<&str> {
        self.instructions.text()
    }

    pub fn selected_task_id(&self) -> Option<i64> {
        self.instructions.task_id()
    }

    /// Render the user turn sent to the generator.
    pub fn render(&self, labels: &PersonaLabels) -> String {
        let context_block = self
            .retrieved_documents
            .iter()
            .map(|d| d.text.as_str())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR);
        let style_block = style_reference(
            self.retrieved_documents.iter().map(|d| d.text.as_str()),
            &labels.self_label,
        );

        let me = &labels.self_label;
        let them = &labels.other_label;

        let mut prompt = format!(
            "Here are relevant excerpts from {me} and {them}'s text conversations \
             (for understanding what was being discussed):\n\n\
             <conversations>\n{context_block}\n</conversations>\n\n\
             Here are ONLY {me}'s messages extracted from those conversations. \
             THIS is the voice and style you must match exactly:\n\n\
             <style_reference>\n{style_block}\n</style_reference>\n\n"
        );

        if let Some(instructions) = self.special_instructions() {
            prompt.push_str(instructions);
            prompt.push_str("\n\n");
        }

        prompt.push_str(&format!(
            "{them} just texted you: {}\n\nRespond as {me}:",
            self.query
        ));
        prompt
    }
}

/// System prompt used when the configuration does not supply one.
pub fn default_system_prompt(labels: &PersonaLabels) -> String {
    let me = &labels.self_label;
    let them = &labels.other_label;
    format!(
        "You are {me}, texting with {them}. You will be given excerpts from {me} and \
         {them}'s real text conversations. Respond ONLY in {me}'s voice.\n\n\
         In the excerpts, lines starting with \"{me}:\" are YOUR voice. Lines starting \
         with \"{them}:\" are the person talking to you. Study ONLY the \"{me}:\" lines \
         to learn how to respond: capitalization, abbreviations, punctuation, message \
         length, humor, emoji and slang.\n\n\
         Do NOT mimic {them}'s texting style. Those lines are only there for context.\n\n\
         Rules:\n\
         - Always respond as {me}, never break character\n\
         - Keep responses concise like real texts, not long paragraphs\n\
         - Reference real memories and inside jokes when relevant\n\
         - If you don't have context for something, improvise in {me}'s voice"
    )
}
