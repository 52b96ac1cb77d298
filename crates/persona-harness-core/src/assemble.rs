//! Per-request context assembly.
//!
//! [`ContextAssembler`] turns one user query into a [`PromptRequest`]:
//!
//! 1. Resolve special instructions. A query equal to a recognized special
//!    prompt ID (or an explicit ID passed by the caller) swaps in the prompt's
//!    retrieval query and produces its instruction block. Assign-task prompts
//!    draw one incomplete task from the [`TaskStore`].
//! 2. Retrieve the top-K documents for the (possibly substituted) query.
//!
//! The assembler never marks tasks completed; completion is a separate,
//! explicit action.

use thiserror::Error;

use crate::prompt::{task_instructions, PromptRequest, SpecialInstructions, SpecialPromptMode, SpecialPromptSet};
use crate::retrieval::RetrievalService;
use crate::tasks::TaskStore;

/// Number of documents retrieved when no other value is configured.
pub const DEFAULT_TOP_K: usize = 10;

#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("retrieval failed: {0:#}")]
    Retrieval(anyhow::Error),
    #[error("task store failed: {0:#}")]
    Tasks(anyhow::Error),
    #[error("unknown special prompt '{0}'")]
    UnknownSpecialPrompt(String),
}

/// Builds prompt requests from a retrieval service, a task store and the
/// configured special prompts.
pub struct ContextAssembler<'a> {
    retrieval: &'a dyn RetrievalService,
    tasks: &'a dyn TaskStore,
    prompts: &'a SpecialPromptSet,
    top_k: usize,
}

impl<'a> ContextAssembler<'a> {
    pub fn new(
        retrieval: &'a dyn RetrievalService,
        tasks: &'a dyn TaskStore,
        prompts: &'a SpecialPromptSet,
    ) -> Self {
        Self {
            retrieval,
            tasks,
            prompts,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Assemble the request for `query`.
    ///
    /// `special` names a special prompt explicitly; an unknown explicit ID is
    /// an error. Without it, the query itself is checked against the
    /// recognized IDs (exact match) and falls through to a plain request
    /// when it matches none.
    pub async fn assemble(
        &self,
        query: &str,
        special: Option<&str>,
    ) -> Result<PromptRequest, AssembleError> {
        let prompt = match special {
            Some(id) => Some(
                self.prompts
                    .get(id)
                    .ok_or_else(|| AssembleError::UnknownSpecialPrompt(id.to_string()))?,
            ),
            None => self.prompts.get(query),
        };

        let (retrieval_query, instructions) = match prompt {
            None => (query.to_string(), SpecialInstructions::NoInstructions),
            Some(prompt) => {
                let instructions = match &prompt.mode {
                    SpecialPromptMode::Static { instructions } => {
                        SpecialInstructions::Static(instructions.clone())
                    }
                    SpecialPromptMode::AssignTask { template, all_done } => {
                        let task = self
                            .tasks
                            .select_incomplete()
                            .await
                            .map_err(AssembleError::Tasks)?;
                        task_instructions(template, all_done, task.as_ref())
                    }
                };
                tracing::debug!(special = %prompt.id, "resolved special prompt");
                (prompt.retrieval_query.clone(), instructions)
            }
        };

        let retrieved_documents = self
            .retrieval
            .query(&retrieval_query, self.top_k)
            .await
            .map_err(AssembleError::Retrieval)?;

        Ok(PromptRequest {
            query: query.to_string(),
            retrieval_query,
            retrieved_documents,
            instructions,
        })
    }
}
