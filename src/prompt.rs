//! Prompt assembly.
//!
//! A prompt is a fixed two-message structure: a system message holding the
//! grounding instruction with the retrieved passages substituted into its
//! `{context}` placeholder, and a user message holding the raw question.

use serde::{Deserialize, Serialize};

use crate::models::Chunk;

/// Grounding instruction. The model must answer from the context only and
/// say so explicitly when the context is insufficient.
pub const DEFAULT_SYSTEM_PROMPT: &str = "你是一个严谨的RAG助手。请根据上下文信息回答问题(如果上下文信息不足以回答问题，请直接说'上下文信息不充分，无法回答'。): \n{context}";

const CONTEXT_PLACEHOLDER: &str = "{context}";
const CONTEXT_SEPARATOR: &str = "\n\n";

/// Chat message role as understood by OpenAI-compatible endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

/// The system/user message pair sent to the generation endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn messages(&self) -> Vec<Message> {
        vec![
            Message {
                role: MessageRole::System,
                content: self.system.clone(),
            },
            Message {
                role: MessageRole::User,
                content: self.user.clone(),
            },
        ]
    }
}

#[derive(Debug, Clone)]
pub struct PromptAssembler {
    system_template: String,
}

impl Default for PromptAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_PROMPT)
    }
}

impl PromptAssembler {
    pub fn new(system_template: impl Into<String>) -> Self {
        Self {
            system_template: system_template.into(),
        }
    }

    pub fn assemble(&self, contexts: &[Chunk], question: &str) -> Prompt {
        let joined = contexts
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR);

        Prompt {
            system: self.system_template.replace(CONTEXT_PLACEHOLDER, &joined),
            user: question.to_string(),
        }
    }
}
