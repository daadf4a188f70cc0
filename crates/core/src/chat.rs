use crate::embeddings::Embedder;
use crate::index::IndexHandle;
use crate::llm::LanguageModel;
use crate::{ChatError, ChatMessage, ConversationTurn, PipelineOptions, ScoredSegment};
use std::sync::Arc;
use tracing::debug;

const CONTEXT_RULE: &str = "--------------------";

#[derive(Debug, Clone)]
pub struct ChatReply {
    pub answer: String,
    pub sources: Vec<ScoredSegment>,
}

/// Retrieval-augmented chat over one built index. Holding a value of this
/// type means the index is ready; the engine keeps no conversation state.
pub struct ChatEngine {
    index: IndexHandle,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn LanguageModel>,
    top_k: usize,
    memory_turns: usize,
    system_prompt: String,
}

impl ChatEngine {
    pub fn new(
        index: IndexHandle,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LanguageModel>,
        options: &PipelineOptions,
    ) -> Self {
        Self {
            index,
            embedder,
            llm,
            top_k: options.top_k.max(1),
            memory_turns: options.memory_turns,
            system_prompt: options.system_prompt.clone(),
        }
    }

    pub fn index(&self) -> &IndexHandle {
        &self.index
    }

    pub async fn chat(
        &self,
        question: &str,
        history: &[ConversationTurn],
    ) -> Result<ChatReply, ChatError> {
        let query_vector = self.embedder.embed(question).await?;
        let sources = self.index.search(&query_vector, question, self.top_k).await?;

        debug!(
            retrieved = sources.len(),
            top_score = sources.first().map(|hit| hit.score).unwrap_or_default(),
            "context retrieved"
        );

        let messages = compose_messages(
            &self.system_prompt,
            &sources,
            history,
            self.memory_turns,
            question,
        );
        let answer = self.llm.complete(&messages).await?;

        Ok(ChatReply { answer, sources })
    }
}

/// System instruction plus retrieved context, then the last `memory_turns`
/// turns, then the question.
pub fn compose_messages(
    system_prompt: &str,
    sources: &[ScoredSegment],
    history: &[ConversationTurn],
    memory_turns: usize,
    question: &str,
) -> Vec<ChatMessage> {
    let context = sources
        .iter()
        .map(|hit| {
            format!(
                "source: {}\nsection: {}\n\n{}",
                hit.segment.metadata.source.name,
                hit.segment.metadata.header_path,
                hit.segment.text.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let system = format!(
        "{}\n\nContext information from the document is below.\n{CONTEXT_RULE}\n{}\n{CONTEXT_RULE}\nAnswer the user's question using only this context.",
        system_prompt.trim(),
        context
    );

    let recent = &history[history.len().saturating_sub(memory_turns)..];
    let mut messages = Vec::with_capacity(2 + recent.len() * 2);
    messages.push(ChatMessage::system(system));
    for turn in recent {
        messages.push(ChatMessage::user(turn.question.clone()));
        messages.push(ChatMessage::assistant(turn.answer.clone()));
    }
    messages.push(ChatMessage::user(question));
    messages
}
