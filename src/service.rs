//! Conversation-facing wrapper around the agent loop.
//!
//! Owns turn persistence: the user message lands in the thread before the
//! model runs, and the assistant answer lands after. A consumer that walks
//! away mid-stream still leaves the flushed prefix on record, so a reopened
//! thread reads exactly what was delivered.

use miette::Diagnostic;
use thiserror::Error;

use crate::agent::{AgentError, Orchestrator, TurnEvent, TurnResult};
use crate::message::Message;
use crate::store::{ConversationStore, StoreError};

#[derive(Debug, Error, Diagnostic)]
pub enum ChatError {
    #[error(transparent)]
    #[diagnostic(code(debatesmith::service::agent))]
    Agent(#[from] AgentError),

    #[error(transparent)]
    #[diagnostic(code(debatesmith::service::store))]
    Store(#[from] StoreError),
}

/// One persistent conversation surface over the orchestrator.
pub struct ChatService {
    conversations: ConversationStore,
    orchestrator: Orchestrator,
}

impl ChatService {
    pub fn new(conversations: ConversationStore, orchestrator: Orchestrator) -> Self {
        Self {
            conversations,
            orchestrator,
        }
    }

    /// Runs one turn on a thread. The question is persisted before the
    /// loop starts, so it survives even a turn that dies mid-flight.
    pub async fn respond(
        &self,
        thread_id: &str,
        user_text: &str,
        events: &flume::Sender<TurnEvent>,
    ) -> Result<TurnResult, ChatError> {
        self.conversations
            .append(thread_id, &Message::user(user_text))
            .await?;
        let history = self.conversations.history(thread_id).await?;
        let result = self.orchestrator.run_turn(&history, events).await?;
        if !result.answer.is_empty() {
            self.conversations
                .append(thread_id, &Message::assistant(&result.answer))
                .await?;
        }
        Ok(result)
    }

    /// Full transcript of a thread in delivery order.
    pub async fn history(&self, thread_id: &str) -> Result<Vec<Message>, ChatError> {
        Ok(self.conversations.history(thread_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use futures_util::stream;
    use tempfile::tempdir;

    use crate::agent::ToolContext;
    use crate::providers::{
        ChatModel, Embedder, PlanOutcome, PromptMessage, ProviderError, TokenStream, ToolSpec,
    };
    use crate::resolve::EntityResolver;
    use crate::retrieval::HybridSearcher;
    use crate::store::Database;

    struct DirectChat {
        chunks: Vec<String>,
    }

    #[async_trait]
    impl ChatModel for DirectChat {
        async fn plan(
            &self,
            _history: &[PromptMessage],
            _tools: &[ToolSpec],
        ) -> Result<PlanOutcome, ProviderError> {
            Ok(PlanOutcome::Answer("ready".to_string()))
        }

        async fn stream_answer(
            &self,
            _history: &[PromptMessage],
        ) -> Result<TokenStream, ProviderError> {
            let pieces: Vec<Result<String, ProviderError>> =
                self.chunks.iter().cloned().map(Ok).collect();
            Ok(Box::pin(stream::iter(pieces)))
        }

        async fn complete(&self, _history: &[PromptMessage]) -> Result<String, ProviderError> {
            unimplemented!("not used by the service")
        }
    }

    struct ZeroEmbedder;

    #[async_trait]
    impl Embedder for ZeroEmbedder {
        fn model_id(&self) -> &str {
            "test-embed"
        }

        fn dimensions(&self) -> usize {
            3
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
        }
    }

    async fn service(db: &Database, chunks: &[&str]) -> ChatService {
        let chat = Arc::new(DirectChat {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
        });
        let tools = ToolContext::new(
            HybridSearcher::new(db.corpus(), Arc::new(ZeroEmbedder), 50),
            EntityResolver::new(db.people()),
            db.people(),
            db.votes(),
            10,
        );
        ChatService::new(db.conversations(), Orchestrator::new(chat, tools, 6))
    }

    #[tokio::test]
    async fn turns_persist_question_then_answer() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("chat.db"), "test-embed", 3)
            .await
            .unwrap();
        let service = service(&db, &["The ", "answer."]).await;
        let (tx, _rx) = flume::unbounded();

        let result = service
            .respond("t1", "What was said about wind?", &tx)
            .await
            .unwrap();
        assert_eq!(result.answer, "The answer.");

        let history = service.history("t1").await.unwrap();
        let roles: Vec<&str> = history.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant"]);
        assert_eq!(history[1].content, "The answer.");
    }

    #[tokio::test]
    async fn history_accumulates_across_turns_and_restarts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chat.db");
        {
            let db = Database::open(&path, "test-embed", 3).await.unwrap();
            let service = service(&db, &["First."]).await;
            let (tx, _rx) = flume::unbounded();
            service.respond("t1", "Opening question?", &tx).await.unwrap();
        }

        // Same thread, fresh process.
        let db = Database::open(&path, "test-embed", 3).await.unwrap();
        let service = service(&db, &["Second."]).await;
        let (tx, _rx) = flume::unbounded();
        service.respond("t1", "Followup?", &tx).await.unwrap();

        let history = service.history("t1").await.unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["Opening question?", "First.", "Followup?", "Second."]
        );
    }

    #[tokio::test]
    async fn cancelled_turn_with_nothing_delivered_keeps_only_the_question() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("chat.db"), "test-embed", 3)
            .await
            .unwrap();
        let service = service(&db, &["Never ", "delivered."]).await;
        let (tx, rx) = flume::unbounded();
        drop(rx);

        let result = service.respond("t1", "Anyone there?", &tx).await.unwrap();
        assert!(result.aborted);
        assert_eq!(result.answer, "");

        let history = service.history("t1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, "user");
    }
}
