//! Drives one conversation turn through its phases: plan, execute tools,
//! synthesize. The caller watches progress through a channel of
//! [`TurnEvent`]s; dropping the receiver cancels the turn.

use std::sync::Arc;

use futures_util::StreamExt;
use tracing::{debug, info, instrument};

use crate::message::Message;
use crate::providers::{ChatModel, PlanOutcome, PromptMessage, ToolCallRequest};

use super::prompt::{SYSTEM_PROMPT, synthesis_instruction};
use super::tools::{ToolContext, ToolKind, tool_specs};
use super::AgentError;

/// Progress notifications emitted while a turn runs. Token events carry the
/// streamed answer; tool events let a frontend show what the agent is doing.
#[derive(Clone, Debug)]
pub enum TurnEvent {
    ToolStarted { name: String },
    ToolFinished { name: String, gap: bool },
    Token(String),
}

/// What a finished (or cancelled) turn produced. On cancellation `answer`
/// holds exactly the prefix that reached the consumer.
#[derive(Debug)]
pub struct TurnResult {
    pub answer: String,
    pub aborted: bool,
    pub budget_exhausted: bool,
    pub tool_calls_used: usize,
}

enum Phase {
    Planning,
    ToolExecuting(Vec<ToolCallRequest>),
    Synthesizing,
    Done(String),
}

const SKIPPED_CALL: &str =
    r#"{"status":"skipped","reason":"tool budget for this turn was exhausted"}"#;

pub struct Orchestrator {
    chat: Arc<dyn ChatModel>,
    tools: ToolContext,
    tool_call_budget: usize,
}

impl Orchestrator {
    pub fn new(chat: Arc<dyn ChatModel>, tools: ToolContext, tool_call_budget: usize) -> Self {
        Self {
            chat,
            tools,
            tool_call_budget,
        }
    }

    /// Runs one turn over the given history. The turn always ends in
    /// synthesis: either the model declared it has enough evidence, or the
    /// tool budget ran out and the answer carries an incompleteness note.
    #[instrument(skip(self, history, events), err)]
    pub async fn run_turn(
        &self,
        history: &[Message],
        events: &flume::Sender<TurnEvent>,
    ) -> Result<TurnResult, AgentError> {
        let mut prompt: Vec<PromptMessage> = Vec::with_capacity(history.len() + 8);
        prompt.push(PromptMessage::system(SYSTEM_PROMPT));
        prompt.extend(history.iter().map(PromptMessage::from));
        let specs = tool_specs();

        let mut calls_used = 0usize;
        let mut budget_exhausted = false;
        let mut evidence_gaps = false;
        let mut used_search = false;
        let mut used_votes = false;

        let mut phase = Phase::Planning;
        loop {
            phase = match phase {
                Phase::Planning => {
                    if calls_used >= self.tool_call_budget {
                        budget_exhausted = true;
                        info!(calls_used, "tool budget exhausted, forcing synthesis");
                        Phase::Synthesizing
                    } else {
                        match self.chat.plan(&prompt, &specs).await? {
                            PlanOutcome::ToolCalls(calls) if !calls.is_empty() => {
                                Phase::ToolExecuting(calls)
                            }
                            PlanOutcome::ToolCalls(_) | PlanOutcome::Answer(_) => {
                                Phase::Synthesizing
                            }
                        }
                    }
                }
                Phase::ToolExecuting(calls) => {
                    prompt.push(PromptMessage::assistant_tool_calls(calls.clone()));
                    for call in &calls {
                        if calls_used >= self.tool_call_budget {
                            // every requested call still gets a reply so the
                            // exchange stays well formed
                            budget_exhausted = true;
                            prompt.push(PromptMessage::tool_result(&call.id, SKIPPED_CALL));
                            continue;
                        }
                        if events
                            .send(TurnEvent::ToolStarted {
                                name: call.name.clone(),
                            })
                            .is_err()
                        {
                            return Ok(cancelled(String::new(), budget_exhausted, calls_used));
                        }
                        debug!(tool = %call.name, "executing tool call");
                        let outcome = self.tools.dispatch(call).await?;
                        calls_used += 1;
                        evidence_gaps |= outcome.gap;
                        match outcome.kind {
                            ToolKind::SearchRecords => used_search = true,
                            ToolKind::GetVotingRecord => used_votes = true,
                            ToolKind::ListPeople | ToolKind::Unknown => {}
                        }
                        prompt.push(PromptMessage::tool_result(
                            &call.id,
                            &outcome.payload.to_string(),
                        ));
                        if events
                            .send(TurnEvent::ToolFinished {
                                name: call.name.clone(),
                                gap: outcome.gap,
                            })
                            .is_err()
                        {
                            return Ok(cancelled(String::new(), budget_exhausted, calls_used));
                        }
                    }
                    Phase::Planning
                }
                Phase::Synthesizing => {
                    let cross_referenced = used_search && used_votes;
                    prompt.push(PromptMessage::system(&synthesis_instruction(
                        budget_exhausted,
                        evidence_gaps,
                        cross_referenced,
                    )));
                    let mut stream = self.chat.stream_answer(&prompt).await?;
                    let mut answer = String::new();
                    while let Some(piece) = stream.next().await {
                        let piece = piece?;
                        if events.send(TurnEvent::Token(piece.clone())).is_err() {
                            // consumer went away; answer keeps only what it saw
                            return Ok(cancelled(answer, budget_exhausted, calls_used));
                        }
                        answer.push_str(&piece);
                    }
                    Phase::Done(answer)
                }
                Phase::Done(answer) => {
                    return Ok(TurnResult {
                        answer,
                        aborted: false,
                        budget_exhausted,
                        tool_calls_used: calls_used,
                    });
                }
            };
        }
    }
}

fn cancelled(answer: String, budget_exhausted: bool, tool_calls_used: usize) -> TurnResult {
    TurnResult {
        answer,
        aborted: true,
        budget_exhausted,
        tool_calls_used,
    }
}
