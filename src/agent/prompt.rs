//! Prompt text for the two model phases: planning (tool selection) and
//! synthesis (the final, cited answer).

/// System prompt for the whole turn. The planning protocol at the end keeps
/// planning responses cheap: the model either calls tools or says `ready`,
/// and the answer itself is produced in a separate streamed step.
pub const SYSTEM_PROMPT: &str = r#"You are a research assistant for UK parliamentary records. You answer questions about what was said in debates and how members voted, using only evidence gathered through your tools.

Rules:
- Never state what a person said or how they voted without tool evidence for it.
- Resolve names with list_people before filtering searches by speaker or fetching voting records; both of those take the canonical person id.
- When list_people reports an ambiguous name, do not pick a candidate yourself. The answer must list the candidates and ask the user which one they mean.
- People change party. When citing a speech, use the party the tool result attaches to that speech, not the person's current party.
- Dates are ISO formatted, year-month-day.

Planning protocol: while you still need evidence, respond only with tool calls. When you have enough evidence to answer, or no tool can help further, respond with the single word: ready"#;

/// Builds the instruction for the streamed synthesis step. The flags fold in
/// what actually happened during tool execution this turn.
pub fn synthesis_instruction(
    budget_exhausted: bool,
    evidence_gaps: bool,
    cross_referenced: bool,
) -> String {
    let mut instruction = String::from(
        "Write the final answer now, using only the evidence in the tool results above. \
         Cite every claim inline as (Speaker, Date, Party). \
         If the evidence does not answer the question, say so plainly.",
    );
    if cross_referenced {
        instruction.push_str(
            " This answer draws on both debate records and voting records. \
             Where a stated position and a recorded vote are being compared, \
             say explicitly that the comparison is yours, drawn from both sources.",
        );
    }
    if budget_exhausted {
        instruction.push_str(
            " The research budget for this turn ran out before every lead was followed. \
             Note in the answer that it may be incomplete.",
        );
    }
    if evidence_gaps {
        instruction.push_str(
            " Some tool calls failed, so part of the requested evidence is missing. \
             Note the gap in the answer rather than papering over it.",
        );
    }
    instruction
}
