//! Contextual chunk assembly.
//!
//! Utterances accumulate into chunks under a token budget. A chunk never
//! mixes speakers or topics, with one exception: an answer may share a
//! chunk with the question that triggered it (the pair reads as one unit
//! of evidence). When a budget split separates consecutive text by the
//! same speaker, the next chunk re-includes a trailing sentence window
//! from the previous one so context survives the boundary. When a split
//! separates an answer from its question, the answer chunk keeps a
//! back-reference to the question's sequence number instead.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::NaiveDate;
use rustc_hash::{FxHashMap, FxHashSet};
use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

use crate::transcript::{SpeechKind, Utterance};

use super::tokens::TokenCounter;

/// A retrievable unit of debate text with denormalized metadata.
///
/// Chunks that join a question with its answer are attributed to the
/// answerer; the question text is carried as context.
#[derive(Clone, Debug, PartialEq)]
pub struct DebateChunk {
    pub id: String,
    pub debate_id: String,
    /// Position of this chunk within its debate.
    pub chunk_index: usize,
    /// Display text: raw utterance text, or its summary when the source
    /// exceeded the summarization threshold.
    pub text: String,
    /// Text handed to the embedding producer: speaker line plus a context
    /// footer (date, topic, linked question).
    pub embedding_text: String,
    pub date: NaiveDate,
    pub speaker_name: Option<String>,
    pub person_id: Option<i64>,
    pub office: Option<String>,
    /// Party at the sitting date. Resolved by the pipeline after assembly;
    /// `None` means unknown.
    pub party: Option<String>,
    pub topic_path: Vec<String>,
    /// Bounds of the covered span; `source_seqs` lists the exact
    /// sequences, which may skip unattributed speech inside the span.
    pub first_seq: u32,
    pub last_seq: u32,
    pub source_seqs: Vec<u32>,
    /// Sequence of the question this chunk answers, when the question
    /// lives outside the chunk.
    pub question_seq: Option<u32>,
    /// True when any source utterance was summarized.
    pub summarized: bool,
    /// Tokens re-included from the previous chunk; 0 means no overlap.
    pub overlap_tokens: usize,
}

#[derive(Clone, Copy, Debug)]
pub struct ChunkerConfig {
    pub token_budget: usize,
    pub overlap_tokens: usize,
}

pub struct ContextualChunker {
    counter: Arc<TokenCounter>,
    config: ChunkerConfig,
}

struct Part<'a> {
    utterance: &'a Utterance,
    text: &'a str,
    tokens: usize,
    summarized: bool,
}

impl ContextualChunker {
    #[must_use]
    pub fn new(counter: Arc<TokenCounter>, config: ChunkerConfig) -> Self {
        Self { counter, config }
    }

    /// Chunks one debate's utterances.
    ///
    /// `summaries` maps utterance sequence numbers to replacement text for
    /// utterances that exceeded the summarization threshold. Unattributed
    /// and empty utterances are excluded from chunk assembly.
    #[must_use]
    pub fn chunk_debate(
        &self,
        utterances: &[Utterance],
        summaries: &FxHashMap<u32, String>,
    ) -> Vec<DebateChunk> {
        let by_seq: FxHashMap<u32, &Utterance> =
            utterances.iter().map(|u| (u.seq, u)).collect();

        let parts: Vec<Part<'_>> = utterances
            .iter()
            .filter(|u| u.speaker.is_some() && !u.is_empty())
            .map(|u| {
                let (text, summarized) = match summaries.get(&u.seq) {
                    Some(summary) => (summary.as_str(), true),
                    None => (u.text.as_str(), false),
                };
                Part {
                    utterance: u,
                    text,
                    tokens: self.counter.count(text),
                    summarized,
                }
            })
            .collect();

        let mut chunks = Vec::new();
        let mut run: Vec<Part<'_>> = Vec::new();
        for part in parts {
            if run.is_empty() || extends_run(&run, part.utterance) {
                run.push(part);
            } else {
                self.chunk_run(&run, &by_seq, &mut chunks);
                run = vec![part];
            }
        }
        if !run.is_empty() {
            self.chunk_run(&run, &by_seq, &mut chunks);
        }

        for (index, chunk) in chunks.iter_mut().enumerate() {
            chunk.chunk_index = index;
        }
        chunks
    }

    /// Splits one accumulation run into budgeted chunks with overlap carry.
    fn chunk_run<'a>(
        &self,
        run: &[Part<'a>],
        by_seq: &FxHashMap<u32, &Utterance>,
        out: &mut Vec<DebateChunk>,
    ) {
        let budget = self.config.token_budget;
        let mut current: Vec<&Part<'a>> = Vec::new();
        let mut current_tokens = 0usize;
        let mut carry: Option<(String, usize)> = None;

        for part in run {
            if !current.is_empty() && current_tokens + part.tokens > budget {
                let chunk = self.build_chunk(&current, carry.take(), by_seq);
                carry = self.trailing_window(&chunk.text);
                out.push(chunk);
                current.clear();
                current_tokens = carry.as_ref().map_or(0, |(_, tokens)| *tokens);
            }
            current_tokens += part.tokens;
            current.push(part);
        }
        if !current.is_empty() {
            out.push(self.build_chunk(&current, carry.take(), by_seq));
        }
    }

    fn build_chunk(
        &self,
        parts: &[&Part<'_>],
        overlap: Option<(String, usize)>,
        by_seq: &FxHashMap<u32, &Utterance>,
    ) -> DebateChunk {
        let seqs: FxHashSet<u32> = parts.iter().map(|p| p.utterance.seq).collect();
        let attributed = parts
            .iter()
            .find(|p| p.utterance.kind == SpeechKind::Answer)
            .unwrap_or(&parts[0])
            .utterance;
        let speaker = attributed.speaker.as_ref();

        let distinct_speakers = parts
            .iter()
            .filter_map(|p| p.utterance.speaker.as_ref().map(|s| s.name.as_str()))
            .collect::<FxHashSet<_>>()
            .len();
        let mut body_lines: Vec<String> = Vec::with_capacity(parts.len());
        for part in parts {
            if distinct_speakers > 1 {
                let name = part
                    .utterance
                    .speaker
                    .as_ref()
                    .map_or("Unknown", |s| s.name.as_str());
                body_lines.push(format!("{name}: {}", part.text));
            } else {
                body_lines.push(part.text.to_string());
            }
        }
        let body = body_lines.join("\n\n");
        let (overlap_text, overlap_tokens) = overlap.unwrap_or_default();
        let text = if overlap_text.is_empty() {
            body
        } else {
            format!("{overlap_text}\n\n{body}")
        };

        let question_seq = parts
            .iter()
            .find_map(|p| p.utterance.answers_seq.filter(|q| !seqs.contains(q)));

        let first = parts[0].utterance;
        let embedding_text = build_embedding_text(&text, first, speaker, question_seq, by_seq);

        let mut source_seqs: Vec<u32> = parts.iter().map(|p| p.utterance.seq).collect();
        source_seqs.sort_unstable();

        DebateChunk {
            id: Uuid::new_v4().to_string(),
            debate_id: first.debate_id.clone(),
            chunk_index: 0,
            text,
            embedding_text,
            date: first.date,
            speaker_name: speaker.map(|s| s.name.clone()),
            person_id: speaker.and_then(|s| s.person_id),
            office: speaker.and_then(|s| s.office.clone()),
            party: None,
            topic_path: first.topic_path.clone(),
            first_seq: source_seqs[0],
            last_seq: *source_seqs.last().unwrap_or(&source_seqs[0]),
            source_seqs,
            question_seq,
            summarized: parts.iter().any(|p| p.summarized),
            overlap_tokens,
        }
    }

    /// Trailing sentences of `text` fitting the overlap budget.
    fn trailing_window(&self, text: &str) -> Option<(String, usize)> {
        if self.config.overlap_tokens == 0 {
            return None;
        }
        let sentences: Vec<&str> = text.split_sentence_bounds().collect();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;
        for sentence in sentences.into_iter().rev() {
            let tokens = self.counter.count(sentence);
            if tokens == 0 {
                continue;
            }
            if total + tokens > self.config.overlap_tokens {
                break;
            }
            window.push_front(sentence);
            total += tokens;
        }
        if window.is_empty() {
            return None;
        }
        let joined = window.into_iter().collect::<String>().trim().to_string();
        if joined.is_empty() {
            None
        } else {
            Some((joined, total))
        }
    }
}

/// True when `next` belongs to the run in progress: same speaker on the
/// same topic, or an answer to a question already in the run.
fn extends_run(run: &[Part<'_>], next: &Utterance) -> bool {
    let Some(last) = run.last() else {
        return true;
    };
    if next
        .answers_seq
        .is_some_and(|q| run.iter().any(|p| p.utterance.seq == q))
    {
        return true;
    }
    same_attribution(last.utterance, next) && last.utterance.topic_path == next.topic_path
}

fn same_attribution(a: &Utterance, b: &Utterance) -> bool {
    match (a.speaker.as_ref(), b.speaker.as_ref()) {
        (Some(sa), Some(sb)) => match (sa.person_id, sb.person_id) {
            (Some(ia), Some(ib)) => ia == ib,
            _ => sa.name == sb.name,
        },
        _ => false,
    }
}

fn build_embedding_text(
    text: &str,
    first: &Utterance,
    speaker: Option<&crate::transcript::Speaker>,
    question_seq: Option<u32>,
    by_seq: &FxHashMap<u32, &Utterance>,
) -> String {
    let mut rendered = match speaker {
        Some(s) => match &s.office {
            Some(office) => format!("{} ({office}): {text}", s.name),
            None => format!("{}: {text}", s.name),
        },
        None => text.to_string(),
    };
    rendered.push_str("\n\n---\nCONTEXT:\n");
    rendered.push_str(&format!("Date: {}\n", first.date));
    let topic = first.topic_line();
    if !topic.is_empty() {
        rendered.push_str(&format!("Topic: {topic}\n"));
    }
    if let Some(question) = question_seq.and_then(|q| by_seq.get(&q)) {
        rendered.push_str(&format!(
            "Answers question: \"{}\"\n",
            truncate(&question.text, 240)
        ));
    }
    rendered
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::Speaker;

    fn counter() -> Arc<TokenCounter> {
        Arc::new(TokenCounter::new().expect("tokenizer"))
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 10, 17).expect("date")
    }

    fn utterance(seq: u32, name: &str, person_id: i64, text: &str) -> Utterance {
        Utterance {
            debate_id: "debates2023-10-17b".to_string(),
            seq,
            speech_id: None,
            speaker: Some(Speaker {
                person_id: Some(person_id),
                name: name.to_string(),
                office: None,
            }),
            date: date(),
            kind: SpeechKind::Statement,
            text: text.to_string(),
            topic_path: vec!["Energy Bill".to_string()],
            answers_seq: None,
        }
    }

    fn chunker(budget: usize, overlap: usize) -> ContextualChunker {
        ContextualChunker::new(
            counter(),
            ChunkerConfig {
                token_budget: budget,
                overlap_tokens: overlap,
            },
        )
    }

    #[test]
    fn single_short_utterance_is_one_chunk_without_overlap() {
        let utterances = vec![utterance(0, "Alice Example", 1, "A short remark.")];
        let chunks = chunker(400, 100).chunk_debate(&utterances, &FxHashMap::default());
        assert_eq!(chunks.len(), 1);
        let chunk = &chunks[0];
        assert_eq!(chunk.overlap_tokens, 0);
        assert_eq!(chunk.chunk_index, 0);
        assert_eq!((chunk.first_seq, chunk.last_seq), (0, 0));
        assert!(chunk.embedding_text.contains("---\nCONTEXT:"));
        assert!(chunk.embedding_text.starts_with("Alice Example:"));
    }

    #[test]
    fn empty_debate_yields_no_chunks() {
        let chunks = chunker(400, 100).chunk_debate(&[], &FxHashMap::default());
        assert!(chunks.is_empty());
    }

    #[test]
    fn budget_split_carries_sentence_overlap() {
        let c = counter();
        let first = "The first point concerns the rollout of heat pumps across rural constituencies. Homes off the gas grid deserve the same support as urban ones.";
        let second = "The second point concerns grid capacity in the south west.";
        let budget = c.count(first) + 2;
        // Room for exactly the last sentence of the first chunk.
        let overlap = c.count("Homes off the gas grid deserve the same support as urban ones.") + 1;
        let utterances = vec![
            utterance(0, "Alice Example", 1, first),
            utterance(1, "Alice Example", 1, second),
        ];
        let chunks = chunker(budget, overlap).chunk_debate(&utterances, &FxHashMap::default());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].overlap_tokens, 0);
        assert!(chunks[1].overlap_tokens > 0);
        assert!(
            chunks[1]
                .text
                .starts_with("Homes off the gas grid deserve the same support"),
            "second chunk should open with the previous trailing sentence, got: {}",
            chunks[1].text
        );
        // Overlap repeats text, not source coverage.
        assert_eq!(chunks[0].source_seqs, vec![0]);
        assert_eq!(chunks[1].source_seqs, vec![1]);
    }

    #[test]
    fn question_and_answer_share_a_chunk_when_they_fit() {
        let mut question = utterance(0, "Ian Mearns", 1, "What assessment has been made of pay?");
        question.kind = SpeechKind::Question;
        let mut answer = utterance(1, "Grant Shapps", 2, "Pay is reviewed annually.");
        answer.kind = SpeechKind::Answer;
        answer.answers_seq = Some(0);

        let chunks = chunker(400, 100).chunk_debate(&vec![question, answer], &FxHashMap::default());
        assert_eq!(chunks.len(), 1);
        let chunk = &chunks[0];
        assert_eq!(chunk.source_seqs, vec![0, 1]);
        assert_eq!(chunk.question_seq, None);
        // Attribution goes to the answerer.
        assert_eq!(chunk.speaker_name.as_deref(), Some("Grant Shapps"));
        assert!(chunk.text.contains("Ian Mearns: "));
        assert!(chunk.text.contains("Grant Shapps: "));
    }

    #[test]
    fn split_pair_keeps_question_back_reference() {
        let c = counter();
        let question_text = "Will the minister set out the assessment made of armed forces pay levels across every rank and trade this year?";
        let answer_text = "The independent review body reported in May and we accepted its recommendations in full.";
        let mut question = utterance(0, "Ian Mearns", 1, question_text);
        question.kind = SpeechKind::Question;
        let mut answer = utterance(1, "Grant Shapps", 2, answer_text);
        answer.kind = SpeechKind::Answer;
        answer.answers_seq = Some(0);

        let budget = c.count(question_text) + 2;
        let chunks =
            chunker(budget, 0).chunk_debate(&vec![question, answer], &FxHashMap::default());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].question_seq, Some(0));
        assert!(chunks[1].embedding_text.contains("Answers question:"));
    }

    #[test]
    fn unattributed_utterances_are_excluded() {
        let mut procedural = utterance(0, "x", 1, "The House divided.");
        procedural.speaker = None;
        let spoken = utterance(1, "Alice Example", 1, "A substantive point.");
        let chunks = chunker(400, 100).chunk_debate(&vec![procedural, spoken], &FxHashMap::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source_seqs, vec![1]);
    }

    #[test]
    fn summaries_replace_text_and_set_the_flag() {
        let long = utterance(0, "Alice Example", 1, "A very long speech, imagine many pages.");
        let mut summaries = FxHashMap::default();
        summaries.insert(0, "She argued for more heat pump funding.".to_string());
        let chunks = chunker(400, 100).chunk_debate(&vec![long], &summaries);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].summarized);
        assert!(chunks[0].text.contains("heat pump funding"));
        assert!(!chunks[0].text.contains("imagine many pages"));
    }

    #[test]
    fn speaker_change_breaks_the_run_without_overlap() {
        let utterances = vec![
            utterance(0, "Alice Example", 1, "First speaker's point about housing."),
            utterance(1, "Bob Sample", 2, "Second speaker's reply about planning."),
        ];
        let chunks = chunker(400, 100).chunk_debate(&utterances, &FxHashMap::default());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].overlap_tokens, 0);
        assert_eq!(chunks[0].speaker_name.as_deref(), Some("Alice Example"));
        assert_eq!(chunks[1].speaker_name.as_deref(), Some("Bob Sample"));
    }

    #[test]
    fn every_attributed_utterance_is_covered() {
        let texts = [
            "Opening remarks on the bill before the House today.",
            "A second paragraph of argument about clause one.",
            "Clause two raises different questions entirely.",
            "On clause three I want to quote the select committee report.",
        ];
        let utterances: Vec<Utterance> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| utterance(i as u32, "Alice Example", 1, t))
            .collect();
        let chunks = chunker(25, 8).chunk_debate(&utterances, &FxHashMap::default());
        let covered: FxHashSet<u32> = chunks.iter().flat_map(|c| c.source_seqs.clone()).collect();
        for u in &utterances {
            assert!(covered.contains(&u.seq), "utterance {} orphaned", u.seq);
        }
        // Spans are contiguous and ordered.
        for chunk in &chunks {
            let span: Vec<u32> = (chunk.first_seq..=chunk.last_seq).collect();
            assert_eq!(chunk.source_seqs, span);
        }
    }
}
