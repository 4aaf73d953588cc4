use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// How a speech functions in the debate it belongs to.
///
/// Oral question sessions alternate questions and ministerial answers;
/// general debate is mostly statements with occasional interventions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechKind {
    Statement,
    Question,
    SupplementaryQuestion,
    Answer,
    Intervention,
}

impl SpeechKind {
    /// True for both plain and supplementary questions.
    #[must_use]
    pub fn is_question(self) -> bool {
        matches!(self, Self::Question | Self::SupplementaryQuestion)
    }
}

/// Speaker attribution as given by the transcript.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Speaker {
    /// Canonical person identifier, when the transcript resolves one.
    pub person_id: Option<i64>,
    /// Display name as printed in the transcript.
    pub name: String,
    /// Office held while speaking (e.g. "The Secretary of State for
    /// Defence"), when the transcript records it.
    pub office: Option<String>,
}

/// One speech from a debate, in transcript order.
///
/// Immutable once parsed. `seq` is the position within the debate and is
/// what chunk spans and question links refer to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    /// Debate this utterance belongs to (derived from the source file name).
    pub debate_id: String,
    /// Zero-based position within the debate.
    pub seq: u32,
    /// Transcript-native speech id, when present.
    pub speech_id: Option<String>,
    /// Attribution. `None` for procedural text with no speaker.
    pub speaker: Option<Speaker>,
    /// Sitting date.
    pub date: NaiveDate,
    pub kind: SpeechKind,
    /// Normalized text, paragraphs joined with newlines.
    pub text: String,
    /// Heading hierarchy above this speech, outermost first
    /// (e.g. session, department, topic).
    pub topic_path: Vec<String>,
    /// For answers: `seq` of the question being answered.
    pub answers_seq: Option<u32>,
}

impl Utterance {
    /// True when there is nothing to index for this utterance.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Topic path rendered for display and embedding context.
    #[must_use]
    pub fn topic_line(&self) -> String {
        self.topic_path.join(" > ")
    }
}
