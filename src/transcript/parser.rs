//! Transcript markup parsing.
//!
//! Transcripts are lenient SGML-ish XML: a `publicwhip` root holding a
//! flat run of heading and `speech` elements in sitting order. The parser
//! walks that run once, maintaining the heading hierarchy (session,
//! department, topic) and the question state of oral sessions, and emits
//! one [`Utterance`] per attributable speech.

use std::path::PathBuf;

use chrono::NaiveDate;
use miette::Diagnostic;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::debug;

use super::files::SourceFile;
use super::utterance::{Speaker, SpeechKind, Utterance};

const PERSON_ID_PREFIX: &str = "uk.org.publicwhip/person/";

#[derive(Debug, Error, Diagnostic)]
pub enum TranscriptError {
    #[error("failed to read transcript {path}")]
    #[diagnostic(
        code(debatesmith::transcript::read),
        help("check the transcripts directory and file permissions")
    )]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("transcript {debate_id} does not look like a debate file")]
    #[diagnostic(
        code(debatesmith::transcript::malformed),
        help("expected a publicwhip document with heading and speech elements")
    )]
    Malformed { debate_id: String },

    #[error("transcript parser setup failed: {message}")]
    #[diagnostic(code(debatesmith::transcript::internal))]
    Internal { message: String },
}

/// Streaming-order parser for debate transcripts.
///
/// Construct once and reuse across files; the compiled selectors are the
/// only state.
pub struct DebateParser {
    element_sel: Selector,
    para_sel: Selector,
    root_sel: Selector,
}

impl DebateParser {
    pub fn new() -> Result<Self, TranscriptError> {
        let compile = |css: &str| {
            Selector::parse(css).map_err(|err| TranscriptError::Internal {
                message: err.to_string(),
            })
        };
        Ok(Self {
            element_sel: compile("oral-heading, major-heading, minor-heading, speech")?,
            para_sel: compile("p")?,
            root_sel: compile("publicwhip")?,
        })
    }

    /// Reads and parses one discovered source file.
    pub fn parse_file(&self, source: &SourceFile) -> Result<Vec<Utterance>, TranscriptError> {
        let bytes = std::fs::read(&source.path).map_err(|err| TranscriptError::Read {
            path: source.path.clone(),
            source: err,
        })?;
        // Older transcripts ship as Latin-1; lossy decoding keeps the run alive.
        let raw = String::from_utf8_lossy(&bytes);
        self.parse_document(&raw, &source.debate_id, source.date)
    }

    /// Parses transcript markup into ordered utterances.
    pub fn parse_document(
        &self,
        raw: &str,
        debate_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<Utterance>, TranscriptError> {
        let doc = Html::parse_document(raw);

        let mut utterances: Vec<Utterance> = Vec::new();
        let mut session: Option<String> = None;
        let mut department: Option<String> = None;
        let mut topic: Option<String> = None;
        let mut main_question: Option<u32> = None;
        let mut context_question: Option<u32> = None;
        let mut after_intervention = false;
        let mut saw_element = false;

        for el in doc.select(&self.element_sel) {
            saw_element = true;
            match el.value().name() {
                "oral-heading" => {
                    session = nonempty(heading_text(el));
                    department = None;
                    topic = None;
                    main_question = None;
                    context_question = None;
                    after_intervention = false;
                }
                "major-heading" => {
                    // Under an oral session the major heading names the
                    // answering department; otherwise it names the debate.
                    department = nonempty(heading_text(el));
                    topic = None;
                    main_question = None;
                    context_question = None;
                    after_intervention = false;
                }
                "minor-heading" => {
                    topic = nonempty(heading_text(el));
                    main_question = None;
                    context_question = None;
                    after_intervention = false;
                }
                "speech" => {
                    let text = self.speech_text(el);
                    if text.is_empty() {
                        after_intervention = false;
                        continue;
                    }
                    let seq = u32::try_from(utterances.len()).unwrap_or(u32::MAX);
                    let speech_type = el.value().attr("type");
                    let (kind, answers_seq) = match speech_type {
                        Some("Start Question") => {
                            main_question = Some(seq);
                            context_question = None;
                            (SpeechKind::Question, None)
                        }
                        Some("Start SupplementaryQuestion") => {
                            let follows = main_question;
                            context_question = Some(seq);
                            (SpeechKind::SupplementaryQuestion, follows)
                        }
                        Some("Start Answer") => {
                            (SpeechKind::Answer, context_question.or(main_question))
                        }
                        Some("Start Intervention") => (SpeechKind::Intervention, None),
                        Some("Continuation Speech")
                            if after_intervention
                                && (context_question.is_some() || main_question.is_some()) =>
                        {
                            // The interrupted answer resumes.
                            (SpeechKind::Answer, context_question.or(main_question))
                        }
                        _ => (SpeechKind::Statement, None),
                    };
                    after_intervention = matches!(kind, SpeechKind::Intervention);

                    let mut topic_path = Vec::new();
                    for part in [&session, &department, &topic] {
                        if let Some(part) = part {
                            topic_path.push(part.clone());
                        }
                    }

                    utterances.push(Utterance {
                        debate_id: debate_id.to_string(),
                        seq,
                        speech_id: el.value().attr("id").map(str::to_string),
                        speaker: parse_speaker(el),
                        date,
                        kind,
                        text,
                        topic_path,
                        answers_seq,
                    });
                }
                _ => {}
            }
        }

        if !saw_element && doc.select(&self.root_sel).next().is_none() && !raw.trim().is_empty() {
            return Err(TranscriptError::Malformed {
                debate_id: debate_id.to_string(),
            });
        }

        debug!(debate_id, utterances = utterances.len(), "parsed transcript");
        Ok(utterances)
    }

    /// Joins speech paragraphs, one normalized paragraph per line.
    fn speech_text(&self, el: ElementRef<'_>) -> String {
        let mut paragraphs: Vec<String> = el
            .select(&self.para_sel)
            .map(|p| normalize_ws(&p.text().collect::<String>()))
            .filter(|p| !p.is_empty())
            .collect();
        if paragraphs.is_empty() {
            let flat = normalize_ws(&el.text().collect::<String>());
            if !flat.is_empty() {
                paragraphs.push(flat);
            }
        }
        paragraphs.join("\n")
    }
}

fn parse_speaker(el: ElementRef<'_>) -> Option<Speaker> {
    let value = el.value();
    if value.attr("nospeaker").is_some_and(|v| v == "true") {
        return None;
    }
    let name = normalize_ws(value.attr("speakername")?);
    if name.is_empty() {
        return None;
    }
    let person_id = value
        .attr("person_id")
        .and_then(|raw| raw.strip_prefix(PERSON_ID_PREFIX))
        .and_then(|digits| digits.parse::<i64>().ok());
    let office = value
        .attr("speakeroffice")
        .map(normalize_ws)
        .filter(|o| !o.is_empty());
    Some(Speaker {
        person_id,
        name,
        office,
    })
}

fn heading_text(el: ElementRef<'_>) -> String {
    normalize_ws(&el.text().collect::<String>())
}

fn normalize_ws(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn nonempty(text: String) -> Option<String> {
    if text.is_empty() { None } else { Some(text) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> DebateParser {
        DebateParser::new().expect("selectors compile")
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 10, 17).expect("date")
    }

    const ORAL_SESSION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<publicwhip scrapeversion="a" latest="yes">
  <oral-heading id="d1.h1">Oral Answers to Questions</oral-heading>
  <major-heading id="d1.h2">Defence</major-heading>
  <minor-heading id="d1.h3">Armed Forces Pay</minor-heading>
  <speech id="d1.s1" type="Start Question" speakername="Ian Mearns"
          person_id="uk.org.publicwhip/person/24755">
    <p>What recent assessment he has made of armed forces pay.</p>
  </speech>
  <speech id="d1.s2" type="Start Answer" speakername="Grant Shapps"
          person_id="uk.org.publicwhip/person/11811"
          speakeroffice="The Secretary of State for Defence">
    <p>Pay is reviewed annually on the advice of the independent body.</p>
    <p>This year's award is the largest in two decades.</p>
  </speech>
  <speech id="d1.s3" type="Start SupplementaryQuestion" speakername="Ian Mearns"
          person_id="uk.org.publicwhip/person/24755">
    <p>Does the award keep pace with inflation for junior ranks?</p>
  </speech>
  <speech id="d1.s4" type="Start Answer" speakername="Grant Shapps"
          person_id="uk.org.publicwhip/person/11811">
    <p>For the most junior ranks it exceeds inflation.</p>
  </speech>
</publicwhip>"#;

    #[test]
    fn oral_session_builds_topic_path_and_links() {
        let utterances = parser()
            .parse_document(ORAL_SESSION, "debates2023-10-17b", date())
            .expect("parse");
        assert_eq!(utterances.len(), 4);

        let question = &utterances[0];
        assert_eq!(question.kind, SpeechKind::Question);
        assert_eq!(
            question.topic_path,
            vec!["Oral Answers to Questions", "Defence", "Armed Forces Pay"]
        );
        assert_eq!(
            question.speaker.as_ref().map(|s| s.person_id),
            Some(Some(24755))
        );

        let answer = &utterances[1];
        assert_eq!(answer.kind, SpeechKind::Answer);
        assert_eq!(answer.answers_seq, Some(0));
        assert_eq!(
            answer.speaker.as_ref().and_then(|s| s.office.clone()),
            Some("The Secretary of State for Defence".to_string())
        );
        assert_eq!(answer.text.lines().count(), 2);

        let supplementary = &utterances[2];
        assert_eq!(supplementary.kind, SpeechKind::SupplementaryQuestion);
        assert_eq!(supplementary.answers_seq, Some(0));

        let second_answer = &utterances[3];
        assert_eq!(second_answer.answers_seq, Some(2));
    }

    #[test]
    fn continuation_after_intervention_resumes_the_answer() {
        let raw = r#"<publicwhip>
  <major-heading>Energy Bill</major-heading>
  <speech type="Start Question" speakername="A" person_id="uk.org.publicwhip/person/1">
    <p>Will the minister give way on clause four?</p>
  </speech>
  <speech type="Start Answer" speakername="B" person_id="uk.org.publicwhip/person/2">
    <p>I will address clause four directly.</p>
  </speech>
  <speech type="Start Intervention" speakername="C" person_id="uk.org.publicwhip/person/3">
    <p>Before the minister continues, what about clause five?</p>
  </speech>
  <speech type="Continuation Speech" speakername="B" person_id="uk.org.publicwhip/person/2">
    <p>As I was saying, clause four stands part.</p>
  </speech>
</publicwhip>"#;
        let utterances = parser()
            .parse_document(raw, "debates2024-01-09a", date())
            .expect("parse");
        assert_eq!(utterances[2].kind, SpeechKind::Intervention);
        assert_eq!(utterances[2].answers_seq, None);
        let continuation = &utterances[3];
        assert_eq!(continuation.kind, SpeechKind::Answer);
        assert_eq!(continuation.answers_seq, Some(0));
    }

    #[test]
    fn headings_reset_question_state() {
        let raw = r#"<publicwhip>
  <minor-heading>Topic One</minor-heading>
  <speech type="Start Question" speakername="A"><p>First question?</p></speech>
  <minor-heading>Topic Two</minor-heading>
  <speech type="Start Answer" speakername="B"><p>An answer under a new topic.</p></speech>
</publicwhip>"#;
        let utterances = parser()
            .parse_document(raw, "debates2024-01-09a", date())
            .expect("parse");
        assert_eq!(utterances[1].answers_seq, None);
        assert_eq!(utterances[1].topic_path, vec!["Topic Two"]);
    }

    #[test]
    fn procedural_speech_has_no_speaker() {
        let raw = r#"<publicwhip>
  <speech nospeaker="true"><p>The House divided.</p></speech>
</publicwhip>"#;
        let utterances = parser()
            .parse_document(raw, "debates2024-01-09a", date())
            .expect("parse");
        assert_eq!(utterances.len(), 1);
        assert!(utterances[0].speaker.is_none());
        assert_eq!(utterances[0].kind, SpeechKind::Statement);
    }

    #[test]
    fn empty_debate_yields_no_utterances() {
        let utterances = parser()
            .parse_document("<publicwhip></publicwhip>", "debates2024-01-09a", date())
            .expect("parse");
        assert!(utterances.is_empty());
    }

    #[test]
    fn garbage_is_rejected() {
        let err = parser()
            .parse_document("not a transcript at all", "debates2024-01-09a", date())
            .expect_err("should reject");
        assert!(matches!(err, TranscriptError::Malformed { .. }));
    }

    #[test]
    fn empty_speeches_are_dropped_without_consuming_sequence() {
        let raw = r#"<publicwhip>
  <speech speakername="A"><p>   </p></speech>
  <speech speakername="B"><p>Something of substance.</p></speech>
</publicwhip>"#;
        let utterances = parser()
            .parse_document(raw, "debates2024-01-09a", date())
            .expect("parse");
        assert_eq!(utterances.len(), 1);
        assert_eq!(utterances[0].seq, 0);
    }
}
