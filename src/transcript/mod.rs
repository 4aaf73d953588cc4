//! Debate transcript parsing.
//!
//! Turns raw transcript markup into an ordered sequence of typed
//! [`Utterance`]s ready for chunking:
//!
//! * [`files`] discovers transcript sources on disk, extracts sitting
//!   dates from file names and keeps only the latest revision per date.
//! * [`parser`] walks a single transcript document, tracking the heading
//!   hierarchy and question/answer state so each utterance carries its
//!   topic path and, where applicable, a link to the question it answers.
//!
//! Parsing is lossless with respect to attribution: procedural speeches
//! with no speaker are still produced (downstream stages decide to skip
//! them), and malformed files surface as [`TranscriptError`] without
//! taking the rest of the ingestion run down.

pub mod files;
pub mod parser;
mod utterance;

pub use files::{SourceFile, discover_sources};
pub use parser::{DebateParser, TranscriptError};
pub use utterance::{Speaker, SpeechKind, Utterance};
