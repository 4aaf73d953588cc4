//! Hybrid retrieval: vector and lexical branches joined by rank fusion.
//!
//! A query runs through both branches with the same metadata filter, each
//! branch returns an ordered id list, and [`fusion`] merges them by rank.
//! The branches themselves live on [`crate::store::CorpusStore`]; this module
//! owns what "hybrid" means.

pub mod filter;
pub mod fusion;
pub mod hybrid;

pub use filter::{SearchFilter, sanitize_match_query};
pub use fusion::{FusedHit, fuse};
pub use hybrid::{HybridSearcher, SearchError, SearchHit};
