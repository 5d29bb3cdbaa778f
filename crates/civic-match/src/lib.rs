//! civic-match library.
//!
//! Similarity scoring between reports and open issues, and the duplicate
//! resolver that turns a citizen report into a new issue or a confirmation
//! of an existing one.
//!
//! The resolver serializes decisions per neighbourhood: it enters the
//! store's exclusive section keyed by the geohash cells covering the match
//! radius before looking up candidates, and holds it until the decision is
//! committed.

pub mod resolver;
pub mod similarity;

pub use resolver::{
    CancelToken, Confirmation, MergeOutcome, Resolution, Resolver, ScoredCandidate,
};
pub use similarity::{Descriptor, ScoreBreakdown, score};
