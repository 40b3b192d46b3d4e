pub mod error;
pub mod outcome;
pub mod sorter;
pub mod strategy;
pub mod tree_apply;

pub use error::MergeError;
pub use sorter::order_candidates;
pub use outcome::Outcome;
pub use strategy::{Candidate, CandidateOutcome, IntegrationResult, Strategy};
