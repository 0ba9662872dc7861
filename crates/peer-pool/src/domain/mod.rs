//! Domain Layer - Pure bookkeeping with no I/O
//!
//! - Node identity, endpoints and per-topic peer records
//! - Connected-peer limits and sync modes
//! - Candidate ranking by discovery recency
//! - Per-topic admission and eviction decisions

pub mod candidates;
pub mod entities;
pub mod errors;
pub mod topic_table;
pub mod value_objects;

pub use candidates::CandidateQueue;
pub use entities::*;
pub use errors::*;
pub use topic_table::*;
pub use value_objects::*;
