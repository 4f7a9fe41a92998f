//! Error handling design (see SPEC_FULL.md §7): configuration errors are
//! the only recoverable `Result` surface the index exposes. Allocator
//! exhaustion and transient CAS interference are handled internally
//! (the former aborts like the rest of safe Rust; the latter is
//! retried); contract violations that cannot be ruled out by the type
//! system are fatal (`debug_assert!`/`unreachable!`), not a `Result`.

use thiserror::Error;

/// Construction-time configuration error. `BwTree::new` never panics;
/// it returns this instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("min_node_size ({min}) must be less than max_node_size / 2 ({half_max})")]
    MinNotBelowHalfMax { min: usize, half_max: usize },
    #[error("max_chain_len must be at least 1, got {0}")]
    ChainLenTooSmall(usize),
    #[error("max_node_size must be at least 2, got {0}")]
    MaxNodeSizeTooSmall(usize),
}
