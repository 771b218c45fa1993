//! Rule-string parsing and rule evaluation.
//!
//! Tasks carry two compact rule sets: admission rules deciding which feed
//! candidates enter the managed pool, and eviction rules deciding when a
//! managed torrent leaves it. Rule strings use a `mode#arg1[,arg2]` grammar
//! and are parsed once into typed predicates when a task is loaded, not on
//! every evaluation.

mod admission;
mod eviction;
mod threshold;

pub use admission::{AdmissionRuleSpec, AdmissionRules, FreeTier, evaluate_admission};
pub use eviction::{EvictionReason, EvictionRuleSpec, EvictionRules, TorrentMetrics};
pub use threshold::{GIB, RangeRule, parse_threshold};
