//! Assistant-facing layer: prompt composition, reply parsing, the execution
//! pipeline for one chat turn, and the service that wires the stores,
//! providers and scrapers together.

pub mod compose;
pub mod pipeline;
pub mod reply;
pub mod service;

pub use compose::{compose_system_prompt, resolve_fields};
pub use pipeline::{run_turn, TurnOutcome, TurnRequest, DEFAULT_TOP_K, RESULT_CHAR_BUDGET};
pub use reply::{Reply, ACTION_PREFIX};
pub use service::{ChatReply, Workbench};
