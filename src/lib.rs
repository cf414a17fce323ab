#![forbid(unsafe_code)]

//! # fermi-harness
//!
//! Context-anchoring experiments on Fermi estimation questions.
//!
//! A model is first asked a "context question" written to nudge its estimate
//! up or down, then asked the real target question; the sampled answers are
//! recorded per condition so the shift can be measured against single-turn
//! baselines. Calls run synchronously or are deferred to the provider's
//! batch endpoint and read back later.
//!
//! The pieces, bottom-up:
//! - [`prompts`] turns template rows into user turns,
//! - [`experiment`] and [`context_generation`] walk the condition matrix,
//! - [`backend`] answers each conversation now or enqueues it,
//! - [`recorder`] shapes and merges the result rows,
//! - [`retrieval`] reads finished batch jobs back.

pub mod backend;
pub mod batch;
pub mod condition;
pub mod context_generation;
pub mod conversation;
pub mod error;
pub mod experiment;
pub mod gateway;
pub mod layout;
pub mod prompts;
pub mod recorder;
pub mod retrieval;
pub mod tables;

pub use backend::{BatchBackend, Dispatch, ExecutionBackend, SyncBackend};
pub use condition::{CallKey, ContextQuestionKey, ExperimentType};
pub use context_generation::{generate_context_questions, ContextGenConfig};
pub use conversation::Conversation;
pub use error::HarnessError;
pub use experiment::{run_experiment, ContextMode, ExperimentConfig, ExperimentOutcome};
pub use gateway::{ChatGateway, MockGateway, ModelSelection};
pub use prompts::{build_turn, PromptTemplate};
pub use tables::{CsvTableStore, MemoryTableStore, TableStore};
