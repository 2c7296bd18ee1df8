//! Reproducible task runs.
//!
//! A [`Task`] wraps an async operation. Every call gets its own numbered run
//! directory holding the bound inputs, the return value, metadata, a log and
//! any typed artifacts the values carried.

pub mod artifact;
pub mod cli;
pub mod codec;
pub mod document;
pub mod engine;
pub mod error;
pub mod groups;
pub mod hooks;
pub mod storage;

pub use artifact::Artifact;
pub use codec::{CodecRegistry, NdArray, Storable, Table};
pub use document::{DocumentCodec, Map, Opaque, Symbol, SymbolResolver, SymbolTable, Value};
pub use engine::types::{RunQuery, RunRecord, RunStatus};
pub use engine::{Args, CallArgs, CollectiveRank, Ledger, Task, TaskBuilder, TaskReturn};
pub use error::LedgerError;
