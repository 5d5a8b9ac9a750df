// src/store/mod.rs

//! Task store.
//!
//! - [`task`] defines submission specs, the task record and its state machine.
//! - [`store`] owns all records and applies state transitions.

pub mod store;
pub mod task;

pub use store::TaskStore;
pub use task::{DepRef, Task, TaskSnapshot, TaskSpec, TaskState};
