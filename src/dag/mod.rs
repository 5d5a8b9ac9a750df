// src/dag/mod.rs

//! Dependency DAG.
//!
//! - [`graph`] holds the arena-style graph and its incrementally extended
//!   topological order.
//! - [`propagation`] plans a batch insertion: dependency resolution, cycle
//!   check, maturation and deadline propagation. Nothing is mutated until the
//!   plan is committed by the engine.

pub mod graph;
pub mod propagation;

pub use graph::{BatchCycle, DependencyGraph};
pub use propagation::{BatchNode, InsertionPlan, plan_insertion};
