// src/timing/mod.rs

//! Time-ordered indexes: the maturation / deadline / timeout heaps and the
//! ready queue, plus effective-priority computation.

pub mod heaps;
pub mod priority;
pub mod ready;

pub use heaps::TimerHeap;
pub use priority::{effective_priority, urgency};
pub use ready::{ReadyKey, ReadyQueue};
