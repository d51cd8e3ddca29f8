//! Feedback loop for a single workload
//!
//! Each monitored workload gets its own `ControlLoop` with its own state;
//! loops never share state.

mod r#loop;

#[cfg(test)]
mod tests;

pub use r#loop::{ControlLoop, ControlLoopBuilder, IterationReport, LoopConfig};
