//! Scheduling of scenarios against an external batch system.
//!
//! - **JobQueue**: read-only query of the batch scheduler's pending jobs
//! - **ScenarioScheduler**: round-based loop over active, waiting and dead
//!   scenario stacks
//!
//! # Loop
//!
//! ```text
//!   active ──tick──┬── finished ──> dropped
//!                  ├── broken ────> dead
//!                  └── pending ───> waiting
//!
//!   active empty, waiting not empty: sleep, then waiting becomes active
//! ```
//!
//! All parallelism lives in the batch system. The loop advances one scenario
//! at a time and never spawns tasks.

pub mod queue;
pub mod stacks;

pub use queue::{JobQueue, SlurmJobQueue};
pub use stacks::{LoopReport, ScenarioScheduler};
