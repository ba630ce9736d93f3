//! Semantic equivalence checking for a 6502 code optimizer.
//!
//! A suite case is assembled, run through the optimizer under test and
//! assembled again. Both binaries then run on the bundled emulator from the
//! same initial state, and their final registers, flags and observed memory
//! cells are compared.

pub mod compare;
pub mod config;
pub mod driver;
pub mod emulator;
pub mod errors;
pub mod harness;
pub mod state;
pub mod utils;

pub use compare::{compare, ComparisonVerdict, Mismatch};
pub use config::{Cli, Config};
pub use driver::{Driver, ExecutionResult};
pub use state::{MachineState, PartialStateSpec};
