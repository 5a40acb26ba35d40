//! Lowering of structured SSA function bodies out of SSA form.
//!
//! A body is converted to conventional SSA, its variables are coalesced into
//! as few declarations as interference allows, and every phi and parallel
//! copy is replaced by plain assignments.

pub mod args;
pub mod error;
pub mod ssa;
pub mod unssa;
pub mod utils;

pub use error::{LoweringError, Result};
pub use unssa::{lower_function, lower_typed_instance, AllocationReport, LoweredFunction};
