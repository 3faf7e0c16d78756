//! Linear algebra layer.
//!
//! Dense matrix conventions and shape checks shared by the discretizer,
//! the horizon builder and the stage-wise solver.

pub mod dense;
