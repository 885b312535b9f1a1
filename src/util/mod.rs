//! Small support structures shared across the pipeline

mod bit_set;

pub use bit_set::*;
