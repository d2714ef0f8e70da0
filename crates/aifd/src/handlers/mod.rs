//! Route groups for the larger API surfaces.

pub mod learning;
pub mod orchestration;
