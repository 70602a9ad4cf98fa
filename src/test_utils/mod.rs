//! the test_utils folder here will share utils or test components betwee unit
//! tests and integrations tests
mod common;
mod listeners;
mod providers;

pub use common::*;
pub use listeners::*;
pub use providers::*;
