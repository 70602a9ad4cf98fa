mod ref_count;
pub use ref_count::*;

pub(crate) mod task;

#[cfg(test)]
mod task_test;
