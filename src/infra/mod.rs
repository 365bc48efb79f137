//! Infrastructure building blocks backing the scheduler.

pub mod queue;
