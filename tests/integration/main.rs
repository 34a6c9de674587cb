//! Integration tests for the relay budget.
//!
//! Compiled as a single test binary; shared fakes live in `support`.

mod budget_flow;
mod execution_flow;
mod support;
