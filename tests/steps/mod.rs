//! Step definitions for behavioural tests.

mod session_steps;
