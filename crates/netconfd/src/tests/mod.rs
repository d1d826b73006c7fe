//! Crate-level behavioural tests.

mod support;
