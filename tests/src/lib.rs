//! Integration tests for the Clotho managed executor.
//!
//! Set `RUST_LOG=clotho_executor=debug` to see pool and task events while a
//! test runs.

#[cfg(test)]
mod support;

#[cfg(test)]
mod scenarios;

#[cfg(test)]
mod lifecycle_tests;

#[cfg(test)]
mod property_tests;
