//! Python bindings
//!
//! Exposes a single `BasinRun` class: build it from a model definition and
//! a run configuration (both JSON), call `run()`, then read the collated
//! tables back.

pub mod run;
