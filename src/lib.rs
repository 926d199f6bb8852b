//! Concurrent deployment pipelines.
//!
//! A pipeline is a set of stages, each owning one release. Every stage runs
//! in its own task; stages order themselves through the completion map in
//! [`depends`], so installs follow `depends` edges and teardown runs them in
//! reverse.

pub mod backend;
pub mod cluster;
pub mod config;
pub mod depends;
pub mod errors;
pub mod hooks;
pub mod logging;
pub mod pipeline;
pub mod plan;
pub mod registry;
pub mod stage;
pub mod state;
pub mod template;
pub mod ui;
pub mod util;
pub mod values;
