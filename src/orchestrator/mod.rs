//! Application-level orchestration utilities.
//!
//! This module owns the simulation process and its lifecycle (start/stop/quit). UI and
//! CLI layers send commands in and consume `ProcessEvent`s out, so neither needs to know
//! how the process is supervised.

mod controller;
mod process;

pub(crate) use controller::{run_controller, UiCommand};
pub(crate) use process::{ProcessController, StartOutcome};
