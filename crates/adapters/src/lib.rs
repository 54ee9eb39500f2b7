// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! swb-adapters: pluggable backends behind the Switchboard ports.
//!
//! The `engine` module holds the [`Engine`] contract and its adapters
//! (CLI subprocess, in-process echo); the `bus` module holds the
//! pub/sub [`Bus`] contract and the in-memory implementation.

pub mod bus;
pub mod engine;

pub use bus::{bus_event, run_topic, Bus, MemoryBus};
pub use engine::{
    CliConfig, CliEngine, Engine, EngineError, EngineMsg, EngineRegistry, EngineSink, StartCtx,
};

#[cfg(any(test, feature = "test-support"))]
pub use engine::{EchoCall, EchoEngine, EchoStep};
