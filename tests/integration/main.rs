//! Host-side integration tests.
//!
//! Exercise the assembled system — bus, FSM, orchestrator, runtime — through
//! the public API with simulated link drivers. Hardware-only paths are
//! compiled out on host targets.

mod bus_scenarios;
mod connectivity_tests;
mod lifecycle_tests;
