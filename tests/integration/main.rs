//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises the engine against a
//! mock radio backend. All tests run on the host (x86_64) with no real
//! radio hardware required.

mod link_tests;
mod mock_transport;
