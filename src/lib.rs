//! File-mailbox compiler bridge.
//!
//! Connects a mobile editor to a desktop machine's JVM toolchain through a
//! shared filesystem. Requests and responses travel as single-slot text
//! files in a workspace directory: the desktop side polls for commands,
//! compiles or runs code under a subprocess timeout, and writes the result
//! back for the client to pick up.

pub mod config;
pub mod driver;
pub mod error;
pub mod mailbox;
pub mod orchestrator;
pub mod subprocess;
pub mod toolchain;
pub mod workspace;
