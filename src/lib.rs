//! Multi-connection BLE peripheral application layer.
//!
//! Exposes the pure-logic modules for integration testing and for the
//! host simulation binary.  The radio stack and the script interpreter
//! are reached only through the port traits in [`app::ports`].

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod gatt;
pub mod ring_buffer;
pub mod scheduler;
pub mod slots;
