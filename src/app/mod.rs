//! Application core: pure domain logic, zero I/O.
//!
//! This module contains the rules of the multi-connection peripheral:
//! slot admission, event dispatch, periodic notification and interpreter
//! stepping.  All interaction with the radio stack and the script VM
//! happens through **port traits** defined in [`ports`], keeping this layer
//! fully testable without real hardware.

pub mod advertising;
pub mod identity;
pub mod ports;
pub mod service;
