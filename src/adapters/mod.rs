//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter       | Implements    | Connects to                     |
//! |---------------|---------------|---------------------------------|
//! | `sim`         | BleEngine     | In-process simulated controller |
//! | `echo`        | Interpreter   | RX → TX echo coroutine          |
//! | `console_log` | log::Log      | stderr                          |
//! | `device_id`   | none          | Chip id / unique id source      |

pub mod console_log;
pub mod device_id;
pub mod echo;
pub mod sim;
