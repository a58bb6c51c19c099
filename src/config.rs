//! Peripheral configuration parameters
//!
//! All tunable parameters for the peripheral.  Capacities that size
//! fixed buffers are compile-time constants; everything else can be
//! overridden from a JSON file (host simulation) or a postcard blob
//! (persistent storage).
//!
//! Timer delays are in scheduler ticks (625 us, the engine's system clock
//! unit).  Connection intervals are in 1.25 ms units, supervision timeout
//! in 10 ms units, advertising intervals in 0.625 ms units.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Maximum concurrent connections (one slot each).
pub const MAX_CONNECTIONS: usize = 4;
/// Capacity of each console RX/TX buffer.
pub const CONSOLE_FIFO_SIZE: usize = 96;
/// Capacity of the per-connection pad buffer.
pub const PAD_BUF_SIZE: usize = 96;
/// ATT MTU before any exchange.
pub const DEFAULT_ATT_MTU: u16 = 23;
/// Opcode + handle overhead of a notification PDU.
pub const NOTIFY_HEADER_LEN: u16 = 3;

/// Log verbosity for the host logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogVerbosity {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogVerbosity {
    pub fn to_filter(self) -> log::LevelFilter {
        match self {
            Self::Error => log::LevelFilter::Error,
            Self::Warn => log::LevelFilter::Warn,
            Self::Info => log::LevelFilter::Info,
            Self::Debug => log::LevelFilter::Debug,
            Self::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Core peripheral configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeripheralConfig {
    // --- Connection parameters ---
    /// Lowest acceptable connection interval (x1.25 ms)
    pub conn_interval_min: u16,
    /// Highest acceptable connection interval (x1.25 ms)
    pub conn_interval_max: u16,
    /// Peripheral latency (connection events)
    pub slave_latency: u16,
    /// Supervision timeout (x10 ms)
    pub supervision_timeout: u16,

    // --- Advertising ---
    /// Advertising interval lower bound (x0.625 ms)
    pub adv_interval_min: u16,
    /// Advertising interval upper bound (x0.625 ms)
    pub adv_interval_max: u16,
    /// TX power advertised in the scan response (dBm)
    pub tx_power_dbm: i8,

    // --- Scheduling (ticks) ---
    /// Delay before requesting parameter renegotiation
    pub param_update_delay: u32,
    /// Delay before requesting the 2M PHY
    pub phy_update_delay: u32,
    /// Signal strength poll period
    pub rssi_poll_period: u32,
    /// Delay between interpreter quanta
    pub interpreter_delay: u32,
    /// Interpreter steps per quantum
    pub interpreter_quantum: u16,

    // --- Behaviour on disconnect ---
    /// Empty the console buffers when a slot is released
    pub reset_console_on_release: bool,
    /// Forget the connection's notification subscriptions on disconnect
    pub reset_notifications_on_disconnect: bool,

    // --- Logging ---
    pub log_level: LogVerbosity,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            // Connection parameters
            conn_interval_min: 9,    // 11.25 ms
            conn_interval_max: 100,  // 125 ms
            slave_latency: 0,
            supervision_timeout: 100, // 1 s

            // Advertising
            adv_interval_min: 80,  // 50 ms
            adv_interval_max: 160, // 100 ms
            tx_power_dbm: 0,

            // Scheduling
            param_update_delay: 6400, // 4 s
            phy_update_delay: 3200,   // 2 s
            rssi_poll_period: 3200,   // 2 s
            interpreter_delay: 2,
            interpreter_quantum: 100,

            // Disconnect behaviour
            reset_console_on_release: false,
            reset_notifications_on_disconnect: false,

            log_level: LogVerbosity::Info,
        }
    }
}

impl PeripheralConfig {
    /// Reject values the link layer or the scheduler cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(6..=3200).contains(&self.conn_interval_min)
            || !(6..=3200).contains(&self.conn_interval_max)
            || self.conn_interval_min > self.conn_interval_max
        {
            return Err(ConfigError::Invalid("conn_interval"));
        }
        if self.slave_latency > 499 {
            return Err(ConfigError::Invalid("slave_latency"));
        }
        if !(10..=3200).contains(&self.supervision_timeout) {
            return Err(ConfigError::Invalid("supervision_timeout"));
        }
        // timeout (10 ms) must exceed (1 + latency) * interval_max (1.25 ms) * 2
        let needed = (1 + u32::from(self.slave_latency)) * u32::from(self.conn_interval_max);
        if u32::from(self.supervision_timeout) * 4 <= needed {
            return Err(ConfigError::Invalid("supervision_timeout"));
        }
        if !(0x20..=0x4000).contains(&self.adv_interval_min)
            || !(0x20..=0x4000).contains(&self.adv_interval_max)
            || self.adv_interval_min > self.adv_interval_max
        {
            return Err(ConfigError::Invalid("adv_interval"));
        }
        if self.rssi_poll_period == 0 {
            return Err(ConfigError::Invalid("rssi_poll_period"));
        }
        if self.interpreter_delay == 0 {
            return Err(ConfigError::Invalid("interpreter_delay"));
        }
        if self.interpreter_quantum == 0 {
            return Err(ConfigError::Invalid("interpreter_quantum"));
        }
        Ok(())
    }

    /// Parse and validate a JSON document.  Missing fields take defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text).map_err(|_| ConfigError::Decode)?;
        config.validate()?;
        Ok(config)
    }

    /// Encode into `buf` (postcard).  Returns the number of bytes used.
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<usize, ConfigError> {
        postcard::to_slice(self, buf)
            .map(|used| used.len())
            .map_err(|_| ConfigError::Encode)
    }

    /// Decode and validate a postcard blob produced by [`encode_into`](Self::encode_into).
    pub fn decode(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = postcard::from_bytes(bytes).map_err(|_| ConfigError::Decode)?;
        config.validate()?;
        Ok(config)
    }
}
