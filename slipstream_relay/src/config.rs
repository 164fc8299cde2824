// Relay configuration.
//
// `RelayConfig` is what `start_relay` consumes; `main.rs` builds one from CLI
// flags and tests build one directly (port 0, short countdown interval).
// `CountdownConfig` is the subset the coordinator itself needs, split out so
// unit tests can construct a coordinator without any networking settings.

use std::time::Duration;

use slipstream_protocol::PROTOCOL_VERSION;

/// Pre-race countdown shape: `from`, `from - 1`, ..., `0`, one value per
/// `interval`. The first value is emitted one interval after the host starts
/// the race, and the race begins right after `0` is emitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CountdownConfig {
    pub from: u32,
    pub interval: Duration,
}

impl Default for CountdownConfig {
    fn default() -> Self {
        Self {
            from: 3,
            interval: Duration::from_secs(1),
        }
    }
}

/// Configuration for starting a relay server.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub host: String,
    /// 0 lets the OS pick a free port (see the address `start_relay` returns).
    pub port: u16,
    pub countdown: CountdownConfig,
    /// Clients whose `Hello` carries a different version are rejected.
    pub protocol_version: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 7878,
            countdown: CountdownConfig::default(),
            protocol_version: PROTOCOL_VERSION,
        }
    }
}

impl RelayConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
