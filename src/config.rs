/// Centralized configuration constants for staweave

// Station record field widths, terminator included
pub const SSID_FIELD_LEN: usize = 32;
pub const PASSWORD_FIELD_LEN: usize = 64;

// Longest dotted-decimal IPv4 text, "255.255.255.255"
pub const IPV4_STR_MAX_LEN: usize = 15;

// Default driver tuning
pub const STATIC_RX_BUF_NUM: u8 = 10;
pub const DYNAMIC_RX_BUF_NUM: u8 = 32;
pub const DYNAMIC_TX_BUF_NUM: u8 = 32;
pub const RX_BA_WIN: u8 = 6;
pub const AMPDU_RX_ENABLED: bool = true;
pub const AMPDU_TX_ENABLED: bool = true;
pub const NVS_ENABLED: bool = true;

// Simulated access point
pub const SIM_CHANNEL: u8 = 6;
pub const SIM_FAILED_JOIN_BUDGET: u32 = 3;
pub const SIM_DEFAULT_ADDRESS: [u8; 4] = [192, 168, 4, 2];
pub const SIM_GATEWAY: [u8; 4] = [192, 168, 4, 1];
pub const SIM_NETMASK: [u8; 4] = [255, 255, 255, 0];

// CLI timing
pub const CONNECT_TIMEOUT_SECS: u64 = 10;
pub const LINGER_MS: u64 = 250;
