/// Typed errors for staweave station and event operations
use thiserror::Error;

/// Result type alias for station operations
pub type WifiResult<T> = Result<T, WifiError>;

/// Raw status reported by the network stack, in `esp_err_t` numbering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackError(pub i32);

impl StackError {
    pub const FAIL: StackError = StackError(-1);
    pub const NO_MEM: StackError = StackError(0x101);
    pub const INVALID_ARG: StackError = StackError(0x102);
    pub const INVALID_STATE: StackError = StackError(0x103);
    pub const NOT_FOUND: StackError = StackError(0x105);
    pub const NOT_INIT: StackError = StackError(0x3001);
    pub const NOT_STARTED: StackError = StackError(0x3002);
    pub const MODE: StackError = StackError(0x3005);
    pub const SSID: StackError = StackError(0x300A);

    pub fn code(self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for StackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&stack_error_to_string(self.0))
    }
}

impl std::error::Error for StackError {}

/// Errors that can occur while driving the station or the event bus
#[derive(Error, Debug)]
pub enum WifiError {
    #[error("Failed to initialize station driver (code: {code})")]
    InitFailed { code: i32 },

    #[error("Failed to set storage mode (code: {code})")]
    StorageFailed { code: i32 },

    #[error("Failed to set operating mode (code: {code})")]
    ModeFailed { code: i32 },

    #[error("Failed to apply station configuration (code: {code})")]
    ConfigFailed { code: i32 },

    #[error("Failed to start station driver (code: {code})")]
    StartFailed { code: i32 },

    #[error("Failed to stop station driver (code: {code})")]
    StopFailed { code: i32 },

    #[error("Failed to register event handler (code: {code})")]
    SubscribeFailed { code: i32 },

    #[error("Failed to unregister event handler (code: {code})")]
    UnsubscribeFailed { code: i32 },

    #[error("Missing {field}: value must not be empty")]
    MissingCredential { field: &'static str },

    #[error("Failed to start event loop: {0}")]
    EventLoopStart(#[from] std::io::Error),

    #[error("Event loop is no longer running")]
    EventLoopClosed,
}

/// Convert a network stack status code to a human-readable string
pub fn stack_error_to_string(code: i32) -> String {
    match code {
        0 => "Success".to_string(),
        -1 => "Generic Failure".to_string(),
        0x101 => "Out of Memory".to_string(),
        0x102 => "Invalid Argument".to_string(),
        0x103 => "Invalid State".to_string(),
        0x104 => "Invalid Size".to_string(),
        0x105 => "Not Found".to_string(),
        0x106 => "Not Supported".to_string(),
        0x107 => "Timeout".to_string(),
        // Wi-Fi driver codes
        0x3001 => "Wi-Fi Driver Not Initialized".to_string(),
        0x3002 => "Wi-Fi Driver Not Started".to_string(),
        0x3003 => "Wi-Fi Driver Not Stopped".to_string(),
        0x3004 => "Invalid Interface".to_string(),
        0x3005 => "Invalid Mode".to_string(),
        0x3006 => "Internal State Error".to_string(),
        0x3007 => "Internal Control Block Error".to_string(),
        0x3008 => "NVS Module Error".to_string(),
        0x3009 => "Invalid MAC Address".to_string(),
        0x300A => "Invalid SSID".to_string(),
        0x300B => "Invalid Password".to_string(),
        0x300C => "Wi-Fi Timeout".to_string(),
        _ => format!("Unknown Error (Code: {code}, 0x{code:X})"),
    }
}

/// Convert a station disconnect reason code to a human-readable string
pub fn disconnect_reason_to_string(reason: u8) -> String {
    match reason {
        1 => "Unspecified".to_string(),
        2 => "Authentication Expired".to_string(),
        3 => "Deauthenticated (Leaving)".to_string(),
        4 => "Association Expired".to_string(),
        8 => "Disassociated (Leaving)".to_string(),
        15 => "4-Way Handshake Timeout (Possible Wrong Password)".to_string(),
        200 => "Beacon Timeout".to_string(),
        201 => "No AP Found".to_string(),
        202 => "Authentication Failed".to_string(),
        203 => "Association Failed".to_string(),
        204 => "Handshake Timeout".to_string(),
        205 => "Connection Failed".to_string(),
        _ => format!("Unknown Reason (Code: {reason})"),
    }
}
