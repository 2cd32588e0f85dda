use crate::config;
use crate::error::{WifiError, WifiResult};
use secrecy::{ExposeSecret, SecretString};
use std::net::Ipv4Addr;

/// Event ids, numbered the way the network stack raises them
pub mod event_id {
    pub const WIFI_STA_START: i32 = 2;
    pub const WIFI_STA_STOP: i32 = 3;
    pub const WIFI_STA_CONNECTED: i32 = 4;
    pub const WIFI_STA_DISCONNECTED: i32 = 5;

    pub const IP_STA_GOT_IP: i32 = 0;
    pub const IP_STA_LOST_IP: i32 = 1;
}

/// Station disconnect reasons
pub mod reason {
    pub const ASSOC_LEAVE: u8 = 8;
    pub const BEACON_TIMEOUT: u8 = 200;
    pub const NO_AP_FOUND: u8 = 201;
    pub const AUTH_FAIL: u8 = 202;
}

/// Event classes a handler can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventBase {
    Wifi,
    Ip,
}

/// Which ids of an event class a subscription receives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    Any,
    Id(i32),
}

impl EventFilter {
    pub fn matches(self, id: i32) -> bool {
        match self {
            EventFilter::Any => true,
            EventFilter::Id(wanted) => wanted == id,
        }
    }
}

/// Address assignment carried by an address-acquired event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpInfo {
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

impl IpInfo {
    pub fn new(ip: Ipv4Addr) -> Self {
        Self {
            ip,
            netmask: Ipv4Addr::from(config::SIM_NETMASK),
            gateway: Ipv4Addr::from(config::SIM_GATEWAY),
        }
    }
}

/// Station lifecycle events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StationEvent {
    Started,
    Stopped,
    Connected { ssid: String, channel: u8 },
    Disconnected { ssid: String, reason: u8 },
    Other(i32),
}

impl StationEvent {
    pub fn id(&self) -> i32 {
        match self {
            StationEvent::Started => event_id::WIFI_STA_START,
            StationEvent::Stopped => event_id::WIFI_STA_STOP,
            StationEvent::Connected { .. } => event_id::WIFI_STA_CONNECTED,
            StationEvent::Disconnected { .. } => event_id::WIFI_STA_DISCONNECTED,
            StationEvent::Other(id) => *id,
        }
    }
}

/// Address lifecycle events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpEvent {
    GotIp(IpInfo),
    LostIp,
    Other(i32),
}

impl IpEvent {
    pub fn id(&self) -> i32 {
        match self {
            IpEvent::GotIp(_) => event_id::IP_STA_GOT_IP,
            IpEvent::LostIp => event_id::IP_STA_LOST_IP,
            IpEvent::Other(id) => *id,
        }
    }
}

/// Any event the network stack can raise
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WifiEvent {
    Station(StationEvent),
    Ip(IpEvent),
}

impl WifiEvent {
    pub fn base(&self) -> EventBase {
        match self {
            WifiEvent::Station(_) => EventBase::Wifi,
            WifiEvent::Ip(_) => EventBase::Ip,
        }
    }

    pub fn id(&self) -> i32 {
        match self {
            WifiEvent::Station(event) => event.id(),
            WifiEvent::Ip(event) => event.id(),
        }
    }
}

impl From<StationEvent> for WifiEvent {
    fn from(event: StationEvent) -> Self {
        WifiEvent::Station(event)
    }
}

impl From<IpEvent> for WifiEvent {
    fn from(event: IpEvent) -> Self {
        WifiEvent::Ip(event)
    }
}

/// Driver tuning applied at station initialization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitConfig {
    pub static_rx_buf_num: u8,
    pub dynamic_rx_buf_num: u8,
    pub dynamic_tx_buf_num: u8,
    pub rx_ba_win: u8,
    pub ampdu_rx_enabled: bool,
    pub ampdu_tx_enabled: bool,
    pub nvs_enabled: bool,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            static_rx_buf_num: config::STATIC_RX_BUF_NUM,
            dynamic_rx_buf_num: config::DYNAMIC_RX_BUF_NUM,
            dynamic_tx_buf_num: config::DYNAMIC_TX_BUF_NUM,
            rx_ba_win: config::RX_BA_WIN,
            ampdu_rx_enabled: config::AMPDU_RX_ENABLED,
            ampdu_tx_enabled: config::AMPDU_TX_ENABLED,
            nvs_enabled: config::NVS_ENABLED,
        }
    }
}

/// Where the driver keeps its settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    Flash,
    Ram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiMode {
    Null,
    Station,
    AccessPoint,
    ApStation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interface {
    Station,
    AccessPoint,
}

/// Credentials applied to the station interface
#[derive(Debug)]
pub struct StationConfig {
    ssid: String,
    password: SecretString,
}

impl StationConfig {
    /// Build a station record; values longer than their field are truncated.
    pub fn new(ssid: &str, password: &SecretString) -> WifiResult<Self> {
        if ssid.is_empty() {
            return Err(WifiError::MissingCredential { field: "ssid" });
        }
        if password.expose_secret().is_empty() {
            return Err(WifiError::MissingCredential { field: "password" });
        }

        let ssid = truncate_field(ssid, config::SSID_FIELD_LEN).to_string();
        let password =
            truncate_field(password.expose_secret(), config::PASSWORD_FIELD_LEN).to_string();

        Ok(Self {
            ssid,
            password: SecretString::from(password),
        })
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn password(&self) -> &SecretString {
        &self.password
    }
}

/// Keep what fits in a NUL-terminated field without splitting a character
fn truncate_field(value: &str, field_len: usize) -> &str {
    let max = field_len.saturating_sub(1);
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}
