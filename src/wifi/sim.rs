use crate::config;
use crate::error::StackError;
use crate::wifi::event_loop::EventLoop;
use crate::wifi::stack::NetworkStack;
use crate::wifi::types::{
    InitConfig, Interface, IpEvent, IpInfo, StationConfig, StationEvent, StorageMode, WifiEvent,
    WifiMode, reason,
};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, warn};

/// Command issued to the simulated driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackCommand {
    Init,
    SetStorage(StorageMode),
    SetMode(WifiMode),
    SetConfig { ssid: String },
    Start,
    Stop,
    Connect,
}

/// Driver operation selector for fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackOp {
    Init,
    SetStorage,
    SetMode,
    SetConfig,
    Start,
    Stop,
    Connect,
}

impl StackCommand {
    pub fn op(&self) -> StackOp {
        match self {
            StackCommand::Init => StackOp::Init,
            StackCommand::SetStorage(_) => StackOp::SetStorage,
            StackCommand::SetMode(_) => StackOp::SetMode,
            StackCommand::SetConfig { .. } => StackOp::SetConfig,
            StackCommand::Start => StackOp::Start,
            StackCommand::Stop => StackOp::Stop,
            StackCommand::Connect => StackOp::Connect,
        }
    }
}

/// Access point reachable by the simulated station
#[derive(Debug)]
pub struct SimNetwork {
    pub ssid: String,
    pub password: SecretString,
    pub address: Ipv4Addr,
}

impl SimNetwork {
    pub fn new(ssid: &str, password: &str, address: Ipv4Addr) -> Self {
        Self {
            ssid: ssid.to_string(),
            password: SecretString::from(password.to_string()),
            address,
        }
    }
}

#[derive(Default)]
struct SimState {
    commands: Vec<StackCommand>,
    failures: HashMap<StackOp, StackError>,
    initialized: bool,
    mode: Option<WifiMode>,
    started: bool,
    associated: bool,
    ssid: Option<String>,
    password: Option<SecretString>,
    failed_joins: u32,
}

/// In-process station driver.
///
/// Records every command. When attached to an [`EventLoop`] it also raises
/// the events a real driver would: start, join or join failure, address
/// acquisition, and disconnect on stop.
pub struct SimulatedStack {
    state: Mutex<SimState>,
    networks: Vec<SimNetwork>,
    events: Option<Weak<EventLoop>>,
    failed_join_budget: u32,
}

impl std::fmt::Debug for SimulatedStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("SimulatedStack")
            .field("started", &state.started)
            .field("associated", &state.associated)
            .field("commands", &state.commands.len())
            .finish()
    }
}

impl Default for SimulatedStack {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedStack {
    /// A stack that only records commands
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            networks: Vec::new(),
            events: None,
            failed_join_budget: config::SIM_FAILED_JOIN_BUDGET,
        }
    }

    /// Raise driver events on `events`
    pub fn with_events(mut self, events: &Arc<EventLoop>) -> Self {
        self.events = Some(Arc::downgrade(events));
        self
    }

    pub fn with_network(mut self, network: SimNetwork) -> Self {
        self.networks.push(network);
        self
    }

    /// Number of consecutive failed joins reported before the driver goes quiet
    pub fn with_failed_join_budget(mut self, budget: u32) -> Self {
        self.failed_join_budget = budget;
        self
    }

    /// Make every later call to `op` fail with `error`
    pub fn fail_on(&self, op: StackOp, error: StackError) {
        self.state().failures.insert(op, error);
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    pub fn commands(&self) -> Vec<StackCommand> {
        self.state().commands.clone()
    }

    pub fn count(&self, op: StackOp) -> usize {
        self.state()
            .commands
            .iter()
            .filter(|command| command.op() == op)
            .count()
    }

    pub fn is_started(&self) -> bool {
        self.state().started
    }

    pub fn is_associated(&self) -> bool {
        self.state().associated
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record `command` and apply any injected failure for it
    fn issue(&self, state: &mut SimState, command: StackCommand) -> Result<(), StackError> {
        let op = command.op();
        state.commands.push(command);
        match state.failures.get(&op) {
            Some(error) => {
                debug!(?op, %error, "injected driver failure");
                Err(*error)
            }
            None => Ok(()),
        }
    }

    fn raise(&self, events: Vec<WifiEvent>) {
        let Some(event_loop) = self.events.as_ref().and_then(Weak::upgrade) else {
            return;
        };
        for event in events {
            if event_loop.post(event).is_err() {
                warn!("event loop closed, dropping driver event");
                return;
            }
        }
    }

    fn join(&self, state: &mut SimState) -> Vec<WifiEvent> {
        let ssid = state.ssid.clone().unwrap_or_default();
        let password = state
            .password
            .as_ref()
            .map(|p| p.expose_secret().to_string())
            .unwrap_or_default();

        let network = self.networks.iter().find(|n| n.ssid == ssid);
        match network {
            Some(network) if network.password.expose_secret() == password => {
                state.associated = true;
                state.failed_joins = 0;
                vec![
                    WifiEvent::Station(StationEvent::Connected {
                        ssid,
                        channel: config::SIM_CHANNEL,
                    }),
                    WifiEvent::Ip(IpEvent::GotIp(IpInfo::new(network.address))),
                ]
            }
            _ if state.failed_joins >= self.failed_join_budget => {
                debug!(%ssid, "join budget exhausted, driver idle");
                Vec::new()
            }
            other => {
                state.failed_joins += 1;
                let reason = if other.is_some() {
                    reason::AUTH_FAIL
                } else {
                    reason::NO_AP_FOUND
                };
                vec![WifiEvent::Station(StationEvent::Disconnected { ssid, reason })]
            }
        }
    }
}

impl NetworkStack for SimulatedStack {
    fn init(&self, _config: &InitConfig) -> Result<(), StackError> {
        let mut state = self.state();
        self.issue(&mut state, StackCommand::Init)?;
        state.initialized = true;
        Ok(())
    }

    fn set_storage(&self, storage: StorageMode) -> Result<(), StackError> {
        let mut state = self.state();
        self.issue(&mut state, StackCommand::SetStorage(storage))?;
        if !state.initialized {
            return Err(StackError::NOT_INIT);
        }
        Ok(())
    }

    fn set_mode(&self, mode: WifiMode) -> Result<(), StackError> {
        let mut state = self.state();
        self.issue(&mut state, StackCommand::SetMode(mode))?;
        if !state.initialized {
            return Err(StackError::NOT_INIT);
        }
        state.mode = Some(mode);
        Ok(())
    }

    fn set_config(&self, interface: Interface, config: &StationConfig) -> Result<(), StackError> {
        let mut state = self.state();
        self.issue(
            &mut state,
            StackCommand::SetConfig {
                ssid: config.ssid().to_string(),
            },
        )?;
        if !state.initialized {
            return Err(StackError::NOT_INIT);
        }
        if interface != Interface::Station {
            return Err(StackError::INVALID_ARG);
        }
        state.ssid = Some(config.ssid().to_string());
        state.password = Some(SecretString::from(
            config.password().expose_secret().to_string(),
        ));
        Ok(())
    }

    fn start(&self) -> Result<(), StackError> {
        let mut state = self.state();
        self.issue(&mut state, StackCommand::Start)?;
        if !state.initialized {
            return Err(StackError::NOT_INIT);
        }
        if !matches!(state.mode, Some(WifiMode::Station | WifiMode::ApStation)) {
            return Err(StackError::MODE);
        }
        state.started = true;
        drop(state);

        self.raise(vec![WifiEvent::Station(StationEvent::Started)]);
        Ok(())
    }

    fn stop(&self) -> Result<(), StackError> {
        let mut state = self.state();
        self.issue(&mut state, StackCommand::Stop)?;
        if !state.initialized {
            return Err(StackError::NOT_INIT);
        }

        let mut events = Vec::new();
        if state.associated {
            events.push(WifiEvent::Station(StationEvent::Disconnected {
                ssid: state.ssid.clone().unwrap_or_default(),
                reason: reason::ASSOC_LEAVE,
            }));
        }
        if state.started {
            events.push(WifiEvent::Station(StationEvent::Stopped));
        }
        state.started = false;
        state.associated = false;
        state.failed_joins = 0;
        drop(state);

        self.raise(events);
        Ok(())
    }

    fn connect(&self) -> Result<(), StackError> {
        let mut state = self.state();
        self.issue(&mut state, StackCommand::Connect)?;
        if !state.started {
            return Err(StackError::NOT_STARTED);
        }
        if state.ssid.is_none() {
            return Err(StackError::SSID);
        }
        let events = self.join(&mut state);
        drop(state);

        self.raise(events);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wifi::event_loop::{EventHandler, EventSource};
    use crate::wifi::types::{EventBase, EventFilter};

    fn configure(stack: &SimulatedStack, ssid: &str, password: &str) {
        stack.init(&InitConfig::default()).unwrap();
        stack.set_mode(WifiMode::Station).unwrap();
        let config = StationConfig::new(ssid, &SecretString::from(password.to_string())).unwrap();
        stack.set_config(Interface::Station, &config).unwrap();
    }

    fn record_all(events: &EventLoop) -> Arc<Mutex<Vec<WifiEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        for base in [EventBase::Wifi, EventBase::Ip] {
            let sink = Arc::clone(&seen);
            let handler: EventHandler = Arc::new(move |event: &WifiEvent| {
                sink.lock().unwrap().push(event.clone());
            });
            events.subscribe(base, EventFilter::Any, handler).unwrap();
        }
        seen
    }

    #[test]
    fn records_commands_in_order() {
        let stack = SimulatedStack::new();
        configure(&stack, "network", "secret");
        stack.start().unwrap();
        stack.stop().unwrap();

        assert_eq!(
            stack.commands(),
            vec![
                StackCommand::Init,
                StackCommand::SetMode(WifiMode::Station),
                StackCommand::SetConfig {
                    ssid: "network".to_string()
                },
                StackCommand::Start,
                StackCommand::Stop,
            ]
        );
    }

    #[test]
    fn rejects_calls_before_init_and_connect_before_start() {
        let stack = SimulatedStack::new();
        assert_eq!(stack.set_mode(WifiMode::Station), Err(StackError::NOT_INIT));
        assert_eq!(stack.stop(), Err(StackError::NOT_INIT));

        configure(&stack, "network", "secret");
        assert_eq!(stack.connect(), Err(StackError::NOT_STARTED));
    }

    #[test]
    fn rejects_non_station_interface_and_mode() {
        let stack = SimulatedStack::new();
        stack.init(&InitConfig::default()).unwrap();
        stack.set_storage(StorageMode::Flash).unwrap();
        stack.set_mode(WifiMode::Null).unwrap();
        assert_eq!(stack.start(), Err(StackError::MODE));

        let config =
            StationConfig::new("network", &SecretString::from("secret".to_string())).unwrap();
        assert_eq!(
            stack.set_config(Interface::AccessPoint, &config),
            Err(StackError::INVALID_ARG)
        );
        assert_eq!(stack.connect(), Err(StackError::NOT_STARTED));
        assert_eq!(
            stack.commands()[..3],
            [
                StackCommand::Init,
                StackCommand::SetStorage(StorageMode::Flash),
                StackCommand::SetMode(WifiMode::Null),
            ]
        );
    }

    #[test]
    fn injected_failures_are_reported() {
        let stack = SimulatedStack::new();
        stack.fail_on(StackOp::Init, StackError::NO_MEM);
        assert_eq!(stack.init(&InitConfig::default()), Err(StackError::NO_MEM));
        assert_eq!(stack.count(StackOp::Init), 1);

        stack.clear_failures();
        assert!(stack.init(&InitConfig::default()).is_ok());
    }

    #[test]
    fn known_network_joins_and_acquires_address() {
        let events = Arc::new(EventLoop::new().unwrap());
        let seen = record_all(&events);
        let address = Ipv4Addr::new(192, 168, 1, 42);
        let stack = SimulatedStack::new()
            .with_events(&events)
            .with_network(SimNetwork::new("network", "secret", address));

        configure(&stack, "network", "secret");
        stack.start().unwrap();
        stack.connect().unwrap();
        stack.stop().unwrap();
        events.flush().unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                WifiEvent::Station(StationEvent::Started),
                WifiEvent::Station(StationEvent::Connected {
                    ssid: "network".to_string(),
                    channel: config::SIM_CHANNEL,
                }),
                WifiEvent::Ip(IpEvent::GotIp(IpInfo::new(address))),
                WifiEvent::Station(StationEvent::Disconnected {
                    ssid: "network".to_string(),
                    reason: reason::ASSOC_LEAVE,
                }),
                WifiEvent::Station(StationEvent::Stopped),
            ]
        );
    }

    #[test]
    fn failed_joins_stop_after_budget() {
        let events = Arc::new(EventLoop::new().unwrap());
        let seen = record_all(&events);
        let stack = SimulatedStack::new()
            .with_events(&events)
            .with_failed_join_budget(2)
            .with_network(SimNetwork::new(
                "network",
                "secret",
                Ipv4Addr::new(10, 0, 0, 2),
            ));

        configure(&stack, "network", "wrong");
        stack.start().unwrap();
        for _ in 0..4 {
            stack.connect().unwrap();
        }
        events.flush().unwrap();

        let disconnects: Vec<_> = seen
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                WifiEvent::Station(StationEvent::Disconnected { reason, .. }) => Some(*reason),
                _ => None,
            })
            .collect();
        assert_eq!(disconnects, vec![reason::AUTH_FAIL, reason::AUTH_FAIL]);
        assert!(!stack.is_associated());
    }
}
