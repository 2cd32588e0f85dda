//! Station module for staweave
//!
//! Event bus, station control and the connection-event context that turns
//! driver events into engine callbacks.

mod context;
mod event_loop;
mod flag;
mod handlers;
mod sim;
mod stack;
mod types;

// Re-export public API
pub use context::{Session, WifiContext};
pub use event_loop::{EventHandler, EventLoop, EventSource, Registration};
pub use flag::ConnectivityFlag;
pub use handlers::{AddressEventHandler, StationEventHandler, format_address};
pub use sim::{SimNetwork, SimulatedStack, StackCommand, StackOp};
pub use stack::{NetworkStack, connect, disconnect};
pub use types::{
    EventBase, EventFilter, InitConfig, Interface, IpEvent, IpInfo, StationConfig, StationEvent,
    StorageMode, WifiEvent, WifiMode, event_id, reason,
};
