use crate::config;
use crate::engine::Engine;
use crate::error::disconnect_reason_to_string;
use crate::task::Scheduler;
use crate::wifi::context::ContextCore;
use crate::wifi::flag::ConnectivityFlag;
use crate::wifi::stack::NetworkStack;
use crate::wifi::types::{IpEvent, StationEvent};
use std::fmt::Write;
use std::net::Ipv4Addr;
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace};

/// Reacts to station lifecycle events on the dispatch thread
pub struct StationEventHandler<E: Engine, S: Scheduler> {
    stack: Arc<dyn NetworkStack>,
    flag: ConnectivityFlag,
    context: Weak<ContextCore<E, S>>,
}

impl<E: Engine, S: Scheduler> StationEventHandler<E, S> {
    pub(crate) fn new(
        stack: Arc<dyn NetworkStack>,
        flag: ConnectivityFlag,
        context: Weak<ContextCore<E, S>>,
    ) -> Self {
        Self {
            stack,
            flag,
            context,
        }
    }

    pub fn handle(&self, event: &StationEvent) {
        match event {
            StationEvent::Started => {
                debug!("station started, joining");
                if let Err(err) = self.stack.connect() {
                    debug!(%err, "join request rejected");
                }
            }
            StationEvent::Disconnected { ssid, reason } => {
                info!(
                    %ssid,
                    reason = %disconnect_reason_to_string(*reason),
                    "station disconnected, reconnecting"
                );
                // The driver does not re-associate on its own.
                if let Err(err) = self.stack.connect() {
                    debug!(%err, "reconnect request rejected");
                }
                self.flag.clear();

                if let Some(context) = self.context.upgrade() {
                    context.notify_disconnected();
                }
            }
            other => trace!(id = other.id(), "station event ignored"),
        }
    }
}

/// Reacts to address acquisition on the dispatch thread
pub struct AddressEventHandler<E: Engine, S: Scheduler> {
    flag: ConnectivityFlag,
    context: Weak<ContextCore<E, S>>,
}

impl<E: Engine, S: Scheduler> AddressEventHandler<E, S> {
    pub(crate) fn new(flag: ConnectivityFlag, context: Weak<ContextCore<E, S>>) -> Self {
        Self { flag, context }
    }

    pub fn handle(&self, event: &IpEvent) {
        match event {
            IpEvent::GotIp(info) => {
                info!(ip = %info.ip, gateway = %info.gateway, "address acquired");
                self.flag.set();

                if let Some(context) = self.context.upgrade() {
                    context.notify_connected(info.ip);
                }
            }
            other => trace!(id = other.id(), "address event ignored"),
        }
    }
}

/// Dotted-decimal text of an IPv4 address
pub fn format_address(ip: Ipv4Addr) -> String {
    let mut text = String::with_capacity(config::IPV4_STR_MAX_LEN);
    // Writing into a String cannot fail.
    let _ = write!(text, "{ip}");
    text
}
