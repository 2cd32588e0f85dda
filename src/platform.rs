use crate::error::WifiResult;
use crate::wifi::{ConnectivityFlag, EventLoop, Session, SimNetwork, SimulatedStack};
use std::sync::Arc;
use tracing::info;

/// One network session: the default event loop, the station interface on
/// top of it and the session's connectivity flag.
#[derive(Debug)]
pub struct Platform {
    event_loop: Arc<EventLoop>,
    stack: Arc<SimulatedStack>,
    session: Session,
}

impl Platform {
    /// Bring up the event loop and a simulated station that knows `networks`
    pub fn init(networks: impl IntoIterator<Item = SimNetwork>) -> WifiResult<Self> {
        let event_loop = Arc::new(EventLoop::new()?);
        let stack = networks
            .into_iter()
            .fold(SimulatedStack::new().with_events(&event_loop), |stack, network| {
                stack.with_network(network)
            });
        let stack = Arc::new(stack);
        let session = Session::new(event_loop.clone(), stack.clone());
        info!("network platform initialized");

        Ok(Self {
            event_loop,
            stack,
            session,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn event_loop(&self) -> &Arc<EventLoop> {
        &self.event_loop
    }

    pub fn stack(&self) -> &Arc<SimulatedStack> {
        &self.stack
    }

    pub fn flag(&self) -> &ConnectivityFlag {
        self.session.flag()
    }

    /// Block until every event raised so far has been handled.
    ///
    /// Blocks the calling thread; see [`EventLoop::flush`] for the
    /// restriction on async callers.
    pub fn flush(&self) -> WifiResult<()> {
        self.event_loop.flush()
    }
}
