use crate::engine::{Engine, EngineHandle};
use crate::error::{StackError, WifiError, WifiResult};
use crate::task::{Scheduler, SuspendGuard};
use crate::wifi::event_loop::{EventHandler, EventSource, Registration};
use crate::wifi::flag::ConnectivityFlag;
use crate::wifi::handlers::{AddressEventHandler, StationEventHandler, format_address};
use crate::wifi::stack::{self, NetworkStack};
use crate::wifi::types::{EventBase, EventFilter, WifiEvent, event_id};
use secrecy::SecretString;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, error, info, trace, warn};

/// Collaborators shared by every context of one network session.
///
/// At most one context is bound to a session at a time.
#[derive(Clone)]
pub struct Session {
    events: Arc<dyn EventSource>,
    stack: Arc<dyn NetworkStack>,
    flag: ConnectivityFlag,
    bound: Arc<AtomicBool>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("connected", &self.flag.is_set())
            .field("bound", &self.bound.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(events: Arc<dyn EventSource>, stack: Arc<dyn NetworkStack>) -> Self {
        Self {
            events,
            stack,
            flag: ConnectivityFlag::new(),
            bound: Arc::new(AtomicBool::new(false)),
        }
    }

    fn claim(&self) -> WifiResult<()> {
        self.bound
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| WifiError::SubscribeFailed {
                code: StackError::INVALID_STATE.code(),
            })
    }

    fn release(&self) {
        self.bound.store(false, Ordering::Release);
    }

    pub fn flag(&self) -> &ConnectivityFlag {
        &self.flag
    }

    pub fn stack(&self) -> &Arc<dyn NetworkStack> {
        &self.stack
    }
}

struct Callbacks<C> {
    on_connected: Option<C>,
    on_disconnected: Option<C>,
}

/// State reachable from the event handlers.
///
/// Callbacks are written by the owning task and read by handlers only while
/// the owning task is suspended and the engine is locked.
pub(crate) struct ContextCore<E: Engine, S: Scheduler> {
    owning_task: S::Task,
    scheduler: Arc<S>,
    engine: EngineHandle<E>,
    callbacks: Mutex<Callbacks<E::Callable>>,
    // Held for reading by every in-flight notification; teardown takes it
    // for writing to drain them.
    bound: RwLock<bool>,
}

impl<E: Engine, S: Scheduler> ContextCore<E, S> {
    pub(crate) fn notify_connected(&self, ip: Ipv4Addr) {
        let bound = self
            .bound
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !*bound {
            trace!("context unbound, skipping on_connected");
            return;
        }
        if self.callbacks().on_connected.is_none() {
            return;
        }

        self.invoke_locked(
            |callbacks| callbacks.on_connected.clone(),
            |engine| vec![engine.string(&format_address(ip))],
        );
    }

    pub(crate) fn notify_disconnected(&self) {
        let bound = self
            .bound
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !*bound {
            trace!("context unbound, skipping on_disconnected");
            return;
        }
        if self.callbacks().on_disconnected.is_none() {
            return;
        }

        self.invoke_locked(|callbacks| callbacks.on_disconnected.clone(), |_| Vec::new());
    }

    /// Run one callback with the engine locked and the owning task suspended
    fn invoke_locked(
        &self,
        pick: impl FnOnce(&Callbacks<E::Callable>) -> Option<E::Callable>,
        make_args: impl FnOnce(&mut E) -> Vec<E::Value>,
    ) {
        // Lock before suspending: the owner may reach a suspension point
        // while it holds the engine. Drop order resumes, then unlocks.
        let mut engine = self.engine.lock();
        let _suspended = SuspendGuard::new(self.scheduler.as_ref(), &self.owning_task);

        // Re-read under the lock so a replaced callback is never run.
        let Some(callable) = pick(&*self.callbacks()) else {
            return;
        };

        let scope = engine.enter_scope();
        let args = make_args(&mut *engine);
        if let Err(err) = engine.invoke(&callable, &args) {
            warn!(%err, "callback raised an error");
        }
        drop(args);
        engine.exit_scope(scope);
    }

    fn callbacks(&self) -> MutexGuard<'_, Callbacks<E::Callable>> {
        self.callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Connection-event context behind one Wi-Fi object of the engine.
///
/// Created on the owning task; subscribes a station handler and an address
/// handler and keeps their registrations until [`destroy`](Self::destroy)
/// or drop.
pub struct WifiContext<E: Engine, S: Scheduler> {
    core: Arc<ContextCore<E, S>>,
    session: Session,
    station_registration: Option<Registration>,
    address_registration: Option<Registration>,
}

impl<E: Engine, S: Scheduler> std::fmt::Debug for WifiContext<E, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WifiContext")
            .field("owning_task", &self.core.owning_task)
            .field("station_registration", &self.station_registration)
            .field("address_registration", &self.address_registration)
            .field("connected", &self.session.flag.is_set())
            .finish()
    }
}

impl<E: Engine, S: Scheduler> WifiContext<E, S> {
    /// Bind a context to the calling task and subscribe both handlers.
    ///
    /// Fails with `SubscribeFailed` carrying `INVALID_STATE` while another
    /// context is bound to the same session.
    pub fn create(session: &Session, engine: EngineHandle<E>, scheduler: Arc<S>) -> WifiResult<Self> {
        session.claim()?;
        let owning_task = scheduler.current_task();
        let core = Arc::new(ContextCore {
            owning_task,
            scheduler,
            engine,
            callbacks: Mutex::new(Callbacks {
                on_connected: None,
                on_disconnected: None,
            }),
            bound: RwLock::new(true),
        });

        let station = StationEventHandler::new(
            Arc::clone(&session.stack),
            session.flag.clone(),
            Arc::downgrade(&core),
        );
        let station_handler: EventHandler = Arc::new(move |event: &WifiEvent| {
            if let WifiEvent::Station(event) = event {
                station.handle(event);
            }
        });
        let station_registration =
            match session
                .events
                .subscribe(EventBase::Wifi, EventFilter::Any, station_handler)
            {
                Ok(registration) => registration,
                Err(err) => {
                    session.release();
                    return Err(err);
                }
            };

        let address = AddressEventHandler::new(session.flag.clone(), Arc::downgrade(&core));
        let address_handler: EventHandler = Arc::new(move |event: &WifiEvent| {
            if let WifiEvent::Ip(event) = event {
                address.handle(event);
            }
        });
        let address_registration = match session.events.subscribe(
            EventBase::Ip,
            EventFilter::Id(event_id::IP_STA_GOT_IP),
            address_handler,
        ) {
            Ok(registration) => registration,
            Err(err) => {
                if let Err(cleanup) = session.events.unsubscribe(station_registration) {
                    error!(%cleanup, "failed to release station handler");
                }
                session.release();
                return Err(err);
            }
        };

        info!(task = ?core.owning_task, "connection context created");
        Ok(Self {
            core,
            session: session.clone(),
            station_registration: Some(station_registration),
            address_registration: Some(address_registration),
        })
    }

    /// Configure station mode with the given credentials and start the driver
    pub fn connect(&self, ssid: &str, password: &SecretString) -> WifiResult<()> {
        stack::connect(self.session.stack.as_ref(), ssid, password)
    }

    pub fn disconnect(&self) -> WifiResult<()> {
        stack::disconnect(self.session.stack.as_ref())
    }

    /// Replace the callback run with the address string on address acquisition.
    /// Passing `None` removes it.
    pub fn on_connected(&self, callback: Option<E::Callable>) {
        self.core.callbacks().on_connected = callback;
    }

    /// Replace the callback run without arguments on disconnect.
    /// Passing `None` removes it.
    pub fn on_disconnected(&self, callback: Option<E::Callable>) {
        self.core.callbacks().on_disconnected = callback;
    }

    pub fn is_connected(&self) -> bool {
        self.session.flag.is_set()
    }

    pub fn flag(&self) -> &ConnectivityFlag {
        &self.session.flag
    }

    pub fn owning_task(&self) -> &S::Task {
        &self.core.owning_task
    }

    /// Unsubscribe both handlers and release the context.
    ///
    /// Waits for a notification already running on the dispatch thread to
    /// finish. Must not be called from inside a callback or while the
    /// caller holds the engine.
    pub fn destroy(mut self) -> WifiResult<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> WifiResult<()> {
        let mut result = Ok(());
        if let Some(registration) = self.station_registration.take() {
            result = self.session.events.unsubscribe(registration);
        }
        if let Some(registration) = self.address_registration.take() {
            let unsubscribed = self.session.events.unsubscribe(registration);
            if result.is_ok() {
                result = unsubscribed;
            }
        }

        *self
            .core
            .bound
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = false;
        self.session.release();
        debug!("connection context destroyed");
        result
    }
}

impl<E: Engine, S: Scheduler> Drop for WifiContext<E, S> {
    fn drop(&mut self) {
        if self.station_registration.is_none() && self.address_registration.is_none() {
            return;
        }
        if let Err(err) = self.teardown() {
            error!(%err, "failed to release connection context");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CallbackEngine, EngineError, callback};
    use crate::error::{StackError, WifiError};
    use crate::task::TaskScheduler;
    use crate::wifi::event_loop::EventLoop;
    use crate::wifi::sim::{SimulatedStack, StackOp};
    use crate::wifi::types::{IpEvent, IpInfo, StationEvent, reason};
    use std::sync::atomic::AtomicUsize;

    /// Counts suspensions of a single anonymous task
    #[derive(Default)]
    struct CountingScheduler {
        suspends: AtomicUsize,
    }

    impl Scheduler for CountingScheduler {
        type Task = ();

        fn current_task(&self) {}

        fn suspend(&self, _task: &()) {
            self.suspends.fetch_add(1, Ordering::SeqCst);
        }

        fn resume(&self, _task: &()) {}
    }

    struct Fixture {
        events: Arc<EventLoop>,
        stack: Arc<SimulatedStack>,
        session: Session,
        engine: EngineHandle<CallbackEngine>,
    }

    fn fixture() -> Fixture {
        let events = Arc::new(EventLoop::new().unwrap());
        let stack = Arc::new(SimulatedStack::new());
        let session = Session::new(events.clone(), stack.clone());
        Fixture {
            events,
            stack,
            session,
            engine: EngineHandle::new(CallbackEngine::new()),
        }
    }

    fn create(f: &Fixture) -> WifiContext<CallbackEngine, TaskScheduler> {
        WifiContext::create(&f.session, f.engine.clone(), Arc::new(TaskScheduler::new())).unwrap()
    }

    fn counter() -> (Arc<Mutex<Vec<Vec<String>>>>, crate::engine::Callback) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        let cb = callback(move |args| {
            sink.lock().unwrap().push(args.to_vec());
            Ok(())
        });
        (calls, cb)
    }

    fn got_ip(a: u8, b: u8, c: u8, d: u8) -> IpEvent {
        IpEvent::GotIp(IpInfo::new(Ipv4Addr::new(a, b, c, d)))
    }

    #[test]
    fn create_subscribes_both_handlers_and_destroy_releases_them() {
        let f = fixture();
        let context = create(&f);
        assert_eq!(f.events.subscriber_count(), 2);
        assert_eq!(context.owning_task(), &TaskScheduler::new().current_task());

        context.destroy().unwrap();
        assert_eq!(f.events.subscriber_count(), 0);
    }

    #[test]
    fn drop_releases_registrations() {
        let f = fixture();
        {
            let _context = create(&f);
            assert_eq!(f.events.subscriber_count(), 2);
        }
        assert_eq!(f.events.subscriber_count(), 0);
    }

    #[test]
    fn address_event_runs_on_connected_with_the_address() {
        let f = fixture();
        let context = create(&f);
        let (calls, cb) = counter();
        context.on_connected(Some(cb));

        f.events.post(got_ip(10, 1, 2, 3)).unwrap();
        f.events.flush().unwrap();

        assert_eq!(*calls.lock().unwrap(), vec![vec!["10.1.2.3".to_string()]]);
        assert!(context.is_connected());
        // The argument lived only for the invocation.
        assert_eq!(f.engine.with(|engine| engine.arena_len()), 0);
    }

    #[test]
    fn callback_errors_are_contained() {
        let f = fixture();
        let context = create(&f);
        context.on_disconnected(Some(callback(|_| Err(EngineError("boom".to_string())))));

        f.events
            .post(StationEvent::Disconnected {
                ssid: "network".to_string(),
                reason: reason::BEACON_TIMEOUT,
            })
            .unwrap();
        f.events.post(got_ip(10, 0, 0, 9)).unwrap();
        f.events.flush().unwrap();

        assert!(context.is_connected());
        assert_eq!(f.engine.with(|engine| engine.invocations()), 1);
    }

    #[test]
    fn clearing_a_callback_skips_invocation() {
        let f = fixture();
        let context = create(&f);
        let (calls, cb) = counter();
        context.on_connected(Some(cb));
        context.on_connected(None);

        f.events.post(got_ip(10, 0, 0, 1)).unwrap();
        f.events.flush().unwrap();
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn started_requests_a_join() {
        let f = fixture();
        let _context = create(&f);
        f.events.post(StationEvent::Started).unwrap();
        f.events.flush().unwrap();
        assert_eq!(f.stack.count(StackOp::Connect), 1);
    }

    #[test]
    fn failed_subscription_rolls_back_and_reports() {
        struct SecondSubscribeFails {
            inner: EventLoop,
            calls: Mutex<u32>,
        }

        impl EventSource for SecondSubscribeFails {
            fn subscribe(
                &self,
                base: EventBase,
                filter: EventFilter,
                handler: EventHandler,
            ) -> WifiResult<Registration> {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                if *calls == 2 {
                    return Err(WifiError::SubscribeFailed {
                        code: StackError::NO_MEM.code(),
                    });
                }
                self.inner.subscribe(base, filter, handler)
            }

            fn unsubscribe(&self, registration: Registration) -> WifiResult<()> {
                self.inner.unsubscribe(registration)
            }
        }

        let events = Arc::new(SecondSubscribeFails {
            inner: EventLoop::new().unwrap(),
            calls: Mutex::new(0),
        });
        let session = Session::new(events.clone(), Arc::new(SimulatedStack::new()));
        let err = WifiContext::create(
            &session,
            EngineHandle::new(CallbackEngine::new()),
            Arc::new(TaskScheduler::new()),
        )
        .unwrap_err();

        assert!(matches!(err, WifiError::SubscribeFailed { code: 0x101 }));
        assert_eq!(events.inner.subscriber_count(), 0);

        // The failed attempt left the session free.
        let context = WifiContext::create(
            &session,
            EngineHandle::new(CallbackEngine::new()),
            Arc::new(TaskScheduler::new()),
        )
        .unwrap();
        assert_eq!(events.inner.subscriber_count(), 2);
        context.destroy().unwrap();
    }

    #[test]
    fn connect_failure_propagates_without_callbacks() {
        let f = fixture();
        let context = create(&f);
        let (calls, cb) = counter();
        context.on_connected(Some(cb.clone()));
        context.on_disconnected(Some(cb));
        f.stack.fail_on(StackOp::Start, StackError::NO_MEM);

        let err = context
            .connect("network", &SecretString::from("secret"))
            .unwrap_err();
        f.events.flush().unwrap();

        assert!(matches!(err, WifiError::StartFailed { code: 0x101 }));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn second_context_on_a_session_is_rejected() {
        let f = fixture();
        let context = create(&f);

        let err = WifiContext::create(
            &f.session,
            f.engine.clone(),
            Arc::new(TaskScheduler::new()),
        )
        .unwrap_err();
        assert!(matches!(err, WifiError::SubscribeFailed { code: 0x103 }));
        assert_eq!(f.events.subscriber_count(), 2);

        // One disconnect, one reconnect request.
        f.events
            .post(StationEvent::Disconnected {
                ssid: "network".to_string(),
                reason: reason::BEACON_TIMEOUT,
            })
            .unwrap();
        f.events.flush().unwrap();
        assert_eq!(f.stack.count(StackOp::Connect), 1);

        context.destroy().unwrap();
        let _again = create(&f);
        assert_eq!(f.events.subscriber_count(), 2);
    }

    #[test]
    fn notifications_after_teardown_are_dropped() {
        let f = fixture();
        let scheduler = Arc::new(CountingScheduler::default());
        let mut context =
            WifiContext::create(&f.session, f.engine.clone(), Arc::clone(&scheduler)).unwrap();
        let (calls, cb) = counter();
        context.on_connected(Some(cb.clone()));
        context.on_disconnected(Some(cb));

        // A handler that picked up the core before unsubscribe still holds it.
        let core = Arc::clone(&context.core);
        core.notify_connected(Ipv4Addr::new(10, 0, 0, 7));
        assert_eq!(scheduler.suspends.load(Ordering::SeqCst), 1);

        context.teardown().unwrap();
        core.notify_connected(Ipv4Addr::new(10, 0, 0, 8));
        core.notify_disconnected();

        assert_eq!(*calls.lock().unwrap(), vec![vec!["10.0.0.7".to_string()]]);
        assert_eq!(scheduler.suspends.load(Ordering::SeqCst), 1);
        assert_eq!(f.engine.with(|engine| engine.invocations()), 1);
        assert_eq!(f.events.subscriber_count(), 0);
    }
}
