//! Bridges Wi-Fi station and IP events raised on a dispatch thread into
//! callbacks on a single-threaded execution engine owned by another task.

pub mod config;
pub mod engine;
pub mod error;
pub mod platform;
pub mod task;
pub mod wifi;

pub use engine::{Callback, CallbackEngine, Engine, EngineError, EngineHandle, callback};
pub use error::{StackError, WifiError, WifiResult};
pub use platform::Platform;
pub use task::{CooperativeTask, Scheduler, SuspendGuard, TaskScheduler};
pub use wifi::{ConnectivityFlag, Session, WifiContext};
