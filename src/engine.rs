//! Seam to the single-threaded execution engine.
//!
//! The engine is never entered from two threads at once: the owning task
//! reaches it through [`EngineHandle::with`], event handlers only under the
//! cooperative lock held by the connection context.

use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Error raised by a callback running inside the engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct EngineError(pub String);

/// Operations the connection context needs from an engine
pub trait Engine: Send + 'static {
    /// A callable value the engine can invoke, stored by value in the context
    type Callable: Clone + Send + 'static;
    /// A transient engine value passed as a callback argument
    type Value;
    /// Token bounding the lifetime of values created for one invocation
    type Scope;

    fn enter_scope(&mut self) -> Self::Scope;

    fn exit_scope(&mut self, scope: Self::Scope);

    /// Create a string value inside the current scope
    fn string(&mut self, text: &str) -> Self::Value;

    fn invoke(
        &mut self,
        callable: &Self::Callable,
        args: &[Self::Value],
    ) -> Result<(), EngineError>;
}

/// Shared, non-owning reference to an engine instance
#[derive(Debug)]
pub struct EngineHandle<E> {
    inner: Arc<Mutex<E>>,
}

impl<E> Clone for EngineHandle<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Engine> EngineHandle<E> {
    pub fn new(engine: E) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    /// Run engine work on the calling thread
    pub fn with<R>(&self, work: impl FnOnce(&mut E) -> R) -> R {
        work(&mut self.lock())
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, E> {
        // A panicking callback must not wedge every later notification.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Native callable for [`CallbackEngine`]
pub type Callback = Arc<dyn Fn(&[String]) -> Result<(), EngineError> + Send + Sync>;

/// Wrap a closure as a [`CallbackEngine`] callable
pub fn callback<F>(f: F) -> Callback
where
    F: Fn(&[String]) -> Result<(), EngineError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Host engine whose callables are Rust closures.
///
/// Keeps an arena of live string values; a scope records the arena height
/// and exiting it releases everything created since.
#[derive(Debug, Default)]
pub struct CallbackEngine {
    arena: Vec<String>,
    invocations: usize,
}

/// Arena height captured when a scope was entered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaIndex(usize);

impl CallbackEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of values currently held by the arena
    pub fn arena_len(&self) -> usize {
        self.arena.len()
    }

    pub fn invocations(&self) -> usize {
        self.invocations
    }
}

impl Engine for CallbackEngine {
    type Callable = Callback;
    type Value = String;
    type Scope = ArenaIndex;

    fn enter_scope(&mut self) -> ArenaIndex {
        ArenaIndex(self.arena.len())
    }

    fn exit_scope(&mut self, scope: ArenaIndex) {
        self.arena.truncate(scope.0);
    }

    fn string(&mut self, text: &str) -> String {
        self.arena.push(text.to_string());
        text.to_string()
    }

    fn invoke(&mut self, callable: &Callback, args: &[String]) -> Result<(), EngineError> {
        self.invocations += 1;
        callable(args)
    }
}
