//! Key handler registry and the default key mapping.

use std::sync::Arc;

use parking_lot::Mutex;
use thinclient_core::EventMode;
use tokio::sync::watch;
use tracing::debug;

/// Returns `true` when it consumed the event.
pub type KeyHandler = Arc<dyn Fn(&str, Option<EventMode>) -> bool + Send + Sync>;

/// Switches the visible view.
pub trait Navigator: Send + Sync {
    /// Make `view` the current view.
    fn navigate(&self, view: &str);
}

/// Where a key event ended up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// A registered handler consumed it.
    Handled(String),
    /// The default mapping acted on it.
    Default,
    /// Nothing acted on it.
    Ignored,
}

struct Registration {
    id: String,
    generation: u64,
    handler: KeyHandler,
}

#[derive(Default)]
struct Handlers {
    // Oldest first; dispatch walks it in reverse.
    entries: Vec<Registration>,
    next_generation: u64,
}

/// Short-circuiting key dispatch.
pub struct KeyRegistry {
    handlers: Arc<Mutex<Handlers>>,
    wheel: watch::Sender<i64>,
    navigator: Arc<dyn Navigator>,
}

impl KeyRegistry {
    /// Create a registry whose default mapping navigates through `navigator`.
    pub fn new(navigator: Arc<dyn Navigator>) -> Self {
        Self {
            handlers: Arc::new(Mutex::new(Handlers::default())),
            wheel: watch::Sender::new(0),
            navigator,
        }
    }

    /// Register `handler` under `id`.
    ///
    /// An existing handler with the same id is replaced, and the new one
    /// becomes the first consulted.
    pub fn register(
        &self,
        id: impl Into<String>,
        handler: impl Fn(&str, Option<EventMode>) -> bool + Send + Sync + 'static,
    ) -> KeyHandle {
        let id = id.into();
        let mut handlers = self.handlers.lock();
        let generation = handlers.next_generation;
        handlers.next_generation += 1;
        handlers.entries.retain(|r| r.id != id);
        handlers.entries.push(Registration {
            id: id.clone(),
            generation,
            handler: Arc::new(handler),
        });
        KeyHandle {
            handlers: Arc::clone(&self.handlers),
            id,
            generation,
        }
    }

    /// Offer a key event to the handlers, then to the default mapping.
    pub fn dispatch(&self, code: &str, mode: Option<EventMode>) -> Dispatch {
        let snapshot: Vec<(String, KeyHandler)> = self
            .handlers
            .lock()
            .entries
            .iter()
            .rev()
            .map(|r| (r.id.clone(), Arc::clone(&r.handler)))
            .collect();

        for (id, handler) in snapshot {
            if handler(code, mode) {
                debug!(code, handler = %id, "key consumed");
                return Dispatch::Handled(id);
            }
        }

        if !matches!(mode, None | Some(EventMode::PressShort | EventMode::PressLong)) {
            return Dispatch::Ignored;
        }
        self.default_mapping(code)
    }

    fn default_mapping(&self, code: &str) -> Dispatch {
        match code {
            "ArrowUp" | "ArrowLeft" => self.rotate(-1),
            "ArrowDown" | "ArrowRight" => self.rotate(1),
            "KeyM" => self.navigator.navigate("dashboard"),
            _ => return Dispatch::Ignored,
        }
        Dispatch::Default
    }

    /// Move the wheel position by `step`.
    pub fn rotate(&self, step: i64) {
        self.wheel.send_modify(|position| *position += step);
    }

    /// Current wheel position.
    pub fn wheel_position(&self) -> i64 {
        *self.wheel.borrow()
    }

    /// Watch the wheel position.
    pub fn subscribe_wheel(&self) -> watch::Receiver<i64> {
        self.wheel.subscribe()
    }

    /// Ids in consultation order.
    pub fn handler_ids(&self) -> Vec<String> {
        self.handlers
            .lock()
            .entries
            .iter()
            .rev()
            .map(|r| r.id.clone())
            .collect()
    }
}

/// Registration handle. Removing it after the id was re-registered leaves
/// the newer handler in place.
pub struct KeyHandle {
    handlers: Arc<Mutex<Handlers>>,
    id: String,
    generation: u64,
}

impl KeyHandle {
    /// Unregister this handler.
    pub fn remove(&self) {
        self.handlers
            .lock()
            .entries
            .retain(|r| !(r.id == self.id && r.generation == self.generation));
    }
}
