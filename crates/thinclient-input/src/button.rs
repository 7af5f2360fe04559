//! Turns raw key and wheel events into press events.
//!
//! A key-down arms a long-press timer. If it fires before the key-up, the
//! key dispatches [`EventMode::PressLong`] and the key-up is silent;
//! otherwise the key-up dispatches [`EventMode::PressShort`]. Auto-repeated
//! key-downs while a press is in flight are ignored.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thinclient_core::EventMode;
use tokio::task::AbortHandle;
use tracing::trace;

use crate::registry::KeyRegistry;

struct Press {
    id: u64,
    timer: AbortHandle,
    long_fired: bool,
}

#[derive(Default)]
struct Presses {
    active: HashMap<String, Press>,
    next_id: u64,
}

/// Long-press detection and wheel handling in front of a [`KeyRegistry`].
pub struct ButtonTracker {
    registry: Arc<KeyRegistry>,
    long_press: Duration,
    presses: Arc<Mutex<Presses>>,
}

impl ButtonTracker {
    /// Create a tracker with the given long-press threshold.
    pub fn new(registry: Arc<KeyRegistry>, long_press: Duration) -> Self {
        Self {
            registry,
            long_press,
            presses: Arc::new(Mutex::new(Presses::default())),
        }
    }

    /// A key went down. Must be called within a Tokio runtime.
    pub fn key_down(&self, code: &str) {
        let mut presses = self.presses.lock();
        if presses.active.contains_key(code) {
            return;
        }
        let id = presses.next_id;
        presses.next_id += 1;

        let registry = Arc::clone(&self.registry);
        let shared = Arc::clone(&self.presses);
        let deadline = tokio::time::Instant::now() + self.long_press;
        let key = code.to_owned();
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            {
                let mut presses = shared.lock();
                match presses.active.get_mut(&key) {
                    Some(press) if press.id == id => press.long_fired = true,
                    _ => return,
                }
            }
            trace!(code = %key, "long press");
            let _ = registry.dispatch(&key, Some(EventMode::PressLong));
        })
        .abort_handle();

        let _ = presses.active.insert(
            code.to_owned(),
            Press {
                id,
                timer,
                long_fired: false,
            },
        );
    }

    /// A key went up.
    pub fn key_up(&self, code: &str) {
        let press = self.presses.lock().active.remove(code);
        let long_fired = match press {
            Some(press) => {
                press.timer.abort();
                press.long_fired
            }
            None => false,
        };
        if !long_fired {
            trace!(code, "short press");
            let _ = self.registry.dispatch(code, Some(EventMode::PressShort));
        }
    }

    /// A wheel moved. The dominant axis decides the direction.
    pub fn wheel(&self, delta_x: f64, delta_y: f64) {
        let dominant = if delta_x.abs() > delta_y.abs() {
            delta_x
        } else {
            delta_y
        };
        self.registry.rotate(if dominant > 0.0 { 1 } else { -1 });
    }
}

impl Drop for ButtonTracker {
    fn drop(&mut self) {
        for (_, press) in self.presses.lock().active.drain() {
            press.timer.abort();
        }
    }
}
