//! Event type → callbacks registry.

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, warn};

use crate::error::{NotifierError, Result};
use crate::event::Event;

/// A registered listener. Returning an error tears down the whole listener.
pub type Callback = Box<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// Ordered callbacks per event type, plus callbacks fired for every event.
#[derive(Default)]
pub struct ListenerTable {
    by_type: HashMap<String, Vec<Callback>>,
    global: Vec<Callback>,
}

impl ListenerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `callback` to the listeners of `event_type`. No de-duplication.
    pub fn register<F>(&mut self, event_type: impl Into<String>, callback: F)
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.by_type
            .entry(event_type.into())
            .or_default()
            .push(Box::new(callback));
    }

    /// Append `callback` to the listeners fired for every typed event.
    pub fn register_all<F>(&mut self, callback: F)
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.global.push(Box::new(callback));
    }

    /// Invoke the per-type listeners of `event`, then the global ones.
    ///
    /// Events without a string `type` are logged and dropped. Returns the
    /// number of callbacks invoked. The first failing callback aborts the
    /// dispatch of this event.
    pub fn dispatch(&self, event: &Event) -> Result<usize> {
        let Some(event_type) = event.event_type() else {
            warn!("ignoring event: missing field \"type\"");
            debug!(payload = %event, "dropped event");
            return Ok(0);
        };

        let typed = self.by_type.get(event_type).map(Vec::as_slice).unwrap_or_default();
        let mut invoked = 0;
        for callback in typed.iter().chain(self.global.iter()) {
            callback(event).map_err(|source| NotifierError::Callback {
                event_type: event_type.to_string(),
                source,
            })?;
            invoked += 1;
        }
        Ok(invoked)
    }

    /// Total number of registered callbacks.
    pub fn len(&self) -> usize {
        self.by_type.values().map(Vec::len).sum::<usize>() + self.global.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ListenerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let typed: HashMap<&str, usize> = self
            .by_type
            .iter()
            .map(|(kind, callbacks)| (kind.as_str(), callbacks.len()))
            .collect();
        f.debug_struct("ListenerTable")
            .field("by_type", &typed)
            .field("global", &self.global.len())
            .finish()
    }
}
