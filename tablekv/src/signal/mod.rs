//! Named signals passed between live hubs in the process.
//!
//! A hub is addressed by its object name. [`SignalHub::emit`] queues a
//! [`Signal`] on every matching hub, the emitter included, and each hub
//! hands its queue to observers when its owner calls
//! [`SignalHub::process_signals`].

use crate::registry::{InstanceId, SlotRegistry};
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{Arc, LazyLock};

static HUBS: LazyLock<Mutex<SlotRegistry<HubEntry>>> =
    LazyLock::new(|| Mutex::new(SlotRegistry::new()));

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    pub name: String,
    pub data: serde_json::Map<String, serde_json::Value>,
}

struct HubEntry {
    object_name: String,
    inbox: Sender<Signal>,
}

type Observer = dyn Fn(&Signal) + Send + Sync;

pub struct SignalHub {
    id: InstanceId,
    inbox: Receiver<Signal>,
    observers: Mutex<Vec<Arc<Observer>>>,
}

impl SignalHub {
    pub fn new(object_name: impl Into<String>) -> Self {
        let (tx, rx) = unbounded();
        let id = HUBS.lock().insert(HubEntry {
            object_name: object_name.into(),
            inbox: tx,
        });
        SignalHub {
            id,
            inbox: rx,
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn object_name(&self) -> String {
        HUBS.lock()
            .get(self.id)
            .map(|entry| entry.object_name.clone())
            .unwrap_or_default()
    }

    pub fn set_object_name(&self, name: impl Into<String>) {
        if let Some(entry) = HUBS.lock().get_mut(self.id) {
            entry.object_name = name.into();
        }
    }

    /// Queue `signal_name` on every live hub, or only on hubs named `target`
    /// when one is given. An empty target counts as none. Returns the number
    /// of hubs the signal was queued on.
    pub fn emit(
        &self,
        signal_name: &str,
        target: Option<&str>,
        data: serde_json::Map<String, serde_json::Value>,
    ) -> usize {
        let target = target.filter(|t| !t.is_empty());
        let signal = Signal {
            name: signal_name.to_string(),
            data,
        };

        let hubs = HUBS.lock();
        let mut queued = 0;
        for (_, entry) in hubs.iter() {
            if target.is_some_and(|t| t != entry.object_name) {
                continue;
            }
            if entry.inbox.send(signal.clone()).is_ok() {
                queued += 1;
            }
        }
        log::debug!("Signal '{signal_name}' queued on {queued} hub(s)");
        queued
    }

    pub fn on_signal<F>(&self, observer: F)
    where
        F: Fn(&Signal) + Send + Sync + 'static,
    {
        self.observers.lock().push(Arc::new(observer));
    }

    /// Deliver queued signals to observers in arrival order. Returns the
    /// number delivered.
    pub fn process_signals(&self) -> usize {
        let mut delivered = 0;
        while let Ok(signal) = self.inbox.try_recv() {
            let observers: Vec<Arc<Observer>> = self.observers.lock().clone();
            for observer in &observers {
                observer(&signal);
            }
            delivered += 1;
        }
        delivered
    }

    pub fn pending_signals(&self) -> usize {
        self.inbox.len()
    }
}

impl Drop for SignalHub {
    fn drop(&mut self) {
        HUBS.lock().remove(self.id);
    }
}
