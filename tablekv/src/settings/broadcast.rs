use super::value::SettingValue;
use crate::registry::{InstanceId, SlotRegistry};
use crossbeam::channel::Sender;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::LazyLock;

static GLOBAL: LazyLock<Broadcaster> = LazyLock::new(Broadcaster::new);

/// Identifies one logical settings store: absolute database path plus table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreTarget {
    pub path: PathBuf,
    pub table: String,
}

/// A setting went from `old` to `new`. `old` is `Invalid` for a key that
/// did not exist before.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingChange {
    pub key: String,
    pub old: SettingValue,
    pub new: SettingValue,
}

struct Subscriber {
    target: StoreTarget,
    inbox: Sender<SettingChange>,
}

/// Registry of live settings stores and fan-out of their changes.
///
/// Publishing only enqueues: each store drains its own inbox when its owner
/// calls [`SettingsStore::process_events`](super::SettingsStore::process_events),
/// so a writer never runs another store's observers. Changes reach a store
/// in the order they were published.
pub struct Broadcaster {
    instances: Mutex<SlotRegistry<Subscriber>>,
}

impl Broadcaster {
    fn new() -> Self {
        Broadcaster {
            instances: Mutex::new(SlotRegistry::new()),
        }
    }

    pub fn global() -> &'static Broadcaster {
        &GLOBAL
    }

    pub(crate) fn register(&self, target: StoreTarget, inbox: Sender<SettingChange>) -> InstanceId {
        self.instances.lock().insert(Subscriber { target, inbox })
    }

    pub(crate) fn unregister(&self, id: InstanceId) -> bool {
        self.instances.lock().remove(id).is_some()
    }

    pub(crate) fn retarget(&self, id: InstanceId, target: StoreTarget) -> bool {
        match self.instances.lock().get_mut(id) {
            Some(subscriber) => {
                subscriber.target = target;
                true
            }
            None => false,
        }
    }

    pub fn is_live(&self, id: InstanceId) -> bool {
        self.instances.lock().contains(id)
    }

    /// Number of live stores across all targets.
    pub fn live_instances(&self) -> usize {
        self.instances.lock().len()
    }

    /// Queue `change` for every live store bound to `target`, the publisher
    /// included. Returns how many stores it was queued for.
    pub fn publish(&self, target: &StoreTarget, change: &SettingChange) -> usize {
        let instances = self.instances.lock();
        let mut delivered = 0;
        for (id, subscriber) in instances.iter() {
            if &subscriber.target != target {
                continue;
            }
            if subscriber.inbox.send(change.clone()).is_ok() {
                delivered += 1;
            } else {
                log::warn!("Settings instance {id} has no inbox; change to '{}' dropped", change.key);
            }
        }
        delivered
    }
}
