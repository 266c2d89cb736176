//! Change subscriptions.
//!
//! Listeners are plain closures dispatched synchronously, in registration
//! order, from inside the committing update. There is no queue: by the time
//! an update call returns, every listener has seen its changes.

use tracing::debug;

use vault_models::{Change, Path};

/// Handle identifying a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A change listener.
pub type Listener = Box<dyn FnMut(&[Change]) + Send>;

struct Subscription {
    id: SubscriptionId,
    /// `None` subscribes to the whole tree.
    scope: Option<Path>,
    listener: Listener,
}

/// Registered listeners plus dispatch.
#[derive(Default)]
pub(crate) struct SubscriberSet {
    next_id: u64,
    subscriptions: Vec<Subscription>,
}

impl SubscriberSet {
    pub(crate) fn subscribe(&mut self, listener: Listener, scope: Option<Path>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscriptions.push(Subscription {
            id,
            scope,
            listener,
        });
        debug!(id = %id, "listener subscribed");
        id
    }

    pub(crate) fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        before != self.subscriptions.len()
    }

    /// Dispatches changes to every listener whose scope overlaps at least
    /// one change path. Scoped listeners receive only their relevant subset.
    pub(crate) fn notify(&mut self, changes: &[Change]) {
        if changes.is_empty() {
            return;
        }

        for subscription in &mut self.subscriptions {
            match &subscription.scope {
                None => (subscription.listener)(changes),
                Some(scope) => {
                    let relevant: Vec<Change> = changes
                        .iter()
                        .filter(|change| change.path.overlaps(scope))
                        .cloned()
                        .collect();
                    if !relevant.is_empty() {
                        (subscription.listener)(&relevant);
                    }
                }
            }
        }
    }
}
