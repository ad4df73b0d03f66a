//! The surface the climate layer orchestration talks to: a map that owns named layers and
//! publishes pointer movements.

use log::debug;

use crate::MapError;
use crate::layers::{Layer, LayerStack};
use crate::projection::GeoPos;

/// Handle returned by [`MapHost::on_pointer_move`], used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Callback invoked with the geographical position under the pointer and the map's layers.
/// The position is `None` once the pointer has left the map.
pub type PointerMoveHandler = Box<dyn FnMut(Option<GeoPos>, &LayerStack)>;

/// A map that layers can be attached to.
///
/// `remove_layer` reports [`MapError::LayerNotFound`] when there is nothing to remove. Callers
/// doing cleanup treat that as a no-op rather than a failure.
pub trait MapHost {
    /// Attaches `layer` as `id`, beneath the layer `before` when that layer exists, on top
    /// otherwise.
    fn add_layer_before(
        &mut self,
        id: &str,
        layer: Box<dyn Layer>,
        before: Option<&str>,
    ) -> Result<(), MapError>;

    /// Detaches the layer `id`.
    fn remove_layer(&mut self, id: &str) -> Result<Box<dyn Layer>, MapError>;

    /// The layer `id`, mutably.
    fn layer_dyn_mut(&mut self, id: &str) -> Option<&mut dyn Layer>;

    /// Whether a layer `id` is attached.
    fn has_layer(&self, id: &str) -> bool;

    /// Registers a pointer-move handler.
    fn on_pointer_move(&mut self, handler: PointerMoveHandler) -> SubscriptionId;

    /// Drops a pointer-move handler. Returns `false` if it was not registered.
    fn unsubscribe(&mut self, subscription: SubscriptionId) -> bool;

    /// Number of live pointer-move handlers.
    fn subscription_count(&self) -> usize;
}

/// Registered pointer-move handlers.
#[derive(Default)]
pub struct PointerSubscriptions {
    next_id: u64,
    handlers: Vec<(SubscriptionId, PointerMoveHandler)>,
}

impl PointerSubscriptions {
    /// No handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler`.
    pub fn subscribe(&mut self, handler: PointerMoveHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.handlers.push((id, handler));
        debug!("Pointer subscription {:?} registered", id);
        id
    }

    /// Removes a handler.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(key, _)| *key != id);
        self.handlers.len() != before
    }

    /// Number of handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Calls every handler with `pos`.
    pub fn dispatch(&mut self, pos: Option<GeoPos>, layers: &LayerStack) {
        for (_, handler) in self.handlers.iter_mut() {
            handler(pos, layers);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn dispatch_reaches_only_live_handlers() {
        let calls = Rc::new(Cell::new(0));
        let mut subscriptions = PointerSubscriptions::new();

        let counter = calls.clone();
        let first = subscriptions.subscribe(Box::new(move |_, _| counter.set(counter.get() + 1)));
        let counter = calls.clone();
        subscriptions.subscribe(Box::new(move |_, _| counter.set(counter.get() + 10)));
        assert_eq!(subscriptions.len(), 2);

        subscriptions.dispatch(Some(GeoPos::default()), &LayerStack::new());
        assert_eq!(calls.get(), 11);

        assert!(subscriptions.unsubscribe(first));
        assert!(!subscriptions.unsubscribe(first));
        subscriptions.dispatch(None, &LayerStack::new());
        assert_eq!(calls.get(), 21);
    }

    #[test]
    fn ids_are_not_reused() {
        let mut subscriptions = PointerSubscriptions::new();
        let a = subscriptions.subscribe(Box::new(|_, _| {}));
        subscriptions.unsubscribe(a);
        let b = subscriptions.subscribe(Box::new(|_, _| {}));
        assert_ne!(a, b);
        assert_eq!(subscriptions.len(), 1);
    }
}
