//! Typed change notifications for host panels.
//!
//! Listeners are registered on an [`EventBus`] and stay registered for as long
//! as the returned [`Subscription`] is alive. Every event is emitted after the
//! state change it describes, so a listener that goes back to the viewer sees
//! the new state.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ViewerEvent {
    #[serde(rename_all = "camelCase")]
    ActiveModelChanged {
        index: Option<usize>,
        previous_index: Option<usize>,
    },
    #[serde(rename_all = "camelCase")]
    ModelListChanged { count: usize },
    #[serde(rename_all = "camelCase")]
    VisibilityChanged { index: usize, visible: bool },
    #[serde(rename_all = "camelCase")]
    TransformChanged {
        index: usize,
        position: [f32; 3],
        rotation_deg: [f32; 3],
        scale: [f32; 3],
    },
}

type Listener = Rc<RefCell<dyn FnMut(&ViewerEvent)>>;

#[derive(Default)]
struct BusState {
    next_id: u64,
    listeners: Vec<(u64, Listener)>,
}

/// Single-threaded observer list shared by the registry, gizmo and viewer.
#[derive(Clone, Default)]
pub struct EventBus {
    state: Rc<RefCell<BusState>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: FnMut(&ViewerEvent) + 'static,
    {
        let mut state = self.state.borrow_mut();
        let id = state.next_id;
        state.next_id += 1;
        let listener: Listener = Rc::new(RefCell::new(listener));
        state.listeners.push((id, listener));
        Subscription {
            id,
            state: Rc::downgrade(&self.state),
        }
    }

    pub fn emit(&self, event: ViewerEvent) {
        // Snapshot first so listeners may subscribe or unsubscribe while running.
        let listeners: Vec<Listener> = self
            .state
            .borrow()
            .listeners
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        log::debug!("event {:?} -> {} listener(s)", event, listeners.len());
        for listener in listeners {
            match listener.try_borrow_mut() {
                Ok(mut callback) => (&mut *callback)(&event),
                Err(_) => log::warn!("skipping re-entrant delivery of {:?}", event),
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.state.borrow().listeners.len()
    }
}

/// Handle returned by [`EventBus::subscribe`]. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    state: Weak<RefCell<BusState>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            if let Ok(mut state) = state.try_borrow_mut() {
                state.listeners.retain(|(id, _)| *id != self.id);
            }
        }
    }
}
