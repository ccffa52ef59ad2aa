//! Fan-out of decoded frames to subscribers.
//!
//! The registry hands out opaque handles. Removal during an in-flight
//! dispatch never mutates the live registry: the subscriber is marked
//! deleted and reaped once the dispatch-busy counter drops to zero.
//! Handlers may re-enter the dispatcher (dispatch, subscribe, unsubscribe)
//! freely.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::types::RawFrame;

pub type Handle = u64;

type FrameHandler = Rc<dyn Fn(&[RawFrame])>;

struct Client {
    handler: FrameHandler,
    deleted: bool,
}

/// Subscriber registry with deferred deletion.
pub struct MessageDispatch {
    clients: RefCell<BTreeMap<Handle, Client>>,
    next_handle: Cell<Handle>,
    busy: Cell<u32>,
}

impl MessageDispatch {
    pub fn new() -> MessageDispatch {
        MessageDispatch {
            clients: RefCell::new(BTreeMap::new()),
            next_handle: Cell::new(0),
            busy: Cell::new(0),
        }
    }

    /// Register a subscriber. Takes effect from the next dispatch.
    pub fn add_client<F>(&self, handler: F) -> Handle
    where
        F: Fn(&[RawFrame]) + 'static,
    {
        let handle = self.next_handle.get();
        self.next_handle.set(handle + 1);
        self.clients.borrow_mut().insert(
            handle,
            Client {
                handler: Rc::new(handler),
                deleted: false,
            },
        );
        handle
    }

    /// Unregister a subscriber. Safe to call from inside a dispatch; the
    /// entry is only reaped once no dispatch is in flight.
    pub fn remove_client(&self, handle: Handle) {
        {
            let mut clients = self.clients.borrow_mut();
            match clients.get_mut(&handle) {
                Some(client) => client.deleted = true,
                None => return,
            }
        }
        self.purge_dead_clients();
    }

    /// Deliver a batch of frames to every live subscriber, in handle
    /// order.
    pub fn dispatch(&self, frames: &[RawFrame]) {
        self.busy.set(self.busy.get() + 1);

        // snapshot the handler list so subscribers can touch the registry
        // re-entrantly while we iterate
        let snapshot: Vec<(Handle, FrameHandler)> = self
            .clients
            .borrow()
            .iter()
            .filter(|(_, c)| !c.deleted)
            .map(|(h, c)| (*h, Rc::clone(&c.handler)))
            .collect();

        for (handle, handler) in snapshot {
            let live = self
                .clients
                .borrow()
                .get(&handle)
                .map_or(false, |c| !c.deleted);
            if live {
                handler(frames);
            }
        }

        self.busy.set(self.busy.get() - 1);
        self.purge_dead_clients();
    }

    pub fn client_count(&self) -> usize {
        self.clients.borrow().len()
    }

    fn purge_dead_clients(&self) {
        if self.busy.get() != 0 {
            return;
        }
        self.clients.borrow_mut().retain(|_, c| !c.deleted);
    }
}

impl Default for MessageDispatch {
    fn default() -> Self {
        MessageDispatch::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
