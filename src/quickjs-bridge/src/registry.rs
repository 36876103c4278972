use std::sync::{Arc, Weak};

use hashbrown::HashMap;

/// Identifier of a retained callable; script functions carry it as their dispatch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallableId(u16);

impl CallableId {
    /// The raw slot number.
    pub fn get(self) -> u16 {
        self.0
    }
}

/// Maximum number of callables one engine can retain at once.
pub(crate) const CALLABLE_SLOTS: usize = u16::MAX as usize;

pub(crate) struct Entry<C> {
    pub(crate) name: String,
    pub(crate) callable: Arc<C>,
}

impl<C> Entry<C> {
    /// Whether `ticket` was issued for this entry and not for an earlier holder of its id.
    pub(crate) fn is(&self, ticket: &Weak<C>) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.callable), ticket.as_ptr())
    }
}

/// The table keeping host callables alive while script functions refer to them.
pub(crate) struct Registry<C> {
    entries: HashMap<u16, Entry<C>>,
    next: u16,
}

impl<C> Registry<C> {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next: 0,
        }
    }

    /// Store `callable` under the next free id, or `None` when every slot is taken.
    pub(crate) fn insert(&mut self, name: String, callable: C) -> Option<CallableId> {
        if self.entries.len() >= CALLABLE_SLOTS {
            return None;
        }
        // u16::MAX is never handed out so a full table is exactly CALLABLE_SLOTS entries
        let mut id = self.next;
        while self.entries.contains_key(&id) {
            id = if id == u16::MAX - 1 { 0 } else { id + 1 };
        }
        self.next = if id == u16::MAX - 1 { 0 } else { id + 1 };
        self.entries.insert(
            id,
            Entry {
                name,
                callable: Arc::new(callable),
            },
        );
        Some(CallableId(id))
    }

    pub(crate) fn get(&self, id: CallableId) -> Option<&Entry<C>> {
        self.entries.get(&id.0)
    }

    pub(crate) fn remove(&mut self, id: CallableId) -> Option<Entry<C>> {
        self.entries.remove(&id.0)
    }

    pub(crate) fn drain(&mut self) -> Vec<Entry<C>> {
        self.entries.drain().map(|(_, entry)| entry).collect()
    }

    pub(crate) fn callables(&self) -> impl Iterator<Item = &C> {
        self.entries.values().map(|entry| entry.callable.as_ref())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
