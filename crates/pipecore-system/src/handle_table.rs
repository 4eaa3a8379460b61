use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::error::{CoreError, Result};
use crate::handle::Handle;

/// Registry mapping handles to shared resources.
///
/// Slots live in an arena addressed by the handle's index and checked against
/// its generation. Freeing a slot bumps its generation and a slot whose
/// generation would wrap is retired, so no handle value is ever handed out
/// twice. The lock only guards slot bookkeeping and is never held while the
/// resource itself is used.
pub struct HandleTable<T> {
    slots: RwLock<Slots<T>>,
    max_handles: usize,
}

enum SlotState<T> {
    Vacant,
    Occupied(Arc<T>),
    /// Removed from the table but not yet released (handle transfer).
    Reserved,
}

struct Slot<T> {
    generation: u32,
    state: SlotState<T>,
}

struct Slots<T> {
    entries: Vec<Slot<T>>,
    free: Vec<u32>,
    /// Occupied plus reserved slots.
    live: usize,
}

/// Handles taken out of the table while a transfer is in flight.
///
/// Must be resolved with [`HandleTable::commit_transit`] (the handles die) or
/// [`HandleTable::abort_transit`] (the handles come back). A
/// [`HandleTable::drain`] in between releases the reserved handles for good.
#[must_use = "a transit must be committed or aborted"]
pub struct Transit<T> {
    handles: Vec<Handle>,
    values: Vec<Arc<T>>,
}

impl<T> Transit<T> {
    pub fn values(&self) -> &[Arc<T>] {
        &self.values
    }

    pub fn handles(&self) -> &[Handle] {
        &self.handles
    }

    /// Swap in the values the handles should resolve to if the transfer is
    /// aborted; commit hands back the same values.
    pub fn replace_values(&mut self, values: Vec<Arc<T>>) {
        debug_assert_eq!(values.len(), self.handles.len(), "one value per handle");
        self.values = values;
    }
}

impl<T> HandleTable<T> {
    pub fn new(max_handles: usize) -> Self {
        Self {
            slots: RwLock::new(Slots {
                entries: Vec::new(),
                free: Vec::new(),
                live: 0,
            }),
            max_handles,
        }
    }

    /// Register a resource and return its new handle.
    pub fn insert(&self, value: Arc<T>) -> Result<Handle> {
        let mut slots = self.slots.write();
        self.ensure_room(&slots, 1)?;
        Ok(slots.occupy(value))
    }

    /// Register both ends of a pipe; either both get handles or neither does.
    pub fn insert_pair(&self, first: Arc<T>, second: Arc<T>) -> Result<(Handle, Handle)> {
        let mut slots = self.slots.write();
        self.ensure_room(&slots, 2)?;
        Ok((slots.occupy(first), slots.occupy(second)))
    }

    /// Register every resource in `values`, all or nothing.
    pub fn insert_many(&self, values: &[Arc<T>]) -> Result<Vec<Handle>> {
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let mut slots = self.slots.write();
        self.ensure_room(&slots, values.len())?;
        Ok(values
            .iter()
            .map(|value| slots.occupy(Arc::clone(value)))
            .collect())
    }

    /// Look up a live handle.
    pub fn get(&self, handle: Handle) -> Result<Arc<T>> {
        let slots = self.slots.read();
        match slots.slot(handle).map(|slot| &slot.state) {
            Some(SlotState::Occupied(value)) => Ok(Arc::clone(value)),
            _ => Err(CoreError::InvalidHandle(handle)),
        }
    }

    /// Unregister a handle and hand back its resource.
    pub fn remove(&self, handle: Handle) -> Result<Arc<T>> {
        let mut slots = self.slots.write();
        let value = match slots.slot_mut(handle) {
            Some(slot) => match std::mem::replace(&mut slot.state, SlotState::Vacant) {
                SlotState::Occupied(value) => value,
                other => {
                    slot.state = other;
                    return Err(CoreError::InvalidHandle(handle));
                }
            },
            None => return Err(CoreError::InvalidHandle(handle)),
        };
        slots.release(handle.index());
        trace!(%handle, "handle removed");
        Ok(value)
    }

    /// Take a set of handles out of the table for transfer.
    ///
    /// Fails without touching the table if any handle is unknown or listed
    /// twice. While in transit the handles resolve as invalid.
    pub fn begin_transit(&self, handles: &[Handle]) -> Result<Transit<T>> {
        let mut slots = self.slots.write();

        let mut seen = HashSet::with_capacity(handles.len());
        for &handle in handles {
            if !seen.insert(handle) {
                return Err(CoreError::invalid_argument(format!(
                    "handle {handle} attached more than once"
                )));
            }
            if !matches!(
                slots.slot(handle).map(|slot| &slot.state),
                Some(SlotState::Occupied(_))
            ) {
                return Err(CoreError::InvalidHandle(handle));
            }
        }

        let values = handles
            .iter()
            .filter_map(|&handle| {
                let slot = slots.slot_mut(handle)?;
                match std::mem::replace(&mut slot.state, SlotState::Reserved) {
                    SlotState::Occupied(value) => Some(value),
                    _ => None,
                }
            })
            .collect();

        Ok(Transit {
            handles: handles.to_vec(),
            values,
        })
    }

    /// Finish a transfer: the reserved handles are released for good.
    pub fn commit_transit(&self, transit: Transit<T>) -> Vec<Arc<T>> {
        let mut slots = self.slots.write();
        for handle in &transit.handles {
            if slots.take_reserved(*handle) {
                slots.release(handle.index());
            }
        }
        transit.values
    }

    /// Cancel a transfer: every handle becomes valid again with its value.
    ///
    /// Returns the values whose handles were drained in the meantime; the
    /// caller owns them and nothing else will close them.
    #[must_use = "orphaned values must be closed"]
    pub fn abort_transit(&self, transit: Transit<T>) -> Vec<Arc<T>> {
        let mut slots = self.slots.write();
        let mut orphans = Vec::new();
        for (handle, value) in transit.handles.into_iter().zip(transit.values) {
            match slots.slot_mut(handle) {
                Some(slot) if matches!(slot.state, SlotState::Reserved) => {
                    slot.state = SlotState::Occupied(value);
                }
                _ => orphans.push(value),
            }
        }
        orphans
    }

    /// Number of live handles (including ones in transit).
    pub fn len(&self) -> usize {
        self.slots.read().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain every live resource, leaving the table empty.
    ///
    /// Handles in transit are released too; their values stay with the
    /// transit's owner.
    pub fn drain(&self) -> Vec<Arc<T>> {
        let mut slots = self.slots.write();
        let mut drained = Vec::new();
        for index in 0..slots.entries.len() {
            match std::mem::replace(&mut slots.entries[index].state, SlotState::Vacant) {
                SlotState::Occupied(value) => drained.push(value),
                SlotState::Reserved => {}
                SlotState::Vacant => continue,
            }
            slots.release(index);
        }
        drained
    }

    fn ensure_room(&self, slots: &Slots<T>, extra: usize) -> Result<()> {
        if slots.live + extra > self.max_handles {
            return Err(CoreError::HandleTableFull {
                max: self.max_handles,
            });
        }
        // Every index must stay representable in a handle.
        if slots.free.len() < extra
            && slots.entries.len() + (extra - slots.free.len()) > u32::MAX as usize
        {
            return Err(CoreError::HandleTableFull {
                max: u32::MAX as usize,
            });
        }
        Ok(())
    }
}

impl<T> Slots<T> {
    fn slot(&self, handle: Handle) -> Option<&Slot<T>> {
        self.entries
            .get(handle.index())
            .filter(|slot| slot.generation == handle.generation())
    }

    fn slot_mut(&mut self, handle: Handle) -> Option<&mut Slot<T>> {
        self.entries
            .get_mut(handle.index())
            .filter(|slot| slot.generation == handle.generation())
    }

    /// Vacate `handle`'s slot if it is still reserved for it.
    fn take_reserved(&mut self, handle: Handle) -> bool {
        match self.slot_mut(handle) {
            Some(slot) if matches!(slot.state, SlotState::Reserved) => {
                slot.state = SlotState::Vacant;
                true
            }
            _ => false,
        }
    }

    fn occupy(&mut self, value: Arc<T>) -> Handle {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.entries.push(Slot {
                    generation: 0,
                    state: SlotState::Vacant,
                });
                (self.entries.len() - 1) as u32
            }
        };
        let slot = &mut self.entries[index as usize];
        slot.state = SlotState::Occupied(value);
        self.live += 1;
        Handle::from_parts(index, slot.generation)
    }

    /// Bump the slot's generation and make it reusable, or retire it when the
    /// generation is exhausted.
    fn release(&mut self, index: usize) {
        self.live -= 1;
        let slot = &mut self.entries[index];
        if let Some(next) = slot.generation.checked_add(1) {
            slot.generation = next;
            self.free.push(index as u32);
        }
    }
}

impl<T> std::fmt::Debug for HandleTable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleTable")
            .field("live", &self.len())
            .field("max_handles", &self.max_handles)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn table(max: usize) -> HandleTable<&'static str> {
        HandleTable::new(max)
    }

    #[test]
    fn insert_get_remove() {
        let table = table(8);
        let handle = table.insert(Arc::new("a")).unwrap();
        assert_eq!(*table.get(handle).unwrap(), "a");
        assert_eq!(table.len(), 1);

        assert_eq!(*table.remove(handle).unwrap(), "a");
        assert!(table.is_empty());
        assert!(matches!(table.get(handle), Err(CoreError::InvalidHandle(_))));
        assert!(matches!(
            table.remove(handle),
            Err(CoreError::InvalidHandle(_))
        ));
    }

    #[test]
    fn reused_slot_gets_a_new_value() {
        let table = table(8);
        let first = table.insert(Arc::new("a")).unwrap();
        table.remove(first).unwrap();
        let second = table.insert(Arc::new("b")).unwrap();

        assert_eq!(first.index(), second.index());
        assert_ne!(first, second);
        assert!(table.get(first).is_err());
        assert_eq!(*table.get(second).unwrap(), "b");
    }

    #[test]
    fn capacity_is_enforced() {
        let table = table(2);
        table.insert(Arc::new("a")).unwrap();
        assert!(matches!(
            table.insert_pair(Arc::new("b"), Arc::new("c")),
            Err(CoreError::HandleTableFull { max: 2 })
        ));
        assert_eq!(table.len(), 1);
        table.insert(Arc::new("b")).unwrap();
        assert!(table.insert_many(&[Arc::new("c")]).is_err());
    }

    #[test]
    fn transit_commit_invalidates_handles() {
        let table = table(8);
        let a = table.insert(Arc::new("a")).unwrap();
        let b = table.insert(Arc::new("b")).unwrap();

        let transit = table.begin_transit(&[b, a]).unwrap();
        assert_eq!(transit.values().len(), 2);
        assert!(table.get(a).is_err());
        assert_eq!(table.len(), 2);

        let values = table.commit_transit(transit);
        assert_eq!(*values[0], "b");
        assert_eq!(*values[1], "a");
        assert!(table.is_empty());

        let fresh = table.insert_many(&values).unwrap();
        assert_eq!(fresh.len(), 2);
        assert!(!fresh.contains(&a) && !fresh.contains(&b));
    }

    #[test]
    fn transit_abort_restores_same_values() {
        let table = table(8);
        let a = table.insert(Arc::new("a")).unwrap();

        let transit = table.begin_transit(&[a]).unwrap();
        // A reserved slot is not handed out again.
        let other = table.insert(Arc::new("x")).unwrap();
        assert_ne!(other.index(), a.index());

        assert!(table.abort_transit(transit).is_empty());
        assert_eq!(*table.get(a).unwrap(), "a");
    }

    #[test]
    fn transit_abort_after_drain_returns_orphans() {
        let table = table(8);
        let a = table.insert(Arc::new("a")).unwrap();
        let b = table.insert(Arc::new("b")).unwrap();

        let mut transit = table.begin_transit(&[a]).unwrap();
        transit.replace_values(vec![Arc::new("a2")]);
        let drained = table.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(*drained[0], "b");
        assert!(table.is_empty());

        let orphans = table.abort_transit(transit);
        assert_eq!(orphans.len(), 1);
        assert_eq!(*orphans[0], "a2");
        assert!(table.get(a).is_err());
        assert!(table.get(b).is_err());
        assert!(table.is_empty());

        // The drained slot is reusable under a new handle.
        let fresh = table.insert(Arc::new("c")).unwrap();
        assert_ne!(fresh, a);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn transit_commit_after_drain_keeps_count() {
        let table = table(8);
        let a = table.insert(Arc::new("a")).unwrap();
        let transit = table.begin_transit(&[a]).unwrap();
        assert!(table.drain().is_empty());
        assert!(table.is_empty());

        // The slot may already belong to someone else.
        let reused = table.insert(Arc::new("x")).unwrap();
        assert_eq!(reused.index(), a.index());

        let values = table.commit_transit(transit);
        assert_eq!(*values[0], "a");
        assert_eq!(table.len(), 1);
        assert_eq!(*table.get(reused).unwrap(), "x");
    }

    #[test]
    fn transit_rejects_duplicates_and_unknown_handles() {
        let table = table(8);
        let a = table.insert(Arc::new("a")).unwrap();
        let gone = table.insert(Arc::new("gone")).unwrap();
        table.remove(gone).unwrap();

        assert!(matches!(
            table.begin_transit(&[a, a]),
            Err(CoreError::InvalidArgument(_))
        ));
        assert!(matches!(
            table.begin_transit(&[a, gone]),
            Err(CoreError::InvalidHandle(h)) if h == gone
        ));
        // Table untouched by the failed attempts.
        assert!(table.get(a).is_ok());
    }

    #[test]
    fn exhausted_generation_retires_slot() {
        let table = table(8);
        let first = table.insert(Arc::new("a")).unwrap();
        {
            let mut slots = table.slots.write();
            slots.entries[first.index()].generation = u32::MAX;
        }
        let last = Handle::from_parts(first.index() as u32, u32::MAX);
        table.remove(last).unwrap();

        let next = table.insert(Arc::new("b")).unwrap();
        assert_ne!(next.index(), first.index());
    }

    #[test]
    fn drain_empties_table() {
        let table = table(8);
        table.insert(Arc::new("a")).unwrap();
        table.insert(Arc::new("b")).unwrap();
        assert_eq!(table.drain().len(), 2);
        assert!(table.is_empty());
    }

    #[test]
    fn concurrent_inserts_yield_unique_handles() {
        let table = Arc::new(table(10_000));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    (0..500)
                        .map(|_| {
                            let handle = table.insert(Arc::new("x")).unwrap();
                            if handle.into_raw() % 2 == 0 {
                                table.remove(handle).unwrap();
                            }
                            handle
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = HashSet::new();
        for worker in workers {
            for handle in worker.join().unwrap() {
                assert!(all.insert(handle), "handle {handle} issued twice");
            }
        }
    }
}
