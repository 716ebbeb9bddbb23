//! Slot storage with stable handles and explicit in-use counts.
//!
//! Calibration products are shared by handle. Every spectrum that refers to
//! a slot acquires it, and slots are only freed by [`Arena::compact`] (or an
//! explicit [`Arena::remove`]) once nothing uses them and they are no longer
//! retained by their creator. Freed slots are never reused, so a handle held
//! elsewhere can never silently point at a different object.

use crate::domain::{ArfId, RmfId, SpectrumId, XrespError, XrespResult};
use std::fmt::Display;
use std::marker::PhantomData;

pub trait ArenaId: Copy + Display {
    fn from_index(index: usize) -> Self;
    fn index(self) -> usize;
}

macro_rules! arena_id {
    ($($id:ty),*) => {
        $(
            impl ArenaId for $id {
                fn from_index(index: usize) -> Self {
                    Self(index)
                }

                fn index(self) -> usize {
                    self.0
                }
            }
        )*
    };
}

arena_id!(ArfId, RmfId, SpectrumId);

#[derive(Debug)]
struct Slot<T> {
    value: T,
    in_use: usize,
    retained: bool,
}

#[derive(Debug)]
pub struct Arena<I, T> {
    slots: Vec<Option<Slot<T>>>,
    marker: PhantomData<I>,
}

impl<I, T> Default for Arena<I, T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            marker: PhantomData,
        }
    }
}

impl<I: ArenaId, T> Arena<I, T> {
    /// Stores `value`; a retained slot survives compaction while unused.
    pub fn insert(&mut self, value: T, retained: bool) -> I {
        self.slots.push(Some(Slot {
            value,
            in_use: 0,
            retained,
        }));
        I::from_index(self.slots.len() - 1)
    }

    pub fn get(&self, id: I) -> XrespResult<&T> {
        self.slot(id).map(|slot| &slot.value)
    }

    pub fn get_mut(&mut self, id: I) -> XrespResult<&mut T> {
        self.slot_mut(id).map(|slot| &mut slot.value)
    }

    pub fn contains(&self, id: I) -> bool {
        self.slot(id).is_ok()
    }

    pub fn in_use(&self, id: I) -> XrespResult<usize> {
        self.slot(id).map(|slot| slot.in_use)
    }

    pub fn acquire(&mut self, id: I) -> XrespResult<()> {
        self.slot_mut(id)?.in_use += 1;
        Ok(())
    }

    pub fn release(&mut self, id: I) -> XrespResult<()> {
        let slot = self.slot_mut(id)?;
        if slot.in_use == 0 {
            return Err(XrespError::internal(
                "ARENA.RELEASE",
                format!("{id} released more often than acquired"),
            ));
        }
        slot.in_use -= 1;
        Ok(())
    }

    pub fn set_retained(&mut self, id: I, retained: bool) -> XrespResult<()> {
        self.slot_mut(id)?.retained = retained;
        Ok(())
    }

    /// Frees `id` now; fails while anything still uses it.
    pub fn remove(&mut self, id: I) -> XrespResult<T> {
        let in_use = self.in_use(id)?;
        if in_use > 0 {
            return Err(XrespError::shared_in_use(
                "ARENA.REMOVE_IN_USE",
                format!("{id} is still used by {in_use} reference(s)"),
            ));
        }
        self.slots[id.index()]
            .take()
            .map(|slot| slot.value)
            .ok_or_else(|| missing(id))
    }

    /// Frees every unused, unretained slot and returns how many were freed.
    pub fn compact(&mut self) -> usize {
        let mut freed = 0;
        for entry in &mut self.slots {
            if entry
                .as_ref()
                .is_some_and(|slot| slot.in_use == 0 && !slot.retained)
            {
                *entry = None;
                freed += 1;
            }
        }
        freed
    }

    /// Live entries in handle order.
    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, entry)| {
            entry
                .as_ref()
                .map(|slot| (I::from_index(index), &slot.value))
        })
    }

    pub fn ids(&self) -> Vec<I> {
        self.iter().map(|(id, _)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|entry| entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, id: I) -> XrespResult<&Slot<T>> {
        self.slots
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| missing(id))
    }

    fn slot_mut(&mut self, id: I) -> XrespResult<&mut Slot<T>> {
        self.slots
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| missing(id))
    }
}

fn missing(id: impl Display) -> XrespError {
    XrespError::input_validation("ARENA.UNKNOWN_ID", format!("{id} does not exist"))
}

#[cfg(test)]
mod tests {
    use super::Arena;
    use crate::domain::{ArfId, XrespErrorCategory};

    #[test]
    fn handles_stay_stable_after_removal() {
        let mut arena: Arena<ArfId, &str> = Arena::default();
        let first = arena.insert("first", true);
        let second = arena.insert("second", true);
        assert_eq!(arena.remove(first).unwrap(), "first");
        let third = arena.insert("third", true);
        assert_eq!(third, ArfId(2));
        assert_eq!(*arena.get(second).unwrap(), "second");
        assert!(arena.get(first).is_err());
        assert_eq!(arena.ids(), vec![second, third]);
    }

    #[test]
    fn in_use_slots_cannot_be_removed() {
        let mut arena: Arena<ArfId, u8> = Arena::default();
        let id = arena.insert(1, true);
        arena.acquire(id).unwrap();
        arena.acquire(id).unwrap();
        assert_eq!(arena.in_use(id).unwrap(), 2);
        let error = arena.remove(id).unwrap_err();
        assert_eq!(error.category(), XrespErrorCategory::SharedResourceInUse);
        arena.release(id).unwrap();
        arena.release(id).unwrap();
        assert!(arena.release(id).is_err());
        assert_eq!(arena.remove(id).unwrap(), 1);
    }

    #[test]
    fn compaction_frees_only_unused_unretained_slots() {
        let mut arena: Arena<ArfId, u8> = Arena::default();
        let kept = arena.insert(1, true);
        let shared = arena.insert(2, false);
        let orphan = arena.insert(3, false);
        arena.acquire(shared).unwrap();

        assert_eq!(arena.compact(), 1);
        assert!(!arena.contains(orphan));
        assert!(arena.contains(kept));

        arena.release(shared).unwrap();
        assert_eq!(arena.compact(), 1);
        assert_eq!(arena.len(), 1);

        arena.set_retained(kept, false).unwrap();
        assert_eq!(arena.compact(), 1);
        assert!(arena.is_empty());
    }
}
