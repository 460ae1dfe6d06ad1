//! 以强类型标识索引的节点仓库，删除后留下墓碑以保证标识稳定。
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// Trait implemented by identifier types that can index into an [`Arena`].
pub trait Idx: Copy + Eq + PartialEq + Ord + fmt::Debug {
    fn index(self) -> usize;
    fn from_usize(idx: usize) -> Self;
}

/// A slot vector indexed by strongly typed identifiers.
///
/// Removed slots are never reused, so an identifier handed out once
/// either resolves to the value it was created for or to nothing.
#[derive(Clone)]
pub struct Arena<I, T> {
    slots: Vec<Option<T>>,
    _marker: PhantomData<I>,
}

impl<I, T> Arena<I, T>
where
    I: Idx,
{
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn alloc(&mut self, value: T) -> I {
        let idx = self.slots.len();
        self.slots.push(Some(value));
        I::from_usize(idx)
    }

    pub fn remove(&mut self, id: I) -> Option<T> {
        self.slots.get_mut(id.index()).and_then(Option::take)
    }

    pub fn contains(&self, id: I) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: I) -> Option<&T> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: I) -> Option<&mut T> {
        self.slots.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Number of live slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter_enumerated(&self) -> impl Iterator<Item = (I, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_ref().map(|value| (I::from_usize(idx), value)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().filter_map(Option::as_mut)
    }
}

impl<I, T> Default for Arena<I, T>
where
    I: Idx,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<I, T> fmt::Debug for Arena<I, T>
where
    I: Idx,
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter_enumerated()).finish()
    }
}

impl<I, T> Index<I> for Arena<I, T>
where
    I: Idx,
{
    type Output = T;

    fn index(&self, id: I) -> &Self::Output {
        match self.get(id) {
            Some(value) => value,
            None => panic!("{id:?} refers to a removed or unknown slot"),
        }
    }
}

impl<I, T> IndexMut<I> for Arena<I, T>
where
    I: Idx,
{
    fn index_mut(&mut self, id: I) -> &mut Self::Output {
        match self.get_mut(id) {
            Some(value) => value,
            None => panic!("{id:?} refers to a removed or unknown slot"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::ids::NodeId;

    #[test]
    fn removed_ids_are_not_reused() {
        let mut arena: Arena<NodeId, &str> = Arena::new();
        let a = arena.alloc("a");
        let b = arena.alloc("b");
        assert_eq!(arena.remove(a), Some("a"));
        let c = arena.alloc("c");

        assert_ne!(a, c);
        assert!(!arena.contains(a));
        assert_eq!(arena[b], "b");
        assert_eq!(arena.len(), 2);
        let live: Vec<_> = arena.iter_enumerated().map(|(id, _)| id).collect();
        assert_eq!(live, vec![b, c]);
    }
}
