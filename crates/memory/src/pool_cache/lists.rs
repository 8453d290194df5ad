//! Index-linked pool lists
//!
//! A PoolCache keeps its pools in a slab indexed by pool id. The three
//! classification lists thread through that slab by id instead of by
//! pointer: every id carries `prev`/`next` links and the list it is on, so
//! moving a pool between lists is O(1) and never touches the pool itself.

use crate::error::{MemoryError, MemoryResult};

/// Which list a pool is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Some slots live, some free
    Available,
    /// Every slot live
    Full,
    /// No slot live
    Empty,
}

impl PoolState {
    const COUNT: usize = 3;

    const fn slot(self) -> usize {
        match self {
            Self::Available => 0,
            Self::Full => 1,
            Self::Empty => 2,
        }
    }

    /// Classifies a pool by how many of its slots are live.
    pub const fn classify(allocated: usize, capacity: usize) -> Self {
        if allocated == 0 {
            Self::Empty
        } else if allocated == capacity {
            Self::Full
        } else {
            Self::Available
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Link {
    prev: Option<usize>,
    next: Option<usize>,
    state: Option<PoolState>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Ends {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

/// Three doubly linked lists over a shared id space.
#[derive(Debug, Default)]
pub(crate) struct PoolLists {
    links: Vec<Link>,
    ends: [Ends; PoolState::COUNT],
}

impl PoolLists {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn ends(&self, state: PoolState) -> &Ends {
        &self.ends[state.slot()]
    }

    fn ends_mut(&mut self, state: PoolState) -> &mut Ends {
        &mut self.ends[state.slot()]
    }

    pub(crate) fn len(&self, state: PoolState) -> usize {
        self.ends(state).len
    }

    pub(crate) fn front(&self, state: PoolState) -> Option<usize> {
        self.ends(state).head
    }

    pub(crate) fn back(&self, state: PoolState) -> Option<usize> {
        self.ends(state).tail
    }

    /// List `id` is currently on.
    pub(crate) fn state_of(&self, id: usize) -> Option<PoolState> {
        self.links.get(id).and_then(|l| l.state)
    }

    /// Appends `id` to the back of `state`'s list.
    pub(crate) fn push_back(&mut self, id: usize, state: PoolState) {
        if id >= self.links.len() {
            self.links.resize(id + 1, Link::default());
        }
        debug_assert!(self.links[id].state.is_none(), "pool {id} is already listed");

        let tail = self.ends(state).tail;
        self.links[id] = Link {
            prev: tail,
            next: None,
            state: Some(state),
        };
        match tail {
            Some(t) => self.links[t].next = Some(id),
            None => self.ends_mut(state).head = Some(id),
        }
        let ends = self.ends_mut(state);
        ends.tail = Some(id);
        ends.len += 1;
    }

    /// Unlinks `id` from whatever list it is on.
    pub(crate) fn remove(&mut self, id: usize) {
        let Some(link) = self.links.get(id).copied() else {
            return;
        };
        let Some(state) = link.state else {
            return;
        };

        match link.prev {
            Some(p) => self.links[p].next = link.next,
            None => self.ends_mut(state).head = link.next,
        }
        match link.next {
            Some(n) => self.links[n].prev = link.prev,
            None => self.ends_mut(state).tail = link.prev,
        }
        self.ends_mut(state).len -= 1;
        self.links[id] = Link::default();
    }

    /// Moves `id` to the back of `state`'s list unless it is already there.
    pub(crate) fn relink(&mut self, id: usize, state: PoolState) {
        if self.state_of(id) != Some(state) {
            self.remove(id);
            self.push_back(id, state);
        }
    }

    /// Ids on `state`'s list, front to back.
    #[cfg(test)]
    pub(crate) fn iter(&self, state: PoolState) -> impl Iterator<Item = usize> + '_ {
        let mut cursor = self.front(state);
        core::iter::from_fn(move || {
            let id = cursor?;
            cursor = self.links.get(id).and_then(|l| l.next);
            Some(id)
        })
    }

    /// Checks link symmetry and lengths of every list.
    pub(crate) fn validate(&self) -> MemoryResult<()> {
        for state in [PoolState::Available, PoolState::Full, PoolState::Empty] {
            let ends = self.ends(state);
            let mut prev = None;
            let mut count = 0;
            let mut cursor = ends.head;

            while let Some(id) = cursor {
                let link = self.links.get(id).copied().unwrap_or_default();
                if link.state != Some(state) || link.prev != prev {
                    return Err(MemoryError::corrupt_heap(
                        "pool_cache",
                        id,
                        format!("pool {id} has inconsistent links on the {state:?} list"),
                    ));
                }
                count += 1;
                if count > self.links.len() {
                    return Err(MemoryError::corrupt_heap(
                        "pool_cache",
                        id,
                        format!("cycle on the {state:?} list"),
                    ));
                }
                prev = Some(id);
                cursor = link.next;
            }

            if ends.tail != prev || ends.len != count {
                return Err(MemoryError::corrupt_heap(
                    "pool_cache",
                    0,
                    format!("{state:?} list length {} but {count} reachable", ends.len),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(PoolState::classify(0, 4), PoolState::Empty);
        assert_eq!(PoolState::classify(4, 4), PoolState::Full);
        assert_eq!(PoolState::classify(2, 4), PoolState::Available);
    }

    #[test]
    fn test_push_remove_order() {
        let mut lists = PoolLists::new();
        lists.push_back(0, PoolState::Empty);
        lists.push_back(3, PoolState::Empty);
        lists.push_back(1, PoolState::Empty);

        assert_eq!(lists.iter(PoolState::Empty).collect::<Vec<_>>(), vec![0, 3, 1]);
        assert_eq!(lists.front(PoolState::Empty), Some(0));
        assert_eq!(lists.back(PoolState::Empty), Some(1));

        lists.remove(3);
        assert_eq!(lists.iter(PoolState::Empty).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(lists.len(PoolState::Empty), 2);
        assert!(lists.validate().is_ok());
    }

    #[test]
    fn test_relink_moves_between_lists() {
        let mut lists = PoolLists::new();
        lists.push_back(0, PoolState::Available);
        lists.push_back(1, PoolState::Available);

        lists.relink(0, PoolState::Full);
        assert_eq!(lists.state_of(0), Some(PoolState::Full));
        assert_eq!(lists.front(PoolState::Available), Some(1));
        assert_eq!(lists.len(PoolState::Full), 1);

        // Relinking onto the same list keeps position.
        lists.push_back(2, PoolState::Available);
        lists.relink(1, PoolState::Available);
        assert_eq!(lists.front(PoolState::Available), Some(1));
        assert!(lists.validate().is_ok());
    }
}
