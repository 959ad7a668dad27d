//! An index-based object pool for search nodes.
//!
//! Every slot carries one link field that is interpreted according to the
//! slot's lifecycle: while a node is live it points at the node's predecessor
//! on the best known path, and while the slot is free it points at the next
//! free slot. The [`Link`] tag makes the two states mutually exclusive.

use std::ops::{Index, IndexMut};

use crate::error::{Error, Result};

/// A handle to a slot in an [`ObjectPool`].
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// The dual-purpose back reference of a slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Link {
    /// The slot holds a node taking part in a search.
    Live {
        /// The predecessor of the node, if any.
        parent: Option<NodeId>,
    },
    /// The slot is on the free list.
    Free {
        /// The next free slot.
        next: Option<NodeId>,
    },
}

#[derive(Debug)]
struct Slot<T> {
    value: T,
    link: Link,
}

/// A free-list allocator of `T` values addressed by [`NodeId`].
///
/// Released slots are recycled before new ones are allocated, so a pool that
/// has warmed up performs no heap allocation. A pool is not shared between
/// threads; each worker owns one.
#[derive(Debug)]
pub struct ObjectPool<T> {
    slots: Vec<Slot<T>>,
    head: Option<NodeId>,
    live: usize,
    limit: Option<usize>,
}

impl<T> Default for ObjectPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ObjectPool<T> {
    /// Creates an empty, unbounded pool.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            head: None,
            live: 0,
            limit: None,
        }
    }

    /// Creates an empty pool holding at most `limit` live nodes at once.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::new()
        }
    }

    /// The maximum number of live nodes, if bounded.
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Number of live nodes.
    pub fn live(&self) -> usize {
        self.live
    }

    /// Number of slots on the free list.
    pub fn free(&self) -> usize {
        self.slots.len() - self.live
    }

    /// Number of slots ever allocated.
    pub fn allocated(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if `id` refers to a live node.
    pub fn is_live(&self, id: NodeId) -> bool {
        matches!(
            self.slots.get(id.index()),
            Some(Slot {
                link: Link::Live { .. },
                ..
            })
        )
    }

    /// Returns a node to the free list.
    ///
    /// Releasing a slot that is already free is reported as
    /// [`Error::NotLive`] and leaves the free list untouched.
    pub fn release(&mut self, id: NodeId) -> Result<()> {
        let slot = self.slots.get_mut(id.index()).ok_or(Error::NotLive(id))?;
        if let Link::Free { .. } = slot.link {
            return Err(Error::NotLive(id));
        }
        slot.link = Link::Free { next: self.head };
        self.head = Some(id);
        self.live -= 1;
        Ok(())
    }

    /// Releases every live node.
    ///
    /// Slot payloads are kept for reuse.
    pub fn release_all(&mut self) {
        self.head = None;
        for (i, slot) in self.slots.iter_mut().enumerate().rev() {
            slot.link = Link::Free { next: self.head };
            self.head = Some(NodeId(i as u32));
        }
        self.live = 0;
    }

    /// The predecessor of a live node.
    ///
    /// Returns `None` for free slots and for nodes without a predecessor.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        match self.slots.get(id.index())?.link {
            Link::Live { parent } => parent,
            Link::Free { .. } => None,
        }
    }

    /// Sets the predecessor of a live node.
    pub fn set_parent(&mut self, id: NodeId, parent: Option<NodeId>) -> Result<()> {
        match self.slots.get_mut(id.index()) {
            Some(Slot {
                link: link @ Link::Live { .. },
                ..
            }) => {
                *link = Link::Live { parent };
                Ok(())
            }
            _ => Err(Error::NotLive(id)),
        }
    }

    /// Iterates from `id` back through its chain of predecessors.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(id), move |&n| self.parent(n))
    }

    /// A live node's value, or `None` if `id` is not live.
    pub fn get(&self, id: NodeId) -> Option<&T> {
        self.slots
            .get(id.index())
            .filter(|slot| matches!(slot.link, Link::Live { .. }))
            .map(|slot| &slot.value)
    }

    /// A live node's value, mutably, or `None` if `id` is not live.
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut T> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| matches!(slot.link, Link::Live { .. }))
            .map(|slot| &mut slot.value)
    }
}

impl<T: Default> ObjectPool<T> {
    /// Takes a node from the free list, or allocates one if the list is empty.
    ///
    /// The node starts without a predecessor. Recycled nodes keep the payload
    /// of their previous use; callers overwrite it. This ignores the pool's
    /// limit; see [`ObjectPool::try_acquire`].
    pub fn acquire(&mut self) -> NodeId {
        match self.head {
            Some(id) => {
                let slot = &mut self.slots[id.index()];
                let Link::Free { next } = slot.link else {
                    unreachable!("free list head {id:?} is live");
                };
                slot.link = Link::Live { parent: None };
                self.head = next;
                self.live += 1;
                id
            }
            None => {
                let id = NodeId(self.slots.len() as u32);
                self.slots.push(Slot {
                    value: T::default(),
                    link: Link::Live { parent: None },
                });
                self.live += 1;
                id
            }
        }
    }

    /// Like [`ObjectPool::acquire`], but fails with [`Error::PoolExhausted`]
    /// once the pool holds `limit` live nodes.
    pub fn try_acquire(&mut self) -> Result<NodeId> {
        match self.limit {
            Some(limit) if self.live >= limit => Err(Error::PoolExhausted { limit }),
            _ => Ok(self.acquire()),
        }
    }
}

impl<T> Index<NodeId> for ObjectPool<T> {
    type Output = T;

    fn index(&self, id: NodeId) -> &T {
        self.get(id)
            .unwrap_or_else(|| panic!("node {id:?} is not live"))
    }
}

impl<T> IndexMut<NodeId> for ObjectPool<T> {
    fn index_mut(&mut self, id: NodeId) -> &mut T {
        self.get_mut(id)
            .unwrap_or_else(|| panic!("node {id:?} is not live"))
    }
}
