use tracing::{debug, warn};

use crate::{
    error::{PoolError, Result},
    utils::{expanded_capacity, exceeds_fill_factor},
};

/// Stable index of a slot in a [`NodeHeap`].
///
/// Links between nodes are slot indices rather than pointers, so growing the
/// backing array (which may move it) never invalidates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(usize);

impl NodeId {
    #[cfg(test)]
    pub const fn from_index(index: usize) -> Self {
        Self(index)
    }
}

/// Index of the neighbour node, if any.
pub(crate) type Link = Option<NodeId>;

#[derive(Debug)]
pub(crate) struct Node<T> {
    /// Index of the next node of the list
    pub next: Link,
    /// Index of the previous node of the list
    pub prev: Link,
    /// Whether the slot is currently part of the list. Retired slots are
    /// chained through `next` until they are reused.
    pub live: bool,
    /// Element of the node
    pub data: T,
}

/// Growable slot array holding a doubly linked list.
///
/// Slots are never moved once assigned, only retired and reused. Retired
/// slots form a singly linked chain through their `next` field, the same way
/// a free block's unused payload can hold free list links:
///
/// ```text
///   head                                     tail
///    |                                        |
/// +--v--+     +-----+     +-----+     +-----+  |
/// |  0  | <-> |  3  | <-> |  1  | <-> |  4  |<-+
/// +-----+     +-----+     +-----+     +-----+
///
/// vacant -> [2] -> [5] -> None
/// ```
///
/// The array grows by `expand_factor` whenever the live count would go over
/// `fill_factor * capacity`. Growth happens before anything is modified, so
/// a failed growth leaves the list untouched.
pub(crate) struct NodeHeap<T> {
    nodes: Vec<Node<T>>,
    capacity: usize,
    fill_factor: f32,
    expand_factor: usize,
    head: Link,
    tail: Link,
    vacant: Link,
    len: usize,
}

pub(crate) struct Iter<'a, T> {
    heap: &'a NodeHeap<T>,
    current: Link,
    remaining: usize,
}

impl<T> NodeHeap<T> {
    pub fn new(capacity: usize, fill_factor: f32, expand_factor: usize) -> Result<Self> {
        let mut nodes = Vec::new();
        nodes
            .try_reserve_exact(capacity)
            .map_err(|_| PoolError::ResourceExhausted { what: "node heap" })?;

        Ok(Self {
            nodes,
            capacity,
            fill_factor,
            expand_factor,
            head: None,
            tail: None,
            vacant: None,
            len: 0,
        })
    }

    /// Number of live nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[cfg(test)]
    pub fn first(&self) -> Link {
        self.head
    }

    #[inline]
    pub fn last(&self) -> Link {
        self.tail
    }

    /// Returns the live node at `id`, if there is one.
    pub fn get(&self, id: NodeId) -> Option<&Node<T>> {
        self.nodes.get(id.0).filter(|node| node.live)
    }

    #[inline]
    pub fn data(&self, id: NodeId) -> &T {
        &self.nodes[id.0].data
    }

    #[inline]
    pub fn data_mut(&mut self, id: NodeId) -> &mut T {
        &mut self.nodes[id.0].data
    }

    #[inline]
    pub fn next(&self, id: NodeId) -> Link {
        self.nodes[id.0].next
    }

    #[inline]
    pub fn prev(&self, id: NodeId) -> Link {
        self.nodes[id.0].prev
    }

    /// Makes sure `additional` more nodes can be added without growing.
    ///
    /// This is the only fallible part of [`NodeHeap::add_node`]; callers that
    /// need several structures to change together reserve everything first.
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        let needed = self.len + additional;
        if !exceeds_fill_factor(needed, self.capacity, self.fill_factor) {
            return Ok(());
        }

        let mut new_capacity = self.capacity;
        while exceeds_fill_factor(needed, new_capacity, self.fill_factor) {
            let next = expanded_capacity(new_capacity, self.expand_factor);
            if next == new_capacity {
                warn!(capacity = self.capacity, "node heap can't grow any further");
                return Err(PoolError::ResourceExhausted { what: "node heap" });
            }
            new_capacity = next;
        }

        // Slots in use never outnumber the capacity, see the check above.
        let additional_slots = new_capacity - self.nodes.len();
        if let Err(err) = self.nodes.try_reserve_exact(additional_slots) {
            warn!(capacity = self.capacity, new_capacity, %err, "node heap growth failed");
            return Err(PoolError::ResourceExhausted { what: "node heap" });
        }

        debug!(from = self.capacity, to = new_capacity, "grew node heap");
        self.capacity = new_capacity;
        Ok(())
    }

    /// Adds a node holding `data` right after `after`, or at the end of the
    /// list when `after` is `None`. A retired slot is reused when available.
    pub fn add_node(&mut self, after: Link, data: T) -> Result<NodeId> {
        self.reserve(1)?;

        let (prev, next) = match after {
            Some(after) => (Some(after), self.nodes[after.0].next),
            None => (self.tail, None),
        };

        let node = Node {
            next,
            prev,
            live: true,
            data,
        };

        let id = match self.vacant {
            Some(id) => {
                self.vacant = self.nodes[id.0].next;
                self.nodes[id.0] = node;
                id
            }
            None => {
                self.nodes.push(node);
                NodeId(self.nodes.len() - 1)
            }
        };

        match prev {
            Some(prev) => self.nodes[prev.0].next = Some(id),
            None => self.head = Some(id),
        }
        match next {
            Some(next) => self.nodes[next.0].prev = Some(id),
            None => self.tail = Some(id),
        }

        self.len += 1;
        Ok(id)
    }

    /// Unlinks the node at `id` and retires its slot for reuse.
    pub fn remove(&mut self, id: NodeId) {
        debug_assert!(self.nodes[id.0].live, "removing a retired node");

        let (prev, next) = (self.nodes[id.0].prev, self.nodes[id.0].next);

        match prev {
            Some(prev) => self.nodes[prev.0].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.nodes[next.0].prev = prev,
            None => self.tail = prev,
        }

        let node = &mut self.nodes[id.0];
        node.live = false;
        node.prev = None;
        node.next = self.vacant;
        self.vacant = Some(id);

        self.len -= 1;
    }

    /// Iterates over the live nodes in list order.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            heap: self,
            current: self.head,
            remaining: self.len,
        }
    }
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (NodeId, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.current?;
        let node = &self.heap.nodes[id.0];

        self.current = node.next;
        self.remaining = self.remaining.saturating_sub(1);

        Some((id, &node.data))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, T> IntoIterator for &'a NodeHeap<T> {
    type Item = (NodeId, &'a T);
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
