//! Intrusive doubly-linked recency list over a fixed arena of slots.
//!
//! Node `i` always stands for slot `i`; the arena is allocated once with
//! one link per slot and never grows. Head is the most recently used
//! slot, tail the eviction candidate.

/// Sentinel meaning "no slot" in prev/next links.
pub const SLOT_NONE: u32 = u32::MAX;

#[derive(Clone, Copy, Debug)]
struct Link {
    prev: u32,
    next: u32,
    linked: bool,
}

const UNLINKED: Link = Link {
    prev: SLOT_NONE,
    next: SLOT_NONE,
    linked: false,
};

pub struct RecencyList {
    links: Vec<Link>,
    head: u32,
    tail: u32,
    len: usize,
}

impl RecencyList {
    pub fn new(capacity: usize) -> Self {
        RecencyList {
            links: vec![UNLINKED; capacity],
            head: SLOT_NONE,
            tail: SLOT_NONE,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, index: u32) -> bool {
        self.links[index as usize].linked
    }

    /// Most recently used slot.
    pub fn front(&self) -> Option<u32> {
        (self.head != SLOT_NONE).then_some(self.head)
    }

    /// Least recently used slot.
    pub fn back(&self) -> Option<u32> {
        (self.tail != SLOT_NONE).then_some(self.tail)
    }

    /// Link `index` before the current head.
    pub fn push_front(&mut self, index: u32) {
        debug_assert!(!self.contains(index));
        let old_head = self.head;
        self.links[index as usize] = Link {
            prev: SLOT_NONE,
            next: old_head,
            linked: true,
        };
        if old_head != SLOT_NONE {
            self.links[old_head as usize].prev = index;
        } else {
            self.tail = index;
        }
        self.head = index;
        self.len += 1;
    }

    /// Link `index` after the current tail.
    pub fn push_back(&mut self, index: u32) {
        debug_assert!(!self.contains(index));
        let old_tail = self.tail;
        self.links[index as usize] = Link {
            prev: old_tail,
            next: SLOT_NONE,
            linked: true,
        };
        if old_tail != SLOT_NONE {
            self.links[old_tail as usize].next = index;
        } else {
            self.head = index;
        }
        self.tail = index;
        self.len += 1;
    }

    /// Unlink `index`. Returns false if it was not in the list.
    pub fn remove(&mut self, index: u32) -> bool {
        let link = self.links[index as usize];
        if !link.linked {
            return false;
        }

        if link.prev != SLOT_NONE {
            self.links[link.prev as usize].next = link.next;
        } else {
            self.head = link.next;
        }

        if link.next != SLOT_NONE {
            self.links[link.next as usize].prev = link.prev;
        } else {
            self.tail = link.prev;
        }

        self.links[index as usize] = UNLINKED;
        self.len -= 1;
        true
    }

    /// Move a linked slot to the head.
    pub fn move_to_front(&mut self, index: u32) {
        if self.head == index {
            return;
        }
        if self.remove(index) {
            self.push_front(index);
        }
    }

    /// Put unlinked `new` at the list position of linked `old`; `old` ends up unlinked.
    pub fn replace(&mut self, old: u32, new: u32) {
        debug_assert!(self.contains(old) && !self.contains(new));
        let link = self.links[old as usize];

        if link.prev != SLOT_NONE {
            self.links[link.prev as usize].next = new;
        } else {
            self.head = new;
        }

        if link.next != SLOT_NONE {
            self.links[link.next as usize].prev = new;
        } else {
            self.tail = new;
        }

        self.links[new as usize] = link;
        self.links[old as usize] = UNLINKED;
    }

    pub fn clear(&mut self) {
        self.links.fill(UNLINKED);
        self.head = SLOT_NONE;
        self.tail = SLOT_NONE;
        self.len = 0;
    }

    /// Iterate from most to least recently used.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }
}

pub struct Iter<'a> {
    list: &'a RecencyList,
    cursor: u32,
}

impl Iterator for Iter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.cursor == SLOT_NONE {
            return None;
        }
        let current = self.cursor;
        self.cursor = self.list.links[current as usize].next;
        Some(current)
    }
}
