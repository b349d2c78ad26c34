//! Recency order over live session keys.
//!
//! A `HashMap` from key to arena slot plus an index-linked doubly-linked
//! list; touch, remove and least-recent lookup are all O(1).  Head is the
//! most recently active key, tail the least.

use std::collections::HashMap;

const NIL: usize = usize::MAX;

#[derive(Debug)]
struct Node {
    key: String,
    prev: usize,
    next: usize,
}

#[derive(Debug)]
pub struct RecencyList {
    index: HashMap<String, usize>,
    arena: Vec<Node>,
    head: usize,
    tail: usize,
    free: Vec<usize>,
}

impl Default for RecencyList {
    fn default() -> Self {
        Self::new()
    }
}

impl RecencyList {
    pub fn new() -> Self {
        Self {
            index: HashMap::new(),
            arena: Vec::new(),
            head: NIL,
            tail: NIL,
            free: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Mark `key` as the most recently active, inserting it if absent.
    pub fn touch(&mut self, key: &str) {
        if let Some(&idx) = self.index.get(key) {
            self.unlink(idx);
            self.push_front(idx);
            return;
        }

        let node = Node {
            key: key.to_owned(),
            prev: NIL,
            next: NIL,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.arena[idx] = node;
                idx
            }
            None => {
                self.arena.push(node);
                self.arena.len() - 1
            }
        };
        self.index.insert(key.to_owned(), idx);
        self.push_front(idx);
    }

    pub fn remove(&mut self, key: &str) -> bool {
        let Some(idx) = self.index.remove(key) else {
            return false;
        };
        self.unlink(idx);
        self.arena[idx].key.clear();
        self.free.push(idx);
        true
    }

    /// The least recently active key.
    pub fn least_recent(&self) -> Option<&str> {
        (self.tail != NIL).then(|| self.arena[self.tail].key.as_str())
    }

    /// Keys from least to most recently active.
    pub fn iter_oldest_first(&self) -> impl Iterator<Item = &str> + '_ {
        let mut cursor = self.tail;
        std::iter::from_fn(move || {
            if cursor == NIL {
                return None;
            }
            let node = &self.arena[cursor];
            cursor = node.prev;
            Some(node.key.as_str())
        })
    }

    /// Drop every key for which `keep` returns false.  Returns how many
    /// keys were removed.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) -> usize {
        let doomed: Vec<String> = self
            .index
            .keys()
            .filter(|k| !keep(k))
            .cloned()
            .collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed.len()
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.arena[idx].prev, self.arena[idx].next);
        if prev != NIL {
            self.arena[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.arena[next].prev = prev;
        } else {
            self.tail = prev;
        }
        self.arena[idx].prev = NIL;
        self.arena[idx].next = NIL;
    }

    fn push_front(&mut self, idx: usize) {
        self.arena[idx].prev = NIL;
        self.arena[idx].next = self.head;
        if self.head != NIL {
            self.arena[self.head].prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }
}
