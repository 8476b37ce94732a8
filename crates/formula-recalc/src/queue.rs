use crate::store::FormulaId;

const NIL: u32 = u32::MAX;

/// The dirty propagation queue: an index-addressed doubly linked list over formula ids.
///
/// `prev`/`next` are parallel arrays indexed by [`FormulaId`], so linking, unlinking and
/// membership tests are O(1) and a formula is queued at most once.
#[derive(Debug)]
pub(crate) struct DirtyQueue {
    prev: Vec<u32>,
    next: Vec<u32>,
    queued: Vec<bool>,
    head: u32,
    tail: u32,
    len: usize,
}

impl DirtyQueue {
    pub(crate) fn new() -> Self {
        Self {
            prev: Vec::new(),
            next: Vec::new(),
            queued: Vec::new(),
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }

    fn ensure(&mut self, idx: usize) {
        if idx >= self.queued.len() {
            let len = idx + 1;
            self.prev.resize(len, NIL);
            self.next.resize(len, NIL);
            self.queued.resize(len, false);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn contains(&self, id: FormulaId) -> bool {
        self.queued.get(id.index()).copied().unwrap_or(false)
    }

    /// Append `id`; returns false if it was already queued.
    pub(crate) fn push_back(&mut self, id: FormulaId) -> bool {
        let idx = id.index();
        self.ensure(idx);
        if self.queued[idx] {
            return false;
        }
        self.queued[idx] = true;
        self.prev[idx] = self.tail;
        self.next[idx] = NIL;
        if self.tail == NIL {
            self.head = id.raw();
        } else {
            self.next[self.tail as usize] = id.raw();
        }
        self.tail = id.raw();
        self.len += 1;
        true
    }

    /// Put `id` at the head, moving it there if it is already queued.
    pub(crate) fn push_front(&mut self, id: FormulaId) {
        self.remove(id);
        let idx = id.index();
        self.ensure(idx);
        self.queued[idx] = true;
        self.prev[idx] = NIL;
        self.next[idx] = self.head;
        if self.head == NIL {
            self.tail = id.raw();
        } else {
            self.prev[self.head as usize] = id.raw();
        }
        self.head = id.raw();
        self.len += 1;
    }

    pub(crate) fn pop_front(&mut self) -> Option<FormulaId> {
        if self.head == NIL {
            return None;
        }
        let id = FormulaId::new(self.head);
        self.remove(id);
        Some(id)
    }

    /// Unlink `id`; returns false if it was not queued.
    pub(crate) fn remove(&mut self, id: FormulaId) -> bool {
        if !self.contains(id) {
            return false;
        }
        let idx = id.index();
        let (prev, next) = (self.prev[idx], self.next[idx]);
        if prev == NIL {
            self.head = next;
        } else {
            self.next[prev as usize] = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.prev[next as usize] = prev;
        }
        self.prev[idx] = NIL;
        self.next[idx] = NIL;
        self.queued[idx] = false;
        self.len -= 1;
        true
    }

    /// Queued ids, head first.
    #[cfg(test)]
    pub(crate) fn iter(&self) -> impl Iterator<Item = FormulaId> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            if cursor == NIL {
                return None;
            }
            let id = FormulaId::new(cursor);
            cursor = self.next[cursor as usize];
            Some(id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ids(q: &DirtyQueue) -> Vec<u32> {
        q.iter().map(FormulaId::raw).collect()
    }

    #[test]
    fn fifo_with_at_most_one_entry_per_formula() {
        let mut q = DirtyQueue::new();
        assert!(q.push_back(FormulaId::new(3)));
        assert!(q.push_back(FormulaId::new(1)));
        assert!(!q.push_back(FormulaId::new(3)));
        assert!(q.push_back(FormulaId::new(7)));
        assert_eq!(ids(&q), vec![3, 1, 7]);
        assert_eq!(q.len(), 3);

        assert!(q.remove(FormulaId::new(1)));
        assert!(!q.remove(FormulaId::new(1)));
        assert_eq!(ids(&q), vec![3, 7]);

        q.push_front(FormulaId::new(7));
        assert_eq!(ids(&q), vec![7, 3]);

        assert_eq!(q.pop_front(), Some(FormulaId::new(7)));
        assert_eq!(q.pop_front(), Some(FormulaId::new(3)));
        assert_eq!(q.pop_front(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn appending_while_draining() {
        let mut q = DirtyQueue::new();
        q.push_back(FormulaId::new(0));
        let mut seen = Vec::new();
        while let Some(id) = q.pop_front() {
            seen.push(id.raw());
            if id.raw() < 4 {
                q.push_back(FormulaId::new(id.raw() + 1));
                q.push_back(FormulaId::new(id.raw() + 2));
            }
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
    }
}
