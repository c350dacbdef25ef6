//! Pairing-heap priority queue with decrease-key.
//!
//! Nodes live in an arena and are addressed by [`HeapHandle`]. Popped slots are not reused, so a
//! queue is meant to be built for one search and dropped afterwards.

#[derive(Debug, Clone)]
struct HeapNode<T> {
    elem: Option<T>,
    children: Vec<usize>,
    parent: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapHandle(usize);

/// Min-heap ordered by a caller-supplied `less_than`.
///
/// `less_than(a, b)` returning `true` keeps `a` above `b`; a non-strict comparison (`<=`) makes
/// earlier pushes win ties.
pub struct PriorityQueue<T, F> {
    nodes: Vec<HeapNode<T>>,
    root: Option<usize>,
    len: usize,
    less_than: F,
}

impl<T, F> PriorityQueue<T, F>
where
    F: Fn(&T, &T) -> bool,
{
    pub fn new(less_than: F) -> Self {
        Self {
            nodes: Vec::new(),
            root: None,
            len: 0,
            less_than,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn top(&self) -> Option<&T> {
        self.root.and_then(|r| self.nodes[r].elem.as_ref())
    }

    /// Current value behind `h`, or `None` once it has been popped.
    pub fn get(&self, h: HeapHandle) -> Option<&T> {
        self.nodes.get(h.0).and_then(|n| n.elem.as_ref())
    }

    pub fn push(&mut self, elem: T) -> HeapHandle {
        let idx = self.nodes.len();
        self.nodes.push(HeapNode {
            elem: Some(elem),
            children: Vec::new(),
            parent: None,
        });
        self.len += 1;
        self.root = Some(match self.root {
            None => idx,
            Some(r) => self.merge(r, idx),
        });
        HeapHandle(idx)
    }

    pub fn pop(&mut self) -> Option<T> {
        let r = self.root?;
        let elem = self.nodes[r].elem.take();
        let children = std::mem::take(&mut self.nodes[r].children);
        self.root = self.merge_pairs(children);
        self.len -= 1;
        elem
    }

    /// Replaces the value behind `h` with `elem`, which must not order after the old value.
    ///
    /// Does nothing if `h` has already been popped.
    pub fn reduce_key(&mut self, h: HeapHandle, elem: T) {
        let idx = h.0;
        let Some(node) = self.nodes.get_mut(idx) else {
            return;
        };
        if node.elem.is_none() {
            return;
        }
        node.elem = Some(elem);
        if self.root == Some(idx) {
            return;
        }
        if let Some(p) = self.nodes[idx].parent.take() {
            let siblings = &mut self.nodes[p].children;
            if let Some(pos) = siblings.iter().position(|&c| c == idx) {
                siblings.swap_remove(pos);
            }
        }
        self.root = Some(match self.root {
            None => idx,
            Some(r) => self.merge(r, idx),
        });
    }

    fn less(&self, a: usize, b: usize) -> bool {
        match (&self.nodes[a].elem, &self.nodes[b].elem) {
            (Some(x), Some(y)) => (self.less_than)(x, y),
            (Some(_), None) => true,
            _ => false,
        }
    }

    fn merge(&mut self, a: usize, b: usize) -> usize {
        let (top, below) = if self.less(a, b) { (a, b) } else { (b, a) };
        self.nodes[top].children.push(below);
        self.nodes[below].parent = Some(top);
        top
    }

    fn merge_pairs(&mut self, children: Vec<usize>) -> Option<usize> {
        for &c in &children {
            self.nodes[c].parent = None;
        }
        let mut paired = Vec::with_capacity(children.len().div_ceil(2));
        let mut it = children.into_iter();
        while let Some(a) = it.next() {
            match it.next() {
                Some(b) => paired.push(self.merge(a, b)),
                None => paired.push(a),
            }
        }
        let mut acc = paired.pop()?;
        while let Some(h) = paired.pop() {
            acc = self.merge(h, acc);
        }
        Some(acc)
    }
}

impl<T: std::fmt::Debug, F> std::fmt::Debug for PriorityQueue<T, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityQueue")
            .field("len", &self.len)
            .field("top", &self.root.and_then(|r| self.nodes[r].elem.as_ref()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::PriorityQueue;

    #[test]
    fn pops_in_ascending_order() {
        let mut q = PriorityQueue::new(|a: &i32, b: &i32| a <= b);
        for v in [5, 3, 9, 1, 7, 3, 0, 8] {
            q.push(v);
        }
        assert_eq!(q.len(), 8);
        let mut out = Vec::new();
        while let Some(v) = q.pop() {
            out.push(v);
        }
        assert_eq!(out, vec![0, 1, 3, 3, 5, 7, 8, 9]);
        assert!(q.is_empty());
    }

    #[test]
    fn reduce_key_moves_element_to_front() {
        let mut q = PriorityQueue::new(|a: &(f64, usize), b: &(f64, usize)| a.0 <= b.0);
        let handles: Vec<_> = (0..6).map(|i| q.push((10.0 + i as f64, i))).collect();
        q.reduce_key(handles[4], (1.0, 4));
        assert_eq!(q.top().map(|e| e.1), Some(4));
        q.reduce_key(handles[2], (0.5, 2));
        assert_eq!(q.pop().map(|e| e.1), Some(2));
        assert_eq!(q.pop().map(|e| e.1), Some(4));
        assert_eq!(q.pop().map(|e| e.1), Some(0));
        assert!(q.get(handles[2]).is_none());
    }
}
