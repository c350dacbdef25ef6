//! Shortest paths over an undirected graph with non-negative edge lengths.
//!
//! All-pairs distances are computed by running Dijkstra from every node. With non-negative
//! lengths this is Johnson's algorithm without the reweighting pass.

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::pqueue::{HeapHandle, PriorityQueue};

#[derive(Debug, Clone, Copy)]
struct Neighbour {
    id: usize,
    distance: f64,
}

#[derive(Debug, Clone, Copy)]
struct QueueEntry {
    node: usize,
    prev: Option<usize>,
    d: f64,
}

/// Adjacency lists built once from an edge list; every query runs a fresh search.
#[derive(Debug, Clone)]
pub struct Calculator {
    neighbours: Vec<Vec<Neighbour>>,
}

impl Calculator {
    /// Builds the calculator for `n` nodes. Edges are undirected; each contributes
    /// `length(e)` in both directions. Negative or NaN lengths are rejected.
    pub fn new<E>(
        n: usize,
        es: &[E],
        source: impl Fn(&E) -> usize,
        target: impl Fn(&E) -> usize,
        length: impl Fn(&E) -> f64,
    ) -> Result<Self> {
        let mut neighbours = vec![Vec::new(); n];
        for (edge, e) in es.iter().enumerate() {
            let (u, v) = (source(e), target(e));
            for index in [u, v] {
                if index >= n {
                    return Err(Error::NodeOutOfRange { index, count: n });
                }
            }
            let distance = length(e);
            if distance.is_nan() || distance < 0.0 {
                return Err(Error::NegativeEdgeLength { edge, length: distance });
            }
            neighbours[u].push(Neighbour { id: v, distance });
            neighbours[v].push(Neighbour { id: u, distance });
        }
        Ok(Self { neighbours })
    }

    pub fn node_count(&self) -> usize {
        self.neighbours.len()
    }

    /// Full n×n matrix; unreachable pairs are `f64::INFINITY`.
    pub fn distance_matrix(&self) -> Vec<Vec<f64>> {
        (0..self.neighbours.len())
            .map(|i| self.dijkstra(i, None).0)
            .collect()
    }

    pub fn distances_from_node(&self, start: usize) -> Vec<f64> {
        self.dijkstra(start, None).0
    }

    /// Node indices along a shortest path from `start` to `end`, both included.
    ///
    /// Empty if `end` is unreachable.
    pub fn path_from_node_to_node(&self, start: usize, end: usize) -> Vec<usize> {
        let (d, prev) = self.dijkstra(start, Some(end));
        if end >= d.len() || !d[end].is_finite() {
            return Vec::new();
        }
        let mut path = vec![end];
        let mut u = end;
        while let Some(p) = prev[u] {
            path.push(p);
            u = p;
        }
        path.reverse();
        path
    }

    /// Like [`Calculator::path_from_node_to_node`], but each step `u -> v` reached via `prev`
    /// additionally pays `prev_cost(prev, u, v)`.
    ///
    /// The search runs over directed edge states rather than nodes, so the same node may be
    /// entered from different directions; it never immediately doubles back.
    pub fn path_from_node_to_node_with_prev_cost(
        &self,
        start: usize,
        end: usize,
        prev_cost: impl Fn(usize, usize, usize) -> f64,
    ) -> Vec<usize> {
        if start >= self.neighbours.len() || end >= self.neighbours.len() {
            return Vec::new();
        }
        let mut entries = vec![QueueEntry {
            node: start,
            prev: None,
            d: 0.0,
        }];
        let mut q = PriorityQueue::new(|a: &(f64, usize), b: &(f64, usize)| a.0 <= b.0);
        q.push((0.0, 0));
        let mut visited_from: FxHashMap<(usize, usize), f64> = FxHashMap::default();
        let mut found = None;

        while let Some((_, qi)) = q.pop() {
            let qu = entries[qi];
            if qu.node == end {
                found = Some(qi);
                break;
            }
            let prev_node = qu.prev.map(|p| entries[p].node);
            for n in &self.neighbours[qu.node] {
                if prev_node == Some(n.id) {
                    continue;
                }
                let key = (n.id, qu.node);
                if visited_from.get(&key).is_some_and(|&d| d <= qu.d) {
                    continue;
                }
                let cc = prev_node.map_or(0.0, |p| prev_cost(p, qu.node, n.id));
                let t = qu.d + n.distance + cc;
                visited_from.insert(key, t);
                entries.push(QueueEntry {
                    node: n.id,
                    prev: Some(qi),
                    d: t,
                });
                q.push((t, entries.len() - 1));
            }
        }

        let Some(mut qi) = found else {
            return Vec::new();
        };
        let mut path = vec![entries[qi].node];
        while let Some(p) = entries[qi].prev {
            path.push(entries[p].node);
            qi = p;
        }
        path.reverse();
        path
    }

    fn dijkstra(&self, start: usize, dest: Option<usize>) -> (Vec<f64>, Vec<Option<usize>>) {
        let n = self.neighbours.len();
        let mut d = vec![f64::INFINITY; n];
        let mut prev = vec![None; n];
        if start >= n {
            return (d, prev);
        }
        let mut handles: Vec<Option<HeapHandle>> = vec![None; n];
        let mut done = vec![false; n];
        let mut q = PriorityQueue::new(|a: &(f64, usize), b: &(f64, usize)| a.0 <= b.0);
        d[start] = 0.0;
        handles[start] = Some(q.push((0.0, start)));

        while let Some((du, u)) = q.pop() {
            done[u] = true;
            if dest == Some(u) {
                break;
            }
            for nb in &self.neighbours[u] {
                let v = nb.id;
                if done[v] {
                    continue;
                }
                let t = du + nb.distance;
                if t < d[v] {
                    d[v] = t;
                    prev[v] = Some(u);
                    match handles[v] {
                        Some(h) => q.reduce_key(h, (t, v)),
                        None => handles[v] = Some(q.push((t, v))),
                    }
                }
            }
        }
        (d, prev)
    }
}

#[cfg(test)]
mod tests {
    use super::Calculator;

    fn grid_3x3() -> Calculator {
        // 0 1 2
        // 3 4 5
        // 6 7 8
        let es = [
            (0, 1),
            (1, 2),
            (3, 4),
            (4, 5),
            (6, 7),
            (7, 8),
            (0, 3),
            (3, 6),
            (1, 4),
            (4, 7),
            (2, 5),
            (5, 8),
        ];
        Calculator::new(9, &es, |e| e.0, |e| e.1, |_| 1.0).unwrap()
    }

    #[test]
    fn prev_cost_penalises_bends() {
        let calc = grid_3x3();
        let straight_first = |a: usize, _b: usize, c: usize| {
            let (ar, ac) = (a / 3, a % 3);
            let (cr, cc) = (c / 3, c % 3);
            if ar == cr || ac == cc { 0.0 } else { 10.0 }
        };
        let path = calc.path_from_node_to_node_with_prev_cost(0, 8, straight_first);
        assert_eq!(path.first(), Some(&0));
        assert_eq!(path.last(), Some(&8));
        assert_eq!(path.len(), 5);
        let bends = path
            .windows(3)
            .filter(|w| straight_first(w[0], w[1], w[2]) > 0.0)
            .count();
        assert_eq!(bends, 1, "path {path:?}");
    }

    #[test]
    fn unreachable_target_gives_empty_path() {
        let calc = Calculator::new(3, &[(0usize, 1usize)], |e| e.0, |e| e.1, |_| 1.0).unwrap();
        assert!(calc.path_from_node_to_node(0, 2).is_empty());
        assert!(calc
            .path_from_node_to_node_with_prev_cost(0, 2, |_, _, _| 0.0)
            .is_empty());
        assert_eq!(calc.path_from_node_to_node(1, 1), vec![1]);
    }
}
