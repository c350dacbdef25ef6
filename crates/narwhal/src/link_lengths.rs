//! Link-length heuristics from neighbourhood overlap, and the strongly connected components
//! that decide which links a flow layout may orient.
//!
//! Links are `(source, target)` node-index pairs.

use std::collections::BTreeSet;

use crate::model::{Axis, LayoutConstraint};

fn neighbour_sets(links: &[(usize, usize)]) -> Vec<BTreeSet<usize>> {
    let n = links.iter().map(|&(u, v)| u.max(v) + 1).max().unwrap_or(0);
    let mut neighbours = vec![BTreeSet::new(); n];
    for &(u, v) in links {
        neighbours[u].insert(v);
        neighbours[v].insert(u);
    }
    neighbours
}

fn compute_link_lengths(
    links: &[(usize, usize)],
    w: f64,
    f: impl Fn(&BTreeSet<usize>, &BTreeSet<usize>) -> f64,
) -> Vec<f64> {
    let neighbours = neighbour_sets(links);
    links
        .iter()
        .map(|&(u, v)| 1.0 + w * f(&neighbours[u], &neighbours[v]))
        .collect()
}

fn intersection_count(a: &BTreeSet<usize>, b: &BTreeSet<usize>) -> usize {
    a.intersection(b).count()
}

fn union_count(a: &BTreeSet<usize>, b: &BTreeSet<usize>) -> usize {
    a.len() + b.len() - intersection_count(a, b)
}

/// Length multiplier `1 + w * sqrt(|N(u) ∪ N(v)| - |N(u) ∩ N(v)|)` per link: links between
/// nodes with different neighbourhoods get longer.
pub fn symmetric_diff_link_lengths(links: &[(usize, usize)], w: f64) -> Vec<f64> {
    compute_link_lengths(links, w, |a, b| {
        ((union_count(a, b) - intersection_count(a, b)) as f64).sqrt()
    })
}

/// Length multiplier `1 + w * |N(u) ∩ N(v)| / |N(u) ∪ N(v)|` per link, with no extra length
/// when either endpoint is a leaf.
pub fn jaccard_link_lengths(links: &[(usize, usize)], w: f64) -> Vec<f64> {
    compute_link_lengths(links, w, |a, b| {
        if a.len().min(b.len()) < 2 {
            0.0
        } else {
            intersection_count(a, b) as f64 / union_count(a, b) as f64
        }
    })
}

/// Tarjan's algorithm over the directed graph `links` on nodes `0..n`. Every node appears in
/// exactly one component; links with an endpoint outside `0..n` are ignored.
pub fn strongly_connected_components(n: usize, links: &[(usize, usize)]) -> Vec<Vec<usize>> {
    let mut out: Vec<Vec<usize>> = vec![Vec::new(); n];
    for &(u, v) in links {
        if u < n && v < n {
            out[u].push(v);
        }
    }

    let mut index: Vec<Option<usize>> = vec![None; n];
    let mut lowlink = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack = Vec::new();
    let mut components = Vec::new();
    let mut next = 0usize;

    for root in 0..n {
        if index[root].is_some() {
            continue;
        }
        index[root] = Some(next);
        lowlink[root] = next;
        next += 1;
        stack.push(root);
        on_stack[root] = true;
        // (node, position of the next outgoing edge to visit)
        let mut call: Vec<(usize, usize)> = vec![(root, 0)];

        while let Some(frame) = call.last_mut() {
            let v = frame.0;
            if let Some(&w) = out[v].get(frame.1) {
                frame.1 += 1;
                match index[w] {
                    None => {
                        index[w] = Some(next);
                        lowlink[w] = next;
                        next += 1;
                        stack.push(w);
                        on_stack[w] = true;
                        call.push((w, 0));
                    }
                    Some(iw) if on_stack[w] => lowlink[v] = lowlink[v].min(iw),
                    Some(_) => {}
                }
                continue;
            }

            call.pop();
            if let Some(&(parent, _)) = call.last() {
                lowlink[parent] = lowlink[parent].min(lowlink[v]);
            }
            if index[v] == Some(lowlink[v]) {
                let mut component = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                components.push(component);
            }
        }
    }
    components
}

/// Separation constraints `source + gap(i) <= target` along `axis` for every link `i` whose
/// endpoints lie in different strongly connected components.
pub fn generate_directed_edge_constraints(
    n: usize,
    links: &[(usize, usize)],
    axis: Axis,
    gap: impl Fn(usize) -> f64,
) -> Vec<LayoutConstraint> {
    let mut component_of = vec![usize::MAX; n];
    for (i, c) in strongly_connected_components(n, links).iter().enumerate() {
        for &v in c {
            component_of[v] = i;
        }
    }
    links
        .iter()
        .enumerate()
        .filter(|&(_, &(u, v))| u < n && v < n && component_of[u] != component_of[v])
        .map(|(i, &(u, v))| LayoutConstraint::separation(axis, u, v, gap(i)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tarjan_handles_long_chains_without_recursion() {
        let n = 50_000;
        let links: Vec<(usize, usize)> = (0..n - 1).map(|i| (i, i + 1)).collect();
        let comps = strongly_connected_components(n, &links);
        assert_eq!(comps.len(), n);
    }

    #[test]
    fn nested_cycles_collapse_into_one_component() {
        // 0 -> 1 -> 2 -> 0, 2 -> 3 -> 4 -> 2, 4 -> 5
        let links = [(0, 1), (1, 2), (2, 0), (2, 3), (3, 4), (4, 2), (4, 5)];
        let mut comps = strongly_connected_components(6, &links);
        for c in &mut comps {
            c.sort_unstable();
        }
        comps.sort();
        assert_eq!(comps, vec![vec![0, 1, 2, 3, 4], vec![5]]);
    }
}
