//! Power-graph module compression.
//!
//! Starting from one module per node, pairs of modules are greedily merged into parent
//! modules whenever the merge lowers the number of distinct typed edges between modules.
//! The surviving module hierarchy becomes a list of [`Group`]s and the edges between
//! modules become [`PowerEdge`]s.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::Group;

/// Index of a module in the configuration's arena. The first `n` modules are the graph's
/// nodes, in node order.
pub type ModuleId = usize;

/// One end of a power edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerEdgeEnd {
    Node(usize),
    Group(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerEdge {
    pub source: PowerEdgeEnd,
    pub target: PowerEdgeEnd,
    #[serde(rename = "type")]
    pub link_type: u32,
}

/// Output of [`get_groups`]: the generated group hierarchy and the edges retargeted onto it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PowerGraph {
    pub groups: Vec<Group>,
    pub power_edges: Vec<PowerEdge>,
}

/// Typed edge sets: for every link type, the modules at the other end.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkSets {
    sets: BTreeMap<u32, BTreeSet<ModuleId>>,
    n: usize,
}

impl LinkSets {
    pub fn count(&self) -> usize {
        self.n
    }

    pub fn contains(&self, m: ModuleId) -> bool {
        self.sets.values().any(|s| s.contains(&m))
    }

    pub fn add(&mut self, link_type: u32, m: ModuleId) {
        if self.sets.entry(link_type).or_default().insert(m) {
            self.n += 1;
        }
    }

    pub fn remove(&mut self, link_type: u32, m: ModuleId) {
        let Some(s) = self.sets.get_mut(&link_type) else {
            return;
        };
        if s.remove(&m) {
            self.n -= 1;
        }
        if s.is_empty() {
            self.sets.remove(&link_type);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, ModuleId)> + '_ {
        self.sets
            .iter()
            .flat_map(|(&t, ms)| ms.iter().map(move |&m| (t, m)))
    }

    pub fn intersection(&self, other: &LinkSets) -> LinkSets {
        let mut result = LinkSets::default();
        for (t, ms) in &self.sets {
            let Some(os) = other.sets.get(t) else {
                continue;
            };
            let i: BTreeSet<ModuleId> = ms.intersection(os).copied().collect();
            if !i.is_empty() {
                result.n += i.len();
                result.sets.insert(*t, i);
            }
        }
        result
    }

    pub fn intersection_count(&self, other: &LinkSets) -> usize {
        self.sets
            .iter()
            .filter_map(|(t, ms)| other.sets.get(t).map(|os| ms.intersection(os).count()))
            .sum()
    }
}

#[derive(Debug, Clone)]
struct Module {
    /// Node index for leaf modules.
    node: Option<usize>,
    outgoing: LinkSets,
    incoming: LinkSets,
    /// Index into the configuration's child-set arena.
    children: Option<usize>,
    /// Template for a group the caller defined up front; such modules are never merged.
    definition: Option<Group>,
    gid: Option<usize>,
}

impl Module {
    fn new(node: Option<usize>) -> Self {
        Self {
            node,
            outgoing: LinkSets::default(),
            incoming: LinkSets::default(),
            children: None,
            definition: None,
            gid: None,
        }
    }

    fn is_island(&self) -> bool {
        self.outgoing.count() == 0 && self.incoming.count() == 0
    }

    fn is_predefined(&self) -> bool {
        self.definition.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Incoming,
    Outgoing,
}

/// Mutable state of the greedy merge.
#[derive(Debug, Clone)]
pub struct Configuration {
    modules: Vec<Module>,
    sets: Vec<BTreeSet<ModuleId>>,
    /// Child-set indices of the independent merge scopes; the first is the top level.
    roots: Vec<usize>,
    r: usize,
}

impl Configuration {
    /// Builds the initial configuration over `n` nodes and `(source, target, type)` links.
    /// When `root` is given, the caller's groups become fixed modules and merging happens
    /// only among siblings inside each group.
    pub fn new(
        n: usize,
        links: &[(usize, usize, u32)],
        groups: &[Group],
        root: Option<&Group>,
    ) -> Result<Self> {
        let mut c = Self {
            modules: (0..n).map(|i| Module::new(Some(i))).collect(),
            sets: Vec::new(),
            roots: Vec::new(),
            r: 0,
        };
        match root {
            Some(root) => {
                crate::projection::validate_groups(n, groups, Some(root))?;
                c.init_modules_from_group(groups, root);
            }
            None => {
                c.sets.push((0..n).collect());
                c.roots.push(0);
            }
        }
        for (i, &(s, t, link_type)) in links.iter().enumerate() {
            for v in [s, t] {
                if v >= n {
                    return Err(Error::UnknownNode {
                        link: i,
                        node: v.to_string(),
                    });
                }
            }
            c.modules[s].outgoing.add(link_type, t);
            c.modules[t].incoming.add(link_type, s);
        }
        c.r = c.modules.iter().map(|m| m.outgoing.count()).sum();
        Ok(c)
    }

    fn init_modules_from_group(&mut self, groups: &[Group], group: &Group) -> usize {
        let set = self.sets.len();
        self.sets.push(group.leaves.iter().copied().collect());
        self.roots.push(set);
        for &gi in &group.groups {
            let child = &groups[gi];
            let children = self.init_modules_from_group(groups, child);
            let id = self.modules.len();
            self.modules.push(Module {
                children: Some(children),
                definition: Some(Group {
                    leaves: Vec::new(),
                    groups: Vec::new(),
                    parent: None,
                    ..child.clone()
                }),
                ..Module::new(None)
            });
            self.sets[set].insert(id);
        }
        set
    }

    /// Number of distinct typed edges between modules.
    pub fn remaining_edges(&self) -> usize {
        self.r
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Edge count after hypothetically merging `a` and `b`.
    fn n_edges(&self, a: ModuleId, b: ModuleId) -> usize {
        let (ma, mb) = (&self.modules[a], &self.modules[b]);
        self.r
            - ma.incoming.intersection_count(&mb.incoming)
            - ma.outgoing.intersection_count(&mb.outgoing)
    }

    /// Merges `a` and `b`, both members of merge scope `k`, into a new parent module that
    /// takes over their shared edges. Returns the new module.
    pub fn merge(&mut self, a: ModuleId, b: ModuleId, k: usize) -> ModuleId {
        let in_int = self.modules[a].incoming.intersection(&self.modules[b].incoming);
        let out_int = self.modules[a].outgoing.intersection(&self.modules[b].outgoing);
        let m = self.modules.len();
        let children = self.sets.len();
        self.sets.push([a, b].into_iter().collect());
        self.modules.push(Module {
            outgoing: out_int.clone(),
            incoming: in_int.clone(),
            children: Some(children),
            ..Module::new(None)
        });

        self.retarget(&out_int, m, a, b, Side::Incoming);
        self.retarget(&in_int, m, a, b, Side::Outgoing);
        self.r -= in_int.count() + out_int.count();

        let root = &mut self.sets[self.roots[k]];
        root.remove(&a);
        root.remove(&b);
        root.insert(m);
        tracing::trace!(a, b, merged = m, remaining = self.r, "merged modules");
        m
    }

    /// For every module `n` in `shared`, replaces its `side` edges to `a` and `b` by one to `m`.
    fn retarget(&mut self, shared: &LinkSets, m: ModuleId, a: ModuleId, b: ModuleId, side: Side) {
        for (link_type, n) in shared.iter() {
            {
                let nls = match side {
                    Side::Incoming => &mut self.modules[n].incoming,
                    Side::Outgoing => &mut self.modules[n].outgoing,
                };
                nls.add(link_type, m);
                nls.remove(link_type, a);
                nls.remove(link_type, b);
            }
            for x in [a, b] {
                let own = match side {
                    Side::Incoming => &mut self.modules[x].outgoing,
                    Side::Outgoing => &mut self.modules[x].incoming,
                };
                own.remove(link_type, n);
            }
        }
    }

    /// Candidate merges of scope `k`: every pair of mergeable members, in member order.
    fn root_merges(&self, k: usize) -> Vec<(usize, ModuleId, ModuleId)> {
        let rs: Vec<ModuleId> = self.sets[self.roots[k]]
            .iter()
            .copied()
            .filter(|&m| !self.modules[m].is_predefined())
            .collect();
        let mut merges = Vec::with_capacity(rs.len() * rs.len().saturating_sub(1) / 2);
        for (i, &a) in rs.iter().enumerate() {
            for &b in &rs[i + 1..] {
                merges.push((self.n_edges(a, b), a, b));
            }
        }
        merges
    }

    /// Performs the merge that removes the most edges in the first scope where some merge
    /// helps. Ties go to the earliest pair. Returns `false` once no merge helps anywhere.
    pub fn greedy_merge(&mut self) -> bool {
        for k in 0..self.roots.len() {
            let best = self
                .root_merges(k)
                .into_iter()
                .reduce(|best, m| if m.0 < best.0 { m } else { best });
            let Some((n_edges, a, b)) = best else {
                continue;
            };
            if n_edges >= self.r {
                continue;
            }
            self.merge(a, b, k);
            return true;
        }
        false
    }

    /// Every edge between modules reachable from the top level, as `(source, target, type)`.
    pub fn all_edges(&self) -> Vec<(ModuleId, ModuleId, u32)> {
        let mut es = Vec::new();
        if let Some(&top) = self.roots.first() {
            self.collect_edges(top, &mut es);
        }
        es
    }

    fn collect_edges(&self, set: usize, es: &mut Vec<(ModuleId, ModuleId, u32)>) {
        for &m in &self.sets[set] {
            es.extend(self.modules[m].outgoing.iter().map(|(t, target)| (m, target, t)));
            if let Some(children) = self.modules[m].children {
                self.collect_edges(children, es);
            }
        }
    }

    /// Turns the module hierarchy into groups and retargets the module edges onto them.
    /// Merged modules that lost all their edges are flattened into their parent.
    pub fn group_hierarchy(&mut self) -> PowerGraph {
        let mut groups = Vec::new();
        if let Some(&top) = self.roots.first() {
            self.to_groups(top, None, &mut groups);
        }
        let power_edges = self
            .all_edges()
            .into_iter()
            .filter_map(|(s, t, link_type)| {
                Some(PowerEdge {
                    source: self.edge_end(s)?,
                    target: self.edge_end(t)?,
                    link_type,
                })
            })
            .collect();
        PowerGraph {
            groups,
            power_edges,
        }
    }

    fn edge_end(&self, m: ModuleId) -> Option<PowerEdgeEnd> {
        let module = &self.modules[m];
        match module.gid {
            Some(g) => Some(PowerEdgeEnd::Group(g)),
            None => module.node.map(PowerEdgeEnd::Node),
        }
    }

    fn to_groups(&mut self, set: usize, group: Option<usize>, groups: &mut Vec<Group>) {
        let members: Vec<ModuleId> = self.sets[set].iter().copied().collect();
        for m in members {
            let module = &self.modules[m];
            if let Some(node) = module.node {
                if let Some(g) = group {
                    groups[g].leaves.push(node);
                }
                continue;
            }
            let mut target = group;
            if !module.is_island() || module.is_predefined() {
                let gid = groups.len();
                groups.push(module.definition.clone().unwrap_or_default());
                if let Some(g) = group {
                    groups[g].groups.push(gid);
                }
                self.modules[m].gid = Some(gid);
                target = Some(gid);
            }
            if let Some(children) = self.modules[m].children {
                self.to_groups(children, target, groups);
            }
        }
    }
}

/// Compresses the graph: merges modules until no merge removes an edge, then returns the
/// resulting groups and power edges. `groups` and `root` describe caller-defined groups to
/// keep as fixed modules; `root` lists the top-level nodes and groups.
pub fn get_groups(
    n: usize,
    links: &[(usize, usize, u32)],
    groups: &[Group],
    root: Option<&Group>,
) -> Result<PowerGraph> {
    let mut c = Configuration::new(n, links, groups, root)?;
    let before = c.remaining_edges();
    let mut merges = 0usize;
    while c.greedy_merge() {
        merges += 1;
    }
    let graph = c.group_hierarchy();
    tracing::debug!(
        merges,
        edges_before = before,
        edges_after = c.remaining_edges(),
        groups = graph.groups.len(),
        "power graph compression"
    );
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_sets_count_distinct_members() {
        let mut s = LinkSets::default();
        s.add(0, 3);
        s.add(0, 3);
        s.add(1, 3);
        assert_eq!(s.count(), 2);
        s.remove(0, 3);
        s.remove(0, 3);
        assert_eq!(s.count(), 1);
        assert!(s.contains(3));
        s.remove(1, 3);
        assert!(!s.contains(3));
    }

    #[test]
    fn merge_moves_shared_edges_onto_parent() {
        // 0 -> 2, 1 -> 2, 0 -> 3
        let links = [(0, 2, 0), (1, 2, 0), (0, 3, 0)];
        let mut c = Configuration::new(4, &links, &[], None).unwrap();
        assert_eq!(c.remaining_edges(), 3);
        let m = c.merge(0, 1, 0);
        assert_eq!(c.remaining_edges(), 2);
        let mut edges = c.all_edges();
        edges.sort_unstable();
        assert_eq!(edges, vec![(0, 3, 0), (m, 2, 0)]);
    }

    #[test]
    fn different_link_types_are_not_shared() {
        let links = [(0, 2, 0), (1, 2, 1)];
        let mut c = Configuration::new(3, &links, &[], None).unwrap();
        assert!(!c.greedy_merge());
    }
}
