//! The layout driver: ideal distances from graph topology, staged descent with increasingly
//! many constraints, component packing, and the tick loop that hosts drive.

use nalgebra::DMatrix;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::descent::Descent;
use crate::error::{Error, Result};
use crate::geom::{Point, TangentVisibilityGraph};
use crate::handle_disconnected::{apply_packing, separate_graphs};
use crate::link_lengths::{generate_directed_edge_constraints, jaccard_link_lengths, symmetric_diff_link_lengths};
use crate::model::{Axis, Group, LayoutConfig, LayoutConstraint, Link, Node, NodeRef};
use crate::powergraph::{PowerGraph, get_groups};
use crate::projection::{Projection, compute_group_bounds};
use crate::rectangle::{Rectangle, make_edge_between, make_edge_to};
use crate::shortest_paths::Calculator;

/// Alpha a stopped layout restarts with.
pub const RESTART_ALPHA: f64 = 0.1;
/// Ideal distance between the two corner points of a group.
const GROUP_CORNER_DISTANCE: f64 = 0.1;
/// Weight of non-adjacent pairs: they only repel when closer than their ideal distance.
const NON_ADJACENT_WEIGHT: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Start,
    Tick,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub alpha: f64,
    pub stress: Option<f64>,
}

/// What a host does when the layout asks for ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kick {
    /// The layout runs ticks itself until it ends.
    Immediate,
    /// The host will call [`Layout::tick`] from its own timer until it returns `true`.
    Deferred,
}

/// The environment a layout runs in.
pub trait LayoutHost {
    fn on_event(&mut self, _event: &Event) {}

    fn schedule_tick(&mut self) -> Kick {
        Kick::Immediate
    }
}

/// Host that runs every tick synchronously inside [`Layout::start`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SynchronousHost;

impl LayoutHost for SynchronousHost {}

#[derive(Debug, Clone, Copy, PartialEq)]
enum LinkLengthHeuristic {
    SymmetricDiff { ideal: f64, w: f64 },
    Jaccard { ideal: f64, w: f64 },
}

type LinkFn<T> = Box<dyn Fn(&Link) -> T>;
type Listener = Box<dyn FnMut(&Event)>;

pub struct Layout {
    config: LayoutConfig,
    nodes: Vec<Node>,
    links: Vec<Link>,
    groups: Vec<Group>,
    root_group: Option<Group>,
    constraints: Vec<LayoutConstraint>,
    distance_matrix: Option<Vec<Vec<f64>>>,
    link_distance_fn: Option<LinkFn<f64>>,
    link_length_heuristic: Option<LinkLengthHeuristic>,
    link_length_factors: Vec<f64>,
    link_type: Option<LinkFn<u32>>,
    flow: Option<(Axis, LinkFn<f64>)>,
    link_indices: Vec<(usize, usize)>,
    alpha: f64,
    running: bool,
    last_displacement: Option<f64>,
    last_stress: Option<f64>,
    descent: Option<Descent>,
    visibility_graph: Option<TangentVisibilityGraph>,
    route_margin: f64,
    host: Box<dyn LayoutHost>,
    listeners: Vec<(EventType, Listener)>,
}

impl std::fmt::Debug for Layout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layout")
            .field("config", &self.config)
            .field("nodes", &self.nodes.len())
            .field("links", &self.links.len())
            .field("groups", &self.groups.len())
            .field("constraints", &self.constraints.len())
            .field("alpha", &self.alpha)
            .field("running", &self.running)
            .finish()
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::new()
    }
}

impl Layout {
    pub fn new() -> Self {
        Self::with_host(Box::new(SynchronousHost))
    }

    pub fn with_host(host: Box<dyn LayoutHost>) -> Self {
        Self {
            config: LayoutConfig::default(),
            nodes: Vec::new(),
            links: Vec::new(),
            groups: Vec::new(),
            root_group: None,
            constraints: Vec::new(),
            distance_matrix: None,
            link_distance_fn: None,
            link_length_heuristic: None,
            link_length_factors: Vec::new(),
            link_type: None,
            flow: None,
            link_indices: Vec::new(),
            alpha: 0.0,
            running: false,
            last_displacement: None,
            last_stress: None,
            descent: None,
            visibility_graph: None,
            route_margin: 0.0,
            host,
            listeners: Vec::new(),
        }
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: LayoutConfig) -> &mut Self {
        self.config = config;
        self
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Mutable access for hosts that drag or pin nodes between ticks.
    pub fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    pub fn set_nodes(&mut self, nodes: Vec<Node>) -> &mut Self {
        self.nodes = nodes;
        self
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn set_links(&mut self, links: Vec<Link>) -> &mut Self {
        self.links = links;
        self
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    /// Installs groups, records every node's and group's parent, and derives the root group
    /// from the nodes and groups without a parent. Set the nodes first.
    pub fn set_groups(&mut self, groups: Vec<Group>) -> Result<&mut Self> {
        self.groups = groups;
        self.refresh_hierarchy()?;
        Ok(self)
    }

    /// The implicit top-level group, present once groups are set.
    pub fn root_group(&self) -> Option<&Group> {
        self.root_group.as_ref()
    }

    pub fn constraints(&self) -> &[LayoutConstraint] {
        &self.constraints
    }

    pub fn set_constraints(&mut self, constraints: Vec<LayoutConstraint>) -> &mut Self {
        self.constraints = constraints;
        self
    }

    pub fn distance_matrix(&self) -> Option<&[Vec<f64>]> {
        self.distance_matrix.as_deref()
    }

    /// Ideal distances to use instead of shortest paths. Disables component packing.
    pub fn set_distance_matrix(&mut self, d: Option<Vec<Vec<f64>>>) -> &mut Self {
        self.distance_matrix = d;
        self
    }

    pub fn size(&self) -> [f64; 2] {
        self.config.size
    }

    pub fn set_size(&mut self, size: [f64; 2]) -> &mut Self {
        self.config.size = size;
        self
    }

    pub fn default_node_size(&self) -> f64 {
        self.config.default_node_size
    }

    pub fn set_default_node_size(&mut self, size: f64) -> &mut Self {
        self.config.default_node_size = size;
        self
    }

    pub fn group_compactness(&self) -> f64 {
        self.config.group_compactness
    }

    pub fn set_group_compactness(&mut self, compactness: f64) -> &mut Self {
        self.config.group_compactness = compactness;
        self
    }

    pub fn link_distance(&self) -> f64 {
        self.config.link_distance
    }

    /// Constant ideal length for links without their own `length`. Clears any per-link
    /// function or length heuristic.
    pub fn set_link_distance(&mut self, distance: f64) -> &mut Self {
        self.config.link_distance = distance;
        self.link_distance_fn = None;
        self.link_length_heuristic = None;
        self
    }

    pub fn set_link_distance_fn(&mut self, f: impl Fn(&Link) -> f64 + 'static) -> &mut Self {
        self.link_distance_fn = Some(Box::new(f));
        self.link_length_heuristic = None;
        self
    }

    /// Link type used by power-graph compression; defaults to each link's `type` (or 0).
    pub fn set_link_type(&mut self, f: impl Fn(&Link) -> u32 + 'static) -> &mut Self {
        self.link_type = Some(Box::new(f));
        self
    }

    pub fn convergence_threshold(&self) -> f64 {
        self.config.convergence_threshold
    }

    pub fn set_convergence_threshold(&mut self, threshold: f64) -> &mut Self {
        self.config.convergence_threshold = threshold;
        self
    }

    pub fn avoid_overlaps(&self) -> bool {
        self.config.avoid_overlaps
    }

    pub fn set_avoid_overlaps(&mut self, avoid: bool) -> &mut Self {
        self.config.avoid_overlaps = avoid;
        self
    }

    pub fn handle_disconnected(&self) -> bool {
        self.config.handle_disconnected
    }

    pub fn set_handle_disconnected(&mut self, handle: bool) -> &mut Self {
        self.config.handle_disconnected = handle;
        self
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Sets the temperature. Raising it from zero starts the tick loop and fires `start`;
    /// setting zero on a running layout makes the next tick fire `end`.
    pub fn set_alpha(&mut self, x: f64) -> &mut Self {
        if self.alpha > 0.0 {
            self.alpha = if x > 0.0 { x } else { 0.0 };
        } else if x > 0.0 && !self.running {
            self.running = true;
            self.alpha = x;
            self.trigger(Event {
                event_type: EventType::Start,
                alpha: x,
                stress: None,
            });
            self.kick();
        }
        self
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// The descent engine of the most recent [`Layout::start`].
    pub fn descent(&self) -> Option<&Descent> {
        self.descent.as_ref()
    }

    /// Link endpoints as node indices, as resolved by the most recent start.
    pub fn link_indices(&self) -> &[(usize, usize)] {
        &self.link_indices
    }

    pub fn on(&mut self, event_type: EventType, listener: impl FnMut(&Event) + 'static) -> &mut Self {
        self.listeners.push((event_type, Box::new(listener)));
        self
    }

    /// Keeps every link that is not part of a directed cycle pointing along `axis`, with its
    /// target at least `min_separation` past its source.
    pub fn flow_layout(&mut self, axis: Axis, min_separation: f64) -> &mut Self {
        self.flow_layout_with(axis, move |_| min_separation)
    }

    pub fn flow_layout_with(&mut self, axis: Axis, min_separation: impl Fn(&Link) -> f64 + 'static) -> &mut Self {
        self.flow = Some((axis, Box::new(min_separation)));
        self
    }

    /// Link lengths `ideal * (1 + w * sqrt(|symmetric difference of the endpoints' neighbours|))`.
    pub fn symmetric_diff_link_lengths(&mut self, ideal: f64, w: f64) -> &mut Self {
        self.link_length_heuristic = Some(LinkLengthHeuristic::SymmetricDiff { ideal, w });
        self.link_distance_fn = None;
        self
    }

    /// Link lengths `ideal * (1 + w * jaccard(neighbours of source, neighbours of target))`.
    pub fn jaccard_link_lengths(&mut self, ideal: f64, w: f64) -> &mut Self {
        self.link_length_heuristic = Some(LinkLengthHeuristic::Jaccard { ideal, w });
        self.link_distance_fn = None;
        self
    }

    fn link_length(&self, i: usize) -> f64 {
        let link = &self.links[i];
        if let Some(f) = &self.link_distance_fn {
            return f(link);
        }
        match self.link_length_heuristic {
            Some(LinkLengthHeuristic::SymmetricDiff { ideal, .. } | LinkLengthHeuristic::Jaccard { ideal, .. }) => {
                ideal * self.link_length_factors.get(i).copied().unwrap_or(1.0)
            }
            None => link.length.unwrap_or(self.config.link_distance),
        }
    }

    fn resolve_links(&self) -> Result<Vec<(usize, usize)>> {
        let n = self.nodes.len();
        let ids: FxHashMap<&str, usize> = self
            .nodes
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.id.as_deref().map(|id| (id, i)))
            .collect();
        let resolve = |r: &NodeRef, link: usize| match r {
            NodeRef::Index(i) if *i < n => Ok(*i),
            NodeRef::Index(i) => Err(Error::UnknownNode {
                link,
                node: i.to_string(),
            }),
            NodeRef::Id(id) => ids.get(id.as_str()).copied().ok_or_else(|| Error::UnknownNode {
                link,
                node: id.clone(),
            }),
        };
        self.links
            .iter()
            .enumerate()
            .map(|(i, l)| Ok((resolve(&l.source, i)?, resolve(&l.target, i)?)))
            .collect()
    }

    fn refresh_hierarchy(&mut self) -> Result<()> {
        for v in &mut self.nodes {
            v.parent = None;
        }
        for g in &mut self.groups {
            g.parent = None;
        }
        if self.groups.is_empty() {
            self.root_group = None;
            return Ok(());
        }
        let (n, count) = (self.nodes.len(), self.groups.len());
        let mut leaf_parents = Vec::new();
        let mut group_parents = Vec::new();
        for (gi, g) in self.groups.iter().enumerate() {
            for &l in &g.leaves {
                if l >= n {
                    return Err(Error::NodeOutOfRange { index: l, count: n });
                }
                leaf_parents.push((l, gi));
            }
            for &c in &g.groups {
                if c >= count {
                    return Err(Error::GroupOutOfRange { index: c, count });
                }
                group_parents.push((c, gi));
            }
        }
        for (l, gi) in leaf_parents {
            self.nodes[l].parent = Some(gi);
        }
        for (c, gi) in group_parents {
            if self.groups[c].parent.is_some() || c == gi {
                return Err(Error::GroupCycle { index: c });
            }
            self.groups[c].parent = Some(gi);
        }
        let root = Group {
            leaves: (0..n).filter(|&i| self.nodes[i].parent.is_none()).collect(),
            groups: (0..count).filter(|&g| self.groups[g].parent.is_none()).collect(),
            padding: 0.0,
            ..Group::default()
        };
        crate::projection::validate_groups(n, &self.groups, Some(&root))?;

        let mut reached = vec![false; count];
        let mut stack = root.groups.clone();
        while let Some(g) = stack.pop() {
            reached[g] = true;
            stack.extend(self.groups[g].groups.iter().copied());
        }
        if let Some(index) = reached.iter().position(|r| !r) {
            return Err(Error::GroupCycle { index });
        }
        self.root_group = Some(root);
        Ok(())
    }

    /// Runs the staged layout and then starts the tick loop:
    ///
    /// 1. ideal distances from shortest paths (or the user distance matrix);
    /// 2. `initial_unconstrained` iterations without constraints;
    /// 3. `initial_user_constraint` iterations with the user (and flow) constraints;
    /// 4. `initial_all_constraints` iterations adding non-overlap and group containment;
    /// 5. `grid_snap` iterations pulling nodes onto a grid;
    /// 6. packing of disconnected components, unless a distance matrix was given.
    pub fn start(
        &mut self,
        initial_unconstrained: usize,
        initial_user_constraint: usize,
        initial_all_constraints: usize,
        grid_snap: usize,
    ) -> Result<&mut Self> {
        self.run_start(
            initial_unconstrained,
            initial_user_constraint,
            initial_all_constraints,
            grid_snap,
            true,
        )?;
        Ok(self)
    }

    fn run_start(
        &mut self,
        initial_unconstrained: usize,
        initial_user_constraint: usize,
        initial_all_constraints: usize,
        grid_snap: usize,
        keep_running: bool,
    ) -> Result<()> {
        let n = self.nodes.len();
        if n == 0 {
            debug!("nothing to lay out");
            self.descent = None;
            return Ok(());
        }
        let groups = self.groups.len();
        let big_n = n + 2 * groups;
        let [w, h] = self.config.size;

        self.link_indices = self.resolve_links()?;
        self.refresh_hierarchy()?;

        let mut x = vec![0.0; big_n];
        let mut y = vec![0.0; big_n];
        for (i, v) in self.nodes.iter_mut().enumerate() {
            if !v.is_placed() {
                v.x = w / 2.0;
                v.y = h / 2.0;
            }
            x[i] = v.x;
            y[i] = v.y;
        }

        self.link_length_factors = match self.link_length_heuristic {
            Some(LinkLengthHeuristic::SymmetricDiff { w, .. }) => symmetric_diff_link_lengths(&self.link_indices, w),
            Some(LinkLengthHeuristic::Jaccard { w, .. }) => jaccard_link_lengths(&self.link_indices, w),
            None => Vec::new(),
        };

        let (mut d, mut g) = match &self.distance_matrix {
            Some(user) => (user_distances(user, n, big_n)?, None),
            None => {
                let edges: Vec<(usize, usize, f64)> = self
                    .link_indices
                    .iter()
                    .enumerate()
                    .map(|(i, &(u, v))| (u, v, self.link_length(i)))
                    .collect();
                let distances = Calculator::new(big_n, &edges, |e| e.0, |e| e.1, |e| e.2)?.distance_matrix();
                let mut g = DMatrix::from_element(big_n, big_n, NON_ADJACENT_WEIGHT);
                for (link, &(u, v)) in self.links.iter().zip(&self.link_indices) {
                    let weight = link.weight.filter(|&w| w != 0.0).unwrap_or(1.0);
                    g[(u, v)] = weight;
                    g[(v, u)] = weight;
                }
                (DMatrix::from_fn(big_n, big_n, |i, j| distances[i][j]), Some(g))
            }
        };

        if groups > 0 {
            let gm = g.get_or_insert_with(|| DMatrix::from_element(big_n, big_n, 1.0));
            for (gi, group) in self.groups.iter().enumerate() {
                let i = n + 2 * gi;
                gm[(i, i + 1)] = self.config.group_compactness;
                gm[(i + 1, i)] = self.config.group_compactness;
                d[(i, i + 1)] = GROUP_CORNER_DISTANCE;
                d[(i + 1, i)] = GROUP_CORNER_DISTANCE;
                match group.bounds {
                    Some(b) => {
                        (x[i], y[i]) = (b.min_x, b.min_y);
                        (x[i + 1], y[i + 1]) = (b.max_x, b.max_y);
                    }
                    None => {
                        (x[i], y[i]) = (w / 2.0, h / 2.0);
                        (x[i + 1], y[i + 1]) = (w / 2.0, h / 2.0);
                    }
                }
            }
        }
        let root = self.root_group.clone().unwrap_or_else(|| Group {
            leaves: (0..n).collect(),
            padding: 0.0,
            ..Group::default()
        });

        let mut constraints = self.constraints.clone();
        if let Some((axis, gap)) = &self.flow {
            constraints.extend(generate_directed_edge_constraints(
                n,
                &self.link_indices,
                *axis,
                |i| gap(&self.links[i]),
            ));
        }

        let mut descent = Descent::new(vec![x, y], d, None)?;
        for (i, v) in self.nodes.iter_mut().enumerate() {
            if v.fixed {
                v.px = Some(v.x);
                v.py = Some(v.y);
                descent.locks.add(i, vec![v.x, v.y]);
            }
        }
        descent.threshold = self.config.convergence_threshold;

        let stress = self.initial_layout(&mut descent, initial_unconstrained)?;
        debug!(phase = "unconstrained", iterations = initial_unconstrained, stress, "layout phase");

        if !constraints.is_empty() {
            let projection = Projection::new(&self.nodes, &self.groups, Some(&root), &constraints, false)?;
            descent.set_projection(Some(Box::new(projection)));
        }
        let stress = descent.run(initial_user_constraint);
        debug!(phase = "user constraints", iterations = initial_user_constraint, stress, "layout phase");
        self.separate_overlapping_components(&mut descent);

        if self.config.avoid_overlaps {
            let projection = Projection::new(&self.nodes, &self.groups, Some(&root), &constraints, true)?;
            let [xs, ys] = &mut descent.x[..] else {
                return Err(Error::EmptyInput {
                    what: "two-dimensional coordinates",
                });
            };
            projection.make_feasible(xs, ys);
            descent.set_projection(Some(Box::new(projection)));
        }
        descent.g = g.clone();
        let stress = descent.run(initial_all_constraints);
        debug!(phase = "all constraints", iterations = initial_all_constraints, stress, "layout phase");

        if grid_snap > 0 {
            descent.snap_strength = 1000.0;
            descent.snap_grid_size = self.nodes[0].width.unwrap_or(self.config.default_node_size);
            descent.num_grid_snap_nodes = n;
            descent.scale_snap_by_max_h = n != big_n;
            descent.g = g.map(|g| DMatrix::from_fn(big_n, big_n, |i, j| if i >= n || j >= n { g[(i, j)] } else { 0.0 }));
            let stress = descent.run(grid_snap);
            debug!(phase = "grid snap", iterations = grid_snap, stress, "layout phase");
        }

        self.descent = Some(descent);
        self.update_node_positions();
        if let Some(mut descent) = self.descent.take() {
            self.separate_overlapping_components(&mut descent);
            self.descent = Some(descent);
        }
        self.refresh_bounds();

        if keep_running {
            self.resume();
        }
        Ok(())
    }

    /// Unconstrained iterations. With groups, a flat helper layout in which every group is a
    /// node linked to its members untangles the group structure first.
    fn initial_layout(&self, descent: &mut Descent, iterations: usize) -> Result<f64> {
        if self.groups.is_empty() || iterations == 0 {
            return Ok(descent.run(iterations));
        }
        let n = self.nodes.len();
        let mut links: Vec<Link> = self.link_indices.iter().map(|&(u, v)| Link::new(u, v)).collect();
        for (gi, g) in self.groups.iter().enumerate() {
            links.extend(g.leaves.iter().map(|&l| Link::new(n + gi, l)));
            links.extend(g.groups.iter().map(|&c| Link::new(n + gi, n + c)));
        }
        let mut flat = Layout::new();
        flat.set_config(LayoutConfig {
            avoid_overlaps: false,
            convergence_threshold: 1e-4,
            ..self.config.clone()
        })
        .set_nodes(vec![Node::default(); n + self.groups.len()])
        .set_links(links)
        .symmetric_diff_link_lengths(5.0, 1.0);
        flat.run_start(iterations, 0, 0, 0, false)?;
        for (i, v) in flat.nodes.iter().take(n).enumerate() {
            descent.x[0][i] = v.x;
            descent.x[1][i] = v.y;
        }
        Ok(descent.compute_stress())
    }

    /// Packs connected components side by side on the canvas. Skipped when a distance matrix
    /// was supplied or disconnected handling is off.
    fn separate_overlapping_components(&mut self, descent: &mut Descent) {
        if self.distance_matrix.is_some() || !self.config.handle_disconnected {
            return;
        }
        let n = self.nodes.len();
        for (i, v) in self.nodes.iter_mut().enumerate() {
            v.x = descent.x[0][i];
            v.y = descent.x[1][i];
        }
        let graphs = separate_graphs(n, &self.link_indices);
        let [w, h] = self.config.size;
        apply_packing(&graphs, &mut self.nodes, w, h, self.config.default_node_size, 1.0);
        for (i, v) in self.nodes.iter_mut().enumerate() {
            descent.x[0][i] = v.x;
            descent.x[1][i] = v.y;
            if let Some(b) = v.bounds.as_mut() {
                b.set_x_centre(v.x);
                b.set_y_centre(v.y);
            }
        }
    }

    fn update_node_positions(&mut self) {
        let Some(descent) = &self.descent else {
            return;
        };
        for (i, v) in self.nodes.iter_mut().enumerate() {
            let (x, y) = (descent.x[0][i], descent.x[1][i]);
            if v.fixed {
                v.x = v.px.unwrap_or(x);
                v.y = v.py.unwrap_or(y);
            } else {
                v.x = x;
                v.y = y;
            }
        }
        self.refresh_bounds();
    }

    /// Recentres node boxes on their nodes and recomputes group boxes: from the solved group
    /// corners when overlaps are avoided, otherwise as the padded union of the members.
    fn refresh_bounds(&mut self) {
        for v in &mut self.nodes {
            if let Some(b) = v.sized_bounds() {
                v.bounds = Some(b);
            } else if let Some(b) = v.bounds.as_mut() {
                b.set_x_centre(v.x);
                b.set_y_centre(v.y);
            }
        }
        let Some(root) = &self.root_group else {
            return;
        };
        let node_bounds: Vec<Rectangle> = self
            .nodes
            .iter()
            .map(|v| v.bounds.unwrap_or_else(Rectangle::empty))
            .collect();
        let mut out = vec![Rectangle::empty(); self.groups.len()];
        compute_group_bounds(&node_bounds, &self.groups, root, &mut out);

        let n = self.nodes.len();
        let solved = |gi: usize| {
            let descent = self.descent.as_ref().filter(|_| self.config.avoid_overlaps)?;
            let (i, j) = (n + 2 * gi, n + 2 * gi + 1);
            let r = Rectangle::new(
                *descent.x[0].get(i)?,
                *descent.x[0].get(j)?,
                *descent.x[1].get(i)?,
                *descent.x[1].get(j)?,
            );
            let finite = [r.min_x, r.max_x, r.min_y, r.max_y].iter().all(|c| c.is_finite());
            (finite && !r.is_empty()).then_some(r)
        };
        let bounds: Vec<Option<Rectangle>> = out
            .iter()
            .enumerate()
            .map(|(gi, b)| solved(gi).or((!b.is_empty()).then_some(*b)))
            .collect();
        for (g, b) in self.groups.iter_mut().zip(bounds) {
            if b.is_some() {
                g.bounds = b;
            }
        }
    }

    pub fn resume(&mut self) -> &mut Self {
        self.set_alpha(RESTART_ALPHA)
    }

    /// Stops the loop; the next tick fires `end`.
    pub fn stop(&mut self) -> &mut Self {
        self.set_alpha(0.0)
    }

    fn kick(&mut self) {
        match self.host.schedule_tick() {
            Kick::Deferred => {}
            Kick::Immediate => {
                for _ in 0..self.config.max_sync_ticks {
                    if self.tick() {
                        return;
                    }
                }
                warn!(
                    max_sync_ticks = self.config.max_sync_ticks,
                    alpha = self.alpha,
                    "layout did not settle within the synchronous tick cap; stopping"
                );
                self.alpha = 0.0;
                self.tick();
            }
        }
    }

    fn trigger(&mut self, event: Event) {
        self.host.on_event(&event);
        for (event_type, listener) in &mut self.listeners {
            if *event_type == event.event_type {
                listener(&event);
            }
        }
    }

    /// One step of the loop. Returns `true` once the layout has ended.
    pub fn tick(&mut self) -> bool {
        let threshold = self.config.convergence_threshold;
        let step = match self.descent.as_mut() {
            Some(descent) if self.alpha >= threshold => {
                descent.locks.clear();
                for (i, o) in self.nodes.iter_mut().enumerate() {
                    if o.fixed {
                        let px = *o.px.get_or_insert(o.x);
                        let py = *o.py.get_or_insert(o.y);
                        descent.locks.add(i, vec![px, py]);
                    }
                }
                let displacement = descent.runge_kutta();
                Some((displacement, descent.compute_stress()))
            }
            _ => None,
        };

        let Some((displacement, stress)) = step else {
            self.running = false;
            self.alpha = 0.0;
            debug!(stress = self.last_stress, "layout ended");
            self.trigger(Event {
                event_type: EventType::End,
                alpha: 0.0,
                stress: self.last_stress,
            });
            return true;
        };

        if displacement == 0.0 {
            self.alpha = 0.0;
        } else if self.last_displacement.is_some() {
            self.alpha = displacement;
        }
        self.last_displacement = Some(displacement);
        self.last_stress = Some(stress);
        self.update_node_positions();
        trace!(alpha = self.alpha, displacement, stress, "tick");
        self.trigger(Event {
            event_type: EventType::Tick,
            alpha: self.alpha,
            stress: Some(stress),
        });
        false
    }

    /// Compresses the graph into a power graph, installs the resulting groups and returns them
    /// together with the retargeted edges. Existing groups are kept as fixed modules.
    pub fn power_graph_groups(&mut self) -> Result<PowerGraph> {
        let indices = self.resolve_links()?;
        self.refresh_hierarchy()?;
        let typed: Vec<(usize, usize, u32)> = self
            .links
            .iter()
            .zip(&indices)
            .map(|(l, &(u, v))| {
                let t = match &self.link_type {
                    Some(f) => f(l),
                    None => l.link_type.unwrap_or(0),
                };
                (u, v, t)
            })
            .collect();
        let graph = get_groups(self.nodes.len(), &typed, &self.groups, self.root_group.as_ref())?;
        self.set_groups(graph.groups.clone())?;
        Ok(graph)
    }

    fn node_box(&self, i: usize) -> Result<Rectangle> {
        let v = &self.nodes[i];
        v.bounds
            .or_else(|| v.sized_bounds())
            .ok_or(Error::MissingBounds { node: i })
    }

    /// Builds the visibility graph used by [`Layout::route_edge`] from every node's box shrunk
    /// by `node_margin`.
    pub fn prepare_edge_routing(&mut self, node_margin: f64) -> Result<&mut Self> {
        let polys = (0..self.nodes.len())
            .map(|i| Ok(self.node_box(i)?.inflate(-node_margin).vertices()))
            .collect::<Result<Vec<_>>>()?;
        self.visibility_graph = Some(TangentVisibilityGraph::new(polys));
        self.route_margin = node_margin;
        Ok(self)
    }

    /// Shortest obstacle-avoiding polyline for link `link`, from the source box boundary to
    /// `arrow_head` short of the target box. `draw` sees the visibility graph of this query.
    pub fn route_edge(
        &self,
        link: usize,
        arrow_head: f64,
        draw: Option<&mut dyn FnMut(&TangentVisibilityGraph)>,
    ) -> Result<Vec<Point>> {
        let vg = self.visibility_graph.as_ref().ok_or(Error::RoutingNotPrepared)?;
        let Some(&(s, t)) = self.resolve_links()?.get(link) else {
            return Err(Error::UnknownNode {
                link,
                node: "link index out of range".to_owned(),
            });
        };
        let (source, target) = (&self.nodes[s], &self.nodes[t]);
        let mut vg2 = vg.clone();
        let start = vg2.add_point(Point::new(source.x, source.y), Some(s));
        let end = vg2.add_point(Point::new(target.x, target.y), Some(t));
        vg2.add_edge_if_visible(start, end, Some(s), Some(t));
        if let Some(draw) = draw {
            draw(&vg2);
        }

        let calculator = Calculator::new(
            vg2.vertices.len(),
            &vg2.edges,
            |e| e.source,
            |e| e.target,
            |e| e.length(&vg2.vertices),
        )?;
        let path = calculator.path_from_node_to_node(start, end);
        let source_box = self.node_box(s)?.inflate(-self.route_margin);
        let target_box = self.node_box(t)?.inflate(-self.route_margin);

        if path.len() <= 2 {
            let clip = make_edge_between(&source_box, &target_box, arrow_head);
            return Ok(vec![clip.source_intersection, clip.arrow_start]);
        }
        let interior = &path[1..path.len() - 1];
        let first = vg2.vertices[interior[0]].p;
        let last = vg2.vertices[interior[interior.len() - 1]].p;
        let mut line = vec![
            source_box
                .ray_intersection(first)
                .unwrap_or_else(|| source_box.centre()),
        ];
        line.extend(interior.iter().map(|&i| vg2.vertices[i].p));
        line.push(make_edge_to(last, &target_box, arrow_head));
        Ok(line)
    }
}

/// The user matrix as an `big_n × big_n` matrix; entries for group corner points that the user
/// did not provide are infinite (ignored).
fn user_distances(user: &[Vec<f64>], n: usize, big_n: usize) -> Result<DMatrix<f64>> {
    let size = user.len();
    if (size != n && size != big_n) || user.iter().any(|row| row.len() != size) {
        let widths: Vec<String> = user.iter().map(|r| r.len().to_string()).collect();
        return Err(Error::DistanceMatrix {
            expected: n,
            found: format!("{size} rows of lengths [{}]", widths.join(", ")),
        });
    }
    Ok(DMatrix::from_fn(big_n, big_n, |i, j| {
        if i < size && j < size { user[i][j] } else { f64::INFINITY }
    }))
}
