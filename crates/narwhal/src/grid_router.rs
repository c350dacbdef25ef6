//! Orthogonal edge routing over a grid of lines derived from the node layout.
//!
//! The input is a rose tree of boxes: leaves are nodes, inner items are groups. Routing lines
//! run through the centres of the leaf rows and columns and through the gaps between them;
//! their crossings and their intersections with node boundaries form the routing graph.

use std::fmt;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geom::Point;
use crate::model::{Axis, Group, Node};
use crate::rectangle::Rectangle;
use crate::shortest_paths::Calculator;
use crate::vpsc::{Constraint, Solver, Variable};

/// Cost added for every bend in a route.
const BEND_PENALTY: f64 = 1000.0;
/// Coordinates closer than this are treated as equal when grouping segments.
const SEGMENT_TOLERANCE: f64 = 0.1;

/// One straight piece of a route, from `[0]` to `[1]`.
pub type Segment = [Point; 2];

/// Reads the routing tree out of the caller's node type.
pub trait NodeAccessor<N> {
    /// Indices of the items directly inside `node`; empty for leaves.
    fn children(&self, node: &N) -> Vec<usize>;
    fn bounds(&self, node: &N) -> Rectangle;
}

impl<N, C, B> NodeAccessor<N> for (C, B)
where
    C: Fn(&N) -> Vec<usize>,
    B: Fn(&N) -> Rectangle,
{
    fn children(&self, node: &N) -> Vec<usize> {
        (self.0)(node)
    }

    fn bounds(&self, node: &N) -> Rectangle {
        (self.1)(node)
    }
}

#[derive(Debug, Clone)]
pub struct GridNode {
    pub id: usize,
    pub rect: Rectangle,
    pub children: Vec<usize>,
    pub leaf: bool,
    pub parent: Option<usize>,
    /// Routing vertices on this node's boundary.
    pub ports: Vec<usize>,
}

/// A row or column of leaves that overlap along the line's axis.
#[derive(Debug, Clone, PartialEq)]
pub struct GridLine {
    pub nodes: Vec<usize>,
    pub pos: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridVertex {
    pub id: usize,
    pub x: f64,
    pub y: f64,
    /// The innermost node covering this vertex, or whose boundary it lies on.
    pub node: Option<usize>,
}

impl GridVertex {
    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridEdge {
    pub source: usize,
    pub target: usize,
    pub length: f64,
}

#[derive(Debug)]
struct RoutingLine {
    a: Point,
    b: Point,
    verts: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct GridRouter {
    pub nodes: Vec<GridNode>,
    pub leaves: Vec<usize>,
    pub groups: Vec<usize>,
    pub cols: Vec<GridLine>,
    pub rows: Vec<GridLine>,
    pub verts: Vec<GridVertex>,
    pub edges: Vec<GridEdge>,
    pub group_padding: f64,
    root_children: Vec<usize>,
    back_to_front: Vec<usize>,
}

/// A box in the routing tree built by [`GridRouter::from_layout`].
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingNode {
    pub bounds: Rectangle,
    pub children: Vec<usize>,
}

impl GridRouter {
    pub const DEFAULT_GROUP_PADDING: f64 = 12.0;

    /// Builds the routing graph. Group boxes are recomputed as the union of their children,
    /// inflated by `group_padding`.
    pub fn new<N>(items: &[N], accessor: &impl NodeAccessor<N>, group_padding: f64) -> Result<Self> {
        let mut nodes: Vec<GridNode> = items
            .iter()
            .enumerate()
            .map(|(id, v)| {
                let children = accessor.children(v);
                GridNode {
                    id,
                    rect: accessor.bounds(v),
                    leaf: children.is_empty(),
                    children,
                    parent: None,
                    ports: Vec::new(),
                }
            })
            .collect();
        let count = nodes.len();
        for g in 0..count {
            for ci in 0..nodes[g].children.len() {
                let c = nodes[g].children[ci];
                if c >= count {
                    return Err(Error::NodeOutOfRange { index: c, count });
                }
                if c == g || nodes[c].parent.is_some() {
                    return Err(Error::GroupCycle { index: c });
                }
                nodes[c].parent = Some(g);
            }
        }
        let mut depths = Vec::with_capacity(count);
        for v in 0..count {
            depths.push(depth(&nodes, v).ok_or(Error::GroupCycle { index: v })?);
        }

        let leaves: Vec<usize> = (0..count).filter(|&v| nodes[v].leaf).collect();
        if leaves.is_empty() {
            return Err(Error::EmptyInput {
                what: "routing leaves",
            });
        }
        let groups: Vec<usize> = (0..count).filter(|&v| !nodes[v].leaf).collect();
        let root_children: Vec<usize> = (0..count).filter(|&v| nodes[v].parent.is_none()).collect();
        let mut back_to_front: Vec<usize> = (0..count).collect();
        back_to_front.sort_by_key(|&v| depths[v]);

        for &g in back_to_front.iter().rev() {
            if nodes[g].leaf {
                continue;
            }
            let r = nodes[g]
                .children
                .iter()
                .fold(Rectangle::empty(), |r, &c| r.union(&nodes[c].rect));
            nodes[g].rect = r.inflate(group_padding);
        }

        let cols = grid_lines(&nodes, &leaves, Axis::X);
        let rows = grid_lines(&nodes, &leaves, Axis::Y);
        let extent = nodes
            .iter()
            .fold(Rectangle::empty(), |r, v| r.union(&v.rect));
        let col_mids = mid_points(
            &cols.iter().map(|c| c.pos).collect::<Vec<_>>(),
            (extent.min_x, extent.max_x),
            group_padding,
        );
        let row_mids = mid_points(
            &rows.iter().map(|r| r.pos).collect::<Vec<_>>(),
            (extent.min_y, extent.max_y),
            group_padding,
        );
        let (row_x1, row_x2) = (col_mids[0], col_mids[col_mids.len() - 1]);
        let (col_y1, col_y2) = (row_mids[0], row_mids[row_mids.len() - 1]);

        let horizontal = |y: f64| RoutingLine {
            a: Point::new(row_x1, y),
            b: Point::new(row_x2, y),
            verts: Vec::new(),
        };
        let vertical = |x: f64| RoutingLine {
            a: Point::new(x, col_y1),
            b: Point::new(x, col_y2),
            verts: Vec::new(),
        };
        let mut hlines: Vec<RoutingLine> = rows
            .iter()
            .map(|r| r.pos)
            .chain(row_mids.iter().copied())
            .map(horizontal)
            .collect();
        let mut vlines: Vec<RoutingLine> = cols
            .iter()
            .map(|c| c.pos)
            .chain(col_mids.iter().copied())
            .map(vertical)
            .collect();

        let mut verts: Vec<GridVertex> = Vec::new();
        for h in &mut hlines {
            for v in &mut vlines {
                let (x, y) = (v.a.x, h.a.y);
                let node = back_to_front.iter().rev().copied().find(|&i| {
                    let r = &nodes[i].rect;
                    (x - r.cx()).abs() < r.width() / 2.0 && (y - r.cy()).abs() < r.height() / 2.0
                });
                let id = verts.len();
                verts.push(GridVertex { id, x, y, node });
                h.verts.push(id);
                v.verts.push(id);
            }
        }

        let mut edges = Vec::new();
        for (l, is_horizontal) in hlines
            .iter_mut()
            .map(|l| (l, true))
            .chain(vlines.iter_mut().map(|l| (l, false)))
        {
            for v in nodes.iter_mut() {
                for p in v.rect.line_intersections(l.a, l.b) {
                    let id = verts.len();
                    verts.push(GridVertex {
                        id,
                        x: p.x,
                        y: p.y,
                        node: Some(v.id),
                    });
                    l.verts.push(id);
                    v.ports.push(id);
                }
            }
            let along = |id: &usize| {
                if is_horizontal {
                    verts[*id].x
                } else {
                    verts[*id].y
                }
            };
            l.verts.sort_by(|a, b| along(a).total_cmp(&along(b)));
            for w in l.verts.windows(2) {
                let (u, v) = (&verts[w[0]], &verts[w[1]]);
                if let Some(n) = u.node {
                    if u.node == v.node && nodes[n].leaf {
                        continue;
                    }
                }
                edges.push(GridEdge {
                    source: u.id,
                    target: v.id,
                    length: (along(&w[1]) - along(&w[0])).abs(),
                });
            }
        }
        tracing::debug!(
            nodes = count,
            cols = cols.len(),
            rows = rows.len(),
            verts = verts.len(),
            edges = edges.len(),
            "built routing grid"
        );

        Ok(Self {
            nodes,
            leaves,
            groups,
            cols,
            rows,
            verts,
            edges,
            group_padding,
            root_children,
            back_to_front,
        })
    }

    /// Routing tree over layout nodes followed by one item per group (item `nodes.len() + g`
    /// for group `g`). Nodes need bounds or a size.
    pub fn from_layout(nodes: &[Node], groups: &[Group], group_padding: f64) -> Result<Self> {
        let n = nodes.len();
        let mut items = Vec::with_capacity(n + groups.len());
        for (i, v) in nodes.iter().enumerate() {
            let bounds = v
                .bounds
                .or_else(|| v.sized_bounds())
                .ok_or(Error::MissingBounds { node: i })?;
            items.push(RoutingNode {
                bounds,
                children: Vec::new(),
            });
        }
        for g in groups {
            items.push(RoutingNode {
                bounds: g.bounds.unwrap_or_else(Rectangle::empty),
                children: g
                    .leaves
                    .iter()
                    .copied()
                    .chain(g.groups.iter().map(|&c| n + c))
                    .collect(),
            });
        }
        let accessor = (
            |v: &RoutingNode| v.children.clone(),
            |v: &RoutingNode| v.bounds,
        );
        Self::new(&items, &accessor, group_padding)
    }

    fn children_of(&self, v: Option<usize>) -> &[usize] {
        match v {
            Some(v) => &self.nodes[v].children,
            None => &self.root_children,
        }
    }

    /// `v` and its ancestors, outermost first.
    fn lineage(&self, v: usize) -> Vec<usize> {
        let mut lineage = vec![v];
        let mut u = v;
        while let Some(p) = self.nodes[u].parent {
            lineage.push(p);
            u = p;
        }
        lineage.reverse();
        lineage
    }

    /// Siblings of `a`, `b` and their ancestors below the lowest common ancestor. These are
    /// the boxes a route between `a` and `b` must go around.
    pub fn sibling_obstacles(&self, a: usize, b: usize) -> Vec<usize> {
        let (aa, ba) = (self.lineage(a), self.lineage(b));
        let shared = aa.iter().zip(&ba).take_while(|(x, y)| x == y).count();
        let common = shared.checked_sub(1).map(|i| aa[i]);
        let lineages: Vec<usize> = aa[shared..].iter().chain(&ba[shared..]).copied().collect();
        let on_path: FxHashSet<usize> = lineages.iter().copied().collect();

        let mut obstacles: Vec<usize> = self
            .children_of(common)
            .iter()
            .copied()
            .filter(|v| !on_path.contains(v))
            .collect();
        for &v in &lineages {
            let parent = self.nodes[v].parent;
            if parent == common {
                continue;
            }
            obstacles.extend(self.children_of(parent).iter().copied().filter(|&c| c != v));
        }
        obstacles
    }

    /// Grid vertices along the cheapest route from node `s` to node `t`, from a port on `s`'s
    /// boundary to a port on `t`'s. Every bend costs [`BEND_PENALTY`].
    pub fn route(&self, s: usize, t: usize) -> Result<Vec<GridVertex>> {
        let count = self.nodes.len();
        for index in [s, t] {
            if index >= count {
                return Err(Error::NodeOutOfRange { index, count });
            }
        }
        let (source, target) = (&self.nodes[s], &self.nodes[t]);
        let (Some(&source_port), Some(&target_port)) = (source.ports.first(), target.ports.first())
        else {
            return Err(Error::EmptyInput {
                what: "ports of a routed node",
            });
        };

        let obstacles: FxHashSet<usize> = self.sibling_obstacles(s, t).into_iter().collect();
        let blocked = |v: &GridVertex| v.node.is_some_and(|n| obstacles.contains(&n));
        let mut passable: Vec<GridEdge> = self
            .edges
            .iter()
            .filter(|e| !blocked(&self.verts[e.source]) && !blocked(&self.verts[e.target]))
            .copied()
            .collect();
        for ports in [&source.ports, &target.ports] {
            passable.extend(ports[1..].iter().map(|&v| GridEdge {
                source: ports[0],
                target: v,
                length: 0.0,
            }));
        }

        let calculator = Calculator::new(
            self.verts.len(),
            &passable,
            |e| e.source,
            |e| e.target,
            |e| e.length,
        )?;
        let bend_penalty = |u: usize, v: usize, w: usize| {
            let (a, b, c) = (&self.verts[u], &self.verts[v], &self.verts[w]);
            if (a.node == Some(s) && a.node == b.node) || (b.node == Some(t) && b.node == c.node) {
                return 0.0;
            }
            let (dx, dy) = ((c.x - a.x).abs(), (c.y - a.y).abs());
            if dx > 1.0 && dy > 1.0 { BEND_PENALTY } else { 0.0 }
        };
        let mut path =
            calculator.path_from_node_to_node_with_prev_cost(source_port, target_port, bend_penalty);
        if path.is_empty() {
            tracing::debug!(source = s, target = t, "no grid route; joining ports directly");
            path = vec![source_port, target_port];
        }

        let points: Vec<GridVertex> = path.iter().map(|&i| self.verts[i]).collect();
        let last = points.len() - 1;
        Ok(points
            .iter()
            .enumerate()
            .filter(|&(i, v)| {
                let inside_source = i < last && points[i + 1].node == Some(s) && v.node == Some(s);
                let inside_target = i > 0 && v.node == Some(t) && points[i - 1].node == Some(t);
                !(inside_source || inside_target)
            })
            .map(|(_, v)| *v)
            .collect())
    }

    /// Routes every `(source, target)` pair and nudges parallel segments that share a
    /// corridor `nudge_gap` apart. Each route is a list of segments from source to target.
    pub fn route_edges(&self, edges: &[(usize, usize)], nudge_gap: f64) -> Result<Vec<Vec<Segment>>> {
        let mut route_paths = edges
            .iter()
            .map(|&(s, t)| self.route(s, t))
            .collect::<Result<Vec<_>>>()?;
        let order = order_edges(&mut route_paths);
        let mut routes: Vec<Vec<Segment>> = route_paths
            .iter()
            .map(|p| make_segments(&p.iter().map(GridVertex::point).collect::<Vec<_>>()))
            .collect();
        let left_of = |l: usize, r: usize| order.left_of(l, r);
        nudge_segments(&mut routes, Axis::X, left_of, nudge_gap);
        nudge_segments(&mut routes, Axis::Y, left_of, nudge_gap);
        unreverse_edges(&mut routes, &order.reversed);
        Ok(routes)
    }

    /// Items ordered from the outermost group inwards.
    pub fn back_to_front(&self) -> &[usize] {
        &self.back_to_front
    }
}

fn depth(nodes: &[GridNode], v: usize) -> Option<usize> {
    let mut d = 0;
    let mut u = v;
    while let Some(p) = nodes[u].parent {
        d += 1;
        if d > nodes.len() {
            return None;
        }
        u = p;
    }
    Some(d)
}

fn overlap(a: &Rectangle, b: &Rectangle, axis: Axis) -> f64 {
    match axis {
        Axis::X => a.overlap_x(b),
        Axis::Y => a.overlap_y(b),
    }
}

fn grid_lines(nodes: &[GridNode], leaves: &[usize], axis: Axis) -> Vec<GridLine> {
    let mut lines = Vec::new();
    let mut ls = leaves.to_vec();
    while let Some(&first) = ls.first() {
        let r0 = nodes[first].rect;
        let (overlapping, rest): (Vec<usize>, Vec<usize>) = ls
            .iter()
            .partition(|&&v| v == first || overlap(&nodes[v].rect, &r0, axis) > 0.0);
        let pos = overlapping
            .iter()
            .map(|&v| nodes[v].rect.centre_on(axis))
            .sum::<f64>()
            / overlapping.len() as f64;
        lines.push(GridLine {
            nodes: overlapping,
            pos,
        });
        ls = rest;
    }
    lines.sort_by(|a, b| a.pos.total_cmp(&b.pos));
    lines
}

/// Positions half-way between consecutive lines, plus one beyond each end. A lone line gets
/// neighbours just outside `extent`.
fn mid_points(a: &[f64], extent: (f64, f64), padding: f64) -> Vec<f64> {
    match a {
        [] => vec![extent.0 - padding, extent.1 + padding],
        [only] => vec![extent.0.min(*only) - padding, extent.1.max(*only) + padding],
        [first, second, ..] => {
            let gap = second - first;
            let mut mids = vec![first - gap / 2.0];
            mids.extend(a.windows(2).map(|w| (w[0] + w[1]) / 2.0));
            mids.push(a[a.len() - 1] + gap / 2.0);
            mids
        }
    }
}

/// Longest run of consecutive elements shared by two sequences, also trying `t` reversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LongestCommonSubpath {
    pub length: usize,
    pub si: usize,
    /// Start in `t`, counted in `t`'s own direction even when the match was found reversed.
    pub ti: usize,
    pub reversed: bool,
}

impl LongestCommonSubpath {
    pub fn new<T: PartialEq>(s: &[T], t: &[T]) -> Self {
        let forward = find_match(s, t.iter());
        let backward = find_match(s, t.iter().rev());
        if forward.0 >= backward.0 {
            Self {
                length: forward.0,
                si: forward.1,
                ti: forward.2,
                reversed: false,
            }
        } else {
            Self {
                length: backward.0,
                si: backward.1,
                ti: t.len() - backward.2 - backward.0,
                reversed: true,
            }
        }
    }
}

/// `(length, start in s, start in t)` of the longest common run.
fn find_match<'a, T: PartialEq + 'a>(
    s: &[T],
    t: impl Iterator<Item = &'a T> + Clone,
) -> (usize, usize, usize) {
    let n = t.clone().count();
    let mut best = (0, 0, 0);
    let mut prev = vec![0usize; n];
    let mut row = vec![0usize; n];
    for (i, a) in s.iter().enumerate() {
        for (j, b) in t.clone().enumerate() {
            row[j] = if a == b {
                if j == 0 { 1 } else { prev[j - 1] + 1 }
            } else {
                0
            };
            let v = row[j];
            if v > best.0 {
                best = (v, i + 1 - v, j + 1 - v);
            }
        }
        std::mem::swap(&mut prev, &mut row);
    }
    best
}

/// Which routes go left of which, and which route paths were reversed to compare them.
#[derive(Debug, Clone, Default)]
pub struct EdgeOrder {
    pairs: FxHashSet<(usize, usize)>,
    pub reversed: Vec<bool>,
}

impl EdgeOrder {
    pub fn left_of(&self, l: usize, r: usize) -> bool {
        self.pairs.contains(&(l, r))
    }
}

fn is_left_turn(a: &GridVertex, b: &GridVertex, c: &GridVertex) -> bool {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x) <= 0.0
}

/// Decides, for every pair of routes that share a subpath, which one runs on the left so that
/// nudging does not make them cross. Routes may be reversed in place so that shared subpaths
/// run the same way; [`EdgeOrder::reversed`] records which.
pub fn order_edges(edges: &mut [Vec<GridVertex>]) -> EdgeOrder {
    let mut order = EdgeOrder {
        pairs: FxHashSet::default(),
        reversed: vec![false; edges.len()],
    };
    for i in 0..edges.len() {
        for j in i + 1..edges.len() {
            let mut lcs = LongestCommonSubpath::new(&edges[i], &edges[j]);
            if lcs.length == 0 {
                continue;
            }
            if lcs.reversed {
                edges[j].reverse();
                order.reversed[j] = !order.reversed[j];
                lcs = LongestCommonSubpath::new(&edges[i], &edges[j]);
            }
            let (e, f) = (edges[i].as_slice(), edges[j].as_slice());
            let runs_to_end = lcs.si + lcs.length >= e.len() || lcs.ti + lcs.length >= f.len();
            if (lcs.si == 0 || lcs.ti == 0) && runs_to_end {
                // the paths never diverge
                order.pairs.insert((i, j));
                continue;
            }
            let at = |p: &[GridVertex], k: isize| usize::try_from(k).ok().and_then(|k| p.get(k).copied());
            let (si, ti, len) = (lcs.si as isize, lcs.ti as isize, lcs.length as isize);
            let (u, vi, vj) = if runs_to_end {
                (at(e, si + 1), at(f, ti - 1), at(e, si - 1))
            } else {
                (at(e, si + len - 2), at(e, si + len), at(f, ti + len))
            };
            match (u, vi, vj) {
                (Some(u), Some(vi), Some(vj)) if is_left_turn(&u, &vi, &vj) => {
                    order.pairs.insert((j, i));
                }
                _ => {
                    order.pairs.insert((i, j));
                }
            }
        }
    }
    order
}

/// Segments of an orthogonal path; consecutive collinear steps merge into one segment.
pub fn make_segments(path: &[Point]) -> Vec<Segment> {
    let is_straight = |a: Point, b: Point, c: Point| {
        ((b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)).abs() < 0.001
    };
    let Some(&first) = path.first() else {
        return Vec::new();
    };
    let mut segments = Vec::new();
    let mut a = first;
    for i in 1..path.len() {
        let b = path[i];
        let straight = path.get(i + 1).is_some_and(|&c| is_straight(a, b, c));
        if !straight {
            segments.push([a, b]);
            a = b;
        }
    }
    segments
}

fn coord(p: &Point, axis: Axis) -> f64 {
    match axis {
        Axis::X => p.x,
        Axis::Y => p.y,
    }
}

fn set_coord(p: &mut Point, axis: Axis, v: f64) {
    match axis {
        Axis::X => p.x = v,
        Axis::Y => p.y = v,
    }
}

/// Segments of one route sharing a position along the nudged axis; `(route, segment)` pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentSet {
    pub pos: f64,
    pub segments: Vec<(usize, usize)>,
}

/// Segments that keep a constant `axis` coordinate, grouped by that coordinate.
pub fn segment_sets(routes: &[Vec<Segment>], axis: Axis) -> Vec<SegmentSet> {
    let mut segments: Vec<(usize, usize)> = routes
        .iter()
        .enumerate()
        .flat_map(|(ei, route)| {
            route.iter().enumerate().filter_map(move |(si, s)| {
                ((coord(&s[1], axis) - coord(&s[0], axis)).abs() < SEGMENT_TOLERANCE).then_some((ei, si))
            })
        })
        .collect();
    let at = |&(ei, si): &(usize, usize)| coord(&routes[ei][si][0], axis);
    segments.sort_by(|a, b| at(a).total_cmp(&at(b)));

    let mut sets: Vec<SegmentSet> = Vec::new();
    for s in segments {
        let pos = at(&s);
        match sets.last_mut() {
            Some(set) if (pos - set.pos).abs() <= SEGMENT_TOLERANCE => set.segments.push(s),
            _ => sets.push(SegmentSet {
                pos,
                segments: vec![s],
            }),
        }
    }
    sets
}

fn nudge_segs(
    axis: Axis,
    routes: &mut [Vec<Segment>],
    segments: &[(usize, usize)],
    left_of: impl Fn(usize, usize) -> bool,
    gap: f64,
) {
    let n = segments.len();
    if n <= 1 {
        return;
    }
    let along = axis.other();
    let vs: Vec<Variable> = segments
        .iter()
        .map(|&(ei, si)| Variable::new(coord(&routes[ei][si][0], axis)))
        .collect();
    let mut cs = Vec::new();
    for i in 0..n {
        for j in 0..n {
            if i == j || !left_of(segments[i].0, segments[j].0) {
                continue;
            }
            let s1 = &routes[segments[i].0][segments[i].1];
            let increasing = coord(&s1[0], along) < coord(&s1[1], along);
            // on screen the left segment of a vertical bundle moves right when heading down
            let (l, r) = match (axis, increasing) {
                (Axis::X, true) | (Axis::Y, false) => (j, i),
                (Axis::X, false) | (Axis::Y, true) => (i, j),
            };
            cs.push(Constraint::new(l, r, gap));
        }
    }
    let mut solver = match Solver::new(vs, cs) {
        Ok(solver) => solver,
        Err(err) => {
            tracing::warn!(%err, "skipping segment nudge");
            return;
        }
    };
    solver.solve();
    for (i, &(ei, si)) in segments.iter().enumerate() {
        let pos = solver.position(i);
        let route = &mut routes[ei];
        set_coord(&mut route[si][0], axis, pos);
        set_coord(&mut route[si][1], axis, pos);
        if si > 0 {
            set_coord(&mut route[si - 1][1], axis, pos);
        }
        if si + 1 < route.len() {
            set_coord(&mut route[si + 1][0], axis, pos);
        }
    }
}

/// Spreads apart segments that run along the same line with overlapping extents. `axis` is
/// the coordinate that gets adjusted; `left_of(a, b)` says route `a` should stay left of `b`.
pub fn nudge_segments(
    routes: &mut [Vec<Segment>],
    axis: Axis,
    left_of: impl Fn(usize, usize) -> bool + Copy,
    gap: f64,
) {
    let along = axis.other();
    for set in segment_sets(routes, axis) {
        // (pos, is_close, segment)
        let mut events: Vec<(f64, bool, (usize, usize))> = Vec::with_capacity(2 * set.segments.len());
        for &(ei, si) in &set.segments {
            let s = &routes[ei][si];
            let (a, b) = (coord(&s[0], along), coord(&s[1], along));
            events.push((a.min(b), false, (ei, si)));
            events.push((a.max(b), true, (ei, si)));
        }
        events.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        let mut open = Vec::new();
        let mut open_count = 0usize;
        for (_, is_close, s) in events {
            if is_close {
                open_count = open_count.saturating_sub(1);
            } else {
                open.push(s);
                open_count += 1;
            }
            if open_count == 0 {
                nudge_segs(axis, routes, &open, left_of, gap);
                open.clear();
            }
        }
    }
}

/// Puts routes that [`order_edges`] reversed back into source-to-target order.
pub fn unreverse_edges(routes: &mut [Vec<Segment>], reversed: &[bool]) {
    for (segments, _) in routes.iter_mut().zip(reversed).filter(|(_, r)| **r) {
        segments.reverse();
        for s in segments.iter_mut() {
            s.reverse();
        }
    }
}

/// Signed angle between the directions of two lines, folded into `[-π, π]`.
pub fn angle_between_2_lines(line1: &Segment, line2: &Segment) -> f64 {
    let angle1 = (line1[0].y - line1[1].y).atan2(line1[0].x - line1[1].x);
    let angle2 = (line2[0].y - line2[1].y).atan2(line2[0].x - line2[1].x);
    let diff = angle1 - angle2;
    if diff > std::f64::consts::PI || diff < -std::f64::consts::PI {
        angle2 - angle1
    } else {
        diff
    }
}

/// One SVG path command.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PathCommand {
    MoveTo(Point),
    LineTo(Point),
    /// Elliptical arc with the given radii; `sweep` is the SVG sweep flag.
    Arc { rx: f64, ry: f64, sweep: bool, to: Point },
}

impl fmt::Display for PathCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathCommand::MoveTo(p) => write!(f, "M {} {}", p.x, p.y),
            PathCommand::LineTo(p) => write!(f, "L {} {}", p.x, p.y),
            PathCommand::Arc { rx, ry, sweep, to } => {
                write!(f, "A {} {} 0 0 {} {} {}", rx, ry, u8::from(*sweep), to.x, to.y)
            }
        }
    }
}

/// A rounded route line and its arrowhead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutePath {
    pub route: Vec<PathCommand>,
    pub arrow: Vec<PathCommand>,
}

impl RoutePath {
    pub fn route_svg(&self) -> String {
        join(&self.route)
    }

    pub fn arrow_svg(&self) -> String {
        join(&self.arrow)
    }
}

fn join(cmds: &[PathCommand]) -> String {
    cmds.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ")
}

fn unit(d: f64) -> f64 {
    if d == 0.0 { 0.0 } else { d.signum() }
}

/// Path commands for an orthogonal route with corners rounded by `corner_radius`. The line
/// stops `arrow_height` short of the end, where an arrowhead `2 * arrow_width` wide begins.
pub fn route_path(route: &[Segment], corner_radius: f64, arrow_width: f64, arrow_height: f64) -> RoutePath {
    let Some(first) = route.first() else {
        return RoutePath::default();
    };
    let mut path = RoutePath {
        route: vec![PathCommand::MoveTo(first[0])],
        arrow: Vec::new(),
    };
    for (i, li) in route.iter().enumerate() {
        let (mut x, mut y) = (li[1].x, li[1].y);
        let (dx, dy) = (x - li[0].x, y - li[0].y);
        if let Some(l) = route.get(i + 1) {
            if dx.abs() > 0.0 {
                x -= unit(dx) * corner_radius;
            } else {
                y -= unit(dy) * corner_radius;
            }
            path.route.push(PathCommand::LineTo(Point::new(x, y)));
            let (x0, y0) = (l[0].x, l[0].y);
            let (dx, dy) = (l[1].x - x0, l[1].y - y0);
            let (x2, y2) = if dx.abs() > 0.0 {
                (x0 + unit(dx) * corner_radius, y0)
            } else {
                (x0, y0 + unit(dy) * corner_radius)
            };
            path.route.push(PathCommand::Arc {
                rx: (x2 - x).abs(),
                ry: (y2 - y).abs(),
                sweep: angle_between_2_lines(li, l) < 0.0,
                to: Point::new(x2, y2),
            });
        } else {
            let tip = Point::new(x, y);
            let (corner1, corner2) = if dx.abs() > 0.0 {
                x -= unit(dx) * arrow_height;
                (Point::new(x, y + arrow_width), Point::new(x, y - arrow_width))
            } else {
                y -= unit(dy) * arrow_height;
                (Point::new(x + arrow_width, y), Point::new(x - arrow_width, y))
            };
            path.route.push(PathCommand::LineTo(Point::new(x, y)));
            if arrow_height > 0.0 {
                path.arrow = vec![
                    PathCommand::MoveTo(tip),
                    PathCommand::LineTo(corner1),
                    PathCommand::LineTo(corner2),
                ];
            }
        }
    }
    path
}
