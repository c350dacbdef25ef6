//! Axis-aligned rectangles and the sweep-line generation of non-overlap constraints.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::geom::{Point, line_intersection};
use crate::model::Axis;
use crate::vpsc::{Constraint, Solver, Variable};

/// Extra separation added to every generated non-overlap constraint.
pub const MIN_SEPARATION: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rectangle {
    #[serde(rename = "x")]
    pub min_x: f64,
    #[serde(rename = "X")]
    pub max_x: f64,
    #[serde(rename = "y")]
    pub min_y: f64,
    #[serde(rename = "Y")]
    pub max_y: f64,
}

impl Rectangle {
    pub const fn new(min_x: f64, max_x: f64, min_y: f64, max_y: f64) -> Self {
        Self {
            min_x,
            max_x,
            min_y,
            max_y,
        }
    }

    /// The identity for [`Rectangle::union`].
    pub const fn empty() -> Self {
        Self::new(
            f64::INFINITY,
            f64::NEG_INFINITY,
            f64::INFINITY,
            f64::NEG_INFINITY,
        )
    }

    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x || self.min_y > self.max_y
    }

    pub fn cx(&self) -> f64 {
        (self.min_x + self.max_x) / 2.0
    }

    pub fn cy(&self) -> f64 {
        (self.min_y + self.max_y) / 2.0
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn centre(&self) -> Point {
        Point::new(self.cx(), self.cy())
    }

    /// Overlap along x, measured from whichever rectangle's centre is further left. Zero if the
    /// x-ranges are disjoint.
    pub fn overlap_x(&self, r: &Rectangle) -> f64 {
        let (ux, vx) = (self.cx(), r.cx());
        if ux <= vx && r.min_x < self.max_x {
            return self.max_x - r.min_x;
        }
        if vx <= ux && self.min_x < r.max_x {
            return r.max_x - self.min_x;
        }
        0.0
    }

    pub fn overlap_y(&self, r: &Rectangle) -> f64 {
        let (uy, vy) = (self.cy(), r.cy());
        if uy <= vy && r.min_y < self.max_y {
            return self.max_y - r.min_y;
        }
        if vy <= uy && self.min_y < r.max_y {
            return r.max_y - self.min_y;
        }
        0.0
    }

    pub fn set_x_centre(&mut self, cx: f64) {
        let dx = cx - self.cx();
        self.min_x += dx;
        self.max_x += dx;
    }

    pub fn set_y_centre(&mut self, cy: f64) {
        let dy = cy - self.cy();
        self.min_y += dy;
        self.max_y += dy;
    }

    pub fn union(&self, r: &Rectangle) -> Rectangle {
        Rectangle::new(
            self.min_x.min(r.min_x),
            self.max_x.max(r.max_x),
            self.min_y.min(r.min_y),
            self.max_y.max(r.max_y),
        )
    }

    /// Grows every side by `pad`; a negative `pad` shrinks.
    pub fn inflate(&self, pad: f64) -> Rectangle {
        Rectangle::new(
            self.min_x - pad,
            self.max_x + pad,
            self.min_y - pad,
            self.max_y + pad,
        )
    }

    /// Area shared with `r`.
    pub fn intersection_area(&self, r: &Rectangle) -> f64 {
        let w = self.max_x.min(r.max_x) - self.min_x.max(r.min_x);
        let h = self.max_y.min(r.max_y) - self.min_y.max(r.min_y);
        if w > 0.0 && h > 0.0 { w * h } else { 0.0 }
    }

    /// Corners, clockwise on a y-down screen starting top-left.
    pub fn vertices(&self) -> Vec<Point> {
        vec![
            Point::new(self.min_x, self.min_y),
            Point::new(self.max_x, self.min_y),
            Point::new(self.max_x, self.max_y),
            Point::new(self.min_x, self.max_y),
        ]
    }

    /// Points where segment `a-b` crosses this rectangle's boundary, in side order
    /// (top, right, bottom, left).
    pub fn line_intersections(&self, a: Point, b: Point) -> Vec<Point> {
        let v = self.vertices();
        (0..4)
            .filter_map(|i| line_intersection(a, b, v[i], v[(i + 1) % 4]))
            .collect()
    }

    /// Where the ray from the centre towards `p` leaves the rectangle; `None` if `p` is inside.
    pub fn ray_intersection(&self, p: Point) -> Option<Point> {
        self.line_intersections(self.centre(), p).into_iter().next()
    }

    pub(crate) fn centre_on(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.cx(),
            Axis::Y => self.cy(),
        }
    }

    pub(crate) fn size_on(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.width(),
            Axis::Y => self.height(),
        }
    }

    /// Start of the extent on the sweep axis, i.e. the axis other than `axis`.
    pub(crate) fn open_on(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.min_y,
            Axis::Y => self.min_x,
        }
    }

    pub(crate) fn close_on(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.max_y,
            Axis::Y => self.max_x,
        }
    }

    /// Rectangle spanning `open..close` on the sweep axis and centred at `centre` with extent
    /// `size` along `axis`.
    pub(crate) fn on_axis(axis: Axis, open: f64, close: f64, centre: f64, size: f64) -> Rectangle {
        match axis {
            Axis::X => Rectangle::new(centre - size / 2.0, centre + size / 2.0, open, close),
            Axis::Y => Rectangle::new(open, close, centre - size / 2.0, centre + size / 2.0),
        }
    }
}

/// Endpoints of a straight edge between two boxes, clipped at their boundaries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeClip {
    pub source_intersection: Point,
    pub target_intersection: Point,
    /// Where the line stops to leave room for an arrow head of the requested length.
    pub arrow_start: Point,
}

pub fn make_edge_between(source: &Rectangle, target: &Rectangle, arrow_head_len: f64) -> EdgeClip {
    let si = source
        .ray_intersection(target.centre())
        .unwrap_or_else(|| source.centre());
    let ti = target
        .ray_intersection(source.centre())
        .unwrap_or_else(|| target.centre());
    let (dx, dy) = (ti.x - si.x, ti.y - si.y);
    let l = dx.hypot(dy);
    let arrow_start = if l > 0.0 {
        let al = l - arrow_head_len;
        Point::new(si.x + al * dx / l, si.y + al * dy / l)
    } else {
        ti
    };
    EdgeClip {
        source_intersection: si,
        target_intersection: ti,
        arrow_start,
    }
}

/// End point of an edge from `from` into `target`, stopping `arrow_head_len` short of the
/// boundary.
pub fn make_edge_to(from: Point, target: &Rectangle, arrow_head_len: f64) -> Point {
    let ti = target
        .ray_intersection(from)
        .unwrap_or_else(|| target.centre());
    let (dx, dy) = (ti.x - from.x, ti.y - from.y);
    let l = dx.hypot(dy);
    if l == 0.0 {
        return ti;
    }
    Point::new(ti.x - arrow_head_len * dx / l, ti.y - arrow_head_len * dy / l)
}

#[derive(Debug, Clone, Copy)]
struct ScanKey {
    pos: f64,
    id: usize,
}

impl PartialEq for ScanKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScanKey {}

impl PartialOrd for ScanKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScanKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.pos
            .total_cmp(&other.pos)
            .then(self.id.cmp(&other.id))
    }
}

struct SweepNode {
    var: usize,
    rect: Rectangle,
    key: ScanKey,
    prev: BTreeSet<ScanKey>,
    next: BTreeSet<ScanKey>,
}

/// Non-overlap constraints along `axis` for rectangles `rs`, whose centres are the solver
/// variables `vars[i]`.
///
/// Rectangles are swept along the other axis; a constraint is generated for each pair that
/// shares the scanline and is chosen as neighbours. Along x a pair qualifies when its x-overlap
/// is no larger than its y-overlap, along y only adjacent pairs that overlap in x qualify.
pub fn generate_constraints(
    rs: &[Rectangle],
    vars: &[usize],
    axis: Axis,
    min_sep: f64,
) -> Vec<Constraint> {
    let n = rs.len().min(vars.len());
    let mut nodes: Vec<SweepNode> = (0..n)
        .map(|i| SweepNode {
            var: vars[i],
            rect: rs[i],
            key: ScanKey {
                pos: rs[i].centre_on(axis),
                id: i,
            },
            prev: BTreeSet::new(),
            next: BTreeSet::new(),
        })
        .collect();

    // (position on the sweep axis, is_open, node)
    let mut events: Vec<(f64, bool, usize)> = Vec::with_capacity(2 * n);
    for (i, r) in rs.iter().take(n).enumerate() {
        events.push((r.open_on(axis), true, i));
        events.push((r.close_on(axis), false, i));
    }
    events.sort_by(|a, b| a.0.total_cmp(&b.0).then(b.1.cmp(&a.1)));

    let mut cs = Vec::new();
    let mut scanline: BTreeSet<ScanKey> = BTreeSet::new();
    for (_, is_open, v) in events {
        let key = nodes[v].key;
        if is_open {
            scanline.insert(key);
            match axis {
                Axis::X => find_x_neighbours(&mut nodes, &scanline, v),
                Axis::Y => find_y_neighbours(&mut nodes, &scanline, v),
            }
            continue;
        }
        scanline.remove(&key);
        let prev = std::mem::take(&mut nodes[v].prev);
        for u in prev.iter().rev() {
            cs.push(make_constraint(&nodes[u.id], &nodes[v], axis, min_sep));
            nodes[u.id].next.remove(&key);
        }
        let next = std::mem::take(&mut nodes[v].next);
        for u in &next {
            cs.push(make_constraint(&nodes[v], &nodes[u.id], axis, min_sep));
            nodes[u.id].prev.remove(&key);
        }
    }
    cs
}

fn make_constraint(l: &SweepNode, r: &SweepNode, axis: Axis, min_sep: f64) -> Constraint {
    let sep = (l.rect.size_on(axis) + r.rect.size_on(axis)) / 2.0 + min_sep;
    Constraint::new(l.var, r.var, sep)
}

fn link(nodes: &mut [SweepNode], left: usize, right: usize) {
    let (lk, rk) = (nodes[left].key, nodes[right].key);
    nodes[left].next.insert(rk);
    nodes[right].prev.insert(lk);
}

fn find_x_neighbours(nodes: &mut [SweepNode], scanline: &BTreeSet<ScanKey>, v: usize) {
    let key = nodes[v].key;
    let after: Vec<usize> = scanline.range(key..).skip(1).map(|k| k.id).collect();
    for u in after {
        let over_x = nodes[u].rect.overlap_x(&nodes[v].rect);
        if over_x <= 0.0 || over_x <= nodes[u].rect.overlap_y(&nodes[v].rect) {
            link(nodes, v, u);
        }
        if over_x <= 0.0 {
            break;
        }
    }
    let before: Vec<usize> = scanline.range(..key).rev().map(|k| k.id).collect();
    for u in before {
        let over_x = nodes[u].rect.overlap_x(&nodes[v].rect);
        if over_x <= 0.0 || over_x <= nodes[u].rect.overlap_y(&nodes[v].rect) {
            link(nodes, u, v);
        }
        if over_x <= 0.0 {
            break;
        }
    }
}

fn find_y_neighbours(nodes: &mut [SweepNode], scanline: &BTreeSet<ScanKey>, v: usize) {
    let key = nodes[v].key;
    if let Some(u) = scanline.range(key..).nth(1).map(|k| k.id) {
        if nodes[u].rect.overlap_x(&nodes[v].rect) > 0.0 {
            link(nodes, v, u);
        }
    }
    if let Some(u) = scanline.range(..key).next_back().map(|k| k.id) {
        if nodes[u].rect.overlap_x(&nodes[v].rect) > 0.0 {
            link(nodes, u, v);
        }
    }
}

pub fn generate_x_constraints(rs: &[Rectangle], vars: &[usize]) -> Vec<Constraint> {
    generate_constraints(rs, vars, Axis::X, MIN_SEPARATION)
}

pub fn generate_y_constraints(rs: &[Rectangle], vars: &[usize]) -> Vec<Constraint> {
    generate_constraints(rs, vars, Axis::Y, MIN_SEPARATION)
}

/// Moves rectangles apart so that none overlap, first along x and then along y, displacing
/// each as little as the constraints allow.
pub fn remove_overlaps(rs: &mut [Rectangle]) -> Result<()> {
    let ids: Vec<usize> = (0..rs.len()).collect();
    for axis in [Axis::X, Axis::Y] {
        let vs: Vec<Variable> = rs.iter().map(|r| Variable::new(r.centre_on(axis))).collect();
        let cs = generate_constraints(rs, &ids, axis, MIN_SEPARATION);
        let mut solver = Solver::new(vs, cs)?;
        solver.solve();
        for (i, r) in rs.iter_mut().enumerate() {
            match axis {
                Axis::X => r.set_x_centre(solver.position(i)),
                Axis::Y => r.set_y_centre(solver.position(i)),
            }
        }
    }
    Ok(())
}
