//! Planar geometry used by edge routing: convex hulls, polygon tangents and the tangent
//! visibility graph.
//!
//! Polygons are slices of [`Point`]s in hull order and are treated as closed (the last vertex
//! connects back to the first).

use std::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

/// Cross products within this distance of zero count as collinear.
const COLLINEAR_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn squared_distance_to(self, other: Point) -> f64 {
        let (dx, dy) = (self.x - other.x, self.y - other.y);
        dx * dx + dy * dy
    }
}

impl Add for Point {
    type Output = Point;
    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;
    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Point {
    type Output = Point;
    fn mul(self, rhs: f64) -> Point {
        Point::new(self.x * rhs, self.y * rhs)
    }
}

/// Positive if `p2` is left of the directed line `p0 -> p1`, negative if right, zero if on it.
pub fn is_left(p0: Point, p1: Point, p2: Point) -> f64 {
    (p1.x - p0.x) * (p2.y - p0.y) - (p2.x - p0.x) * (p1.y - p0.y)
}

/// Intersection point of segments `a1-a2` and `b1-b2`, endpoints included.
///
/// Parallel (including collinear) segments never intersect.
pub fn line_intersection(a1: Point, a2: Point, b1: Point, b2: Point) -> Option<Point> {
    let (dx12, dy12) = (a2.x - a1.x, a2.y - a1.y);
    let (dx34, dy34) = (b2.x - b1.x, b2.y - b1.y);
    let denominator = dy34 * dx12 - dx34 * dy12;
    if denominator == 0.0 {
        return None;
    }
    let (dx31, dy31) = (a1.x - b1.x, a1.y - b1.y);
    let a = (dx34 * dy31 - dy34 * dx31) / denominator;
    let b = (dx12 * dy31 - dy12 * dx31) / denominator;
    if (0.0..=1.0).contains(&a) && (0.0..=1.0).contains(&b) {
        Some(Point::new(a1.x + a * dx12, a1.y + a * dy12))
    } else {
        None
    }
}

/// Points where segment `a-b` crosses the boundary of the closed polygon `poly`.
pub fn intersects(a: Point, b: Point, poly: &[Point]) -> Vec<Point> {
    closed_edges(poly)
        .filter_map(|(p, q)| line_intersection(a, b, p, q))
        .collect()
}

fn closed_edges(poly: &[Point]) -> impl Iterator<Item = (Point, Point)> + '_ {
    let n = poly.len();
    let count = if n > 1 { n } else { 0 };
    (0..count).map(move |i| (poly[i], poly[(i + 1) % n]))
}

/// Convex hull by Andrew's monotone chain.
///
/// Points are sorted by x then y; collinear points on the hull boundary are dropped, so four
/// collinear points yield only their two endpoints. The result winds counter-clockwise in
/// y-up coordinates (clockwise on a y-down screen), starting from the lowest-x point.
pub fn convex_hull(points: &[Point]) -> Vec<Point> {
    let mut ps: Vec<Point> = points.to_vec();
    ps.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    ps.dedup();
    if ps.len() < 3 {
        return ps;
    }

    let mut lower: Vec<Point> = Vec::with_capacity(ps.len());
    for &p in &ps {
        while lower.len() >= 2 && is_left(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(p);
    }
    let mut upper: Vec<Point> = Vec::with_capacity(ps.len());
    for &p in ps.iter().rev() {
        while upper.len() >= 2 && is_left(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Indices of the two tangent vertices of `poly` as seen from `p`.
///
/// `rtan` has the whole polygon on the left of the ray `p -> poly[rtan]`, `ltan` on the right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointTangents {
    pub rtan: usize,
    pub ltan: usize,
}

/// Tangents from a point to a convex polygon; `None` when `p` lies inside it or the polygon is
/// empty.
pub fn tangent_point_poly(p: Point, poly: &[Point]) -> Option<PointTangents> {
    let rtan = (0..poly.len()).find(|&i| all_on_side(p, poly[i], poly, Side::Left))?;
    let ltan = (0..poly.len()).find(|&i| all_on_side(p, poly[i], poly, Side::Right))?;
    Some(PointTangents { rtan, ltan })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

fn all_on_side(a: Point, b: Point, poly: &[Point], side: Side) -> bool {
    if a == b {
        return false;
    }
    poly.iter().all(|&q| {
        let s = is_left(a, b, q);
        match side {
            Side::Left => s >= -COLLINEAR_EPSILON,
            Side::Right => s <= COLLINEAR_EPSILON,
        }
    })
}

/// A line touching polygon `V` at vertex `t1` and polygon `W` at vertex `t2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BiTangent {
    pub t1: usize,
    pub t2: usize,
}

/// The four bitangents between two convex polygons, named by the side of the directed line
/// `V[t1] -> W[t2]` on which `V` and then `W` lie. Separating tangents (`lr`, `rl`) do not exist
/// when the polygons overlap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BiTangents {
    pub ll: Option<BiTangent>,
    pub rr: Option<BiTangent>,
    pub lr: Option<BiTangent>,
    pub rl: Option<BiTangent>,
}

impl BiTangents {
    pub fn iter(&self) -> impl Iterator<Item = BiTangent> + '_ {
        [self.ll, self.rr, self.lr, self.rl].into_iter().flatten()
    }
}

pub fn tangents(v: &[Point], w: &[Point]) -> BiTangents {
    let mut t = BiTangents::default();
    for (i, &a) in v.iter().enumerate() {
        for (j, &b) in w.iter().enumerate() {
            if a == b {
                continue;
            }
            let (vl, vr) = (
                all_on_side(a, b, v, Side::Left),
                all_on_side(a, b, v, Side::Right),
            );
            let (wl, wr) = (
                all_on_side(a, b, w, Side::Left),
                all_on_side(a, b, w, Side::Right),
            );
            let bt = Some(BiTangent { t1: i, t2: j });
            if vl && wl && t.ll.is_none() {
                t.ll = bt;
            }
            if vr && wr && t.rr.is_none() {
                t.rr = bt;
            }
            if vl && wr && t.lr.is_none() {
                t.lr = bt;
            }
            if vr && wl && t.rl.is_none() {
                t.rl = bt;
            }
        }
    }
    t
}

/// True if the two closed polygons' boundaries cross or one contains the other.
pub fn polys_overlap(p: &[Point], q: &[Point]) -> bool {
    if p.is_empty() || q.is_empty() {
        return false;
    }
    if closed_edges(p).any(|(a, b)| !intersects(a, b, q).is_empty()) {
        return true;
    }
    contains(p, q[0]) || contains(q, p[0])
}

fn contains(poly: &[Point], pt: Point) -> bool {
    if poly.len() < 3 {
        return false;
    }
    let mut inside = false;
    for (a, b) in closed_edges(poly) {
        if (a.y > pt.y) != (b.y > pt.y) && pt.x < (b.x - a.x) * (pt.y - a.y) / (b.y - a.y) + a.x {
            inside = !inside;
        }
    }
    inside
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibilityVertex {
    pub id: usize,
    /// Obstacle this vertex belongs to; `None` for points added with
    /// [`TangentVisibilityGraph::add_point`].
    pub poly_id: Option<usize>,
    pub poly_vert_id: Option<usize>,
    pub p: Point,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibilityEdge {
    pub source: usize,
    pub target: usize,
}

impl VisibilityEdge {
    pub fn length(&self, vertices: &[VisibilityVertex]) -> f64 {
        vertices[self.source].p.distance_to(vertices[self.target].p)
    }
}

/// Graph over obstacle vertices whose edges are obstacle boundaries plus unobstructed
/// bitangents between obstacles.
#[derive(Debug, Clone, Default)]
pub struct TangentVisibilityGraph {
    pub polys: Vec<Vec<Point>>,
    pub vertices: Vec<VisibilityVertex>,
    pub edges: Vec<VisibilityEdge>,
    poly_verts: Vec<Vec<usize>>,
}

impl TangentVisibilityGraph {
    pub fn new(polys: Vec<Vec<Point>>) -> Self {
        let mut g = Self {
            polys,
            ..Self::default()
        };
        for (i, poly) in g.polys.iter().enumerate() {
            let mut ids = Vec::with_capacity(poly.len());
            for (j, &p) in poly.iter().enumerate() {
                let id = g.vertices.len();
                g.vertices.push(VisibilityVertex {
                    id,
                    poly_id: Some(i),
                    poly_vert_id: Some(j),
                    p,
                });
                ids.push(id);
                if j > 0 {
                    g.edges.push(VisibilityEdge {
                        source: id - 1,
                        target: id,
                    });
                }
            }
            if ids.len() > 2 {
                g.edges.push(VisibilityEdge {
                    source: ids[ids.len() - 1],
                    target: ids[0],
                });
            }
            g.poly_verts.push(ids);
        }

        let n = g.polys.len();
        for i in 0..n {
            for j in i + 1..n {
                let t = tangents(&g.polys[i], &g.polys[j]);
                for bt in t.iter() {
                    let u = g.poly_verts[i][bt.t1];
                    let v = g.poly_verts[j][bt.t2];
                    g.add_edge_if_visible(u, v, Some(i), Some(j));
                }
            }
        }
        g
    }

    /// Adds a free vertex at `p` connected to the tangent vertices of every obstacle (other
    /// than `inside`, the obstacle `p` lies in, if any) that it can see. Returns its vertex id.
    pub fn add_point(&mut self, p: Point, inside: Option<usize>) -> usize {
        let id = self.vertices.len();
        self.vertices.push(VisibilityVertex {
            id,
            poly_id: None,
            poly_vert_id: None,
            p,
        });
        for i in 0..self.polys.len() {
            if Some(i) == inside {
                continue;
            }
            let Some(t) = tangent_point_poly(p, &self.polys[i]) else {
                continue;
            };
            for k in [t.ltan, t.rtan] {
                let v = self.poly_verts[i][k];
                self.add_edge_if_visible(id, v, inside, Some(i));
            }
        }
        id
    }

    /// Adds `u - v` unless the segment crosses an obstacle other than `i1` and `i2`.
    pub fn add_edge_if_visible(
        &mut self,
        u: usize,
        v: usize,
        i1: Option<usize>,
        i2: Option<usize>,
    ) -> bool {
        let (a, b) = (self.vertices[u].p, self.vertices[v].p);
        if self.intersects_polys(a, b, i1, i2) {
            return false;
        }
        let e = VisibilityEdge {
            source: u,
            target: v,
        };
        if self.edges.contains(&e) {
            return false;
        }
        self.edges.push(e);
        true
    }

    fn intersects_polys(&self, a: Point, b: Point, i1: Option<usize>, i2: Option<usize>) -> bool {
        self.polys.iter().enumerate().any(|(i, poly)| {
            Some(i) != i1 && Some(i) != i2 && !intersects(a, b, poly).is_empty()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x: f64, y: f64, s: f64) -> Vec<Point> {
        convex_hull(&[
            Point::new(x, y),
            Point::new(x + s, y),
            Point::new(x + s, y + s),
            Point::new(x, y + s),
        ])
    }

    #[test]
    fn hull_drops_interior_and_duplicate_points() {
        let pts = [
            Point::new(0.0, 0.0),
            Point::new(4.0, 0.0),
            Point::new(4.0, 4.0),
            Point::new(0.0, 4.0),
            Point::new(2.0, 2.0),
            Point::new(4.0, 4.0),
            Point::new(2.0, 0.0),
        ];
        let h = convex_hull(&pts);
        assert_eq!(h.len(), 4, "{h:?}");
        assert_eq!(h[0], Point::new(0.0, 0.0));
        for i in 0..h.len() {
            let (a, b, c) = (h[i], h[(i + 1) % 4], h[(i + 2) % 4]);
            assert!(is_left(a, b, c) > 0.0);
        }
    }

    #[test]
    fn point_tangents_touch_square_corners() {
        let sq = square(10.0, -1.0, 2.0);
        let t = tangent_point_poly(Point::new(0.0, 0.0), &sq).unwrap();
        let r = sq[t.rtan];
        let l = sq[t.ltan];
        assert_eq!(r, Point::new(10.0, -1.0));
        assert_eq!(l, Point::new(10.0, 1.0));
        assert!(tangent_point_poly(Point::new(11.0, 0.0), &sq).is_none());
    }

    #[test]
    fn separated_squares_have_four_bitangents() {
        let a = square(0.0, 0.0, 2.0);
        let b = square(10.0, 0.0, 2.0);
        let t = tangents(&a, &b);
        assert_eq!(t.iter().count(), 4);
        assert!(!polys_overlap(&a, &b));
        let c = square(1.0, 1.0, 2.0);
        assert!(polys_overlap(&a, &c));
        let t = tangents(&a, &c);
        assert!(t.lr.is_none() && t.rl.is_none());
    }

    #[test]
    fn blocked_tangent_is_not_added() {
        let g = TangentVisibilityGraph::new(vec![
            square(0.0, 0.0, 2.0),
            square(10.0, -5.0, 2.0),
            square(20.0, 0.0, 2.0),
        ]);
        // boundaries: 3 squares × 4 edges
        let boundary = 12;
        assert!(g.edges.len() > boundary);
        for e in &g.edges[boundary..] {
            let (a, b) = (g.vertices[e.source], g.vertices[e.target]);
            for (i, poly) in g.polys.iter().enumerate() {
                if Some(i) == a.poly_id || Some(i) == b.poly_id {
                    continue;
                }
                assert!(intersects(a.p, b.p, poly).is_empty());
            }
        }
    }
}
