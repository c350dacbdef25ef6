//! Stress majorization by projected gradient descent.
//!
//! Stress over `n` points in `k` dimensions is
//!
//! ```text
//! sum_{u<v} w_uv * (|x_u - x_v| - D_uv)^2 / D_uv^2
//! ```
//!
//! Each step computes the gradient and the per-dimension Hessian, moves along the gradient by
//! the step length that minimises the local quadratic model, and then hands each axis to an
//! optional [`AxisProjection`] that restores its constraints. [`Descent::runge_kutta`] combines
//! four such steps into a fourth-order update.

use std::collections::BTreeMap;
use std::mem::take;

use nalgebra::DMatrix;

use crate::error::{Error, Result};

/// Pairs whose squared distance is at or below this are treated as coincident and pushed apart.
const COINCIDENT_DISTANCE_SQUARED: f64 = 1e-9;

/// Restores constraints on one axis after an unconstrained step.
///
/// `x0`/`y0` are the coordinates before the step (with x already projected when `project_y`
/// runs); the target coordinates for the axis being projected are adjusted in place.
pub trait AxisProjection {
    fn project_x(&mut self, x0: &[f64], y0: &[f64], x: &mut [f64], locks: &Locks);
    fn project_y(&mut self, x0: &[f64], y0: &[f64], y: &mut [f64], locks: &Locks);
}

/// Points pinned to a position for the duration of a step.
#[derive(Debug, Clone, Default)]
pub struct Locks {
    locks: BTreeMap<usize, Vec<f64>>,
}

impl Locks {
    pub fn add(&mut self, id: usize, x: Vec<f64>) {
        self.locks.insert(id, x);
    }

    pub fn clear(&mut self) {
        self.locks.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&[f64]> {
        self.locks.get(&id).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &[f64])> {
        self.locks.iter().map(|(&id, p)| (id, p.as_slice()))
    }
}

/// Linear congruential generator with the classic `rand()` constants.
///
/// Deterministic for a given seed, which keeps layouts and tests reproducible.
#[derive(Debug, Clone)]
pub struct PseudoRandom {
    seed: u64,
}

impl PseudoRandom {
    const A: u64 = 214_013;
    const C: u64 = 2_531_011;
    const M: u64 = 2_147_483_648;
    const RANGE: f64 = 32_767.0;

    pub fn new(seed: u64) -> Self {
        Self {
            seed: seed % Self::M,
        }
    }

    /// Next value in `[0, 1]`.
    pub fn next_f64(&mut self) -> f64 {
        self.seed = (self.seed * Self::A + Self::C) % Self::M;
        (self.seed >> 16) as f64 / Self::RANGE
    }

    pub fn next_between(&mut self, min: f64, max: f64) -> f64 {
        min + self.next_f64() * (max - min)
    }
}

impl Default for PseudoRandom {
    fn default() -> Self {
        Self::new(1)
    }
}

pub struct Descent {
    /// Coordinates, one row per dimension.
    pub x: Vec<Vec<f64>>,
    /// Ideal distances; non-finite entries are ignored.
    pub d: DMatrix<f64>,
    /// Pair weights. A weight above 1 means "only repel": the pair is ignored while it is
    /// farther apart than ideal and otherwise counts with weight 1.
    pub g: Option<DMatrix<f64>>,
    /// Relative stress change below which [`Descent::run`] stops.
    pub threshold: f64,
    pub locks: Locks,
    /// The first `num_grid_snap_nodes` points are attracted to the nearest grid line.
    pub num_grid_snap_nodes: usize,
    pub snap_grid_size: f64,
    pub snap_strength: f64,
    pub scale_snap_by_max_h: bool,
    k: usize,
    n: usize,
    grad: Vec<Vec<f64>>,
    h: Vec<DMatrix<f64>>,
    /// Hessian of the quadratic that majorizes stress at the last derivative computation,
    /// shared by every dimension.
    bound: DMatrix<f64>,
    hd: Vec<Vec<f64>>,
    a: Vec<Vec<f64>>,
    b: Vec<Vec<f64>>,
    c: Vec<Vec<f64>>,
    dd: Vec<Vec<f64>>,
    e: Vec<Vec<f64>>,
    ia: Vec<Vec<f64>>,
    ib: Vec<Vec<f64>>,
    min_d: f64,
    random: PseudoRandom,
    project: Option<Box<dyn AxisProjection>>,
}

impl std::fmt::Debug for Descent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Descent")
            .field("k", &self.k)
            .field("n", &self.n)
            .field("threshold", &self.threshold)
            .field("locks", &self.locks)
            .field("num_grid_snap_nodes", &self.num_grid_snap_nodes)
            .field("has_projection", &self.project.is_some())
            .finish()
    }
}

impl Descent {
    pub fn new(x: Vec<Vec<f64>>, d: DMatrix<f64>, g: Option<DMatrix<f64>>) -> Result<Self> {
        let k = x.len();
        if k == 0 {
            return Err(Error::EmptyInput {
                what: "descent coordinates",
            });
        }
        let n = x[0].len();
        for (dimension, row) in x.iter().enumerate() {
            if row.len() != n {
                return Err(Error::CoordinateLength {
                    dimension,
                    expected: n,
                    found: row.len(),
                });
            }
        }
        for m in std::iter::once(&d).chain(g.as_ref()) {
            if m.nrows() != n || m.ncols() != n {
                return Err(Error::DistanceMatrix {
                    expected: n,
                    found: format!("{}x{}", m.nrows(), m.ncols()),
                });
            }
        }

        let mut min_d = f64::MAX;
        for u in 0..n {
            for v in u + 1..n {
                let duv = d[(u, v)];
                if duv > 0.0 && duv < min_d {
                    min_d = duv;
                }
            }
        }
        if min_d == f64::MAX {
            min_d = 1.0;
        }

        let rows = || vec![vec![0.0; n]; k];
        Ok(Self {
            x,
            d,
            g,
            threshold: 1e-4,
            locks: Locks::default(),
            num_grid_snap_nodes: 0,
            snap_grid_size: 100.0,
            snap_strength: 1000.0,
            scale_snap_by_max_h: false,
            k,
            n,
            grad: rows(),
            h: vec![DMatrix::zeros(n, n); k],
            bound: DMatrix::zeros(n, n),
            hd: rows(),
            a: rows(),
            b: rows(),
            c: rows(),
            dd: rows(),
            e: rows(),
            ia: rows(),
            ib: rows(),
            min_d,
            random: PseudoRandom::default(),
            project: None,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.k
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Gradient from the most recent derivative computation.
    pub fn gradient(&self) -> &[Vec<f64>] {
        &self.grad
    }

    /// Hessian of dimension `i` from the most recent derivative computation.
    pub fn hessian(&self, i: usize) -> &DMatrix<f64> {
        &self.h[i]
    }

    pub fn set_projection(&mut self, project: Option<Box<dyn AxisProjection>>) {
        self.project = project;
    }

    pub fn has_projection(&self) -> bool {
        self.project.is_some()
    }

    pub fn set_random(&mut self, random: PseudoRandom) {
        self.random = random;
    }

    /// Effective weight of pair `(u, v)` at `distance`, or `None` if the pair is ignored.
    fn pair_weight(&self, u: usize, v: usize, distance: f64) -> Option<f64> {
        let ideal = self.d[(u, v)];
        let weight = self.g.as_ref().map_or(1.0, |g| g[(u, v)]);
        if !ideal.is_finite() || (weight > 1.0 && distance > ideal) {
            return None;
        }
        Some(weight.min(1.0))
    }

    fn offset_dir(&mut self) -> Vec<f64> {
        let mut u: Vec<f64> = (0..self.k)
            .map(|_| self.random.next_between(0.01, 1.0) - 0.5)
            .collect();
        let l = u.iter().map(|v| v * v).sum::<f64>().sqrt();
        for v in &mut u {
            *v *= self.min_d / l;
        }
        u
    }

    /// Fills the gradient and Hessians at `x`.
    ///
    /// Coincident points are first nudged apart by a random offset of length `min_d`, so `x`
    /// may change.
    pub fn compute_derivatives(&mut self, x: &mut [Vec<f64>]) {
        let (n, k) = (self.n, self.k);
        if n < 1 {
            return;
        }
        let mut d = vec![0.0; k];
        let mut d2 = vec![0.0; k];
        let mut huu = vec![0.0; k];
        let mut max_h: f64 = 0.0;

        for u in 0..n {
            for i in 0..k {
                huu[i] = 0.0;
                self.grad[i][u] = 0.0;
            }
            let mut buu = 0.0;
            for v in 0..n {
                if u == v {
                    continue;
                }
                let mut distance_squared = 0.0;
                for _ in 0..n {
                    distance_squared = 0.0;
                    for i in 0..k {
                        let dx = x[i][u] - x[i][v];
                        d[i] = dx;
                        d2[i] = dx * dx;
                        distance_squared += d2[i];
                    }
                    if distance_squared > COINCIDENT_DISTANCE_SQUARED {
                        break;
                    }
                    let rd = self.offset_dir();
                    for i in 0..k {
                        x[i][v] += rd[i];
                    }
                }
                let distance = distance_squared.sqrt();
                let Some(weight) = self.pair_weight(u, v, distance) else {
                    for h in &mut self.h {
                        h[(u, v)] = 0.0;
                    }
                    self.bound[(u, v)] = 0.0;
                    continue;
                };
                let ideal = self.d[(u, v)];
                let ideal_squared = ideal * ideal;
                let gs = 2.0 * weight * (distance - ideal) / (ideal_squared * distance);
                let hs = -2.0 * weight / (ideal_squared * distance * distance_squared);
                if !gs.is_finite() || !hs.is_finite() {
                    for h in &mut self.h {
                        h[(u, v)] = 0.0;
                    }
                    self.bound[(u, v)] = 0.0;
                    continue;
                }
                let buv = -2.0 * weight / ideal_squared;
                self.bound[(u, v)] = buv;
                buu -= buv;
                for i in 0..k {
                    self.grad[i][u] += d[i] * gs;
                    let huv = hs * (distance * distance_squared + ideal * (d2[i] - distance_squared) + distance * d2[i]);
                    self.h[i][(u, v)] = huv;
                    huu[i] -= huv;
                }
            }
            for i in 0..k {
                self.h[i][(u, u)] = huu[i];
                max_h = max_h.max(huu[i]);
            }
            self.bound[(u, u)] = buu;
        }

        let snap_nodes = self.num_grid_snap_nodes.min(n);
        if snap_nodes > 0 && self.snap_grid_size > 0.0 {
            let grid = self.snap_grid_size;
            let r = grid / 2.0;
            let mut strength = self.snap_strength / (r * r);
            if self.scale_snap_by_max_h {
                strength *= max_h;
            }
            for u in 0..snap_nodes {
                for i in 0..k {
                    let xiu = x[i][u];
                    let m = xiu / grid;
                    let f = m.fract();
                    let q = m - f;
                    let dx = if f.abs() <= 0.5 {
                        xiu - q * grid
                    } else if xiu > 0.0 {
                        xiu - (q + 1.0) * grid
                    } else {
                        xiu - (q - 1.0) * grid
                    };
                    if -r < dx && dx <= r {
                        self.grad[i][u] += strength * dx;
                        self.h[i][(u, u)] += strength;
                    }
                }
            }
        }

        for (u, p) in self.locks.iter() {
            if u >= n {
                continue;
            }
            for i in 0..k.min(p.len()) {
                self.h[i][(u, u)] += max_h;
                self.grad[i][u] -= max_h * (p[i] - x[i][u]);
            }
            self.bound[(u, u)] += max_h;
        }
    }

    /// The curvature along `d` is the larger of the Hessian's and the majorizing quadratic's,
    /// so a step never overshoots the majorizer's minimum and stress cannot rise, even where
    /// compressed pairs make the Hessian indefinite.
    fn step_size(
        g: &[Vec<f64>],
        h: &[DMatrix<f64>],
        bound: &DMatrix<f64>,
        d: &[Vec<f64>],
        hd: &mut [Vec<f64>],
    ) -> f64 {
        let mut numerator = 0.0;
        let mut curvature = 0.0;
        let mut majorized = 0.0;
        for i in 0..d.len() {
            numerator += dot(&g[i], &d[i]);
            for (u, out) in hd[i].iter_mut().enumerate() {
                *out = h[i].row(u).iter().zip(&d[i]).map(|(a, b)| a * b).sum();
            }
            curvature += dot(&d[i], &hd[i]);
            for (u, out) in hd[i].iter_mut().enumerate() {
                *out = bound.row(u).iter().zip(&d[i]).map(|(a, b)| a * b).sum();
            }
            majorized += dot(&d[i], &hd[i]);
        }
        let denominator = curvature.max(majorized);
        if denominator <= 0.0 || !denominator.is_finite() {
            return 0.0;
        }
        numerator / denominator
    }

    /// Step length along `d` that minimises the quadratic model from the last derivative
    /// computation; 0 when `d` is zero or the curvature is not finite.
    pub fn compute_step_size(&mut self, d: &[Vec<f64>]) -> f64 {
        Self::step_size(&self.grad, &self.h, &self.bound, d, &mut self.hd)
    }

    fn take_descent_step(x: &mut [f64], d: &[f64], step_size: f64) {
        for (xi, di) in x.iter_mut().zip(d) {
            *xi -= step_size * di;
        }
    }

    /// `r = x0 - step_size * d`, projected one axis at a time, with locked points restored.
    fn step_and_project(
        &mut self,
        x0: &[Vec<f64>],
        r: &mut [Vec<f64>],
        d: &[Vec<f64>],
        step_size: f64,
    ) {
        for (ri, xi) in r.iter_mut().zip(x0) {
            ri.copy_from_slice(xi);
        }
        Self::take_descent_step(&mut r[0], &d[0], step_size);
        if self.k >= 2 {
            if let Some(p) = self.project.as_mut() {
                p.project_x(&x0[0], &x0[1], &mut r[0], &self.locks);
            }
            Self::take_descent_step(&mut r[1], &d[1], step_size);
            if let Some(p) = self.project.as_mut() {
                let (rx, ry) = r.split_at_mut(1);
                p.project_y(&rx[0], &x0[1], &mut ry[0], &self.locks);
            }
        }
        for i in 2..self.k {
            Self::take_descent_step(&mut r[i], &d[i], step_size);
        }
        for (u, p) in self.locks.iter() {
            if u >= self.n {
                continue;
            }
            for (ri, &pi) in r.iter_mut().zip(p) {
                ri[u] = pi;
            }
        }
    }

    fn compute_next_position(&mut self, x0: &mut [Vec<f64>], r: &mut [Vec<f64>]) {
        self.compute_derivatives(x0);
        let alpha = Self::step_size(&self.grad, &self.h, &self.bound, &self.grad, &mut self.hd);
        let g = take(&mut self.grad);
        self.step_and_project(x0, r, &g, alpha);
        self.grad = g;

        if self.project.is_some() {
            let mut e = take(&mut self.e);
            for ((ei, xi), ri) in e.iter_mut().zip(x0.iter()).zip(r.iter()) {
                for ((ej, xj), rj) in ei.iter_mut().zip(xi).zip(ri) {
                    *ej = xj - rj;
                }
            }
            let beta = Self::step_size(&self.grad, &self.h, &self.bound, &e, &mut self.hd).clamp(0.2, 1.0);
            self.step_and_project(x0, r, &e, beta);
            self.e = e;
        }
    }

    /// One fourth-order Runge-Kutta step. Returns the squared displacement of all points.
    pub fn runge_kutta(&mut self) -> f64 {
        let mut x = take(&mut self.x);
        let mut a = take(&mut self.a);
        let mut b = take(&mut self.b);
        let mut c = take(&mut self.c);
        let mut d = take(&mut self.dd);
        let mut ia = take(&mut self.ia);
        let mut ib = take(&mut self.ib);

        self.compute_next_position(&mut x, &mut a);
        mid(&x, &a, &mut ia);
        self.compute_next_position(&mut ia, &mut b);
        mid(&x, &b, &mut ib);
        self.compute_next_position(&mut ib, &mut c);
        self.compute_next_position(&mut c, &mut d);

        let mut disp = 0.0;
        for i in 0..self.k {
            for j in 0..self.n {
                let v = (a[i][j] + 2.0 * b[i][j] + 2.0 * c[i][j] + d[i][j]) / 6.0;
                let delta = x[i][j] - v;
                disp += delta * delta;
                x[i][j] = v;
            }
        }

        self.x = x;
        self.a = a;
        self.b = b;
        self.c = c;
        self.dd = d;
        self.ia = ia;
        self.ib = ib;
        disp
    }

    /// A plain gradient step without projection. Returns the resulting stress.
    pub fn reduce_stress(&mut self) -> f64 {
        let mut x = take(&mut self.x);
        self.compute_derivatives(&mut x);
        let alpha = Self::step_size(&self.grad, &self.h, &self.bound, &self.grad, &mut self.hd);
        for (xi, gi) in x.iter_mut().zip(&self.grad) {
            Self::take_descent_step(xi, gi, alpha);
        }
        self.x = x;
        self.compute_stress()
    }

    /// Runs up to `iterations` Runge-Kutta steps, stopping early once the relative change in
    /// stress drops below `threshold`. Returns the final stress.
    pub fn run(&mut self, iterations: usize) -> f64 {
        let mut stress = f64::MAX;
        for _ in 0..iterations {
            self.runge_kutta();
            let s = self.compute_stress();
            let converged = s == 0.0 || (stress / s - 1.0).abs() < self.threshold;
            stress = s;
            if converged {
                break;
            }
        }
        if iterations == 0 {
            return self.compute_stress();
        }
        stress
    }

    pub fn compute_stress(&self) -> f64 {
        let mut stress = 0.0;
        for u in 0..self.n {
            for v in u + 1..self.n {
                let l = (0..self.k)
                    .map(|i| {
                        let dx = self.x[i][u] - self.x[i][v];
                        dx * dx
                    })
                    .sum::<f64>()
                    .sqrt();
                let Some(w) = self.pair_weight(u, v, l) else {
                    continue;
                };
                let d = self.d[(u, v)];
                if d == 0.0 {
                    continue;
                }
                let rl = d - l;
                stress += w * rl * rl / (d * d);
            }
        }
        stress
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn mid(a: &[Vec<f64>], b: &[Vec<f64>], m: &mut [Vec<f64>]) {
    for ((mi, ai), bi) in m.iter_mut().zip(a).zip(b) {
        for ((mj, aj), bj) in mi.iter_mut().zip(ai).zip(bi) {
            *mj = aj + (bj - aj) / 2.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle(x: Vec<Vec<f64>>) -> Descent {
        let d = DMatrix::from_fn(3, 3, |i, j| if i == j { 0.0 } else { 1.0 });
        Descent::new(x, d, None).unwrap()
    }

    #[test]
    fn pseudo_random_is_deterministic_and_in_range() {
        let mut a = PseudoRandom::new(1);
        let mut b = PseudoRandom::new(1);
        for _ in 0..100 {
            let v = a.next_f64();
            assert_eq!(v, b.next_f64());
            assert!((0.0..=1.0).contains(&v), "{v}");
        }
        let first = PseudoRandom::new(1).next_f64();
        assert!((first - 41.0 / 32767.0).abs() < 1e-15, "{first}");
    }

    #[test]
    fn locked_point_stays_put() {
        let mut desc = triangle(vec![vec![0.0, 3.0, 0.5], vec![0.0, 0.2, 2.0]]);
        desc.locks.add(0, vec![0.0, 0.0]);
        for _ in 0..5 {
            desc.runge_kutta();
        }
        assert_eq!((desc.x[0][0], desc.x[1][0]), (0.0, 0.0));
        let l01 = (desc.x[0][1] - desc.x[0][0]).hypot(desc.x[1][1] - desc.x[1][0]);
        assert!(l01 < 3.0 && l01 > 0.0, "{l01}");
    }

    #[test]
    fn coincident_points_get_separated() {
        let mut desc = triangle(vec![vec![1.0, 1.0, 1.0], vec![1.0, 1.0, 1.0]]);
        let mut x = desc.x.clone();
        desc.compute_derivatives(&mut x);
        assert!(desc.gradient().iter().flatten().all(|g| g.is_finite()));
        let moved = (0..3)
            .filter(|&j| x[0][j] != 1.0 || x[1][j] != 1.0)
            .count();
        assert!(moved >= 2);
    }

    #[test]
    fn grid_snap_pulls_towards_nearest_line() {
        let d = DMatrix::from_element(1, 1, 0.0);
        let mut desc = Descent::new(vec![vec![42.0], vec![-58.0]], d, None).unwrap();
        desc.num_grid_snap_nodes = 1;
        desc.snap_grid_size = 100.0;
        let mut x = desc.x.clone();
        desc.compute_derivatives(&mut x);
        // 42 snaps towards 0, -58 towards -100
        assert!(desc.gradient()[0][0] > 0.0);
        assert!(desc.gradient()[1][0] > 0.0);
        desc.run(20);
        assert!(desc.x[0][0].abs() < 1.0, "{}", desc.x[0][0]);
        assert!((desc.x[1][0] + 100.0).abs() < 1.0, "{}", desc.x[1][0]);
    }

    #[test]
    fn compressed_points_still_take_a_step() {
        let d = DMatrix::from_fn(3, 3, |i, j| if i == j { 0.0 } else { 30.0 });
        let mut desc = Descent::new(vec![vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]], d, None).unwrap();
        let mut x = desc.x.clone();
        desc.compute_derivatives(&mut x);
        let g = desc.gradient().to_vec();
        assert!(desc.compute_step_size(&g) > 0.0);
    }

    #[test]
    fn zero_direction_gives_zero_step() {
        let mut desc = triangle(vec![vec![0.0, 1.0, 0.5], vec![0.0, 0.0, 0.8]]);
        let zero = vec![vec![0.0; 3]; 2];
        assert_eq!(desc.compute_step_size(&zero), 0.0);
    }
}
