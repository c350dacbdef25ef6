//! Variable placement with separation constraints (VPSC).
//!
//! An incremental active-set solver for the 1-D problem
//!
//! ```text
//! minimize   sum_i w_i * (p_i - d_i)^2
//! subject to p_l + gap <= p_r      (or == for equality constraints)
//! ```
//!
//! Variables that are held together by active constraints form a [`Block`]; a block moves as a
//! unit and is placed at the weighted optimum of its members. `satisfy` merges blocks across
//! violated constraints, `solve` additionally splits blocks across active constraints whose
//! Lagrange multiplier says they are pulling the wrong way.
//!
//! Variables, constraints and blocks live in flat arenas owned by the [`Solver`] and refer to
//! each other by index.

use crate::error::{Error, Result};

/// Active constraints whose multiplier is below this value are split.
pub const LAGRANGIAN_TOLERANCE: f64 = -1e-4;
/// A constraint whose slack is below this value counts as violated.
pub const ZERO_UPPERBOUND: f64 = -1e-10;

#[derive(Debug, Clone, Copy)]
struct PositionStats {
    scale: f64,
    ab: f64,
    ad: f64,
    a2: f64,
}

impl PositionStats {
    fn new(scale: f64) -> Self {
        Self {
            scale,
            ab: 0.0,
            ad: 0.0,
            a2: 0.0,
        }
    }

    fn add_variable(&mut self, v: &Variable) {
        let ai = self.scale / v.scale;
        let bi = v.offset / v.scale;
        let wi = v.weight;
        self.ab += wi * ai * bi;
        self.ad += wi * ai * v.desired_position;
        self.a2 += wi * ai * ai;
    }

    fn reset(&mut self) {
        self.ab = 0.0;
        self.ad = 0.0;
        self.a2 = 0.0;
    }

    fn position(&self) -> f64 {
        (self.ad - self.ab) / self.a2
    }
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub desired_position: f64,
    /// Resistance to displacement from `desired_position`.
    pub weight: f64,
    pub scale: f64,
    offset: f64,
    block: usize,
    c_in: Vec<usize>,
    c_out: Vec<usize>,
}

impl Variable {
    pub fn new(desired_position: f64) -> Self {
        Self::with_weight(desired_position, 1.0)
    }

    pub fn with_weight(desired_position: f64, weight: f64) -> Self {
        Self {
            desired_position,
            weight,
            scale: 1.0,
            offset: 0.0,
            block: 0,
            c_in: Vec::new(),
            c_out: Vec::new(),
        }
    }

    /// Offset of this variable from the reference position of its block.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    fn validate(&self, index: usize) -> Result<()> {
        let reason = if !self.desired_position.is_finite() {
            "desired position must be finite"
        } else if !(self.weight.is_finite() && self.weight > 0.0) {
            "weight must be positive and finite"
        } else if !(self.scale.is_finite() && self.scale > 0.0) {
            "scale must be positive and finite"
        } else {
            return Ok(());
        };
        Err(Error::InvalidVariable { index, reason })
    }
}

/// `left + gap <= right`, or `left + gap == right` when `equality` is set.
#[derive(Debug, Clone)]
pub struct Constraint {
    pub left: usize,
    pub right: usize,
    pub gap: f64,
    pub equality: bool,
    lm: f64,
    active: bool,
    unsatisfiable: bool,
}

impl Constraint {
    pub fn new(left: usize, right: usize, gap: f64) -> Self {
        Self {
            left,
            right,
            gap,
            equality: false,
            lm: 0.0,
            active: false,
            unsatisfiable: false,
        }
    }

    pub fn equality(left: usize, right: usize, gap: f64) -> Self {
        Self {
            equality: true,
            ..Self::new(left, right, gap)
        }
    }

    /// Lagrange multiplier from the most recent multiplier computation over this constraint's
    /// block. Negative values mean the constraint is holding its variables together.
    pub fn lagrange_multiplier(&self) -> f64 {
        self.lm
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Set when the solver could not enforce this constraint (e.g. a cycle of contradicting
    /// equalities). Such constraints are skipped, never reported as errors.
    pub fn is_unsatisfiable(&self) -> bool {
        self.unsatisfiable
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    vars: Vec<usize>,
    posn: f64,
    ps: PositionStats,
}

impl Block {
    fn add_variable(&mut self, index: usize, v: &Variable) {
        self.vars.push(index);
        self.ps.add_variable(v);
        self.posn = self.ps.position();
    }

    pub fn variables(&self) -> &[usize] {
        &self.vars
    }

    /// Reference position; member `v` sits at `(scale * posn + v.offset) / v.scale`.
    pub fn position(&self) -> f64 {
        self.posn
    }
}

#[derive(Debug, Clone)]
pub struct Solver {
    vs: Vec<Variable>,
    cs: Vec<Constraint>,
    blocks: Vec<Block>,
    inactive: Vec<usize>,
}

impl Solver {
    pub fn new(mut vs: Vec<Variable>, mut cs: Vec<Constraint>) -> Result<Self> {
        for (i, v) in vs.iter_mut().enumerate() {
            v.validate(i)?;
            v.c_in.clear();
            v.c_out.clear();
        }
        let n = vs.len();
        for (ci, c) in cs.iter_mut().enumerate() {
            for variable in [c.left, c.right] {
                if variable >= n {
                    return Err(Error::UnknownVariable {
                        constraint: ci,
                        variable,
                        count: n,
                    });
                }
            }
            if !c.gap.is_finite() {
                return Err(Error::InvalidConstraint {
                    index: ci,
                    reason: "gap must be finite",
                });
            }
            if c.left == c.right {
                return Err(Error::InvalidConstraint {
                    index: ci,
                    reason: "left and right must be distinct variables",
                });
            }
            vs[c.left].c_out.push(ci);
            vs[c.right].c_in.push(ci);
            c.active = false;
            c.unsatisfiable = false;
            c.lm = 0.0;
        }

        let mut solver = Self {
            inactive: (0..cs.len()).collect(),
            vs,
            cs,
            blocks: Vec::new(),
        };
        solver.reset_blocks();
        Ok(solver)
    }

    pub fn variables(&self) -> &[Variable] {
        &self.vs
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.cs
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn position(&self, v: usize) -> f64 {
        let var = &self.vs[v];
        let b = &self.blocks[var.block];
        (b.ps.scale * b.posn + var.offset) / var.scale
    }

    pub fn positions(&self) -> Vec<f64> {
        (0..self.vs.len()).map(|v| self.position(v)).collect()
    }

    /// Weighted squared displacement of every variable from its desired position.
    pub fn cost(&self) -> f64 {
        (0..self.vs.len())
            .map(|v| {
                let d = self.position(v) - self.vs[v].desired_position;
                d * d * self.vs[v].weight
            })
            .sum()
    }

    /// Drops all blocks and places each variable, alone in its own block, at `ps[i]`.
    pub fn set_starting_positions(&mut self, ps: &[f64]) {
        for c in &mut self.cs {
            c.active = false;
        }
        self.inactive = (0..self.cs.len()).collect();
        self.reset_blocks();
        for (b, &p) in self.blocks.iter_mut().zip(ps) {
            b.posn = p;
        }
    }

    pub fn set_desired_positions(&mut self, ps: &[f64]) {
        for (v, &p) in self.vs.iter_mut().zip(ps) {
            v.desired_position = p;
        }
    }

    /// Finds a feasible placement by merging blocks across violated constraints.
    ///
    /// Before merging, the block holding the globally most negative multiplier (if below
    /// [`LAGRANGIAN_TOLERANCE`]) is split. Returns whether such a split happened.
    pub fn satisfy(&mut self) -> bool {
        let split = self.split_blocks();
        while let Some(c) = self.most_violated() {
            if !(self.cs[c].equality
                || (self.slack(c) < ZERO_UPPERBOUND && !self.cs[c].active))
            {
                break;
            }
            let (left, right) = (self.cs[c].left, self.cs[c].right);
            let lb = self.vs[left].block;
            let rb = self.vs[right].block;
            if lb != rb {
                self.merge(c);
                continue;
            }
            if self.is_active_directed_path_between(right, left) {
                self.mark_unsatisfiable(c);
                continue;
            }
            match self.split_between(left, right) {
                Some(released) => self.inactive.push(released),
                None => {
                    self.mark_unsatisfiable(c);
                    continue;
                }
            }
            if self.slack(c) >= 0.0 {
                self.inactive.push(c);
            } else {
                self.merge(c);
            }
        }
        split
    }

    /// Runs `satisfy` until no block holds a constraint worth relaxing. Returns the final cost.
    pub fn solve(&mut self) -> f64 {
        self.satisfy();
        let max_splits = 1000 + 10 * self.cs.len();
        let mut splits = 0usize;
        while self.satisfy() {
            splits += 1;
            if splits >= max_splits {
                tracing::warn!(
                    splits,
                    constraints = self.cs.len(),
                    "vpsc solve stopped at its split limit"
                );
                break;
            }
        }
        self.cost()
    }

    fn reset_blocks(&mut self) {
        self.blocks.clear();
        for v in 0..self.vs.len() {
            let b = self.new_block(v);
            self.insert(b);
        }
    }

    fn new_block(&mut self, v: usize) -> Block {
        self.vs[v].offset = 0.0;
        let mut b = Block {
            vars: Vec::new(),
            posn: 0.0,
            ps: PositionStats::new(self.vs[v].scale),
        };
        b.add_variable(v, &self.vs[v]);
        b
    }

    fn insert(&mut self, b: Block) -> usize {
        let idx = self.blocks.len();
        for &v in &b.vars {
            self.vs[v].block = idx;
        }
        self.blocks.push(b);
        idx
    }

    fn remove(&mut self, idx: usize) {
        self.blocks.swap_remove(idx);
        if let Some(moved) = self.blocks.get(idx) {
            for &v in &moved.vars {
                self.vs[v].block = idx;
            }
        }
    }

    fn dfdv(&self, v: usize) -> f64 {
        2.0 * self.vs[v].weight * (self.position(v) - self.vs[v].desired_position)
    }

    fn slack(&self, c: usize) -> f64 {
        let con = &self.cs[c];
        if con.unsatisfiable {
            return f64::MAX;
        }
        self.vs[con.right].scale * self.position(con.right)
            - con.gap
            - self.vs[con.left].scale * self.position(con.left)
    }

    fn mark_unsatisfiable(&mut self, c: usize) {
        self.cs[c].unsatisfiable = true;
        tracing::warn!(
            constraint = c,
            left = self.cs[c].left,
            right = self.cs[c].right,
            gap = self.cs[c].gap,
            equality = self.cs[c].equality,
            "vpsc constraint is unsatisfiable"
        );
    }

    /// Active constraints incident to `v`, paired with the variable at their other end,
    /// skipping the edge back to `prev`.
    fn active_neighbours(&self, v: usize, prev: Option<usize>) -> Vec<(usize, usize)> {
        let var = &self.vs[v];
        let outgoing = var
            .c_out
            .iter()
            .map(|&c| (c, self.cs[c].right));
        let incoming = var.c_in.iter().map(|&c| (c, self.cs[c].left));
        outgoing
            .chain(incoming)
            .filter(|&(c, next)| self.cs[c].active && Some(next) != prev)
            .collect()
    }

    /// Lower multiplier wins; equal multipliers go to the lower constraint index.
    fn more_negative(&self, c: usize, than: Option<usize>) -> bool {
        match than {
            None => true,
            Some(m) => {
                let (a, b) = (self.cs[c].lm, self.cs[m].lm);
                a < b || (a == b && c < m)
            }
        }
    }

    /// Computes multipliers for every active constraint reachable from `v` without going back
    /// through `u`, tracking the most negative non-equality constraint in `min_lm`.
    fn compute_lm(&mut self, v: usize, u: Option<usize>, min_lm: &mut Option<usize>) -> f64 {
        let mut dfdv = self.dfdv(v);
        for (c, next) in self.active_neighbours(v, u) {
            let sub = self.compute_lm(next, Some(v), min_lm);
            if next == self.cs[c].right {
                dfdv += sub * self.vs[self.cs[c].left].scale;
                self.cs[c].lm = sub;
            } else {
                dfdv += sub * self.vs[self.cs[c].right].scale;
                self.cs[c].lm = -sub;
            }
            if !self.cs[c].equality && self.more_negative(c, *min_lm) {
                *min_lm = Some(c);
            }
        }
        dfdv / self.vs[v].scale
    }

    fn find_min_lm(&mut self, b: usize) -> Option<usize> {
        let start = self.blocks[b].vars[0];
        let mut m = None;
        self.compute_lm(start, None, &mut m);
        m
    }

    fn find_min_lm_between(&mut self, lv: usize, rv: usize) -> Option<usize> {
        let mut ignored = None;
        self.compute_lm(lv, None, &mut ignored);
        let mut path = Vec::new();
        self.find_path(lv, None, rv, &mut path);
        let mut m = None;
        for (c, next) in path {
            if !self.cs[c].equality && self.cs[c].right == next && self.more_negative(c, m) {
                m = Some(c);
            }
        }
        m
    }

    fn find_path(
        &self,
        v: usize,
        prev: Option<usize>,
        to: usize,
        path: &mut Vec<(usize, usize)>,
    ) -> bool {
        let mut end_found = false;
        for (c, next) in self.active_neighbours(v, prev) {
            if !end_found && (next == to || self.find_path(next, Some(v), to, path)) {
                end_found = true;
                path.push((c, next));
            }
        }
        end_found
    }

    fn is_active_directed_path_between(&self, u: usize, v: usize) -> bool {
        if u == v {
            return true;
        }
        self.vs[u].c_out.iter().rev().any(|&c| {
            self.cs[c].active && self.is_active_directed_path_between(self.cs[c].right, v)
        })
    }

    fn populate_split_block(&mut self, b: &mut Block, v: usize, prev: Option<usize>) {
        for (c, next) in self.active_neighbours(v, prev) {
            let gap = self.cs[c].gap;
            self.vs[next].offset = self.vs[v].offset
                + if next == self.cs[c].right { gap } else { -gap };
            b.add_variable(next, &self.vs[next]);
            self.populate_split_block(b, next, Some(v));
        }
    }

    fn create_split_block(&mut self, start: usize) -> Block {
        let mut b = self.new_block(start);
        self.populate_split_block(&mut b, start, None);
        b
    }

    /// Deactivates `c` and replaces its block with the two halves on either side of it.
    fn split_at(&mut self, c: usize) {
        let old = self.vs[self.cs[c].left].block;
        self.cs[c].active = false;
        let lb = self.create_split_block(self.cs[c].left);
        let rb = self.create_split_block(self.cs[c].right);
        self.insert(lb);
        self.insert(rb);
        self.remove(old);
        tracing::trace!(constraint = c, blocks = self.blocks.len(), "vpsc split");
    }

    fn split_between(&mut self, vl: usize, vr: usize) -> Option<usize> {
        let c = self.find_min_lm_between(vl, vr)?;
        self.split_at(c);
        Some(c)
    }

    fn update_block_positions(&mut self) {
        for b in 0..self.blocks.len() {
            let mut ps = self.blocks[b].ps;
            ps.reset();
            for &v in &self.blocks[b].vars {
                ps.add_variable(&self.vs[v]);
            }
            self.blocks[b].ps = ps;
            self.blocks[b].posn = ps.position();
        }
    }

    /// Splits the block holding the single most negative multiplier across all blocks.
    fn split_blocks(&mut self) -> bool {
        self.update_block_positions();
        let mut best: Option<usize> = None;
        for b in 0..self.blocks.len() {
            let Some(c) = self.find_min_lm(b) else {
                continue;
            };
            if self.cs[c].lm < LAGRANGIAN_TOLERANCE && self.more_negative(c, best) {
                best = Some(c);
            }
        }
        let Some(c) = best else {
            return false;
        };
        self.split_at(c);
        self.inactive.push(c);
        true
    }

    fn merge(&mut self, c: usize) {
        let (left, right, gap) = (self.cs[c].left, self.cs[c].right, self.cs[c].gap);
        let l = self.vs[left].block;
        let r = self.vs[right].block;
        let dist = self.vs[right].offset - self.vs[left].offset - gap;
        if self.blocks[l].vars.len() < self.blocks[r].vars.len() {
            self.merge_across(r, l, c, dist);
            self.remove(l);
        } else {
            self.merge_across(l, r, c, -dist);
            self.remove(r);
        }
        tracing::trace!(constraint = c, blocks = self.blocks.len(), "vpsc merge");
    }

    fn merge_across(&mut self, into: usize, from: usize, c: usize, dist: f64) {
        self.cs[c].active = true;
        let moved = std::mem::take(&mut self.blocks[from].vars);
        for v in moved {
            self.vs[v].offset += dist;
            self.vs[v].block = into;
            let var = &self.vs[v];
            self.blocks[into].add_variable(v, var);
        }
        self.blocks[into].posn = self.blocks[into].ps.position();
    }

    fn most_violated(&mut self) -> Option<usize> {
        let mut min_slack = f64::MAX;
        let mut found = None;
        let n = self.inactive.len();
        let mut delete_point = n;
        for i in 0..n {
            let c = self.inactive[i];
            if self.cs[c].unsatisfiable {
                continue;
            }
            let slack = self.slack(c);
            if self.cs[c].equality || slack < min_slack {
                min_slack = slack;
                found = Some(c);
                delete_point = i;
                if self.cs[c].equality {
                    break;
                }
            }
        }
        let c = found?;
        if delete_point != n
            && ((min_slack < ZERO_UPPERBOUND && !self.cs[c].active) || self.cs[c].equality)
        {
            self.inactive.swap_remove(delete_point);
        }
        Some(c)
    }
}
