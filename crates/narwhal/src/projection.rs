//! Per-axis projection of node positions onto user, non-overlap and group constraints.
//!
//! Each call builds a fresh VPSC problem for one axis: one variable per node, plus a min/max
//! boundary variable per group when overlaps are avoided. Group boundary variables sit at
//! indices `n + 2 * g` and `n + 2 * g + 1`, matching the descent points the layout allocates
//! for groups.

use tracing::warn;

use crate::descent::{AxisProjection, Locks};
use crate::error::{Error, Result};
use crate::model::{Axis, Group, LayoutConstraint, Node};
use crate::rectangle::{MIN_SEPARATION, Rectangle, generate_constraints};
use crate::vpsc::{Constraint, Solver, Variable};

/// Projection weight of a pinned node without its own `fixed_weight`.
pub const DEFAULT_FIXED_WEIGHT: f64 = 1000.0;

#[derive(Debug, Clone)]
pub struct Projection {
    half_sizes: Vec<(f64, f64)>,
    fixed_weights: Vec<f64>,
    groups: Vec<Group>,
    root: Option<Group>,
    avoid_overlaps: bool,
    x_constraints: Vec<Constraint>,
    y_constraints: Vec<Constraint>,
    alignments: Vec<(Axis, Vec<usize>)>,
    node_bounds: Vec<Rectangle>,
    group_bounds: Vec<Rectangle>,
}

impl Projection {
    /// `root` lists the top-level leaves and groups; group constraints are only generated
    /// when it is given and `avoid_overlaps` is set. Without a root, overlap avoidance
    /// separates every pair of node boxes and groups are ignored.
    pub fn new(
        nodes: &[Node],
        groups: &[Group],
        root: Option<&Group>,
        constraints: &[LayoutConstraint],
        avoid_overlaps: bool,
    ) -> Result<Self> {
        let n = nodes.len();
        validate_groups(n, groups, root)?;

        let mut x_constraints = Vec::new();
        let mut y_constraints = Vec::new();
        let mut alignments = Vec::new();
        for (index, c) in constraints.iter().enumerate() {
            for node in c.nodes() {
                if node >= n {
                    return Err(Error::NodeOutOfRange {
                        index: node,
                        count: n,
                    });
                }
            }
            let (axis, cs) = match c {
                LayoutConstraint::Separation(s) => {
                    if s.left == s.right {
                        return Err(Error::InvalidConstraint {
                            index,
                            reason: "separation must relate two different nodes",
                        });
                    }
                    let con = if s.equality {
                        Constraint::equality(s.left, s.right, s.gap)
                    } else {
                        Constraint::new(s.left, s.right, s.gap)
                    };
                    (s.axis, vec![con])
                }
                LayoutConstraint::Alignment(a) => {
                    let Some(first) = a.offsets.first() else {
                        continue;
                    };
                    let cs = a.offsets[1..]
                        .iter()
                        .filter(|o| o.node != first.node)
                        .map(|o| Constraint::equality(first.node, o.node, o.offset))
                        .collect();
                    alignments.push((a.axis, a.offsets.iter().map(|o| o.node).collect()));
                    (a.axis, cs)
                }
            };
            match axis {
                Axis::X => x_constraints.extend(cs),
                Axis::Y => y_constraints.extend(cs),
            }
        }

        Ok(Self {
            half_sizes: nodes
                .iter()
                .map(|v| (v.width.unwrap_or(0.0) / 2.0, v.height.unwrap_or(0.0) / 2.0))
                .collect(),
            fixed_weights: nodes
                .iter()
                .map(|v| v.fixed_weight.unwrap_or(DEFAULT_FIXED_WEIGHT))
                .collect(),
            groups: groups.to_vec(),
            root: root.cloned(),
            avoid_overlaps,
            x_constraints,
            y_constraints,
            alignments,
            node_bounds: vec![Rectangle::empty(); n],
            group_bounds: vec![Rectangle::empty(); groups.len()],
        })
    }

    /// Node boxes as of the most recent projection.
    pub fn node_bounds(&self) -> &[Rectangle] {
        &self.node_bounds
    }

    /// Group boxes (padding included) as of the most recent projection with overlap avoidance.
    pub fn group_bounds(&self) -> &[Rectangle] {
        &self.group_bounds
    }

    /// Spreads nodes that share an alignment constraint along the perpendicular axis until
    /// their boxes no longer overlap there, so the alignment can be met without overlaps.
    ///
    /// Does nothing unless overlaps are avoided.
    pub fn make_feasible(&self, x: &mut [f64], y: &mut [f64]) {
        if !self.avoid_overlaps {
            return;
        }
        for (axis, members) in &self.alignments {
            let (pos, size): (&mut [f64], Vec<f64>) = match axis {
                Axis::X => (&mut *y, self.half_sizes.iter().map(|s| s.1).collect()),
                Axis::Y => (&mut *x, self.half_sizes.iter().map(|s| s.0).collect()),
            };
            let mut order: Vec<usize> = members.clone();
            order.sort_by(|&a, &b| pos[a].total_cmp(&pos[b]));
            for w in 1..order.len() {
                let (p, v) = (order[w - 1], order[w]);
                let next = pos[p] + size[p] + size[v];
                if next > pos[v] {
                    pos[v] = next;
                }
            }
        }
    }

    fn project(&mut self, axis: Axis, x0: &[f64], y0: &[f64], desired: &mut [f64], locks: &Locks) {
        let n = self.half_sizes.len();
        if x0.len() < n || y0.len() < n || desired.len() < n {
            warn!(
                nodes = n,
                coordinates = desired.len(),
                "projection skipped: fewer coordinates than nodes"
            );
            return;
        }
        for (i, &(hw, hh)) in self.half_sizes.iter().enumerate() {
            self.node_bounds[i] = Rectangle::new(x0[i] - hw, x0[i] + hw, y0[i] - hh, y0[i] + hh);
        }
        let start = match axis {
            Axis::X => x0,
            Axis::Y => y0,
        };

        let mut vs = Vec::with_capacity(n + 2 * self.groups.len());
        for (i, d) in desired.iter_mut().enumerate().take(n) {
            let weight = match locks.get(i).and_then(|p| p.get(axis.index())) {
                Some(&p) => {
                    *d = p;
                    self.fixed_weights[i]
                }
                None => 1.0,
            };
            vs.push(Variable::with_weight(*d, weight));
        }

        let mut cs = match axis {
            Axis::X => self.x_constraints.clone(),
            Axis::Y => self.y_constraints.clone(),
        };
        let with_groups = self.avoid_overlaps && self.root.is_some();
        if with_groups {
            self.refresh_group_bounds();
            let mut boundary = vec![0.0; 2 * self.groups.len()];
            if let Some(root) = &self.root {
                cs.extend(self.group_constraints(root, None, axis, &mut boundary));
            }
            for (gi, g) in self.groups.iter().enumerate() {
                for side in 0..2 {
                    let var = n + 2 * gi + side;
                    let d = desired
                        .get(var)
                        .copied()
                        .filter(|d| d.is_finite())
                        .unwrap_or(boundary[2 * gi + side]);
                    vs.push(Variable::with_weight(d, g.stiffness));
                }
            }
        } else if self.avoid_overlaps {
            let vars: Vec<usize> = (0..n).collect();
            cs.extend(generate_constraints(&self.node_bounds, &vars, axis, MIN_SEPARATION));
        }

        let starts: Vec<f64> = vs
            .iter()
            .enumerate()
            .map(|(i, v)| {
                start
                    .get(i)
                    .copied()
                    .filter(|s| s.is_finite())
                    .unwrap_or(v.desired_position)
            })
            .collect();
        let var_count = vs.len();
        let mut solver = match Solver::new(vs, cs) {
            Ok(s) => s,
            Err(err) => {
                warn!(%err, ?axis, "projection skipped");
                return;
            }
        };
        solver.set_starting_positions(&starts);
        solver.solve();

        for i in 0..n {
            let p = solver.position(i);
            desired[i] = p;
            match axis {
                Axis::X => self.node_bounds[i].set_x_centre(p),
                Axis::Y => self.node_bounds[i].set_y_centre(p),
            }
        }
        if with_groups {
            for v in n..var_count {
                if let Some(slot) = desired.get_mut(v) {
                    *slot = solver.position(v);
                }
            }
            self.refresh_group_bounds();
        }
    }

    fn refresh_group_bounds(&mut self) {
        if let Some(root) = &self.root {
            compute_group_bounds(&self.node_bounds, &self.groups, root, &mut self.group_bounds);
        }
    }

    /// Containment and non-overlap constraints for the contents of `group`, recursively.
    ///
    /// A contained group is represented among its siblings by its bounding box tied to its min
    /// variable; constraints pointing out of it are then retargeted to its max variable and all
    /// gaps shifted from the box centre to the boundary variables.
    fn group_constraints(
        &self,
        group: &Group,
        index: Option<usize>,
        axis: Axis,
        boundary: &mut [f64],
    ) -> Vec<Constraint> {
        let n = self.half_sizes.len();
        let children: Vec<usize> = group
            .groups
            .iter()
            .copied()
            .filter(|&c| !self.group_bounds[c].is_empty())
            .collect();

        let mut cs = Vec::new();
        for &c in &children {
            cs.extend(self.group_constraints(&self.groups[c], Some(c), axis, boundary));
        }

        let mut rs = Vec::new();
        let mut vars = Vec::new();
        if let Some(gi) = index {
            let b = self.group_bounds[gi];
            let (c, s) = (b.centre_on(axis), b.size_on(axis) / 2.0);
            let (open, close) = (b.open_on(axis), b.close_on(axis));
            let p = group.padding;
            let (min, max) = (c - s + p / 2.0, c + s - p / 2.0);
            boundary[2 * gi] = min;
            boundary[2 * gi + 1] = max;
            rs.push(Rectangle::on_axis(axis, open, close, min, p));
            vars.push(n + 2 * gi);
            rs.push(Rectangle::on_axis(axis, open, close, max, p));
            vars.push(n + 2 * gi + 1);
        }
        for &l in &group.leaves {
            rs.push(self.node_bounds[l]);
            vars.push(l);
        }
        for &c in &children {
            rs.push(self.group_bounds[c]);
            vars.push(n + 2 * c);
        }

        let mut level = generate_constraints(&rs, &vars, axis, MIN_SEPARATION);
        for &c in &children {
            let (min_var, max_var) = (n + 2 * c, n + 2 * c + 1);
            let adjustment = (self.groups[c].padding - self.group_bounds[c].size_on(axis)) / 2.0;
            for con in &mut level {
                if con.right == min_var {
                    con.gap += adjustment;
                }
                if con.left == min_var {
                    con.left = max_var;
                    con.gap += adjustment;
                }
            }
        }
        cs.extend(level);
        cs
    }
}

impl AxisProjection for Projection {
    fn project_x(&mut self, x0: &[f64], y0: &[f64], x: &mut [f64], locks: &Locks) {
        self.project(Axis::X, x0, y0, x, locks);
    }

    fn project_y(&mut self, x0: &[f64], y0: &[f64], y: &mut [f64], locks: &Locks) {
        self.project(Axis::Y, x0, y0, y, locks);
    }
}

/// Bounds of `root` and, into `out`, of every group below it: the union of member boxes,
/// grown by the group's padding. Groups with no members stay empty.
pub fn compute_group_bounds(
    node_bounds: &[Rectangle],
    groups: &[Group],
    root: &Group,
    out: &mut [Rectangle],
) -> Rectangle {
    let mut b = root
        .leaves
        .iter()
        .filter_map(|&l| node_bounds.get(l))
        .fold(Rectangle::empty(), |r, c| c.union(&r));
    for &c in &root.groups {
        let Some(child) = groups.get(c) else {
            continue;
        };
        let cb = compute_group_bounds(node_bounds, groups, child, out);
        if let Some(slot) = out.get_mut(c) {
            *slot = cb;
        }
        b = cb.union(&b);
    }
    if b.is_empty() { b } else { b.inflate(root.padding) }
}

/// Checks that leaf and group indices are in range and that every group below `root` is
/// reached exactly once.
pub(crate) fn validate_groups(n: usize, groups: &[Group], root: Option<&Group>) -> Result<()> {
    let count = groups.len();
    for g in groups.iter().chain(root) {
        for &l in &g.leaves {
            if l >= n {
                return Err(Error::NodeOutOfRange { index: l, count: n });
            }
        }
        for &c in &g.groups {
            if c >= count {
                return Err(Error::GroupOutOfRange { index: c, count });
            }
        }
    }
    let mut seen = vec![false; count];
    let mut stack: Vec<usize> = root.map(|r| r.groups.clone()).unwrap_or_default();
    while let Some(c) = stack.pop() {
        if seen[c] {
            return Err(Error::GroupCycle { index: c });
        }
        seen[c] = true;
        stack.extend(groups[c].groups.iter().copied());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlignmentConstraint, AlignmentOffset};

    fn square(x: f64, y: f64, s: f64) -> Node {
        Node::at(x, y).with_size(s, s)
    }

    #[test]
    fn pinned_node_wins_over_overlap() {
        let nodes = [square(0.0, 0.0, 10.0), square(4.0, 1.0, 10.0)];
        let mut p = Projection::new(&nodes, &[], None, &[], true).unwrap();
        let mut locks = Locks::default();
        locks.add(0, vec![0.0, 0.0]);
        let (x0, y0) = (vec![0.0, 4.0], vec![0.0, 1.0]);
        let mut x = x0.clone();
        p.project_x(&x0, &y0, &mut x, &locks);
        assert!(x[0].abs() < 0.05, "{x:?}");
        assert!(x[1] - x[0] >= 10.0 - 1e-6, "{x:?}");
    }

    #[test]
    fn leaves_stay_inside_and_outsiders_outside_a_group() {
        let nodes = [
            square(0.0, 0.0, 4.0),
            square(10.0, 0.0, 4.0),
            square(5.0, 0.0, 4.0),
        ];
        let groups = [Group {
            padding: 2.0,
            ..Group::with_leaves([0, 1])
        }];
        let root = Group {
            padding: 0.0,
            leaves: vec![2],
            groups: vec![0],
            ..Group::default()
        };
        let mut p = Projection::new(&nodes, &groups, Some(&root), &[], true).unwrap();
        let locks = Locks::default();
        let x0 = vec![0.0, 10.0, 5.0, -4.0, 14.0];
        let y0 = vec![0.0, 0.0, 0.0, -4.0, 4.0];
        let mut x = x0.clone();
        p.project_x(&x0, &y0, &mut x, &locks);
        let mut y = y0.clone();
        p.project_y(&x, &y0, &mut y, &locks);

        let outsider = p.node_bounds()[2];
        let group = p.group_bounds()[0];
        let shared = outsider.intersection_area(&group);
        assert!(shared < 1e-6, "outsider {outsider:?} overlaps group {group:?}");
        for leaf in [0, 1] {
            let b = p.node_bounds()[leaf];
            assert!(b.min_x >= group.min_x && b.max_x <= group.max_x);
            assert!(b.min_y >= group.min_y && b.max_y <= group.max_y);
        }
    }

    #[test]
    fn alignment_becomes_feasible_by_spreading_perpendicular() {
        let nodes = [square(0.0, 0.0, 10.0), square(3.0, 2.0, 10.0)];
        let align = LayoutConstraint::Alignment(AlignmentConstraint {
            axis: Axis::X,
            offsets: vec![
                AlignmentOffset { node: 0, offset: 0.0 },
                AlignmentOffset { node: 1, offset: 0.0 },
            ],
        });
        let p = Projection::new(&nodes, &[], None, &[align], true).unwrap();
        let (mut x, mut y) = (vec![0.0, 3.0], vec![0.0, 2.0]);
        p.make_feasible(&mut x, &mut y);
        assert_eq!(y, vec![0.0, 10.0]);
        assert_eq!(x, vec![0.0, 3.0]);
    }

    #[test]
    fn rejects_out_of_range_and_nested_twice_groups() {
        let nodes = [Node::at(0.0, 0.0)];
        let bad_leaf = [Group::with_leaves([3])];
        assert!(matches!(
            Projection::new(&nodes, &bad_leaf, None, &[], true),
            Err(Error::NodeOutOfRange { index: 3, .. })
        ));
        let twice = [
            Group::default(),
            Group {
                groups: vec![0],
                ..Group::default()
            },
        ];
        let root = Group {
            groups: vec![0, 1],
            ..Group::default()
        };
        assert!(matches!(
            Projection::new(&nodes, &twice, Some(&root), &[], true),
            Err(Error::GroupCycle { index: 0 })
        ));
    }
}
