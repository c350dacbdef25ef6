//! Splitting a graph into connected components and packing the components onto the canvas.

use crate::model::Node;

/// Gap between packed components.
const PADDING: f64 = 10.0;
const GOLDEN_SECTION: f64 = 1.618_033_988_749_895;
const FLOAT_EPSILON: f64 = 1e-4;
const MAX_ITERATIONS: usize = 100;

/// Connected components of the undirected graph, each listing node indices in discovery order.
/// Components are ordered by their lowest node index.
pub fn separate_graphs(n: usize, links: &[(usize, usize)]) -> Vec<Vec<usize>> {
    let mut ways: Vec<Vec<usize>> = vec![Vec::new(); n];
    for &(u, v) in links {
        if u < n && v < n {
            ways[u].push(v);
            ways[v].push(u);
        }
    }
    let mut marked = vec![false; n];
    let mut graphs = Vec::new();
    for start in 0..n {
        if marked[start] {
            continue;
        }
        let mut component = Vec::new();
        let mut stack = vec![start];
        marked[start] = true;
        while let Some(u) = stack.pop() {
            component.push(u);
            for &v in ways[u].iter().rev() {
                if !marked[v] {
                    marked[v] = true;
                    stack.push(v);
                }
            }
        }
        graphs.push(component);
    }
    graphs
}

#[derive(Debug, Clone)]
struct PackedGraph {
    members: Vec<usize>,
    min_x: f64,
    min_y: f64,
    width: f64,
    height: f64,
    x: f64,
    y: f64,
    bottom: f64,
    space_left: f64,
}

#[derive(Debug, Default)]
struct Packer {
    line: Vec<usize>,
    real_width: f64,
    real_height: f64,
    global_bottom: f64,
}

impl Packer {
    /// Places every graph for rows at most `max_width` wide; returns the distance of the
    /// packing's aspect ratio from `desired_ratio`.
    fn step(&mut self, data: &mut [PackedGraph], max_width: f64, desired_ratio: f64) -> f64 {
        self.line.clear();
        self.real_width = 0.0;
        self.real_height = 0.0;
        self.global_bottom = 0.0;
        for i in 0..data.len() {
            self.put_rect(data, i, max_width);
        }
        if self.real_height == 0.0 {
            return f64::INFINITY;
        }
        (self.real_width / self.real_height - desired_ratio).abs()
    }

    fn put_rect(&mut self, data: &mut [PackedGraph], i: usize, max_width: f64) {
        let (w, h) = (data[i].width, data[i].height);
        let parent = self.line.iter().copied().find(|&p| {
            data[p].space_left >= h && data[p].x + data[p].width + w + PADDING - max_width <= FLOAT_EPSILON
        });
        self.line.push(i);
        match parent {
            Some(p) => {
                data[i].x = data[p].x + data[p].width + PADDING;
                data[i].y = data[p].bottom;
                data[i].space_left = h;
                data[i].bottom = data[i].y;
                data[p].space_left -= h + PADDING;
                data[p].bottom += h + PADDING;
            }
            None => {
                data[i].y = self.global_bottom;
                self.global_bottom += h + PADDING;
                data[i].x = 0.0;
                data[i].bottom = data[i].y;
                data[i].space_left = h;
            }
        }
        let r = &data[i];
        if r.y + r.height - self.real_height > -FLOAT_EPSILON {
            self.real_height = r.y + r.height;
        }
        if r.x + r.width - self.real_width > -FLOAT_EPSILON {
            self.real_width = r.x + r.width;
        }
    }
}

/// Packs `graphs` (node-index lists) into rows whose width is chosen by golden-section search
/// so that the packing's aspect ratio is as close as possible to `desired_ratio`, then
/// translates every component so the packing is centred on a `w × h` canvas.
///
/// Nodes without a size count as `node_size` square. Components move rigidly.
pub fn apply_packing(
    graphs: &[Vec<usize>],
    nodes: &mut [Node],
    w: f64,
    h: f64,
    node_size: f64,
    desired_ratio: f64,
) {
    let mut data: Vec<PackedGraph> = graphs
        .iter()
        .filter(|g| !g.is_empty())
        .map(|g| bounding_box(g, nodes, node_size))
        .collect();
    if data.is_empty() {
        return;
    }
    data.sort_by(|a, b| b.height.total_cmp(&a.height));

    // Narrowest component: the lower end of the row-width search and its resolution.
    let min_width = data.iter().map(|g| g.width).fold(f64::INFINITY, f64::min);
    let entire_width: f64 = data.iter().map(|g| g.width + PADDING).sum();
    let mut packer = Packer::default();

    let (mut left, mut right) = (min_width, entire_width);
    let (mut x1, mut x2) = (left, right);
    let (mut f_x1, mut f_x2) = (f64::MAX, f64::MAX);
    let (mut recompute_x1, mut recompute_x2) = (true, true);
    let mut best = (f64::INFINITY, right);
    let (mut dx, mut df) = (f64::MAX, f64::MAX);
    let mut iterations = 0;
    while dx > min_width || df > FLOAT_EPSILON {
        if recompute_x1 {
            x1 = right - (right - left) / GOLDEN_SECTION;
            f_x1 = packer.step(&mut data, x1, desired_ratio);
        }
        if recompute_x2 {
            x2 = left + (right - left) / GOLDEN_SECTION;
            f_x2 = packer.step(&mut data, x2, desired_ratio);
        }
        dx = (x1 - x2).abs();
        df = (f_x1 - f_x2).abs();
        if f_x1 < best.0 {
            best = (f_x1, x1);
        }
        if f_x2 < best.0 {
            best = (f_x2, x2);
        }
        if f_x1 > f_x2 {
            left = x1;
            x1 = x2;
            f_x1 = f_x2;
            (recompute_x1, recompute_x2) = (false, true);
        } else {
            right = x2;
            x2 = x1;
            f_x2 = f_x1;
            (recompute_x1, recompute_x2) = (true, false);
        }
        iterations += 1;
        if iterations > MAX_ITERATIONS {
            break;
        }
    }
    packer.step(&mut data, best.1, desired_ratio);

    for g in &data {
        let offset_x = g.x - g.min_x + w / 2.0 - packer.real_width / 2.0;
        let offset_y = g.y - g.min_y + h / 2.0 - packer.real_height / 2.0;
        for &i in &g.members {
            nodes[i].x += offset_x;
            nodes[i].y += offset_y;
        }
    }
    tracing::debug!(
        components = data.len(),
        width = packer.real_width,
        height = packer.real_height,
        "packed disconnected components"
    );
}

fn bounding_box(members: &[usize], nodes: &[Node], node_size: f64) -> PackedGraph {
    let (mut min_x, mut min_y) = (f64::MAX, f64::MAX);
    let (mut max_x, mut max_y) = (f64::MIN, f64::MIN);
    for &i in members {
        let v = &nodes[i];
        let hw = v.width.unwrap_or(node_size) / 2.0;
        let hh = v.height.unwrap_or(node_size) / 2.0;
        min_x = min_x.min(v.x - hw);
        max_x = max_x.max(v.x + hw);
        min_y = min_y.min(v.y - hh);
        max_y = max_y.max(v.y + hh);
    }
    PackedGraph {
        members: members.to_vec(),
        min_x,
        min_y,
        width: max_x - min_x,
        height: max_y - min_y,
        x: 0.0,
        y: 0.0,
        bottom: 0.0,
        space_left: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn components_are_found_in_index_order() {
        let links = [(0, 2), (3, 4), (2, 5)];
        let graphs = separate_graphs(6, &links);
        let mut sorted: Vec<Vec<usize>> = graphs
            .iter()
            .map(|g| {
                let mut g = g.clone();
                g.sort_unstable();
                g
            })
            .collect();
        sorted.sort();
        assert_eq!(sorted, vec![vec![0, 2, 5], vec![1], vec![3, 4]]);
        assert_eq!(graphs[0][0], 0);
        assert_eq!(graphs[1], vec![1]);
    }
}
