use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};
use narwhal::{Layout, LayoutConfig, Link, Node, Rectangle, remove_overlaps};
use std::hint::black_box;
use std::time::Duration;

#[derive(Debug, Clone)]
struct GraphSpec {
    nodes: usize,
    links: Vec<(usize, usize)>,
}

impl GraphSpec {
    fn build(&self, avoid_overlaps: bool) -> Layout {
        let mut layout = Layout::new();
        layout
            .set_config(LayoutConfig {
                size: [800.0, 600.0],
                avoid_overlaps,
                ..LayoutConfig::default()
            })
            .set_nodes(
                (0..self.nodes)
                    .map(|i| Node::at((i % 17) as f64 * 13.0, (i % 23) as f64 * 7.0).with_size(20.0, 12.0))
                    .collect(),
            )
            .set_links(self.links.iter().map(|&(u, v)| Link::new(u, v)).collect())
            .set_link_distance(40.0);
        layout
    }
}

fn build_spec(nodes: usize, fanout: usize) -> GraphSpec {
    let mut links = Vec::new();
    // A spine keeps the graph connected.
    for i in 0..nodes.saturating_sub(1) {
        links.push((i, i + 1));
    }
    for i in 0..nodes {
        for k in 2..=(fanout + 1) {
            let to = i * 3 + k;
            if to >= nodes {
                break;
            }
            links.push((i, to));
        }
    }
    GraphSpec { nodes, links }
}

fn bench_layout(c: &mut Criterion) {
    let mut group = c.benchmark_group("layout");
    group.measurement_time(Duration::from_secs(10));

    let cases = [("tree_30_f2", 30usize, 2usize), ("tree_120_f3", 120usize, 3usize)];

    for (name, nodes, fanout) in cases {
        let spec = build_spec(nodes, fanout);
        for avoid_overlaps in [false, true] {
            let id = if avoid_overlaps { "start::avoid_overlaps" } else { "start" };
            group.bench_with_input(BenchmarkId::new(id, name), &spec, |b, spec| {
                b.iter_batched(
                    || spec.build(avoid_overlaps),
                    |mut layout| {
                        layout.start(10, 10, 10, 0).ok();
                        black_box(layout.nodes().len());
                    },
                    BatchSize::LargeInput,
                )
            });
        }
    }

    group.finish();
}

fn bench_remove_overlaps(c: &mut Criterion) {
    let mut group = c.benchmark_group("remove_overlaps");

    for count in [50usize, 400usize] {
        let rects: Vec<Rectangle> = (0..count)
            .map(|i| {
                let x = (i % 20) as f64 * 8.0;
                let y = (i / 20) as f64 * 6.0;
                Rectangle::new(x, x + 12.0, y, y + 9.0)
            })
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(count), &rects, |b, rects| {
            b.iter_batched(
                || rects.clone(),
                |mut rs| {
                    remove_overlaps(black_box(&mut rs)).ok();
                    black_box(rs.len());
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_layout, bench_remove_overlaps);
criterion_main!(benches);
