use std::cell::RefCell;
use std::rc::Rc;

use narwhal::{
    Axis, Error, EventType, Group, Kick, Layout, LayoutConfig, LayoutConstraint, LayoutHost, Link, Node,
};

fn config(w: f64, h: f64) -> LayoutConfig {
    LayoutConfig {
        size: [w, h],
        ..LayoutConfig::default()
    }
}

fn distance(a: &Node, b: &Node) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

#[test]
fn linked_pair_settles_at_link_length() {
    let mut layout = Layout::new();
    layout
        .set_config(config(200.0, 200.0))
        .set_nodes(vec![Node::at(0.0, 0.0), Node::at(10.0, 0.0)])
        .set_links(vec![Link::new(0, 1).with_length(30.0)]);
    layout.start(50, 0, 0, 0).unwrap();

    let d = distance(&layout.nodes()[0], &layout.nodes()[1]);
    assert!((d - 30.0).abs() < 1.0, "{d}");
    assert!(!layout.is_running());
    assert_eq!(layout.alpha(), 0.0);
}

#[test]
fn unplaced_nodes_start_from_the_centre() {
    let mut layout = Layout::new();
    layout
        .set_config(config(400.0, 300.0))
        .set_nodes(vec![Node::default(); 3])
        .set_links(vec![Link::new(0, 1), Link::new(1, 2)]);
    layout.start(30, 0, 0, 0).unwrap();
    for v in layout.nodes() {
        assert!(v.is_placed(), "{v:?}");
    }
    let cx = layout.nodes().iter().map(|v| v.x).sum::<f64>() / 3.0;
    assert!((cx - 200.0).abs() < 50.0, "{cx}");
}

#[test]
fn flow_layout_orders_a_path() {
    let mut layout = Layout::new();
    layout
        .set_config(config(300.0, 300.0))
        .set_nodes(vec![Node::at(100.0, 0.0), Node::at(50.0, 10.0), Node::at(0.0, 20.0)])
        .set_links(vec![Link::new(0, 1), Link::new(1, 2)])
        .flow_layout(Axis::X, 20.0);
    layout.start(10, 10, 10, 0).unwrap();

    let x: Vec<f64> = layout.nodes().iter().map(|v| v.x).collect();
    assert!(x[1] - x[0] >= 20.0 - 1e-6, "{x:?}");
    assert!(x[2] - x[1] >= 20.0 - 1e-6, "{x:?}");
}

#[test]
fn user_separation_constraint_holds() {
    let mut layout = Layout::new();
    layout
        .set_config(config(300.0, 300.0))
        .set_nodes(vec![Node::at(0.0, 0.0), Node::at(0.0, 5.0)])
        .set_links(vec![Link::new(0, 1)])
        .set_constraints(vec![LayoutConstraint::separation(Axis::Y, 1, 0, 40.0)]);
    layout.start(10, 10, 10, 0).unwrap();
    let (a, b) = (&layout.nodes()[0], &layout.nodes()[1]);
    assert!(a.y - b.y >= 40.0 - 1e-6, "{} {}", a.y, b.y);
}

#[test]
fn events_arrive_start_ticks_end() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let mut layout = Layout::new();
    for t in [EventType::Start, EventType::Tick, EventType::End] {
        let seen = Rc::clone(&seen);
        layout.on(t, move |e| seen.borrow_mut().push((e.event_type, e.stress)));
    }
    layout
        .set_config(config(100.0, 100.0))
        .set_nodes(vec![Node::at(0.0, 0.0), Node::at(1.0, 1.0), Node::at(2.0, 0.0)])
        .set_links(vec![Link::new(0, 1), Link::new(1, 2)]);
    layout.start(5, 0, 0, 0).unwrap();

    let seen = seen.borrow();
    assert_eq!(seen.first().map(|e| e.0), Some(EventType::Start));
    assert_eq!(seen.last().map(|e| e.0), Some(EventType::End));
    assert!(seen.iter().any(|e| e.0 == EventType::Tick));
    assert_eq!(seen.iter().filter(|e| e.0 == EventType::End).count(), 1);
    assert!(seen.last().and_then(|e| e.1).is_some());
}

#[derive(Default)]
struct ManualHost {
    events: Rc<RefCell<Vec<EventType>>>,
}

impl LayoutHost for ManualHost {
    fn on_event(&mut self, event: &narwhal::Event) {
        self.events.borrow_mut().push(event.event_type);
    }

    fn schedule_tick(&mut self) -> Kick {
        Kick::Deferred
    }
}

#[test]
fn deferred_host_drives_ticks_itself() {
    let events = Rc::new(RefCell::new(Vec::new()));
    let host = ManualHost {
        events: Rc::clone(&events),
    };
    let mut layout = Layout::with_host(Box::new(host));
    layout
        .set_config(config(100.0, 100.0))
        .set_nodes(vec![Node::at(0.0, 0.0), Node::at(1.0, 0.0)])
        .set_links(vec![Link::new(0, 1)]);
    layout.start(0, 0, 0, 0).unwrap();
    assert!(layout.is_running());
    assert_eq!(*events.borrow(), vec![EventType::Start]);

    let mut ticks = 0;
    while !layout.tick() {
        ticks += 1;
        assert!(ticks < 10_000);
    }
    assert!(!layout.is_running());
    assert_eq!(events.borrow().last(), Some(&EventType::End));
}

#[test]
fn stop_ends_on_the_next_tick() {
    let mut layout = Layout::with_host(Box::new(ManualHost::default()));
    layout
        .set_config(config(100.0, 100.0))
        .set_nodes(vec![Node::at(0.0, 0.0), Node::at(1.0, 0.0)])
        .set_links(vec![Link::new(0, 1)]);
    layout.start(0, 0, 0, 0).unwrap();
    layout.stop();
    assert_eq!(layout.alpha(), 0.0);
    assert!(layout.tick());
    assert!(!layout.is_running());
}

#[test]
fn fixed_nodes_stay_pinned() {
    let mut pinned = Node::at(50.0, 50.0);
    pinned.fixed = true;
    let mut layout = Layout::new();
    layout
        .set_config(config(100.0, 100.0))
        .set_handle_disconnected(false)
        .set_nodes(vec![pinned, Node::at(52.0, 50.0), Node::at(48.0, 53.0)])
        .set_links(vec![Link::new(0, 1), Link::new(0, 2)]);
    layout.start(20, 0, 0, 0).unwrap();
    let v = &layout.nodes()[0];
    assert_eq!((v.x, v.y), (50.0, 50.0));
}

#[test]
fn avoid_overlaps_separates_boxes() {
    let mut layout = Layout::new();
    layout
        .set_config(LayoutConfig {
            avoid_overlaps: true,
            ..config(300.0, 300.0)
        })
        .set_nodes(
            [(0.0, 0.0), (5.0, 5.0), (10.0, 0.0), (5.0, -5.0)]
                .iter()
                .map(|&(x, y)| Node::at(x, y).with_size(20.0, 20.0))
                .collect(),
        )
        .set_links(vec![Link::new(0, 1), Link::new(1, 2), Link::new(2, 3), Link::new(3, 0)])
        .set_link_distance(5.0);
    layout.start(10, 15, 20, 0).unwrap();

    let boxes: Vec<_> = layout.nodes().iter().map(|v| v.bounds.unwrap()).collect();
    for i in 0..boxes.len() {
        for j in i + 1..boxes.len() {
            let a = boxes[i].intersection_area(&boxes[j]);
            assert!(a < 1e-6, "{i} and {j} overlap by {a}: {boxes:?}");
        }
    }
}

#[test]
fn groups_get_bounds() {
    let mut layout = Layout::new();
    layout
        .set_config(LayoutConfig {
            avoid_overlaps: true,
            ..config(300.0, 300.0)
        })
        .set_nodes(
            (0..4)
                .map(|i| Node::at(10.0 * i as f64, 3.0 * i as f64).with_size(10.0, 10.0))
                .collect(),
        )
        .set_links(vec![Link::new(0, 1), Link::new(1, 2), Link::new(2, 3)]);
    layout
        .set_groups(vec![Group::with_leaves([0, 1]), Group::with_leaves([2, 3])])
        .unwrap();
    layout.start(10, 10, 10, 0).unwrap();

    for g in layout.groups() {
        let b = g.bounds.expect("group bounds");
        assert!(!b.is_empty(), "{b:?}");
        assert!(b.min_x.is_finite() && b.max_y.is_finite(), "{b:?}");
    }
    for v in layout.nodes() {
        assert!(v.is_placed());
    }
}

#[test]
fn disconnected_components_end_up_apart() {
    let mut layout = Layout::new();
    layout
        .set_config(config(400.0, 400.0))
        .set_nodes(
            [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)]
                .iter()
                .map(|&(x, y)| Node::at(x, y).with_size(10.0, 10.0))
                .collect(),
        )
        .set_links(vec![Link::new(0, 1), Link::new(2, 3)]);
    layout.start(20, 0, 0, 0).unwrap();

    let nodes = layout.nodes();
    for a in [0, 1] {
        for b in [2, 3] {
            let (dx, dy) = ((nodes[a].x - nodes[b].x).abs(), (nodes[a].y - nodes[b].y).abs());
            assert!(dx.max(dy) >= 10.0, "{a} and {b}: {dx} {dy}");
        }
    }
}

#[test]
fn user_distance_matrix_replaces_shortest_paths() {
    let mut layout = Layout::new();
    layout
        .set_config(config(100.0, 100.0))
        .set_nodes(vec![Node::at(0.0, 0.0), Node::at(1.0, 0.0)])
        .set_distance_matrix(Some(vec![vec![0.0, 50.0], vec![50.0, 0.0]]));
    layout.start(50, 0, 0, 0).unwrap();
    let d = distance(&layout.nodes()[0], &layout.nodes()[1]);
    assert!((d - 50.0).abs() < 1.0, "{d}");

    layout.set_distance_matrix(Some(vec![vec![0.0]]));
    assert!(matches!(layout.start(1, 0, 0, 0), Err(Error::DistanceMatrix { .. })));
}

#[test]
fn unknown_link_endpoint_is_an_error() {
    let mut layout = Layout::new();
    layout
        .set_nodes(vec![Node::with_id("a")])
        .set_links(vec![Link::new("a", "b")]);
    let err = layout.start(1, 0, 0, 0).unwrap_err();
    assert!(matches!(err, Error::UnknownNode { link: 0, ref node } if node == "b"));
}

#[test]
fn graph_and_config_load_from_json() {
    let config: LayoutConfig = serde_json::from_str(r#"{ "size": [500, 400], "link_distance": 60 }"#).unwrap();
    let nodes: Vec<Node> = serde_json::from_str(
        r#"[{ "id": "a", "width": 20, "height": 20 }, { "id": "b", "width": 20, "height": 20 }]"#,
    )
    .unwrap();
    let links: Vec<Link> = serde_json::from_str(r#"[{ "source": "a", "target": "b" }]"#).unwrap();

    let mut layout = Layout::new();
    layout.set_config(config).set_nodes(nodes).set_links(links);
    layout.start(30, 0, 0, 0).unwrap();
    assert_eq!(layout.link_indices(), &[(0, 1)]);
    let d = distance(&layout.nodes()[0], &layout.nodes()[1]);
    assert!((d - 60.0).abs() < 2.0, "{d}");

    let out = serde_json::to_value(layout.nodes()).unwrap();
    assert_eq!(out[0]["id"], "a");
    assert!(out[0]["bounds"]["X"].is_f64());
}

#[test]
fn edges_route_around_obstacles() {
    let mut layout = Layout::new();
    layout
        .set_nodes(
            [0.0, 50.0, 100.0]
                .iter()
                .map(|&x| Node::at(x, 0.0).with_size(20.0, 20.0))
                .collect(),
        )
        .set_links(vec![Link::new(0, 2)]);
    assert!(matches!(layout.route_edge(0, 0.0, None), Err(Error::RoutingNotPrepared)));

    layout.prepare_edge_routing(0.0).unwrap();
    let mut drawn = 0;
    let mut draw = |g: &narwhal::TangentVisibilityGraph| drawn = g.vertices.len();
    let line = layout.route_edge(0, 0.0, Some(&mut draw)).unwrap();
    assert_eq!(drawn, 14);
    assert_eq!(line.len(), 4, "{line:?}");
    assert!((line[0].x - 10.0).abs() < 1e-9, "{line:?}");
    assert_eq!(line[1].y.abs(), 10.0);
    assert_eq!(line[2].y.abs(), 10.0);
    assert!(line[3].x >= 60.0 && line[3].x <= 90.0 + 1e-9, "{line:?}");
}
