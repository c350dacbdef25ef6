use narwhal::geom::{convex_hull, is_left};
use narwhal::{Calculator, Point, Rectangle, TangentVisibilityGraph};

#[test]
fn hull_of_a_triangle_with_an_interior_point() {
    let pts = [
        Point::new(0.0, 0.0),
        Point::new(10.0, 0.0),
        Point::new(5.0, 8.0),
        Point::new(5.0, 2.0),
    ];
    let h = convex_hull(&pts);
    assert_eq!(h.len(), 3, "{h:?}");
    assert!(!h.contains(&Point::new(5.0, 2.0)));
}

#[test]
fn hull_of_three_points_winds_counter_clockwise() {
    let pts = [Point::new(5.0, 8.0), Point::new(10.0, 0.0), Point::new(0.0, 0.0)];
    let h = convex_hull(&pts);
    assert_eq!(h, vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0), Point::new(5.0, 8.0)]);
    for i in 0..h.len() {
        let (a, b, c) = (h[i], h[(i + 1) % 3], h[(i + 2) % 3]);
        assert!(is_left(a, b, c) > 0.0, "{a:?} {b:?} {c:?}");
    }
}

#[test]
fn hull_of_collinear_points_is_its_endpoints() {
    let pts: Vec<Point> = (0..5).map(|i| Point::new(i as f64, 2.0 * i as f64)).collect();
    let h = convex_hull(&pts);
    assert_eq!(h, vec![Point::new(0.0, 0.0), Point::new(4.0, 8.0)]);
}

#[test]
fn shortest_visible_path_wraps_around_an_obstacle() {
    let obstacle = Rectangle::new(-1.0, 1.0, -1.0, 1.0);
    let mut g = TangentVisibilityGraph::new(vec![obstacle.vertices()]);
    let start = g.add_point(Point::new(-10.0, 0.0), None);
    let end = g.add_point(Point::new(10.0, 0.0), None);
    assert!(!g.add_edge_if_visible(start, end, None, None));

    let c = Calculator::new(g.vertices.len(), &g.edges, |e| e.source, |e| e.target, |e| e.length(&g.vertices))
        .unwrap();
    let path = c.path_from_node_to_node(start, end);
    assert_eq!(path.len(), 4, "{path:?}");
    let expected = 2.0 * 82f64.sqrt() + 2.0;
    let d = c.distances_from_node(start)[end];
    assert!((d - expected).abs() < 1e-9, "{d} vs {expected}");
    for &v in &path[1..3] {
        assert_eq!(g.vertices[v].poly_id, Some(0));
        assert_eq!(g.vertices[v].p.y.abs(), 1.0);
    }
}

#[test]
fn unobstructed_points_see_each_other() {
    let obstacle = Rectangle::new(-1.0, 1.0, 5.0, 7.0);
    let mut g = TangentVisibilityGraph::new(vec![obstacle.vertices()]);
    let a = g.add_point(Point::new(-10.0, 0.0), None);
    let b = g.add_point(Point::new(10.0, 0.0), None);
    assert!(g.add_edge_if_visible(a, b, None, None));
    // the same edge is never added twice
    assert!(!g.add_edge_if_visible(a, b, None, None));
}
