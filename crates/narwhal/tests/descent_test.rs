use nalgebra::DMatrix;
use narwhal::{Axis, Descent, LayoutConstraint, Node, Projection};

fn distance(d: &Descent, i: usize, j: usize) -> f64 {
    (d.x[0][i] - d.x[0][j]).hypot(d.x[1][i] - d.x[1][j])
}

fn uniform(n: usize, len: f64) -> DMatrix<f64> {
    DMatrix::from_fn(n, n, |i, j| if i == j { 0.0 } else { len })
}

#[test]
fn pair_settles_at_ideal_distance() {
    let mut d = Descent::new(vec![vec![0.0, 1.0], vec![0.0, 0.0]], uniform(2, 10.0), None).unwrap();
    d.threshold = 1e-10;
    let stress = d.run(200);
    assert!((distance(&d, 0, 1) - 10.0).abs() < 0.1, "{}", distance(&d, 0, 1));
    assert!(stress < 1e-3, "{stress}");
}

#[test]
fn triangle_becomes_equilateral() {
    let mut d = Descent::new(
        vec![vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]],
        uniform(3, 10.0),
        None,
    )
    .unwrap();
    d.threshold = 1e-10;
    d.run(500);
    for (i, j) in [(0, 1), (1, 2), (0, 2)] {
        let l = distance(&d, i, j);
        assert!((l - 10.0).abs() < 0.5, "{i}-{j}: {l}");
    }
}

#[test]
fn stress_never_increases_much_over_a_run() {
    let x = vec![vec![0.0, 3.0, 7.0, 1.0], vec![0.0, 4.0, 1.0, 6.0]];
    let mut d = Descent::new(x, uniform(4, 5.0), None).unwrap();
    let before = d.compute_stress();
    let after = d.run(50);
    assert!(after <= before, "{before} -> {after}");
}

#[test]
fn stress_does_not_increase_from_a_compressed_start() {
    let mut d = Descent::new(
        vec![vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]],
        uniform(3, 30.0),
        None,
    )
    .unwrap();
    d.threshold = 0.0;
    let mut prev = d.compute_stress();
    for step in 0..40 {
        let s = d.run(1);
        assert!(s <= prev + 1e-9, "step {step}: {prev} -> {s}");
        prev = s;
    }
    assert!(prev < 1e-3, "{prev}");
    for (i, j) in [(0, 1), (1, 2), (0, 2)] {
        let l = distance(&d, i, j);
        assert!((l - 30.0).abs() < 0.5, "{i}-{j}: {l}");
    }
}

#[test]
fn projection_keeps_separation_during_descent() {
    let nodes = [Node::at(0.0, 0.0), Node::at(1.0, 0.0)];
    let constraints = [LayoutConstraint::separation(Axis::X, 0, 1, 30.0)];
    let p = Projection::new(&nodes, &[], None, &constraints, false).unwrap();
    let mut d = Descent::new(vec![vec![0.0, 1.0], vec![0.0, 0.0]], uniform(2, 10.0), None).unwrap();
    d.set_projection(Some(Box::new(p)));
    d.run(50);
    assert!(d.x[0][1] - d.x[0][0] >= 30.0 - 1e-6, "{:?}", d.x);
}

#[test]
fn mismatched_rows_are_rejected() {
    let err = Descent::new(vec![vec![0.0, 1.0], vec![0.0]], uniform(2, 1.0), None).unwrap_err();
    assert!(matches!(
        err,
        narwhal::Error::CoordinateLength {
            dimension: 1,
            expected: 2,
            found: 1
        }
    ));
    let err = Descent::new(vec![vec![0.0, 1.0]], uniform(3, 1.0), None).unwrap_err();
    assert!(matches!(err, narwhal::Error::DistanceMatrix { expected: 2, .. }));
}
