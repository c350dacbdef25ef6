use narwhal::{Constraint, Error, PseudoRandom, Solver, Variable};

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

#[test]
fn satisfied_constraints_leave_desired_positions_alone() {
    let vs = vec![Variable::new(0.0), Variable::new(10.0)];
    let mut s = Solver::new(vs, vec![Constraint::new(0, 1, 5.0)]).unwrap();
    s.solve();
    assert_eq!(s.positions(), vec![0.0, 10.0]);
    assert_eq!(s.cost(), 0.0);
}

#[test]
fn violated_constraint_splits_the_difference() {
    let vs = vec![Variable::new(0.0), Variable::new(0.0)];
    let mut s = Solver::new(vs, vec![Constraint::new(0, 1, 1.0)]).unwrap();
    s.solve();
    assert!(approx(s.position(0), -0.5), "{:?}", s.positions());
    assert!(approx(s.position(1), 0.5), "{:?}", s.positions());
}

#[test]
fn heavy_variable_barely_moves() {
    let vs = vec![Variable::with_weight(0.0, 1000.0), Variable::new(0.0)];
    let mut s = Solver::new(vs, vec![Constraint::new(0, 1, 10.0)]).unwrap();
    s.solve();
    assert!(s.position(0).abs() < 0.02, "{:?}", s.positions());
    assert!(approx(s.position(1) - s.position(0), 10.0));
}

#[test]
fn equality_pulls_variables_together() {
    let vs = vec![Variable::new(0.0), Variable::new(10.0)];
    let mut s = Solver::new(vs, vec![Constraint::equality(0, 1, 3.0)]).unwrap();
    s.solve();
    assert!(approx(s.position(0), 3.5), "{:?}", s.positions());
    assert!(approx(s.position(1), 6.5), "{:?}", s.positions());
}

#[test]
fn chain_of_constraints_is_satisfied() {
    let vs: Vec<Variable> = (0..5).map(|_| Variable::new(2.0)).collect();
    let cs: Vec<Constraint> = (0..4).map(|i| Constraint::new(i, i + 1, 1.0)).collect();
    let mut s = Solver::new(vs, cs).unwrap();
    s.solve();
    let ps = s.positions();
    for w in ps.windows(2) {
        assert!(w[1] - w[0] >= 1.0 - 1e-6, "{ps:?}");
    }
    // symmetric about the shared desired position
    assert!(approx(ps[2], 2.0), "{ps:?}");
    assert!(approx(ps[0] + ps[4], 4.0), "{ps:?}");
}

#[test]
fn invalid_input_is_rejected() {
    let err = Solver::new(vec![Variable::new(f64::NAN)], vec![]).unwrap_err();
    assert!(matches!(err, Error::InvalidVariable { index: 0, .. }));

    let err = Solver::new(vec![Variable::new(0.0)], vec![Constraint::new(0, 3, 1.0)]).unwrap_err();
    assert!(matches!(
        err,
        Error::UnknownVariable {
            constraint: 0,
            variable: 3,
            count: 1
        }
    ));

    let vs = vec![Variable::new(0.0), Variable::new(1.0)];
    let err = Solver::new(vs, vec![Constraint::new(0, 1, f64::INFINITY)]).unwrap_err();
    assert!(matches!(err, Error::InvalidConstraint { index: 0, .. }));
}

#[test]
fn cyclic_equalities_flag_the_closing_constraint() {
    // a + 1 = b, b + 1 = c, c + 1 = a
    let vs = vec![Variable::new(0.0), Variable::new(0.0), Variable::new(0.0)];
    let cs = vec![
        Constraint::equality(0, 1, 1.0),
        Constraint::equality(1, 2, 1.0),
        Constraint::equality(2, 0, 1.0),
    ];
    let mut s = Solver::new(vs, cs).unwrap();
    s.solve();
    let flags: Vec<bool> = s.constraints().iter().map(|c| c.is_unsatisfiable()).collect();
    assert_eq!(flags, vec![false, true, false]);

    let ps = s.positions();
    assert!(approx(ps[1] - ps[0], 1.0), "{ps:?}");
    assert!(approx(ps[0] - ps[2], 1.0), "{ps:?}");
}

#[test]
fn random_acyclic_problems_are_solved_feasibly() {
    let mut rng = PseudoRandom::new(42);
    for round in 0..50 {
        let n = 2 + (rng.next_f64() * 10.0) as usize;
        let vs: Vec<Variable> = (0..n)
            .map(|_| Variable::with_weight(rng.next_between(0.0, 10.0), rng.next_between(1.0, 5.0)))
            .collect();
        let m = (rng.next_f64() * 2.0 * n as f64) as usize;
        let mut cs = Vec::with_capacity(m);
        for _ in 0..m {
            let a = ((rng.next_f64() * n as f64) as usize).min(n - 1);
            let b = ((rng.next_f64() * n as f64) as usize).min(n - 1);
            if a == b {
                continue;
            }
            let gap = rng.next_between(0.0, 3.0);
            cs.push(Constraint::new(a.min(b), a.max(b), gap));
        }
        let mut s = Solver::new(vs, cs).unwrap();
        s.solve();
        let ps = s.positions();
        for c in s.constraints() {
            let slack = ps[c.right] - ps[c.left] - c.gap;
            assert!(
                slack >= -1e-6,
                "round {round}: {} + {} <= {} violated by {slack}: {ps:?}",
                c.left,
                c.gap,
                c.right
            );
            assert!(!c.is_unsatisfiable(), "round {round}");
        }
    }
}
