use narwhal::link_lengths::{
    generate_directed_edge_constraints, jaccard_link_lengths, strongly_connected_components,
    symmetric_diff_link_lengths,
};
use narwhal::{Axis, LayoutConstraint, SeparationConstraint};

const LINKS: [(usize, usize); 4] = [(0, 1), (1, 2), (2, 0), (2, 3)];

#[test]
fn symmetric_difference_lengthens_links_between_different_neighbourhoods() {
    let l = symmetric_diff_link_lengths(&LINKS, 1.0);
    assert!((l[0] - (1.0 + 2f64.sqrt())).abs() < 1e-12, "{l:?}");
    assert!((l[3] - 3.0).abs() < 1e-12, "{l:?}");
}

#[test]
fn jaccard_ignores_leaves() {
    let l = jaccard_link_lengths(&LINKS, 1.0);
    assert_eq!(l[3], 1.0);
    assert!((l[0] - 4.0 / 3.0).abs() < 1e-12, "{l:?}");
}

#[test]
fn cycle_forms_one_component() {
    let mut comps = strongly_connected_components(4, &LINKS);
    for c in &mut comps {
        c.sort_unstable();
    }
    comps.sort();
    assert_eq!(comps, vec![vec![0, 1, 2], vec![3]]);
}

#[test]
fn only_links_leaving_a_cycle_are_constrained() {
    let cs = generate_directed_edge_constraints(4, &LINKS, Axis::Y, |i| 10.0 * (i + 1) as f64);
    assert_eq!(
        cs,
        vec![LayoutConstraint::Separation(SeparationConstraint {
            axis: Axis::Y,
            left: 2,
            right: 3,
            gap: 40.0,
            equality: false,
        })]
    );
}
