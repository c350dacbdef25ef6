use narwhal::powergraph::get_groups;
use narwhal::{Group, Layout, Link, Node, PowerEdgeEnd};

fn complete_bipartite() -> Vec<(usize, usize, u32)> {
    let mut links = Vec::new();
    for s in 0..2 {
        for t in 2..5 {
            links.push((s, t, 0));
        }
    }
    links
}

#[test]
fn bipartite_graph_compresses_to_one_power_edge() {
    let g = get_groups(5, &complete_bipartite(), &[], None).unwrap();
    let mut leaves: Vec<Vec<usize>> = g
        .groups
        .iter()
        .map(|g| {
            let mut l = g.leaves.clone();
            l.sort_unstable();
            l
        })
        .collect();
    leaves.sort();
    assert_eq!(leaves, vec![vec![0, 1], vec![2, 3, 4]]);
    assert!(g.groups.iter().all(|g| g.groups.is_empty()));

    assert_eq!(g.power_edges.len(), 1, "{:?}", g.power_edges);
    let e = g.power_edges[0];
    let (PowerEdgeEnd::Group(s), PowerEdgeEnd::Group(t)) = (e.source, e.target) else {
        panic!("expected a group-to-group edge: {e:?}");
    };
    assert!(g.groups[s].leaves.contains(&0));
    assert!(g.groups[t].leaves.contains(&2));
}

#[test]
fn predefined_groups_survive_compression() {
    let predefined = Group {
        padding: 7.0,
        ..Group::with_leaves([0, 1])
    };
    let root = Group {
        groups: vec![0],
        ..Group::with_leaves([2, 3])
    };
    let g = get_groups(4, &[], &[predefined], Some(&root)).unwrap();
    assert_eq!(g.groups.len(), 1);
    assert_eq!(g.groups[0].leaves, vec![0, 1]);
    assert_eq!(g.groups[0].padding, 7.0);
    assert!(g.power_edges.is_empty());
}

#[test]
fn layout_installs_power_graph_groups() {
    let mut layout = Layout::new();
    layout
        .set_nodes(vec![Node::default(); 5])
        .set_links(complete_bipartite().iter().map(|&(s, t, _)| Link::new(s, t)).collect());
    let g = layout.power_graph_groups().unwrap();
    assert_eq!(layout.groups().len(), g.groups.len());
    let root = layout.root_group().unwrap();
    assert!(root.leaves.is_empty());
    assert_eq!(root.groups.len(), 2);
    assert!(layout.nodes().iter().all(|v| v.parent.is_some()));

    let json = serde_json::to_value(&g.power_edges[0]).unwrap();
    assert_eq!(json["type"], 0);
    assert!(json["source"]["group"].is_u64(), "{json}");
}
