//! Graph data handed to the layout, with the JSON shapes used by WebCola-style hosts.

use serde::{Deserialize, Serialize};

use crate::rectangle::Rectangle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
}

impl Axis {
    /// Dimension index into per-axis arrays (`x = 0`, `y = 1`).
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
        }
    }

    pub fn other(self) -> Axis {
        match self {
            Axis::X => Axis::Y,
            Axis::Y => Axis::X,
        }
    }
}

fn unplaced() -> f64 {
    f64::NAN
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Node {
    pub id: Option<String>,
    /// Position of the node centre. `NaN` means "not placed yet"; such nodes start at the centre
    /// of the canvas.
    #[serde(default = "unplaced")]
    pub x: f64,
    #[serde(default = "unplaced")]
    pub y: f64,
    pub width: Option<f64>,
    pub height: Option<f64>,
    /// Pinned nodes keep `(px, py)` while the layout runs.
    pub fixed: bool,
    /// Projection weight of a pinned node; defaults to 1000.
    pub fixed_weight: Option<f64>,
    pub px: Option<f64>,
    pub py: Option<f64>,
    pub bounds: Option<Rectangle>,
    /// Innermost group containing this node, filled in by `Layout::set_groups`.
    #[serde(skip)]
    pub parent: Option<usize>,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            id: None,
            x: f64::NAN,
            y: f64::NAN,
            width: None,
            height: None,
            fixed: false,
            fixed_weight: None,
            px: None,
            py: None,
            bounds: None,
            parent: None,
        }
    }
}

impl Node {
    pub fn at(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            ..Self::default()
        }
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn with_size(mut self, width: f64, height: f64) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn is_placed(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Bounding box centred on the node, if it has a size.
    pub fn sized_bounds(&self) -> Option<Rectangle> {
        let (w, h) = (self.width?, self.height?);
        Some(Rectangle::new(
            self.x - w / 2.0,
            self.x + w / 2.0,
            self.y - h / 2.0,
            self.y + h / 2.0,
        ))
    }
}

/// A link endpoint: either a node index or a node id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeRef {
    Index(usize),
    Id(String),
}

impl From<usize> for NodeRef {
    fn from(value: usize) -> Self {
        NodeRef::Index(value)
    }
}

impl From<&str> for NodeRef {
    fn from(value: &str) -> Self {
        NodeRef::Id(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub source: NodeRef,
    pub target: NodeRef,
    /// Ideal length; overrides the layout's link distance.
    #[serde(default)]
    pub length: Option<f64>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default, rename = "type")]
    pub link_type: Option<u32>,
}

impl Link {
    pub fn new(source: impl Into<NodeRef>, target: impl Into<NodeRef>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            length: None,
            weight: None,
            link_type: None,
        }
    }

    pub fn with_length(mut self, length: f64) -> Self {
        self.length = Some(length);
        self
    }
}

fn default_group_padding() -> f64 {
    1.0
}

fn default_group_stiffness() -> f64 {
    0.01
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Group {
    pub id: Option<String>,
    /// Node indices directly inside this group.
    pub leaves: Vec<usize>,
    /// Indices of nested groups.
    pub groups: Vec<usize>,
    #[serde(default = "default_group_padding")]
    pub padding: f64,
    /// Projection weight of the group's boundary variables.
    #[serde(default = "default_group_stiffness")]
    pub stiffness: f64,
    pub bounds: Option<Rectangle>,
    #[serde(skip)]
    pub parent: Option<usize>,
}

impl Default for Group {
    fn default() -> Self {
        Self {
            id: None,
            leaves: Vec::new(),
            groups: Vec::new(),
            padding: default_group_padding(),
            stiffness: default_group_stiffness(),
            bounds: None,
            parent: None,
        }
    }
}

impl Group {
    pub fn with_leaves(leaves: impl IntoIterator<Item = usize>) -> Self {
        Self {
            leaves: leaves.into_iter().collect(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeparationConstraint {
    pub axis: Axis,
    pub left: usize,
    pub right: usize,
    pub gap: f64,
    #[serde(default)]
    pub equality: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignmentOffset {
    pub node: usize,
    #[serde(default)]
    pub offset: f64,
}

/// Keeps the listed nodes' centres at fixed offsets from the first one along `axis`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentConstraint {
    pub axis: Axis,
    pub offsets: Vec<AlignmentOffset>,
}

/// User constraint. JSON separation constraints may omit `"type"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LayoutConstraint {
    Separation(SeparationConstraint),
    Alignment(AlignmentConstraint),
}

impl LayoutConstraint {
    pub fn separation(axis: Axis, left: usize, right: usize, gap: f64) -> Self {
        LayoutConstraint::Separation(SeparationConstraint {
            axis,
            left,
            right,
            gap,
            equality: false,
        })
    }

    pub fn axis(&self) -> Axis {
        match self {
            LayoutConstraint::Separation(c) => c.axis,
            LayoutConstraint::Alignment(c) => c.axis,
        }
    }

    /// Every node index this constraint mentions.
    pub fn nodes(&self) -> Vec<usize> {
        match self {
            LayoutConstraint::Separation(c) => vec![c.left, c.right],
            LayoutConstraint::Alignment(c) => c.offsets.iter().map(|o| o.node).collect(),
        }
    }
}

/// Scalar layout options. Loadable from JSON/YAML; every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Canvas `[width, height]`.
    pub size: [f64; 2],
    pub default_node_size: f64,
    pub group_compactness: f64,
    /// Ideal length of links without their own `length`.
    pub link_distance: f64,
    pub convergence_threshold: f64,
    pub avoid_overlaps: bool,
    pub handle_disconnected: bool,
    /// Upper bound on ticks run synchronously by an immediate host.
    pub max_sync_ticks: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            size: [1.0, 1.0],
            default_node_size: 10.0,
            group_compactness: 1e-6,
            link_distance: 20.0,
            convergence_threshold: 0.01,
            avoid_overlaps: false,
            handle_disconnected: true,
            max_sync_ticks: 10_000,
        }
    }
}
