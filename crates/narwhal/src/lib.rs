#![forbid(unsafe_code)]

//! Headless constraint-based graph layout.
//!
//! Nodes are placed by stress majorization whose every step is projected onto separation,
//! alignment, non-overlap and group-containment constraints (VPSC). Around that core sit link
//! length heuristics, flow layout, disconnected component packing, power-graph compression and
//! two edge routers: shortest paths through a tangent visibility graph, and orthogonal routes
//! over a grid with nudged parallel segments.

pub mod descent;
pub mod error;
pub mod geom;
pub mod grid_router;
pub mod handle_disconnected;
pub mod layout;
pub mod link_lengths;
pub mod model;
pub mod powergraph;
pub mod pqueue;
pub mod projection;
pub mod rectangle;
pub mod shortest_paths;
pub mod vpsc;

pub use descent::{AxisProjection, Descent, Locks, PseudoRandom};
pub use error::{Error, Result};
pub use geom::{Point, TangentVisibilityGraph};
pub use grid_router::{GridRouter, RoutePath, route_path};
pub use layout::{Event, EventType, Kick, Layout, LayoutHost, SynchronousHost};
pub use model::{
    AlignmentConstraint, AlignmentOffset, Axis, Group, LayoutConfig, LayoutConstraint, Link, Node, NodeRef,
    SeparationConstraint,
};
pub use powergraph::{PowerEdge, PowerEdgeEnd, PowerGraph};
pub use projection::Projection;
pub use rectangle::{Rectangle, remove_overlaps};
pub use shortest_paths::Calculator;
pub use vpsc::{Constraint, Solver, Variable};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
