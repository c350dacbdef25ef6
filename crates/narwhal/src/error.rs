#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("variable {index} is invalid: {reason}")]
    InvalidVariable { index: usize, reason: &'static str },

    #[error("constraint {constraint} refers to variable {variable}, but only {count} variables exist")]
    UnknownVariable {
        constraint: usize,
        variable: usize,
        count: usize,
    },

    #[error("constraint {index} is invalid: {reason}")]
    InvalidConstraint { index: usize, reason: &'static str },

    #[error("link {link} refers to an unknown node: {node}")]
    UnknownNode { link: usize, node: String },

    #[error("node index {index} is out of range ({count} nodes)")]
    NodeOutOfRange { index: usize, count: usize },

    #[error("group index {index} is out of range ({count} groups)")]
    GroupOutOfRange { index: usize, count: usize },

    #[error("group {index} is nested more than once or inside itself")]
    GroupCycle { index: usize },

    #[error("edge {edge} has length {length}; shortest paths need non-negative lengths")]
    NegativeEdgeLength { edge: usize, length: f64 },

    #[error("coordinate row {dimension} has {found} entries, expected {expected}")]
    CoordinateLength {
        dimension: usize,
        expected: usize,
        found: usize,
    },

    #[error("distance matrix must be {expected}x{expected}, found {found}")]
    DistanceMatrix { expected: usize, found: String },

    #[error("node {node} has neither bounds nor a size")]
    MissingBounds { node: usize },

    #[error("edge routing has not been prepared")]
    RoutingNotPrepared,

    #[error("{what} must not be empty")]
    EmptyInput { what: &'static str },
}

pub type Result<T> = std::result::Result<T, Error>;
