use crate::value::InstId;
use std::fmt;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong while building a schema, allocating into a
/// heap, or observing and mutating a model.
///
/// Schema errors and invariant violations are programming mistakes and are
/// not meant to be retried. An ambiguous path is not an error; path queries
/// return `None` instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("class `{0}` has no registered schema")]
    UnknownClass(String),

    #[error("class `{class}` has no field `{field}`")]
    UnknownField { class: String, field: String },

    #[error("class `{0}` is declared twice")]
    DuplicateClass(String),

    #[error("field `{field}` is declared twice in class `{class}`")]
    DuplicateField { class: String, field: String },

    #[error("class `{0}` inherits from itself")]
    SchemaCycle(String),

    #[error("schema line {line}: {message}")]
    SchemaParse { line: usize, message: String },

    #[error("no value given for required field {class}.{field}")]
    MissingField { class: String, field: String },

    #[error("{class}.{field} expects {expected}, found {found}")]
    FieldKindMismatch {
        class: String,
        field: String,
        expected: String,
        found: &'static str,
    },

    #[error("{class}.{path} is not a {expected}")]
    NotAContainer {
        class: String,
        path: String,
        expected: &'static str,
    },

    #[error("index {index} is out of bounds for a list of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("instance {0} does not exist")]
    UnknownInstance(InstId),

    #[error("instance {0} is still tracked and cannot be freed")]
    StillTracked(InstId),

    #[error("instance {0} is still referenced and cannot be freed")]
    StillReferenced(InstId),

    #[error("instance {0} is not being observed")]
    NotObserved(InstId),

    #[error("field {class}.{field} is already observed")]
    FieldAlreadyObserved { class: String, field: String },

    #[error("no `{field}` edge from {parent} to {child}")]
    MissingEdge {
        parent: InstId,
        field: String,
        child: InstId,
    },

    #[error("model invariants violated:\n{}", render(.violations))]
    InvariantViolation { violations: Vec<Violation> },

    #[error("a recording is already in progress")]
    ReentrantRecording,

    #[error("dispose left {instances} instances and {edges} edges behind")]
    Teardown { instances: usize, edges: usize },
}

fn render(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ViolationKind {
    /// The root, or an external reference, is held by a strong edge.
    UnexpectedParents,
    /// Reachable through more than one strong edge.
    MultipleParents,
    /// No strong parent left, but still weakly referenced.
    DanglingWeakRefs,
    /// Has a strong parent, but no strong path leads back to the root.
    Detached,
}

/// One broken invariant found by a prune, with the edges causing it rendered
/// as `Class[uid].field`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    pub kind: ViolationKind,
    pub inst: InstId,
    pub uid: u64,
    pub class: String,
    pub edges: Vec<String>,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            ViolationKind::UnexpectedParents => "has unexpected parent refs",
            ViolationKind::MultipleParents => "has more than one parent",
            ViolationKind::DanglingWeakRefs => "is unreachable but still has weak refs",
            ViolationKind::Detached => "is not reachable from the root",
        };

        write!(
            f,
            "Instance {} ({}, {}) {what}: {}",
            self.uid,
            self.class,
            self.inst,
            self.edges.join(", ")
        )
    }
}
