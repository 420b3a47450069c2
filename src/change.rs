use crate::error::Result;
use crate::observer::ObservedModel;
use crate::value::{FieldPath, InstId, Key, Value};

use std::fmt;
use std::sync::Arc;

/// An `(instance, field)` step. A change event's path is a list of these,
/// from the root down to the changed field.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChangeNode {
    pub inst: InstId,
    pub field: Arc<str>,
}

impl ChangeNode {
    pub fn new(inst: InstId, field: &str) -> Self {
        Self {
            inst,
            field: Arc::from(field),
        }
    }
}

impl fmt::Display for ChangeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.inst, self.field)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChangeKind {
    Update {
        old: Value,
        new: Value,
    },
    ArraySplice {
        index: usize,
        added: Vec<Value>,
        removed: Vec<Value>,
    },
    ArrayUpdate {
        index: usize,
        old: Value,
        new: Value,
    },
    ObjAdd {
        key: String,
        new: Value,
    },
    ObjUpdate {
        key: String,
        old: Value,
        new: Value,
    },
    /// `index` is the position the entry held, so undo can put it back.
    ObjDelete {
        key: String,
        index: usize,
        old: Value,
    },
}

impl ChangeKind {
    pub fn name(&self) -> &'static str {
        match self {
            ChangeKind::Update { .. } => "update",
            ChangeKind::ArraySplice { .. } => "array-splice",
            ChangeKind::ArrayUpdate { .. } => "array-update",
            ChangeKind::ObjAdd { .. } => "obj-add",
            ChangeKind::ObjUpdate { .. } => "obj-update",
            ChangeKind::ObjDelete { .. } => "obj-delete",
        }
    }
}

/// A single mutation of an observed field.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelChange {
    /// The instance and field that changed.
    pub node: ChangeNode,
    /// Root-to-field path at the moment of the change, ending with `node`.
    /// `None` if the owner was not uniquely reachable at that moment.
    pub path: Option<Vec<ChangeNode>>,
    /// Keys leading from the field value to the container that changed;
    /// empty unless the container is nested.
    pub at: Vec<Key>,
    pub kind: ChangeKind,
}

impl ModelChange {
    pub fn owner(&self) -> InstId {
        self.node.inst
    }

    pub fn field(&self) -> &str {
        &self.node.field
    }

    pub(crate) fn location(&self) -> FieldPath {
        FieldPath::from_parts(&self.node.field, &self.at)
    }
}

impl fmt::Display for ModelChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.name(), self.location())?;
        match &self.path {
            Some(path) => write!(f, " ({} deep)", path.len()),
            None => f.write_str(" (no path)"),
        }
    }
}

/// Applies the inverse of `changes`, last change first.
///
/// The inverse operations go through `model` like any other mutation, so
/// edges are relinked and listeners see the undo as ordinary changes.
pub fn undo_changes(model: &mut ObservedModel, changes: &[ModelChange]) -> Result<()> {
    for change in changes.iter().rev() {
        let inst = change.owner();
        let path = change.location();

        match &change.kind {
            ChangeKind::Update { old, .. } => {
                model.set(inst, change.field(), old.clone())?;
            }
            ChangeKind::ArraySplice {
                index,
                added,
                removed,
            } => {
                model.splice(inst, path, *index, added.len(), removed.clone())?;
            }
            ChangeKind::ArrayUpdate { index, old, .. } => {
                model.set_item(inst, path, *index, old.clone())?;
            }
            ChangeKind::ObjAdd { key, .. } => {
                model.remove_entry(inst, path, key)?;
            }
            ChangeKind::ObjUpdate { key, old, .. } => {
                model.insert_entry(inst, path, key.clone(), old.clone())?;
            }
            ChangeKind::ObjDelete { key, index, old } => {
                model.restore_entry(inst, path, key.clone(), *index, old.clone())?;
            }
        }
    }

    Ok(())
}
