//! Observes a tree-shaped, mutable model of dynamically typed instances.
//!
//! Every field of every instance reachable from a root becomes observable:
//! each mutation is reported as a [`ModelChange`] carrying the path from the
//! root to the changed field, and reachability is maintained incrementally so
//! that instances cut off from the root are found and disposed by
//! [`ObservedModel::prune`]. Mutations can be grouped into batches with
//! [`ChangeRecorder::with_recording`], which undoes the whole batch if it
//! fails.
//!
//! Instances live in a [`Heap`] and are described by a [`Schema`]. Strong
//! references own their target; every instance reachable from the root must
//! have exactly one strong parent once a batch completes. Weak references
//! may only point at instances that are strongly reachable.
//!
//! ```rust
//! use std::sync::Arc;
//! use treewatch::{ChangeNode, ChangeRecorder, Heap, ObserveConfig, ObserveHooks, Schema, Value};
//!
//! let schema = Schema::parse(
//!     "
//! Node
//!   name: String
//!   children: [Node]
//! ",
//! )?;
//! let mut heap = Heap::new(Arc::new(schema));
//! let x = heap.alloc("Node", [("name", Value::from("x"))])?;
//! let y = heap.alloc("Node", [("name", Value::from("y"))])?;
//! let root = heap.alloc("Node", [("children", Value::list([x, y]))])?;
//!
//! let config = ObserveConfig::default().quiet(true);
//! let mut recorder = ChangeRecorder::new(heap, root, config, ObserveHooks::new())?;
//!
//! let batch = recorder.with_recording(|rec| {
//!     rec.splice(root, "children", 0, 1, vec![])?;
//!     Ok::<(), treewatch::Error>(())
//! })?;
//!
//! assert_eq!(batch.changes.len(), 1);
//! assert_eq!(batch.deleted_instances, vec![x]);
//! assert!(!recorder.is_tracked(x));
//! assert_eq!(
//!     recorder.get_path_to_child(y),
//!     Some(vec![ChangeNode::new(root, "children")])
//! );
//! # Ok::<(), treewatch::Error>(())
//! ```
//!
//! A failing batch leaves the model as it found it:
//! ```rust
//! # use std::sync::Arc;
//! # use treewatch::{ChangeRecorder, Error, Heap, ObserveConfig, ObserveHooks, Schema, Value};
//! # let schema = Schema::parse("Node\n  children: [Node]\n")?;
//! # let mut heap = Heap::new(Arc::new(schema));
//! # let x = heap.alloc("Node", [("children", Value::empty_list())])?;
//! # let root = heap.alloc("Node", [("children", Value::list([x]))])?;
//! let mut recorder = ChangeRecorder::new(heap, root, ObserveConfig::default(), ObserveHooks::new())?;
//!
//! let result = recorder.with_recording(|rec| {
//!     rec.splice(root, "children", 0, 1, vec![])?;
//!     Err(Error::NotObserved(x))
//! });
//!
//! assert!(result.is_err());
//! assert_eq!(recorder.get(root, "children")?, &Value::list([x]));
//! assert!(recorder.is_tracked(x));
//! # Ok::<(), treewatch::Error>(())
//! ```
mod change;
mod config;
mod error;
mod graph;
mod heap;
mod listener;
mod metrics;
mod observer;
mod recorder;
mod schema;
mod value;

pub use change::{undo_changes, ChangeKind, ChangeNode, ModelChange};
pub use config::{FieldSpec, ObserveConfig, ObserveHooks};
pub use error::{Error, Result, Violation, ViolationKind};
pub use graph::{Edge, RefGraph, RefKind};
pub use heap::{Heap, Instance};
pub use listener::{ModelListener, Reactivity, RefResolver};
pub use metrics::Metrics;
pub use observer::{observe, ObservedModel};
pub use recorder::{
    filter_persistent_changes, merge_all_recorded_changes, merge_recorded_changes, ChangeRecorder,
    RecordedChanges,
};
pub use schema::{ClassDecl, ClassDef, ClassId, FieldDecl, FieldDescriptor, FieldKind, FieldType, Schema, SchemaBuilder};
pub use value::{FieldPath, InstId, Key, Value};

#[cfg(test)]
mod test;
