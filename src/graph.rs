use crate::change::ChangeNode;
use crate::error::{Error, Result};
use crate::heap::Heap;
use crate::value::InstId;

use indexmap::{IndexMap, IndexSet};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

/// field -> multiplicity
pub(crate) type FieldCounts = IndexMap<Arc<str>, u32>;
/// parent -> fields of that parent holding the child
pub(crate) type Parents = IndexMap<InstId, FieldCounts>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RefKind {
    Strong,
    Weak,
}

/// One `(parent, field, child)` edge with the number of times the field
/// holds the child.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Edge {
    pub parent: InstId,
    pub field: Arc<str>,
    pub child: InstId,
    pub kind: RefKind,
    pub count: u32,
}

/// The parent table of every referenced instance.
///
/// Only child -> parent edges are stored. The parent -> child direction is
/// the field values themselves, read back through the heap.
#[derive(Default)]
pub struct RefGraph {
    strong: FxHashMap<InstId, Parents>,
    weak: FxHashMap<InstId, Parents>,
    strong_edges: usize,
    weak_edges: usize,
}

impl RefGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, kind: RefKind) -> &FxHashMap<InstId, Parents> {
        match kind {
            RefKind::Strong => &self.strong,
            RefKind::Weak => &self.weak,
        }
    }

    pub fn add(&mut self, parent: InstId, field: &Arc<str>, child: InstId, kind: RefKind) {
        let (table, total) = match kind {
            RefKind::Strong => (&mut self.strong, &mut self.strong_edges),
            RefKind::Weak => (&mut self.weak, &mut self.weak_edges),
        };

        *table
            .entry(child)
            .or_default()
            .entry(parent)
            .or_default()
            .entry(field.clone())
            .or_insert(0) += 1;
        *total += 1;
    }

    /// Drops one occurrence of an edge. Emptied maps are removed so that
    /// "has parents" is a plain lookup.
    pub fn remove(&mut self, parent: InstId, field: &str, child: InstId, kind: RefKind) -> Result<()> {
        let (table, total) = match kind {
            RefKind::Strong => (&mut self.strong, &mut self.strong_edges),
            RefKind::Weak => (&mut self.weak, &mut self.weak_edges),
        };
        let missing = || Error::MissingEdge {
            parent,
            field: field.to_string(),
            child,
        };

        let parents = table.get_mut(&child).ok_or_else(missing)?;
        let fields = parents.get_mut(&parent).ok_or_else(missing)?;
        let count = fields.get_mut(field).ok_or_else(missing)?;

        *count -= 1;
        *total -= 1;

        if *count == 0 {
            fields.shift_remove(field);
            if fields.is_empty() {
                parents.shift_remove(&parent);
                if parents.is_empty() {
                    table.remove(&child);
                }
            }
        }

        Ok(())
    }

    pub fn parents(&self, child: InstId, kind: RefKind) -> Option<&Parents> {
        self.table(kind).get(&child)
    }

    pub fn has_parents(&self, child: InstId, kind: RefKind) -> bool {
        self.table(kind).contains_key(&child)
    }

    /// The parent edge of `child` if it is held strongly by exactly one
    /// field of exactly one parent, exactly once.
    pub fn single_parent(&self, child: InstId) -> Option<(InstId, &Arc<str>)> {
        let parents = self.strong.get(&child)?;
        if parents.len() != 1 {
            return None;
        }

        let (parent, fields) = parents.first()?;
        match fields.first() {
            Some((field, 1)) if fields.len() == 1 => Some((*parent, field)),
            _ => None,
        }
    }

    /// Distinct instances referencing `child`, strong parents first.
    pub fn refs_to(&self, child: InstId, include_weak: bool) -> Vec<InstId> {
        let mut refs: IndexSet<InstId> = IndexSet::new();
        if let Some(parents) = self.strong.get(&child) {
            refs.extend(parents.keys().copied());
        }
        if include_weak {
            if let Some(parents) = self.weak.get(&child) {
                refs.extend(parents.keys().copied());
            }
        }
        refs.into_iter().collect()
    }

    /// The chain of strong `(parent, field)` steps leading from `root` down
    /// to `child`, root first.
    ///
    /// Returns `None` when `child` is detached, when the walk revisits an
    /// instance, or when a step is ambiguous. With `allow_multiple` an
    /// ambiguous step tries each parent in turn instead.
    pub fn path_to(&self, child: InstId, root: InstId, allow_multiple: bool) -> Option<Vec<ChangeNode>> {
        let mut path = vec![];
        let mut seen = FxHashSet::default();

        if allow_multiple {
            if !self.any_path(child, root, &mut seen, &mut path) {
                return None;
            }
        } else {
            let mut cur = child;
            while cur != root {
                if !seen.insert(cur) {
                    return None;
                }
                let (parent, field) = self.single_parent(cur)?;
                path.push(ChangeNode {
                    inst: parent,
                    field: field.clone(),
                });
                cur = parent;
            }
        }

        path.reverse();
        Some(path)
    }

    fn any_path(
        &self,
        cur: InstId,
        root: InstId,
        seen: &mut FxHashSet<InstId>,
        path: &mut Vec<ChangeNode>,
    ) -> bool {
        if cur == root {
            return true;
        }
        if !seen.insert(cur) {
            return false;
        }
        let Some(parents) = self.strong.get(&cur) else {
            return false;
        };

        for (parent, fields) in parents {
            let Some((field, _)) = fields.first() else {
                continue;
            };
            path.push(ChangeNode {
                inst: *parent,
                field: field.clone(),
            });
            if self.any_path(*parent, root, seen, path) {
                return true;
            }
            path.pop();
        }

        false
    }

    /// Total edge multiplicity of one kind.
    pub fn edge_count(&self, kind: RefKind) -> usize {
        match kind {
            RefKind::Strong => self.strong_edges,
            RefKind::Weak => self.weak_edges,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.strong.is_empty() && self.weak.is_empty()
    }

    pub fn edges(&self, kind: RefKind) -> impl Iterator<Item = Edge> + '_ {
        self.table(kind).iter().flat_map(move |(child, parents)| {
            parents.iter().flat_map(move |(parent, fields)| {
                fields.iter().map(move |(field, count)| Edge {
                    parent: *parent,
                    field: field.clone(),
                    child: *child,
                    kind,
                    count: *count,
                })
            })
        })
    }

    /// Renders the parent edges of `child` as `Class[uid].field`, with a
    /// `xN` suffix for repeated edges.
    pub(crate) fn describe(&self, child: InstId, kind: RefKind, heap: &Heap) -> Vec<String> {
        let Some(parents) = self.table(kind).get(&child) else {
            return vec![];
        };

        parents
            .iter()
            .flat_map(|(parent, fields)| {
                fields.iter().map(move |(field, count)| {
                    let uid = heap.uid(*parent).unwrap_or_default();
                    let class = heap.class_name(*parent);
                    if *count > 1 {
                        format!("{class}[{uid}].{field} x{count}")
                    } else {
                        format!("{class}[{uid}].{field}")
                    }
                })
            })
            .collect()
    }
}
