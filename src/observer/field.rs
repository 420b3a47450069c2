use super::{FieldState, InstState, ObservedModel};
use crate::change::{ChangeKind, ChangeNode, ModelChange};
use crate::error::{Error, Result};
use crate::graph::RefKind;
use crate::schema::{ClassId, FieldDescriptor, FieldType};
use crate::value::{FieldPath, InstId, Value};

use log::trace;
use std::sync::Arc;

enum Tracking {
    /// The instance is not tracked, or the field is excluded.
    Off,
    /// Tracked instance, field skipped by the initial walk.
    Deferred,
    On,
}

struct Target {
    class: ClassId,
    idx: usize,
    elem: FieldType,
    len: usize,
}

fn collect_refs(value: &Value, out: &mut Vec<InstId>) {
    match value {
        Value::Inst(inst) => out.push(*inst),
        Value::List(items) => items.iter().for_each(|v| collect_refs(v, out)),
        Value::Map(entries) => entries.values().for_each(|v| collect_refs(v, out)),
        _ => {}
    }
}

// Map keys can name instances too.
fn collect_texts<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::Str(s) => out.push(s),
        Value::List(items) => items.iter().for_each(|v| collect_texts(v, out)),
        Value::Map(entries) => {
            for (key, v) in entries {
                collect_texts(v, out);
                out.push(key);
            }
        }
        _ => {}
    }
}

pub(super) fn refs_of(values: &[Value]) -> Vec<InstId> {
    let mut out = vec![];
    for value in values {
        collect_refs(value, &mut out);
    }
    out
}

pub(super) fn ref_kind(desc: &FieldDescriptor) -> RefKind {
    if desc.is_weak() {
        RefKind::Weak
    } else {
        RefKind::Strong
    }
}

/// Reads and tracked writes.
impl ObservedModel {
    pub fn get(&self, inst: InstId, field: &str) -> Result<&Value> {
        self.get_at(inst, &FieldPath::new(field))
    }

    /// Reads the value at a nested path, reporting the read of the field to
    /// the reactivity sink.
    pub fn get_at(&self, inst: InstId, path: &FieldPath) -> Result<&Value> {
        let value = self.heap.get_at(inst, path)?;
        if let Some(reactivity) = &self.hooks.reactivity {
            let (_, idx) = self.heap.field_index(inst, path.field())?;
            if self.states.get(&inst).is_some_and(|s| s.fields[idx].attached) {
                reactivity.report_observed(inst, path.field());
            }
        }
        Ok(value)
    }

    /// Replaces the value of a field and returns the previous one.
    ///
    /// Assigning a value equal to the current one does nothing.
    pub fn set(&mut self, inst: InstId, field: &str, value: impl Into<Value>) -> Result<Value> {
        let value = value.into();
        let (class, idx) = self.heap.field_index(inst, field)?;
        let schema = self.heap.schema().clone();
        let desc = &schema.fields_of(class)[idx];
        self.heap.check(class, idx, desc.ty(), &value)?;

        if *self.heap.slot(inst, idx) == value {
            return Ok(value);
        }
        let old = std::mem::replace(self.heap.slot_mut(inst, idx), value.clone());

        match self.tracking(inst, class, idx) {
            Tracking::Off => {}
            Tracking::Deferred => {
                let kind = ChangeKind::Update {
                    old: old.clone(),
                    new: value,
                };
                self.fire(inst, desc, &FieldPath::new(field), kind);
                self.attach_field(inst, idx, false)?;
            }
            Tracking::On => {
                let (added, removed) = (refs_of(std::slice::from_ref(&value)), refs_of(std::slice::from_ref(&old)));
                let kind = ChangeKind::Update {
                    old: old.clone(),
                    new: value,
                };
                self.fire(inst, desc, &FieldPath::new(field), kind);
                self.relink(inst, idx, desc, added, removed)?;
            }
        }

        Ok(old)
    }

    /// Removes up to `delete_count` items at `index` and inserts `items`
    /// there, like `Vec::splice`. Out-of-range positions are clamped.
    /// Returns the removed items.
    pub fn splice(
        &mut self,
        inst: InstId,
        path: impl Into<FieldPath>,
        index: usize,
        delete_count: usize,
        items: Vec<Value>,
    ) -> Result<Vec<Value>> {
        let path = path.into();
        let target = self.target(inst, &path, true)?;
        for item in &items {
            self.heap.check(target.class, target.idx, &target.elem, item)?;
        }

        let index = index.min(target.len);
        let delete_count = delete_count.min(target.len - index);
        if delete_count == 0 && items.is_empty() {
            return Ok(vec![]);
        }

        let list = self.heap.list_mut(inst, target.idx, &path)?;
        let removed: Vec<Value> = list
            .splice(index..index + delete_count, items.iter().cloned())
            .collect();

        if let Tracking::On = self.tracking(inst, target.class, target.idx) {
            let schema = self.heap.schema().clone();
            let desc = &schema.fields_of(target.class)[target.idx];
            let (added, dropped) = (refs_of(&items), refs_of(&removed));
            let kind = ChangeKind::ArraySplice {
                index,
                added: items,
                removed: removed.clone(),
            };
            self.fire(inst, desc, &path, kind);
            self.relink(inst, target.idx, desc, added, dropped)?;
        }

        Ok(removed)
    }

    pub fn push(&mut self, inst: InstId, path: impl Into<FieldPath>, item: impl Into<Value>) -> Result<()> {
        let path = path.into();
        let len = self.target(inst, &path, true)?.len;
        self.splice(inst, path, len, 0, vec![item.into()])?;
        Ok(())
    }

    /// Removes the first item equal to `item`, returning its position.
    pub fn remove_item(&mut self, inst: InstId, path: impl Into<FieldPath>, item: &Value) -> Result<Option<usize>> {
        let path = path.into();
        self.target(inst, &path, true)?;

        let pos = self
            .heap
            .get_at(inst, &path)?
            .as_list()
            .and_then(|items| items.iter().position(|v| v == item));

        if let Some(pos) = pos {
            self.splice(inst, path, pos, 1, vec![])?;
        }
        Ok(pos)
    }

    pub fn set_item(
        &mut self,
        inst: InstId,
        path: impl Into<FieldPath>,
        index: usize,
        value: impl Into<Value>,
    ) -> Result<Value> {
        let path = path.into();
        let value = value.into();
        let target = self.target(inst, &path, true)?;
        self.heap.check(target.class, target.idx, &target.elem, &value)?;
        if index >= target.len {
            return Err(Error::IndexOutOfBounds {
                index,
                len: target.len,
            });
        }

        let list = self.heap.list_mut(inst, target.idx, &path)?;
        if list[index] == value {
            return Ok(value);
        }
        let old = std::mem::replace(&mut list[index], value.clone());

        if let Tracking::On = self.tracking(inst, target.class, target.idx) {
            let schema = self.heap.schema().clone();
            let desc = &schema.fields_of(target.class)[target.idx];
            let (added, removed) = (refs_of(std::slice::from_ref(&value)), refs_of(std::slice::from_ref(&old)));
            let kind = ChangeKind::ArrayUpdate {
                index,
                old: old.clone(),
                new: value,
            };
            self.fire(inst, desc, &path, kind);
            self.relink(inst, target.idx, desc, added, removed)?;
        }

        Ok(old)
    }

    /// Inserts or replaces a map entry, returning the replaced value. A new
    /// key goes to the end of the map; an existing key keeps its position.
    pub fn insert_entry(
        &mut self,
        inst: InstId,
        path: impl Into<FieldPath>,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Option<Value>> {
        let path = path.into();
        let key = key.into();
        let value = value.into();
        let target = self.target(inst, &path, false)?;
        self.heap.check(target.class, target.idx, &target.elem, &value)?;

        let map = self.heap.map_mut(inst, target.idx, &path)?;
        if map.get(&key) == Some(&value) {
            return Ok(Some(value));
        }
        let old = map.insert(key.clone(), value.clone());

        self.entry_changed(inst, &path, &target, key, old.clone(), value)?;
        Ok(old)
    }

    pub fn remove_entry(&mut self, inst: InstId, path: impl Into<FieldPath>, key: &str) -> Result<Option<Value>> {
        let path = path.into();
        let target = self.target(inst, &path, false)?;

        let map = self.heap.map_mut(inst, target.idx, &path)?;
        let Some((index, key, old)) = map.shift_remove_full(key) else {
            return Ok(None);
        };

        if let Tracking::On = self.tracking(inst, target.class, target.idx) {
            let schema = self.heap.schema().clone();
            let desc = &schema.fields_of(target.class)[target.idx];
            let removed = refs_of(std::slice::from_ref(&old));
            let kind = ChangeKind::ObjDelete {
                key,
                index,
                old: old.clone(),
            };
            self.fire(inst, desc, &path, kind);
            self.relink(inst, target.idx, desc, vec![], removed)?;
        }

        Ok(Some(old))
    }

    /// Puts a removed entry back at its old position.
    pub(crate) fn restore_entry(
        &mut self,
        inst: InstId,
        path: FieldPath,
        key: String,
        index: usize,
        value: Value,
    ) -> Result<()> {
        let target = self.target(inst, &path, false)?;
        self.heap.check(target.class, target.idx, &target.elem, &value)?;

        let map = self.heap.map_mut(inst, target.idx, &path)?;
        let old = map.get(&key).cloned();
        let last = if old.is_some() { map.len() - 1 } else { map.len() };
        map.shift_insert(index.min(last), key.clone(), value.clone());

        self.entry_changed(inst, &path, &target, key, old, value)
    }

    fn entry_changed(
        &mut self,
        inst: InstId,
        path: &FieldPath,
        target: &Target,
        key: String,
        old: Option<Value>,
        new: Value,
    ) -> Result<()> {
        if !matches!(self.tracking(inst, target.class, target.idx), Tracking::On) {
            return Ok(());
        }

        let schema = self.heap.schema().clone();
        let desc = &schema.fields_of(target.class)[target.idx];
        let added = refs_of(std::slice::from_ref(&new));
        let removed = old
            .as_ref()
            .map(|old| refs_of(std::slice::from_ref(old)))
            .unwrap_or_default();

        let kind = match old {
            Some(old) => ChangeKind::ObjUpdate { key, old, new },
            None => ChangeKind::ObjAdd { key, new },
        };
        self.fire(inst, desc, path, kind);
        self.relink(inst, target.idx, desc, added, removed)
    }

    /// Resolves a container path and the type its elements must have.
    fn target(&self, inst: InstId, path: &FieldPath, list: bool) -> Result<Target> {
        let (class, idx) = self.heap.field_index(inst, path.field())?;
        let expected = if list { "list" } else { "map" };
        let ty = self.heap.schema().fields_of(class)[idx].ty();

        let elem = ty
            .descend(path.keys())
            .and_then(|ty| if list { ty.list_elem() } else { ty.map_value() })
            .ok_or_else(|| self.heap.not_a(class, path, expected))?
            .clone();

        let len = match (self.heap.get_at(inst, path)?, list) {
            (Value::List(items), true) => items.len(),
            (Value::Map(entries), false) => entries.len(),
            _ => return Err(self.heap.not_a(class, path, expected)),
        };

        Ok(Target {
            class,
            idx,
            elem,
            len,
        })
    }

    fn tracking(&self, inst: InstId, class: ClassId, idx: usize) -> Tracking {
        match self.states.get(&inst) {
            Some(state) if state.fields[idx].attached => Tracking::On,
            Some(_) if self.masks.skipped[class.index()][idx] && !self.masks.excluded[class.index()][idx] => {
                Tracking::Deferred
            }
            _ => Tracking::Off,
        }
    }

    fn fire(&mut self, inst: InstId, desc: &FieldDescriptor, at: &FieldPath, kind: ChangeKind) {
        let node = ChangeNode {
            inst,
            field: desc.name_arc().clone(),
        };
        let path = self.graph.path_to(inst, self.root, false).map(|mut path| {
            path.push(node.clone());
            path
        });
        let change = ModelChange {
            node,
            path,
            at: at.keys().to_vec(),
            kind,
        };

        trace!("{} {}: {}", self.heap.class_name(inst), inst, change);

        if let Some(reactivity) = &self.hooks.reactivity {
            reactivity.report_changed(inst, desc.name());
        }
        self.hooks.change(&change);
        self.counters.changes_fired += 1;

        if let Some(journal) = &mut self.journal {
            journal.push(change);
        }
    }

    /// Adds edges for references that entered a field and drops those that
    /// left it. Additions go first so that a reference moving within the
    /// field never looks unreachable.
    fn relink(
        &mut self,
        inst: InstId,
        idx: usize,
        desc: &FieldDescriptor,
        added: Vec<InstId>,
        removed: Vec<InstId>,
    ) -> Result<()> {
        let kind = ref_kind(desc);
        let mut pending = vec![];
        for child in added {
            self.add_edge(inst, desc.name_arc(), child, kind, &mut pending);
        }
        self.observe_pending(pending, false)?;

        for child in removed {
            self.remove_edge(inst, desc.name_arc(), child, kind)?;
        }

        self.refresh_implicit(inst, idx)
    }

    pub(super) fn observe_inst(&mut self, inst: InstId, incremental: bool) -> Result<()> {
        self.observe_pending(vec![inst], incremental)
    }

    /// Tracks every instance in `stack` and everything they strongly
    /// reference that is not tracked yet.
    fn observe_pending(&mut self, mut stack: Vec<InstId>, incremental: bool) -> Result<()> {
        while let Some(inst) = stack.pop() {
            if self.states.contains_key(&inst) {
                continue;
            }

            let class = self.heap.class_of(inst)?;
            let excluded = &self.masks.excluded[class.index()];
            let skipped = &self.masks.skipped[class.index()];
            let fields = excluded
                .iter()
                .zip(skipped)
                .map(|(excluded, skipped)| FieldState {
                    attached: !excluded && !skipped,
                    implicit: vec![],
                })
                .collect::<Vec<_>>();
            let attached: Vec<usize> = (0..fields.len()).filter(|i| fields[*i].attached).collect();

            self.states.insert(inst, InstState { fields });
            self.seen.insert(inst);
            if !incremental {
                self.reach.possibly_new.insert(inst);
            }

            for idx in attached {
                self.link_field(inst, idx, &mut stack)?;
            }
        }

        Ok(())
    }

    pub(super) fn attach_field(&mut self, inst: InstId, idx: usize, incremental: bool) -> Result<()> {
        if let Some(state) = self.states.get_mut(&inst) {
            state.fields[idx].attached = true;
        }

        let mut pending = vec![];
        self.link_field(inst, idx, &mut pending)?;
        self.observe_pending(pending, incremental)
    }

    /// Records edges for the current value of a field. Strongly referenced
    /// instances that are not tracked yet are pushed to `pending`.
    fn link_field(&mut self, inst: InstId, idx: usize, pending: &mut Vec<InstId>) -> Result<()> {
        let class = self.heap.class_of(inst)?;
        let schema = self.heap.schema().clone();
        let desc = &schema.fields_of(class)[idx];

        let kind = ref_kind(desc);
        for child in refs_of(std::slice::from_ref(self.heap.slot(inst, idx))) {
            self.add_edge(inst, desc.name_arc(), child, kind, pending);
        }

        self.refresh_implicit(inst, idx)
    }

    fn add_edge(&mut self, parent: InstId, field: &Arc<str>, child: InstId, kind: RefKind, pending: &mut Vec<InstId>) {
        if self.excluded_class(child) {
            return;
        }

        self.graph.add(parent, field, child, kind);
        if kind == RefKind::Strong && !self.states.contains_key(&child) {
            pending.push(child);
        }
        self.reach.to_check.insert(child);
        self.hooks.visit(child);
    }

    pub(super) fn remove_edge(&mut self, parent: InstId, field: &Arc<str>, child: InstId, kind: RefKind) -> Result<()> {
        if self.excluded_class(child) {
            return Ok(());
        }

        self.graph.remove(parent, field, child, kind)?;
        self.reach.to_check.insert(child);

        if kind == RefKind::Strong && !self.graph.has_parents(child, RefKind::Strong) {
            self.mark_unreachable(child);
        }
        Ok(())
    }

    /// Re-resolves identifier strings of a field into weak edges.
    pub(super) fn refresh_implicit(&mut self, inst: InstId, idx: usize) -> Result<()> {
        if self.hooks.resolver.is_none() || !self.states.contains_key(&inst) {
            return Ok(());
        }

        let class = self.heap.class_of(inst)?;
        let schema = self.heap.schema().clone();
        let desc = &schema.fields_of(class)[idx];

        let mut found = vec![];
        if let Some(resolver) = self.hooks.resolver.as_mut() {
            let mut texts = vec![];
            collect_texts(self.heap.slot(inst, idx), &mut texts);
            for text in texts {
                found.extend(resolver.resolve(&self.heap, inst, desc, text));
            }
        }
        found.retain(|target| !self.excluded_class(*target));

        let old = match self.states.get_mut(&inst) {
            Some(state) => std::mem::replace(&mut state.fields[idx].implicit, found.clone()),
            None => vec![],
        };

        for target in found {
            self.graph.add(inst, desc.name_arc(), target, RefKind::Weak);
            self.reach.to_check.insert(target);
        }
        for target in old {
            self.remove_edge(inst, desc.name_arc(), target, RefKind::Weak)?;
        }

        Ok(())
    }

    /// Instances held by attached strong fields of `inst`.
    pub(super) fn strong_children(&self, inst: InstId) -> Vec<InstId> {
        let (Some(state), Ok(class)) = (self.states.get(&inst), self.heap.class_of(inst)) else {
            return vec![];
        };

        let descs = self.heap.schema().fields_of(class);
        let mut out = vec![];
        for (idx, field) in state.fields.iter().enumerate() {
            if field.attached && !descs[idx].is_weak() {
                collect_refs(self.heap.slot(inst, idx), &mut out);
            }
        }
        out
    }
}
