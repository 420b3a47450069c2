use crate::error::{Error, Result};
use crate::schema::{ClassId, FieldType, Schema};
use crate::value::{FieldPath, InstId, Key, Value};

use indexmap::IndexMap;
use slab::Slab;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
pub struct Instance {
    class: ClassId,
    uid: u64,
    fields: Vec<Value>,
}

impl Instance {
    pub fn class(&self) -> ClassId {
        self.class
    }

    /// Allocation-order id; unlike an [`InstId`] it is never reused.
    pub fn uid(&self) -> u64 {
        self.uid
    }

    pub fn fields(&self) -> &[Value] {
        &self.fields
    }
}

/// The arena the application allocates model instances into.
///
/// Instances refer to each other by [`InstId`], so an instance can be owned
/// by one parent while any number of others point at it weakly. The heap
/// itself knows nothing about reachability; instances stay allocated until
/// the application frees them.
pub struct Heap {
    schema: Arc<Schema>,
    insts: Slab<Instance>,
    next_uid: u64,
}

impl Heap {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            insts: Slab::new(),
            next_uid: 1,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Allocates an instance of `class`. Omitted fields get the default of
    /// their declared type; omitted required references are an error.
    pub fn alloc<'a, I>(&mut self, class: &str, fields: I) -> Result<InstId>
    where
        I: IntoIterator<Item = (&'a str, Value)>,
    {
        let class = self.schema.class_id(class)?;
        let descs = self.schema.fields_of(class);
        let mut values: Vec<Option<Value>> = vec![None; descs.len()];

        for (name, value) in fields {
            let idx = self.schema.field_index(class, name)?;
            self.check(class, idx, descs[idx].ty(), &value)?;
            values[idx] = Some(value);
        }

        let fields = values
            .into_iter()
            .enumerate()
            .map(|(idx, value)| match value {
                Some(value) => Ok(value),
                None => self.schema.default_value(class, idx),
            })
            .collect::<Result<Vec<_>>>()?;

        let uid = self.next_uid;
        self.next_uid += 1;

        Ok(InstId(self.insts.insert(Instance { class, uid, fields })))
    }

    /// Frees an instance. Freeing an instance that is still observed leaves
    /// the observer with a dangling handle; only free what a prune disposed.
    pub fn free(&mut self, inst: InstId) -> Result<Instance> {
        self.insts
            .try_remove(inst.0)
            .ok_or(Error::UnknownInstance(inst))
    }

    pub fn contains(&self, inst: InstId) -> bool {
        self.insts.contains(inst.0)
    }

    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (InstId, &Instance)> {
        self.insts.iter().map(|(key, inst)| (InstId(key), inst))
    }

    pub fn instance(&self, inst: InstId) -> Result<&Instance> {
        self.insts.get(inst.0).ok_or(Error::UnknownInstance(inst))
    }

    pub fn class_of(&self, inst: InstId) -> Result<ClassId> {
        self.instance(inst).map(|i| i.class)
    }

    pub fn class_name(&self, inst: InstId) -> &str {
        match self.insts.get(inst.0) {
            Some(i) => self.schema.class(i.class).name(),
            None => "<freed>",
        }
    }

    pub fn uid(&self, inst: InstId) -> Option<u64> {
        self.insts.get(inst.0).map(|i| i.uid)
    }

    pub fn get(&self, inst: InstId, field: &str) -> Result<&Value> {
        let (_, idx) = self.field_index(inst, field)?;
        Ok(&self.insts[inst.0].fields[idx])
    }

    /// Reads the value at a nested path.
    pub fn get_at(&self, inst: InstId, path: &FieldPath) -> Result<&Value> {
        let (class, idx) = self.field_index(inst, path.field())?;
        let mut value = &self.insts[inst.0].fields[idx];
        for key in path.keys() {
            value = match (value, key) {
                (Value::List(items), Key::Index(i)) => items.get(*i).ok_or(Error::IndexOutOfBounds {
                    index: *i,
                    len: items.len(),
                })?,
                (Value::Map(entries), Key::Name(k)) => entries.get(k).ok_or_else(|| self.not_a(class, path, "map with that key"))?,
                (Value::List(_), _) => return Err(self.not_a(class, path, "map")),
                _ => return Err(self.not_a(class, path, "list")),
            };
        }
        Ok(value)
    }

    /// Sets a field without any tracking. Use this to build a model before it
    /// is observed.
    pub fn set(&mut self, inst: InstId, field: &str, value: Value) -> Result<Value> {
        let (class, idx) = self.field_index(inst, field)?;
        let ty = self.schema.fields_of(class)[idx].ty().clone();
        self.check(class, idx, &ty, &value)?;
        Ok(std::mem::replace(&mut self.insts[inst.0].fields[idx], value))
    }

    pub(crate) fn field_index(&self, inst: InstId, field: &str) -> Result<(ClassId, usize)> {
        let class = self.class_of(inst)?;
        Ok((class, self.schema.field_index(class, field)?))
    }

    pub(crate) fn slot(&self, inst: InstId, idx: usize) -> &Value {
        &self.insts[inst.0].fields[idx]
    }

    pub(crate) fn slot_mut(&mut self, inst: InstId, idx: usize) -> &mut Value {
        &mut self.insts[inst.0].fields[idx]
    }

    pub(crate) fn list_mut(&mut self, inst: InstId, idx: usize, path: &FieldPath) -> Result<&mut Vec<Value>> {
        let class = self.class_of(inst)?;
        if !matches!(self.get_at(inst, path)?, Value::List(_)) {
            return Err(self.not_a(class, path, "list"));
        }
        match self.container_mut(inst, idx, path)? {
            Value::List(items) => Ok(items),
            _ => unreachable!("shape was checked above"),
        }
    }

    pub(crate) fn map_mut(
        &mut self,
        inst: InstId,
        idx: usize,
        path: &FieldPath,
    ) -> Result<&mut IndexMap<String, Value>> {
        let class = self.class_of(inst)?;
        if !matches!(self.get_at(inst, path)?, Value::Map(_)) {
            return Err(self.not_a(class, path, "map"));
        }
        match self.container_mut(inst, idx, path)? {
            Value::Map(entries) => Ok(entries),
            _ => unreachable!("shape was checked above"),
        }
    }

    /// Walks `keys` from a field value down to a nested container.
    fn container_mut(
        &mut self,
        inst: InstId,
        idx: usize,
        path: &FieldPath,
    ) -> Result<&mut Value> {
        // Find the failure first so the mutable walk below cannot fail.
        self.get_at(inst, path)?;

        let mut value = self.slot_mut(inst, idx);
        for key in path.keys() {
            value = match (value, key) {
                (Value::List(items), Key::Index(i)) => &mut items[*i],
                (Value::Map(entries), Key::Name(k)) => &mut entries[k.as_str()],
                _ => unreachable!("container path was checked above"),
            };
        }
        Ok(value)
    }

    pub(crate) fn check(&self, class: ClassId, idx: usize, ty: &FieldType, value: &Value) -> Result<()> {
        let class_of = |inst: InstId| self.insts.get(inst.0).map(|i| i.class);
        if self.schema.admits(ty, value, &class_of) {
            Ok(())
        } else {
            Err(Error::FieldKindMismatch {
                class: self.schema.class(class).name().to_string(),
                field: self.schema.fields_of(class)[idx].name().to_string(),
                expected: ty.to_string(),
                found: value.shape(),
            })
        }
    }

    pub(crate) fn not_a(&self, class: ClassId, path: &FieldPath, expected: &'static str) -> Error {
        Error::NotAContainer {
            class: self.schema.class(class).name().to_string(),
            path: path.to_string(),
            expected,
        }
    }
}
