//! Per-class field reflection.
//!
//! A [`Schema`] is registered once by the embedding application and never
//! changes afterwards. For every class it lists the fields, parent class
//! fields first, and for every field its declared [`FieldType`] and whether it
//! holds weak references.
mod parser;

use crate::error::{Error, Result};
use crate::value::{InstId, Key, Value};

use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub(crate) u32);

impl ClassId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The declared type of a field value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    /// Any scalar value.
    Any,
    /// A reference to an instance of the named class or one of its subclasses.
    Inst(String),
    List(Box<FieldType>),
    /// String-keyed map.
    Map(Box<FieldType>),
    Optional(Box<FieldType>),
    Union(Vec<FieldType>),
}

impl FieldType {
    pub fn inst(class: impl Into<String>) -> Self {
        FieldType::Inst(class.into())
    }

    pub fn list(elem: FieldType) -> Self {
        FieldType::List(Box::new(elem))
    }

    pub fn map(value: FieldType) -> Self {
        FieldType::Map(Box::new(value))
    }

    pub fn optional(self) -> Self {
        match self {
            FieldType::Optional(_) => self,
            other => FieldType::Optional(Box::new(other)),
        }
    }

    pub fn is_optional(&self) -> bool {
        match self {
            FieldType::Optional(_) => true,
            FieldType::Union(alts) => alts.iter().any(FieldType::is_optional),
            _ => false,
        }
    }

    /// True if a value of this type may contain instance references.
    pub fn may_reference(&self) -> bool {
        match self {
            FieldType::Inst(_) => true,
            FieldType::List(t) | FieldType::Map(t) | FieldType::Optional(t) => t.may_reference(),
            FieldType::Union(alts) => alts.iter().any(FieldType::may_reference),
            _ => false,
        }
    }

    /// The type of the container reached by following `keys` from a value of
    /// this type.
    pub fn descend(&self, keys: &[Key]) -> Option<&FieldType> {
        let Some((first, rest)) = keys.split_first() else {
            return Some(self);
        };

        match (self.strip_optional(), first) {
            (FieldType::List(elem), Key::Index(_)) => elem.descend(rest),
            (FieldType::Map(elem), Key::Name(_)) => elem.descend(rest),
            (FieldType::Union(alts), _) => alts
                .iter()
                .find_map(|alt| alt.descend(keys)),
            _ => None,
        }
    }

    /// Element type of a list-typed value.
    pub fn list_elem(&self) -> Option<&FieldType> {
        match self.strip_optional() {
            FieldType::List(elem) => Some(elem),
            FieldType::Union(alts) => alts.iter().find_map(FieldType::list_elem),
            _ => None,
        }
    }

    /// Value type of a map-typed value.
    pub fn map_value(&self) -> Option<&FieldType> {
        match self.strip_optional() {
            FieldType::Map(elem) => Some(elem),
            FieldType::Union(alts) => alts.iter().find_map(FieldType::map_value),
            _ => None,
        }
    }

    fn strip_optional(&self) -> &FieldType {
        match self {
            FieldType::Optional(inner) => inner.strip_optional(),
            other => other,
        }
    }

    fn default_value(&self) -> Option<Value> {
        match self {
            FieldType::String => Some(Value::Str(String::new())),
            FieldType::Int => Some(Value::Int(0)),
            FieldType::Float => Some(Value::Float(0.0)),
            FieldType::Bool => Some(Value::Bool(false)),
            FieldType::List(_) => Some(Value::empty_list()),
            FieldType::Map(_) => Some(Value::empty_map()),
            FieldType::Optional(_) | FieldType::Any => Some(Value::Null),
            FieldType::Union(_) if self.is_optional() => Some(Value::Null),
            FieldType::Union(_) | FieldType::Inst(_) => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String => f.write_str("String"),
            FieldType::Int => f.write_str("Int"),
            FieldType::Float => f.write_str("Float"),
            FieldType::Bool => f.write_str("Bool"),
            FieldType::Any => f.write_str("Any"),
            FieldType::Inst(class) => f.write_str(class),
            FieldType::List(elem) => write!(f, "[{elem}]"),
            FieldType::Map(elem) => write!(f, "Map[String, {elem}]"),
            FieldType::Optional(inner) => write!(f, "{inner}?"),
            FieldType::Union(alts) => {
                for (i, alt) in alts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{alt}")?;
                }
                Ok(())
            }
        }
    }
}

/// How the tracker treats a field.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Scalar,
    StrongRef,
    WeakRef,
    OrderedCollection,
    Map,
}

#[derive(Clone, Debug)]
pub struct FieldDescriptor {
    name: Arc<str>,
    ty: FieldType,
    weak: bool,
    transient: bool,
    declared_in: ClassId,
}

impl FieldDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_arc(&self) -> &Arc<str> {
        &self.name
    }

    pub fn ty(&self) -> &FieldType {
        &self.ty
    }

    pub fn is_weak(&self) -> bool {
        self.weak
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }

    /// The class that declares this field; subclasses share the descriptor.
    pub fn declared_in(&self) -> ClassId {
        self.declared_in
    }

    pub fn kind(&self) -> FieldKind {
        match self.ty.strip_optional() {
            FieldType::List(_) => FieldKind::OrderedCollection,
            FieldType::Map(_) => FieldKind::Map,
            ty if ty.may_reference() && self.weak => FieldKind::WeakRef,
            ty if ty.may_reference() => FieldKind::StrongRef,
            _ => FieldKind::Scalar,
        }
    }
}

#[derive(Debug)]
pub struct ClassDef {
    name: String,
    parent: Option<ClassId>,
    fields: Vec<FieldDescriptor>,
}

impl ClassDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<ClassId> {
        self.parent
    }

    /// All fields, inherited ones first.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name() == name)
    }
}

/// A field as written in a class declaration, before the schema is built.
#[derive(Clone, Debug)]
pub struct FieldDecl {
    name: String,
    ty: FieldType,
    weak: bool,
    transient: bool,
}

impl FieldDecl {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            weak: false,
            transient: false,
        }
    }

    pub fn weak(mut self) -> Self {
        self.weak = true;
        self
    }

    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }
}

#[derive(Clone, Debug)]
pub struct ClassDecl {
    name: String,
    extends: Option<String>,
    fields: Vec<FieldDecl>,
}

impl ClassDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extends: None,
            fields: vec![],
        }
    }

    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.extends = Some(parent.into());
        self
    }

    pub fn field(self, name: impl Into<String>, ty: FieldType) -> Self {
        self.decl(FieldDecl::new(name, ty))
    }

    pub fn weak(self, name: impl Into<String>, ty: FieldType) -> Self {
        self.decl(FieldDecl::new(name, ty).weak())
    }

    pub fn decl(mut self, field: FieldDecl) -> Self {
        self.fields.push(field);
        self
    }
}

#[derive(Default)]
pub struct SchemaBuilder {
    classes: Vec<ClassDecl>,
}

impl SchemaBuilder {
    pub fn class(mut self, class: ClassDecl) -> Self {
        self.classes.push(class);
        self
    }

    pub fn build(self) -> Result<Schema> {
        let mut by_name = FxHashMap::default();
        for (i, decl) in self.classes.iter().enumerate() {
            if by_name.insert(decl.name.clone(), ClassId(i as u32)).is_some() {
                return Err(Error::DuplicateClass(decl.name.clone()));
            }
        }

        let mut parents = Vec::with_capacity(self.classes.len());
        for decl in &self.classes {
            let parent = match &decl.extends {
                Some(name) => Some(
                    *by_name
                        .get(name)
                        .ok_or_else(|| Error::UnknownClass(name.clone()))?,
                ),
                None => None,
            };
            parents.push(parent);
        }

        // Every class must be reachable from a base class, so walking parents
        // must terminate.
        for start in 0..self.classes.len() {
            let mut seen = 0;
            let mut cur = parents[start];
            while let Some(ClassId(p)) = cur {
                seen += 1;
                if seen > self.classes.len() {
                    return Err(Error::SchemaCycle(self.classes[start].name.clone()));
                }
                cur = parents[p as usize];
            }
        }

        let mut classes: Vec<Option<ClassDef>> = (0..self.classes.len()).map(|_| None).collect();
        for i in 0..self.classes.len() {
            Self::resolve(i, &self.classes, &parents, &mut classes)?;
        }

        let schema = Schema {
            classes: classes.into_iter().flatten().collect(),
            by_name,
        };

        for class in &schema.classes {
            for field in &class.fields {
                schema.check_type_names(class, field, &field.ty)?;
            }
        }

        Ok(schema)
    }

    fn resolve(
        i: usize,
        decls: &[ClassDecl],
        parents: &[Option<ClassId>],
        out: &mut Vec<Option<ClassDef>>,
    ) -> Result<()> {
        if out[i].is_some() {
            return Ok(());
        }

        let mut fields = match parents[i] {
            Some(ClassId(p)) => {
                Self::resolve(p as usize, decls, parents, out)?;
                out[p as usize]
                    .as_ref()
                    .map(|parent| parent.fields.clone())
                    .unwrap_or_default()
            }
            None => vec![],
        };

        let decl = &decls[i];
        for field in &decl.fields {
            if fields.iter().any(|f: &FieldDescriptor| f.name() == field.name) {
                return Err(Error::DuplicateField {
                    class: decl.name.clone(),
                    field: field.name.clone(),
                });
            }
            fields.push(FieldDescriptor {
                name: Arc::from(field.name.as_str()),
                ty: field.ty.clone(),
                weak: field.weak,
                transient: field.transient,
                declared_in: ClassId(i as u32),
            });
        }

        out[i] = Some(ClassDef {
            name: decl.name.clone(),
            parent: parents[i],
            fields,
        });

        Ok(())
    }
}

/// The registered classes of a model.
#[derive(Debug)]
pub struct Schema {
    classes: Vec<ClassDef>,
    by_name: FxHashMap<String, ClassId>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Parses the indented schema notation.
    ///
    /// ```
    /// use treewatch::{FieldKind, Schema};
    ///
    /// let schema = Schema::parse(
    ///     "
    /// Node
    ///   @WeakRef parent: Node?
    ///   TagNode
    ///     children: [Node]
    /// ",
    /// )
    /// .unwrap();
    ///
    /// let tag = schema.class_id("TagNode").unwrap();
    /// let fields = schema.fields_of(tag);
    /// assert_eq!(fields[0].kind(), FieldKind::WeakRef);
    /// assert_eq!(fields[1].kind(), FieldKind::OrderedCollection);
    /// ```
    pub fn parse(text: &str) -> Result<Schema> {
        parser::parse(text)?.build()
    }

    pub fn class_id(&self, name: &str) -> Result<ClassId> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownClass(name.to_string()))
    }

    pub fn class(&self, id: ClassId) -> &ClassDef {
        &self.classes[id.index()]
    }

    pub fn classes(&self) -> impl Iterator<Item = (ClassId, &ClassDef)> {
        self.classes
            .iter()
            .enumerate()
            .map(|(i, c)| (ClassId(i as u32), c))
    }

    pub fn fields_of(&self, id: ClassId) -> &[FieldDescriptor] {
        self.class(id).fields()
    }

    pub fn field_index(&self, class: ClassId, field: &str) -> Result<usize> {
        self.class(class)
            .field_index(field)
            .ok_or_else(|| Error::UnknownField {
                class: self.class(class).name.clone(),
                field: field.to_string(),
            })
    }

    pub fn is_subclass(&self, class: ClassId, of: ClassId) -> bool {
        let mut cur = Some(class);
        while let Some(c) = cur {
            if c == of {
                return true;
            }
            cur = self.class(c).parent;
        }
        false
    }

    /// Checks that `value` has the shape `ty` declares. `class_of` looks up
    /// the class of referenced instances.
    pub fn admits<F>(&self, ty: &FieldType, value: &Value, class_of: &F) -> bool
    where
        F: Fn(InstId) -> Option<ClassId>,
    {
        match (ty, value) {
            (FieldType::Optional(_), Value::Null) => true,
            (FieldType::Optional(inner), v) => self.admits(inner, v, class_of),
            (FieldType::Union(alts), v) => alts.iter().any(|alt| self.admits(alt, v, class_of)),
            (FieldType::String, Value::Str(_))
            | (FieldType::Int, Value::Int(_))
            | (FieldType::Float, Value::Float(_) | Value::Int(_))
            | (FieldType::Bool, Value::Bool(_)) => true,
            (
                FieldType::Any,
                Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_),
            ) => true,
            (FieldType::Inst(name), Value::Inst(inst)) => {
                match (self.by_name.get(name), class_of(*inst)) {
                    (Some(target), Some(class)) => self.is_subclass(class, *target),
                    _ => false,
                }
            }
            (FieldType::List(elem), Value::List(items)) => {
                items.iter().all(|item| self.admits(elem, item, class_of))
            }
            (FieldType::Map(elem), Value::Map(entries)) => {
                entries.values().all(|v| self.admits(elem, v, class_of))
            }
            _ => false,
        }
    }

    pub(crate) fn default_value(&self, class: ClassId, field: usize) -> Result<Value> {
        let desc = &self.fields_of(class)[field];
        desc.ty.default_value().ok_or_else(|| Error::MissingField {
            class: self.class(class).name.clone(),
            field: desc.name().to_string(),
        })
    }

    fn check_type_names(&self, class: &ClassDef, field: &FieldDescriptor, ty: &FieldType) -> Result<()> {
        match ty {
            FieldType::Inst(name) => {
                if !self.by_name.contains_key(name) {
                    return Err(Error::UnknownClass(format!(
                        "{name} (referenced by {}.{})",
                        class.name,
                        field.name()
                    )));
                }
            }
            FieldType::List(t) | FieldType::Map(t) | FieldType::Optional(t) => {
                self.check_type_names(class, field, t)?
            }
            FieldType::Union(alts) => {
                for alt in alts {
                    self.check_type_names(class, field, alt)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}
