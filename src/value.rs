use indexmap::IndexMap;
use std::fmt;

/// A handle to an instance living in a [`crate::Heap`].
///
/// Handles compare by identity; two handles are equal only if they name the
/// same heap slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(pub(crate) usize);

impl InstId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for InstId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The value held by a field of an instance.
///
/// Maps keep their insertion order.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Inst(InstId),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
}

impl Value {
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn empty_list() -> Self {
        Value::List(vec![])
    }

    pub fn empty_map() -> Self {
        Value::Map(IndexMap::new())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_inst(&self) -> Option<InstId> {
        match self {
            Value::Inst(inst) => Some(*inst),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Short name of the runtime shape, used in diagnostics.
    pub fn shape(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Inst(_) => "instance",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<InstId> for Value {
    fn from(inst: InstId) -> Self {
        Value::Inst(inst)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

/// One step into a nested container: a list index or a map key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    Index(usize),
    Name(String),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Index(i) => write!(f, "[{i}]"),
            Key::Name(k) => write!(f, "[{k:?}]"),
        }
    }
}

/// Addresses a container stored in a field: the field itself, or a list or
/// map nested inside it.
///
/// ```
/// use treewatch::FieldPath;
///
/// let path = FieldPath::new("attrs").key("className").index(1);
/// assert_eq!(path.to_string(), "attrs[\"className\"][1]");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldPath {
    field: String,
    keys: Vec<Key>,
}

impl FieldPath {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            keys: vec![],
        }
    }

    pub(crate) fn from_parts(field: &str, keys: &[Key]) -> Self {
        Self {
            field: field.to_string(),
            keys: keys.to_vec(),
        }
    }

    pub fn index(mut self, index: usize) -> Self {
        self.keys.push(Key::Index(index));
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.keys.push(Key::Name(key.into()));
        self
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }
}

impl From<&str> for FieldPath {
    fn from(field: &str) -> Self {
        FieldPath::new(field)
    }
}

impl From<String> for FieldPath {
    fn from(field: String) -> Self {
        FieldPath::new(field)
    }
}

impl From<&FieldPath> for FieldPath {
    fn from(path: &FieldPath) -> Self {
        path.clone()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.field)?;
        for key in &self.keys {
            write!(f, "{key}")?;
        }
        Ok(())
    }
}
