#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use treewatch::{
    ChangeRecorder, Heap, InstId, ModelChange, ObserveConfig, ObserveHooks, ObservedModel, Schema, Value,
};

pub const SCHEMA: &str = "
Node
  @WeakRef parent: Node?
  Attribute
    key: String
    value: String
  TextNode
    text: String
    attrs: [Attribute]
  TagNode
    name: String
    tag: String
    children: [Node]
    @WeakRef children2: [Node]
    attrs: Map[String, Expr]
    nicknames: [String]
    rootExpr: Expr?
    @WeakRef attrs2: Map[String, List[Expr]]
    attrs3: Map[String, List[Expr]]
    @Transient hovered: Bool
Expr
  value: String | Node
";

pub type Events = Rc<RefCell<Vec<ModelChange>>>;

/// Anything instances can be allocated into, before or during observation.
pub trait Alloc {
    fn alloc_inst(&mut self, class: &str, fields: Vec<(&str, Value)>) -> InstId;
}

impl Alloc for Heap {
    fn alloc_inst(&mut self, class: &str, fields: Vec<(&str, Value)>) -> InstId {
        self.alloc(class, fields).unwrap()
    }
}

impl Alloc for ObservedModel {
    fn alloc_inst(&mut self, class: &str, fields: Vec<(&str, Value)>) -> InstId {
        self.alloc(class, fields).unwrap()
    }
}

impl Alloc for ChangeRecorder {
    fn alloc_inst(&mut self, class: &str, fields: Vec<(&str, Value)>) -> InstId {
        self.alloc(class, fields).unwrap()
    }
}

pub fn heap() -> Heap {
    Heap::new(Arc::new(Schema::parse(SCHEMA).unwrap()))
}

pub fn tag(a: &mut impl Alloc, name: &str, tag: &str) -> InstId {
    a.alloc_inst("TagNode", vec![("name", Value::from(name)), ("tag", Value::from(tag))])
}

pub fn text(a: &mut impl Alloc, text: &str, parent: Option<InstId>) -> InstId {
    a.alloc_inst("TextNode", vec![("text", Value::from(text)), ("parent", Value::from(parent))])
}

pub fn attribute(a: &mut impl Alloc, key: &str, value: &str) -> InstId {
    a.alloc_inst("Attribute", vec![("key", Value::from(key)), ("value", Value::from(value))])
}

pub fn expr(a: &mut impl Alloc, value: impl Into<Value>) -> InstId {
    a.alloc_inst("Expr", vec![("value", value.into())])
}

pub fn quiet() -> ObserveConfig {
    ObserveConfig::default().quiet(true)
}

/// Hooks with a listener that appends every change to the returned list.
pub fn collecting_hooks() -> (ObserveHooks, Events) {
    let events = Events::default();
    let sink = events.clone();
    let hooks = ObserveHooks::new().listener(move |change: &ModelChange| sink.borrow_mut().push(change.clone()));
    (hooks, events)
}

pub fn observed(heap: Heap, root: InstId) -> (ObservedModel, Events) {
    let (hooks, events) = collecting_hooks();
    (treewatch::observe(heap, root, quiet(), hooks).unwrap(), events)
}

pub fn recorder(heap: Heap, root: InstId) -> (ChangeRecorder, Events) {
    let (hooks, events) = collecting_hooks();
    (ChangeRecorder::new(heap, root, quiet(), hooks).unwrap(), events)
}

pub fn take(events: &Events) -> Vec<ModelChange> {
    std::mem::take(&mut *events.borrow_mut())
}
