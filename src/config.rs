use crate::change::ModelChange;
use crate::heap::Heap;
use crate::listener::{ModelListener, Reactivity, RefResolver};
use crate::value::InstId;

/// Names a field by the class that declares it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldSpec {
    pub class: String,
    pub field: String,
}

impl FieldSpec {
    pub fn new(class: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            field: field.into(),
        }
    }
}

/// This structure contains the settings for observing a model.
#[derive(Clone, Debug, Default)]
pub struct ObserveConfig {
    /// Fields that are never observed. They produce no change events and
    /// contribute no edges, unless explicitly observed later with
    /// [`crate::ObservedModel::observe_inst_field`].
    pub exclude_fields: Vec<FieldSpec>,

    /// Fields that are not walked when an instance is first observed. Such a
    /// field becomes observed on its first assignment, or through
    /// [`crate::ObservedModel::observe_inst_field`].
    pub skip_initial_fields: Vec<FieldSpec>,

    /// Instances of these classes are never tracked and never get edges.
    pub exclude_classes: Vec<String>,

    /// Deferred-subtree mode. Instances that are not tracked are expected to
    /// have no strong parents and are skipped by validation.
    pub incremental: bool,

    /// Turns off the log line written once the initial walk completes.
    pub quiet: bool,
}

impl ObserveConfig {
    pub fn exclude_field(mut self, class: &str, field: &str) -> Self {
        self.exclude_fields.push(FieldSpec::new(class, field));
        self
    }

    pub fn skip_initial_field(mut self, class: &str, field: &str) -> Self {
        self.skip_initial_fields.push(FieldSpec::new(class, field));
        self
    }

    pub fn exclude_class(mut self, class: &str) -> Self {
        self.exclude_classes.push(class.to_string());
        self
    }

    pub fn incremental(mut self, on: bool) -> Self {
        self.incremental = on;
        self
    }

    pub fn quiet(mut self, on: bool) -> Self {
        self.quiet = on;
        self
    }
}

pub(crate) type ExternalRefs = Box<dyn Fn(&Heap, InstId) -> bool>;

/// Callbacks installed into an observed model.
#[derive(Default)]
pub struct ObserveHooks {
    pub(crate) listener: Option<Box<dyn ModelListener>>,
    pub(crate) extra_listener: Option<Box<dyn ModelListener>>,
    pub(crate) reactivity: Option<Box<dyn Reactivity>>,
    pub(crate) resolver: Option<Box<dyn RefResolver>>,
    pub(crate) external_refs: Option<ExternalRefs>,
}

impl ObserveHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listener(mut self, listener: impl ModelListener + 'static) -> Self {
        self.listener = Some(Box::new(listener));
        self
    }

    pub fn reactivity(mut self, reactivity: impl Reactivity + 'static) -> Self {
        self.reactivity = Some(Box::new(reactivity));
        self
    }

    pub fn resolver(mut self, resolver: impl RefResolver + 'static) -> Self {
        self.resolver = Some(Box::new(resolver));
        self
    }

    /// Instances for which `pred` returns true are owned outside the model
    /// and must not be held by strong edges.
    pub fn external_refs(mut self, pred: impl Fn(&Heap, InstId) -> bool + 'static) -> Self {
        self.external_refs = Some(Box::new(pred));
        self
    }

    pub(crate) fn change(&mut self, change: &ModelChange) {
        if let Some(listener) = &mut self.listener {
            listener.on_change(change);
        }
        if let Some(listener) = &mut self.extra_listener {
            listener.on_change(change);
        }
    }

    pub(crate) fn dispose(&mut self, inst: InstId) {
        if let Some(listener) = &mut self.listener {
            listener.on_dispose(inst);
        }
        if let Some(listener) = &mut self.extra_listener {
            listener.on_dispose(inst);
        }
    }

    pub(crate) fn visit(&mut self, inst: InstId) {
        if let Some(listener) = &mut self.listener {
            listener.on_visit(inst);
        }
    }
}
