//! Instrumentation of a model rooted at one instance.
//!
//! [`ObservedModel`] owns the heap while it is observed. Every tracked
//! mutation goes through it, so it can keep the [`RefGraph`] in step with the
//! field values and report each change with its path from the root.
mod field;
mod reach;

use crate::change::{ChangeNode, ModelChange};
use crate::config::{FieldSpec, ObserveConfig, ObserveHooks};
use crate::error::{Error, Result};
use crate::graph::{RefGraph, RefKind};
use crate::heap::{Heap, Instance};
use crate::listener::ModelListener;
use crate::metrics::{Counters, Metrics};
use crate::schema::Schema;
use crate::value::{InstId, Value};

use indexmap::IndexSet;
use log::{debug, info, warn};
use rustc_hash::{FxHashMap, FxHashSet};
use std::time::Instant;

use reach::Reachability;

#[derive(Debug, Default)]
struct FieldState {
    attached: bool,
    /// Targets of weak edges resolved from identifier strings.
    implicit: Vec<InstId>,
}

#[derive(Debug)]
struct InstState {
    fields: Vec<FieldState>,
}

/// Per-class lookup tables built from an [`ObserveConfig`].
struct FieldMasks {
    excluded: Vec<Vec<bool>>,
    skipped: Vec<Vec<bool>>,
    classes: Vec<bool>,
}

impl FieldMasks {
    fn new(schema: &Schema, config: &ObserveConfig) -> Result<Self> {
        let mut excluded_classes = vec![];
        for name in &config.exclude_classes {
            excluded_classes.push(schema.class_id(name)?);
        }

        Ok(Self {
            excluded: Self::mask(schema, &config.exclude_fields)?,
            skipped: Self::mask(schema, &config.skip_initial_fields)?,
            classes: schema
                .classes()
                .map(|(id, _)| excluded_classes.iter().any(|ex| schema.is_subclass(id, *ex)))
                .collect(),
        })
    }

    fn mask(schema: &Schema, specs: &[FieldSpec]) -> Result<Vec<Vec<bool>>> {
        let mut targets = vec![];
        for spec in specs {
            let class = schema.class_id(&spec.class)?;
            let idx = schema.field_index(class, &spec.field)?;
            targets.push((schema.fields_of(class)[idx].declared_in(), spec.field.as_str()));
        }

        Ok(schema
            .classes()
            .map(|(_, class)| {
                class
                    .fields()
                    .iter()
                    .map(|f| {
                        targets
                            .iter()
                            .any(|(declared_in, name)| f.declared_in() == *declared_in && f.name() == *name)
                    })
                    .collect()
            })
            .collect())
    }
}

/// Starts observing the model held in `heap`, rooted at `root`.
///
/// Walks every instance reachable from the root, records an edge for every
/// reference, and runs an initial prune so that a model which already breaks
/// the single-parent rule is rejected up front.
pub fn observe(heap: Heap, root: InstId, config: ObserveConfig, hooks: ObserveHooks) -> Result<ObservedModel> {
    ObservedModel::new(heap, root, config, hooks)
}

pub struct ObservedModel {
    heap: Heap,
    root: InstId,
    config: ObserveConfig,
    hooks: ObserveHooks,
    masks: FieldMasks,
    states: FxHashMap<InstId, InstState>,
    /// Every instance that was tracked at some point, disposed ones included.
    seen: FxHashSet<InstId>,
    graph: RefGraph,
    reach: Reachability,
    journal: Option<Vec<ModelChange>>,
    counters: Counters,
    disposed: bool,
}

impl ObservedModel {
    pub fn new(heap: Heap, root: InstId, config: ObserveConfig, hooks: ObserveHooks) -> Result<Self> {
        heap.class_of(root)?;
        let masks = FieldMasks::new(heap.schema(), &config)?;

        let mut model = Self {
            heap,
            root,
            config,
            hooks,
            masks,
            states: FxHashMap::default(),
            seen: FxHashSet::default(),
            graph: RefGraph::new(),
            reach: Reachability::default(),
            journal: None,
            counters: Counters::default(),
            disposed: false,
        };

        let start = Instant::now();
        model.observe_inst(root, false)?;
        model.prune()?;

        if !model.config.quiet {
            info!(
                "observing {} instances under {} {} (took {:?})",
                model.states.len(),
                model.heap.class_name(root),
                root,
                start.elapsed()
            );
        }

        Ok(model)
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn root(&self) -> InstId {
        self.root
    }

    pub fn graph(&self) -> &RefGraph {
        &self.graph
    }

    pub fn config(&self) -> &ObserveConfig {
        &self.config
    }

    /// Allocates a new instance. It stays untracked until it is stored into
    /// an observed field.
    pub fn alloc<'a, I>(&mut self, class: &str, fields: I) -> Result<InstId>
    where
        I: IntoIterator<Item = (&'a str, Value)>,
    {
        self.heap.alloc(class, fields)
    }

    /// Frees an instance that is neither tracked nor referenced, typically
    /// one a successful prune disposed.
    pub fn free(&mut self, inst: InstId) -> Result<Instance> {
        if self.states.contains_key(&inst) {
            return Err(Error::StillTracked(inst));
        }
        if self.graph.has_parents(inst, RefKind::Strong) || self.graph.has_parents(inst, RefKind::Weak) {
            return Err(Error::StillReferenced(inst));
        }

        let freed = self.heap.free(inst)?;
        // the slot may be reused by an unrelated instance
        self.seen.remove(&inst);
        self.reach.to_check.shift_remove(&inst);
        Ok(freed)
    }

    pub fn is_tracked(&self, inst: InstId) -> bool {
        self.states.contains_key(&inst)
    }

    pub fn tracked(&self) -> impl Iterator<Item = InstId> + '_ {
        self.states.keys().copied()
    }

    /// The unique root-to-`inst` path, or `None` if `inst` is detached or
    /// reachable in more than one way.
    pub fn get_path_to_child(&self, inst: InstId) -> Option<Vec<ChangeNode>> {
        self.graph.path_to(inst, self.root, false)
    }

    /// Like [`Self::get_path_to_child`], but picks one of several parents
    /// instead of giving up. Meant for diagnostics.
    pub fn get_any_path_to_child(&self, inst: InstId) -> Option<Vec<ChangeNode>> {
        self.graph.path_to(inst, self.root, true)
    }

    pub fn get_refs_to_inst(&self, inst: InstId, include_weak: bool) -> Vec<InstId> {
        self.graph.refs_to(inst, include_weak)
    }

    /// Instances that became tracked since the last prune.
    pub fn new_insts(&self) -> Vec<InstId> {
        self.reach
            .possibly_new
            .iter()
            .copied()
            .filter(|inst| self.states.contains_key(inst))
            .collect()
    }

    /// Everything the next prune will dispose: instances that lost their last
    /// strong parent, plus every descendant whose strong parents are all
    /// going away too. Nothing is modified.
    pub fn to_be_deleted_insts(&self) -> Vec<InstId> {
        let mut doomed: IndexSet<InstId> = IndexSet::new();
        let mut stack: Vec<InstId> = self
            .reach
            .possibly_unreachable
            .iter()
            .copied()
            .filter(|inst| {
                *inst != self.root
                    && self.states.contains_key(inst)
                    && !self.graph.has_parents(*inst, RefKind::Strong)
            })
            .collect();
        stack.reverse();

        while let Some(inst) = stack.pop() {
            if !doomed.insert(inst) {
                continue;
            }

            for child in self.strong_children(inst) {
                if doomed.contains(&child) || !self.states.contains_key(&child) {
                    continue;
                }
                let orphaned = self
                    .graph
                    .parents(child, RefKind::Strong)
                    .is_some_and(|parents| parents.keys().all(|p| doomed.contains(p)));
                if orphaned {
                    stack.push(child);
                }
            }
        }

        doomed.into_iter().collect()
    }

    /// Disposed instances that are still weakly referenced. These are
    /// reported, never repaired.
    pub fn deleted_insts_with_dangling_refs(&self) -> Vec<InstId> {
        self.reach
            .to_check
            .iter()
            .copied()
            .filter(|inst| {
                !self.states.contains_key(inst)
                    && !self.expects_no_parents(*inst)
                    && !self.graph.has_parents(*inst, RefKind::Strong)
                    && self.graph.has_parents(*inst, RefKind::Weak)
            })
            .collect()
    }

    /// Starts observing a field that was excluded or skipped when `inst` was
    /// first walked. Instances discovered through it are not reported as new.
    pub fn observe_inst_field(&mut self, inst: InstId, field: &str) -> Result<()> {
        let (class, idx) = self.heap.field_index(inst, field)?;
        let state = self.states.get(&inst).ok_or(Error::NotObserved(inst))?;

        if state.fields[idx].attached {
            return Err(Error::FieldAlreadyObserved {
                class: self.heap.schema().class(class).name().to_string(),
                field: field.to_string(),
            });
        }

        self.attach_field(inst, idx, true)
    }

    pub fn metrics(&self) -> Metrics {
        Metrics {
            tracked_instances: self.states.len() as u64,
            strong_edges: self.graph.edge_count(RefKind::Strong) as u64,
            weak_edges: self.graph.edge_count(RefKind::Weak) as u64,
            changes_fired: self.counters.changes_fired,
            prunes: self.counters.prunes,
            disposed_instances: self.counters.disposed_instances,
            last_prune_micros: self.counters.last_prune_micros,
            avg_prune_micros: self.counters.avg_prune_micros,
        }
    }

    /// Stops observing. Every tracked instance is disposed, after which
    /// mutations are applied without events. Calling it again does nothing.
    pub fn dispose(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;
        self.journal = None;

        self.reach.possibly_unreachable.insert(self.root);
        let disposed = self.sweep()?;

        // Strong cycles cut off from the root survive the sweep.
        let stragglers: Vec<InstId> = self.states.keys().copied().collect();
        if !stragglers.is_empty() {
            warn!("dispose found {} instances detached from the root", stragglers.len());
        }
        for &inst in &stragglers {
            self.dispose_inst(inst)?;
        }
        self.reach = Reachability::default();

        debug!("dispose released {} instances", disposed + stragglers.len());

        if !self.graph.is_empty() {
            return Err(Error::Teardown {
                instances: self.states.len(),
                edges: self.graph.edge_count(RefKind::Strong) + self.graph.edge_count(RefKind::Weak),
            });
        }

        Ok(())
    }

    /// Gives back the heap. Tracking state is dropped with the model.
    pub fn into_heap(self) -> Heap {
        self.heap
    }

    pub(crate) fn start_journal(&mut self) {
        self.journal = Some(vec![]);
    }

    pub(crate) fn take_journal(&mut self) -> Option<Vec<ModelChange>> {
        self.journal.take()
    }

    pub(crate) fn journal(&self) -> &[ModelChange] {
        self.journal.as_deref().unwrap_or_default()
    }

    pub(crate) fn set_extra_listener(&mut self, listener: Option<Box<dyn ModelListener>>) {
        self.hooks.extra_listener = listener;
    }

    /// Never-tracked instances are exempt in incremental mode. Disposed
    /// ones are not.
    fn never_tracked(&self, inst: InstId) -> bool {
        self.config.incremental && !self.seen.contains(&inst)
    }

    fn expects_no_parents(&self, inst: InstId) -> bool {
        inst == self.root
            || self.never_tracked(inst)
            || self
                .hooks
                .external_refs
                .as_ref()
                .is_some_and(|pred| pred(&self.heap, inst))
    }

    fn excluded_class(&self, inst: InstId) -> bool {
        self.heap
            .class_of(inst)
            .is_ok_and(|class| self.masks.classes[class.index()])
    }
}
