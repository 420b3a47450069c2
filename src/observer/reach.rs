use super::field::{ref_kind, refs_of};
use super::ObservedModel;
use crate::error::{Error, Result, Violation, ViolationKind};
use crate::graph::RefKind;
use crate::value::InstId;

use indexmap::IndexSet;
use log::{debug, error};
use std::time::Instant;

/// Candidate sets collected between prunes.
#[derive(Debug, Default)]
pub(super) struct Reachability {
    /// Lost their last strong parent.
    pub possibly_unreachable: IndexSet<InstId>,
    /// Became tracked.
    pub possibly_new: IndexSet<InstId>,
    /// Had an edge added or removed.
    pub to_check: IndexSet<InstId>,
}

impl ObservedModel {
    /// Disposes every instance that is no longer strongly reachable, then
    /// checks the single-parent rule for every instance whose edges changed
    /// since the last successful prune.
    ///
    /// On violations the edits stay in place and the checked set is kept, so
    /// a later prune (after an undo, say) checks the same instances again.
    pub fn prune(&mut self) -> Result<()> {
        let start = Instant::now();
        let result = self.prune_inner();
        self.counters
            .record_prune(start.elapsed().as_micros() as u64);
        result
    }

    fn prune_inner(&mut self) -> Result<()> {
        let disposed = self.sweep()?;
        self.reach.possibly_new.clear();

        let violations = self.violations();
        debug!(
            "prune disposed {} instances, checked {}, found {} violations",
            disposed,
            self.reach.to_check.len(),
            violations.len()
        );

        if !violations.is_empty() {
            for violation in &violations {
                error!("{violation}");
            }
            return Err(Error::InvariantViolation { violations });
        }

        self.reach.to_check.clear();
        Ok(())
    }

    /// Disposes candidates that still have no strong parent. Disposing an
    /// instance drops its own edges, which may add more candidates.
    pub(super) fn sweep(&mut self) -> Result<usize> {
        let mut disposed = 0;
        while let Some(inst) = self.reach.possibly_unreachable.pop() {
            if self.graph.has_parents(inst, RefKind::Strong) {
                self.reach.to_check.insert(inst);
                continue;
            }
            if self.dispose_inst(inst)? {
                disposed += 1;
            }
        }
        Ok(disposed)
    }

    pub(super) fn mark_unreachable(&mut self, inst: InstId) {
        if inst != self.root && self.states.contains_key(&inst) {
            self.reach.possibly_unreachable.insert(inst);
        }
    }

    /// Stops tracking `inst` and drops the edges its fields hold. Returns
    /// false if it was not tracked.
    pub(super) fn dispose_inst(&mut self, inst: InstId) -> Result<bool> {
        let Some(state) = self.states.remove(&inst) else {
            return Ok(false);
        };

        let class = self.heap.class_of(inst)?;
        let schema = self.heap.schema().clone();
        for (idx, field) in state.fields.into_iter().enumerate() {
            if !field.attached {
                continue;
            }

            let desc = &schema.fields_of(class)[idx];
            let kind = ref_kind(desc);
            for child in refs_of(std::slice::from_ref(self.heap.slot(inst, idx))) {
                self.remove_edge(inst, desc.name_arc(), child, kind)?;
            }
            for target in field.implicit {
                self.remove_edge(inst, desc.name_arc(), target, RefKind::Weak)?;
            }
        }

        self.reach.possibly_new.shift_remove(&inst);
        self.counters.disposed_instances += 1;
        self.hooks.dispose(inst);
        debug!("disposed {} {}", self.heap.class_name(inst), inst);

        Ok(true)
    }

    fn violations(&self) -> Vec<Violation> {
        let mut out = vec![];

        for &inst in &self.reach.to_check {
            if self.never_tracked(inst) {
                continue;
            }
            let tracked = self.states.contains_key(&inst);

            let strong = self.graph.has_parents(inst, RefKind::Strong);
            let kind = if self.expects_no_parents(inst) {
                strong.then_some(ViolationKind::UnexpectedParents)
            } else if !strong {
                self.graph
                    .has_parents(inst, RefKind::Weak)
                    .then_some(ViolationKind::DanglingWeakRefs)
            } else if self.graph.single_parent(inst).is_none() {
                Some(ViolationKind::MultipleParents)
            } else if tracked && self.get_path_to_child(inst).is_none() {
                Some(ViolationKind::Detached)
            } else {
                None
            };

            if let Some(kind) = kind {
                let edges = match kind {
                    ViolationKind::DanglingWeakRefs => self.graph.describe(inst, RefKind::Weak, &self.heap),
                    _ => self.graph.describe(inst, RefKind::Strong, &self.heap),
                };
                out.push(Violation {
                    kind,
                    inst,
                    uid: self.heap.uid(inst).unwrap_or_default(),
                    class: self.heap.class_name(inst).to_string(),
                    edges,
                });
            }
        }

        out
    }
}
