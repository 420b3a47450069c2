use crate::change::{undo_changes, ModelChange};
use crate::config::{ObserveConfig, ObserveHooks};
use crate::error::{Error, Result};
use crate::heap::Heap;
use crate::listener::ModelListener;
use crate::observer::ObservedModel;
use crate::value::InstId;

use indexmap::IndexSet;
use log::{error, warn};
use std::ops::{Deref, DerefMut};

/// What one recording produced.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordedChanges {
    pub changes: Vec<ModelChange>,
    /// Instances that became tracked and are still tracked at the end.
    pub new_instances: Vec<InstId>,
    pub deleted_instances: Vec<InstId>,
}

impl RecordedChanges {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.new_instances.is_empty() && self.deleted_instances.is_empty()
    }
}

/// Combines two recordings, `b` having happened after `a`.
///
/// An instance deleted in `a` and brought back in `b` is neither new nor
/// deleted; one created in `a` and deleted in `b` is neither either.
pub fn merge_recorded_changes(a: RecordedChanges, b: RecordedChanges) -> RecordedChanges {
    let a_new: IndexSet<InstId> = a.new_instances.into_iter().collect();
    let a_deleted: IndexSet<InstId> = a.deleted_instances.into_iter().collect();
    let b_new: IndexSet<InstId> = b.new_instances.into_iter().collect();
    let b_deleted: IndexSet<InstId> = b.deleted_instances.into_iter().collect();

    let new_instances = a_new
        .iter()
        .filter(|inst| !b_deleted.contains(*inst))
        .chain(b_new.iter().filter(|inst| !a_deleted.contains(*inst)))
        .copied()
        .collect::<IndexSet<_>>();
    let deleted_instances = a_deleted
        .iter()
        .filter(|inst| !b_new.contains(*inst))
        .chain(b_deleted.iter().filter(|inst| !a_new.contains(*inst)))
        .copied()
        .collect::<IndexSet<_>>();

    let mut changes = a.changes;
    changes.extend(b.changes);

    RecordedChanges {
        changes,
        new_instances: new_instances.into_iter().collect(),
        deleted_instances: deleted_instances.into_iter().collect(),
    }
}

pub fn merge_all_recorded_changes<I>(all: I) -> RecordedChanges
where
    I: IntoIterator<Item = RecordedChanges>,
{
    all.into_iter()
        .fold(RecordedChanges::empty(), merge_recorded_changes)
}

/// Drops changes made through `@Transient` fields, anywhere along their
/// path. Changes without a path are kept.
pub fn filter_persistent_changes(changes: Vec<ModelChange>, heap: &Heap) -> Vec<ModelChange> {
    let transient = |inst: InstId, field: &str| {
        heap.field_index(inst, field)
            .is_ok_and(|(class, idx)| heap.schema().fields_of(class)[idx].is_transient())
    };

    changes
        .into_iter()
        .filter(|change| match &change.path {
            Some(path) => !path.iter().any(|node| transient(node.inst, &node.field)),
            None => true,
        })
        .collect()
}

/// An observed model whose mutations can be grouped into undoable batches.
///
/// All of [`ObservedModel`] is reachable through `Deref`.
pub struct ChangeRecorder {
    model: ObservedModel,
    recording: bool,
}

impl ChangeRecorder {
    pub fn new(heap: Heap, root: InstId, config: ObserveConfig, hooks: ObserveHooks) -> Result<Self> {
        Ok(Self::from(ObservedModel::new(heap, root, config, hooks)?))
    }

    /// Runs `f` as one batch.
    ///
    /// If `f` returns an error, or the prune at the end of the batch finds a
    /// broken invariant, every change made by the batch is undone and the
    /// error is returned. Otherwise the batch's changes are returned along
    /// with the instances it created and deleted.
    pub fn with_recording<F, E>(&mut self, f: F) -> Result<RecordedChanges, E>
    where
        F: FnOnce(&mut ChangeRecorder) -> Result<(), E>,
        E: From<Error>,
    {
        if self.recording {
            return Err(Error::ReentrantRecording.into());
        }

        self.recording = true;
        self.model.start_journal();

        let result = match f(self) {
            Ok(()) => self.finish().map_err(E::from),
            Err(err) => Err(err),
        };

        if result.is_err() {
            self.rollback();
        }
        self.recording = false;

        result
    }

    fn finish(&mut self) -> Result<RecordedChanges> {
        let deleted_instances = self.model.to_be_deleted_insts();
        let new_instances = self
            .model
            .new_insts()
            .into_iter()
            .filter(|inst| !deleted_instances.contains(inst))
            .collect();

        self.model.prune()?;

        Ok(RecordedChanges {
            changes: self.model.take_journal().unwrap_or_default(),
            new_instances,
            deleted_instances,
        })
    }

    fn rollback(&mut self) {
        let changes = self.model.take_journal().unwrap_or_default();
        warn!("rolling back {} changes", changes.len());

        if let Err(err) = undo_changes(&mut self.model, &changes) {
            error!("failed to undo batch: {err}");
        }
        if let Err(err) = self.model.prune() {
            error!("model is inconsistent after rollback: {err}");
        }
    }

    /// Changes made so far by the batch in progress.
    pub fn changes_so_far(&self) -> &[ModelChange] {
        self.model.journal()
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Installs a second listener next to the one the model was created
    /// with, replacing any previous one.
    pub fn set_extra_listener(&mut self, listener: Option<Box<dyn ModelListener>>) {
        self.model.set_extra_listener(listener);
    }

    pub fn into_model(self) -> ObservedModel {
        self.model
    }
}

impl From<ObservedModel> for ChangeRecorder {
    fn from(model: ObservedModel) -> Self {
        Self {
            model,
            recording: false,
        }
    }
}

impl Deref for ChangeRecorder {
    type Target = ObservedModel;

    fn deref(&self) -> &ObservedModel {
        &self.model
    }
}

impl DerefMut for ChangeRecorder {
    fn deref_mut(&mut self) -> &mut ObservedModel {
        &mut self.model
    }
}
