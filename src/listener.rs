use crate::change::ModelChange;
use crate::heap::Heap;
use crate::schema::FieldDescriptor;
use crate::value::InstId;

/// Receives everything an observed model reports.
///
/// All callbacks run synchronously, in the middle of the mutation or prune
/// that caused them.
pub trait ModelListener {
    /// Called once per change to an observed field.
    fn on_change(&mut self, _change: &ModelChange) {}

    /// Called when a prune disposes an instance.
    fn on_dispose(&mut self, _inst: InstId) {}

    /// Called for every reference the observer follows or records, with the
    /// referenced instance.
    fn on_visit(&mut self, _inst: InstId) {}
}

impl<F> ModelListener for F
where
    F: FnMut(&ModelChange),
{
    fn on_change(&mut self, change: &ModelChange) {
        self(change)
    }
}

/// A reactive runtime that wants to know which fields are read and written.
pub trait Reactivity {
    fn report_observed(&self, inst: InstId, field: &str);

    fn report_changed(&self, inst: InstId, field: &str);
}

/// Finds instances referenced by identifier strings.
///
/// The resolver is handed every string stored in an observed field, map keys
/// included, and returns the instances those strings name. Each result
/// becomes a weak edge from the owner's field.
pub trait RefResolver {
    fn resolve(&mut self, heap: &Heap, owner: InstId, field: &FieldDescriptor, text: &str) -> Vec<InstId>;
}
