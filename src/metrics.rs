/// A 'snapshot' of the bookkeeping of an observed model.
///
/// Obtained by calling [`crate::ObservedModel::metrics`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Metrics {
    /// Number of instances currently tracked.
    pub tracked_instances: u64,

    /// Strong edges, counting repeated references separately.
    pub strong_edges: u64,

    /// Weak edges, counting repeated references separately.
    pub weak_edges: u64,

    /// Number of change events fired since observation began.
    pub changes_fired: u64,

    /// Number of prunes that have run, successful or not.
    pub prunes: u64,

    /// Number of instances disposed by prunes.
    pub disposed_instances: u64,

    pub last_prune_micros: u64,
    pub avg_prune_micros: u64,
}

/// Counters kept by the model between snapshots.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub changes_fired: u64,
    pub prunes: u64,
    pub disposed_instances: u64,
    pub last_prune_micros: u64,
    pub avg_prune_micros: u64,
}

impl Counters {
    pub fn record_prune(&mut self, micros: u64) {
        self.prunes += 1;
        self.last_prune_micros = micros;
        self.avg_prune_micros = update_avg_u64(self.avg_prune_micros, micros, self.prunes);
    }
}

pub fn update_avg_u64(running_avg: u64, new_value: u64, sample_size: u64) -> u64 {
    if sample_size == 0 {
        return new_value;
    }

    let update = new_value.abs_diff(running_avg) / sample_size;
    if new_value >= running_avg {
        running_avg + update
    } else {
        running_avg - update
    }
}
