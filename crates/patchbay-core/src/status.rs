//! Worker status registry
//!
//! Every route source, route destination, and TCP endpoint owns one row,
//! registered up front by the caller. The engine updates rows as workers
//! change state or see traffic; the observer pulls dirty rows out with
//! [`StatusTable::flush_into`] on its own schedule.

/// Index of a registered row.
pub type StatusId = usize;

/// Connection state of one worker, monotonic within a run:
/// Uninitialized → Connecting → (Connected ⇄ Connecting) → NotConnected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkState {
    #[default]
    Uninitialized,
    Connecting,
    Connected,
    NotConnected,
}

impl LinkState {
    pub fn name(&self) -> &'static str {
        match self {
            LinkState::Uninitialized => "...",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "running",
            LinkState::NotConnected => "not running",
        }
    }
}

/// One observable row. `activity` is transient ("traffic since last flush");
/// `dirty` marks rows changed since the last flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusEntry {
    pub state: LinkState,
    pub activity: bool,
    pub dirty: bool,
}

/// Monotonic-id table of status rows, double-buffered with the observer.
#[derive(Debug, Clone, Default)]
pub struct StatusTable {
    dirty: bool,
    rows: Vec<StatusEntry>,
}

impl StatusTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a default row and return its id.
    pub fn register(&mut self) -> StatusId {
        self.rows.push(StatusEntry::default());
        self.rows.len() - 1
    }

    pub fn get(&self, id: StatusId) -> Option<&StatusEntry> {
        self.rows.get(id)
    }

    pub fn rows(&self) -> &[StatusEntry] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn dirty(&self) -> bool {
        self.dirty
    }

    /// Overwrite a row, marking it dirty iff (state, activity) changed.
    pub fn update(&mut self, id: StatusId, entry: StatusEntry) {
        if let Some(row) = self.rows.get_mut(id) {
            if row.state != entry.state || row.activity != entry.activity {
                *row = entry;
                row.dirty = true;
                self.dirty = true;
            }
        }
    }

    pub fn set_state(&mut self, id: StatusId, state: LinkState) {
        if let Some(row) = self.rows.get(id).copied() {
            self.update(id, StatusEntry { state, ..row });
        }
    }

    pub fn set_activity(&mut self, id: StatusId) {
        if let Some(row) = self.rows.get(id).copied() {
            if !row.activity {
                self.update(
                    id,
                    StatusEntry {
                        activity: true,
                        ..row
                    },
                );
            }
        }
    }

    /// Copy this table's rows into the observer's table and clear our
    /// dirty and activity bits. No-op unless something changed.
    pub fn flush_into(&mut self, dst: &mut StatusTable) {
        if !self.dirty {
            return;
        }
        for (id, row) in self.rows.iter_mut().enumerate() {
            dst.update(id, *row);
            row.dirty = false;
            row.activity = false;
        }
        self.dirty = false;
    }

    /// Clear dirty and activity on every row.
    pub fn reset(&mut self) {
        for row in &mut self.rows {
            row.activity = false;
            row.dirty = false;
        }
        self.dirty = false;
    }

    /// Transition every row back to Uninitialized (supervisor stop).
    pub fn deactivate(&mut self) {
        for id in 0..self.rows.len() {
            self.update(id, StatusEntry::default());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_monotonic() {
        let mut t = StatusTable::new();
        assert_eq!(t.register(), 0);
        assert_eq!(t.register(), 1);
        assert_eq!(t.register(), 2);
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn update_marks_dirty_only_on_change() {
        let mut t = StatusTable::new();
        let id = t.register();

        t.set_state(id, LinkState::Connecting);
        assert!(t.dirty());
        assert!(t.get(id).unwrap().dirty);

        t.reset();
        t.set_state(id, LinkState::Connecting);
        assert!(!t.dirty());
    }

    #[test]
    fn flush_copies_and_clears() {
        let mut producer = StatusTable::new();
        let mut observer = StatusTable::new();
        let id = producer.register();
        observer.register();

        producer.set_state(id, LinkState::Connected);
        producer.set_activity(id);
        producer.flush_into(&mut observer);

        let row = observer.get(id).unwrap();
        assert_eq!(row.state, LinkState::Connected);
        assert!(row.activity);
        assert!(row.dirty);

        // producer side cleared
        assert!(!producer.dirty());
        assert!(!producer.get(id).unwrap().activity);
        assert!(!producer.get(id).unwrap().dirty);
    }

    #[test]
    fn deactivate_resets_states() {
        let mut t = StatusTable::new();
        let id = t.register();
        t.set_state(id, LinkState::Connected);
        t.reset();

        t.deactivate();
        assert_eq!(t.get(id).unwrap().state, LinkState::Uninitialized);
        assert!(t.dirty());
    }
}
