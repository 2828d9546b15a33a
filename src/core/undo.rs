use crate::patch::Patch;

/// Forward and inverse patches of one undoable local action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoEntry {
    /// Patches that redo the action.
    pub forward: Vec<Patch>,
    /// Patches that undo the action.
    pub inverse: Vec<Patch>,
}

/// Linear undo history with a movable pointer.
///
/// `applied` counts entries currently in effect; the entry under the pointer
/// is `entries[applied - 1]`. Recording after an undo discards the redo tail.
#[derive(Debug, Clone, Default)]
pub struct UndoStack {
    entries: Vec<UndoEntry>,
    applied: usize,
}

impl UndoStack {
    /// Empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Truncates to the pointer, appends `entry` and moves the pointer onto it.
    pub fn record(&mut self, entry: UndoEntry) {
        self.entries.truncate(self.applied);
        self.entries.push(entry);
        self.applied = self.entries.len();
    }

    /// Entry the next undo would revert.
    pub fn next_undo(&self) -> Option<&UndoEntry> {
        self.applied.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    /// Entry the next redo would reapply.
    pub fn next_redo(&self) -> Option<&UndoEntry> {
        self.entries.get(self.applied)
    }

    /// Moves the pointer down after a successful undo.
    pub fn step_back(&mut self) {
        self.applied = self.applied.saturating_sub(1);
    }

    /// Moves the pointer up after a successful redo.
    pub fn step_forward(&mut self) {
        self.applied = (self.applied + 1).min(self.entries.len());
    }

    /// True when an entry is in effect.
    pub fn can_undo(&self) -> bool {
        self.applied > 0
    }

    /// True when an undone entry sits above the pointer.
    pub fn can_redo(&self) -> bool {
        self.applied < self.entries.len()
    }

    /// Index of the entry under the pointer, `None` when everything is undone.
    pub fn pointer(&self) -> Option<usize> {
        self.applied.checked_sub(1)
    }

    /// Entries recorded, including the redo tail.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.applied = 0;
    }
}
