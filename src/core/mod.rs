//! Pure, synchronous state machinery: reducer, patch applier, diff, undo.

/// Patch applier with inverse capture.
pub mod apply;
/// Minimal patch derivation between two states.
pub mod diff;
/// Actions, transitions and the gift reducer.
pub mod reducer;
/// Client-side session combining state, reducer and undo stack.
pub mod session;
/// Linear undo/redo stack.
pub mod undo;
