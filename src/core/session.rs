use std::sync::Arc;

use thiserror::Error;

use crate::{model::State, patch::Patch};

use super::{
    reducer::{Action, GiftReducer, ReduceError},
    undo::{UndoEntry, UndoStack},
};

/// Session failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The reducer refused the action or patches.
    #[error(transparent)]
    Reduce(#[from] ReduceError),
    /// Undo with nothing in effect.
    #[error("nothing to undo")]
    NothingToUndo,
    /// Redo with an empty redo tail.
    #[error("nothing to redo")]
    NothingToRedo,
}

/// One client's view: its own state, undo stack, and the shared reducer.
///
/// Every local transition returns the forward patches that must be sent to
/// the relay. An empty list means nothing changed and nothing is sent.
#[derive(Debug, Clone)]
pub struct Session {
    reducer: Arc<GiftReducer>,
    state: State,
    undo: UndoStack,
}

impl Session {
    /// Starts a session at `state` with an empty undo stack.
    pub fn new(reducer: Arc<GiftReducer>, state: State) -> Self {
        Self {
            reducer,
            state,
            undo: UndoStack::new(),
        }
    }

    /// Current local state.
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Local undo history.
    pub fn undo_stack(&self) -> &UndoStack {
        &self.undo
    }

    /// Dispatches an undoable local action.
    pub fn dispatch(&mut self, action: Action) -> Result<Vec<Patch>, SessionError> {
        self.dispatch_with(action, true)
    }

    /// Dispatches a local action; `undoable = false` keeps it off the undo stack.
    ///
    /// A failed action leaves both state and undo stack untouched.
    pub fn dispatch_with(&mut self, action: Action, undoable: bool) -> Result<Vec<Patch>, SessionError> {
        let transition = self.reducer.apply(&self.state, action)?;
        if transition.is_noop() {
            return Ok(Vec::new());
        }

        if undoable {
            self.undo.record(UndoEntry {
                forward: transition.forward.clone(),
                inverse: transition.inverse,
            });
        }
        self.state = transition.state;
        Ok(transition.forward)
    }

    /// Applies a batch received from the relay. Never recorded for undo.
    pub fn receive(&mut self, patches: Vec<Patch>) -> Result<(), SessionError> {
        self.state = self
            .reducer
            .reduce(&self.state, Action::ApplyPatches { patches })?;
        Ok(())
    }

    /// Rebuilds state by replaying `patches` from the initial gift set.
    ///
    /// Local undo history refers to the replaced state, so it is dropped.
    pub fn bootstrap(&mut self, patches: Vec<Patch>) -> Result<(), SessionError> {
        let base = self.state.with_gifts(self.reducer.defaults().clone());
        self.state = self.reducer.reduce(&base, Action::ApplyPatches { patches })?;
        self.undo.clear();
        Ok(())
    }

    /// Reverts the entry under the pointer and returns the patches to broadcast.
    pub fn undo(&mut self) -> Result<Vec<Patch>, SessionError> {
        let patches = self
            .undo
            .next_undo()
            .ok_or(SessionError::NothingToUndo)?
            .inverse
            .clone();
        let outgoing = self.dispatch_with(Action::ApplyPatches { patches }, false)?;
        self.undo.step_back();
        Ok(outgoing)
    }

    /// Reapplies the entry above the pointer and returns the patches to broadcast.
    pub fn redo(&mut self) -> Result<Vec<Patch>, SessionError> {
        let patches = self
            .undo
            .next_redo()
            .ok_or(SessionError::NothingToRedo)?
            .forward
            .clone();
        let outgoing = self.dispatch_with(Action::ApplyPatches { patches }, false)?;
        self.undo.step_forward();
        Ok(outgoing)
    }

    /// See [`UndoStack::can_undo`].
    pub fn can_undo(&self) -> bool {
        self.undo.can_undo()
    }

    /// See [`UndoStack::can_redo`].
    pub fn can_redo(&self) -> bool {
        self.undo.can_redo()
    }
}
