//! Pure reducer turning [`Action`]s into a new [`State`] plus forward and
//! inverse patches.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::{
    books::Book,
    config::SeedData,
    model::{gifts_from_records, Gift, Gifts, ModelError, State, User},
    patch::{path, Patch},
    types::{GiftId, UserId},
};

use super::apply::{apply_with_inverse, gift_to_value, gifts_to_value, PatchError};

/// The only sanctioned ways to derive a new [`State`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Insert an unreserved gift. A duplicate id is a no-op.
    AddGift {
        /// Caller-supplied unique id.
        id: GiftId,
        /// Description.
        description: String,
        /// Image URI.
        image: String,
    },
    /// Reserve for, or release from, the current user.
    ToggleReservation {
        /// Target gift.
        id: GiftId,
    },
    /// Insert a gift derived from already-resolved book metadata.
    AddBook {
        /// Resolved book.
        book: Book,
    },
    /// Reinstall the default gift set.
    Reset,
    /// Replay patches received from a peer or from the undo stack.
    ApplyPatches {
        /// Patches to apply, all-or-nothing.
        patches: Vec<Patch>,
    },
}

/// Reducer failure; only patch replay can fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReduceError {
    /// Patches did not apply.
    #[error(transparent)]
    Patch(#[from] PatchError),
}

/// Result of one reducer step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// State after the action.
    pub state: State,
    /// Patches turning the input state into `state`.
    pub forward: Vec<Patch>,
    /// Patches turning `state` back into the input state.
    pub inverse: Vec<Patch>,
}

impl Transition {
    fn unchanged(state: &State) -> Self {
        Self {
            state: state.clone(),
            forward: Vec::new(),
            inverse: Vec::new(),
        }
    }

    /// True when the action changed nothing.
    pub fn is_noop(&self) -> bool {
        self.forward.is_empty()
    }
}

/// Pure reducer over [`State`], holding the roster and the default gift set.
#[derive(Debug, Clone)]
pub struct GiftReducer {
    users: Arc<[User]>,
    defaults: Gifts,
}

impl GiftReducer {
    /// Builds a reducer over `users`, rejecting an empty roster or defaults
    /// reserved by unknown users.
    pub fn new(users: Vec<User>, defaults: Gifts) -> Result<Self, ModelError> {
        let users: Arc<[User]> = users.into();
        let first = users.first().map(|u| u.id).ok_or(ModelError::EmptyRoster)?;
        // Validates reservations in the defaults against the roster.
        State::new(Arc::clone(&users), first, defaults.clone())?;
        Ok(Self { users, defaults })
    }

    /// Builds a reducer from loaded seed data.
    pub fn from_seed(seed: &SeedData) -> Result<Self, ModelError> {
        Self::new(seed.users.clone(), gifts_from_records(seed.gifts.iter().cloned())?)
    }

    /// Fixed roster.
    pub fn users(&self) -> &[User] {
        &self.users
    }

    /// Gift set installed by `Reset`.
    pub fn defaults(&self) -> &Gifts {
        &self.defaults
    }

    /// Initial state as seen by `current_user`.
    pub fn initial_state(&self, current_user: UserId) -> Result<State, ModelError> {
        State::new(Arc::clone(&self.users), current_user, self.defaults.clone())
    }

    /// Default state seen by the first roster member.
    ///
    /// The relay replays and compacts history against this; patches never
    /// touch the current user, so the choice of viewer is immaterial.
    pub fn relay_state(&self) -> State {
        State {
            users: Arc::clone(&self.users),
            current_user: self.users[0].clone(),
            gifts: self.defaults.clone(),
        }
    }

    /// Computes the next state plus forward and inverse patches.
    ///
    /// `state` is never modified. No-op actions return a state that is
    /// pointer-identical to the input and empty patch lists.
    pub fn apply(&self, state: &State, action: Action) -> Result<Transition, ReduceError> {
        match action {
            Action::AddGift {
                id,
                description,
                image,
            } => Ok(self.add_gift(state, Gift::new(id, description, image))),
            Action::ToggleReservation { id } => Ok(self.toggle_reservation(state, &id)),
            Action::AddBook { book } => Ok(match book.to_gift() {
                Some(gift) => self.add_gift(state, gift),
                None => Transition::unchanged(state),
            }),
            Action::Reset => Ok(self.reset(state)),
            Action::ApplyPatches { patches } => {
                if patches.is_empty() {
                    return Ok(Transition::unchanged(state));
                }
                let (next, inverse) = apply_with_inverse(state, &patches)?;
                Ok(Transition {
                    state: next,
                    forward: patches,
                    inverse,
                })
            }
        }
    }

    /// Like [`GiftReducer::apply`] but discards the patches.
    pub fn reduce(&self, state: &State, action: Action) -> Result<State, ReduceError> {
        self.apply(state, action).map(|t| t.state)
    }

    fn add_gift(&self, state: &State, gift: Gift) -> Transition {
        if state.gifts.contains_key(&gift.id) {
            return Transition::unchanged(state);
        }

        let gift_path = path(["gifts", gift.id.as_str()]);
        let forward = vec![Patch::add(gift_path.clone(), gift_to_value(&gift))];
        let inverse = vec![Patch::remove(gift_path)];
        let gifts = state.gifts.update(gift.id.clone(), Arc::new(gift));

        Transition {
            state: state.with_gifts(gifts),
            forward,
            inverse,
        }
    }

    fn toggle_reservation(&self, state: &State, id: &str) -> Transition {
        let Some(gift) = state.gifts.get(id) else {
            return Transition::unchanged(state);
        };

        let me = state.current_user.id;
        let next_holder = match gift.reserved_by {
            None => Some(me),
            Some(holder) if holder == me => None,
            // Another user's reservation stands.
            Some(_) => return Transition::unchanged(state),
        };

        let field = path(["gifts", id, "reservedBy"]);
        let forward = vec![Patch::replace(field.clone(), next_holder.map(Value::from))];
        let inverse = vec![Patch::replace(field, gift.reserved_by.map(Value::from))];

        let updated = Gift {
            reserved_by: next_holder,
            ..Gift::clone(gift)
        };
        let gifts = state.gifts.update(id.to_string(), Arc::new(updated));

        Transition {
            state: state.with_gifts(gifts),
            forward,
            inverse,
        }
    }

    fn reset(&self, state: &State) -> Transition {
        if state.gifts.ptr_eq(&self.defaults) || state.gifts == self.defaults {
            return Transition::unchanged(state);
        }

        let forward = vec![Patch::replace(path(["gifts"]), Some(gifts_to_value(&self.defaults)))];
        let inverse = vec![Patch::replace(path(["gifts"]), Some(gifts_to_value(&state.gifts)))];

        Transition {
            state: state.with_gifts(self.defaults.clone()),
            forward,
            inverse,
        }
    }
}
