//! Gift-list domain records and the persistent shared state.

use std::sync::Arc;

use im::OrdMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::SeedData,
    types::{GiftId, UserId},
};

/// Roster entry. Loaded once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable user identifier.
    pub id: UserId,
    /// Display name.
    pub name: String,
}

/// One entry of the shared gift list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gift {
    /// Unique key, equal to the gift's key in [`Gifts`].
    pub id: GiftId,
    /// Human readable description.
    pub description: String,
    /// Image URI.
    pub image: String,
    /// User holding the reservation, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved_by: Option<UserId>,
}

impl Gift {
    /// Builds an unreserved gift.
    pub fn new(
        id: impl Into<GiftId>,
        description: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            image: image.into(),
            reserved_by: None,
        }
    }
}

/// Persistent gift map. Cloning is O(1) and unchanged entries keep their `Arc`.
pub type Gifts = OrdMap<GiftId, Arc<Gift>>;

/// Errors raised while assembling a [`State`] from roster and seed data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// The roster has no users.
    #[error("user roster is empty")]
    EmptyRoster,
    /// The configured current user is not in the roster.
    #[error("current user {0} is not in the roster")]
    UnknownCurrentUser(UserId),
    /// Two seed gifts share an id.
    #[error("duplicate gift id {0:?}")]
    DuplicateGiftId(GiftId),
    /// A seed gift is reserved by a user outside the roster.
    #[error("gift {gift:?} is reserved by unknown user {user}")]
    UnknownReservingUser {
        /// Offending gift.
        gift: GiftId,
        /// Unknown user id.
        user: UserId,
    },
}

/// Immutable snapshot of the shared collection.
///
/// Every transition produces a new value; earlier values stay valid. Fields are
/// only reachable through accessors so the reducer remains the sole way to
/// derive a new state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    pub(crate) users: Arc<[User]>,
    pub(crate) current_user: User,
    pub(crate) gifts: Gifts,
}

impl State {
    /// Assembles a state, checking the roster and reservation invariants.
    pub fn new(
        users: impl Into<Arc<[User]>>,
        current_user: UserId,
        gifts: Gifts,
    ) -> Result<Self, ModelError> {
        let users: Arc<[User]> = users.into();
        let current_user = users
            .iter()
            .find(|u| u.id == current_user)
            .cloned()
            .ok_or(ModelError::UnknownCurrentUser(current_user))?;

        for gift in gifts.values() {
            if let Some(user) = gift.reserved_by {
                if !users.iter().any(|u| u.id == user) {
                    return Err(ModelError::UnknownReservingUser {
                        gift: gift.id.clone(),
                        user,
                    });
                }
            }
        }

        Ok(Self {
            users,
            current_user,
            gifts,
        })
    }

    /// Builds the default state from seed data as seen by `current_user`.
    pub fn initial(seed: &SeedData, current_user: UserId) -> Result<Self, ModelError> {
        if seed.users.is_empty() {
            return Err(ModelError::EmptyRoster);
        }
        let gifts = gifts_from_records(seed.gifts.iter().cloned())?;
        Self::new(seed.users.clone(), current_user, gifts)
    }

    /// Roster in load order.
    pub fn users(&self) -> &[User] {
        &self.users
    }

    /// User on whose behalf local actions run.
    pub fn current_user(&self) -> &User {
        &self.current_user
    }

    /// All gifts keyed by id.
    pub fn gifts(&self) -> &Gifts {
        &self.gifts
    }

    /// Looks up one gift.
    pub fn gift(&self, id: &str) -> Option<&Arc<Gift>> {
        self.gifts.get(id)
    }

    /// Returns true when `id` is a roster member.
    pub fn has_user(&self, id: UserId) -> bool {
        self.users.iter().any(|u| u.id == id)
    }

    /// True when both states share the same roster and gift map in memory.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.users, &other.users)
            && self.gifts.ptr_eq(&other.gifts)
            && self.current_user == other.current_user
    }

    /// Derives a sibling state sharing this roster, with a new gift map.
    pub(crate) fn with_gifts(&self, gifts: Gifts) -> Self {
        Self {
            users: Arc::clone(&self.users),
            current_user: self.current_user.clone(),
            gifts,
        }
    }

    /// Returns a copy of this state seen from another roster member.
    pub fn with_current_user(&self, id: UserId) -> Result<Self, ModelError> {
        let current_user = self
            .users
            .iter()
            .find(|u| u.id == id)
            .cloned()
            .ok_or(ModelError::UnknownCurrentUser(id))?;
        Ok(Self {
            users: Arc::clone(&self.users),
            current_user,
            gifts: self.gifts.clone(),
        })
    }
}

/// Builds a gift map from flat seed records, rejecting duplicate ids.
pub fn gifts_from_records(records: impl IntoIterator<Item = Gift>) -> Result<Gifts, ModelError> {
    let mut gifts = Gifts::new();
    for gift in records {
        if gifts.contains_key(&gift.id) {
            return Err(ModelError::DuplicateGiftId(gift.id));
        }
        gifts.insert(gift.id.clone(), Arc::new(gift));
    }
    Ok(gifts)
}
