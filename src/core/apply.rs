//! Patch applier: replays patch lists against a [`State`].
//!
//! Application is all-or-nothing per list. Each patch also yields the patch
//! that undoes it, so callers get an inverse list for free.

use std::{collections::BTreeMap, sync::Arc};

use serde_json::Value;
use thiserror::Error;

use crate::{
    model::{Gift, Gifts, State, User},
    patch::{Patch, PatchOp},
    types::UserId,
};

/// Reasons a patch list cannot be applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    /// An intermediate or final path segment does not resolve.
    #[error("path {0:?} does not resolve")]
    PathNotFound(Vec<String>),
    /// The path names a value the core never mutates.
    #[error("path {0:?} is read-only")]
    ReadOnlyPath(Vec<String>),
    /// The op is not meaningful at this path.
    #[error("{op:?} is not supported at {path:?}")]
    UnsupportedOp {
        /// Requested op.
        op: PatchOp,
        /// Target path.
        path: Vec<String>,
    },
    /// The payload does not decode to the shape expected at the path.
    #[error("invalid value at {path:?}: {reason}")]
    InvalidValue {
        /// Target path.
        path: Vec<String>,
        /// Decoder message.
        reason: String,
    },
    /// A reservation names a user outside the roster.
    #[error("user {user} at {path:?} is not in the roster")]
    UnknownUser {
        /// Target path.
        path: Vec<String>,
        /// Unknown user id.
        user: UserId,
    },
}

/// Applies `patches` in order and returns the resulting state.
pub fn apply_patches(state: &State, patches: &[Patch]) -> Result<State, PatchError> {
    apply_with_inverse(state, patches).map(|(next, _)| next)
}

/// Applies `patches` in order, returning the new state and the inverse list.
///
/// The inverse list is in reverse application order, so applying it to the
/// returned state yields `state` again. On error nothing is applied.
pub fn apply_with_inverse(
    state: &State,
    patches: &[Patch],
) -> Result<(State, Vec<Patch>), PatchError> {
    let mut gifts = state.gifts.clone();
    let mut inverse = Vec::with_capacity(patches.len());

    for patch in patches {
        inverse.push(apply_one(&state.users, &mut gifts, patch)?);
    }
    inverse.reverse();

    Ok((state.with_gifts(gifts), inverse))
}

fn apply_one(users: &[User], gifts: &mut Gifts, patch: &Patch) -> Result<Patch, PatchError> {
    let segments: Vec<&str> = patch.path.iter().map(String::as_str).collect();
    match segments.as_slice() {
        ["users", ..] | ["currentUser", ..] | ["gifts", _, "id"] => {
            Err(PatchError::ReadOnlyPath(patch.path.clone()))
        }
        ["gifts"] => apply_gift_map(users, gifts, patch),
        ["gifts", id] => apply_gift_entry(users, gifts, patch, id),
        ["gifts", id, field] => apply_gift_field(users, gifts, patch, id, field),
        _ => Err(PatchError::PathNotFound(patch.path.clone())),
    }
}

fn apply_gift_map(users: &[User], gifts: &mut Gifts, patch: &Patch) -> Result<Patch, PatchError> {
    if patch.op == PatchOp::Remove {
        return Err(unsupported(patch));
    }

    let records: BTreeMap<String, Gift> = decode(patch)?;
    let mut next = Gifts::new();
    for (key, gift) in records {
        if key != gift.id {
            return Err(invalid(patch, format!("key {key:?} holds gift {:?}", gift.id)));
        }
        check_reservation(users, patch, gift.reserved_by)?;
        next.insert(key, Arc::new(gift));
    }

    let inverse = Patch::replace(patch.path.clone(), Some(gifts_to_value(gifts)));
    *gifts = next;
    Ok(inverse)
}

fn apply_gift_entry(
    users: &[User],
    gifts: &mut Gifts,
    patch: &Patch,
    id: &str,
) -> Result<Patch, PatchError> {
    match patch.op {
        PatchOp::Remove => {
            let old = gifts
                .remove(id)
                .ok_or_else(|| PatchError::PathNotFound(patch.path.clone()))?;
            Ok(Patch::add(patch.path.clone(), gift_to_value(&old)))
        }
        PatchOp::Replace | PatchOp::Add => {
            if patch.op == PatchOp::Replace && !gifts.contains_key(id) {
                return Err(PatchError::PathNotFound(patch.path.clone()));
            }
            let gift: Gift = decode(patch)?;
            if gift.id != id {
                return Err(invalid(patch, format!("gift id {:?} does not match key", gift.id)));
            }
            check_reservation(users, patch, gift.reserved_by)?;

            let inverse = match gifts.insert(id.to_string(), Arc::new(gift)) {
                Some(old) => Patch::replace(patch.path.clone(), Some(gift_to_value(&old))),
                None => Patch::remove(patch.path.clone()),
            };
            Ok(inverse)
        }
    }
}

fn apply_gift_field(
    users: &[User],
    gifts: &mut Gifts,
    patch: &Patch,
    id: &str,
    field: &str,
) -> Result<Patch, PatchError> {
    let current = gifts
        .get(id)
        .ok_or_else(|| PatchError::PathNotFound(patch.path.clone()))?;
    let mut next = Gift::clone(current);

    let inverse = match field {
        "description" | "image" => {
            if patch.op == PatchOp::Remove {
                return Err(unsupported(patch));
            }
            let value: String = decode(patch)?;
            let slot = if field == "description" {
                &mut next.description
            } else {
                &mut next.image
            };
            let old = std::mem::replace(slot, value);
            Patch::replace(patch.path.clone(), Some(Value::String(old)))
        }
        "reservedBy" => {
            let value = match (patch.op, &patch.value) {
                (PatchOp::Remove, _) | (_, None) | (_, Some(Value::Null)) => None,
                (_, Some(_)) => Some(decode::<UserId>(patch)?),
            };
            check_reservation(users, patch, value)?;
            let old = std::mem::replace(&mut next.reserved_by, value);
            Patch::replace(patch.path.clone(), old.map(Value::from))
        }
        _ => return Err(PatchError::PathNotFound(patch.path.clone())),
    };

    gifts.insert(id.to_string(), Arc::new(next));
    Ok(inverse)
}

fn check_reservation(users: &[User], patch: &Patch, user: Option<UserId>) -> Result<(), PatchError> {
    match user {
        Some(user) if !users.iter().any(|u| u.id == user) => Err(PatchError::UnknownUser {
            path: patch.path.clone(),
            user,
        }),
        _ => Ok(()),
    }
}

fn decode<T: serde::de::DeserializeOwned>(patch: &Patch) -> Result<T, PatchError> {
    let value = patch
        .value
        .clone()
        .ok_or_else(|| invalid(patch, "missing value".to_string()))?;
    serde_json::from_value(value).map_err(|e| invalid(patch, e.to_string()))
}

fn invalid(patch: &Patch, reason: String) -> PatchError {
    PatchError::InvalidValue {
        path: patch.path.clone(),
        reason,
    }
}

fn unsupported(patch: &Patch) -> PatchError {
    PatchError::UnsupportedOp {
        op: patch.op,
        path: patch.path.clone(),
    }
}

/// Encodes one gift as a patch payload.
pub(crate) fn gift_to_value(gift: &Gift) -> Value {
    let mut obj = serde_json::Map::new();
    obj.insert("id".to_string(), Value::String(gift.id.clone()));
    obj.insert("description".to_string(), Value::String(gift.description.clone()));
    obj.insert("image".to_string(), Value::String(gift.image.clone()));
    if let Some(user) = gift.reserved_by {
        obj.insert("reservedBy".to_string(), Value::from(user));
    }
    Value::Object(obj)
}

/// Encodes a whole gift map as a patch payload keyed by gift id.
pub(crate) fn gifts_to_value(gifts: &Gifts) -> Value {
    Value::Object(
        gifts
            .iter()
            .map(|(id, gift)| (id.clone(), gift_to_value(gift)))
            .collect(),
    )
}
