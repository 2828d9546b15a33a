//! Minimal patch list between two states sharing a roster.

use std::sync::Arc;

use serde_json::Value;

use crate::{
    model::{Gift, Gifts, State},
    patch::{path, Patch},
};

use super::apply::gift_to_value;

/// Patches that turn `from` into `to`.
pub fn diff_states(from: &State, to: &State) -> Vec<Patch> {
    diff_gifts(&from.gifts, &to.gifts)
}

/// Patches that turn gift map `from` into `to`.
///
/// Unchanged entries produce nothing. A gift with a single changed field gets
/// a field-level `replace`; anything larger replaces the whole entry.
pub fn diff_gifts(from: &Gifts, to: &Gifts) -> Vec<Patch> {
    if from.ptr_eq(to) {
        return Vec::new();
    }

    let mut out = Vec::new();
    for (id, old) in from.iter() {
        match to.get(id) {
            None => out.push(Patch::remove(path(["gifts", id.as_str()]))),
            Some(new) if Arc::ptr_eq(old, new) || old == new => {}
            Some(new) => out.push(diff_gift(old, new)),
        }
    }
    for (id, new) in to.iter() {
        if !from.contains_key(id) {
            out.push(Patch::add(path(["gifts", id.as_str()]), gift_to_value(new)));
        }
    }
    out
}

fn diff_gift(old: &Gift, new: &Gift) -> Patch {
    let mut changed = Vec::with_capacity(3);
    if old.description != new.description {
        changed.push(("description", Some(Value::String(new.description.clone()))));
    }
    if old.image != new.image {
        changed.push(("image", Some(Value::String(new.image.clone()))));
    }
    if old.reserved_by != new.reserved_by {
        changed.push(("reservedBy", new.reserved_by.map(Value::from)));
    }

    match changed.as_slice() {
        [(field, value)] => Patch::replace(path(["gifts", new.id.as_str(), *field]), value.clone()),
        _ => Patch::replace(path(["gifts", new.id.as_str()]), Some(gift_to_value(new))),
    }
}
