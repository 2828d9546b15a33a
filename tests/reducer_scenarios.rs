use std::sync::Arc;

use serde_json::json;

use giftlog::{
    books::{Book, Cover, Identifiers},
    config::SeedData,
    core::{
        apply::{apply_patches, PatchError},
        reducer::{Action, GiftReducer, ReduceError},
    },
    model::{gifts_from_records, Gift, State, User},
    patch::{path, Patch, PatchOp},
};

fn roster() -> Vec<User> {
    ["Michel", "Jane", "Klaus", "Sarah"]
        .iter()
        .enumerate()
        .map(|(id, name)| User {
            id: id as u32,
            name: name.to_string(),
        })
        .collect()
}

fn defaults() -> Vec<Gift> {
    vec![
        Gift {
            reserved_by: Some(2),
            ..Gift::new("immer_license", "Immer license", "immer.png")
        },
        Gift::new("egghead_subscription", "Egghead.io subscription", "egghead.jpg"),
        Gift::new("coffee_mug", "Coffee mug", "mug.jpg"),
    ]
}

fn reducer() -> GiftReducer {
    GiftReducer::new(roster(), gifts_from_records(defaults()).expect("gifts")).expect("reducer")
}

fn initial(reducer: &GiftReducer) -> State {
    reducer.initial_state(1).expect("state")
}

#[test]
fn toggle_reserves_for_current_user() {
    let reducer = reducer();
    let state = initial(&reducer);

    let t = reducer
        .apply(
            &state,
            Action::ToggleReservation {
                id: "egghead_subscription".to_string(),
            },
        )
        .expect("toggle");

    assert_eq!(t.state.gift("egghead_subscription").and_then(|g| g.reserved_by), Some(1));
    assert_eq!(
        t.forward,
        vec![Patch::replace(
            path(["gifts", "egghead_subscription", "reservedBy"]),
            Some(json!(1)),
        )]
    );
    assert_eq!(
        serde_json::to_value(&t.forward[0]).expect("encode"),
        json!({"op": "replace", "path": ["gifts", "egghead_subscription", "reservedBy"], "value": 1})
    );
    assert_eq!(
        t.inverse,
        vec![Patch::replace(path(["gifts", "egghead_subscription", "reservedBy"]), None)]
    );
    // Input state is untouched.
    assert_eq!(state.gift("egghead_subscription").and_then(|g| g.reserved_by), None);
}

#[test]
fn toggle_on_foreign_reservation_is_noop() {
    let reducer = reducer();
    let state = initial(&reducer);

    let t = reducer
        .apply(
            &state,
            Action::ToggleReservation {
                id: "immer_license".to_string(),
            },
        )
        .expect("toggle");

    assert!(t.is_noop());
    assert!(t.inverse.is_empty());
    assert!(t.state.ptr_eq(&state));
    assert_eq!(t.state.gift("immer_license").and_then(|g| g.reserved_by), Some(2));
}

#[test]
fn toggle_twice_releases() {
    let reducer = reducer();
    let state = initial(&reducer);
    let toggle = || Action::ToggleReservation {
        id: "coffee_mug".to_string(),
    };

    let once = reducer.reduce(&state, toggle()).expect("once");
    let twice = reducer.reduce(&once, toggle()).expect("twice");

    assert_eq!(once.gift("coffee_mug").and_then(|g| g.reserved_by), Some(1));
    assert_eq!(twice, state);
}

#[test]
fn toggle_unknown_gift_is_noop() {
    let reducer = reducer();
    let state = initial(&reducer);

    let t = reducer
        .apply(
            &state,
            Action::ToggleReservation {
                id: "missing".to_string(),
            },
        )
        .expect("toggle");
    assert!(t.is_noop());
    assert!(t.state.ptr_eq(&state));
}

#[test]
fn add_gift_inserts_unreserved_and_shares_untouched_entries() {
    let reducer = reducer();
    let state = initial(&reducer);

    let t = reducer
        .apply(
            &state,
            Action::AddGift {
                id: "socks".to_string(),
                description: "Warm socks".to_string(),
                image: "socks.png".to_string(),
            },
        )
        .expect("add");

    let socks = t.state.gift("socks").expect("socks");
    assert_eq!(socks.reserved_by, None);
    assert_eq!(socks.description, "Warm socks");
    assert_eq!(t.state.gifts().len(), 4);
    assert_eq!(state.gifts().len(), 3);

    assert_eq!(t.forward.len(), 1);
    assert_eq!(t.forward[0].op, PatchOp::Add);
    assert_eq!(t.forward[0].path, path(["gifts", "socks"]));
    assert_eq!(t.inverse, vec![Patch::remove(path(["gifts", "socks"]))]);

    for id in ["immer_license", "egghead_subscription", "coffee_mug"] {
        let before = state.gift(id).expect("before");
        let after = t.state.gift(id).expect("after");
        assert!(Arc::ptr_eq(before, after), "{id} should be shared");
    }
    assert!(std::ptr::eq(state.users().as_ptr(), t.state.users().as_ptr()));
}

#[test]
fn add_gift_with_duplicate_id_is_noop() {
    let reducer = reducer();
    let state = initial(&reducer);

    let t = reducer
        .apply(
            &state,
            Action::AddGift {
                id: "coffee_mug".to_string(),
                description: "Another mug".to_string(),
                image: "mug2.jpg".to_string(),
            },
        )
        .expect("add");

    assert!(t.is_noop());
    assert!(t.state.ptr_eq(&state));
    assert_eq!(t.state.gift("coffee_mug").expect("mug").description, "Coffee mug");
}

#[test]
fn toggle_preserves_other_gifts_by_pointer() {
    let reducer = reducer();
    let state = initial(&reducer);

    let next = reducer
        .reduce(
            &state,
            Action::ToggleReservation {
                id: "coffee_mug".to_string(),
            },
        )
        .expect("toggle");

    assert!(!Arc::ptr_eq(
        state.gift("coffee_mug").expect("before"),
        next.gift("coffee_mug").expect("after")
    ));
    assert!(Arc::ptr_eq(
        state.gift("immer_license").expect("before"),
        next.gift("immer_license").expect("after")
    ));
    assert!(Arc::ptr_eq(
        state.gift("egghead_subscription").expect("before"),
        next.gift("egghead_subscription").expect("after")
    ));
}

#[test]
fn reset_reinstalls_defaults_and_inverts() {
    let reducer = reducer();
    let state = initial(&reducer);

    let changed = reducer
        .reduce(
            &state,
            Action::AddGift {
                id: "socks".to_string(),
                description: "Warm socks".to_string(),
                image: "socks.png".to_string(),
            },
        )
        .expect("add");
    let changed = reducer
        .reduce(
            &changed,
            Action::ToggleReservation {
                id: "coffee_mug".to_string(),
            },
        )
        .expect("toggle");

    let t = reducer.apply(&changed, Action::Reset).expect("reset");
    assert_eq!(t.state.gifts(), reducer.defaults());
    assert_eq!(t.forward.len(), 1);
    assert_eq!(t.forward[0].path, path(["gifts"]));

    let restored = apply_patches(&t.state, &t.inverse).expect("inverse");
    assert_eq!(restored, changed);

    // Already at defaults.
    let again = reducer.apply(&t.state, Action::Reset).expect("reset again");
    assert!(again.is_noop());
}

#[test]
fn add_book_uses_primary_isbn() {
    let reducer = reducer();
    let state = initial(&reducer);
    let book = Book {
        title: "Fun with immutability".to_string(),
        cover: Cover {
            medium: "cover.jpg".to_string(),
        },
        identifiers: Identifiers {
            isbn_10: vec!["0201558025".to_string(), "0000000000".to_string()],
        },
    };

    let next = reducer
        .reduce(&state, Action::AddBook { book: book.clone() })
        .expect("add book");
    let gift = next.gift("0201558025").expect("book gift");
    assert_eq!(gift.description, "Fun with immutability");
    assert_eq!(gift.image, "cover.jpg");
    assert_eq!(gift.reserved_by, None);

    let none = Book {
        identifiers: Identifiers::default(),
        ..book
    };
    let t = reducer.apply(&state, Action::AddBook { book: none }).expect("no isbn");
    assert!(t.is_noop());
}

#[test]
fn apply_patches_returns_inverse_in_reverse_order() {
    let reducer = reducer();
    let state = initial(&reducer);
    let patches = vec![
        Patch::add(
            path(["gifts", "socks"]),
            json!({"id": "socks", "description": "Socks", "image": "s.png"}),
        ),
        Patch::replace(path(["gifts", "socks", "reservedBy"]), Some(json!(3))),
    ];

    let t = reducer
        .apply(&state, Action::ApplyPatches { patches: patches.clone() })
        .expect("apply");
    assert_eq!(t.forward, patches);
    assert_eq!(t.state.gift("socks").and_then(|g| g.reserved_by), Some(3));
    assert_eq!(
        t.inverse,
        vec![
            Patch::replace(path(["gifts", "socks", "reservedBy"]), None),
            Patch::remove(path(["gifts", "socks"])),
        ]
    );
    assert_eq!(apply_patches(&t.state, &t.inverse).expect("undo"), state);
}

#[test]
fn apply_patches_is_all_or_nothing() {
    let reducer = reducer();
    let state = initial(&reducer);
    let patches = vec![
        Patch::replace(path(["gifts", "coffee_mug", "reservedBy"]), Some(json!(1))),
        Patch::replace(path(["gifts", "nope", "reservedBy"]), Some(json!(1))),
    ];

    let err = reducer
        .apply(&state, Action::ApplyPatches { patches })
        .expect_err("missing gift");
    assert_eq!(
        err,
        ReduceError::Patch(PatchError::PathNotFound(path(["gifts", "nope", "reservedBy"])))
    );
    assert_eq!(state.gift("coffee_mug").and_then(|g| g.reserved_by), None);
}

#[test]
fn applier_rejects_bad_paths_and_values() {
    let reducer = reducer();
    let state = initial(&reducer);

    let cases = [
        (
            Patch::replace(path(["users"]), Some(json!([]))),
            "read-only",
        ),
        (
            Patch::replace(path(["currentUser", "id"]), Some(json!(3))),
            "read-only",
        ),
        (
            Patch::replace(path(["gifts", "coffee_mug", "id"]), Some(json!("x"))),
            "read-only",
        ),
        (
            Patch::replace(path(["gifts", "coffee_mug", "price"]), Some(json!(3))),
            "not found",
        ),
        (
            Patch::replace(path(["gifts", "coffee_mug", "reservedBy"]), Some(json!("jane"))),
            "invalid",
        ),
        (
            Patch::replace(path(["gifts", "coffee_mug", "reservedBy"]), Some(json!(42))),
            "unknown user",
        ),
        (Patch::remove(path(["gifts"])), "unsupported"),
    ];

    for (patch, kind) in cases {
        let err = apply_patches(&state, std::slice::from_ref(&patch)).expect_err(kind);
        let ok = match kind {
            "read-only" => matches!(err, PatchError::ReadOnlyPath(_)),
            "not found" => matches!(err, PatchError::PathNotFound(_)),
            "invalid" => matches!(err, PatchError::InvalidValue { .. }),
            "unknown user" => matches!(err, PatchError::UnknownUser { user: 42, .. }),
            _ => matches!(err, PatchError::UnsupportedOp { .. }),
        };
        assert!(ok, "{patch:?} produced {err:?}");
    }
}

#[test]
fn release_accepts_remove_and_null() {
    let reducer = reducer();
    let state = initial(&reducer);
    let field = path(["gifts", "immer_license", "reservedBy"]);

    for patch in [
        Patch::remove(field.clone()),
        Patch::replace(field.clone(), None),
        Patch::replace(field.clone(), Some(serde_json::Value::Null)),
    ] {
        let next = apply_patches(&state, &[patch]).expect("release");
        assert_eq!(next.gift("immer_license").and_then(|g| g.reserved_by), None);
    }
}

#[test]
fn builtin_seed_builds_reducer() {
    let seed = SeedData::builtin().expect("seed");
    let reducer = GiftReducer::from_seed(&seed).expect("reducer");
    assert_eq!(reducer.users().len(), 4);
    assert_eq!(reducer.defaults().len(), 3);
    assert_eq!(reducer.relay_state().current_user().id, 0);

    let jane = reducer.initial_state(1).expect("jane");
    assert_eq!(jane.current_user().name, "Jane");
    assert!(reducer.initial_state(99).is_err());

    let direct = State::initial(&seed, 1).expect("initial");
    assert_eq!(direct, jane);
    assert_eq!(
        State::initial(&seed, 42),
        Err(giftlog::model::ModelError::UnknownCurrentUser(42))
    );
}
