//! Durable notification store tests.
//!
//! Covers:
//! - user directory lookups for the connection gate
//! - notification creation, listing order, unread accounting
//! - read-marking scoped to the owning user
//! - metadata round-trips through the JSON column

use reel_server::db::{Db, NewNotification};

fn make_db() -> Db {
    Db::open_memory().unwrap()
}

fn friend_request<'a>(user: &'a str, from: &'a str) -> NewNotification<'a> {
    NewNotification {
        user_id: user,
        from_user_id: Some(from),
        kind: "friend_request",
        message: "wants to be friends",
        metadata: &serde_json::Value::Null,
    }
}

#[test]
fn user_directory_roundtrip() {
    let db = make_db();
    db.insert_user("u-1", "hana").unwrap();

    let user = db.get_user("u-1").unwrap().unwrap();
    assert_eq!(user.username, "hana");
    assert!(db.get_user("u-404").unwrap().is_none());
}

#[test]
fn insert_user_updates_username_on_conflict() {
    let db = make_db();
    db.insert_user("u-1", "hana").unwrap();
    db.insert_user("u-1", "hana-renamed").unwrap();
    assert_eq!(db.get_user("u-1").unwrap().unwrap().username, "hana-renamed");
}

#[test]
fn notification_starts_unread() {
    let db = make_db();
    let row = db.create_notification(&friend_request("u-1", "u-2")).unwrap();
    assert!(!row.is_read);
    assert_eq!(row.user_id, "u-1");
    assert_eq!(row.from_user_id.as_deref(), Some("u-2"));
    assert_eq!(db.unread_count("u-1").unwrap(), 1);
}

#[test]
fn metadata_roundtrips() {
    let db = make_db();
    let metadata = serde_json::json!({"movie_id": 603, "review_id": 42});
    db.create_notification(&NewNotification {
        user_id: "u-1",
        from_user_id: Some("u-2"),
        kind: "review_liked",
        message: "liked your review",
        metadata: &metadata,
    })
    .unwrap();

    let listed = db.list_notifications("u-1", 10).unwrap();
    assert_eq!(listed[0].metadata["movie_id"], 603);
    assert_eq!(listed[0].metadata["review_id"], 42);
}

#[test]
fn list_is_newest_first_and_limited() {
    let db = make_db();
    for i in 0..5 {
        db.create_notification(&NewNotification {
            user_id: "u-1",
            from_user_id: None,
            kind: "system",
            message: &format!("n-{i}"),
            metadata: &serde_json::Value::Null,
        })
        .unwrap();
    }

    let listed = db.list_notifications("u-1", 3).unwrap();
    assert_eq!(listed.len(), 3);
    // Same-second inserts fall back to id ordering.
    assert_eq!(listed[0].message, "n-4");
    assert_eq!(listed[2].message, "n-2");
}

#[test]
fn lists_are_isolated_per_user() {
    let db = make_db();
    db.create_notification(&friend_request("u-1", "u-2")).unwrap();
    db.create_notification(&friend_request("u-3", "u-2")).unwrap();

    assert_eq!(db.list_notifications("u-1", 10).unwrap().len(), 1);
    assert_eq!(db.list_notifications("u-3", 10).unwrap().len(), 1);
    assert!(db.list_notifications("u-2", 10).unwrap().is_empty());
}

#[test]
fn mark_read_scoped_to_owner() {
    let db = make_db();
    let row = db.create_notification(&friend_request("u-1", "u-2")).unwrap();

    assert!(
        !db.mark_notification_read("u-2", row.id).unwrap(),
        "someone else's notification must not be markable"
    );
    assert_eq!(db.unread_count("u-1").unwrap(), 1);

    assert!(db.mark_notification_read("u-1", row.id).unwrap());
    assert_eq!(db.unread_count("u-1").unwrap(), 0);

    assert!(!db.mark_notification_read("u-1", 9999).unwrap());
}

#[test]
fn unread_count_tracks_mixed_state() {
    let db = make_db();
    let first = db.create_notification(&friend_request("u-1", "u-2")).unwrap();
    db.create_notification(&friend_request("u-1", "u-3")).unwrap();
    assert_eq!(db.unread_count("u-1").unwrap(), 2);

    db.mark_notification_read("u-1", first.id).unwrap();
    assert_eq!(db.unread_count("u-1").unwrap(), 1);
}
