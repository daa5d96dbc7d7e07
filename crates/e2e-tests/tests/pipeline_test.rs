//! Notice-to-query E2E tests.
//!
//! Feeds domain notices through the functors and checks that queries see
//! the derived attributes, before and after compaction and reopening.

use pretty_assertions::assert_eq;

use e2e_tests::{create_test_notices, post_all, posted, TestHarness};
use inf_types::{Bout, Message, Notice};

fn lunch() -> Bout {
    Bout::new(1, "lunch").with_participants(["alice", "bob"])
}

fn books() -> Bout {
    Bout::new(2, "books").with_participants(["carol"])
}

/// Messages 1, 2, 4 in "lunch" and 3 in "books".
fn seeded() -> TestHarness {
    let harness = TestHarness::new();
    harness.see(&posted(1, &lunch(), "alice", "where?"));
    harness.see(&posted(2, &lunch(), "bob", "downstairs"));
    harness.see(&posted(3, &books(), "carol", "finished it"));
    harness.see(&posted(4, &lunch(), "alice", "ok"));
    harness
}

#[test]
fn test_derived_attributes_are_queryable() {
    let harness = seeded();

    assert_eq!(harness.find("(equal $author.name 'alice')"), vec![4, 1]);
    assert_eq!(harness.find("(equal $bout.number 1)"), vec![4, 2, 1]);
    assert_eq!(harness.find("(equal $bout.title 'books')"), vec![3]);
    assert_eq!(harness.find("(equal $text 'downstairs')"), vec![2]);
    assert_eq!(harness.find("(talks-with 'bob')"), vec![4, 2, 1]);
    assert_eq!(harness.find("(talks-with 'carol')"), vec![3]);
    assert_eq!(harness.find("(equal $author.name 'nobody')"), Vec::<u64>::new());
}

#[test]
fn test_query_algebra() {
    let harness = seeded();

    assert_eq!(
        harness.find("(and (talks-with 'alice') (not (equal $author.name 'alice')))"),
        vec![2]
    );
    assert_eq!(
        harness.find("(or (equal $author.name 'carol') (equal $author.name 'bob'))"),
        vec![3, 2]
    );
    assert_eq!(harness.find("(always)"), vec![4, 3, 2, 1]);
    assert_eq!(harness.find("(never)"), Vec::<u64>::new());
    assert_eq!(harness.find("(limit 2 (always))"), vec![4, 3]);
    assert_eq!(harness.find("(from 1 (equal $bout.number 1))"), vec![2, 1]);
    assert_eq!(harness.find("(limit 1 (from 1 (always)))"), vec![3]);
    assert_eq!(harness.find("(unique $bout.number (always))"), vec![4, 3]);
    assert_eq!(harness.find("(unique $author.name (talks-with 'alice'))"), vec![4, 2]);
    assert_eq!(harness.find("(pick 2)"), vec![2]);
    assert_eq!(
        harness.find("(and (pick 2) (equal $author.name 'alice'))"),
        Vec::<u64>::new()
    );
}

#[test]
fn test_matches_are_lazy_and_descending() {
    let harness = TestHarness::new();
    let notices = create_test_notices(&lunch(), 1, 50, &["alice", "bob"], "chatter");
    post_all(&harness, &notices);

    let mut matches = harness.engine.matches("(equal $author.name 'bob')").unwrap();
    let first: Vec<u64> = matches.by_ref().take(3).map(Result::unwrap).collect();
    assert_eq!(first, vec![50, 48, 46]);

    let rest: Vec<u64> = matches.map(Result::unwrap).collect();
    assert_eq!(rest.len(), 22);
    assert!(rest.windows(2).all(|w| w[0] > w[1]));
}

#[test]
fn test_rename_join_and_kick_off() {
    let harness = seeded();

    harness.see(&Notice::BoutRenamed {
        bout: Bout::new(1, "dinner"),
    });
    assert_eq!(harness.find("(equal $bout.title 'dinner')"), vec![4, 2, 1]);
    assert_eq!(harness.find("(equal $bout.title 'lunch')"), Vec::<u64>::new());

    harness.see(&Notice::ParticipantJoined {
        bout: Bout::new(1, "dinner"),
        identity: "carol".to_string(),
    });
    assert_eq!(harness.find("(talks-with 'carol')"), vec![4, 3, 2, 1]);

    harness.see(&Notice::ParticipantKickedOff {
        bout: Bout::new(1, "dinner"),
        identity: "bob".to_string(),
    });
    assert_eq!(harness.find("(talks-with 'bob')"), Vec::<u64>::new());
    assert_eq!(harness.find("(talks-with 'alice')"), vec![4, 2, 1]);
}

#[test]
fn test_unread_messages() {
    let harness = seeded();
    let seen = |number, identity: &str| Notice::MessageSeen {
        message: Message::new(number, 1, "alice", ""),
        identity: identity.to_string(),
    };

    harness.see(&seen(1, "bob"));
    harness.see(&seen(2, "bob"));
    harness.see(&seen(1, "alice"));

    assert_eq!(harness.find("(seen-by 'bob')"), vec![2, 1]);
    assert_eq!(
        harness.find("(and (talks-with 'bob') (not (seen-by 'bob')))"),
        vec![4]
    );
    assert_eq!(
        harness.find("(and (talks-with 'alice') (not (seen-by 'alice')))"),
        vec![4, 2]
    );
}

#[test]
fn test_redelivery_is_idempotent() {
    let harness = seeded();
    harness.see(&posted(2, &lunch(), "bob", "downstairs"));
    harness.see(&posted(2, &lunch(), "bob", "downstairs"));

    assert_eq!(harness.find("(equal $author.name 'bob')"), vec![2]);
    assert_eq!(harness.find("(talks-with 'bob')"), vec![4, 2, 1]);
    assert_eq!(harness.find("(always)"), vec![4, 3, 2, 1]);
}

#[test]
fn test_repost_moves_single_valued_attributes() {
    let harness = seeded();
    harness.see(&posted(2, &books(), "dave", "moved"));

    assert_eq!(harness.find("(equal $author.name 'bob')"), Vec::<u64>::new());
    assert_eq!(harness.find("(equal $author.name 'dave')"), vec![2]);
    assert_eq!(harness.find("(equal $bout.number 1)"), vec![4, 1]);
    assert_eq!(harness.find("(equal $bout.number 2)"), vec![3, 2]);
}

#[test]
fn test_compaction_then_reopen() {
    let harness = TestHarness::new();
    post_all(
        &harness,
        &create_test_notices(&lunch(), 1, 20, &["alice", "bob"], "before"),
    );

    let summary = harness.engine.compact().unwrap();
    assert_eq!(summary.version, 1);
    assert!(summary.from_backlog() > 0);

    let stats = harness.engine.stats().unwrap();
    assert_eq!(stats.version, 1);
    assert!(stats.attributes.iter().all(|a| a.pending == 0));
    let authors = stats
        .attributes
        .iter()
        .find(|a| a.attribute == "author-name")
        .expect("author-name stats");
    assert_eq!(authors.catalog_entries, 2);

    post_all(
        &harness,
        &create_test_notices(&lunch(), 21, 5, &["carol"], "after"),
    );
    let harness = harness.reopen();

    assert_eq!(harness.find("(equal $author.name 'carol')"), vec![25, 24, 23, 22, 21]);
    assert_eq!(harness.find("(equal $author.name 'alice')").len(), 10);
    assert_eq!(harness.find("(equal $bout.number 1)").len(), 25);

    let summary = harness.engine.compact().unwrap();
    assert_eq!(summary.version, 2);
    assert_eq!(harness.find("(equal $author.name 'carol')").len(), 5);
}

#[test]
fn test_compaction_with_nothing_pending() {
    let harness = seeded();
    harness.engine.compact().unwrap();
    let again = harness.engine.compact().unwrap();
    assert_eq!(again.from_backlog(), 0);
    assert_eq!(harness.find("(always)"), vec![4, 3, 2, 1]);
}
