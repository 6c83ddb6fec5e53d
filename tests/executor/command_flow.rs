//! Command Flow Tests
//!
//! Batches driven through a handle that completes statements on another
//! thread, in reverse order.

use std::sync::Arc;
use std::time::Duration;

use crate::common::*;
use batchsql::{
    ActionKind, CallbackReceiver, ClauseDescriptor, Command, DeleteOptions, InsertOptions, Message, Model,
    SharedModel, UpdateOptions, Value,
};
use parking_lot::Mutex;

fn users(orm: &batchsql::Orm, names: &[&str]) -> Vec<SharedModel> {
    names
        .iter()
        .map(|name| Arc::new(orm.new_model_instance("users").unwrap().with("name", *name)) as SharedModel)
        .collect()
}

fn drain(messages: &crossbeam_channel::Receiver<Message>) -> Vec<Message> {
    messages.try_iter().collect()
}

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn batches_commit_in_submission_order() {
    init_tracing();
    let db = ThreadedDatabase::new();
    let orm = orm(db.clone());
    let (handler, messages) = orm.new_handler_receiver();
    let command = orm.new_command_with_receiver(Arc::new(handler)).unwrap();

    let first = orm.new_insert_selections(users(&orm, &["a", "b", "c"]), InsertOptions::default()).unwrap();
    let second = orm.new_insert_selections(users(&orm, &["d", "e"]), InsertOptions::default()).unwrap();
    command.add_selection(first);
    command.add_selection(second);
    command.execute().unwrap();

    assert!(wait_idle(&command));
    assert_eq!(db.transactions(), 2);
    assert_eq!(db.overlaps(), 0);

    let log = db.log();
    let first_tx: Vec<_> = log.iter().filter(|l| l.transaction == 1).map(|l| l.params[0].clone()).collect();
    assert_eq!(first_tx, vec![Value::from("a"), Value::from("b"), Value::from("c")]);

    // every commit of batch one arrives before any begin of batch two
    let events = drain(&messages);
    let name_of = |m: &Message| m.selection.model().values(true)[0].to_string();
    let last_first_commit = events
        .iter()
        .rposition(|m| m.what == ActionKind::Commit && ["a", "b", "c"].contains(&name_of(m).as_str()))
        .unwrap();
    let first_second_begin = events
        .iter()
        .position(|m| m.what == ActionKind::Begin && ["d", "e"].contains(&name_of(m).as_str()))
        .unwrap();
    assert!(last_first_commit < first_second_begin);
    assert_eq!(events.iter().filter(|m| m.what == ActionKind::Commit).count(), 5);
}

#[test]
fn reverse_completion_order_is_reported_as_it_happens() {
    let db = ThreadedDatabase::new();
    let orm = orm(db.clone());
    let (handler, messages) = orm.new_handler_receiver();
    let command = orm.new_command_with_receiver(Arc::new(handler)).unwrap();

    let batch = orm.new_insert_selections(users(&orm, &["x", "y", "z"]), InsertOptions::default()).unwrap();
    let names: Vec<String> = batch.selections().iter().map(|s| s.name().to_string()).collect();
    command.add_selection(batch);
    command.execute().unwrap();
    assert!(wait_idle(&command));

    let committed: Vec<String> = drain(&messages)
        .into_iter()
        .filter(|m| m.what == ActionKind::Commit)
        .map(|m| m.selection.name().to_string())
        .collect();
    let reversed: Vec<String> = names.into_iter().rev().collect();
    assert_eq!(committed, reversed);
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn failed_statement_does_not_stall_the_queue() {
    let db = ThreadedDatabase::new();
    db.fail_when("mallory");
    let orm = orm(db.clone());
    let (handler, messages) = orm.new_handler_receiver();
    let command = orm.new_command_with_receiver(Arc::new(handler)).unwrap();

    command.add_selection(
        orm.new_insert_selections(users(&orm, &["alice", "mallory", "bob"]), InsertOptions::default())
            .unwrap(),
    );
    command.add_selection(orm.new_insert_selections(users(&orm, &["carol"]), InsertOptions::default()).unwrap());
    command.execute().unwrap();
    assert!(wait_idle(&command));

    let events = drain(&messages);
    let rollbacks: Vec<_> = events.iter().filter(|m| m.what == ActionKind::Rollback).collect();
    assert_eq!(rollbacks.len(), 1);
    assert!(rollbacks[0].error.as_ref().unwrap().to_string().contains("constraint failed"));
    assert_eq!(events.iter().filter(|m| m.what == ActionKind::Commit).count(), 3);
    assert_eq!(db.transactions(), 2);
}

#[test]
fn compile_failure_is_reported_and_skipped() {
    let db = ThreadedDatabase::new();
    let orm = orm(db.clone());
    let rollbacks = Arc::new(Mutex::new(Vec::new()));
    let receiver = {
        let rollbacks = Arc::clone(&rollbacks);
        orm.new_command_receiver().on_rollback(move |_, selection, error| {
            rollbacks.lock().push((selection.name().to_string(), error.is_compile()));
        })
    };
    let command = orm.new_command_with_receiver(Arc::new(receiver)).unwrap();

    let model = users(&orm, &["ok"]).remove(0);
    let good = orm.new_insert(model.clone(), InsertOptions::default()).unwrap().named("good");
    let bad = orm
        .new_delete(model, DeleteOptions::default().filter(serde_json::json!({ "bindArgs": [1] })))
        .unwrap()
        .named("bad");
    command.add_selection(vec![good, bad]);

    let err = command.execute().unwrap_err();
    assert!(err.is_compile());
    assert!(wait_idle(&command));

    assert_eq!(*rollbacks.lock(), vec![("bad".to_string(), true)]);
    assert_eq!(db.log().len(), 1);
}

// ============================================================================
// Queues
// ============================================================================

#[test]
fn batches_added_mid_drain_run_afterwards() {
    let db = ThreadedDatabase::new();
    let orm = orm(db.clone());
    let command = orm.new_command().unwrap();

    let late_orm = Arc::new(orm);
    let added = Arc::new(Mutex::new(false));
    let receiver = {
        let late_orm = Arc::clone(&late_orm);
        let added = Arc::clone(&added);
        CallbackReceiver::new().on_commit(move |command, _, _| {
            let mut added = added.lock();
            if !*added {
                *added = true;
                let model = users(&late_orm, &["late"]);
                command.add_selection(
                    late_orm
                        .new_update_selections(
                            model,
                            UpdateOptions::default().filter(ClauseDescriptor::new("name = ?").bind(["late"])),
                        )
                        .unwrap(),
                );
            }
        })
    };
    command.add_receiver(Arc::new(receiver));

    command.add_selection(late_orm.new_insert_selections(users(&late_orm, &["early"]), InsertOptions::default()).unwrap());
    command.execute().unwrap();
    assert!(wait_idle(&command));

    let log = db.log();
    assert_eq!(log.len(), 2);
    assert_eq!(log[1].transaction, 2);
    assert_eq!(log[1].text, "UPDATE users SET name = ?,age = ? WHERE name = ?");
    assert_eq!(log[1].params, vec![Value::from("late"), Value::Null, Value::from("late")]);
    assert_eq!(db.overlaps(), 0);
}

#[test]
fn removed_batch_never_runs() {
    let db = ThreadedDatabase::new();
    let orm = orm(db.clone());
    let command = orm.new_command().unwrap();

    let kept = Arc::new(orm.new_model_instance("pets").unwrap()) as SharedModel;
    command.add_selection(orm.new_drop_selections(vec![kept]).unwrap());
    let gone = command.add_selection(orm.new_drop_selections(users(&orm, &["g"])).unwrap());
    assert!(command.remove_selection(gone));

    command.execute().unwrap();
    assert!(wait_idle(&command));

    let texts: Vec<_> = db.log().into_iter().map(|l| l.text).collect();
    assert_eq!(texts, vec!["DROP TABLE IF EXISTS pets;"]);
}

#[test]
fn timeout_spaces_batches() {
    let db = ThreadedDatabase::new();
    let command = Command::with_timeout(db.clone(), Duration::from_millis(15)).unwrap();
    let orm = orm(db.clone());

    for name in ["a", "b", "c"] {
        command.add_selection(orm.new_insert_selections(users(&orm, &[name]), InsertOptions::default()).unwrap());
    }
    let start = std::time::Instant::now();
    command.execute().unwrap();
    assert!(wait_idle(&command));

    assert!(start.elapsed() >= Duration::from_millis(30));
    assert_eq!(db.transactions(), 3);
    assert_eq!(db.overlaps(), 0);
}
