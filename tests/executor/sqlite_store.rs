//! SQLite Handle Tests
//!
//! End-to-end batches against a real SQLite file.

use std::sync::Arc;

use crate::common::*;
use batchsql::{
    ActionKind, ClauseDescriptor, Command, DeleteOptions, FailurePolicy, InsertOptions, Message, Orm,
    QueryResult, SelectOptions, SharedModel, SqliteDatabase, UpdateOptions, Value,
};
use tempfile::TempDir;

const DDL: &str = "
    CREATE TABLE users(_id INTEGER PRIMARY KEY, name TEXT UNIQUE, age INTEGER);
    CREATE TABLE pets(_id INTEGER PRIMARY KEY, owner INTEGER, kind TEXT);
";

struct Fixture {
    _dir: TempDir,
    db: Arc<SqliteDatabase>,
    orm: Orm,
    command: Command,
    messages: crossbeam_channel::Receiver<Message>,
}

fn fixture(policy: FailurePolicy) -> Fixture {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let db = Arc::new(SqliteDatabase::open(&dir.path().join("test.db")).unwrap().with_policy(policy));
    db.with_connection(|c| c.execute_batch(DDL)).unwrap();
    let orm = orm(db.clone());
    let (handler, messages) = orm.new_handler_receiver();
    let command = orm.new_command_with_receiver(Arc::new(handler)).unwrap();
    Fixture {
        _dir: dir,
        db,
        orm,
        command,
        messages,
    }
}

fn user(orm: &Orm, name: &str, age: i64) -> SharedModel {
    Arc::new(orm.new_model_instance("users").unwrap().with("name", name).with("age", age))
}

fn run(f: &Fixture, batch: impl Into<batchsql::Batch>) -> Vec<Message> {
    f.command.add_selection(batch);
    f.command.execute().unwrap();
    f.messages.try_iter().collect()
}

fn count(db: &SqliteDatabase) -> i64 {
    db.with_connection(|c| c.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0)).unwrap())
}

fn committed(messages: &[Message]) -> Vec<&QueryResult> {
    messages
        .iter()
        .filter(|m| m.what == ActionKind::Commit)
        .filter_map(|m| m.result.as_ref())
        .collect()
}

#[test]
fn insert_then_select_into_records() {
    let f = fixture(FailurePolicy::CommitSurvivors);
    let inserts = f
        .orm
        .new_insert_selections(
            vec![user(&f.orm, "ada", 36), user(&f.orm, "bob", 41)],
            InsertOptions::default(),
        )
        .unwrap();
    let events = run(&f, inserts);
    let ids: Vec<_> = committed(&events).iter().map(|r| r.insert_id()).collect();
    assert_eq!(ids, vec![Some(1), Some(2)]);

    let probe = user(&f.orm, "", 0);
    let select = f
        .orm
        .new_select(probe, SelectOptions::default().filter(ClauseDescriptor::new("age > ?").bind([40]).order("BY name")))
        .unwrap();
    let events = run(&f, vec![select]);
    let results = committed(&events);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].count(), 1);

    let registry = f.orm.registry().unwrap();
    let records = results[0].to_records(registry).unwrap();
    assert_eq!(records[0].get("name"), Some(&Value::from("bob")));
    assert_eq!(records[0].get("_id"), Some(&Value::Int(2)));
}

#[test]
fn update_and_delete_report_affected_rows() {
    let f = fixture(FailurePolicy::CommitSurvivors);
    run(
        &f,
        f.orm
            .new_insert_selections(
                vec![user(&f.orm, "a", 1), user(&f.orm, "b", 2), user(&f.orm, "c", 3)],
                InsertOptions::default(),
            )
            .unwrap(),
    );

    let update = f
        .orm
        .new_update(
            user(&f.orm, "", 0),
            UpdateOptions::default().set("age = age + 10").filter(ClauseDescriptor::new("name").bind(["a", "b"]).in_list()),
        )
        .unwrap();
    let delete = f
        .orm
        .new_delete(user(&f.orm, "c", 3), DeleteOptions::default().filter("AND"))
        .unwrap();
    let events = run(&f, vec![update, delete]);

    let affected: Vec<_> = committed(&events).iter().map(|r| r.rows_affected()).collect();
    assert_eq!(affected, vec![2, 1]);
    assert_eq!(count(&f.db), 2);
    let ages: i64 = f
        .db
        .with_connection(|c| c.query_row("SELECT SUM(age) FROM users", [], |r| r.get(0)).unwrap());
    assert_eq!(ages, 23);
}

#[test]
fn failing_statement_rolls_back_alone() {
    let f = fixture(FailurePolicy::CommitSurvivors);
    let batch = f
        .orm
        .new_insert_selections(
            vec![user(&f.orm, "dup", 1), user(&f.orm, "dup", 2), user(&f.orm, "ok", 3)],
            InsertOptions::default(),
        )
        .unwrap();
    let events = run(&f, batch);

    assert_eq!(events.iter().filter(|m| m.what == ActionKind::Rollback).count(), 1);
    assert_eq!(committed(&events).len(), 2);
    assert_eq!(count(&f.db), 2);
    assert!(f.command.is_idle());
}

#[test]
fn rollback_all_policy_undoes_the_batch() {
    let f = fixture(FailurePolicy::RollbackAll);
    let batch = f
        .orm
        .new_insert_selections(
            vec![user(&f.orm, "dup", 1), user(&f.orm, "dup", 2)],
            InsertOptions::default(),
        )
        .unwrap();
    let events = run(&f, batch);

    assert_eq!(events.iter().filter(|m| m.what == ActionKind::Rollback).count(), 2);
    assert!(committed(&events).is_empty());
    assert_eq!(count(&f.db), 0);
}

#[test]
fn replace_conflict_overwrites() {
    let f = fixture(FailurePolicy::CommitSurvivors);
    let options = InsertOptions::default().ignore_id(false).conflict(batchsql::ConflictAlgorithm::Replace);
    let first = Arc::new(f.orm.new_model_instance("users").unwrap().with("_id", 5).with("name", "old"));
    let second = Arc::new(f.orm.new_model_instance("users").unwrap().with("_id", 5).with("name", "new"));
    run(&f, f.orm.new_insert_selections(vec![first as SharedModel], options.clone()).unwrap());
    run(&f, f.orm.new_insert_selections(vec![second as SharedModel], options).unwrap());

    assert_eq!(count(&f.db), 1);
    let name: String = f
        .db
        .with_connection(|c| c.query_row("SELECT name FROM users WHERE _id = 5", [], |r| r.get(0)).unwrap());
    assert_eq!(name, "new");
}

#[test]
fn receiver_may_query_from_callback() {
    let f = fixture(FailurePolicy::CommitSurvivors);
    let db = f.db.clone();
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    {
        let seen = Arc::clone(&seen);
        let receiver = f.orm.new_command_receiver().on_commit(move |_, _, _| {
            let n: i64 = db.with_connection(|c| c.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0)).unwrap());
            seen.lock().push(n);
        });
        f.command.add_receiver(Arc::new(receiver));
    }

    run(
        &f,
        f.orm
            .new_insert_selections(vec![user(&f.orm, "p", 1), user(&f.orm, "q", 2)], InsertOptions::default())
            .unwrap(),
    );
    // callbacks run after COMMIT, so both rows are visible
    assert_eq!(*seen.lock(), vec![2, 2]);
}
