//! Statement Builder Tests
//!
//! Selections built through the Orm from a TOML schema, compiled without
//! any database handle involved.

use std::sync::Arc;

use crate::common::*;
use batchsql::{
    Batch, CaseColumn, ClauseDescriptor, ConflictAlgorithm, DeleteOptions, Error, InsertOptions, Model,
    Record, SelectOptions, Selection, SharedModel, UpdateAlgorithm, UpdateOptions, Value,
};
use serde_json::json;

fn orm_only() -> batchsql::Orm {
    orm(ThreadedDatabase::new())
}

fn pet(orm: &batchsql::Orm, owner: i64, kind: &str) -> SharedModel {
    Arc::new(orm.new_model_instance("pets").unwrap().with("owner", owner).with("kind", kind))
}

#[test]
fn models_from_json_compile_to_inserts() {
    let orm = orm_only();
    let records = orm
        .load_models(r#"[{"users": {"name": "ada", "age": 36}}, {"pets": {"owner": 1, "kind": "cat"}}]"#)
        .unwrap();
    let models: Vec<SharedModel> = records.into_iter().map(|r| Arc::new(r) as SharedModel).collect();
    let batch = orm.new_insert_selections(models, InsertOptions::default()).unwrap();

    let compiled: Vec<_> = batch.selections().iter().map(|s| s.compile().unwrap()).collect();
    assert_eq!(compiled[0].text, "INSERT INTO users(name,age) VALUES(?,?)");
    assert_eq!(compiled[0].params, vec![Value::from("ada"), Value::Int(36)]);
    assert_eq!(compiled[1].text, "INSERT INTO pets(owner,kind) VALUES(?,?)");
}

#[test]
fn unknown_properties_become_internals() {
    let orm = orm_only();
    let records = orm.load_models(r#"[{"users": {"name": "x", "nickname": "y"}}]"#).unwrap();
    assert_eq!(records[0].internals().len(), 1);
    assert_eq!(records[0].keys(true), vec!["name", "age"]);
}

#[test]
fn conflict_keyword_from_text() {
    let orm = orm_only();
    let conflict: ConflictAlgorithm = "ignore".parse().unwrap();
    let c = orm
        .new_insert(pet(&orm, 1, "dog"), InsertOptions::default().conflict(conflict))
        .unwrap()
        .compile()
        .unwrap();
    assert_eq!(c.text, "INSERT OR IGNORE INTO pets(owner,kind) VALUES(?,?)");

    let err = "sometimes".parse::<ConflictAlgorithm>().unwrap_err();
    assert!(matches!(err, Error::Config { .. }));
}

#[test]
fn delete_matching_model_values() {
    let orm = orm_only();
    let c = orm
        .new_delete(pet(&orm, 3, "fish"), DeleteOptions::default().filter("AND"))
        .unwrap()
        .compile()
        .unwrap();
    assert_eq!(c.text, "DELETE FROM pets WHERE owner = ? AND kind = ?");
    assert_eq!(c.params, vec![Value::Int(3), Value::from("fish")]);

    // "&" is accepted as AND
    let c = orm
        .new_delete(pet(&orm, 3, "fish"), DeleteOptions::default().filter(json!("&")))
        .unwrap()
        .compile()
        .unwrap();
    assert_eq!(c.text, "DELETE FROM pets WHERE owner = ? AND kind = ?");
}

#[test]
fn select_with_join_membership_and_order() {
    let orm = orm_only();
    let model: SharedModel = Arc::new(orm.new_model_instance("users").unwrap());
    let description = json!({
        "clause": "pets.kind",
        "bindArgs": ["cat", "dog"],
        "in": true,
        "inner_join": "pets",
        "on": "pets.owner = users._id",
        "order": "BY users.name DESC"
    });
    let c = orm
        .new_select(model, SelectOptions::default().columns(json!(["users.name", "pets.kind"])).filter(description))
        .unwrap()
        .compile()
        .unwrap();
    assert_eq!(
        c.text,
        "SELECT users.name,pets.kind FROM users INNER JOIN pets ON pets.owner = users._id \
         WHERE pets.kind IN (?,?) ORDER BY users.name DESC"
    );
    assert_eq!(c.params, vec![Value::from("cat"), Value::from("dog")]);
}

#[test]
fn update_case_from_description() {
    let orm = orm_only();
    let model: SharedModel = Arc::new(orm.new_model_instance("users").unwrap());
    let description = json!({
        "clause": {
            "CASE": {
                "age": { "WHEN": { "_id": [1, 2], "THEN": [30, 40] } }
            }
        }
    });
    let selection = orm
        .new_update(model.clone(), UpdateOptions::default().set(description).filter("_id IN (1,2)"))
        .unwrap();
    let typed = orm
        .new_update(
            model,
            UpdateOptions::default()
                .set(UpdateAlgorithm::Case(vec![CaseColumn::new("age", "_id", [1, 2], [30, 40])]))
                .filter("_id IN (1,2)"),
        )
        .unwrap();

    let c = typed.compile().unwrap();
    assert_eq!(c.text, "UPDATE users SET age=CASE WHEN _id='1' THEN '30' WHEN _id='2' THEN '40' END WHERE _id IN (1,2)");
    assert!(c.params.is_empty());
    assert_eq!(selection.compile().unwrap(), c);
}

#[test]
fn update_case_length_mismatch_fails() {
    let orm = orm_only();
    let model: SharedModel = Arc::new(orm.new_model_instance("users").unwrap());
    let description = json!({
        "clause": { "CASE": { "age": { "WHEN": { "_id": [1, 2], "THEN": [30] } } } }
    });
    let selection = orm.new_update(model, UpdateOptions::default().set(description)).unwrap();
    let err = selection.compile().unwrap_err();
    assert!(err.is_compile());
    assert!(!selection.is_active());
}

#[test]
fn display_reflects_compilation() {
    let orm = orm_only();
    let selection = orm.new_drop(pet(&orm, 1, "cat")).unwrap().named("drop-pets");
    assert_eq!(
        selection.to_string(),
        "Drop[name:drop-pets, index:-1, active:false, ignore_id:true, query:, values[], model:pets]"
    );

    selection.compile().unwrap();
    assert_eq!(
        selection.to_string(),
        "Drop[name:drop-pets, index:-1, active:true, ignore_id:true, query:DROP TABLE IF EXISTS pets;, values[], model:pets]"
    );

    selection.recycle();
    assert!(!selection.is_active());
    assert!(selection.compiled().is_none());
}

#[test]
fn compiled_statement_is_memoized() {
    let orm = orm_only();
    let record = orm.new_model_instance("users").unwrap().with("name", "before");
    let selection = Selection::insert(Arc::new(record), InsertOptions::default());
    let first = selection.compile().unwrap();
    let again = selection.compile().unwrap();
    assert_eq!(first, again);
    assert_eq!(selection.compiled(), Some(first));
}

#[test]
fn batch_from_plain_records() {
    let table = Arc::new(schema().tables[0].clone());
    let batch: Batch = ["a", "b"]
        .into_iter()
        .map(|name| Selection::insert(Arc::new(Record::new(table.clone()).with("name", name)), InsertOptions::default()))
        .collect();
    assert_eq!(batch.len(), 2);
    assert!(!batch.is_empty());

    let mut grown = Batch::default();
    grown.push(Selection::delete(
        Arc::new(Record::new(table)),
        DeleteOptions::default().filter(ClauseDescriptor::new("_id").bind([1, 2, 3]).not_in_list()),
    ));
    let c = grown.selections()[0].compile().unwrap();
    assert_eq!(c.text, "DELETE FROM users WHERE _id NOT IN (?,?,?)");
}
