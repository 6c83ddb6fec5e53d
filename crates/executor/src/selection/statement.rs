//! SQL rendering for each selection kind.
//!
//! Fragments always render in the order JOIN, WHERE, IN / NOT IN, ORDER.
//! Joins are honored for Update and Select; ORDER for Select only.

use batchsql_core::Model;
use tracing::warn;

use super::clause::{
    CaseColumn, ClauseDescriptor, CompileError, Membership, SelectAlgorithm, UpdateAlgorithm,
    WhereAlgorithm,
};
use super::{CompiledStatement, SelectionKind};
use crate::Value;

/// Which optional fragments a statement kind accepts.
#[derive(Clone, Copy)]
struct Fragments {
    joins: bool,
    order: bool,
}

pub(super) fn render(model: &dyn Model, kind: &SelectionKind) -> Result<CompiledStatement, CompileError> {
    let table = model.table_name();
    match kind {
        SelectionKind::Drop => Ok(CompiledStatement {
            text: format!("DROP TABLE IF EXISTS {table};"),
            params: Vec::new(),
        }),
        SelectionKind::Insert(options) => {
            let keys = model.keys(options.ignore_id);
            let values = model.values(options.ignore_id);
            let bindable = values.iter().any(|v| !v.is_null());
            let token = if bindable { "?" } else { "NULL" };
            let placeholders = vec![token; keys.len()].join(",");
            Ok(CompiledStatement {
                text: format!(
                    "INSERT{} INTO {}({}) VALUES({})",
                    options.conflict.keyword(),
                    table,
                    keys.join(","),
                    placeholders
                ),
                params: if bindable { values } else { Vec::new() },
            })
        }
        SelectionKind::Delete(options) => {
            let mut text = format!("DELETE FROM {table}");
            let mut params = Vec::new();
            if let Some(algorithm) = &options.where_algorithm {
                let algorithm = algorithm.resolve()?;
                let fragments = Fragments {
                    joins: false,
                    order: false,
                };
                render_where(model, options.ignore_id, &algorithm, fragments, &mut text, &mut params);
            }
            Ok(CompiledStatement { text, params })
        }
        SelectionKind::Update(options) => {
            let mut params = Vec::new();
            let set = match &options.update_algorithm {
                None => {
                    params.extend(model.values(options.ignore_id));
                    model
                        .keys(options.ignore_id)
                        .iter()
                        .map(|k| format!("{k} = ?"))
                        .collect::<Vec<_>>()
                        .join(",")
                }
                Some(algorithm) => render_set(table, &*algorithm.resolve()?),
            };
            let mut text = format!("UPDATE {table} SET {set}");
            if let Some(algorithm) = &options.where_algorithm {
                let algorithm = algorithm.resolve()?;
                let fragments = Fragments {
                    joins: true,
                    order: false,
                };
                render_where(model, options.ignore_id, &algorithm, fragments, &mut text, &mut params);
            }
            Ok(CompiledStatement { text, params })
        }
        SelectionKind::Select(options) => {
            let columns = match &options.select_algorithm {
                None => model.keys(options.ignore_id).join(","),
                Some(algorithm) => match &*algorithm.resolve()? {
                    SelectAlgorithm::All => "*".to_string(),
                    SelectAlgorithm::Columns(columns) => columns.join(","),
                    SelectAlgorithm::Raw(raw) => raw.clone(),
                },
            };
            let mut text = format!("SELECT {columns} FROM {table}");
            let mut params = Vec::new();
            if let Some(algorithm) = &options.where_algorithm {
                let algorithm = algorithm.resolve()?;
                let fragments = Fragments {
                    joins: true,
                    order: true,
                };
                render_where(model, options.ignore_id, &algorithm, fragments, &mut text, &mut params);
            }
            Ok(CompiledStatement { text, params })
        }
    }
}

fn render_where(
    model: &dyn Model,
    ignore_id: bool,
    algorithm: &WhereAlgorithm,
    fragments: Fragments,
    text: &mut String,
    params: &mut Vec<Value>,
) {
    match algorithm {
        WhereAlgorithm::And | WhereAlgorithm::Or => {
            let keys = model.keys(ignore_id);
            if keys.is_empty() {
                return;
            }
            let joiner = if matches!(algorithm, WhereAlgorithm::And) {
                " AND "
            } else {
                " OR "
            };
            let clause = keys
                .iter()
                .map(|k| format!("{k} = ?"))
                .collect::<Vec<_>>()
                .join(joiner);
            text.push_str(" WHERE ");
            text.push_str(&clause);
            params.extend(model.values(ignore_id));
        }
        WhereAlgorithm::Raw(raw) => {
            if !raw.is_empty() {
                text.push_str(" WHERE ");
                text.push_str(raw);
            }
        }
        WhereAlgorithm::Clause(descriptor) => render_descriptor(descriptor, fragments, text, params),
    }
}

fn render_descriptor(
    descriptor: &ClauseDescriptor,
    fragments: Fragments,
    text: &mut String,
    params: &mut Vec<Value>,
) {
    if fragments.joins {
        for join in &descriptor.joins {
            text.push(' ');
            text.push_str(join.kind.keyword());
            text.push(' ');
            text.push_str(&join.table);
            if let Some(on) = &join.on {
                text.push_str(" ON ");
                text.push_str(on);
            }
        }
    }
    text.push_str(" WHERE ");
    text.push_str(&descriptor.clause);
    if let Some(membership) = descriptor.membership {
        text.push_str(match membership {
            Membership::In => " IN (",
            Membership::NotIn => " NOT IN (",
        });
        text.push_str(&vec!["?"; descriptor.bind_args.len()].join(","));
        text.push(')');
    }
    if fragments.order {
        if let Some(order) = &descriptor.order {
            text.push_str(" ORDER ");
            text.push_str(order);
        }
    }
    params.extend(descriptor.bind_args.iter().cloned());
}

fn render_set(table: &str, algorithm: &UpdateAlgorithm) -> String {
    match algorithm {
        UpdateAlgorithm::Columns(columns) => columns.join(","),
        UpdateAlgorithm::Raw(raw) => raw.clone(),
        UpdateAlgorithm::Inline(pairs) => {
            warn!(table, columns = pairs.len(), "update values inlined into SQL text without binding");
            pairs
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(",")
        }
        UpdateAlgorithm::Case(columns) => columns.iter().map(render_case).collect::<Vec<_>>().join(", "),
    }
}

fn render_case(column: &CaseColumn) -> String {
    let mut out = format!("{}=CASE", column.column);
    for arm in &column.arms {
        out.push_str(&format!(
            " WHEN {}={} THEN {}",
            arm.column,
            arm.value.to_sql_literal(),
            arm.then.to_sql_literal()
        ));
    }
    out.push_str(" END");
    out
}
