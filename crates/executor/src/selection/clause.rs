//! Clause descriptions for the where/join, update and select grammars.
//!
//! Each grammar has a typed form ([`WhereAlgorithm`], [`UpdateAlgorithm`],
//! [`SelectAlgorithm`]) and can also be described declaratively as a
//! `serde_json::Value`. Declarative descriptions are interpreted when the
//! selection compiles, which is where a badly shaped description is rejected.
//!
//! Declarative shapes:
//!
//! ```text
//! where:   "AND" | "OR" | "<raw sql>"
//!          { "clause": "id", "bindArgs": [1, 2], "in": true,
//!            "inner_join": "t2" | ["t2", "t3"], "on": "c" | ["c2", "c3"],
//!            "order": "BY name" }
//! update:  ["a = ?", "b = ?"] | "<raw sql>" | { "a": 1, "b": "x" }
//!          { "clause": "<raw sql>" }
//!          { "clause": { "CASE": { "col": { "WHEN": { "_id": [1, 2], "THEN": ["x", "y"] } } } } }
//! select:  "*" | "<raw sql>" | ["a", "b"]
//! ```

use std::borrow::Cow;

use serde_json::Value as Json;

use crate::Value;

/// A clause description has a shape its grammar does not accept.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    /// The description is not one of the grammar's shapes
    #[error("type mismatch in {algorithm} algorithm: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Grammar name: `where`, `update` or `select`
        algorithm: &'static str,
        /// Accepted shapes
        expected: String,
        /// What was supplied
        actual: String,
    },

    /// A clause descriptor lacks its `clause` fragment
    #[error("unrecognized {algorithm} clause: {clause}")]
    UnrecognizedClause {
        /// Grammar name
        algorithm: &'static str,
        /// The offending descriptor
        clause: String,
    },
}

impl CompileError {
    fn mismatch(algorithm: &'static str, expected: &str, actual: &Json) -> Self {
        CompileError::TypeMismatch {
            algorithm,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// Interpretation of a declarative description into a typed algorithm.
pub trait FromDescription: Sized {
    /// Interpret `description`, rejecting unknown shapes.
    fn from_description(description: &Json) -> Result<Self, CompileError>;
}

/// A clause algorithm, either typed or described as JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum Algorithm<T> {
    /// Already a typed algorithm
    Typed(T),
    /// Declarative description, interpreted at compile time
    Described(Json),
}

impl<T: FromDescription + Clone> Algorithm<T> {
    /// The typed algorithm, interpreting a description if needed.
    pub fn resolve(&self) -> Result<Cow<'_, T>, CompileError> {
        match self {
            Algorithm::Typed(t) => Ok(Cow::Borrowed(t)),
            Algorithm::Described(json) => T::from_description(json).map(Cow::Owned),
        }
    }
}

impl<T> From<Json> for Algorithm<T> {
    fn from(json: Json) -> Self {
        Algorithm::Described(json)
    }
}

macro_rules! typed_algorithm {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Algorithm<$ty> {
                fn from(algorithm: $ty) -> Self {
                    Algorithm::Typed(algorithm)
                }
            }

            impl From<&str> for Algorithm<$ty> {
                fn from(text: &str) -> Self {
                    Algorithm::Typed(<$ty>::from(text))
                }
            }
        )*
    };
}

typed_algorithm!(WhereAlgorithm, UpdateAlgorithm, SelectAlgorithm);

// ============================================================================
// Where / join grammar
// ============================================================================

/// Shapes of a where clause.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereAlgorithm {
    /// `c1 = ? AND c2 = ? ...` over every bindable column, bound to current values
    And,
    /// `c1 = ? OR c2 = ? ...` over every bindable column, bound to current values
    Or,
    /// Raw clause text, nothing bound
    Raw(String),
    /// Clause fragment with its own bind arguments
    Clause(ClauseDescriptor),
}

impl From<&str> for WhereAlgorithm {
    fn from(text: &str) -> Self {
        match text {
            "AND" | "&" => WhereAlgorithm::And,
            "OR" => WhereAlgorithm::Or,
            raw => WhereAlgorithm::Raw(raw.to_string()),
        }
    }
}

impl From<ClauseDescriptor> for WhereAlgorithm {
    fn from(descriptor: ClauseDescriptor) -> Self {
        WhereAlgorithm::Clause(descriptor)
    }
}

impl From<ClauseDescriptor> for Algorithm<WhereAlgorithm> {
    fn from(descriptor: ClauseDescriptor) -> Self {
        Algorithm::Typed(WhereAlgorithm::Clause(descriptor))
    }
}

/// Membership test appended after the clause fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    /// ` IN (?,?,...)`
    In,
    /// ` NOT IN (?,?,...)`
    NotIn,
}

/// Join flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// `INNER JOIN`
    Inner,
    /// `LEFT JOIN`
    Left,
}

impl JoinKind {
    pub(crate) fn keyword(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
        }
    }
}

/// One join fragment: ` <KIND> <table>[ ON <on>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    /// Inner or left
    pub kind: JoinKind,
    /// Joined table expression
    pub table: String,
    /// Join condition; no `ON` when absent or empty
    pub on: Option<String>,
}

/// Object-shaped where description.
///
/// Joins apply to Update and Select only; `order` applies to Select only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClauseDescriptor {
    /// Raw SQL fragment following `WHERE`; must not be empty
    pub clause: String,
    /// Values bound to the fragment's placeholders, in order
    pub bind_args: Vec<Value>,
    /// Optional `IN` / `NOT IN` list sized to `bind_args`
    pub membership: Option<Membership>,
    /// Join fragments rendered before `WHERE`
    pub joins: Vec<Join>,
    /// Expression appended as ` ORDER <order>`
    pub order: Option<String>,
}

impl ClauseDescriptor {
    /// Descriptor with a clause fragment and nothing bound.
    pub fn new(clause: impl Into<String>) -> Self {
        Self {
            clause: clause.into(),
            ..Self::default()
        }
    }

    /// Bind arguments for the fragment.
    pub fn bind<I, V>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.bind_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Append ` IN (...)` sized to the bind arguments.
    pub fn in_list(mut self) -> Self {
        self.membership = Some(Membership::In);
        self
    }

    /// Append ` NOT IN (...)` sized to the bind arguments.
    pub fn not_in_list(mut self) -> Self {
        self.membership = Some(Membership::NotIn);
        self
    }

    /// Add an `INNER JOIN`.
    pub fn inner_join(self, table: impl Into<String>, on: impl Into<String>) -> Self {
        self.join(JoinKind::Inner, table, on)
    }

    /// Add a `LEFT JOIN`.
    pub fn left_join(self, table: impl Into<String>, on: impl Into<String>) -> Self {
        self.join(JoinKind::Left, table, on)
    }

    fn join(mut self, kind: JoinKind, table: impl Into<String>, on: impl Into<String>) -> Self {
        let on = on.into();
        self.joins.push(Join {
            kind,
            table: table.into(),
            on: (!on.is_empty()).then_some(on),
        });
        self
    }

    /// Order expression, e.g. `"BY name DESC"`.
    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }
}

impl FromDescription for WhereAlgorithm {
    fn from_description(description: &Json) -> Result<Self, CompileError> {
        match description {
            Json::String(text) => Ok(WhereAlgorithm::from(text.as_str())),
            Json::Object(map) => {
                let clause = match map.get("clause") {
                    Some(Json::String(clause)) if !clause.is_empty() => clause.clone(),
                    _ => {
                        return Err(CompileError::UnrecognizedClause {
                            algorithm: "where",
                            clause: description.to_string(),
                        })
                    }
                };
                let bind_args = match map.get("bindArgs").or_else(|| map.get("bind_args")) {
                    None | Some(Json::Null) => Vec::new(),
                    Some(Json::Array(items)) => items
                        .iter()
                        .map(|item| {
                            Value::from_json(item)
                                .ok_or_else(|| CompileError::mismatch("where", "scalar bind argument", item))
                        })
                        .collect::<Result<_, _>>()?,
                    Some(other) => return Err(CompileError::mismatch("where", "bindArgs array", other)),
                };
                let membership = if truthy(map.get("in")) {
                    Some(Membership::In)
                } else if truthy(map.get("not_in")) {
                    Some(Membership::NotIn)
                } else {
                    None
                };
                let joins = if truthy(map.get("inner_join")) {
                    describe_joins(JoinKind::Inner, &map["inner_join"], map.get("on"))?
                } else if truthy(map.get("left_join")) {
                    describe_joins(JoinKind::Left, &map["left_join"], map.get("on"))?
                } else {
                    Vec::new()
                };
                let order = match map.get("order") {
                    Some(Json::String(order)) if !order.is_empty() => Some(order.clone()),
                    None | Some(Json::Null) | Some(Json::String(_)) => None,
                    Some(other) => return Err(CompileError::mismatch("where", "order string", other)),
                };
                Ok(WhereAlgorithm::Clause(ClauseDescriptor {
                    clause,
                    bind_args,
                    membership,
                    joins,
                    order,
                }))
            }
            other => Err(CompileError::mismatch("where", "string or clause object", other)),
        }
    }
}

/// Loose truthiness for descriptor flags (`true`, non-empty strings/arrays, non-zero numbers).
fn truthy(value: Option<&Json>) -> bool {
    match value {
        None | Some(Json::Null) => false,
        Some(Json::Bool(b)) => *b,
        Some(Json::Number(n)) => n.as_f64().map_or(false, |f| f != 0.0),
        Some(Json::String(s)) => !s.is_empty(),
        Some(Json::Array(_)) | Some(Json::Object(_)) => true,
    }
}

fn join_text(value: &Json) -> Result<String, CompileError> {
    match value {
        Json::String(s) => Ok(s.clone()),
        Json::Array(items) => items
            .iter()
            .map(|item| match item {
                Json::String(s) => Ok(s.clone()),
                other => Err(CompileError::mismatch("where", "join table string", other)),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|parts| parts.join(",")),
        other => Err(CompileError::mismatch("where", "join table string or array", other)),
    }
}

/// Parallel arrays pair up by index; any other combination is one join.
fn describe_joins(kind: JoinKind, tables: &Json, on: Option<&Json>) -> Result<Vec<Join>, CompileError> {
    if let (Json::Array(tables), Some(Json::Array(conditions))) = (tables, on) {
        return tables
            .iter()
            .enumerate()
            .map(|(i, table)| {
                let on = match conditions.get(i) {
                    Some(Json::String(s)) if !s.is_empty() => Some(s.clone()),
                    _ => None,
                };
                Ok(Join {
                    kind,
                    table: join_text(table)?,
                    on,
                })
            })
            .collect();
    }
    let on = match on {
        Some(value) if truthy(Some(value)) => Some(join_text(value)?),
        _ => None,
    };
    Ok(vec![Join {
        kind,
        table: join_text(tables)?,
        on,
    }])
}

// ============================================================================
// Update grammar
// ============================================================================

/// Shapes of an update `SET` clause.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateAlgorithm {
    /// Fragments joined with commas; nothing is bound
    Columns(Vec<String>),
    /// Raw `SET` text
    Raw(String),
    /// `k=v,...` with values written into the SQL text unquoted and unbound.
    ///
    /// Unsafe with untrusted values: this path performs no escaping. Kept
    /// for compatibility with existing callers; prefer `Columns` with bound
    /// values or `Case`.
    Inline(Vec<(String, Value)>),
    /// One `col=CASE WHEN ... THEN ... END` fragment per column
    Case(Vec<CaseColumn>),
}

impl From<&str> for UpdateAlgorithm {
    fn from(text: &str) -> Self {
        UpdateAlgorithm::Raw(text.to_string())
    }
}

/// One `WHEN <column>=<value> THEN <result>` arm.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseArm {
    /// Column tested by the arm
    pub column: String,
    /// Value it is compared with
    pub value: Value,
    /// Result when it matches
    pub then: Value,
}

/// `column=CASE <arms> END`.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseColumn {
    /// Column being set
    pub column: String,
    /// Arms in order
    pub arms: Vec<CaseArm>,
}

impl CaseColumn {
    /// Set `column` by matching `test_column` against `when[i]`, yielding `then[i]`.
    pub fn new<W, T>(column: impl Into<String>, test_column: impl Into<String>, when: W, then: T) -> Self
    where
        W: IntoIterator,
        W::Item: Into<Value>,
        T: IntoIterator,
        T::Item: Into<Value>,
    {
        let test_column = test_column.into();
        let arms = when
            .into_iter()
            .zip(then)
            .map(|(value, then)| CaseArm {
                column: test_column.clone(),
                value: value.into(),
                then: then.into(),
            })
            .collect();
        Self {
            column: column.into(),
            arms,
        }
    }
}

impl FromDescription for UpdateAlgorithm {
    fn from_description(description: &Json) -> Result<Self, CompileError> {
        match description {
            Json::String(text) => Ok(UpdateAlgorithm::Raw(text.clone())),
            Json::Array(items) => items
                .iter()
                .map(|item| match item {
                    Json::String(s) => Ok(s.clone()),
                    other => Err(CompileError::mismatch("update", "column string", other)),
                })
                .collect::<Result<_, _>>()
                .map(UpdateAlgorithm::Columns),
            Json::Object(map) => match map.get("clause") {
                None => map
                    .iter()
                    .map(|(key, value)| {
                        Value::from_json(value)
                            .map(|v| (key.clone(), v))
                            .ok_or_else(|| CompileError::mismatch("update", "scalar value", value))
                    })
                    .collect::<Result<_, _>>()
                    .map(UpdateAlgorithm::Inline),
                Some(Json::String(clause)) => Ok(UpdateAlgorithm::Raw(clause.clone())),
                Some(Json::Object(clause)) => match clause.get("CASE") {
                    Some(Json::Object(columns)) => describe_case(columns).map(UpdateAlgorithm::Case),
                    _ => Err(CompileError::UnrecognizedClause {
                        algorithm: "update",
                        clause: description.to_string(),
                    }),
                },
                Some(other) => Err(CompileError::mismatch("update", "clause string or CASE object", other)),
            },
            other => Err(CompileError::mismatch("update", "array, string or object", other)),
        }
    }
}

fn describe_case(columns: &serde_json::Map<String, Json>) -> Result<Vec<CaseColumn>, CompileError> {
    let mut out = Vec::with_capacity(columns.len());
    for (column, spec) in columns {
        let when = match spec.get("WHEN") {
            Some(Json::Object(when)) => when,
            other => {
                return Err(CompileError::mismatch(
                    "update",
                    "WHEN object",
                    other.unwrap_or(&Json::Null),
                ))
            }
        };
        let then = match when.get("THEN") {
            Some(Json::Array(then)) => then,
            other => {
                return Err(CompileError::mismatch(
                    "update",
                    "THEN array",
                    other.unwrap_or(&Json::Null),
                ))
            }
        };
        let mut arms = Vec::new();
        for (test_column, values) in when.iter().filter(|(k, _)| k.as_str() != "THEN") {
            let values = match values {
                Json::Array(values) => values,
                other => return Err(CompileError::mismatch("update", "WHEN value array", other)),
            };
            if values.len() != then.len() {
                return Err(CompileError::TypeMismatch {
                    algorithm: "update",
                    expected: format!("{} THEN values", values.len()),
                    actual: format!("{} THEN values", then.len()),
                });
            }
            for (value, result) in values.iter().zip(then) {
                let value = Value::from_json(value)
                    .ok_or_else(|| CompileError::mismatch("update", "scalar WHEN value", value))?;
                let result = Value::from_json(result)
                    .ok_or_else(|| CompileError::mismatch("update", "scalar THEN value", result))?;
                arms.push(CaseArm {
                    column: test_column.clone(),
                    value,
                    then: result,
                });
            }
        }
        out.push(CaseColumn {
            column: column.clone(),
            arms,
        });
    }
    Ok(out)
}

// ============================================================================
// Select grammar
// ============================================================================

/// Shapes of a select column list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectAlgorithm {
    /// `*`
    All,
    /// Column expressions joined with commas
    Columns(Vec<String>),
    /// Raw column list text
    Raw(String),
}

impl Default for SelectAlgorithm {
    fn default() -> Self {
        SelectAlgorithm::All
    }
}

impl From<&str> for SelectAlgorithm {
    fn from(text: &str) -> Self {
        match text {
            "*" => SelectAlgorithm::All,
            raw => SelectAlgorithm::Raw(raw.to_string()),
        }
    }
}

impl FromDescription for SelectAlgorithm {
    fn from_description(description: &Json) -> Result<Self, CompileError> {
        match description {
            Json::String(text) => Ok(SelectAlgorithm::from(text.as_str())),
            Json::Array(items) => items
                .iter()
                .map(|item| match item {
                    Json::String(s) => Ok(s.clone()),
                    other => Err(CompileError::mismatch("select", "column string", other)),
                })
                .collect::<Result<_, _>>()
                .map(SelectAlgorithm::Columns),
            other => Err(CompileError::mismatch("select", "string or array", other)),
        }
    }
}
