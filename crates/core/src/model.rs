//! The capability a selection compiles against.

use std::sync::Arc;

use crate::Value;

/// A row-shaped object bound to one table.
///
/// Implementations must keep `keys(f)` and `values(f)` the same length and
/// in the same order for a given flag, and stable across calls while the
/// model is not modified.
pub trait Model: Send + Sync {
    /// Stable table name.
    fn table_name(&self) -> &str;

    /// Ordered column names. With `exclude_id` the primary key is omitted.
    fn keys(&self, exclude_id: bool) -> Vec<String>;

    /// Current value for every column in [`Model::keys`], same order.
    fn values(&self, exclude_id: bool) -> Vec<Value>;
}

/// Models are shared between the caller, selections and query results.
pub type SharedModel = Arc<dyn Model>;
