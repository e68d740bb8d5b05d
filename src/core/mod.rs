pub mod consistency;
pub mod error;
pub mod value;

pub use consistency::{AccessKind, ConsistencyLevel};
pub use error::{MapperError, Result};
pub use value::{ColumnValue, Value};

use std::collections::BTreeMap;

/// A stored row keyed by column name, primary-key columns included.
pub type Row = BTreeMap<String, Value>;
