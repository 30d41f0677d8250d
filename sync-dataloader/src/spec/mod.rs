//! The type system and query documents consumed by the executor.

mod field_type;
mod query;
mod schema;
mod selection;

pub use field_type::FieldType;
pub use query::Operation;
pub use query::OperationKind;
pub use query::Query;
pub use schema::FieldDefinition;
pub use schema::ObjectType;
pub use schema::Schema;
pub use selection::InputValue;
pub use selection::Selection;

pub use crate::error::SpecError;

pub(crate) const TYPENAME: &str = "__typename";
