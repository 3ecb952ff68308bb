pub mod position;
pub mod row_event;
pub mod schema;
pub mod value;

pub use position::Position;
pub use row_event::RowEvent;
pub use schema::{ColumnDescriptor, TableKey, TableSchema};
pub use value::Value;
