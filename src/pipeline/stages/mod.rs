pub mod publish;
pub mod query;
pub mod transform;

pub use publish::PublishStage;
pub use query::QueryStage;
pub use transform::{render_csv, TransformStage, CSV_COLUMNS, LIST_ESCAPE, LIST_SEPARATOR};
