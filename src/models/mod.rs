pub mod document;
pub mod enums;
pub mod mapping;
pub mod procedure;

pub use document::Document;
pub use mapping::ProcedureMapping;
pub use procedure::{ProcedureBase, ProviderProcedure};
