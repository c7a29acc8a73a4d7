pub mod document;
pub mod mapping;
pub mod procedure;

pub use document::*;
pub use mapping::*;
pub use procedure::*;
