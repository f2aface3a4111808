//! Built-in notice filters.

mod context;
mod error_type;
mod root_directory;

pub use context::ContextFilter;
pub use error_type::ErrorTypeFilter;
pub use root_directory::RootDirectoryFilter;
