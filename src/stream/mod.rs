pub mod command;
pub mod content;

pub use command::CommandStreamManager;
pub use content::ToolContentStreamManager;
