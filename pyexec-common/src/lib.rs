pub mod messages;
pub mod tool;

pub use messages::*;
pub use tool::*;

/// MCP protocol revision spoken by the server.
pub const PROTOCOL_VERSION: &str = "2024-11-05";
