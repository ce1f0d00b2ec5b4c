//! Built-in tools that can be handed to the tool-calling loop.

mod clock;
mod filesystem;

pub use clock::ClockTool;
pub use filesystem::FilesystemTool;
