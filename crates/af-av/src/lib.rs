//! # af-av
//!
//! External tools and the plumbing around them.
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find the packager and ffmpeg.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout
//!   and cancellation; output lines are forwarded to `tracing`.
//! - **Workspace management** ([`Workspace`]) -- per-asset working directory
//!   removed on drop.
//! - **Pipes** ([`pipe::Pipe`], unix only) -- named FIFOs fed by stream
//!   sources so the packager can read inputs without staging them.
//! - **Packaging** ([`packager`]) -- Shaka Packager stream descriptors and
//!   invocation.
//! - **Transmuxing** ([`transmux`]) -- ffmpeg demux of multi-track Smooth
//!   files.

pub mod command;
pub mod packager;
#[cfg(unix)]
pub mod pipe;
pub mod tools;
pub mod transmux;
pub mod workspace;

// ---- Re-exports for convenience ----

pub use command::{ToolCommand, ToolOutput, ToolRun};
pub use packager::{packager_args, run_packager, ManifestOutputs, PackagerStream};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry, FFMPEG, PACKAGER};
pub use transmux::{demuxed_name, TransmuxSource};
pub use workspace::Workspace;
