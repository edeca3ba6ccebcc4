//! Console front end.
//!
//! - **keymapper**: Key presses to shell input sequences
//! - **host_surface**: `Surface` that passes shell output through to the console
//! - **clipboard**: System clipboard access

pub mod clipboard;
pub mod host_surface;
pub mod keymapper;

pub use clipboard::SystemClipboard;
pub use host_surface::{HostSurface, SurfaceHandle};
pub use keymapper::KeyMapper;
