//! Core session components.
//!
//! - **env**: Shell descriptors, working directory and environment for launches
//! - **event**: Listener registration, disposal and context indicators
//! - **timer**: Clock abstraction and deferred tasks
//! - **pty**: Pseudo-terminal backed shell processes
//! - **surface**: The terminal surface collaborator
//! - **keybinding**: Key chords resolved to host commands
//! - **notify**: User-facing diagnostics
//! - **session**: One shell attached to one surface
//! - **manager**: All live sessions and the active one
//!
//! # Architecture
//!
//! ```text
//! SessionManager
//! └── Session
//!     ├── ShellProcess (PTY I/O with the shell, reader thread)
//!     ├── Surface (rendering and input)
//!     └── TimerQueue (launch window, selection refresh)
//! ```

pub mod env;
pub mod event;
pub mod keybinding;
pub mod manager;
pub mod notify;
pub mod pty;
pub mod session;
pub mod surface;
pub mod timer;
