//! User-facing diagnostics

use std::cell::RefCell;

use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Receives messages meant for the user
pub trait Notifier {
    fn show(&self, severity: Severity, message: &str);
}

/// Notifier that only writes to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn show(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => info!("{}", message),
            Severity::Warning => warn!("{}", message),
            Severity::Error => error!("{}", message),
        }
    }
}

/// Logs every message and keeps warnings and errors until taken.
///
/// The console is owned by the shells while sessions run, so these are
/// shown once the host screen is restored.
#[derive(Debug, Default)]
pub struct DeferredNotifier {
    held: RefCell<Vec<(Severity, String)>>,
}

impl DeferredNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<(Severity, String)> {
        std::mem::take(&mut *self.held.borrow_mut())
    }
}

impl Notifier for DeferredNotifier {
    fn show(&self, severity: Severity, message: &str) {
        LogNotifier.show(severity, message);
        if severity != Severity::Info {
            self.held.borrow_mut().push((severity, message.to_string()));
        }
    }
}
