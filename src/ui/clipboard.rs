//! System clipboard backed by arboard

use tracing::debug;

use crate::core::surface::Clipboard;

/// Clipboard of the desktop session, opened on first use
#[derive(Default)]
pub struct SystemClipboard {
    inner: Option<arboard::Clipboard>,
}

impl SystemClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&mut self) -> Option<&mut arboard::Clipboard> {
        if self.inner.is_none() {
            match arboard::Clipboard::new() {
                Ok(clipboard) => self.inner = Some(clipboard),
                Err(e) => {
                    debug!("Clipboard unavailable: {}", e);
                    return None;
                }
            }
        }
        self.inner.as_mut()
    }
}

impl Clipboard for SystemClipboard {
    fn get_text(&mut self) -> Option<String> {
        match self.inner()?.get_text() {
            Ok(text) => Some(text),
            Err(e) => {
                debug!("Clipboard read failed: {}", e);
                None
            }
        }
    }

    fn set_text(&mut self, text: &str) -> bool {
        let Some(clipboard) = self.inner() else {
            return false;
        };
        match clipboard.set_text(text) {
            Ok(()) => true,
            Err(e) => {
                debug!("Clipboard write failed: {}", e);
                false
            }
        }
    }
}
