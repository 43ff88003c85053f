//! Terminal stand-in for the browser router.
//!
//! `authgate visit <path>` mounts a route guard at `path`. Redirects are
//! not followed; they are recorded so the command can report them.

use authgate_core::{NavigationError, Navigator, Redirect};
use std::sync::Mutex;

pub struct TerminalNavigator {
    path: String,
    redirects: Mutex<Vec<Redirect>>,
}

impl TerminalNavigator {
    pub fn at(path: &str) -> Self {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        Self {
            path,
            redirects: Mutex::new(Vec::new()),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last redirect issued, if any.
    pub fn last_redirect(&self) -> Option<Redirect> {
        self.redirects.lock().ok()?.last().cloned()
    }
}

impl Navigator for TerminalNavigator {
    fn current_path(&self) -> String {
        self.path.clone()
    }

    fn is_ready(&self) -> bool {
        // The path is known up front
        true
    }

    async fn replace(&self, redirect: &Redirect) -> Result<(), NavigationError> {
        tracing::debug!("Navigating to {}", redirect);
        self.redirects
            .lock()
            .map_err(|_| NavigationError("navigator lock poisoned".to_string()))?
            .push(redirect.clone());
        Ok(())
    }
}
