//! Navigation collaborator port.

use crate::error::NavigationError;
use serde::Serialize;
use std::future::Future;

/// The router of the hosting application.
pub trait Navigator: Send + Sync {
    /// Path (with query) the user is currently on, e.g. `/dashboard?tab=2`.
    fn current_path(&self) -> String;

    /// Whether the router has resolved the current location.
    fn is_ready(&self) -> bool;

    /// Replace the current location without adding a history entry.
    fn replace(&self, redirect: &Redirect) -> impl Future<Output = Result<(), NavigationError>> + Send;
}

/// A login redirect carrying the originally requested destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Redirect {
    pub pathname: String,
    pub continue_param: String,
    /// Destination to resume after sign-in. `None` for the root path.
    pub continue_to: Option<String>,
}

impl Redirect {
    /// Full target such as `/auth/login?continueUrl=/dashboard`.
    ///
    /// The destination is percent-encoded as a query value, except for
    /// `/`, so it comes back intact from the login page's query string.
    pub fn target(&self) -> String {
        match &self.continue_to {
            Some(to) => format!(
                "{}?{}={}",
                self.pathname,
                urlencoding::encode(&self.continue_param),
                encode_continuation(to)
            ),
            None => self.pathname.clone(),
        }
    }
}

fn encode_continuation(path: &str) -> String {
    urlencoding::encode(path).replace("%2F", "/")
}

impl std::fmt::Display for Redirect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.target())
    }
}
