//! Route guard for protected views.
//!
//! One [`RouteGuard`] per mount of a protected view. It decides once,
//! after the router is ready and the session has resolved, whether to
//! release its children or send the user to the login page. A later
//! sign-out while mounted does not trigger another redirect; the next
//! mount gets a fresh guard.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::navigation::{Navigator, Redirect};
use crate::session::Session;

const DEFAULT_LOGIN_PATH: &str = "/auth/login";
const DEFAULT_CONTINUE_PARAM: &str = "continueUrl";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardConfig {
    /// Login entry point.
    pub login_path: String,
    /// Query parameter carrying the original destination.
    pub continue_param: String,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            continue_param: DEFAULT_CONTINUE_PARAM.to_string(),
        }
    }
}

impl GuardConfig {
    /// Login redirect for an unauthenticated visit to `current_path`.
    pub fn login_redirect(&self, current_path: &str) -> Redirect {
        Redirect {
            pathname: self.login_path.clone(),
            continue_param: self.continue_param.clone(),
            // Continuing to the root would loop straight back here
            continue_to: (current_path != "/").then(|| current_path.to_string()),
        }
    }

    /// Where to go after a successful sign-in, given the continuation
    /// parameter from the login URL. Anything other than a local path
    /// falls back to the root.
    pub fn resume_path(&self, continue_to: Option<&str>) -> String {
        match continue_to {
            Some(path) if path.starts_with('/') && !path.starts_with("//") && !path.contains('\\') => {
                path.to_string()
            }
            Some(path) => {
                warn!("Ignoring non-local continuation target: {}", path);
                "/".to_string()
            }
            None => "/".to_string(),
        }
    }
}

/// Outcome of a guard evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GuardDecision {
    /// Nothing to render yet.
    Pending,
    /// Children may render.
    Render,
    /// The user was sent to the login page.
    Redirect { redirect: Redirect },
}

/// Per-mount guard state.
#[derive(Debug, Clone, Default)]
pub struct RouteGuard {
    config: GuardConfig,
    checked: bool,
    evaluated: bool,
}

impl RouteGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            config,
            checked: false,
            evaluated: false,
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// True once the guard has decided children may render.
    pub fn is_checked(&self) -> bool {
        self.checked
    }

    /// True once a decision has been made for this mount.
    pub fn is_evaluated(&self) -> bool {
        self.evaluated
    }

    /// Decide for this mount.
    ///
    /// Once a decision is made it sticks for the lifetime of this guard,
    /// whatever the router or session do afterwards. Before that, returns
    /// `Pending` without recording anything while the router is not ready
    /// or the session is still loading, so a later call re-evaluates.
    pub async fn evaluate<N: Navigator>(&mut self, session: &Session, navigator: &N) -> GuardDecision {
        if self.evaluated {
            return if self.checked {
                GuardDecision::Render
            } else {
                GuardDecision::Pending
            };
        }

        if !navigator.is_ready() {
            debug!("Router not ready, deferring guard");
            return GuardDecision::Pending;
        }

        if session.is_loading() {
            debug!("Session still loading, deferring guard");
            return GuardDecision::Pending;
        }

        self.evaluated = true;

        if !session.is_authenticated() {
            let redirect = self.config.login_redirect(&navigator.current_path());
            info!("Not authenticated, redirecting to {}", redirect);
            if let Err(e) = navigator.replace(&redirect).await {
                warn!("Redirect to {} failed: {}", redirect, e);
            }
            return GuardDecision::Redirect { redirect };
        }

        self.checked = true;
        GuardDecision::Render
    }

    /// Release `children` once checked.
    pub fn render<T>(&self, children: T) -> Option<T> {
        self.checked.then_some(children)
    }
}
