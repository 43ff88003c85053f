//! Session state and the transition function that drives it.
//!
//! A [`Session`] is an immutable snapshot. The only way to get a new one is
//! [`reduce`], which applies a [`Transition`] to the previous snapshot. The
//! [`SessionStore`] owns the current snapshot and publishes every change.

mod store;

pub use store::{SessionConfig, SessionStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::account::AccountRecord;

const DEFAULT_AVATAR: &str = "/assets/avatars/avatar-anika-visser.png";

/// The signed-in user as seen by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl Identity {
    /// Identity restored when the continuity flag is set but no identity
    /// record survived.
    pub fn fallback_admin() -> Self {
        Self {
            id: "admin".to_string(),
            name: "admin".to_string(),
            email: "admin@anbtech.co.kr".to_string(),
            avatar: Some(DEFAULT_AVATAR.to_string()),
        }
    }

    /// Identity used by the guest bypass.
    pub fn guest() -> Self {
        Self {
            id: "SkipID".to_string(),
            name: "SKIP".to_string(),
            email: "SKIP@anbtech.co.kr".to_string(),
            avatar: Some(DEFAULT_AVATAR.to_string()),
        }
    }
}

impl From<AccountRecord> for Identity {
    fn from(account: AccountRecord) -> Self {
        Self {
            id: account.id,
            name: account.name,
            email: account.email,
            avatar: account.avatar,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// No store is running, or it has been torn down.
    #[default]
    Uninitialized,
    /// The store exists but has not read continuity evidence yet.
    Loading,
    Authenticated,
    Unauthenticated,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Uninitialized => write!(f, "uninitialized"),
            Status::Loading => write!(f, "loading"),
            Status::Authenticated => write!(f, "authenticated"),
            Status::Unauthenticated => write!(f, "unauthenticated"),
        }
    }
}

/// Immutable snapshot of the authentication state.
///
/// `user` is present exactly when `status` is [`Status::Authenticated`];
/// fields are private so that only [`reduce`] can break that rule, and it
/// doesn't.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    status: Status,
    user: Option<Identity>,
    since: Option<DateTime<Utc>>,
}

impl Session {
    /// Snapshot of a store that has started but not resolved yet.
    pub fn loading() -> Self {
        Self {
            status: Status::Loading,
            ..Self::default()
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn user(&self) -> Option<&Identity> {
        self.user.as_ref()
    }

    /// When the status last resolved to authenticated or unauthenticated.
    pub fn since(&self) -> Option<DateTime<Utc>> {
        self.since
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == Status::Authenticated
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.status, Status::Uninitialized | Status::Loading)
    }

    fn authenticated(user: Identity) -> Self {
        Self {
            status: Status::Authenticated,
            user: Some(user),
            since: Some(Utc::now()),
        }
    }

    fn unauthenticated() -> Self {
        Self {
            status: Status::Unauthenticated,
            user: None,
            since: Some(Utc::now()),
        }
    }
}

/// A state change request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Resolve the initial status. Only valid while loading.
    Initialize(Option<Identity>),
    SignIn(Identity),
    SignOut,
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Initialize(_) => "INITIALIZE",
            Transition::SignIn(_) => "SIGN_IN",
            Transition::SignOut => "SIGN_OUT",
        }
    }
}

/// Apply `transition` to `state`, returning the next snapshot.
///
/// `Initialize` on a session that already resolved is ignored.
pub fn reduce(state: &Session, transition: Transition) -> Session {
    match (state.status, transition) {
        (Status::Uninitialized | Status::Loading, Transition::Initialize(Some(user))) => {
            Session::authenticated(user)
        }
        (Status::Uninitialized | Status::Loading, Transition::Initialize(None)) => {
            Session::unauthenticated()
        }
        (_, Transition::Initialize(_)) => state.clone(),
        (_, Transition::SignIn(user)) => Session::authenticated(user),
        (_, Transition::SignOut) => Session::unauthenticated(),
    }
}
