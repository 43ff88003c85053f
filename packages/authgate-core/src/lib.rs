//! authgate core library
//!
//! Client-side authentication session handling for a web office shell:
//! - Session store (status, current identity, sign-in/sign-up/sign-out)
//! - Route guard (login redirect with a continuation parameter)
//! - Continuity storage (memory, file, keyring with file fallback)
//! - Account service client (HTTP)
//!
//! # Features
//!
//! - `keyring-storage`: Keep the continuity flag in the platform keyring
//!
//! # Example
//!
//! ```no_run
//! use authgate_core::{
//!     FileContinuityStore, GuardDecision, HttpAccountService, RouteGuard, SessionStore,
//! };
//!
//! # async fn run(navigator: impl authgate_core::Navigator) -> anyhow::Result<()> {
//! let config = authgate_core::config::load_config();
//! let store = SessionStore::new(
//!     config.session.clone(),
//!     FileContinuityStore::default_location()?,
//!     HttpAccountService::new(&config.api_url)?,
//! );
//! store.initialize();
//!
//! let mut guard = RouteGuard::new(config.guard.clone());
//! if guard.evaluate(&store.snapshot(), &navigator).await == GuardDecision::Render {
//!     println!("render the protected view");
//! }
//! # Ok(())
//! # }
//! ```

pub mod account;
pub mod config;
pub mod error;
pub mod guard;
pub mod navigation;
pub mod session;
pub mod storage;

// Re-export commonly used types
pub use account::{AccountRecord, AccountService, HttpAccountService, NewAccount};
pub use config::{AuthgateConfig, ConfigSource};
pub use error::{AuthError, AuthResult, NavigationError, StorageError};
pub use guard::{GuardConfig, GuardDecision, RouteGuard};
pub use navigation::{Navigator, Redirect};
pub use session::{Identity, Session, SessionConfig, SessionStore, Status, Transition, reduce};
pub use storage::{ContinuityStore, FileContinuityStore, MemoryContinuityStore};

#[cfg(feature = "keyring-storage")]
pub use storage::KeyringContinuityStore;
