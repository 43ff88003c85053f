use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{Identity, Session, Transition, reduce};
use crate::account::{AccountRecord, AccountService, NewAccount};
use crate::error::{AuthError, AuthResult};
use crate::storage::{AUTHENTICATED_KEY, ContinuityStore, IDENTITY_KEY};

/// Session behaviour that varies between deployments.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Whether [`SessionStore::skip`] may sign in the guest identity.
    /// Off in release builds unless configured.
    pub allow_skip: bool,
    /// Identity restored when the continuity flag survived but the
    /// identity record did not.
    pub fallback_identity: Identity,
    pub guest_identity: Identity,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            allow_skip: cfg!(debug_assertions),
            fallback_identity: Identity::fallback_admin(),
            guest_identity: Identity::guest(),
        }
    }
}

/// Owner of the authentication state.
///
/// Construct one at application start and hand references to whatever
/// needs to read or change the session. Readers get snapshots via
/// [`snapshot`](Self::snapshot) or a [`watch::Receiver`] via
/// [`subscribe`](Self::subscribe); every change goes through [`reduce`].
///
/// Sign-in requests are sequenced: each `sign_in`, `skip`, `sign_out` and
/// `teardown` takes a ticket, and a sign-in that completes after a newer
/// ticket was issued is discarded with [`AuthError::Superseded`].
pub struct SessionStore<S, A> {
    config: SessionConfig,
    storage: S,
    accounts: A,
    state: watch::Sender<Session>,
    initialized: AtomicBool,
    sequence: AtomicU64,
}

impl<S: ContinuityStore, A: AccountService> SessionStore<S, A> {
    pub fn new(config: SessionConfig, storage: S, accounts: A) -> Self {
        let (state, _) = watch::channel(Session::loading());
        Self {
            config,
            storage,
            accounts,
            state,
            initialized: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn accounts(&self) -> &A {
        &self.accounts
    }

    /// Current state.
    pub fn snapshot(&self) -> Session {
        self.state.borrow().clone()
    }

    /// Receiver that observes every subsequent transition.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Resolve the initial status from persisted continuity evidence.
    ///
    /// Only the first call has any effect; later calls return the current
    /// snapshot untouched.
    pub fn initialize(&self) -> Session {
        if self.initialized.swap(true, Ordering::SeqCst) {
            debug!("Session already initialized, ignoring");
            return self.snapshot();
        }

        let authenticated = match self.storage.get(AUTHENTICATED_KEY) {
            Ok(flag) => flag.as_deref() == Some("true"),
            Err(e) => {
                warn!("Failed to read continuity flag: {}, assuming signed out", e);
                false
            }
        };

        let user = authenticated.then(|| self.restore_identity());
        self.dispatch(Transition::Initialize(user))
    }

    /// Authenticate against the account service.
    ///
    /// Nothing changes on failure. On success the continuity evidence is
    /// written (failures there are only logged) and the session moves to
    /// authenticated.
    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<Identity> {
        let ticket = self.next_ticket();

        let identity = match self.authenticate(email, password).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!("Sign-in failed for {}: {}", email, e);
                return Err(e);
            }
        };

        if !self.is_latest(ticket) {
            info!("Discarding superseded sign-in for {}", email);
            return Err(AuthError::Superseded);
        }

        self.persist_continuity(&identity);
        self.dispatch(Transition::SignIn(identity.clone()));
        Ok(identity)
    }

    /// Provision a new account. Does not sign in.
    pub async fn sign_up(&self, email: &str, name: &str, password: &str) -> AuthResult<AccountRecord> {
        match self.provision(email, name, password).await {
            Ok(account) => {
                info!("Account created for {}", account.email);
                Ok(account)
            }
            Err(e) => {
                warn!("Sign-up failed for {}: {}", email, e);
                Err(e)
            }
        }
    }

    /// Forget the session, including its persisted evidence. Any sign-in
    /// still in flight is discarded when it completes.
    pub fn sign_out(&self) -> Session {
        self.next_ticket();
        self.clear_continuity();
        self.dispatch(Transition::SignOut)
    }

    /// Sign in the guest identity without credentials.
    pub fn skip(&self) -> AuthResult<Identity> {
        if !self.config.allow_skip {
            warn!("Skip requested but disabled");
            return Err(AuthError::SkipDisabled);
        }

        self.next_ticket();
        let guest = self.config.guest_identity.clone();
        self.persist_continuity(&guest);
        self.dispatch(Transition::SignIn(guest.clone()));
        Ok(guest)
    }

    /// Reset the published state at application stop. Persisted evidence
    /// is kept so the next start can restore it; this store will not
    /// initialize again.
    pub fn teardown(&self) {
        self.next_ticket();
        self.initialized.store(true, Ordering::SeqCst);
        self.state.send_replace(Session::default());
        debug!("Session store torn down");
    }

    async fn authenticate(&self, email: &str, password: &str) -> AuthResult<Identity> {
        let account = self
            .accounts
            .find_account_by_email(email)
            .await?
            .ok_or(AuthError::AccountNotFound)?;

        if !self.accounts.verify_credentials(email, password).await? {
            return Err(AuthError::InvalidCredentials);
        }

        Ok(Identity::from(account))
    }

    async fn provision(&self, email: &str, name: &str, password: &str) -> AuthResult<AccountRecord> {
        if self.accounts.find_account_by_email(email).await?.is_some() {
            return Err(AuthError::AccountAlreadyExists);
        }

        self.accounts
            .create_account(&NewAccount {
                email: email.to_string(),
                name: name.to_string(),
                password: password.to_string(),
            })
            .await
    }

    fn dispatch(&self, transition: Transition) -> Session {
        let name = transition.name();
        self.state
            .send_modify(|state| *state = reduce(state, transition));
        let snapshot = self.snapshot();
        info!(transition = name, status = %snapshot.status(), "Session transition");
        snapshot
    }

    fn next_ticket(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_latest(&self, ticket: u64) -> bool {
        self.sequence.load(Ordering::SeqCst) == ticket
    }

    fn restore_identity(&self) -> Identity {
        match self.storage.get(IDENTITY_KEY) {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(identity) => identity,
                Err(e) => {
                    warn!("Stored identity is unreadable: {}, using fallback", e);
                    self.config.fallback_identity.clone()
                }
            },
            Ok(None) => {
                debug!("No stored identity, using fallback");
                self.config.fallback_identity.clone()
            }
            Err(e) => {
                warn!("Failed to read stored identity: {}, using fallback", e);
                self.config.fallback_identity.clone()
            }
        }
    }

    fn persist_continuity(&self, identity: &Identity) {
        if let Err(e) = self.storage.set(AUTHENTICATED_KEY, "true") {
            warn!("Failed to persist continuity flag: {}", e);
        }
        match serde_json::to_string(identity) {
            Ok(json) => {
                if let Err(e) = self.storage.set(IDENTITY_KEY, &json) {
                    warn!("Failed to persist identity: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize identity: {}", e),
        }
    }

    fn clear_continuity(&self) {
        for key in [AUTHENTICATED_KEY, IDENTITY_KEY] {
            if let Err(e) = self.storage.remove(key) {
                warn!("Failed to clear '{}': {}", key, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::session::Status;
    use crate::storage::MemoryContinuityStore;
    use std::sync::{Arc, Mutex};
    use tokio::sync::Notify;

    const ADMIN_EMAIL: &str = "admin@anbtech.co.kr";

    #[derive(Default)]
    struct FakeAccounts {
        accounts: Vec<(AccountRecord, &'static str)>,
        created: Mutex<Vec<NewAccount>>,
        gate: Option<Arc<Notify>>,
        lookup_down: bool,
        verify_down: bool,
    }

    impl FakeAccounts {
        fn with_admin() -> Self {
            Self {
                accounts: vec![(
                    AccountRecord {
                        id: "1".to_string(),
                        name: "admin".to_string(),
                        email: ADMIN_EMAIL.to_string(),
                        avatar: Some("/assets/avatars/avatar-anika-visser.png".to_string()),
                    },
                    "admin",
                )],
                ..Self::default()
            }
        }

        fn created(&self) -> Vec<NewAccount> {
            self.created.lock().unwrap().clone()
        }
    }

    impl AccountService for FakeAccounts {
        async fn find_account_by_email(&self, email: &str) -> AuthResult<Option<AccountRecord>> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.lookup_down {
                return Err(AuthError::Service("account lookup unavailable".to_string()));
            }
            Ok(self
                .accounts
                .iter()
                .find(|(a, _)| a.email == email)
                .map(|(a, _)| a.clone()))
        }

        async fn verify_credentials(&self, email: &str, password: &str) -> AuthResult<bool> {
            if self.verify_down {
                return Err(AuthError::Service("verification unavailable".to_string()));
            }
            Ok(self
                .accounts
                .iter()
                .any(|(a, pw)| a.email == email && *pw == password))
        }

        async fn create_account(&self, account: &NewAccount) -> AuthResult<AccountRecord> {
            self.created.lock().unwrap().push(account.clone());
            Ok(AccountRecord {
                id: "2".to_string(),
                name: account.name.clone(),
                email: account.email.clone(),
                avatar: None,
            })
        }
    }

    struct BrokenStorage;

    impl ContinuityStore for BrokenStorage {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError(anyhow::anyhow!("storage disabled")))
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError(anyhow::anyhow!("storage disabled")))
        }

        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError(anyhow::anyhow!("storage disabled")))
        }
    }

    type TestStore = SessionStore<Arc<MemoryContinuityStore>, FakeAccounts>;

    fn test_config() -> SessionConfig {
        SessionConfig {
            allow_skip: true,
            ..SessionConfig::default()
        }
    }

    fn store_with(storage: Arc<MemoryContinuityStore>, accounts: FakeAccounts) -> TestStore {
        SessionStore::new(test_config(), storage, accounts)
    }

    fn initialized_store() -> (TestStore, Arc<MemoryContinuityStore>) {
        let storage = Arc::new(MemoryContinuityStore::new());
        let store = store_with(storage.clone(), FakeAccounts::with_admin());
        store.initialize();
        (store, storage)
    }

    #[test]
    fn test_new_store_is_loading() {
        let store = store_with(Arc::default(), FakeAccounts::default());
        let session = store.snapshot();
        assert_eq!(session.status(), Status::Loading);
        assert!(session.is_loading());
        assert!(!store.is_initialized());
    }

    #[test]
    fn test_initialize_without_flag() {
        let store = store_with(Arc::default(), FakeAccounts::default());
        let session = store.initialize();
        assert_eq!(session.status(), Status::Unauthenticated);
        assert!(session.user().is_none());
        assert!(store.is_initialized());
    }

    #[test]
    fn test_initialize_restores_stored_identity() {
        let storage = Arc::new(MemoryContinuityStore::new());
        storage.set(AUTHENTICATED_KEY, "true").unwrap();
        storage
            .set(IDENTITY_KEY, &serde_json::to_string(&Identity::guest()).unwrap())
            .unwrap();

        let store = store_with(storage, FakeAccounts::default());
        let session = store.initialize();
        assert!(session.is_authenticated());
        assert_eq!(session.user(), Some(&Identity::guest()));
    }

    #[test]
    fn test_initialize_flag_without_identity_uses_fallback() {
        let storage = Arc::new(MemoryContinuityStore::new());
        storage.set(AUTHENTICATED_KEY, "true").unwrap();
        storage.set(IDENTITY_KEY, "{broken").unwrap();

        let store = store_with(storage, FakeAccounts::default());
        let session = store.initialize();
        assert_eq!(session.user(), Some(&Identity::fallback_admin()));
    }

    #[test]
    fn test_initialize_ignores_non_true_flag() {
        let storage = Arc::new(MemoryContinuityStore::new());
        storage.set(AUTHENTICATED_KEY, "yes").unwrap();

        let store = store_with(storage, FakeAccounts::default());
        assert_eq!(store.initialize().status(), Status::Unauthenticated);
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let storage = Arc::new(MemoryContinuityStore::new());
        let store = store_with(storage.clone(), FakeAccounts::default());

        let first = store.initialize();
        // Evidence appearing later must not be picked up by a second call
        storage.set(AUTHENTICATED_KEY, "true").unwrap();
        let second = store.initialize();

        assert_eq!(first, second);
        assert_eq!(second.status(), Status::Unauthenticated);
    }

    #[test]
    fn test_initialize_survives_storage_failure() {
        let store = SessionStore::new(test_config(), BrokenStorage, FakeAccounts::default());
        let session = store.initialize();
        assert_eq!(session.status(), Status::Unauthenticated);
    }

    #[tokio::test]
    async fn test_sign_in_admin() {
        let (store, storage) = initialized_store();

        let identity = store.sign_in(ADMIN_EMAIL, "admin").await.unwrap();
        assert_eq!(identity.email, ADMIN_EMAIL);
        assert_eq!(identity.id, "1");

        let session = store.snapshot();
        assert!(session.is_authenticated());
        assert_eq!(session.user(), Some(&identity));
        assert_eq!(storage.get(AUTHENTICATED_KEY).unwrap().as_deref(), Some("true"));

        let stored: Identity =
            serde_json::from_str(&storage.get(IDENTITY_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(stored, identity);
    }

    #[tokio::test]
    async fn test_sign_in_unknown_account() {
        let (store, storage) = initialized_store();
        let before = store.snapshot();

        let err = store.sign_in("unknown@x.com", "anything").await.unwrap_err();
        assert_eq!(err, AuthError::AccountNotFound);
        assert_eq!(store.snapshot(), before);
        assert_eq!(storage.get(AUTHENTICATED_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_sign_in_wrong_password() {
        let (store, storage) = initialized_store();
        let before = store.snapshot();

        let err = store.sign_in(ADMIN_EMAIL, "wrongpass").await.unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials);
        assert_eq!(store.snapshot(), before);
        assert_eq!(storage.get(AUTHENTICATED_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_sign_in_account_service_failure_changes_nothing() {
        for accounts in [
            FakeAccounts {
                lookup_down: true,
                ..FakeAccounts::with_admin()
            },
            FakeAccounts {
                verify_down: true,
                ..FakeAccounts::with_admin()
            },
        ] {
            let storage = Arc::new(MemoryContinuityStore::new());
            let store = store_with(storage.clone(), accounts);
            store.initialize();
            let before = store.snapshot();

            let err = store.sign_in(ADMIN_EMAIL, "admin").await.unwrap_err();
            assert!(matches!(err, AuthError::Service(_)), "got {:?}", err);
            assert_eq!(store.snapshot(), before);
            assert_eq!(storage.get(AUTHENTICATED_KEY).unwrap(), None);
            assert_eq!(storage.get(IDENTITY_KEY).unwrap(), None);
        }
    }

    #[tokio::test]
    async fn test_sign_in_before_initialize() {
        let storage = Arc::new(MemoryContinuityStore::new());
        let store = store_with(storage, FakeAccounts::with_admin());
        assert_eq!(store.snapshot().status(), Status::Loading);

        let identity = store.sign_in(ADMIN_EMAIL, "admin").await.unwrap();
        let signed_in = store.snapshot();
        assert_eq!(signed_in.status(), Status::Authenticated);

        // Resolving afterwards leaves the signed-in session alone
        let session = store.initialize();
        assert_eq!(session, signed_in);
        assert_eq!(session.user(), Some(&identity));
        assert!(store.is_initialized());
    }

    #[tokio::test]
    async fn test_sign_in_with_broken_storage_still_authenticates() {
        let store = SessionStore::new(test_config(), BrokenStorage, FakeAccounts::with_admin());
        store.initialize();

        store.sign_in(ADMIN_EMAIL, "admin").await.unwrap();
        assert!(store.snapshot().is_authenticated());

        // Sign-out must not fail either
        assert_eq!(store.sign_out().status(), Status::Unauthenticated);
    }

    #[tokio::test]
    async fn test_sign_out_clears_session_and_evidence() {
        let (store, storage) = initialized_store();
        store.sign_in(ADMIN_EMAIL, "admin").await.unwrap();

        let session = store.sign_out();
        assert_eq!(session.status(), Status::Unauthenticated);
        assert!(session.user().is_none());
        assert_eq!(storage.get(AUTHENTICATED_KEY).unwrap(), None);
        assert_eq!(storage.get(IDENTITY_KEY).unwrap(), None);

        // A fresh store over the same storage starts signed out
        let restarted = store_with(storage, FakeAccounts::with_admin());
        assert_eq!(restarted.initialize().status(), Status::Unauthenticated);
    }

    #[tokio::test]
    async fn test_sign_in_survives_restart() {
        let (store, storage) = initialized_store();
        let identity = store.sign_in(ADMIN_EMAIL, "admin").await.unwrap();
        store.teardown();

        let restarted = store_with(storage, FakeAccounts::with_admin());
        let session = restarted.initialize();
        assert!(session.is_authenticated());
        assert_eq!(session.user(), Some(&identity));
    }

    #[tokio::test]
    async fn test_sign_up_existing_account() {
        let (store, _) = initialized_store();

        let err = store.sign_up(ADMIN_EMAIL, "Admin", "pw").await.unwrap_err();
        assert_eq!(err, AuthError::AccountAlreadyExists);
        assert!(store.accounts().created().is_empty());
    }

    #[tokio::test]
    async fn test_sign_up_creates_without_signing_in() {
        let (store, storage) = initialized_store();

        let account = store.sign_up("new@anbtech.co.kr", "New", "pw").await.unwrap();
        assert_eq!(account.email, "new@anbtech.co.kr");
        assert_eq!(
            store.accounts().created(),
            vec![NewAccount {
                email: "new@anbtech.co.kr".to_string(),
                name: "New".to_string(),
                password: "pw".to_string(),
            }]
        );
        assert_eq!(store.snapshot().status(), Status::Unauthenticated);
        assert_eq!(storage.get(AUTHENTICATED_KEY).unwrap(), None);
    }

    #[test]
    fn test_skip_signs_in_guest() {
        let (store, storage) = initialized_store();

        store.skip().unwrap();
        let session = store.snapshot();
        assert!(session.is_authenticated());
        assert_eq!(session.user().map(|u| u.name.as_str()), Some("SKIP"));
        assert_eq!(storage.get(AUTHENTICATED_KEY).unwrap().as_deref(), Some("true"));
    }

    #[test]
    fn test_skip_disabled() {
        let config = SessionConfig {
            allow_skip: false,
            ..SessionConfig::default()
        };
        let store = SessionStore::new(config, MemoryContinuityStore::new(), FakeAccounts::default());
        store.initialize();

        assert_eq!(store.skip().unwrap_err(), AuthError::SkipDisabled);
        assert!(!store.snapshot().is_authenticated());
    }

    #[tokio::test]
    async fn test_sign_out_discards_in_flight_sign_in() {
        let gate = Arc::new(Notify::new());
        let accounts = FakeAccounts {
            gate: Some(gate.clone()),
            ..FakeAccounts::with_admin()
        };
        let storage = Arc::new(MemoryContinuityStore::new());
        let store = store_with(storage.clone(), accounts);
        store.initialize();

        let (result, _) = tokio::join!(store.sign_in(ADMIN_EMAIL, "admin"), async {
            store.sign_out();
            gate.notify_one();
        });

        assert_eq!(result.unwrap_err(), AuthError::Superseded);
        assert_eq!(store.snapshot().status(), Status::Unauthenticated);
        assert_eq!(storage.get(AUTHENTICATED_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_latest_request_wins() {
        let gate = Arc::new(Notify::new());
        let accounts = FakeAccounts {
            gate: Some(gate.clone()),
            ..FakeAccounts::with_admin()
        };
        let store = store_with(Arc::default(), accounts);
        store.initialize();

        // The slow sign-in started first, skip was issued after it
        let (result, _) = tokio::join!(store.sign_in(ADMIN_EMAIL, "admin"), async {
            store.skip().unwrap();
            gate.notify_one();
        });

        assert_eq!(result.unwrap_err(), AuthError::Superseded);
        assert_eq!(
            store.snapshot().user().map(|u| u.id.as_str()),
            Some("SkipID")
        );
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let (store, _) = initialized_store();
        let mut rx = store.subscribe();
        assert_eq!(rx.borrow_and_update().status(), Status::Unauthenticated);

        store.sign_in(ADMIN_EMAIL, "admin").await.unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_authenticated());

        store.sign_out();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().status(), Status::Unauthenticated);
    }

    #[test]
    fn test_teardown_resets_and_blocks_reinitialize() {
        let storage = Arc::new(MemoryContinuityStore::new());
        storage.set(AUTHENTICATED_KEY, "true").unwrap();
        let store = store_with(storage, FakeAccounts::default());
        store.initialize();

        store.teardown();
        assert_eq!(store.snapshot(), Session::default());
        assert_eq!(store.initialize(), Session::default());
    }
}
