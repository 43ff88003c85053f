//! Account service port and its HTTP backend.
//!
//! The session store never decides who may sign in. It asks the account
//! service whether an account exists and whether a password matches it.

use crate::error::{AuthError, AuthResult};
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::future::Future;
use std::time::Duration;

/// Account as returned by the account service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    #[serde(default, deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// Payload for account creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewAccount {
    pub email: String,
    pub name: String,
    pub password: String,
}

/// Legacy services return numeric ids
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

fn id_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<RawId>::deserialize(deserializer)? {
        Some(RawId::Text(s)) => s,
        Some(RawId::Number(n)) => n.to_string(),
        None => String::new(),
    })
}

/// External, network-backed account lookup and provisioning.
pub trait AccountService: Send + Sync {
    /// Look up an account by email. `Ok(None)` when no account matches.
    fn find_account_by_email(
        &self,
        email: &str,
    ) -> impl Future<Output = AuthResult<Option<AccountRecord>>> + Send;

    /// Check an email/password pair. `Ok(false)` when the service rejects it.
    fn verify_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = AuthResult<bool>> + Send;

    /// Create a new account.
    fn create_account(
        &self,
        account: &NewAccount,
    ) -> impl Future<Output = AuthResult<AccountRecord>> + Send;
}

// ============================================================================
// HTTP backend
// ============================================================================

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// Account service reached over HTTP.
///
/// Endpoints, relative to the API base URL:
/// - `GET users/email/{email}`: 200 with the account, 404 or an empty email when absent
/// - `POST users/verify`: 200 when the pair matches, 401/403 when rejected
/// - `POST users`: 2xx with the created account, 409 when the email is taken
#[derive(Debug, Clone)]
pub struct HttpAccountService {
    base_url: String,
    client: reqwest::Client,
}

impl HttpAccountService {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .with_context(|| format!("Invalid API URL: {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|()| anyhow::anyhow!("API URL cannot be a base: {}", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn fetch_account(&self, email: &str) -> Result<Option<AccountRecord>> {
        let url = self.endpoint(&["users", "email", email])?;

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to look up account")?;

        match resp.status().as_u16() {
            404 => Ok(None),
            status if (200..300).contains(&status) => {
                let body = resp.text().await.context("Failed to read account response")?;
                if body.trim().is_empty() {
                    return Ok(None);
                }
                let account: Option<AccountRecord> =
                    serde_json::from_str(&body).context("Failed to parse account response")?;
                // The lookup endpoint answers 200 with an empty record for unknown emails
                Ok(account.filter(|a| !a.email.is_empty()))
            }
            _ => Err(anyhow::anyhow!("Server returned error: {}", resp.status())),
        }
    }

    async fn post_verify(&self, email: &str, password: &str) -> Result<bool> {
        let url = self.endpoint(&["users", "verify"])?;

        let resp = self
            .client
            .post(url)
            .json(&VerifyRequest { email, password })
            .send()
            .await
            .context("Failed to verify credentials")?;

        match resp.status().as_u16() {
            status if (200..300).contains(&status) => Ok(true),
            401 | 403 => Ok(false),
            _ => Err(anyhow::anyhow!("Server returned error: {}", resp.status())),
        }
    }

    async fn post_account(&self, account: &NewAccount) -> AuthResult<AccountRecord> {
        let url = self.endpoint(&["users"]).map_err(service_error)?;

        let resp = self
            .client
            .post(url)
            .json(account)
            .send()
            .await
            .context("Failed to create account")
            .map_err(service_error)?;

        let status = resp.status();
        if status.as_u16() == 409 {
            return Err(AuthError::AccountAlreadyExists);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::error!("Account creation failed: {} - {}", status, body);
            return Err(AuthError::Service(format!(
                "Server returned error: {} - {}",
                status, body
            )));
        }

        let body = resp
            .text()
            .await
            .context("Failed to read created account")
            .map_err(service_error)?;
        if body.trim().is_empty() {
            // Some deployments answer 201 with no body
            return Ok(AccountRecord {
                id: String::new(),
                name: account.name.clone(),
                email: account.email.clone(),
                avatar: None,
            });
        }
        serde_json::from_str(&body)
            .context("Failed to parse created account")
            .map_err(service_error)
    }
}

fn service_error(err: anyhow::Error) -> AuthError {
    AuthError::Service(format!("{:#}", err))
}

impl AccountService for HttpAccountService {
    async fn find_account_by_email(&self, email: &str) -> AuthResult<Option<AccountRecord>> {
        self.fetch_account(email).await.map_err(service_error)
    }

    async fn verify_credentials(&self, email: &str, password: &str) -> AuthResult<bool> {
        self.post_verify(email, password).await.map_err(service_error)
    }

    async fn create_account(&self, account: &NewAccount) -> AuthResult<AccountRecord> {
        self.post_account(account).await
    }
}
