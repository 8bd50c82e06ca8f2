use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use parking_lot::RwLock;
use reqwest::blocking::Client as HttpClient;
use url::Url;

use crate::api::{self, BearerToken, RegisterRequest, TokenProvider, UserAccount};
use crate::storage::{self, Account, Token};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("account not found")]
    AccountNotFound,
    #[error("token not found")]
    TokenNotFound,
    #[error("session expired, sign in again")]
    TokenExpired,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub account: Account,
    pub token: Token,
}

/// Credential exchange against the survey API: password login, registration
/// and resuming a stored token. The backend issues bare JWTs, so resuming is
/// just an expiry check; there is nothing to refresh.
pub struct Flow {
    store: Arc<storage::Store>,
    base_url: Url,
    user_agent: String,
    http: HttpClient,
}

impl Flow {
    pub fn new(store: Arc<storage::Store>, base_url: &str, user_agent: &str) -> Result<Self> {
        if user_agent.trim().is_empty() {
            bail!("session: user agent required");
        }
        let base_url = Url::parse(base_url).context("session: parse base url")?;
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .context("session: build http client")?;
        Ok(Self {
            store,
            base_url,
            user_agent: user_agent.to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn login(&self, email: &str, password: &str) -> Result<Session> {
        let email = email.trim();
        if email.is_empty() {
            bail!("session: email required");
        }
        let bearer = api::login(&self.http, &self.base_url, &self.user_agent, email, password)?;

        // The login response only carries the token; fetch /me for the
        // account identity before persisting anything.
        let provider: Arc<dyn TokenProvider> = Arc::new(StaticTokenProvider {
            token: bearer.clone(),
        });
        let client = api::Client::new(
            provider,
            api::ClientConfig {
                user_agent: self.user_agent.clone(),
                base_url: Some(self.base_url.to_string()),
                http_client: Some(self.http.clone()),
            },
        )?;
        let me = client.me().context("session: fetch signed-in profile")?;

        let account_id = self.store.upsert_account(Account {
            id: 0,
            remote_id: me.user.id,
            email: me.user.email.clone(),
            display_name: display_name(&me.user),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })?;
        let token = Token {
            account_id,
            access_token: bearer.access_token,
            token_type: normalized_token_type(&bearer.token_type),
            expires_at: None,
        };
        self.store.upsert_token(token.clone())?;

        let account = self
            .store
            .get_account_by_id(account_id)?
            .ok_or(SessionError::AccountNotFound)?;
        Ok(Session { account, token })
    }

    pub fn register(&self, request: &RegisterRequest) -> Result<UserAccount> {
        api::register(&self.http, &self.base_url, &self.user_agent, request)
    }

    pub fn resume(&self, account: Account, token: Token) -> Result<Session> {
        if let Some(expires_at) = token.expires_at {
            if expires_at <= Utc::now() {
                bail!(SessionError::TokenExpired);
            }
        }
        Ok(Session { account, token })
    }
}

fn display_name(user: &UserAccount) -> String {
    match user.surname.as_deref() {
        Some(surname) if !surname.trim().is_empty() => {
            format!("{} {}", user.name.trim(), surname.trim())
        }
        _ => user.name.trim().to_string(),
    }
}

fn normalized_token_type(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        "bearer".to_string()
    } else {
        trimmed.to_ascii_lowercase()
    }
}

struct StaticTokenProvider {
    token: BearerToken,
}

impl TokenProvider for StaticTokenProvider {
    fn token(&self) -> Result<BearerToken> {
        Ok(self.token.clone())
    }
}

struct StoredTokenProvider {
    store: Arc<storage::Store>,
    account_id: i64,
}

impl TokenProvider for StoredTokenProvider {
    fn token(&self) -> Result<BearerToken> {
        let token = self
            .store
            .get_token(self.account_id)?
            .ok_or(SessionError::TokenNotFound)?;
        if let Some(expires_at) = token.expires_at {
            if expires_at <= Utc::now() {
                bail!(SessionError::TokenExpired);
            }
        }
        Ok(BearerToken {
            access_token: token.access_token,
            token_type: token.token_type,
        })
    }
}

pub struct Manager {
    store: Arc<storage::Store>,
    flow: Arc<Flow>,
    sessions: RwLock<HashMap<i64, Session>>,
    active_id: RwLock<Option<i64>>,
}

impl Manager {
    pub fn new(store: Arc<storage::Store>, flow: Arc<Flow>) -> Result<Self> {
        Ok(Self {
            store,
            flow,
            sessions: RwLock::new(HashMap::new()),
            active_id: RwLock::new(None),
        })
    }

    pub fn load_existing(&self) -> Result<()> {
        let accounts = self.store.list_accounts()?;
        for account in accounts {
            if let Some(token) = self.store.get_token(account.id)? {
                match self.flow.resume(account.clone(), token) {
                    Ok(session) => {
                        self.sessions.write().insert(account.id, session);
                        if self.active_id.read().is_none() {
                            *self.active_id.write() = Some(account.id);
                        }
                    }
                    Err(_) => {
                        // Expired token; drop it so the next start is clean.
                        let _ = self.store.delete_token(account.id);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn active(&self) -> Option<Session> {
        let sessions = self.sessions.read();
        let active = self.active_id.read();
        active.and_then(|id| sessions.get(&id).cloned())
    }

    pub fn active_account_id(&self) -> Option<i64> {
        *self.active_id.read()
    }

    pub fn list_accounts(&self) -> Result<Vec<Account>> {
        self.store.list_accounts()
    }

    pub fn switch(&self, account_id: i64) -> Result<Session> {
        if let Some(session) = self.sessions.read().get(&account_id).cloned() {
            *self.active_id.write() = Some(account_id);
            return Ok(session);
        }

        let account = self
            .store
            .get_account_by_id(account_id)?
            .ok_or(SessionError::AccountNotFound)?;
        let token = self
            .store
            .get_token(account_id)?
            .ok_or(SessionError::TokenNotFound)?;
        let session = self.flow.resume(account, token)?;
        self.sessions.write().insert(account_id, session.clone());
        *self.active_id.write() = Some(account_id);
        Ok(session)
    }

    pub fn login(&self, email: &str, password: &str) -> Result<Session> {
        let session = self.flow.login(email, password)?;
        self.sessions
            .write()
            .insert(session.account.id, session.clone());
        *self.active_id.write() = Some(session.account.id);
        Ok(session)
    }

    pub fn register(&self, request: &RegisterRequest) -> Result<UserAccount> {
        self.flow.register(request)
    }

    pub fn logout(&self) -> Result<()> {
        let Some(account_id) = self.active_account_id() else {
            return Ok(());
        };
        self.store.delete_token(account_id)?;
        self.sessions.write().remove(&account_id);
        *self.active_id.write() = None;
        Ok(())
    }

    pub fn active_token_provider(&self) -> Result<Arc<dyn TokenProvider>> {
        let active_id = self
            .active_account_id()
            .ok_or(SessionError::AccountNotFound)?;
        self.token_provider(active_id)
    }

    pub fn token_provider(&self, account_id: i64) -> Result<Arc<dyn TokenProvider>> {
        if account_id == 0 {
            bail!(SessionError::AccountNotFound);
        }
        Ok(Arc::new(StoredTokenProvider {
            store: self.store.clone(),
            account_id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_in(dir: &tempfile::TempDir) -> Arc<storage::Store> {
        Arc::new(
            storage::Store::open(storage::Options {
                path: Some(dir.path().join("state.db")),
            })
            .unwrap(),
        )
    }

    #[test]
    fn stored_provider_rejects_expired_tokens() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let account_id = store
            .upsert_account(Account {
                id: 0,
                remote_id: 1,
                email: "ada@test.dev".into(),
                display_name: "Ada".into(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .unwrap();
        store
            .upsert_token(Token {
                account_id,
                access_token: "jwt".into(),
                token_type: "bearer".into(),
                expires_at: Some(Utc::now() - chrono::Duration::minutes(1)),
            })
            .unwrap();

        let provider = StoredTokenProvider { store, account_id };
        let err = provider.token().unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn manager_drops_expired_sessions_on_load() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let flow = Arc::new(
            Flow::new(store.clone(), api::DEFAULT_BASE_URL, "votix-test/1.0").unwrap(),
        );
        let account_id = store
            .upsert_account(Account {
                id: 0,
                remote_id: 1,
                email: "ada@test.dev".into(),
                display_name: "Ada".into(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .unwrap();
        store
            .upsert_token(Token {
                account_id,
                access_token: "jwt".into(),
                token_type: "bearer".into(),
                expires_at: Some(Utc::now() - chrono::Duration::minutes(1)),
            })
            .unwrap();

        let manager = Manager::new(store.clone(), flow).unwrap();
        manager.load_existing().unwrap();
        assert!(manager.active().is_none());
        assert!(store.get_token(account_id).unwrap().is_none());
    }

    #[test]
    fn display_name_joins_surname() {
        let user = UserAccount {
            id: 1,
            name: "Ada".into(),
            surname: Some("Lovelace".into()),
            email: "ada@test.dev".into(),
            points: 0,
            role: "user".into(),
        };
        assert_eq!(display_name(&user), "Ada Lovelace");
    }
}
