use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone)]
pub struct Account {
    pub id: i64,
    pub remote_id: i64,
    pub email: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Bearer token from the survey API. The backend hands out plain JWTs with
/// no refresh flow; an expired one just forces a fresh login.
#[derive(Debug, Clone)]
pub struct Token {
    pub account_id: i64,
    pub access_token: String,
    pub token_type: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct MediaDimensions {
    pub id: i64,
    pub url: String,
    pub width: i64,
    pub height: i64,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("storage: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", &"WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "foreign_keys", &"ON")
            .context("storage: enable foreign keys")?;
        conn.pragma_update(None, "busy_timeout", &5000)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn close(self) -> Result<()> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| anyhow!("storage: connection still in use"))?
            .into_inner();
        conn.close()
            .map_err(|(_, err)| err)
            .context("storage: close connection")
    }

    pub fn upsert_account(&self, mut account: Account) -> Result<i64> {
        if account.remote_id == 0 {
            bail!("storage: remote user id required");
        }
        if account.email.is_empty() {
            bail!("storage: account email required");
        }
        let now = Utc::now();
        if account.created_at.timestamp() == 0 {
            account.created_at = now;
        }
        account.updated_at = now;

        let conn = self.conn.lock();
        let id: i64 = conn.query_row(
            r#"
INSERT INTO accounts (remote_id, email, display_name, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT(remote_id) DO UPDATE SET
  email = excluded.email,
  display_name = excluded.display_name,
  updated_at = excluded.updated_at
RETURNING id
"#,
            params![
                account.remote_id,
                account.email,
                account.display_name,
                account.created_at.timestamp(),
                account.updated_at.timestamp(),
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn get_account_by_id(&self, id: i64) -> Result<Option<Account>> {
        let conn = self.conn.lock();
        conn.query_row(
            r#"
SELECT id, remote_id, email, display_name, created_at, updated_at
FROM accounts
WHERE id = ?1
"#,
            params![id],
            account_from_row,
        )
        .optional()
        .context("storage: query account by id")
    }

    pub fn get_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let conn = self.conn.lock();
        conn.query_row(
            r#"
SELECT id, remote_id, email, display_name, created_at, updated_at
FROM accounts
WHERE email = ?1
"#,
            params![email],
            account_from_row,
        )
        .optional()
        .context("storage: query account by email")
    }

    pub fn list_accounts(&self) -> Result<Vec<Account>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
SELECT id, remote_id, email, display_name, created_at, updated_at
FROM accounts
ORDER BY updated_at DESC
"#,
        )?;
        let rows = stmt
            .query_map([], account_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn upsert_token(&self, token: Token) -> Result<()> {
        if token.account_id == 0 {
            bail!("storage: account id required for token");
        }
        let expires = token.expires_at.map(|dt| dt.timestamp());
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO tokens (account_id, access_token, token_type, expires_at)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(account_id) DO UPDATE SET
  access_token = excluded.access_token,
  token_type = excluded.token_type,
  expires_at = excluded.expires_at
"#,
            params![
                token.account_id,
                token.access_token,
                token.token_type,
                expires,
            ],
        )?;
        Ok(())
    }

    pub fn get_token(&self, account_id: i64) -> Result<Option<Token>> {
        let conn = self.conn.lock();
        conn.query_row(
            r#"
SELECT account_id, access_token, token_type, expires_at
FROM tokens
WHERE account_id = ?1
"#,
            params![account_id],
            |row| {
                let expires: Option<i64> = row.get(3)?;
                Ok(Token {
                    account_id: row.get(0)?,
                    access_token: row.get(1)?,
                    token_type: row.get(2)?,
                    expires_at: expires.and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
                })
            },
        )
        .optional()
        .context("storage: query token")
    }

    pub fn delete_token(&self, account_id: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM tokens WHERE account_id = ?1",
            params![account_id],
        )?;
        Ok(())
    }

    pub fn upsert_media_dimensions(&self, mut entry: MediaDimensions) -> Result<i64> {
        if entry.url.is_empty() {
            bail!("storage: media url required");
        }
        if entry.fetched_at.timestamp() == 0 {
            entry.fetched_at = Utc::now();
        }
        let expires = entry.expires_at.map(|dt| dt.timestamp());
        let conn = self.conn.lock();
        let id: i64 = conn.query_row(
            r#"
INSERT INTO media_dimensions (url, width, height, fetched_at, expires_at)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT(url) DO UPDATE SET
  width = excluded.width,
  height = excluded.height,
  fetched_at = excluded.fetched_at,
  expires_at = excluded.expires_at
RETURNING id
"#,
            params![
                entry.url,
                entry.width,
                entry.height,
                entry.fetched_at.timestamp(),
                expires,
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn get_media_dimensions(&self, url: &str) -> Result<Option<MediaDimensions>> {
        let conn = self.conn.lock();
        conn.query_row(
            r#"
SELECT id, url, width, height, fetched_at, expires_at
FROM media_dimensions
WHERE url = ?1
"#,
            params![url],
            media_dimensions_from_row,
        )
        .optional()
        .context("storage: query media dimensions")
    }

    pub fn delete_expired_media(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM media_dimensions WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![cutoff.timestamp()],
        )?;
        Ok(deleted)
    }
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    let created: i64 = row.get(4)?;
    let updated: i64 = row.get(5)?;
    Ok(Account {
        id: row.get(0)?,
        remote_id: row.get(1)?,
        email: row.get(2)?,
        display_name: row.get(3)?,
        created_at: Utc
            .timestamp_opt(created, 0)
            .single()
            .unwrap_or_else(Utc::now),
        updated_at: Utc
            .timestamp_opt(updated, 0)
            .single()
            .unwrap_or_else(Utc::now),
    })
}

fn media_dimensions_from_row(row: &Row<'_>) -> rusqlite::Result<MediaDimensions> {
    let fetched: i64 = row.get(4)?;
    let expires: Option<i64> = row.get(5)?;
    Ok(MediaDimensions {
        id: row.get(0)?,
        url: row.get(1)?,
        width: row.get(2)?,
        height: row.get(3)?,
        fetched_at: Utc
            .timestamp_opt(fetched, 0)
            .single()
            .unwrap_or_else(Utc::now),
        expires_at: expires.and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
    })
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let migrations = migrations();
    for (idx, sql) in migrations.iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![
                version,
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::from_secs(0))
                    .as_secs() as i64,
            ],
        )?;
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![
        r#"
CREATE TABLE IF NOT EXISTS accounts (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  remote_id INTEGER NOT NULL UNIQUE,
  email TEXT NOT NULL,
  display_name TEXT,
  created_at INTEGER NOT NULL,
  updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS tokens (
  account_id INTEGER PRIMARY KEY,
  access_token TEXT NOT NULL,
  token_type TEXT NOT NULL,
  expires_at INTEGER,
  FOREIGN KEY(account_id) REFERENCES accounts(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS media_dimensions (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  url TEXT NOT NULL UNIQUE,
  width INTEGER NOT NULL,
  height INTEGER NOT NULL,
  fetched_at INTEGER NOT NULL,
  expires_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_media_dimensions_expires_at ON media_dimensions(expires_at);
"#,
    ]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("votix").join("state.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_store(dir: &tempfile::TempDir) -> Store {
        Store::open(Options {
            path: Some(dir.path().join("state.db")),
        })
        .unwrap()
    }

    #[test]
    fn open_creates_database() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        assert!(dir.path().join("state.db").exists());
        store.close().unwrap();
    }

    #[test]
    fn account_and_token_round_trip() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        let id = store
            .upsert_account(Account {
                id: 0,
                remote_id: 42,
                email: "ada@test.dev".into(),
                display_name: "Ada".into(),
                created_at: Utc.timestamp_opt(0, 0).single().unwrap(),
                updated_at: Utc.timestamp_opt(0, 0).single().unwrap(),
            })
            .unwrap();

        store
            .upsert_token(Token {
                account_id: id,
                access_token: "jwt".into(),
                token_type: "bearer".into(),
                expires_at: None,
            })
            .unwrap();

        let token = store.get_token(id).unwrap().unwrap();
        assert_eq!(token.access_token, "jwt");

        store.delete_token(id).unwrap();
        assert!(store.get_token(id).unwrap().is_none());

        let account = store.get_account_by_email("ada@test.dev").unwrap().unwrap();
        assert_eq!(account.remote_id, 42);
    }

    #[test]
    fn expired_dimensions_are_pruned() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        store
            .upsert_media_dimensions(MediaDimensions {
                id: 0,
                url: "https://cdn.test/a.jpg".into(),
                width: 100,
                height: 50,
                fetched_at: Utc::now(),
                expires_at: Some(Utc::now() - chrono::Duration::hours(1)),
            })
            .unwrap();

        let deleted = store.delete_expired_media(Utc::now()).unwrap();
        assert_eq!(deleted, 1);
        assert!(store
            .get_media_dimensions("https://cdn.test/a.jpg")
            .unwrap()
            .is_none());
    }
}
