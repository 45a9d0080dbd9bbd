use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

/// Durable storage for OAuth client credentials and user token pairs,
/// keyed by server origin.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserTokenPair {
    pub token: String,
    pub secret: String,
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
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)
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

    pub fn get_client_credentials(&self, server: &str) -> Result<Option<ClientCredentials>> {
        let conn = self.conn.lock();
        conn.query_row(
            r#"
SELECT client_id, client_secret
FROM client_credentials
WHERE server = ?1
"#,
            params![server],
            |row| {
                Ok(ClientCredentials {
                    client_id: row.get(0)?,
                    client_secret: row.get(1)?,
                })
            },
        )
        .optional()
        .context("storage: query client credentials")
    }

    pub fn put_client_credentials(&self, server: &str, cred: &ClientCredentials) -> Result<()> {
        if cred.client_id.is_empty() {
            bail!("storage: client id required");
        }
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO client_credentials (server, client_id, client_secret, created_at)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(server) DO UPDATE SET
  client_id = excluded.client_id,
  client_secret = excluded.client_secret,
  created_at = excluded.created_at
"#,
            params![
                server,
                cred.client_id,
                cred.client_secret,
                Utc::now().timestamp()
            ],
        )
        .context("storage: save client credentials")?;
        Ok(())
    }

    pub fn get_user_token(&self, server: &str) -> Result<Option<UserTokenPair>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT token, secret FROM user_tokens WHERE server = ?1",
            params![server],
            |row| {
                Ok(UserTokenPair {
                    token: row.get(0)?,
                    secret: row.get(1)?,
                })
            },
        )
        .optional()
        .context("storage: query user token")
    }

    pub fn put_user_token(
        &self,
        server: &str,
        pair: &UserTokenPair,
        nickname: Option<&str>,
    ) -> Result<()> {
        if pair.token.is_empty() {
            bail!("storage: token required");
        }
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO user_tokens (server, token, secret, nickname, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT(server) DO UPDATE SET
  token = excluded.token,
  secret = excluded.secret,
  nickname = excluded.nickname,
  updated_at = excluded.updated_at
"#,
            params![
                server,
                pair.token,
                pair.secret,
                nickname,
                Utc::now().timestamp()
            ],
        )
        .context("storage: save user token")?;
        Ok(())
    }

    /// Drops both the client credentials and the user token for `server`.
    pub fn clear_credentials(&self, server: &str) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("storage: begin clear")?;
        tx.execute(
            "DELETE FROM client_credentials WHERE server = ?1",
            params![server],
        )?;
        tx.execute("DELETE FROM user_tokens WHERE server = ?1", params![server])?;
        tx.commit().context("storage: commit clear")
    }
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
CREATE TABLE IF NOT EXISTS client_credentials (
  server TEXT PRIMARY KEY,
  client_id TEXT NOT NULL,
  client_secret TEXT NOT NULL,
  created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS user_tokens (
  server TEXT PRIMARY KEY,
  token TEXT NOT NULL,
  secret TEXT NOT NULL,
  nickname TEXT,
  updated_at INTEGER NOT NULL
);
"#,
    ]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("pump-client").join("state.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_temp() -> (tempfile::TempDir, Store) {
        let dir = tempdir().unwrap();
        let store = Store::open(Options {
            path: Some(dir.path().join("state.db")),
        })
        .unwrap();
        (dir, store)
    }

    #[test]
    fn open_creates_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");
        let store = Store::open(Options {
            path: Some(path.clone()),
        })
        .unwrap();
        assert!(path.exists());
        store.close().unwrap();
    }

    #[test]
    fn credentials_are_scoped_per_server() {
        let (_dir, store) = open_temp();
        let cred = ClientCredentials {
            client_id: "abc".into(),
            client_secret: "shh".into(),
        };
        store
            .put_client_credentials("https://a.example", &cred)
            .unwrap();
        assert_eq!(
            store.get_client_credentials("https://a.example").unwrap(),
            Some(cred)
        );
        assert!(store
            .get_client_credentials("https://b.example")
            .unwrap()
            .is_none());
    }

    #[test]
    fn user_token_upserts() {
        let (_dir, store) = open_temp();
        let server = "https://a.example";
        let first = UserTokenPair {
            token: "t1".into(),
            secret: "s1".into(),
        };
        let second = UserTokenPair {
            token: "t2".into(),
            secret: "s2".into(),
        };
        store.put_user_token(server, &first, Some("evan")).unwrap();
        store.put_user_token(server, &second, None).unwrap();
        assert_eq!(store.get_user_token(server).unwrap(), Some(second));
    }

    #[test]
    fn clear_removes_both_kinds() {
        let (_dir, store) = open_temp();
        let server = "https://a.example";
        store
            .put_client_credentials(
                server,
                &ClientCredentials {
                    client_id: "id".into(),
                    client_secret: "secret".into(),
                },
            )
            .unwrap();
        store
            .put_user_token(
                server,
                &UserTokenPair {
                    token: "t".into(),
                    secret: "s".into(),
                },
                None,
            )
            .unwrap();
        store.clear_credentials(server).unwrap();
        assert!(store.get_client_credentials(server).unwrap().is_none());
        assert!(store.get_user_token(server).unwrap().is_none());
    }

    #[test]
    fn reopen_keeps_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");
        let store = Store::open(Options {
            path: Some(path.clone()),
        })
        .unwrap();
        store
            .put_user_token(
                "s",
                &UserTokenPair {
                    token: "t".into(),
                    secret: "x".into(),
                },
                Some("n"),
            )
            .unwrap();
        store.close().unwrap();

        let store = Store::open(Options { path: Some(path) }).unwrap();
        assert_eq!(
            store.get_user_token("s").unwrap().map(|pair| pair.token),
            Some("t".to_string())
        );
    }
}
