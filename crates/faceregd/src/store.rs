//! SQLite persistence for registered users and searchable face images.

use facereg_core::{Encoding, RegistryEntry};
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    user_name  TEXT PRIMARY KEY,
    encoding   BLOB NOT NULL,
    image      BLOB NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS faces (
    id          TEXT PRIMARY KEY,
    person      TEXT NOT NULL,
    document_id TEXT NOT NULL,
    file        BLOB NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS faces_person ON faces(person);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),
    #[error("encoding for {user_name} is unreadable: {source}")]
    CorruptEncoding {
        user_name: String,
        source: serde_json::Error,
    },
    #[error("serializing encoding: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result of inserting a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Created,
    DuplicateName,
}

/// A stored image attached to a person.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFace {
    pub id: String,
    pub document_id: String,
    pub data: Vec<u8>,
}

/// Handle to the face database. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (creating if needed) the database at `path`.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!(dir = %parent.display(), error = %e, "could not create database directory");
            }
        }
        let conn = Connection::open(path).await?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    /// Every registered user with its decoded encoding, in registration order.
    pub async fn load_users(&self) -> Result<Vec<RegistryEntry>, StoreError> {
        let rows: Vec<(String, Vec<u8>)> = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT user_name, encoding FROM users ORDER BY rowid")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(user_name, blob)| match serde_json::from_slice::<Encoding>(&blob) {
                Ok(encoding) => Ok(RegistryEntry { name: user_name, encoding }),
                Err(source) => Err(StoreError::CorruptEncoding { user_name, source }),
            })
            .collect()
    }

    pub async fn user_exists(&self, user_name: &str) -> Result<bool, StoreError> {
        let user_name = user_name.to_string();
        let found = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT 1 FROM users WHERE user_name = ?1",
                        params![user_name],
                        |_| Ok(()),
                    )
                    .optional()?)
            })
            .await?;
        Ok(found.is_some())
    }

    /// Insert a user unless the name is already taken.
    pub async fn insert_user(
        &self,
        user_name: &str,
        encoding: &Encoding,
        image: Vec<u8>,
    ) -> Result<InsertOutcome, StoreError> {
        let blob = serde_json::to_vec(encoding)?;
        let user_name = user_name.to_string();
        let created_at = chrono::Utc::now().to_rfc3339();

        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "INSERT OR IGNORE INTO users (user_name, encoding, image, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![user_name, blob, image, created_at],
                )?)
            })
            .await?;

        Ok(if changed == 0 {
            InsertOutcome::DuplicateName
        } else {
            InsertOutcome::Created
        })
    }

    pub async fn count_users(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?))
            .await?;
        Ok(count as usize)
    }

    /// Attach an image to `person`; returns the new face id.
    pub async fn add_face(
        &self,
        person: &str,
        document_id: &str,
        data: Vec<u8>,
    ) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let row_id = id.clone();
        let person = person.to_string();
        let document_id = document_id.to_string();
        let created_at = chrono::Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO faces (id, person, document_id, file, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![row_id, person, document_id, data, created_at],
                )?;
                Ok(())
            })
            .await?;

        Ok(id)
    }

    /// Images attached to `person`, oldest first.
    pub async fn faces_for(&self, person: &str) -> Result<Vec<StoredFace>, StoreError> {
        let person = person.to_string();
        let faces = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, document_id, file FROM faces WHERE person = ?1 ORDER BY rowid",
                )?;
                let rows = stmt
                    .query_map(params![person], |row| {
                        Ok(StoredFace {
                            id: row.get(0)?,
                            document_id: row.get(1)?,
                            data: row.get(2)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(faces)
    }
}
