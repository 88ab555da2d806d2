//! SQLite-backed user registry.
//!
//! One row per enrolled user. `email` and `filename` carry unique
//! indexes, so concurrent duplicate registrations cannot both succeed;
//! the loser surfaces as [`StoreError::Duplicate`].

use chrono::{SecondsFormat, Utc};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::Connection;

use crate::error::StoreError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    name       TEXT NOT NULL,
    email      TEXT NOT NULL,
    filename   TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_users_email ON users(email);
CREATE UNIQUE INDEX IF NOT EXISTS idx_users_filename ON users(filename);
";

/// A stored user row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub name: String,
    pub email: String,
    /// Opaque identifier correlating the image and signature blobs.
    pub filename: String,
    pub created_at: String,
}

/// Fields for a not-yet-inserted user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub filename: String,
}

#[derive(Clone)]
pub struct UserRegistry {
    conn: Connection,
}

impl UserRegistry {
    /// Open (or create) the registry database at the given path and apply
    /// the schema.
    pub async fn open(path: &std::path::Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path.to_path_buf()).await?;
        let registry = Self { conn };
        registry.migrate().await?;
        tracing::info!(path = %path.display(), "user registry opened");
        Ok(registry)
    }

    /// In-memory registry, for tests.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        let registry = Self { conn };
        registry.migrate().await?;
        Ok(registry)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Insert a new user. Unique constraint violations (duplicate email
    /// or filename) map to [`StoreError::Duplicate`].
    pub async fn insert(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        let result = {
            let user = user.clone();
            let created_at = created_at.clone();
            self.conn
                .call(move |conn| {
                    conn.execute(
                        "INSERT INTO users (name, email, filename, created_at)
                         VALUES (?1, ?2, ?3, ?4)",
                        rusqlite::params![user.name, user.email, user.filename, created_at],
                    )?;
                    Ok(conn.last_insert_rowid())
                })
                .await
        };

        match result {
            Ok(id) => Ok(UserRecord {
                id,
                name: user.name,
                email: user.email,
                filename: user.filename,
                created_at,
            }),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Duplicate),
            Err(e) => Err(e.into()),
        }
    }

    /// All users in registry enumeration order: ascending surrogate id.
    pub async fn all(&self) -> Result<Vec<UserRecord>, StoreError> {
        let users = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, email, filename, created_at
                     FROM users ORDER BY id ASC",
                )?;
                let rows = stmt.query_map([], row_to_user)?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await?;
        Ok(users)
    }

    pub async fn get(&self, id: i64) -> Result<UserRecord, StoreError> {
        let user = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, name, email, filename, created_at
                         FROM users WHERE id = ?1",
                        [id],
                        row_to_user,
                    )
                    .optional()?)
            })
            .await?;
        user.ok_or(StoreError::NotFound(id))
    }

    /// Update the identity fields of a user. The signature and image
    /// blobs are deliberately untouched; re-enrollment means delete and
    /// register again.
    pub async fn update_identity(
        &self,
        id: i64,
        name: String,
        email: String,
    ) -> Result<UserRecord, StoreError> {
        let result = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE users SET name = ?1, email = ?2 WHERE id = ?3",
                    rusqlite::params![name, email, id],
                )?)
            })
            .await;

        match result {
            Ok(0) => Err(StoreError::NotFound(id)),
            Ok(_) => self.get(id).await,
            Err(e) if is_unique_violation(&e) => Err(StoreError::Duplicate),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a user, returning the removed row so callers can clean up
    /// the associated blobs.
    pub async fn delete(&self, id: i64) -> Result<UserRecord, StoreError> {
        let user = self.get(id).await?;
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
                Ok(())
            })
            .await?;
        Ok(user)
    }

    /// Delete a user by filename. Compensation path for enrollments that
    /// fail after the registry insert.
    pub async fn delete_by_filename(&self, filename: &str) -> Result<(), StoreError> {
        let filename = filename.to_string();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM users WHERE filename = ?1", [filename])?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        filename: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn is_unique_violation(err: &tokio_rusqlite::Error) -> bool {
    matches!(
        err,
        tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(name: &str, email: &str, filename: &str) -> NewUser {
        NewUser {
            name: name.into(),
            email: email.into(),
            filename: filename.into(),
        }
    }

    #[tokio::test]
    async fn insert_assigns_ascending_ids() {
        let registry = UserRegistry::open_in_memory().await.unwrap();
        let a = registry
            .insert(new_user("Alice", "alice@x.com", "f-a"))
            .await
            .unwrap();
        let b = registry
            .insert(new_user("Bob", "bob@x.com", "f-b"))
            .await
            .unwrap();
        assert!(b.id > a.id);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected_and_first_row_kept() {
        let registry = UserRegistry::open_in_memory().await.unwrap();
        let alice = registry
            .insert(new_user("Alice", "alice@x.com", "f-a"))
            .await
            .unwrap();

        let err = registry
            .insert(new_user("Bob", "alice@x.com", "f-b"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate));

        let fetched = registry.get(alice.id).await.unwrap();
        assert_eq!(fetched, alice);
        assert_eq!(registry.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_filename_is_rejected() {
        let registry = UserRegistry::open_in_memory().await.unwrap();
        registry
            .insert(new_user("Alice", "alice@x.com", "same"))
            .await
            .unwrap();
        let err = registry
            .insert(new_user("Bob", "bob@x.com", "same"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate));
    }

    #[tokio::test]
    async fn all_enumerates_in_id_order() {
        let registry = UserRegistry::open_in_memory().await.unwrap();
        for i in 0..5 {
            registry
                .insert(new_user(&format!("u{i}"), &format!("u{i}@x.com"), &format!("f{i}")))
                .await
                .unwrap();
        }
        let users = registry.all().await.unwrap();
        let ids: Vec<i64> = users.iter().map(|u| u.id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
        assert_eq!(users.len(), 5);
    }

    #[tokio::test]
    async fn update_changes_identity_only() {
        let registry = UserRegistry::open_in_memory().await.unwrap();
        let alice = registry
            .insert(new_user("Alice", "alice@x.com", "f-a"))
            .await
            .unwrap();

        let updated = registry
            .update_identity(alice.id, "Alicia".into(), "alicia@x.com".into())
            .await
            .unwrap();
        assert_eq!(updated.name, "Alicia");
        assert_eq!(updated.email, "alicia@x.com");
        assert_eq!(updated.filename, alice.filename);
    }

    #[tokio::test]
    async fn update_to_taken_email_is_rejected() {
        let registry = UserRegistry::open_in_memory().await.unwrap();
        registry
            .insert(new_user("Alice", "alice@x.com", "f-a"))
            .await
            .unwrap();
        let bob = registry
            .insert(new_user("Bob", "bob@x.com", "f-b"))
            .await
            .unwrap();

        let err = registry
            .update_identity(bob.id, "Bob".into(), "alice@x.com".into())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate));
    }

    #[tokio::test]
    async fn update_unknown_user_is_not_found() {
        let registry = UserRegistry::open_in_memory().await.unwrap();
        let err = registry
            .update_identity(42, "X".into(), "x@x.com".into())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(42)));
    }

    #[tokio::test]
    async fn delete_returns_row_then_forgets_it() {
        let registry = UserRegistry::open_in_memory().await.unwrap();
        let alice = registry
            .insert(new_user("Alice", "alice@x.com", "f-a"))
            .await
            .unwrap();

        let removed = registry.delete(alice.id).await.unwrap();
        assert_eq!(removed.filename, "f-a");
        assert!(matches!(
            registry.get(alice.id).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_by_filename_removes_row() {
        let registry = UserRegistry::open_in_memory().await.unwrap();
        let alice = registry
            .insert(new_user("Alice", "alice@x.com", "f-a"))
            .await
            .unwrap();
        registry.delete_by_filename("f-a").await.unwrap();
        assert!(matches!(
            registry.get(alice.id).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
