use hush_shared::KeyId;
use rusqlite::params;

use crate::columns::key_id;
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::User;

impl Database {
    /// Record a user, replacing the username if the key id is already known.
    pub fn add_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (kid, username) VALUES (?1, ?2)
             ON CONFLICT(kid) DO UPDATE SET username = excluded.username",
            params![user.kid.to_hex(), user.username],
        )?;
        Ok(())
    }

    pub fn user(&self, kid: &KeyId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT kid, username FROM users WHERE kid = ?1",
                params![kid.to_hex()],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT kid, username FROM users ORDER BY username ASC, kid ASC")?;
        let rows = stmt.query_map([], row_to_user)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        kid: key_id(row, 0)?,
        username: row.get(1)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hush_shared::Key;

    #[test]
    fn add_and_rename() {
        let db = Database::open_in_memory().unwrap();
        let kid = Key::generate().id();

        db.add_user(&User {
            kid,
            username: "alice".into(),
        })
        .unwrap();
        db.add_user(&User {
            kid,
            username: "alice2".into(),
        })
        .unwrap();

        assert_eq!(db.user(&kid).unwrap().username, "alice2");
        assert_eq!(db.users().unwrap().len(), 1);
    }

    #[test]
    fn unknown_user_not_found() {
        let db = Database::open_in_memory().unwrap();
        let err = db.user(&Key::generate().id()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }
}
