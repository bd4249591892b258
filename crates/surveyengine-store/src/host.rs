use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use surveyengine_core::domain::Host;
use surveyengine_core::error::{Result, SurveyError};
use surveyengine_core::resolver::HostLoader;

/// Persona records ("hosts") a template can bind to, with soft delete so
/// past conversations can still resolve a host that was later retired.
pub struct HostStore {
    db: Mutex<Connection>,
}

impl HostStore {
    pub fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS hosts (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                role        TEXT NOT NULL,
                is_deleted  INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_hosts_name ON hosts(name);",
        )?;
        Ok(Self { db: Mutex::new(conn) })
    }

    pub fn create(&self, name: &str, role: &str) -> Result<Host> {
        let name = name.trim();
        let role = role.trim();
        if name.is_empty() || role.is_empty() {
            return Err(SurveyError::Validation("host name and role must not be empty".into()));
        }
        if self.name_exists(name, None)? {
            return Err(SurveyError::Validation(format!("host name already exists: {name}")));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO hosts (id, name, role, is_deleted, created_at, updated_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?4)",
            params![id, name, role, now],
        )?;
        Ok(Host { id, name: name.to_string(), role: role.to_string() })
    }

    pub fn update(&self, id: &str, name: Option<&str>, role: Option<&str>) -> Result<Host> {
        let current = self.get_raw(id)?;
        let new_name = name.map(str::trim).unwrap_or(&current.name);
        let new_role = role.map(str::trim).unwrap_or(&current.role);
        if new_name.is_empty() || new_role.is_empty() {
            return Err(SurveyError::Validation("host name and role must not be empty".into()));
        }
        if new_name != current.name && self.name_exists(new_name, Some(id))? {
            return Err(SurveyError::Validation(format!("host name already exists: {new_name}")));
        }

        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE hosts SET name = ?1, role = ?2, updated_at = ?3 WHERE id = ?4 AND is_deleted = 0",
            params![new_name, new_role, now, id],
        )?;
        Ok(Host { id: id.to_string(), name: new_name.to_string(), role: new_role.to_string() })
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE hosts SET is_deleted = 1, updated_at = ?1 WHERE id = ?2 AND is_deleted = 0",
            params![now, id],
        )?;
        if changed == 0 {
            return Err(SurveyError::HostNotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<Host>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, name, role FROM hosts WHERE is_deleted = 0 ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([], row_to_host)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn name_exists(&self, name: &str, excluding: Option<&str>) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let exists: Option<i64> = match excluding {
            Some(id) => db
                .query_row(
                    "SELECT 1 FROM hosts WHERE name = ?1 AND is_deleted = 0 AND id != ?2",
                    params![name, id],
                    |row| row.get(0),
                )
                .optional()?,
            None => db
                .query_row(
                    "SELECT 1 FROM hosts WHERE name = ?1 AND is_deleted = 0",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?,
        };
        Ok(exists.is_some())
    }

    pub fn get(&self, id: &str) -> Result<Host> {
        self.get_raw(id)
    }

    fn get_raw(&self, id: &str) -> Result<Host> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, name, role FROM hosts WHERE id = ?1 AND is_deleted = 0",
            params![id],
            row_to_host,
        )
        .optional()?
        .ok_or_else(|| SurveyError::HostNotFound(id.to_string()))
    }
}

/// Adapts [`HostStore`] to the resolver's storage-agnostic lookup trait.
pub struct SqliteHostLoader<'a>(pub &'a HostStore);

impl HostLoader for SqliteHostLoader<'_> {
    fn get(&self, host_id: &str) -> Result<Host> {
        self.0.get_raw(host_id)
    }
}

fn row_to_host(row: &rusqlite::Row<'_>) -> rusqlite::Result<Host> {
    Ok(Host { id: row.get(0)?, name: row.get(1)?, role: row.get(2)? })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> HostStore {
        HostStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn create_rejects_blank_name_or_role() {
        let store = store();
        assert!(store.create("  ", "role").is_err());
        assert!(store.create("name", "  ").is_err());
    }

    #[test]
    fn create_rejects_duplicate_name() {
        let store = store();
        store.create("Alice", "Interviewer").unwrap();
        assert!(store.create("Alice", "Other role").is_err());
    }

    #[test]
    fn update_can_rename_without_colliding_with_itself() {
        let store = store();
        let host = store.create("Alice", "Interviewer").unwrap();
        let updated = store.update(&host.id, Some("Alice"), Some("Lead interviewer")).unwrap();
        assert_eq!(updated.role, "Lead interviewer");
    }

    #[test]
    fn delete_is_soft_and_excludes_from_list_and_get() {
        let store = store();
        let host = store.create("Alice", "Interviewer").unwrap();
        store.delete(&host.id).unwrap();
        assert!(store.list().unwrap().is_empty());
        assert!(SqliteHostLoader(&store).get(&host.id).is_err());
        assert!(store.delete(&host.id).is_err());
    }
}
