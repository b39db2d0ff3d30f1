//! FedMesh Federation Storage
//!
//! Storage backend abstraction for the federation core. All tenants
//! share one backing store; the backend hands out connections with the
//! schema applied and foreign keys enabled.

use fedmesh_federation_core::{schema, FederationError, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Backend abstraction for federation storage
///
/// Implementations handle different storage mechanisms. The local
/// SQLite file is the only backend today; the trait keeps the API,
/// services, and tests independent of where the database lives.
pub trait FederationBackend: Send + Sync {
    /// Get a connection to the federation database
    fn get_connection(&self) -> Result<Connection>;

    /// Check if the database exists
    fn exists(&self) -> Result<bool>;

    /// Initialize a new database (create the file and schema)
    fn initialize(&self) -> Result<()>;
}

/// Local filesystem SQLite backend
#[derive(Clone, Debug)]
pub struct LocalSqliteBackend {
    /// Path to the SQLite database file
    path: PathBuf,
}

impl LocalSqliteBackend {
    /// Create a new local SQLite backend
    ///
    /// # Example
    /// ```
    /// use fedmesh_federation_storage::LocalSqliteBackend;
    ///
    /// let backend = LocalSqliteBackend::new("fedmesh.db");
    /// ```
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Get the path to the database file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FederationBackend for LocalSqliteBackend {
    fn get_connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;

        // Enable foreign key constraints
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        // Apply schema if needed
        schema::init_schema(&conn)?;

        Ok(conn)
    }

    fn exists(&self) -> Result<bool> {
        Ok(self.path.exists())
    }

    fn initialize(&self) -> Result<()> {
        if self.exists()? {
            return Err(FederationError::Internal(format!(
                "database already exists at {:?}",
                self.path
            )));
        }

        let conn = Connection::open(&self.path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::init_schema(&conn)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_local_backend_initialize() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        // Remove the file so we can test initialization
        std::fs::remove_file(path).unwrap();

        let backend = LocalSqliteBackend::new(path);
        assert!(!backend.exists().unwrap());

        backend.initialize().unwrap();
        assert!(backend.exists().unwrap());

        let conn = backend.get_connection().unwrap();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"federation_partnerships".to_string()));
        assert!(tables.contains(&"federation_system_control".to_string()));
    }

    #[test]
    fn test_local_backend_double_initialize() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        std::fs::remove_file(path).unwrap();

        let backend = LocalSqliteBackend::new(path);
        backend.initialize().unwrap();

        // Second initialize should fail
        assert!(backend.initialize().is_err());
    }

    #[test]
    fn test_local_backend_connection() {
        let temp_file = NamedTempFile::new().unwrap();
        let backend = LocalSqliteBackend::new(temp_file.path());

        let conn = backend.get_connection().unwrap();

        // Foreign keys are enabled on every connection
        let fk_enabled: i32 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk_enabled, 1);
    }

    #[test]
    fn test_connection_has_control_singleton() {
        let temp_file = NamedTempFile::new().unwrap();
        let backend = LocalSqliteBackend::new(temp_file.path());

        let conn = backend.get_connection().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM federation_system_control", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(count, 1);
    }
}
