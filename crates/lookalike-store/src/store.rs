use lookalike_core::{normalize_identity_key, CharacterRecord, InMemoryResolver};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("no record for {0}")]
    NotFound(String),
    #[error("record for {0} already exists")]
    Duplicate(String),
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS characters (
        id        INTEGER PRIMARY KEY AUTOINCREMENT,
        movie     TEXT NOT NULL,
        character TEXT NOT NULL,
        actor     TEXT NOT NULL,
        path      TEXT NOT NULL UNIQUE,
        img       TEXT NOT NULL,
        added_at  TEXT NOT NULL
    );
";

const SELECT_COLUMNS: &str = "SELECT path, movie, character, actor, img, added_at FROM characters";

/// A character row before insertion; `added_at` is stamped by the store.
#[derive(Debug, Clone)]
pub struct NewCharacter {
    pub identity_key: String,
    pub movie: String,
    pub character: String,
    pub actor: String,
    pub image_file: String,
}

/// SQLite table of cataloged characters.
pub struct MetadataStore {
    conn: Connection,
}

impl MetadataStore {
    /// Open (creating if needed) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Delete any existing store at `path` and start empty.
    pub fn recreate(path: &Path) -> Result<Self, StoreError> {
        match std::fs::remove_file(path) {
            Ok(()) => tracing::info!(path = %path.display(), "existing metadata store removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Self::open(path)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Insert a record; the identity key is stored in normalized form.
    pub fn insert(&self, new: &NewCharacter) -> Result<CharacterRecord, StoreError> {
        let identity_key = normalize_identity_key(&new.identity_key);
        let added_at = chrono::Utc::now().to_rfc3339();
        let inserted = self.conn.execute(
            "INSERT INTO characters (movie, character, actor, path, img, added_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![new.movie, new.character, new.actor, identity_key, new.image_file, added_at],
        );

        match inserted {
            Ok(_) => Ok(CharacterRecord {
                identity_key,
                movie: new.movie.clone(),
                character: new.character.clone(),
                actor: new.actor.clone(),
                image_file: new.image_file.clone(),
                added_at,
            }),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Duplicate(identity_key))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn lookup(&self, identity_key: &str) -> Result<CharacterRecord, StoreError> {
        let key = normalize_identity_key(identity_key);
        self.conn
            .query_row(&format!("{SELECT_COLUMNS} WHERE path = ?1"), [&key], row_to_record)
            .optional()?
            .ok_or_else(|| StoreError::NotFound(identity_key.to_string()))
    }

    /// Every record, in insertion order.
    pub fn list_all(&self) -> Result<Vec<CharacterRecord>, StoreError> {
        let mut stmt = self.conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY id"))?;
        let rows = stmt.query_map([], row_to_record)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        let n: i64 = self.conn.query_row("SELECT COUNT(*) FROM characters", [], |r| r.get(0))?;
        Ok(n as u64)
    }

    /// Snapshot all records into a thread-safe resolver for serving.
    pub fn load_resolver(&self) -> Result<InMemoryResolver, StoreError> {
        let records = self.list_all()?;
        tracing::info!(records = records.len(), "metadata loaded");
        Ok(InMemoryResolver::from_records(records))
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<CharacterRecord> {
    Ok(CharacterRecord {
        identity_key: row.get(0)?,
        movie: row.get(1)?,
        character: row.get(2)?,
        actor: row.get(3)?,
        image_file: row.get(4)?,
        added_at: row.get(5)?,
    })
}
