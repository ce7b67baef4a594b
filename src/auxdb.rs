use std::fs;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use serde::Serialize;

use crate::domain::{InstrumentName, Position};
use crate::error::IdaError;

const SCHEMA_VERSION: i64 = 1;
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const CREATE_TABLES: &str = r#"
    CREATE TABLE IF NOT EXISTS fingerprints (
        filename TEXT PRIMARY KEY,
        fingerprint TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS positions (
        instrument TEXT PRIMARY KEY,
        longitude REAL NOT NULL,
        latitude REAL NOT NULL,
        height REAL NOT NULL
    );
"#;

pub trait KeyValueStore {
    type Value;

    fn get(&self, key: &str) -> Result<Option<Self::Value>, IdaError>;
    fn put(&self, key: &str, value: Self::Value) -> Result<(), IdaError>;
    /// Returns whether a record was removed.
    fn delete(&self, key: &str) -> Result<bool, IdaError>;
    /// All records in key order.
    fn list(&self) -> Result<Vec<(String, Self::Value)>, IdaError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FingerprintRecord {
    pub filename: String,
    pub fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionRecord {
    pub instrument: String,
    #[serde(flatten)]
    pub position: Position,
}

/// Partial position update; absent fields keep their stored value.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionPatch {
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub height: Option<f64>,
}

impl PositionPatch {
    pub fn is_empty(&self) -> bool {
        self.longitude.is_none() && self.latitude.is_none() && self.height.is_none()
    }
}

#[derive(Debug)]
pub struct AuxStore {
    path: Utf8PathBuf,
    conn: Mutex<Connection>,
}

impl AuxStore {
    pub fn open(path: impl Into<Utf8PathBuf>) -> Result<Self, IdaError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| IdaError::Store(format!("create {parent}: {err}")))?;
        }
        let mut conn = Connection::open(path.as_std_path()).map_err(store_error(&path))?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(store_error(&path))?;

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(store_error(&path))?;
        let version: i64 = tx
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(store_error(&path))?;
        match version {
            0 => {
                tx.execute_batch(CREATE_TABLES).map_err(store_error(&path))?;
                tx.pragma_update(None, "user_version", SCHEMA_VERSION)
                    .map_err(store_error(&path))?;
                tracing::info!(path = %path, "created auxiliary store");
            }
            SCHEMA_VERSION => {}
            other => {
                return Err(IdaError::Store(format!(
                    "{path}: unsupported schema version {other}"
                )));
            }
        }
        tx.commit().map_err(store_error(&path))?;

        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn fingerprints(&self) -> FingerprintStore<'_> {
        FingerprintStore { store: self }
    }

    pub fn positions(&self) -> PositionStore<'_> {
        PositionStore { store: self }
    }

    pub fn reset(&self) -> Result<(), IdaError> {
        self.write(|tx| {
            tx.execute_batch("DROP TABLE IF EXISTS fingerprints; DROP TABLE IF EXISTS positions;")?;
            tx.execute_batch(CREATE_TABLES)?;
            Ok(())
        })?;
        tracing::warn!(path = %self.path, "auxiliary store reset");
        Ok(())
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>, IdaError> {
        self.conn
            .lock()
            .map_err(|_| IdaError::Store("auxiliary store lock poisoned".to_string()))
    }

    fn read<R>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<R>) -> Result<R, IdaError> {
        let conn = self.connection()?;
        f(&conn).map_err(store_error(&self.path))
    }

    /// Runs `f` in an immediate transaction, so writers in other processes wait on the file lock.
    fn write<R>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<R, WriteError>,
    ) -> Result<R, IdaError> {
        let mut conn = self.connection()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(store_error(&self.path))?;
        let result = match f(&tx) {
            Ok(result) => result,
            Err(WriteError::Sql(err)) => return Err(store_error(&self.path)(err)),
            Err(WriteError::Rejected(err)) => return Err(err),
        };
        tx.commit().map_err(store_error(&self.path))?;
        Ok(result)
    }
}

enum WriteError {
    Sql(rusqlite::Error),
    Rejected(IdaError),
}

impl From<rusqlite::Error> for WriteError {
    fn from(err: rusqlite::Error) -> Self {
        WriteError::Sql(err)
    }
}

impl From<IdaError> for WriteError {
    fn from(err: IdaError) -> Self {
        WriteError::Rejected(err)
    }
}

fn store_error(path: &Utf8Path) -> impl Fn(rusqlite::Error) -> IdaError + '_ {
    move |err| IdaError::Store(format!("{path}: {err}"))
}

fn position_from_row(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<Position> {
    Ok(Position {
        longitude: row.get(offset)?,
        latitude: row.get(offset + 1)?,
        height: row.get(offset + 2)?,
    })
}

/// Source filename -> fingerprint observed at the last successful transform.
#[derive(Clone, Copy)]
pub struct FingerprintStore<'a> {
    store: &'a AuxStore,
}

impl FingerprintStore<'_> {
    pub fn records(&self) -> Result<Vec<FingerprintRecord>, IdaError> {
        Ok(self
            .list()?
            .into_iter()
            .map(|(filename, fingerprint)| FingerprintRecord {
                filename,
                fingerprint,
            })
            .collect())
    }
}

impl KeyValueStore for FingerprintStore<'_> {
    type Value = String;

    fn get(&self, key: &str) -> Result<Option<String>, IdaError> {
        self.store.read(|conn| {
            conn.query_row(
                "SELECT fingerprint FROM fingerprints WHERE filename = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
        })
    }

    fn put(&self, key: &str, value: String) -> Result<(), IdaError> {
        self.store.write(|tx| {
            tx.execute(
                "INSERT OR REPLACE INTO fingerprints (filename, fingerprint) VALUES (?1, ?2)",
                params![key, value],
            )?;
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> Result<bool, IdaError> {
        self.store.write(|tx| {
            let removed = tx.execute("DELETE FROM fingerprints WHERE filename = ?1", params![key])?;
            Ok(removed > 0)
        })
    }

    fn list(&self) -> Result<Vec<(String, String)>, IdaError> {
        self.store.read(|conn| {
            let mut stmt =
                conn.prepare("SELECT filename, fingerprint FROM fingerprints ORDER BY filename")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect()
        })
    }
}

#[derive(Clone, Copy)]
pub struct PositionStore<'a> {
    store: &'a AuxStore,
}

impl PositionStore<'_> {
    pub fn position(&self, name: &InstrumentName) -> Result<Option<Position>, IdaError> {
        self.get(name.as_str())
    }

    /// Registers a position; fails when the instrument already has one.
    pub fn add(&self, name: &InstrumentName, position: Position) -> Result<(), IdaError> {
        self.store.write(|tx| {
            if select_position(tx, name.as_str())?.is_some() {
                return Err(IdaError::PositionExists(name.to_string()).into());
            }
            insert_position(tx, name.as_str(), position)?;
            Ok(())
        })?;
        tracing::info!(instrument = %name, "coordinates added");
        Ok(())
    }

    pub fn update(&self, name: &InstrumentName, patch: PositionPatch) -> Result<Position, IdaError> {
        let updated = self.store.write(|tx| {
            let mut current = select_position(tx, name.as_str())?
                .ok_or_else(|| IdaError::PositionUnknown(name.to_string()))?;
            if let Some(longitude) = patch.longitude {
                current.longitude = longitude;
            }
            if let Some(latitude) = patch.latitude {
                current.latitude = latitude;
            }
            if let Some(height) = patch.height {
                current.height = height;
            }
            insert_position(tx, name.as_str(), current)?;
            Ok(current)
        })?;
        tracing::warn!(
            instrument = %name,
            "coordinates updated; previously computed Sun/Moon data is stale, re-run with --force"
        );
        Ok(updated)
    }

    pub fn records(&self) -> Result<Vec<PositionRecord>, IdaError> {
        Ok(self
            .list()?
            .into_iter()
            .map(|(instrument, position)| PositionRecord {
                instrument,
                position,
            })
            .collect())
    }
}

fn select_position(conn: &Connection, key: &str) -> rusqlite::Result<Option<Position>> {
    conn.query_row(
        "SELECT longitude, latitude, height FROM positions WHERE instrument = ?1",
        params![key],
        |row| position_from_row(row, 0),
    )
    .optional()
}

fn insert_position(conn: &Connection, key: &str, position: Position) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO positions (instrument, longitude, latitude, height) VALUES (?1, ?2, ?3, ?4)",
        params![key, position.longitude, position.latitude, position.height],
    )?;
    Ok(())
}

impl KeyValueStore for PositionStore<'_> {
    type Value = Position;

    fn get(&self, key: &str) -> Result<Option<Position>, IdaError> {
        self.store.read(|conn| select_position(conn, key))
    }

    fn put(&self, key: &str, value: Position) -> Result<(), IdaError> {
        self.store.write(|tx| Ok(insert_position(tx, key, value)?))
    }

    fn delete(&self, key: &str) -> Result<bool, IdaError> {
        self.store.write(|tx| {
            let removed = tx.execute("DELETE FROM positions WHERE instrument = ?1", params![key])?;
            Ok(removed > 0)
        })
    }

    fn list(&self) -> Result<Vec<(String, Position)>, IdaError> {
        self.store.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT instrument, longitude, latitude, height FROM positions ORDER BY instrument",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, position_from_row(row, 1)?)))?;
            rows.collect()
        })
    }
}
