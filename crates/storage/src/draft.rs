use std::sync::Mutex;

use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::GatewayError;

/// Device-local stash for an unsaved editor draft. Values are stored as
/// MessagePack blobs keyed by slot name.
pub struct DraftStash {
    conn: Mutex<Connection>,
}

impl DraftStash {
    pub fn open(path: &str) -> Result<Self, GatewayError> {
        let conn = Connection::open(path)?;
        crate::schema::init_draft_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, GatewayError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_draft_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, GatewayError> {
        self.conn
            .lock()
            .map_err(|_| GatewayError::Persistence("draft stash lock poisoned".into()))
    }

    pub fn stash<T: Serialize>(&self, slot: &str, value: &T) -> Result<(), GatewayError> {
        let payload =
            rmp_serde::to_vec_named(value).map_err(|e| GatewayError::Serialization(e.to_string()))?;
        self.lock()?.execute(
            "INSERT INTO draft_stash (slot, payload, stashed_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(slot) DO UPDATE SET payload = excluded.payload, stashed_at = excluded.stashed_at",
            rusqlite::params![slot, payload, Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    pub fn load<T: DeserializeOwned>(&self, slot: &str) -> Result<Option<T>, GatewayError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT payload FROM draft_stash WHERE slot = ?1")?;
        let mut rows = stmt.query(rusqlite::params![slot])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let payload: Vec<u8> = row.get(0)?;
        let value =
            rmp_serde::from_slice(&payload).map_err(|e| GatewayError::Serialization(e.to_string()))?;
        Ok(Some(value))
    }

    pub fn clear(&self, slot: &str) -> Result<(), GatewayError> {
        self.lock()?
            .execute("DELETE FROM draft_stash WHERE slot = ?1", rusqlite::params![slot])?;
        Ok(())
    }
}
