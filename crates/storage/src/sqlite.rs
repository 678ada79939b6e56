use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};

use stickies_core::{
    AutomationRule, BusEvent, ChangeBus, Color, Entity, EntityId, EntityRow, NewEntity, Patch,
    RuleId, palette,
};

use crate::error::GatewayError;
use crate::traits::{Gateway, RuleSource};

const ROW_COLUMNS: &str = "id, is_folder, title, content, folder_name, folder_color, \
     parent_folder_name, \"order\", list_mode, created_at, updated_at";

/// Convert Vec<u8> to fixed-size array with proper error handling.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], GatewayError> {
    v.try_into()
        .map_err(|_| GatewayError::Serialization(format!("invalid {label} length")))
}

fn to_timestamp(millis: i64, label: &str) -> Result<DateTime<Utc>, GatewayError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| GatewayError::Serialization(format!("invalid {label} timestamp")))
}

/// Reference remote table. Mirrors the hosted backend: rows live in one
/// `notes` table and every write is announced on the attached change bus.
pub struct SqliteGateway {
    conn: Mutex<Connection>,
    bus: Option<ChangeBus>,
}

impl SqliteGateway {
    pub fn open(path: &str) -> Result<Self, GatewayError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            bus: None,
        })
    }

    pub fn open_in_memory() -> Result<Self, GatewayError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            bus: None,
        })
    }

    pub fn with_bus(mut self, bus: ChangeBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn bus(&self) -> Option<&ChangeBus> {
        self.bus.as_ref()
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, GatewayError>,
    ) -> Result<T, GatewayError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| GatewayError::Persistence("connection lock poisoned".into()))?;
        f(&conn)
    }

    fn publish(&self, event: BusEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(event);
        }
    }

    pub fn get(&self, id: EntityId) -> Result<Option<EntityRow>, GatewayError> {
        self.with_conn(|conn| fetch_row(conn, id))
    }

    pub fn create_rule(&self, rule: &AutomationRule) -> Result<(), GatewayError> {
        let condition = serde_json::to_string(&rule.condition)
            .map_err(|e| GatewayError::Serialization(e.to_string()))?;
        let config = serde_json::to_string(&rule.action_config)
            .map_err(|e| GatewayError::Serialization(e.to_string()))?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO automations (id, name, trigger_kind, condition, action_kind, action_config, active) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    rule.id.as_bytes().as_slice(),
                    rule.name,
                    rule.trigger_kind,
                    condition,
                    rule.action_kind,
                    config,
                    rule.active,
                ],
            )?;
            Ok(())
        })
    }

    pub fn set_rule_active(&self, id: RuleId, active: bool) -> Result<(), GatewayError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE automations SET active = ?1 WHERE id = ?2",
                rusqlite::params![active, id.as_bytes().as_slice()],
            )?;
            Ok(())
        })
    }
}

fn read_row(row: &rusqlite::Row) -> Result<EntityRow, GatewayError> {
    let id_bytes: Vec<u8> = row.get(0)?;
    let color_raw: String = row.get(5)?;
    let created_ms: i64 = row.get(9)?;
    let updated_ms: i64 = row.get(10)?;
    Ok(EntityRow {
        id: EntityId::from_bytes(to_array::<16>(id_bytes, "id")?),
        is_folder: row.get(1)?,
        title: row.get(2)?,
        body: row.get(3)?,
        folder_name: row.get(4)?,
        color: Color::parse(&color_raw)?,
        parent_folder_name: row.get(6)?,
        order: row.get(7)?,
        list_mode: row.get(8)?,
        created_at: to_timestamp(created_ms, "created_at")?,
        updated_at: to_timestamp(updated_ms, "updated_at")?,
    })
}

fn fetch_row(conn: &Connection, id: EntityId) -> Result<Option<EntityRow>, GatewayError> {
    let mut stmt = conn.prepare(&format!("SELECT {ROW_COLUMNS} FROM notes WHERE id = ?1"))?;
    let mut rows = stmt.query(rusqlite::params![id.as_bytes().as_slice()])?;
    match rows.next()? {
        Some(row) => Ok(Some(read_row(row)?)),
        None => Ok(None),
    }
}

fn fetch_all(conn: &Connection) -> Result<Vec<EntityRow>, GatewayError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ROW_COLUMNS} FROM notes ORDER BY is_folder DESC, \"order\" ASC, created_at ASC"
    ))?;
    let mut rows = stmt.query([])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(read_row(row)?);
    }
    Ok(result)
}

fn insert_row(conn: &Connection, row: &EntityRow) -> Result<(), GatewayError> {
    conn.execute(
        &format!(
            "INSERT INTO notes ({ROW_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
        ),
        rusqlite::params![
            row.id.as_bytes().as_slice(),
            row.is_folder,
            row.title,
            row.body,
            row.folder_name,
            row.color.as_str(),
            row.parent_folder_name,
            row.order,
            row.list_mode,
            row.created_at.timestamp_millis(),
            row.updated_at.timestamp_millis(),
        ],
    )?;
    Ok(())
}

fn write_row(conn: &Connection, row: &EntityRow) -> Result<(), GatewayError> {
    let changed = conn.execute(
        "UPDATE notes SET title = ?1, content = ?2, folder_name = ?3, folder_color = ?4, \
         parent_folder_name = ?5, \"order\" = ?6, list_mode = ?7, updated_at = ?8 WHERE id = ?9",
        rusqlite::params![
            row.title,
            row.body,
            row.folder_name,
            row.color.as_str(),
            row.parent_folder_name,
            row.order,
            row.list_mode,
            row.updated_at.timestamp_millis(),
            row.id.as_bytes().as_slice(),
        ],
    )?;
    if changed == 0 {
        return Err(GatewayError::NotFound(row.id));
    }
    Ok(())
}

fn apply_update(conn: &Connection, id: EntityId, patch: &Patch) -> Result<EntityRow, GatewayError> {
    let current = fetch_row(conn, id)?.ok_or(GatewayError::NotFound(id))?;
    let mut entity = Entity::from(current);
    entity.apply_patch(patch)?;
    entity.touch(Utc::now());
    let row = EntityRow::from(&entity);
    write_row(conn, &row)?;
    Ok(row)
}

fn next_order(conn: &Connection, is_folder: bool) -> Result<i64, GatewayError> {
    let max: Option<i64> = conn
        .query_row(
            "SELECT MAX(\"order\") FROM notes WHERE is_folder = ?1",
            rusqlite::params![is_folder],
            |row| row.get(0),
        )
        .optional()?
        .flatten();
    Ok(max.unwrap_or(0) + 1)
}

fn least_used_color(conn: &Connection, is_folder: bool) -> Result<Color, GatewayError> {
    let mut stmt = conn.prepare("SELECT folder_color FROM notes WHERE is_folder = ?1")?;
    let used = stmt
        .query_map(rusqlite::params![is_folder], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let used: Vec<Color> = used.iter().filter_map(|c| Color::parse(c).ok()).collect();
    Ok(palette::least_used(&used))
}

fn read_rule(row: &rusqlite::Row) -> Result<AutomationRule, GatewayError> {
    let id_bytes: Vec<u8> = row.get(0)?;
    let condition: String = row.get(3)?;
    let config: String = row.get(5)?;
    let condition: BTreeMap<String, String> = serde_json::from_str(&condition)
        .map_err(|e| GatewayError::Serialization(format!("rule condition: {e}")))?;
    let action_config: BTreeMap<String, String> = serde_json::from_str(&config)
        .map_err(|e| GatewayError::Serialization(format!("rule config: {e}")))?;
    Ok(AutomationRule {
        id: RuleId::from_bytes(to_array::<16>(id_bytes, "rule id")?),
        name: row.get(1)?,
        trigger_kind: row.get(2)?,
        condition,
        action_kind: row.get(4)?,
        action_config,
        active: row.get(6)?,
    })
}

#[async_trait]
impl Gateway for SqliteGateway {
    async fn list_all(&self) -> Result<Vec<EntityRow>, GatewayError> {
        self.with_conn(fetch_all)
    }

    async fn create(&self, new: NewEntity) -> Result<EntityRow, GatewayError> {
        new.validate()
            .map_err(|e| GatewayError::Validation(e.to_string()))?;
        let row = self.with_conn(|conn| {
            let is_folder = new.is_folder();
            let color = match new.color() {
                Some(c) => c.clone(),
                None => least_used_color(conn, is_folder)?,
            };
            let order = next_order(conn, is_folder)?;
            let entity = new.into_entity(EntityId::new(), color, order, Utc::now());
            let row = EntityRow::from(&entity);
            insert_row(conn, &row)?;
            Ok(row)
        })?;
        tracing::debug!(id = %row.id, is_folder = row.is_folder, order = row.order, "row created");
        self.publish(BusEvent::EntityCreated { row: row.clone() });
        Ok(row)
    }

    async fn update(&self, id: EntityId, patch: Patch) -> Result<EntityRow, GatewayError> {
        let row = self.with_conn(|conn| apply_update(conn, id, &patch))?;
        self.publish(BusEvent::EntityUpdated { row: row.clone() });
        Ok(row)
    }

    async fn bulk_update(
        &self,
        items: Vec<(EntityId, Patch)>,
    ) -> Result<Vec<EntityRow>, GatewayError> {
        let total = items.len();
        let mut written = Vec::with_capacity(total);
        let mut failed = Vec::new();
        for (id, patch) in &items {
            match self.with_conn(|conn| apply_update(conn, *id, patch)) {
                Ok(row) => written.push(row),
                Err(e) => {
                    tracing::debug!(%id, error = %e, "bulk item failed");
                    failed.push(*id);
                }
            }
        }
        for row in &written {
            self.publish(BusEvent::EntityUpdated { row: row.clone() });
        }
        if !failed.is_empty() {
            return Err(GatewayError::PartialBatch { failed, total });
        }
        Ok(written)
    }

    async fn delete(&self, id: EntityId) -> Result<(), GatewayError> {
        let changed = self.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM notes WHERE id = ?1",
                rusqlite::params![id.as_bytes().as_slice()],
            )?)
        })?;
        if changed == 0 {
            return Err(GatewayError::NotFound(id));
        }
        self.publish(BusEvent::EntityDeleted { id });
        Ok(())
    }

    async fn delete_by_container(&self, name: &str) -> Result<usize, GatewayError> {
        let ids = self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM notes WHERE folder_name = ?1")?;
            let raw = stmt
                .query_map(rusqlite::params![name], |row| row.get::<_, Vec<u8>>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            conn.execute(
                "DELETE FROM notes WHERE folder_name = ?1",
                rusqlite::params![name],
            )?;
            raw.into_iter()
                .map(|bytes| Ok(EntityId::from_bytes(to_array::<16>(bytes, "id")?)))
                .collect::<Result<Vec<_>, GatewayError>>()
        })?;
        for id in &ids {
            self.publish(BusEvent::EntityDeleted { id: *id });
        }
        Ok(ids.len())
    }

    async fn insert_raw(&self, mut row: EntityRow) -> Result<EntityRow, GatewayError> {
        row.id = EntityId::new();
        self.with_conn(|conn| insert_row(conn, &row))?;
        tracing::debug!(id = %row.id, name = %row.folder_name, "raw row inserted");
        self.publish(BusEvent::EntityCreated { row: row.clone() });
        Ok(row)
    }
}

#[async_trait]
impl RuleSource for SqliteGateway {
    async fn list_active_rules(&self) -> Result<Vec<AutomationRule>, GatewayError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, trigger_kind, condition, action_kind, action_config, active \
                 FROM automations WHERE active = 1",
            )?;
            let mut rows = stmt.query([])?;
            let mut rules = Vec::new();
            while let Some(row) = rows.next()? {
                rules.push(read_rule(row)?);
            }
            Ok(rules)
        })
    }
}
