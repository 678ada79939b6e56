use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::field_value::{FieldValue, Patch, fields};
use crate::ids::EntityId;
use crate::palette::Color;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub id: EntityId,
    pub title: String,
    pub body: String,
    /// Name of the containing folder. Not a foreign key: the folder may be virtual.
    pub folder_name: String,
    pub color: Color,
    pub order: i64,
    pub list_mode: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    pub id: EntityId,
    pub name: String,
    pub color: Color,
    pub parent: Option<String>,
    pub order: i64,
    pub icon: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    Note(Note),
    Folder(Folder),
}

impl Entity {
    pub fn id(&self) -> EntityId {
        match self {
            Entity::Note(n) => n.id,
            Entity::Folder(f) => f.id,
        }
    }

    pub fn set_id(&mut self, id: EntityId) {
        match self {
            Entity::Note(n) => n.id = id,
            Entity::Folder(f) => f.id = id,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, Entity::Folder(_))
    }

    pub fn as_note(&self) -> Option<&Note> {
        match self {
            Entity::Note(n) => Some(n),
            Entity::Folder(_) => None,
        }
    }

    pub fn as_folder(&self) -> Option<&Folder> {
        match self {
            Entity::Folder(f) => Some(f),
            Entity::Note(_) => None,
        }
    }

    pub fn color(&self) -> &Color {
        match self {
            Entity::Note(n) => &n.color,
            Entity::Folder(f) => &f.color,
        }
    }

    pub fn order(&self) -> i64 {
        match self {
            Entity::Note(n) => n.order,
            Entity::Folder(f) => f.order,
        }
    }

    pub fn set_order(&mut self, order: i64) {
        match self {
            Entity::Note(n) => n.order = order,
            Entity::Folder(f) => f.order = order,
        }
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        match self {
            Entity::Note(n) => n.updated_at,
            Entity::Folder(f) => f.updated_at,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        match self {
            Entity::Note(n) => n.updated_at = now,
            Entity::Folder(f) => f.updated_at = now,
        }
    }

    /// Display label: a note's title or a folder's name.
    pub fn label(&self) -> &str {
        match self {
            Entity::Note(n) => &n.title,
            Entity::Folder(f) => &f.name,
        }
    }

    /// Look up a field by its wire key. `folder` is accepted as an alias of
    /// `folder_name`.
    pub fn field(&self, key: &str) -> Option<FieldValue> {
        let value = match (self, key) {
            (_, fields::IS_FOLDER) => FieldValue::Boolean(self.is_folder()),
            (_, fields::COLOR) => FieldValue::Text(self.color().as_str().to_string()),
            (_, fields::ORDER) => FieldValue::Integer(self.order()),
            (Entity::Note(n), fields::TITLE) => FieldValue::Text(n.title.clone()),
            (Entity::Note(n), fields::BODY) => FieldValue::Text(n.body.clone()),
            (Entity::Note(n), fields::FOLDER_NAME | "folder") => {
                FieldValue::Text(n.folder_name.clone())
            }
            (Entity::Note(n), fields::LIST_MODE) => FieldValue::Boolean(n.list_mode),
            (Entity::Folder(f), fields::TITLE | fields::FOLDER_NAME | "folder") => {
                FieldValue::Text(f.name.clone())
            }
            (Entity::Folder(f), fields::PARENT_FOLDER_NAME) => f.parent.clone().into(),
            (Entity::Folder(f), fields::ICON) => f.icon.clone().into(),
            _ => return None,
        };
        Some(value)
    }

    /// Apply a partial field set. Either every key applies or the entity is
    /// left unchanged.
    pub fn apply_patch(&mut self, patch: &Patch) -> Result<(), CoreError> {
        let mut next = self.clone();
        for (key, value) in patch.iter() {
            next.apply_field(key, value)?;
        }
        *self = next;
        Ok(())
    }

    fn apply_field(&mut self, key: &str, value: &FieldValue) -> Result<(), CoreError> {
        match (self, key) {
            (Entity::Note(n), fields::TITLE) => n.title = expect_text(key, value)?,
            (Entity::Note(n), fields::BODY) => n.body = expect_text(key, value)?,
            (Entity::Note(n), fields::FOLDER_NAME) => {
                n.folder_name = expect_name(key, value)?;
            }
            (Entity::Note(n), fields::LIST_MODE) => {
                n.list_mode = value.as_boolean().ok_or_else(|| type_error(key, "a boolean"))?;
            }
            (Entity::Folder(f), fields::FOLDER_NAME) => f.name = expect_name(key, value)?,
            (Entity::Folder(f), fields::PARENT_FOLDER_NAME) => {
                f.parent = expect_optional_text(key, value)?;
            }
            (Entity::Folder(f), fields::ICON) => f.icon = expect_optional_text(key, value)?,
            (this, fields::COLOR) => {
                let raw = value.as_text().ok_or_else(|| type_error(key, "a color"))?;
                let color = Color::parse(raw)?;
                match this {
                    Entity::Note(n) => n.color = color,
                    Entity::Folder(f) => f.color = color,
                }
            }
            (this, fields::ORDER) => {
                let order = value.as_integer().ok_or_else(|| type_error(key, "an integer"))?;
                this.set_order(order);
            }
            _ => return Err(CoreError::UnknownField(key.to_string())),
        }
        Ok(())
    }
}

fn type_error(field: &str, expected: &'static str) -> CoreError {
    CoreError::FieldType {
        field: field.to_string(),
        expected,
    }
}

fn expect_text(key: &str, value: &FieldValue) -> Result<String, CoreError> {
    value
        .as_text()
        .map(str::to_string)
        .ok_or_else(|| type_error(key, "text"))
}

fn expect_name(key: &str, value: &FieldValue) -> Result<String, CoreError> {
    let name = expect_text(key, value)?;
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CoreError::MissingField(fields::FOLDER_NAME));
    }
    Ok(trimmed.to_string())
}

fn expect_optional_text(key: &str, value: &FieldValue) -> Result<Option<String>, CoreError> {
    match value {
        FieldValue::Null => Ok(None),
        FieldValue::Text(s) if s.trim().is_empty() => Ok(None),
        FieldValue::Text(s) => Ok(Some(s.trim().to_string())),
        _ => Err(type_error(key, "text or null")),
    }
}

/// The flat record shape shared by notes and folders on the wire and in the
/// remote table. A folder's `title` mirrors its name and its `body` carries the
/// icon glyph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRow {
    pub id: EntityId,
    pub is_folder: bool,
    pub title: String,
    #[serde(rename = "content")]
    pub body: String,
    pub folder_name: String,
    #[serde(rename = "folder_color")]
    pub color: Color,
    #[serde(default)]
    pub parent_folder_name: Option<String>,
    pub order: i64,
    #[serde(default)]
    pub list_mode: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Entity> for EntityRow {
    fn from(entity: &Entity) -> Self {
        match entity {
            Entity::Note(n) => EntityRow {
                id: n.id,
                is_folder: false,
                title: n.title.clone(),
                body: n.body.clone(),
                folder_name: n.folder_name.clone(),
                color: n.color.clone(),
                parent_folder_name: None,
                order: n.order,
                list_mode: Some(n.list_mode),
                created_at: n.created_at,
                updated_at: n.updated_at,
            },
            Entity::Folder(f) => EntityRow {
                id: f.id,
                is_folder: true,
                title: f.name.clone(),
                body: f.icon.clone().unwrap_or_default(),
                folder_name: f.name.clone(),
                color: f.color.clone(),
                parent_folder_name: f.parent.clone(),
                order: f.order,
                list_mode: None,
                created_at: f.created_at,
                updated_at: f.updated_at,
            },
        }
    }
}

impl From<Entity> for EntityRow {
    fn from(entity: Entity) -> Self {
        EntityRow::from(&entity)
    }
}

impl From<EntityRow> for Entity {
    fn from(row: EntityRow) -> Self {
        if row.is_folder {
            let icon = row.body.trim();
            Entity::Folder(Folder {
                id: row.id,
                name: row.folder_name,
                color: row.color,
                parent: row.parent_folder_name.filter(|p| !p.trim().is_empty()),
                order: row.order,
                icon: (!icon.is_empty()).then(|| icon.to_string()),
                created_at: row.created_at,
                updated_at: row.updated_at,
            })
        } else {
            Entity::Note(Note {
                id: row.id,
                title: row.title,
                body: row.body,
                folder_name: row.folder_name,
                color: row.color,
                order: row.order,
                list_mode: row.list_mode.unwrap_or(false),
                created_at: row.created_at,
                updated_at: row.updated_at,
            })
        }
    }
}

/// A create request. Missing colors and orders are filled in by the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NewEntity {
    Note {
        title: String,
        body: String,
        folder_name: String,
        color: Option<Color>,
    },
    Folder {
        name: String,
        color: Option<Color>,
        parent: Option<String>,
        icon: Option<String>,
    },
}

impl NewEntity {
    pub fn note(title: &str, body: &str, folder_name: &str) -> Self {
        NewEntity::Note {
            title: title.to_string(),
            body: body.to_string(),
            folder_name: folder_name.to_string(),
            color: None,
        }
    }

    pub fn folder(name: &str, parent: Option<&str>) -> Self {
        NewEntity::Folder {
            name: name.to_string(),
            color: None,
            parent: parent.map(str::to_string),
            icon: None,
        }
    }

    pub fn with_color(mut self, c: Color) -> Self {
        match &mut self {
            NewEntity::Note { color, .. } | NewEntity::Folder { color, .. } => *color = Some(c),
        }
        self
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, NewEntity::Folder { .. })
    }

    pub fn color(&self) -> Option<&Color> {
        match self {
            NewEntity::Note { color, .. } | NewEntity::Folder { color, .. } => color.as_ref(),
        }
    }

    /// Required-field check run before any write leaves the session.
    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            NewEntity::Note {
                title,
                body,
                folder_name,
                ..
            } => {
                if title.trim().is_empty() {
                    return Err(CoreError::MissingField(fields::TITLE));
                }
                if body.trim().is_empty() {
                    return Err(CoreError::MissingField(fields::BODY));
                }
                if folder_name.trim().is_empty() {
                    return Err(CoreError::MissingField(fields::FOLDER_NAME));
                }
            }
            NewEntity::Folder { name, .. } => {
                if name.trim().is_empty() {
                    return Err(CoreError::MissingField(fields::FOLDER_NAME));
                }
            }
        }
        Ok(())
    }

    /// Build the entity this request would produce.
    pub fn into_entity(
        self,
        id: EntityId,
        color: Color,
        order: i64,
        now: DateTime<Utc>,
    ) -> Entity {
        match self {
            NewEntity::Note {
                title,
                body,
                folder_name,
                ..
            } => Entity::Note(Note {
                id,
                title: title.trim().to_string(),
                body,
                folder_name: folder_name.trim().to_string(),
                color,
                order,
                list_mode: false,
                created_at: now,
                updated_at: now,
            }),
            NewEntity::Folder {
                name, parent, icon, ..
            } => Entity::Folder(Folder {
                id,
                name: name.trim().to_string(),
                color,
                parent: parent.map(|p| p.trim().to_string()).filter(|p| !p.is_empty()),
                order,
                icon: icon.filter(|i| !i.trim().is_empty()),
                created_at: now,
                updated_at: now,
            }),
        }
    }
}
