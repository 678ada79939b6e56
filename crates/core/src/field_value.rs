use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Boolean(bool),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Text form used when comparing against automation rule conditions.
    pub fn to_condition_text(&self) -> String {
        match self {
            FieldValue::Null => String::new(),
            FieldValue::Text(s) => s.clone(),
            FieldValue::Integer(n) => n.to_string(),
            FieldValue::Boolean(b) => b.to_string(),
        }
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Integer(n)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Boolean(b)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// Field keys shared by the flat row shape and partial updates.
pub mod fields {
    pub const TITLE: &str = "title";
    pub const BODY: &str = "body";
    /// A note's containing folder, or a folder's own name.
    pub const FOLDER_NAME: &str = "folder_name";
    pub const COLOR: &str = "color";
    pub const ORDER: &str = "order";
    pub const PARENT_FOLDER_NAME: &str = "parent_folder_name";
    pub const ICON: &str = "icon";
    pub const LIST_MODE: &str = "list_mode";
    pub const IS_FOLDER: &str = "is_folder";
}

/// A partial field set for `update`/`bulk_update`. Keys are validated when the
/// patch is applied to an entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    fields: BTreeMap<String, FieldValue>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn title(self, title: &str) -> Self {
        self.set(fields::TITLE, title)
    }

    pub fn body(self, body: &str) -> Self {
        self.set(fields::BODY, body)
    }

    pub fn folder_name(self, name: &str) -> Self {
        self.set(fields::FOLDER_NAME, name)
    }

    pub fn color(self, color: &crate::Color) -> Self {
        self.set(fields::COLOR, color.as_str())
    }

    pub fn order(self, order: i64) -> Self {
        self.set(fields::ORDER, order)
    }

    pub fn parent(self, parent: Option<&str>) -> Self {
        self.set(fields::PARENT_FOLDER_NAME, parent)
    }

    pub fn icon(self, icon: Option<&str>) -> Self {
        self.set(fields::ICON, icon)
    }

    pub fn list_mode(self, on: bool) -> Self {
        self.set(fields::LIST_MODE, on)
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_maps_to_null() {
        let none: Option<&str> = None;
        assert_eq!(FieldValue::from(none), FieldValue::Null);
        assert_eq!(FieldValue::from(Some("x")), FieldValue::Text("x".into()));
    }

    #[test]
    fn condition_text_forms() {
        assert_eq!(FieldValue::Integer(3).to_condition_text(), "3");
        assert_eq!(FieldValue::Boolean(true).to_condition_text(), "true");
        assert_eq!(FieldValue::Null.to_condition_text(), "");
    }

    #[test]
    fn patch_builder_overwrites_same_key() {
        let patch = Patch::new().order(1).order(4).title("A");
        assert_eq!(patch.len(), 2);
        assert_eq!(patch.get(fields::ORDER), Some(&FieldValue::Integer(4)));
    }

    #[test]
    fn msgpack_keeps_variant() {
        let v = FieldValue::Text("hello".into());
        let bytes = v.to_msgpack().unwrap();
        assert_eq!(FieldValue::from_msgpack(&bytes).unwrap(), v);
    }
}
