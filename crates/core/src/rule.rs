use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::ids::RuleId;

/// A row of the automation table. Read-only from the session's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationRule {
    pub id: RuleId,
    pub name: String,
    pub trigger_kind: String,
    /// Field → expected value. Every entry must match for the rule to fire.
    #[serde(default)]
    pub condition: BTreeMap<String, String>,
    pub action_kind: String,
    #[serde(default)]
    pub action_config: BTreeMap<String, String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl AutomationRule {
    pub fn new(name: &str, trigger_kind: &str, action_kind: &str) -> Self {
        Self {
            id: RuleId::new(),
            name: name.to_string(),
            trigger_kind: trigger_kind.to_string(),
            condition: BTreeMap::new(),
            action_kind: action_kind.to_string(),
            action_config: BTreeMap::new(),
            active: true,
        }
    }

    pub fn when(mut self, field: &str, expected: &str) -> Self {
        self.condition.insert(field.to_string(), expected.to_string());
        self
    }

    pub fn with_config(mut self, key: &str, value: &str) -> Self {
        self.action_config.insert(key.to_string(), value.to_string());
        self
    }

    /// Equality over every predicate. Colors compare case-insensitively; a
    /// field the entity does not have never matches.
    pub fn matches(&self, entity: &Entity) -> bool {
        self.condition.iter().all(|(field, expected)| {
            let Some(actual) = entity.field(field) else {
                return false;
            };
            let actual = actual.to_condition_text();
            if field == crate::field_value::fields::COLOR {
                actual.eq_ignore_ascii_case(expected.trim())
            } else {
                actual == *expected
            }
        })
    }
}
