//! Automation trigger engine: matches created events against a periodically
//! refreshed rule table and hands matches to a fire-and-forget dispatcher.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use stickies_core::{AutomationRule, Entity, EntityRow};
use stickies_storage::RuleSource;
use tokio::time::Instant;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    Created,
}

impl TriggerKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "created" | "note_created" | "note-created" | "entity-created" => Some(Self::Created),
            _ => None,
        }
    }
}

/// Performs a rule's action. Must return immediately; delivery happens in the
/// background and its failures are never reported back.
pub trait ActionDispatcher: Send + Sync {
    fn dispatch(&self, rule: &AutomationRule, row: &EntityRow);
}

/// Sends light and webhook actions over HTTP.
pub struct HttpRelayDispatcher {
    client: reqwest::Client,
    relay_url: Option<String>,
    group_id: Option<String>,
}

impl HttpRelayDispatcher {
    pub fn new(relay_url: Option<String>, group_id: Option<String>) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| EngineError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            relay_url,
            group_id,
        })
    }

    /// Target URL and JSON body for a rule, or None when the action kind is
    /// unknown or has nowhere to go.
    pub fn request_for(&self, rule: &AutomationRule, row: &EntityRow) -> Option<(String, serde_json::Value)> {
        match rule.action_kind.as_str() {
            "flash" | "hue" => {
                let url = rule
                    .action_config
                    .get("url")
                    .cloned()
                    .or_else(|| self.relay_url.clone())?;
                let color = rule
                    .action_config
                    .get("color")
                    .cloned()
                    .unwrap_or_else(|| row.color.to_string());
                let group_id = rule
                    .action_config
                    .get("group_id")
                    .cloned()
                    .or_else(|| self.group_id.clone());
                Some((url, json!({ "color": color, "group_id": group_id })))
            }
            "webhook" => {
                let url = rule.action_config.get("url")?.clone();
                let body = serde_json::to_value(row).ok()?;
                Some((url, body))
            }
            _ => None,
        }
    }
}

impl ActionDispatcher for HttpRelayDispatcher {
    fn dispatch(&self, rule: &AutomationRule, row: &EntityRow) {
        let Some((url, body)) = self.request_for(rule, row) else {
            tracing::debug!(rule = %rule.name, action = %rule.action_kind, "no request for action, ignored");
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(rule = %rule.name, "no runtime for action dispatch");
            return;
        };
        let client = self.client.clone();
        let rule_name = rule.name.clone();
        handle.spawn(async move {
            match client.post(&url).json(&body).send().await {
                Ok(resp) if !resp.status().is_success() => {
                    tracing::warn!(rule = %rule_name, status = %resp.status(), "action rejected");
                }
                Ok(_) => tracing::debug!(rule = %rule_name, "action delivered"),
                Err(e) => tracing::warn!(rule = %rule_name, error = %e, "action failed"),
            }
        });
    }
}

pub struct AutomationEngine {
    source: Arc<dyn RuleSource>,
    dispatcher: Arc<dyn ActionDispatcher>,
    rules: Vec<AutomationRule>,
    refresh_every: Duration,
    refreshed_at: Option<Instant>,
}

impl AutomationEngine {
    pub fn new(
        source: Arc<dyn RuleSource>,
        dispatcher: Arc<dyn ActionDispatcher>,
        refresh_every: Duration,
    ) -> Self {
        Self {
            source,
            dispatcher,
            rules: Vec::new(),
            refresh_every,
            refreshed_at: None,
        }
    }

    pub fn rules(&self) -> &[AutomationRule] {
        &self.rules
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        self.refreshed_at
            .is_none_or(|at| now.saturating_duration_since(at) >= self.refresh_every)
    }

    /// Reload the rule table. On failure the previous table stays in place.
    pub async fn refresh(&mut self) -> Result<usize, EngineError> {
        self.refreshed_at = Some(Instant::now());
        match self.source.list_active_rules().await {
            Ok(rules) => {
                self.rules = rules;
                tracing::debug!(rules = self.rules.len(), "automation rules refreshed");
                Ok(self.rules.len())
            }
            Err(e) => {
                tracing::warn!(error = %e, "automation rule refresh failed");
                Err(e.into())
            }
        }
    }

    pub async fn refresh_if_stale(&mut self, now: Instant) {
        if self.is_stale(now) {
            // Failures keep the old table and are retried next period.
            let _ = self.refresh().await;
        }
    }

    /// Rules that fire for a newly created note.
    pub fn matching(&self, entity: &Entity) -> Vec<&AutomationRule> {
        if entity.is_folder() {
            return Vec::new();
        }
        self.rules
            .iter()
            .filter(|r| r.active && TriggerKind::parse(&r.trigger_kind) == Some(TriggerKind::Created))
            .filter(|r| r.matches(entity))
            .collect()
    }

    /// Evaluate a created row and dispatch every match. Returns the number of
    /// rules fired.
    pub fn on_created(&self, row: &EntityRow) -> usize {
        let entity = Entity::from(row.clone());
        let fired = self.matching(&entity);
        for rule in &fired {
            tracing::info!(rule = %rule.name, action = %rule.action_kind, id = %row.id, "automation fired");
            self.dispatcher.dispatch(rule, row);
        }
        fired.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use stickies_core::{Color, EntityId, NewEntity};
    use stickies_storage::GatewayError;

    use super::*;

    struct StaticRules(Mutex<Result<Vec<AutomationRule>, String>>);

    #[async_trait]
    impl RuleSource for StaticRules {
        async fn list_active_rules(&self) -> Result<Vec<AutomationRule>, GatewayError> {
            self.0
                .lock()
                .unwrap()
                .clone()
                .map_err(GatewayError::Persistence)
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl ActionDispatcher for Recorder {
        fn dispatch(&self, rule: &AutomationRule, _row: &EntityRow) {
            self.0.lock().unwrap().push(rule.name.clone());
        }
    }

    fn row(color: Color, is_folder: bool) -> EntityRow {
        let new = if is_folder {
            NewEntity::folder("F", None)
        } else {
            NewEntity::note("t", "b", "G")
        };
        EntityRow::from(new.into_entity(EntityId::new(), color, 1, Utc::now()))
    }

    fn engine(rules: Vec<AutomationRule>) -> (AutomationEngine, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let source = Arc::new(StaticRules(Mutex::new(Ok(rules))));
        (
            AutomationEngine::new(source, recorder.clone(), Duration::from_secs(60)),
            recorder,
        )
    }

    #[tokio::test]
    async fn yellow_rule_fires_only_for_yellow_notes() {
        let rule = AutomationRule::new("yellow", "created", "flash").when("color", "#FFCC00");
        let (mut engine, recorder) = engine(vec![rule]);
        engine.refresh().await.unwrap();

        assert_eq!(engine.on_created(&row(Color::palette(3), false)), 1);
        assert_eq!(engine.on_created(&row(Color::palette(0), false)), 0);
        assert_eq!(engine.on_created(&row(Color::palette(3), true)), 0);
        assert_eq!(*recorder.0.lock().unwrap(), ["yellow"]);
    }

    #[tokio::test]
    async fn unknown_trigger_kind_never_fires() {
        let rule = AutomationRule::new("x", "deleted", "flash");
        let (mut engine, recorder) = engine(vec![rule]);
        engine.refresh().await.unwrap();
        assert_eq!(engine.on_created(&row(Color::palette(3), false)), 0);
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_failure_keeps_old_table() {
        let rule = AutomationRule::new("keep", "created", "flash");
        let source = Arc::new(StaticRules(Mutex::new(Ok(vec![rule]))));
        let mut engine = AutomationEngine::new(source.clone(), Arc::new(Recorder::default()), Duration::from_secs(60));
        engine.refresh_if_stale(Instant::now()).await;
        assert_eq!(engine.rules().len(), 1);

        *source.0.lock().unwrap() = Err("offline".into());
        assert!(!engine.is_stale(Instant::now()));
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(engine.is_stale(Instant::now()));
        engine.refresh_if_stale(Instant::now()).await;
        assert_eq!(engine.rules().len(), 1);
        assert!(!engine.is_stale(Instant::now()));
    }

    #[test]
    fn relay_request_shapes() {
        let dispatcher = HttpRelayDispatcher::new(Some("http://relay.local/flash".into()), Some("3".into())).unwrap();
        let yellow = row(Color::palette(3), false);

        let flash = AutomationRule::new("f", "created", "flash");
        let (url, body) = dispatcher.request_for(&flash, &yellow).unwrap();
        assert_eq!(url, "http://relay.local/flash");
        assert_eq!(body["color"], "#FFCC00");
        assert_eq!(body["group_id"], "3");

        let hook = AutomationRule::new("w", "created", "webhook").with_config("url", "http://hook.local");
        let (url, body) = dispatcher.request_for(&hook, &yellow).unwrap();
        assert_eq!(url, "http://hook.local");
        assert_eq!(body["title"], "t");

        let unknown = AutomationRule::new("u", "created", "sms");
        assert!(dispatcher.request_for(&unknown, &yellow).is_none());

        let no_relay = HttpRelayDispatcher::new(None, None).unwrap();
        assert!(no_relay.request_for(&flash, &yellow).is_none());
    }

    #[test]
    fn trigger_aliases() {
        assert_eq!(TriggerKind::parse("Note_Created"), Some(TriggerKind::Created));
        assert_eq!(TriggerKind::parse("updated"), None);
    }
}
