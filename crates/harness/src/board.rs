use std::sync::Arc;

use stickies_core::{AutomationRule, ChangeBus, Color, EntityRow, NewEntity, events::DEFAULT_CHANNEL};
use stickies_engine::{Session, SessionConfig};
use stickies_storage::{DraftStash, Gateway, GatewayError, SqliteGateway};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

use crate::faults::{FlakyGateway, RecordingDispatcher};

/// Install a test-friendly subscriber once. `RUST_LOG` overrides the default
/// `warn` filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// One shared remote table and change bus with any number of sessions attached.
/// Sessions talk to the remote through a fault-injecting wrapper.
pub struct TestBoard {
    bus: ChangeBus,
    remote: Arc<SqliteGateway>,
    flaky: Arc<FlakyGateway>,
    dispatcher: Arc<RecordingDispatcher>,
    dir: TempDir,
}

impl TestBoard {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        Self::with_bus_capacity(256)
    }

    pub fn with_bus_capacity(capacity: usize) -> Result<Self, Box<dyn std::error::Error>> {
        init_tracing();
        let bus = ChangeBus::new(DEFAULT_CHANNEL, capacity);
        let remote = Arc::new(SqliteGateway::open_in_memory()?.with_bus(bus.clone()));
        let flaky = Arc::new(FlakyGateway::new(remote.clone()));
        Ok(Self {
            bus,
            remote,
            flaky,
            dispatcher: Arc::new(RecordingDispatcher::default()),
            dir: tempfile::tempdir()?,
        })
    }

    pub fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    /// Direct access to the remote table, bypassing fault injection.
    pub fn remote(&self) -> &SqliteGateway {
        &self.remote
    }

    pub fn faults(&self) -> &FlakyGateway {
        &self.flaky
    }

    pub fn dispatcher(&self) -> &RecordingDispatcher {
        &self.dispatcher
    }

    pub fn session(&self) -> Session {
        self.session_with(SessionConfig::default())
    }

    pub fn session_with(&self, config: SessionConfig) -> Session {
        Session::new(config, self.flaky.clone(), &self.bus)
    }

    /// A session wired to the remote rule table and the recording dispatcher.
    pub fn automated_session(&self) -> Session {
        self.session()
            .with_automation(self.remote.clone(), self.dispatcher.clone())
    }

    /// Draft stash on disk under the board's temp dir. Repeated calls open the
    /// same file, as a restarted client would.
    pub fn draft_stash(&self) -> Result<Arc<DraftStash>, Box<dyn std::error::Error>> {
        let path = self.dir.path().join("drafts.db");
        let path = path.to_str().ok_or("temp path is not utf-8")?;
        Ok(Arc::new(DraftStash::open(path)?))
    }

    pub async fn seed_note(
        &self,
        title: &str,
        body: &str,
        folder: &str,
    ) -> Result<EntityRow, GatewayError> {
        self.remote.create(NewEntity::note(title, body, folder)).await
    }

    pub async fn seed_colored_note(
        &self,
        title: &str,
        folder: &str,
        color: Color,
    ) -> Result<EntityRow, GatewayError> {
        self.remote
            .create(NewEntity::note(title, "body", folder).with_color(color))
            .await
    }

    pub async fn seed_folder(
        &self,
        name: &str,
        parent: Option<&str>,
    ) -> Result<EntityRow, GatewayError> {
        self.remote.create(NewEntity::folder(name, parent)).await
    }

    pub fn add_rule(&self, rule: &AutomationRule) -> Result<(), GatewayError> {
        self.remote.create_rule(rule)
    }

    /// Remote rows, notes only, in the given folder, sorted by order.
    pub async fn remote_notes_in(&self, folder: &str) -> Result<Vec<EntityRow>, GatewayError> {
        let mut rows: Vec<EntityRow> = self
            .remote
            .list_all()
            .await?
            .into_iter()
            .filter(|r| !r.is_folder && r.folder_name == folder)
            .collect();
        rows.sort_by_key(|r| r.order);
        Ok(rows)
    }
}
