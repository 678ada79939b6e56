//! Editor commits split into three steps so the session stays usable while
//! the remote write is in flight: `Session::begin_flush` applies the draft
//! locally, `PendingCommit::send` talks to the gateway without borrowing the
//! session, and `Session::finish_flush` settles the result.

use std::sync::Arc;

use chrono::Utc;
use stickies_core::{Entity, EntityId, EntityRow, NewEntity, Patch};
use stickies_storage::{Gateway, GatewayError};

use crate::autosave::{CommitOutcome, Draft, FlushReason, SkipReason};
use crate::error::EngineError;
use crate::notify::Notice;
use crate::optimistic::OptimisticWrite;
use crate::Session;

#[derive(Debug)]
enum CommitRequest {
    Update { id: EntityId, patch: Patch },
    Insert { provisional: EntityId, new: NewEntity },
}

/// Result of the shared flush gate.
pub enum Flush {
    Skipped(SkipReason),
    Pending(PendingCommit),
}

/// A draft applied to the local cache and awaiting its remote write. Must be
/// sent and handed back to `Session::finish_flush`; the editor refuses other
/// commits until then.
pub struct PendingCommit {
    reason: FlushReason,
    draft: Draft,
    request: CommitRequest,
    write: OptimisticWrite,
    gateway: Arc<dyn Gateway>,
}

/// A pending commit together with the gateway's answer.
pub struct SentCommit {
    reason: FlushReason,
    draft: Draft,
    request: CommitRequest,
    write: OptimisticWrite,
    result: Result<EntityRow, GatewayError>,
}

impl PendingCommit {
    pub fn reason(&self) -> FlushReason {
        self.reason
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    pub async fn send(self) -> SentCommit {
        let result = match &self.request {
            CommitRequest::Update { id, patch } => self.gateway.update(*id, patch.clone()).await,
            CommitRequest::Insert { new, .. } => self.gateway.create(new.clone()).await,
        };
        SentCommit {
            reason: self.reason,
            draft: self.draft,
            request: self.request,
            write: self.write,
            result,
        }
    }
}

impl Session {
    /// Gate and locally apply a commit of the open draft.
    ///
    /// An explicit save of a blank or body-less new draft is a validation
    /// error; every other skip is reported as `Flush::Skipped`.
    pub fn begin_flush(&mut self, reason: FlushReason) -> Result<Flush, EngineError> {
        let draft = match self.editor.prepare(reason) {
            Ok(draft) => draft,
            Err(skip) => return self.skipped(reason, skip).map(Flush::Skipped),
        };
        match self.apply_locally(&draft) {
            Ok((request, write)) => Ok(Flush::Pending(PendingCommit {
                reason,
                draft,
                request,
                write,
                gateway: self.gateway.clone(),
            })),
            Err(e) => {
                self.editor.fail();
                self.notifier.push(Notice::SaveFailed(e.to_string()));
                Err(e)
            }
        }
    }

    fn skipped(&mut self, reason: FlushReason, skip: SkipReason) -> Result<SkipReason, EngineError> {
        let blocking = match skip {
            SkipReason::EmptyDraft | SkipReason::MissingBody => true,
            // A blank new draft is never dirty.
            SkipReason::NotDirty => self.editor.draft().is_some_and(|d| d.entity_id.is_none()),
            _ => false,
        };
        if reason == FlushReason::ExplicitSave && blocking {
            return Err(EngineError::Validation(match skip {
                SkipReason::MissingBody => "a new note needs body text".to_string(),
                _ => "title and body are both empty".to_string(),
            }));
        }
        if reason == FlushReason::ExplicitSave && skip == SkipReason::NotDirty {
            self.notifier.push(Notice::Saved);
        }
        Ok(skip)
    }

    fn apply_locally(&mut self, draft: &Draft) -> Result<(CommitRequest, OptimisticWrite), EngineError> {
        match draft.entity_id {
            Some(id) => {
                let patch = draft.to_patch();
                let write = OptimisticWrite::begin(&self.store, "Save", [id]);
                self.store.apply(id, &patch)?;
                self.echo.record_local_write(id);
                Ok((CommitRequest::Update { id, patch }, write))
            }
            None => {
                let new = draft.to_new_entity();
                new.validate()?;
                let provisional = EntityId::new();
                let order = self.next_note_order(&draft.folder_name);
                let write = OptimisticWrite::begin(&self.store, "Create", [provisional]);
                self.store.upsert(
                    new.clone()
                        .into_entity(provisional, draft.color.clone(), order, Utc::now()),
                );
                Ok((CommitRequest::Insert { provisional, new }, write))
            }
        }
    }

    /// Settle a sent commit: confirm or roll back the cache and move the
    /// editor out of Committing. Edits made while the write was in flight
    /// stay dirty.
    pub fn finish_flush(&mut self, sent: SentCommit) -> Result<CommitOutcome, EngineError> {
        let SentCommit {
            reason,
            draft,
            request,
            write,
            result,
        } = sent;
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                let err = EngineError::from(e);
                tracing::warn!(label = write.label(), error = %err, "commit rolled back");
                write.rollback(&mut self.store);
                self.editor.fail();
                self.notifier.push(Notice::SaveFailed(err.to_string()));
                return Err(err);
            }
        };

        write.commit();
        if let CommitRequest::Insert { provisional, .. } = request {
            self.store.remove(provisional);
        }
        let id = row.id;
        self.store.upsert(Entity::from(row));

        let created = draft.entity_id.is_none();
        let mut persisted = draft;
        persisted.entity_id = Some(id);
        self.editor.complete(persisted);
        if !self.editor.is_dirty() {
            self.clear_stash();
        }
        if reason == FlushReason::ExplicitSave {
            self.notifier.push(Notice::Saved);
        }
        Ok(if created {
            CommitOutcome::Created(id)
        } else {
            CommitOutcome::Updated(id)
        })
    }
}
