use std::time::Duration;

use stickies_core::{BusEvent, NewEntity};
use stickies_engine::{BusOutcome, EditorState, Notice};
use stickies_harness::TestBoard;

// ============================================================================
// Sync and round trip
// ============================================================================

#[tokio::test]
async fn created_note_reads_back_unchanged() -> Result<(), Box<dyn std::error::Error>> {
    let board = TestBoard::new()?;
    let row = board.seed_note("A", "B", "G").await?;

    let mut session = board.session();
    assert_eq!(session.sync().await?, 1);

    let note = session.store().note(row.id).ok_or("note missing after sync")?;
    assert_eq!(note.title, "A");
    assert_eq!(note.body, "B");
    assert_eq!(note.folder_name, "G");
    assert!(note.color.in_palette());
    Ok(())
}

#[tokio::test]
async fn local_create_reaches_other_sessions() -> Result<(), Box<dyn std::error::Error>> {
    let board = TestBoard::new()?;
    let mut writer = board.session();
    let mut reader = board.session();

    writer.open_new_note(Some("G")).await?;
    writer.set_title("Hello");
    writer.set_body("world");
    let id = match writer.save().await? {
        stickies_engine::CommitOutcome::Created(id) => id,
        other => return Err(format!("expected a create, got {other:?}").into()),
    };

    let outcomes = reader.pump().await?;
    assert_eq!(
        outcomes,
        [BusOutcome::Applied {
            event_type: "entity-created",
            id: Some(id),
        }]
    );
    assert!(reader.store().contains(id));
    assert!(reader.notices().contains(&Notice::Added("Hello".into())));

    // The originator already holds the row.
    assert_eq!(writer.pump().await?, [BusOutcome::Duplicate(id)]);
    assert_eq!(writer.store().len(), 1);
    Ok(())
}

// ============================================================================
// Echo guard
// ============================================================================

#[tokio::test(start_paused = true)]
async fn own_echo_is_dropped() -> Result<(), Box<dyn std::error::Error>> {
    let board = TestBoard::new()?;
    let row = board.seed_note("A", "B", "G").await?;
    let mut session = board.session();
    session.sync().await?;

    session.move_note(row.id, "H").await?;
    let outcomes = session.pump().await?;
    assert!(matches!(outcomes.as_slice(), [BusOutcome::Dropped(d)] if d.id == row.id));
    assert_eq!(session.store().note(row.id).ok_or("missing")?.folder_name, "H");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn remote_update_inside_window_is_dropped_and_after_window_applied()
-> Result<(), Box<dyn std::error::Error>> {
    let board = TestBoard::new()?;
    let row = board.seed_note("A", "B", "G").await?;
    let mut first = board.session();
    let mut second = board.session();
    first.sync().await?;
    second.sync().await?;

    first.move_note(row.id, "H").await?;
    first.pump().await?;

    tokio::time::advance(Duration::from_secs(1)).await;
    second.pump().await?;
    second.move_note(row.id, "K").await?;
    let outcomes = first.pump().await?;
    assert!(matches!(outcomes.as_slice(), [BusOutcome::Dropped(_)]));
    assert_eq!(first.store().note(row.id).ok_or("missing")?.folder_name, "H");

    tokio::time::advance(Duration::from_secs(3)).await;
    second.pump().await?;
    second.move_note(row.id, "L").await?;
    let outcomes = first.pump().await?;
    assert!(matches!(outcomes.as_slice(), [BusOutcome::Applied { .. }]));
    assert_eq!(first.store().note(row.id).ok_or("missing")?.folder_name, "L");
    Ok(())
}

// ============================================================================
// Remote events into local state
// ============================================================================

#[tokio::test]
async fn remote_delete_discards_open_draft() -> Result<(), Box<dyn std::error::Error>> {
    let board = TestBoard::new()?;
    let row = board.seed_note("A", "B", "G").await?;
    let mut editor = board.session();
    let mut other = board.session();
    editor.sync().await?;
    other.sync().await?;

    editor.open_note(row.id).await?;
    other.delete_note(row.id).await?;
    editor.pump().await?;

    assert!(!editor.store().contains(row.id));
    assert!(editor.editor().draft().is_none());
    assert_eq!(editor.editor().state(), EditorState::Idle);
    Ok(())
}

#[tokio::test]
async fn remote_update_refreshes_open_draft() -> Result<(), Box<dyn std::error::Error>> {
    let board = TestBoard::new()?;
    let row = board.seed_note("Plan", "step 1", "Work").await?;
    let mut phone = board.session();
    let mut laptop = board.session();
    phone.sync().await?;
    laptop.sync().await?;

    laptop.open_note(row.id).await?;
    phone.open_note(row.id).await?;
    phone.set_body("step 1\nstep 2");
    phone.save().await?;

    laptop.pump().await?;
    let draft = laptop.editor().draft().ok_or("draft closed")?;
    assert_eq!(draft.body, "step 1\nstep 2");
    assert!(!laptop.editor().is_dirty());
    Ok(())
}

#[tokio::test]
async fn automation_mode_banner_and_resync() -> Result<(), Box<dyn std::error::Error>> {
    let board = TestBoard::new()?;
    let mut session = board.session();

    board.bus().publish(BusEvent::AutomationModeStarted {
        message: "Sorting your board".into(),
    });
    session.pump().await?;
    assert_eq!(session.automation_banner(), Some("Sorting your board"));

    board.seed_note("sorted", "x", "Inbox").await?;
    board.bus().publish(BusEvent::AutomationModeEnded);
    let outcomes = session.pump().await?;
    assert_eq!(outcomes.last(), Some(&BusOutcome::Resynced));
    assert_eq!(session.automation_banner(), None);
    assert_eq!(session.store().len(), 1);
    assert!(session.notices().contains(&Notice::AutomationDone));
    Ok(())
}

#[tokio::test]
async fn shared_location_skips_the_sender() -> Result<(), Box<dyn std::error::Error>> {
    let board = TestBoard::new()?;
    board.seed_folder("Work", None).await?;
    let mut sender = board.session();
    let mut receiver = board.session();
    sender.sync().await?;
    receiver.sync().await?;

    sender.enter_folder("Work")?;
    sender.share_location();

    assert_eq!(sender.pump().await?, [BusOutcome::Ignored]);
    receiver.pump().await?;
    assert_eq!(receiver.navigator().current(), Some("Work"));
    Ok(())
}

#[tokio::test]
async fn lagged_receiver_resyncs() -> Result<(), Box<dyn std::error::Error>> {
    let board = TestBoard::with_bus_capacity(2)?;
    let mut session = board.session();
    for i in 0..5 {
        board.seed_note(&format!("n{i}"), "x", "G").await?;
    }

    let outcomes = session.pump().await?;
    assert!(outcomes.contains(&BusOutcome::Resynced));
    assert_eq!(session.store().len(), 5);
    Ok(())
}

// ============================================================================
// Draft stash and import
// ============================================================================

#[tokio::test]
async fn unsaved_draft_survives_restart() -> Result<(), Box<dyn std::error::Error>> {
    let board = TestBoard::new()?;
    {
        let mut crashed = board.session().with_draft_stash(board.draft_stash()?);
        crashed.open_new_note(Some("G")).await?;
        crashed.set_title("Unsaved");
        crashed.set_body("typed before the crash");
    }

    let mut restarted = board.session().with_draft_stash(board.draft_stash()?);
    assert!(restarted.recover_draft()?);
    let draft = restarted.editor().draft().ok_or("no draft")?;
    assert_eq!(draft.title, "Unsaved");
    assert_eq!(draft.entity_id, None);

    restarted.save().await?;
    assert_eq!(board.remote_notes_in("G").await?.len(), 1);

    let mut again = board.session().with_draft_stash(board.draft_stash()?);
    assert!(!again.recover_draft()?);
    Ok(())
}

#[tokio::test]
async fn import_reports_each_item() -> Result<(), Box<dyn std::error::Error>> {
    let board = TestBoard::new()?;
    let mut session = board.session();

    let results = session
        .import(vec![
            NewEntity::folder("Imported", None),
            NewEntity::note("first", "body", "Imported"),
            NewEntity::note("broken", "body", "  "),
        ])
        .await;

    assert!(results[0].is_ok());
    assert!(results[1].is_ok());
    assert!(results[2].as_ref().is_err_and(|e| e.is_validation()));
    assert_eq!(session.store().len(), 2);
    assert_eq!(board.remote_notes_in("Imported").await?.len(), 1);
    Ok(())
}
