use std::time::Duration;

use stickies_core::Color;
use stickies_engine::{BusOutcome, CommitOutcome, EditorState, Flush, FlushReason, Notice, SkipReason};
use stickies_harness::TestBoard;
use stickies_storage::Gateway;

async fn advance_secs(secs: f64) {
    tokio::time::advance(Duration::from_secs_f64(secs)).await;
}

#[tokio::test(start_paused = true)]
async fn title_only_draft_waits_for_body() -> Result<(), Box<dyn std::error::Error>> {
    let board = TestBoard::new()?;
    let mut session = board.session();

    session.open_new_note(Some("G")).await?;
    session.set_title("Buy milk");
    advance_secs(2.0).await;
    assert_eq!(
        session.tick().await?,
        Some(CommitOutcome::Skipped(SkipReason::MissingBody))
    );
    assert!(board.remote().list_all().await?.is_empty());

    session.set_body("x");
    advance_secs(1.0).await;
    assert_eq!(session.tick().await?, None);
    advance_secs(1.0).await;
    let Some(CommitOutcome::Created(id)) = session.tick().await? else {
        return Err("expected a create after the debounce window".into());
    };

    let rows = board.remote().list_all().await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, id);
    assert_eq!(rows[0].title, "Buy milk");
    assert_eq!(rows[0].body, "x");
    // Debounced commits are silent.
    assert!(!session.notices().contains(&Notice::Saved));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn every_keystroke_restarts_the_window() -> Result<(), Box<dyn std::error::Error>> {
    let board = TestBoard::new()?;
    let mut session = board.session();
    session.open_new_note(None).await?;

    session.set_body("a");
    advance_secs(1.5).await;
    session.set_body("ab");
    advance_secs(1.5).await;
    assert_eq!(session.tick().await?, None);

    advance_secs(0.5).await;
    assert!(matches!(session.tick().await?, Some(CommitOutcome::Created(_))));
    let rows = board.remote_notes_in("General").await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].title, "Untitled");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unchanged_draft_is_never_written() -> Result<(), Box<dyn std::error::Error>> {
    let board = TestBoard::new()?;
    let row = board.seed_note("A", "B", "G").await?;
    let mut session = board.session();
    session.sync().await?;

    session.open_note(row.id).await?;
    advance_secs(5.0).await;
    assert_eq!(session.tick().await?, None);

    session.set_title("A");
    advance_secs(2.0).await;
    assert_eq!(
        session.tick().await?,
        Some(CommitOutcome::Skipped(SkipReason::NotDirty))
    );
    let remote = board.remote().get(row.id)?.ok_or("row missing")?;
    assert_eq!(
        remote.updated_at.timestamp_millis(),
        row.updated_at.timestamp_millis()
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn hiding_the_page_flushes_immediately() -> Result<(), Box<dyn std::error::Error>> {
    let board = TestBoard::new()?;
    let row = board.seed_note("A", "B", "G").await?;
    let mut session = board.session();
    session.sync().await?;

    session.open_note(row.id).await?;
    session.set_body("changed");
    assert_eq!(session.visibility_hidden().await?, CommitOutcome::Updated(row.id));
    assert!(!session.editor().timer().is_armed());
    assert_eq!(board.remote().get(row.id)?.ok_or("row missing")?.body, "changed");

    advance_secs(3.0).await;
    assert_eq!(session.tick().await?, None);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn typing_while_a_save_is_in_flight_stays_dirty() -> Result<(), Box<dyn std::error::Error>> {
    let board = TestBoard::new()?;
    let row = board.seed_note("A", "B", "G").await?;
    let other = board.seed_note("C", "D", "G").await?;
    let mut session = board.session();
    let mut elsewhere = board.session();
    session.sync().await?;
    elsewhere.sync().await?;

    session.open_note(row.id).await?;
    session.set_body("first");
    let Flush::Pending(pending) = session.begin_flush(FlushReason::ExplicitSave)? else {
        return Err("expected a pending commit".into());
    };
    assert_eq!(session.editor().state(), EditorState::Committing);

    // Keystrokes, bus traffic and further flushes are all handled meanwhile.
    assert!(session.set_body("first and more"));
    elsewhere.move_note(other.id, "H").await?;
    assert!(matches!(session.pump().await?.as_slice(), [BusOutcome::Applied { .. }]));
    assert_eq!(
        session.save().await?,
        CommitOutcome::Skipped(SkipReason::AlreadyCommitting)
    );
    advance_secs(2.0).await;
    assert_eq!(
        session.tick().await?,
        Some(CommitOutcome::Skipped(SkipReason::AlreadyCommitting))
    );

    let sent = pending.send().await;
    assert_eq!(session.finish_flush(sent)?, CommitOutcome::Updated(row.id));
    assert_eq!(board.remote().get(row.id)?.ok_or("row missing")?.body, "first");
    assert!(session.editor().is_dirty());
    assert_eq!(session.editor().state(), EditorState::Dirty);

    assert_eq!(session.tick().await?, Some(CommitOutcome::Updated(row.id)));
    assert_eq!(
        board.remote().get(row.id)?.ok_or("row missing")?.body,
        "first and more"
    );
    Ok(())
}

#[tokio::test]
async fn explicit_save_of_blank_draft_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let board = TestBoard::new()?;
    let mut session = board.session();
    session.open_new_note(Some("G")).await?;

    let err = session.save().await.err().ok_or("blank save succeeded")?;
    assert!(err.is_validation());

    session.set_title("Only a title");
    let err = session.save().await.err().ok_or("body-less save succeeded")?;
    assert!(err.is_validation());
    assert!(board.remote().list_all().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_save_rolls_back_and_returns_to_editing() -> Result<(), Box<dyn std::error::Error>> {
    let board = TestBoard::new()?;
    let row = board.seed_note("A", "B", "G").await?;
    let mut session = board.session();
    session.sync().await?;
    session.open_note(row.id).await?;
    session.set_body("lost?");

    board.faults().fail_next_update();
    assert!(session.save().await.is_err());
    assert_eq!(session.editor().state(), EditorState::Editing);
    assert!(session.editor().is_dirty());
    assert_eq!(session.store().note(row.id).ok_or("missing")?.body, "B");
    assert!(
        session
            .notices()
            .iter()
            .any(|n| matches!(n, Notice::SaveFailed(_)))
    );

    assert_eq!(session.save().await?, CommitOutcome::Updated(row.id));
    assert_eq!(session.store().note(row.id).ok_or("missing")?.body, "lost?");
    Ok(())
}

#[tokio::test]
async fn failed_create_drops_provisional_row() -> Result<(), Box<dyn std::error::Error>> {
    let board = TestBoard::new()?;
    let mut session = board.session();
    session.open_new_note(Some("G")).await?;
    session.set_title("t");
    session.set_body("b");

    board.faults().fail_next_create();
    assert!(session.save().await.is_err());
    assert!(session.store().is_empty());
    assert_eq!(session.editor().draft().ok_or("draft lost")?.entity_id, None);

    assert!(matches!(session.save().await?, CommitOutcome::Created(_)));
    assert_eq!(session.store().len(), 1);
    Ok(())
}

#[tokio::test]
async fn closing_the_editor_flushes_once() -> Result<(), Box<dyn std::error::Error>> {
    let board = TestBoard::new()?;
    let row = board.seed_note("A", "B", "G").await?;
    let mut session = board.session();
    session.sync().await?;

    session.open_note(row.id).await?;
    session.set_body("final");
    assert_eq!(session.close_editor().await?, CommitOutcome::Updated(row.id));
    assert_eq!(session.editor().state(), EditorState::Closed);
    assert_eq!(board.remote().get(row.id)?.ok_or("row missing")?.body, "final");
    assert_eq!(
        session.teardown().await?,
        CommitOutcome::Skipped(SkipReason::NoDraft)
    );
    Ok(())
}

#[tokio::test]
async fn switching_notes_commits_the_previous_draft() -> Result<(), Box<dyn std::error::Error>> {
    let board = TestBoard::new()?;
    let a = board.seed_note("A", "B", "G").await?;
    let b = board.seed_note("C", "D", "G").await?;
    let mut session = board.session();
    session.sync().await?;

    session.open_note(a.id).await?;
    session.set_body("edited");
    session.open_note(b.id).await?;

    assert_eq!(board.remote().get(a.id)?.ok_or("row missing")?.body, "edited");
    assert_eq!(session.editor().draft().and_then(|d| d.entity_id), Some(b.id));
    Ok(())
}

#[tokio::test]
async fn new_draft_avoids_recent_colors() -> Result<(), Box<dyn std::error::Error>> {
    let board = TestBoard::new()?;
    let recent: Vec<Color> = (0..3).map(Color::palette).collect();
    for (i, color) in recent.iter().enumerate() {
        board.seed_colored_note(&format!("n{i}"), "G", color.clone()).await?;
    }
    let mut session = board.session();
    session.sync().await?;

    for _ in 0..10 {
        session.open_new_note(None).await?;
        let color = &session.editor().draft().ok_or("no draft")?.color;
        assert!(!recent.contains(color));
        assert!(color.in_palette());
    }
    Ok(())
}
