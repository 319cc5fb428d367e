//! Integration tests for the playback coordinator
//!
//! Tests cover:
//! - Queue ordering across play/enqueue/next
//! - History recording and cache eviction of truncated entries
//! - Cache eviction of tracks dropped from the queue unplayed
//! - Orphaned cache entries removed on startup
//! - Queue persistence across a restart
//! - Sleep timer expiry stopping playback
//! - Related-track autofill of an emptied queue
//! - Revision ordering of published snapshots

mod helpers;

use helpers::{build_state, quiet_config, track, track_id, FakeStrategy};
use std::sync::Arc;
use std::time::Duration;
use tubebox_server::resolver::ResolverStrategy;
use tubebox_server::{Error, SharedState};

async fn setup(root: &std::path::Path) -> SharedState {
    let strategies: Vec<Arc<dyn ResolverStrategy>> = vec![Arc::new(FakeStrategy::new("fake"))];
    build_state(&quiet_config(root), strategies).await
}

async fn play(state: &SharedState, raw: &str) -> tubebox_common::PlayerSnapshot {
    let t = track(raw);
    state.player.play(t.id, Some(t.title)).await.unwrap()
}

async fn enqueue(state: &SharedState, raw: &str) -> tubebox_common::PlayerSnapshot {
    let t = track(raw);
    state.player.enqueue(t.id, Some(t.title), false).await.unwrap()
}

fn ids(snapshot: &tubebox_common::PlayerSnapshot) -> Vec<&str> {
    snapshot.queue.iter().map(|t| t.id.as_str()).collect()
}

#[tokio::test]
async fn test_queue_advances_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let state = setup(dir.path()).await;

    play(&state, "a").await;
    enqueue(&state, "b").await;
    let snapshot = enqueue(&state, "c").await;
    assert_eq!(ids(&snapshot), vec!["b", "c"]);
    assert_eq!(snapshot.current_track.as_ref().unwrap().id.as_str(), "a");

    let snapshot = state.player.next().await.unwrap();
    assert_eq!(snapshot.current_track.as_ref().unwrap().id.as_str(), "b");
    assert_eq!(ids(&snapshot), vec!["c"]);
    assert!(snapshot.is_playing);

    let snapshot = state.player.next().await.unwrap();
    assert_eq!(snapshot.current_track.as_ref().unwrap().id.as_str(), "c");
    assert!(snapshot.queue.is_empty());

    // Running off the end stops; a second advance changes nothing
    let stopped = state.player.next().await.unwrap();
    assert!(stopped.current_track.is_none());
    assert!(!stopped.is_playing);
    let again = state.player.next().await.unwrap();
    assert_eq!(again, stopped);

    let history = state.player.history().await;
    let recent: Vec<&str> = history.recent.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(recent, vec!["c", "b", "a"]);
}

#[tokio::test]
async fn test_playing_directly_leaves_queue_alone() {
    let dir = tempfile::tempdir().unwrap();
    let state = setup(dir.path()).await;

    enqueue(&state, "q1").await;
    let snapshot = play(&state, "direct").await;
    assert_eq!(ids(&snapshot), vec!["q1"]);
    assert_eq!(snapshot.current_track.unwrap().id.as_str(), "direct");
}

#[tokio::test]
async fn test_revisions_increase_and_match_polling() {
    let dir = tempfile::tempdir().unwrap();
    let state = setup(dir.path()).await;

    let mut revisions = vec![state.player.snapshot().revision];
    revisions.push(play(&state, "a").await.revision);
    revisions.push(enqueue(&state, "b").await.revision);
    revisions.push(state.player.pause().await.unwrap().revision);
    revisions.push(state.player.resume().await.unwrap().revision);
    let last = state.player.next().await.unwrap();
    revisions.push(last.revision);

    assert!(revisions.windows(2).all(|w| w[0] < w[1]), "{:?}", revisions);
    assert_eq!(state.player.snapshot(), last);
    assert_eq!(state.broadcaster.latest_state(), last);

    // A pause while paused publishes nothing new
    let paused = state.player.pause().await.unwrap();
    let paused_again = state.player.pause().await.unwrap();
    assert_eq!(paused.revision, paused_again.revision);
}

#[tokio::test]
async fn test_truncated_history_evicts_unreferenced_audio() {
    let dir = tempfile::tempdir().unwrap();
    let state = setup(dir.path()).await;

    let keep = track_id("keep");
    let drop = track_id("drop");
    std::fs::create_dir_all(state.cache.dir()).unwrap();
    std::fs::write(state.cache.entry_path(&keep), b"kept audio").unwrap();
    std::fs::write(state.cache.entry_path(&drop), b"dropped audio").unwrap();

    play(&state, "keep").await;
    play(&state, "drop").await;
    // Still queued when it falls off the recent list
    enqueue(&state, "keep").await;

    for i in 0..30 {
        play(&state, &format!("f{}", i)).await;
    }

    let history = state.player.history().await;
    assert_eq!(history.recent.len(), 30);
    assert!(history.find(&keep).is_none());
    assert!(history.find(&drop).is_none());

    assert!(state.cache.entry_path(&keep).exists());
    assert!(!state.cache.entry_path(&drop).exists());
}

fn seed_cache(state: &SharedState, raws: &[&str]) {
    std::fs::create_dir_all(state.cache.dir()).unwrap();
    for raw in raws {
        std::fs::write(state.cache.entry_path(&track_id(raw)), raw.as_bytes()).unwrap();
    }
}

fn cached(state: &SharedState, raw: &str) -> bool {
    state.cache.entry_path(&track_id(raw)).exists()
}

#[tokio::test]
async fn test_clearing_queue_evicts_unplayed_audio() {
    let dir = tempfile::tempdir().unwrap();
    let state = setup(dir.path()).await;

    seed_cache(&state, &["heard", "fresh", "again"]);
    play(&state, "heard").await;
    play(&state, "again").await;
    enqueue(&state, "fresh").await;
    enqueue(&state, "heard").await;

    let snapshot = state.player.clear_queue().await.unwrap();
    assert!(snapshot.queue.is_empty());

    // Only the never-played track loses its audio
    assert!(!cached(&state, "fresh"));
    assert!(cached(&state, "heard"));
    assert!(cached(&state, "again"));
}

#[tokio::test]
async fn test_clearing_queue_evicts_track_truncated_while_queued() {
    let dir = tempfile::tempdir().unwrap();
    let state = setup(dir.path()).await;

    seed_cache(&state, &["old"]);
    play(&state, "old").await;
    enqueue(&state, "old").await;
    for i in 0..30 {
        play(&state, &format!("f{}", i)).await;
    }
    assert!(state.player.history().await.find(&track_id("old")).is_none());
    assert!(cached(&state, "old"));

    state.player.clear_queue().await.unwrap();
    assert!(!cached(&state, "old"));
}

#[tokio::test]
async fn test_sleep_expiry_evicts_queued_audio() {
    let dir = tempfile::tempdir().unwrap();
    let state = setup(dir.path()).await;

    seed_cache(&state, &["lullaby", "later"]);
    play(&state, "lullaby").await;
    enqueue(&state, "later").await;

    state
        .player
        .schedule_sleep(Duration::from_millis(30))
        .await
        .unwrap();

    let later = state.cache.entry_path(&track_id("later"));
    assert!(helpers::eventually(|| !later.exists()).await);
    assert!(state.player.snapshot().queue.is_empty());
    assert!(cached(&state, "lullaby"));
}

#[tokio::test]
async fn test_startup_removes_orphaned_audio() {
    let dir = tempfile::tempdir().unwrap();
    {
        let state = setup(dir.path()).await;
        play(&state, "played").await;
        enqueue(&state, "queued").await;
        seed_cache(&state, &["played", "queued", "orphan"]);
        std::fs::write(state.cache.dir().join("notes.txt"), b"keep me").unwrap();
    }

    let state = setup(dir.path()).await;
    assert!(cached(&state, "played"));
    assert!(cached(&state, "queued"));
    assert!(!cached(&state, "orphan"));
    assert!(state.cache.dir().join("notes.txt").exists());
}

#[tokio::test]
async fn test_pinned_tracks_survive_truncation() {
    let dir = tempfile::tempdir().unwrap();
    let state = setup(dir.path()).await;

    play(&state, "fav").await;
    state.player.pin(track_id("fav"), None).await.unwrap();
    for i in 0..35 {
        play(&state, &format!("n{}", i)).await;
    }

    let history = state.player.history().await;
    assert_eq!(history.pinned.len(), 1);
    assert_eq!(history.pinned[0].title, "Title fav");
    assert!(history.recent.iter().all(|t| t.id.as_str() != "fav"));
}

#[tokio::test]
async fn test_queue_and_history_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let state = setup(dir.path()).await;
        play(&state, "before").await;
        enqueue(&state, "q1").await;
        enqueue(&state, "q2").await;
    }

    let state = setup(dir.path()).await;
    let snapshot = state.player.snapshot();
    assert_eq!(ids(&snapshot), vec!["q1", "q2"]);
    assert!(snapshot.current_track.is_none());
    assert!(!snapshot.is_playing);

    let history = state.player.history().await;
    assert_eq!(history.recent[0].id.as_str(), "before");
}

#[tokio::test]
async fn test_sleep_timer_stops_playback() {
    let dir = tempfile::tempdir().unwrap();
    let state = setup(dir.path()).await;

    play(&state, "lullaby").await;
    enqueue(&state, "later").await;

    let armed = state
        .player
        .schedule_sleep(Duration::from_millis(50))
        .await
        .unwrap();
    assert!(armed.sleep_armed);
    assert!(state.player.sleep_deadline().is_some());

    let player = Arc::clone(&state.player);
    assert!(helpers::eventually(|| !player.snapshot().sleep_armed).await);

    let stopped = state.player.snapshot();
    assert!(!stopped.is_playing);
    assert!(stopped.current_track.is_none());
    assert!(stopped.queue.is_empty());
    assert!(stopped.revision > armed.revision);
}

#[tokio::test]
async fn test_rescheduling_sleep_replaces_timer() {
    let dir = tempfile::tempdir().unwrap();
    let state = setup(dir.path()).await;
    play(&state, "a").await;

    state
        .player
        .schedule_sleep(Duration::from_millis(30))
        .await
        .unwrap();
    state
        .player
        .schedule_sleep(Duration::from_secs(600))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;
    let snapshot = state.player.snapshot();
    assert!(snapshot.is_playing);
    assert!(snapshot.sleep_armed);

    assert!(matches!(
        state.player.schedule_sleep(Duration::ZERO).await,
        Err(Error::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_autofill_queues_related_tracks() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = quiet_config(dir.path());
    config.playback.autofill = true;
    let upstream = Arc::new(FakeStrategy::new("fake"));
    let strategies: Vec<Arc<dyn ResolverStrategy>> = vec![upstream.clone()];
    let state = build_state(&config, strategies).await;

    play(&state, "seed").await;

    let player = Arc::clone(&state.player);
    assert!(helpers::eventually(|| player.snapshot().queue.len() == 3).await);
    assert_eq!(ids(&state.player.snapshot()), vec!["rel1", "rel2", "rel3"]);
    assert_eq!(upstream.calls.related(), 1);
    let inflight = state.inflight.clone();
    assert!(helpers::eventually(|| inflight.is_empty()).await);
}

#[tokio::test]
async fn test_autofill_skipped_while_queue_has_tracks() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = quiet_config(dir.path());
    config.playback.autofill = true;
    let upstream = Arc::new(FakeStrategy::new("fake"));
    let strategies: Vec<Arc<dyn ResolverStrategy>> = vec![upstream.clone()];
    let state = build_state(&config, strategies).await;

    enqueue(&state, "mine").await;
    play(&state, "seed").await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(ids(&state.player.snapshot()), vec!["mine"]);
    assert_eq!(upstream.calls.related(), 0);
}

#[tokio::test]
async fn test_full_queue_accepts_again_after_advance() {
    let dir = tempfile::tempdir().unwrap();
    let state = setup(dir.path()).await;

    for i in 0..10 {
        enqueue(&state, &format!("q{}", i)).await;
    }
    let extra = track("q10");
    assert!(matches!(
        state
            .player
            .enqueue(extra.id.clone(), Some(extra.title.clone()), false)
            .await,
        Err(Error::QueueFull(10))
    ));

    state.player.next().await.unwrap();
    let snapshot = state
        .player
        .enqueue(extra.id, Some(extra.title), false)
        .await
        .unwrap();
    assert_eq!(snapshot.queue.len(), 10);
    assert_eq!(snapshot.queue.last().unwrap().id.as_str(), "q10");
}
