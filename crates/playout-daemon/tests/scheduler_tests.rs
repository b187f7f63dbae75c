mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{link, EngineCall, FlakyStore, Harness};
use playout_daemon::core::SchedulerEvent;
use playout_daemon::store::{LocalStore, RequestStore};
use playout_daemon::BroadcastMessage;
use playout_proto::protocol::Command;
use playout_proto::request::{Completion, FailureKind, NewRequest, RequestStatus};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SONG_A: &str = "aaaaaaaaaaa";
const SONG_B: &str = "bbbbbbbbbbb";
const SONG_C: &str = "ccccccccccc";

fn played() -> RequestStatus {
    RequestStatus::Completed(Completion::Played)
}

fn failure_kind(status: &RequestStatus) -> Option<FailureKind> {
    match status {
        RequestStatus::Completed(Completion::Failed(f)) => Some(f.kind),
        _ => None,
    }
}

#[tokio::test(start_paused = true)]
async fn songs_play_oldest_first_one_at_a_time() {
    let h = Harness::start(true).await;
    let a = h.song(&link(SONG_A)).await;
    let b = h.song(&link(SONG_B)).await;

    assert_eq!(h.status(a).await, RequestStatus::Playing);
    assert_eq!(h.status(b).await, RequestStatus::Pending);
    assert_eq!(h.calls(), vec![EngineCall::Play(SONG_A.into())]);

    h.video.ready();
    h.settle().await;
    h.video.end();
    h.settle().await;

    assert_eq!(h.status(a).await, played());
    assert_eq!(h.status(b).await, RequestStatus::Playing);
    assert_eq!(h.calls().last(), Some(&EngineCall::Play(SONG_B.into())));
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn announcement_preempts_song_which_then_restarts() {
    let h = Harness::start(true).await;
    let song = h.song(&link(SONG_A)).await;
    h.video.ready();
    h.settle().await;

    let notice = h.announce("Lunch is served in hall B").await;

    assert_eq!(h.status(song).await, RequestStatus::Pending);
    assert_eq!(h.status(notice).await, RequestStatus::Playing);
    assert_eq!(
        h.calls(),
        vec![
            EngineCall::Play(SONG_A.into()),
            EngineCall::StopVideo,
            EngineCall::Speak("Lunch is served in hall B".into()),
        ]
    );

    h.speech.finish();
    h.settle().await;

    assert_eq!(h.status(notice).await, played());
    assert_eq!(h.status(song).await, RequestStatus::Playing);
    assert_eq!(h.calls().last(), Some(&EngineCall::Play(SONG_A.into())));
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn announcements_jump_the_queue_but_not_each_other() {
    let h = Harness::start(false).await;
    let song = h.song(&link(SONG_A)).await;
    let first = h.announce("first").await;
    let second = h.announce("second").await;

    let view = h.state.get_state().await;
    let order: Vec<_> = view.queue.iter().map(|r| r.id).collect();
    assert_eq!(order, vec![first, second, song]);

    h.command(Command::SetAutoPlay { enabled: true }).await;
    assert_eq!(h.status(first).await, RequestStatus::Playing);

    h.speech.finish();
    h.settle().await;
    assert_eq!(h.status(second).await, RequestStatus::Playing);
    assert_eq!(h.status(song).await, RequestStatus::Pending);
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn announcement_safety_timeout_fires_at_exactly_five_seconds() {
    let h = Harness::start(true).await;
    let notice = h.announce("The raffle starts now").await;
    assert_eq!(h.status(notice).await, RequestStatus::Playing);

    h.advance(Duration::from_millis(4_999)).await;
    assert_eq!(h.status(notice).await, RequestStatus::Playing);
    assert!(!h.calls().contains(&EngineCall::CancelSpeech));

    h.advance(Duration::from_millis(1)).await;
    assert_eq!(h.status(notice).await, played());
    assert_eq!(h.calls().last(), Some(&EngineCall::CancelSpeech));
    assert!(h.playing().await.is_empty());
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn speech_engine_error_fails_the_announcement() {
    let h = Harness::start(true).await;
    let notice = h.announce("hello").await;
    let song = h.song(&link(SONG_A)).await;

    h.speech
        .signal(playout_daemon::engine::EngineSignal::Error("synth crashed".into()));
    h.settle().await;

    assert_eq!(
        failure_kind(&h.status(notice).await),
        Some(FailureKind::EngineError)
    );
    assert_eq!(h.status(song).await, RequestStatus::Playing);
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unparseable_song_fails_without_taking_playback_time() {
    let h = Harness::start(true).await;
    let bad = h.song("my favourite song, please").await;
    assert_eq!(
        failure_kind(&h.status(bad).await),
        Some(FailureKind::PayloadParse)
    );
    assert!(h.calls().is_empty());

    h.command(Command::SetAutoPlay { enabled: false }).await;
    let bad = h.song("ftp://example.com/song.mp3").await;
    let good = h.song(&link(SONG_B)).await;
    h.command(Command::SetAutoPlay { enabled: true }).await;

    // Same evaluation pass: no clock movement, no engine call for the bad one.
    let record = h.store.get(bad).await.unwrap();
    assert_eq!(failure_kind(&record.status), Some(FailureKind::PayloadParse));
    assert_eq!(record.started_at, None);
    assert_eq!(h.status(good).await, RequestStatus::Playing);
    assert_eq!(h.calls(), vec![EngineCall::Play(SONG_B.into())]);
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn song_ready_timeout_fires_at_exactly_ten_seconds() {
    let h = Harness::start(true).await;
    let song = h.song(&link(SONG_A)).await;
    let next = h.song(&link(SONG_B)).await;

    h.advance(Duration::from_millis(9_999)).await;
    assert_eq!(h.status(song).await, RequestStatus::Playing);

    h.advance(Duration::from_millis(1)).await;
    assert_eq!(
        failure_kind(&h.status(song).await),
        Some(FailureKind::EngineTimeout)
    );
    assert_eq!(
        h.calls(),
        vec![
            EngineCall::Play(SONG_A.into()),
            EngineCall::StopVideo,
            EngineCall::Play(SONG_B.into()),
        ]
    );
    assert_eq!(h.status(next).await, RequestStatus::Playing);
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn ready_song_has_no_deadline() {
    let h = Harness::start(true).await;
    let song = h.song(&link(SONG_A)).await;
    h.video.ready();
    h.settle().await;

    h.advance(Duration::from_secs(600)).await;
    assert_eq!(h.status(song).await, RequestStatus::Playing);

    h.video.end();
    h.settle().await;
    assert_eq!(h.status(song).await, played());
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn video_engine_error_fails_song_and_moves_on() {
    let h = Harness::start(true).await;
    let song = h.song(&link(SONG_A)).await;
    let next = h.song(&link(SONG_B)).await;
    h.video.ready();
    h.settle().await;

    h.video.error("video unavailable");
    h.settle().await;

    let status = h.status(song).await;
    assert_eq!(failure_kind(&status), Some(FailureKind::EngineError));
    if let RequestStatus::Completed(Completion::Failed(f)) = status {
        assert!(f.detail.contains("video unavailable"));
    }
    assert_eq!(h.status(next).await, RequestStatus::Playing);
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn auto_play_off_keeps_current_session_but_starts_nothing() {
    let h = Harness::start(true).await;
    let song = h.song(&link(SONG_A)).await;
    h.video.ready();
    h.settle().await;

    h.command(Command::SetAutoPlay { enabled: false }).await;
    assert_eq!(h.status(song).await, RequestStatus::Playing);

    let notice = h.announce("no preemption while paused").await;
    assert_eq!(h.status(song).await, RequestStatus::Playing);
    assert_eq!(h.status(notice).await, RequestStatus::Pending);
    assert!(!h.calls().contains(&EngineCall::StopVideo));

    h.video.end();
    h.settle().await;
    assert_eq!(h.status(song).await, played());
    assert_eq!(h.status(notice).await, RequestStatus::Pending);
    assert!(h.playing().await.is_empty());

    h.command(Command::SetAutoPlay { enabled: true }).await;
    assert_eq!(h.status(notice).await, RequestStatus::Playing);
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn skip_marks_skipped_and_starts_next() {
    let h = Harness::start(true).await;
    let song = h.song(&link(SONG_A)).await;
    let next = h.song(&link(SONG_B)).await;
    h.video.ready();
    h.settle().await;

    h.command(Command::Skip).await;

    assert_eq!(
        h.status(song).await,
        RequestStatus::Completed(Completion::Skipped)
    );
    assert_eq!(h.status(next).await, RequestStatus::Playing);
    assert_eq!(
        &h.calls()[1..],
        &[EngineCall::StopVideo, EngineCall::Play(SONG_B.into())]
    );
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn skip_when_idle_is_a_no_op() {
    let h = Harness::start(false).await;
    let song = h.song(&link(SONG_A)).await;
    h.command(Command::Skip).await;
    assert_eq!(h.status(song).await, RequestStatus::Pending);
    assert!(h.calls().is_empty());
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn duplicate_notifications_do_not_restart_playback() {
    let h = Harness::start(true).await;
    h.song(&link(SONG_A)).await;
    for _ in 0..5 {
        h.events.send(SchedulerEvent::StoreChanged).await.unwrap();
    }
    h.settle().await;
    assert_eq!(h.plays(), 1);
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn lost_completion_write_is_reapplied_on_next_pass() {
    let store = Arc::new(FlakyStore::new());
    let h = Harness::with_store(store.clone(), true).await;
    let mut broadcasts = h.broadcasts.subscribe();

    let song = h.song(&link(SONG_A)).await;
    let next = h.song(&link(SONG_B)).await;
    h.video.ready();
    h.settle().await;

    store.fail_next_updates(1);
    h.video.end();
    h.settle().await;

    let mut saw_error = false;
    while let Ok(msg) = broadcasts.try_recv() {
        if matches!(msg, BroadcastMessage::Error(ref m) if m.contains("disk full")) {
            saw_error = true;
        }
    }
    assert!(saw_error);

    assert_eq!(h.status(song).await, played());
    assert_eq!(h.status(next).await, RequestStatus::Playing);
    assert_eq!(h.playing().await, vec![next]);
    assert_eq!(h.plays(), 2);

    let view = h.state.get_state().await;
    assert_eq!(view.now_playing.unwrap().request.id, next);
    assert!(view.last_error.is_none());

    h.video.end();
    h.settle().await;
    assert_eq!(h.status(next).await, played());
    assert_eq!(h.plays(), 2);
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn last_error_stays_until_store_catches_up() {
    let store = Arc::new(FlakyStore::new());
    let h = Harness::with_store(store.clone(), true).await;

    let song = h.song(&link(SONG_A)).await;
    let next = h.song(&link(SONG_B)).await;
    h.video.ready();
    h.settle().await;

    store.fail_next_updates(usize::MAX);
    h.video.end();
    h.settle().await;

    // Nothing reached the store, but playback moved on.
    assert_eq!(h.status(song).await, RequestStatus::Playing);
    assert_eq!(h.status(next).await, RequestStatus::Pending);
    assert_eq!(h.plays(), 2);
    let view = h.state.get_state().await;
    assert!(view.last_error.unwrap().contains("disk full"));
    assert_eq!(view.now_playing.unwrap().request.id, next);

    store.fail_next_updates(0);
    h.events.send(SchedulerEvent::StoreChanged).await.unwrap();
    h.settle().await;

    assert_eq!(h.status(song).await, played());
    assert_eq!(h.playing().await, vec![next]);
    assert!(h.state.get_state().await.last_error.is_none());
    assert_eq!(h.plays(), 2);
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn preempted_song_survives_lost_requeue_write() {
    let store = Arc::new(FlakyStore::new());
    let h = Harness::with_store(store.clone(), true).await;

    let song = h.song(&link(SONG_A)).await;
    h.video.ready();
    h.settle().await;

    store.fail_next_updates(1);
    let notice = h.announce("Team 4 to the stage").await;

    assert_eq!(h.status(song).await, RequestStatus::Pending);
    assert_eq!(h.status(notice).await, RequestStatus::Playing);
    assert_eq!(h.playing().await, vec![notice]);
    assert!(h.state.get_state().await.last_error.is_none());

    h.speech.finish();
    h.settle().await;
    assert_eq!(h.status(notice).await, played());
    assert_eq!(h.status(song).await, RequestStatus::Playing);
    assert_eq!(h.plays(), 2);
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn natural_end_racing_shutdown_is_recorded() {
    let h = Harness::start(true).await;
    let song = h.song(&link(SONG_A)).await;
    h.video.ready();
    h.settle().await;

    let store = h.store.clone();
    // The session ends on its own before its report reaches the loop.
    h.video.end();
    h.shutdown().await;

    assert_eq!(store.get(song).await.unwrap().status, played());
}

#[tokio::test(start_paused = true)]
async fn rows_left_playing_are_requeued_on_startup() {
    let store = Arc::new(LocalStore::in_memory());
    let row = store
        .insert(NewRequest::song(link(SONG_C), "team-c"))
        .await
        .unwrap();
    store
        .update_status(row.id, RequestStatus::Playing)
        .await
        .unwrap();

    let h = Harness::with_store(store, false).await;
    assert_eq!(h.status(row.id).await, RequestStatus::Pending);
    assert_eq!(h.state.get_state().await.queue.len(), 1);
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shared_view_tracks_now_playing_and_queue() {
    let h = Harness::start(true).await;
    let song = h.song(&link(SONG_A)).await;
    let next = h.song(&link(SONG_B)).await;

    let view = h.state.get_state().await;
    assert!(view.auto_play);
    assert_eq!(view.now_playing.map(|n| n.request.id), Some(song));
    let queued: Vec<_> = view.queue.iter().map(|r| r.id).collect();
    assert_eq!(queued, vec![next]);
    let rev = view.rev;

    h.command(Command::Skip).await;
    let view = h.state.get_state().await;
    assert!(view.rev > rev);
    assert_eq!(view.now_playing.map(|n| n.request.id), Some(next));
    assert!(view.queue.is_empty());
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn submit_command_queues_request() {
    let h = Harness::start(false).await;
    h.command(Command::Submit {
        kind: playout_proto::request::MediaKind::Announcement,
        payload: "Welcome!".into(),
        requester_id: "door".into(),
    })
    .await;
    h.command(Command::Submit {
        kind: playout_proto::request::MediaKind::Song,
        payload: "   ".into(),
        requester_id: "door".into(),
    })
    .await;

    let rows = h.store.list_all().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].payload, "Welcome!");
    assert_eq!(h.state.get_state().await.queue.len(), 1);
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn at_most_one_request_is_ever_playing() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let h = Harness::start(true).await;
    let songs = [SONG_A, SONG_B, SONG_C];

    for step in 0..300 {
        match rng.gen_range(0..12) {
            0 | 1 => {
                h.song(&link(songs[rng.gen_range(0..songs.len())])).await;
            }
            2 => {
                h.announce(&format!("notice {}", step)).await;
            }
            3 => {
                h.song("not a link").await;
            }
            4 => {
                h.video.ready();
                h.settle().await;
            }
            5 => {
                h.video.end();
                h.settle().await;
            }
            6 => {
                h.video.error("boom");
                h.settle().await;
            }
            7 => {
                h.speech.finish();
                h.settle().await;
            }
            8 => h.command(Command::Skip).await,
            9 => {
                let enabled = rng.gen_bool(0.7);
                h.command(Command::SetAutoPlay { enabled }).await;
            }
            _ => {
                h.advance(Duration::from_millis(rng.gen_range(0..12_000)))
                    .await;
            }
        }

        let playing = h.playing().await;
        assert!(
            playing.len() <= 1,
            "step {}: {} requests playing: {:?}",
            step,
            playing.len(),
            playing
        );
        let view = h.state.get_state().await;
        assert_eq!(
            view.now_playing.map(|n| n.request.id),
            playing.first().copied(),
            "step {}: view disagrees with store",
            step
        );
    }
    h.shutdown().await;
}
