use super::*;

use shared::domain::{ContentType, StoryId};

fn item(id: i64, content_type: ContentType) -> StoryItem {
    StoryItem {
        id: StoryId(id),
        content_type,
        content_url: format!("/media/{id}"),
        duration_hint_ms: None,
        background_color: None,
        created_at: None,
    }
}

fn image(id: i64) -> StoryItem {
    item(id, ContentType::Image)
}

fn video(id: i64) -> StoryItem {
    item(id, ContentType::Video)
}

fn bundle(user: i64, items: Vec<StoryItem>) -> UserStoryBundle {
    UserStoryBundle {
        user_id: UserId(user),
        display_name: format!("user-{user}"),
        avatar_url: format!("/avatars/{user}.png"),
        items,
    }
}

fn fetch_token(effects: &[Effect]) -> FetchToken {
    effects
        .iter()
        .find_map(|effect| match effect {
            Effect::FetchBundle { token, .. } => Some(*token),
            _ => None,
        })
        .expect("fetch effect")
}

fn fetched_user(effects: &[Effect]) -> Option<UserId> {
    effects.iter().find_map(|effect| match effect {
        Effect::FetchBundle { user_id, .. } => Some(*user_id),
        _ => None,
    })
}

fn armed_timer(effects: &[Effect]) -> Option<(TimerToken, Duration)> {
    effects.iter().find_map(|effect| match effect {
        Effect::ArmTimer { token, after } => Some((*token, *after)),
        _ => None,
    })
}

fn loaded_media(effects: &[Effect]) -> Option<(MediaToken, bool)> {
    effects.iter().find_map(|effect| match effect {
        Effect::LoadMedia { token, muted, .. } => Some((*token, *muted)),
        _ => None,
    })
}

fn viewed(effects: &[Effect]) -> Vec<StoryId> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::ReportView { story_id } => Some(*story_id),
            _ => None,
        })
        .collect()
}

fn closed_reason(effects: &[Effect]) -> Option<CloseReason> {
    effects.iter().find_map(|effect| match effect {
        Effect::Closed { reason } => Some(*reason),
        _ => None,
    })
}

fn count_opened(effects: &[Effect]) -> usize {
    effects
        .iter()
        .filter(|effect| matches!(effect, Effect::Opened))
        .count()
}

/// Opens `queue` at `index` and answers the fetch with `loaded`.
fn open_with(
    playback: &mut StoryPlayback,
    queue: &[i64],
    index: usize,
    loaded: UserStoryBundle,
    now: Instant,
) -> Vec<Effect> {
    let effects = playback.handle(
        Input::Open {
            queue: queue.iter().copied().map(UserId).collect(),
            index,
        },
        now,
    );
    let token = fetch_token(&effects);
    playback.handle(
        Input::BundleLoaded {
            token,
            bundle: loaded,
        },
        now,
    )
}

#[test]
fn open_requests_exactly_one_bundle() {
    let mut playback = StoryPlayback::new(PlaybackSettings::default());
    let effects = playback.handle(
        Input::Open {
            queue: vec![UserId(1), UserId(2), UserId(3)],
            index: 1,
        },
        Instant::now(),
    );

    assert_eq!(playback.phase(), Phase::Loading);
    assert_eq!(fetched_user(&effects), Some(UserId(2)));
    assert_eq!(
        effects
            .iter()
            .filter(|effect| matches!(effect, Effect::FetchBundle { .. }))
            .count(),
        1
    );
    assert!(playback.fetch_in_flight());
}

#[test]
fn opening_lands_on_first_item_with_one_timer() {
    let now = Instant::now();
    let mut playback = StoryPlayback::new(PlaybackSettings::default());
    let effects = open_with(
        &mut playback,
        &[1, 2, 3],
        1,
        bundle(2, vec![image(10), image(11)]),
        now,
    );

    assert_eq!(playback.phase(), Phase::Playing);
    assert_eq!(
        playback.cursor(),
        PlaybackCursor {
            user_index: 1,
            item_index: 0
        }
    );
    assert_eq!(count_opened(&effects), 1);
    assert_eq!(viewed(&effects), vec![StoryId(10)]);
    let (_, after) = armed_timer(&effects).expect("timer");
    assert_eq!(after, DEFAULT_ITEM_DURATION);
    assert!(playback.timer_armed());
    assert!(!playback.media_loaded());

    let frame = playback.frame(now).expect("frame");
    assert_eq!(frame.display_name, "user-2");
    assert_eq!(
        frame.segments,
        vec![SegmentFill::Active { fraction: 0.0 }, SegmentFill::Empty]
    );
}

#[test]
fn empty_bundle_closes_without_showing_overlay() {
    let mut playback = StoryPlayback::new(PlaybackSettings::default());
    let effects = open_with(&mut playback, &[1], 0, bundle(1, Vec::new()), Instant::now());

    assert_eq!(playback.phase(), Phase::Closed);
    assert_eq!(count_opened(&effects), 0);
    assert_eq!(closed_reason(&effects), None);
    assert!(effects.contains(&Effect::LoadFailed {
        user_id: UserId(1),
        failure: LoadFailure::EmptyResult,
    }));
}

#[test]
fn network_failure_aborts_loading() {
    let now = Instant::now();
    let mut playback = StoryPlayback::new(PlaybackSettings::default());
    let effects = playback.handle(
        Input::Open {
            queue: vec![UserId(1)],
            index: 0,
        },
        now,
    );
    let token = fetch_token(&effects);
    let effects = playback.handle(
        Input::BundleFailed {
            token,
            failure: LoadFailure::Network("connection refused".into()),
        },
        now,
    );

    assert_eq!(playback.phase(), Phase::Closed);
    assert!(!playback.fetch_in_flight());
    assert_eq!(count_opened(&effects), 0);
    assert!(matches!(
        effects.as_slice(),
        [Effect::LoadFailed {
            failure: LoadFailure::Network(_),
            ..
        }]
    ));
}

#[test]
fn stale_bundle_after_close_is_ignored() {
    let now = Instant::now();
    let mut playback = StoryPlayback::new(PlaybackSettings::default());
    let effects = playback.handle(
        Input::Open {
            queue: vec![UserId(1)],
            index: 0,
        },
        now,
    );
    let token = fetch_token(&effects);

    let effects = playback.handle(Input::Close, now);
    assert_eq!(
        effects,
        vec![
            Effect::CancelFetch,
            Effect::Closed {
                reason: CloseReason::Requested
            }
        ]
    );

    let effects = playback.handle(
        Input::BundleLoaded {
            token,
            bundle: bundle(1, vec![image(1)]),
        },
        now,
    );
    assert!(effects.is_empty());
    assert_eq!(playback.phase(), Phase::Closed);
}

#[test]
fn timer_expiry_advances_within_bundle() {
    let now = Instant::now();
    let mut playback = StoryPlayback::new(PlaybackSettings::default());
    let effects = open_with(&mut playback, &[1], 0, bundle(1, vec![image(1), image(2)]), now);
    let (token, _) = armed_timer(&effects).expect("timer");

    let later = now + DEFAULT_ITEM_DURATION;
    let effects = playback.handle(Input::TimerElapsed { token }, later);

    assert_eq!(playback.cursor().item_index, 1);
    assert_eq!(viewed(&effects), vec![StoryId(2)]);
    assert!(armed_timer(&effects).is_some());
    let frame = playback.frame(later).expect("frame");
    assert_eq!(frame.segments[0], SegmentFill::Filled);
}

#[test]
fn advancing_past_bundle_loads_next_user_without_reopening() {
    let now = Instant::now();
    let mut playback = StoryPlayback::new(PlaybackSettings::default());
    open_with(&mut playback, &[1, 2], 0, bundle(1, vec![image(1)]), now);

    let effects = playback.handle(Input::Next, now);
    assert_eq!(playback.phase(), Phase::Loading);
    assert_eq!(fetched_user(&effects), Some(UserId(2)));
    assert!(effects.contains(&Effect::CancelTimer));
    assert!(!playback.timer_armed());

    let token = fetch_token(&effects);
    let effects = playback.handle(
        Input::BundleLoaded {
            token,
            bundle: bundle(2, vec![image(20)]),
        },
        now,
    );
    assert_eq!(count_opened(&effects), 0);
    assert_eq!(
        playback.cursor(),
        PlaybackCursor {
            user_index: 1,
            item_index: 0
        }
    );
}

#[test]
fn advancing_past_last_user_closes_everything() {
    let now = Instant::now();
    let mut playback = StoryPlayback::new(PlaybackSettings::default());
    let effects = open_with(&mut playback, &[1], 0, bundle(1, vec![image(1)]), now);
    let (token, _) = armed_timer(&effects).expect("timer");

    let effects = playback.handle(Input::TimerElapsed { token }, now + DEFAULT_ITEM_DURATION);

    assert_eq!(closed_reason(&effects), Some(CloseReason::EndOfQueue));
    assert_eq!(playback.phase(), Phase::Closed);
    assert!(!playback.timer_armed());
    assert!(!playback.media_loaded());
}

#[test]
fn prev_before_first_item_lands_on_previous_users_last_item() {
    let now = Instant::now();
    let mut playback = StoryPlayback::new(PlaybackSettings::default());
    open_with(&mut playback, &[1, 2], 1, bundle(2, vec![image(20)]), now);

    let effects = playback.handle(Input::Prev, now);
    assert_eq!(fetched_user(&effects), Some(UserId(1)));
    let token = fetch_token(&effects);
    let effects = playback.handle(
        Input::BundleLoaded {
            token,
            bundle: bundle(1, vec![image(10), image(11), image(12)]),
        },
        now,
    );

    assert_eq!(
        playback.cursor(),
        PlaybackCursor {
            user_index: 0,
            item_index: 2
        }
    );
    assert_eq!(viewed(&effects), vec![StoryId(12)]);
}

#[test]
fn revisiting_a_user_in_the_same_session_uses_the_cache() {
    let now = Instant::now();
    let mut playback = StoryPlayback::new(PlaybackSettings::default());
    open_with(&mut playback, &[1, 2], 0, bundle(1, vec![image(10), image(11)]), now);
    playback.handle(Input::Next, now);
    let effects = playback.handle(Input::Next, now);
    let token = fetch_token(&effects);
    playback.handle(
        Input::BundleLoaded {
            token,
            bundle: bundle(2, vec![image(20)]),
        },
        now,
    );

    let effects = playback.handle(Input::Prev, now);
    assert_eq!(fetched_user(&effects), None);
    assert_eq!(playback.phase(), Phase::Playing);
    assert_eq!(
        playback.cursor(),
        PlaybackCursor {
            user_index: 0,
            item_index: 1
        }
    );
}

#[test]
fn prev_on_first_user_first_item_closes() {
    let now = Instant::now();
    let mut playback = StoryPlayback::new(PlaybackSettings::default());
    open_with(&mut playback, &[1, 2], 0, bundle(1, vec![image(1)]), now);

    let effects = playback.handle(Input::Prev, now);
    assert_eq!(closed_reason(&effects), Some(CloseReason::StartOfQueue));
    assert!(effects.contains(&Effect::CancelTimer));
}

#[test]
fn pause_then_resume_schedules_only_the_remainder() {
    let now = Instant::now();
    let mut playback = StoryPlayback::new(PlaybackSettings::default());
    let effects = open_with(&mut playback, &[1], 0, bundle(1, vec![image(1)]), now);
    let (first, _) = armed_timer(&effects).expect("timer");

    let paused_at = now + Duration::from_millis(2000);
    let effects = playback.handle(Input::Pause, paused_at);
    assert_eq!(playback.phase(), Phase::Paused);
    assert!(effects.contains(&Effect::CancelTimer));
    assert!(!playback.timer_armed());

    let frame = playback.frame(paused_at + Duration::from_secs(30)).expect("frame");
    assert!(frame.paused);
    assert!((frame.segments[0].width() - 0.4).abs() < 1e-9);

    // A timer callback queued before the pause must not advance.
    let effects = playback.handle(Input::TimerElapsed { token: first }, paused_at);
    assert!(effects.is_empty());

    let effects = playback.handle(Input::Resume, paused_at + Duration::from_secs(30));
    let (second, after) = armed_timer(&effects).expect("timer");
    assert_ne!(first, second);
    assert!((after.as_secs_f64() - 3.0).abs() < 1e-3);
    assert_eq!(playback.phase(), Phase::Playing);
}

#[test]
fn toggle_pause_flips_between_states() {
    let now = Instant::now();
    let mut playback = StoryPlayback::new(PlaybackSettings::default());
    open_with(&mut playback, &[1], 0, bundle(1, vec![image(1)]), now);

    playback.handle(Input::TogglePause, now);
    assert_eq!(playback.phase(), Phase::Paused);
    playback.handle(Input::TogglePause, now);
    assert_eq!(playback.phase(), Phase::Playing);
}

#[test]
fn video_waits_for_metadata_and_advances_on_end() {
    let now = Instant::now();
    let mut playback = StoryPlayback::new(PlaybackSettings::default());
    let effects = open_with(
        &mut playback,
        &[1],
        0,
        bundle(1, vec![image(1), video(2)]),
        now,
    );
    let (token, after) = armed_timer(&effects).expect("timer");
    assert_eq!(after, Duration::from_millis(5000));

    let t1 = now + after;
    let effects = playback.handle(Input::TimerElapsed { token }, t1);
    assert_eq!(playback.phase(), Phase::Transitioning);
    assert!(armed_timer(&effects).is_none());
    let (media, muted) = loaded_media(&effects).expect("media load");
    assert!(muted);

    let effects = playback.handle(
        Input::MediaReady {
            token: media,
            duration: Duration::from_millis(3000),
        },
        t1,
    );
    assert!(effects.contains(&Effect::PlayMedia));
    assert_eq!(playback.phase(), Phase::Playing);
    assert!(!playback.timer_armed());

    let t2 = t1 + Duration::from_millis(1500);
    assert!((playback.fraction(t2) - 0.5).abs() < 1e-9);

    let effects = playback.handle(Input::MediaEnded { token: media }, t1 + Duration::from_millis(3000));
    assert!(effects.contains(&Effect::UnloadMedia));
    assert_eq!(closed_reason(&effects), Some(CloseReason::EndOfQueue));
    assert!(!playback.media_loaded());
}

#[test]
fn media_failure_forces_advance() {
    let now = Instant::now();
    let mut playback = StoryPlayback::new(PlaybackSettings::default());
    let effects = open_with(&mut playback, &[1], 0, bundle(1, vec![video(1), image(2)]), now);
    let (media, _) = loaded_media(&effects).expect("media load");

    let effects = playback.handle(
        Input::MediaFailed {
            token: media,
            reason: "unsupported codec".into(),
        },
        now,
    );
    assert_eq!(playback.cursor().item_index, 1);
    assert!(effects.contains(&Effect::UnloadMedia));
    assert!(armed_timer(&effects).is_some());
}

#[test]
fn stale_media_end_after_navigation_is_ignored() {
    let now = Instant::now();
    let mut playback = StoryPlayback::new(PlaybackSettings::default());
    let effects = open_with(
        &mut playback,
        &[1],
        0,
        bundle(1, vec![video(1), image(2), image(3)]),
        now,
    );
    let (media, _) = loaded_media(&effects).expect("media load");
    playback.handle(Input::Next, now);

    let effects = playback.handle(Input::MediaEnded { token: media }, now);
    assert!(effects.is_empty());
    assert_eq!(playback.cursor().item_index, 1);
}

#[test]
fn pausing_video_before_metadata_stays_paused_when_it_arrives() {
    let now = Instant::now();
    let mut playback = StoryPlayback::new(PlaybackSettings::default());
    let effects = open_with(&mut playback, &[1], 0, bundle(1, vec![video(1)]), now);
    let (media, _) = loaded_media(&effects).expect("media load");

    let effects = playback.handle(Input::Pause, now);
    assert!(effects.contains(&Effect::PauseMedia));

    let effects = playback.handle(
        Input::MediaReady {
            token: media,
            duration: Duration::from_secs(4),
        },
        now,
    );
    assert!(!effects.contains(&Effect::PlayMedia));
    assert_eq!(playback.phase(), Phase::Paused);

    let effects = playback.handle(Input::Resume, now);
    assert!(effects.contains(&Effect::PlayMedia));
    assert!(armed_timer(&effects).is_none());
    assert_eq!(playback.phase(), Phase::Playing);
}

#[test]
fn close_from_paused_video_unloads_media() {
    let now = Instant::now();
    let mut playback = StoryPlayback::new(PlaybackSettings::default());
    let effects = open_with(&mut playback, &[1], 0, bundle(1, vec![video(1)]), now);
    let (media, _) = loaded_media(&effects).expect("media load");
    playback.handle(
        Input::MediaReady {
            token: media,
            duration: Duration::from_secs(4),
        },
        now,
    );
    playback.handle(Input::Pause, now);

    let effects = playback.handle(Input::DismissOutside, now);
    assert!(effects.contains(&Effect::UnloadMedia));
    assert_eq!(closed_reason(&effects), Some(CloseReason::DismissedOutside));
    assert!(!playback.media_loaded());
    assert!(!playback.timer_armed());
    assert_eq!(playback.frame(now), None);
}

#[test]
fn close_while_closed_does_nothing() {
    let mut playback = StoryPlayback::new(PlaybackSettings::default());
    assert!(playback.handle(Input::Close, Instant::now()).is_empty());
    assert!(playback.handle(Input::Next, Instant::now()).is_empty());
}

#[test]
fn navigation_is_ignored_while_loading() {
    let now = Instant::now();
    let mut playback = StoryPlayback::new(PlaybackSettings::default());
    playback.handle(
        Input::Open {
            queue: vec![UserId(1), UserId(2)],
            index: 0,
        },
        now,
    );

    assert!(playback.handle(Input::Next, now).is_empty());
    assert!(playback.handle(Input::Pause, now).is_empty());
    assert_eq!(playback.phase(), Phase::Loading);
}

#[test]
fn mute_preference_carries_to_next_video() {
    let now = Instant::now();
    let mut playback = StoryPlayback::new(PlaybackSettings::default());
    open_with(&mut playback, &[1], 0, bundle(1, vec![video(1), video(2)]), now);

    let effects = playback.handle(Input::ToggleMute, now);
    assert!(effects.contains(&Effect::SetMuted(false)));

    let effects = playback.handle(Input::Next, now);
    let (_, muted) = loaded_media(&effects).expect("media load");
    assert!(!muted);
}

#[test]
fn duration_hint_overrides_default_duration() {
    let now = Instant::now();
    let mut playback = StoryPlayback::new(PlaybackSettings {
        item_duration: Duration::from_millis(10_000),
        start_muted: true,
    });
    let mut hinted = image(1);
    hinted.duration_hint_ms = Some(2500);
    let effects = open_with(&mut playback, &[1], 0, bundle(1, vec![hinted, image(2)]), now);
    let (token, after) = armed_timer(&effects).expect("timer");
    assert_eq!(after, Duration::from_millis(2500));

    let effects = playback.handle(Input::TimerElapsed { token }, now + after);
    let (_, after) = armed_timer(&effects).expect("timer");
    assert_eq!(after, Duration::from_millis(10_000));
}

#[test]
fn reopening_while_open_starts_a_fresh_session() {
    let now = Instant::now();
    let mut playback = StoryPlayback::new(PlaybackSettings::default());
    open_with(&mut playback, &[1, 2], 0, bundle(1, vec![image(1)]), now);

    let effects = playback.handle(
        Input::Open {
            queue: vec![UserId(1), UserId(2)],
            index: 1,
        },
        now,
    );
    assert!(effects.contains(&Effect::CancelTimer));
    assert_eq!(fetched_user(&effects), Some(UserId(2)));
    assert_eq!(playback.phase(), Phase::Loading);
}
