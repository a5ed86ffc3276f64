//! Story playback state machine.
//!
//! [`StoryPlayback`] is pure: it consumes [`Input`]s stamped with the current
//! instant and answers with the [`Effect`]s the runtime must carry out. It
//! never sleeps, fetches or touches media itself, which keeps every
//! transition testable without a runtime.
//!
//! Every timer, media load and bundle fetch is tagged with a token. Inputs
//! that carry a token other than the live one are stale and ignored, so a
//! late callback can never act on a replaced or closed session.

use std::{collections::HashMap, time::Duration};

use shared::domain::{StoryId, StoryItem, UserId, UserStoryBundle};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::progress::{segments, ItemClock, SegmentFill};

pub const DEFAULT_ITEM_DURATION: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSettings {
    /// How long image and text items stay on screen unless the item
    /// carries its own duration hint.
    pub item_duration: Duration,
    pub start_muted: bool,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            item_duration: DEFAULT_ITEM_DURATION,
            start_muted: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Closed,
    Loading,
    Playing,
    Paused,
    /// An item is active but its media has not reported a duration yet.
    Transitioning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaybackCursor {
    pub user_index: usize,
    pub item_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MediaToken(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchToken(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadFailure {
    Network(String),
    EmptyResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Requested,
    DismissedOutside,
    EndOfQueue,
    StartOfQueue,
    LoadFailed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Open { queue: Vec<UserId>, index: usize },
    BundleLoaded { token: FetchToken, bundle: UserStoryBundle },
    BundleFailed { token: FetchToken, failure: LoadFailure },
    TimerElapsed { token: TimerToken },
    MediaReady { token: MediaToken, duration: Duration },
    MediaEnded { token: MediaToken },
    MediaFailed { token: MediaToken, reason: String },
    Next,
    Prev,
    Pause,
    Resume,
    TogglePause,
    ToggleMute,
    Close,
    DismissOutside,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    FetchBundle { token: FetchToken, user_id: UserId },
    CancelFetch,
    ArmTimer { token: TimerToken, after: Duration },
    CancelTimer,
    LoadMedia { token: MediaToken, item: StoryItem, muted: bool },
    PlayMedia,
    PauseMedia,
    UnloadMedia,
    SetMuted(bool),
    ReportView { story_id: StoryId },
    Opened,
    Render(Frame),
    Closed { reason: CloseReason },
    LoadFailed { user_id: UserId, failure: LoadFailure },
}

/// Everything a renderer needs to draw the viewer at one instant. The
/// active segment should animate from its current fraction to full over
/// `active_remaining` unless `paused` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub phase: Phase,
    pub cursor: PlaybackCursor,
    pub user_id: UserId,
    pub display_name: String,
    pub avatar_url: String,
    pub item: StoryItem,
    pub segments: Vec<SegmentFill>,
    pub active_remaining: Option<Duration>,
    pub paused: bool,
    pub muted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryPoint {
    First,
    Last,
}

#[derive(Debug, Clone, Copy)]
struct PendingLoad {
    token: FetchToken,
    user_id: UserId,
    entry: EntryPoint,
}

pub struct StoryPlayback {
    settings: PlaybackSettings,
    phase: Phase,
    queue: Vec<UserId>,
    cursor: PlaybackCursor,
    bundle: Option<UserStoryBundle>,
    session_cache: HashMap<UserId, UserStoryBundle>,
    pending: Option<PendingLoad>,
    overlay_visible: bool,
    clock: ItemClock,
    timer: Option<TimerToken>,
    media: Option<MediaToken>,
    muted: bool,
    next_token: u64,
}

impl StoryPlayback {
    pub fn new(settings: PlaybackSettings) -> Self {
        let muted = settings.start_muted;
        Self {
            settings,
            phase: Phase::Closed,
            queue: Vec::new(),
            cursor: PlaybackCursor::default(),
            bundle: None,
            session_cache: HashMap::new(),
            pending: None,
            overlay_visible: false,
            clock: ItemClock::default(),
            timer: None,
            media: None,
            muted,
            next_token: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn cursor(&self) -> PlaybackCursor {
        self.cursor
    }

    pub fn is_open(&self) -> bool {
        self.phase != Phase::Closed
    }

    pub fn timer_armed(&self) -> bool {
        self.timer.is_some()
    }

    pub fn media_loaded(&self) -> bool {
        self.media.is_some()
    }

    pub fn fetch_in_flight(&self) -> bool {
        self.pending.is_some()
    }

    pub fn muted(&self) -> bool {
        self.muted
    }

    pub fn current_bundle(&self) -> Option<&UserStoryBundle> {
        self.bundle.as_ref()
    }

    pub fn current_item(&self) -> Option<&StoryItem> {
        if matches!(self.phase, Phase::Closed | Phase::Loading) {
            return None;
        }
        self.bundle
            .as_ref()
            .and_then(|bundle| bundle.items.get(self.cursor.item_index))
    }

    pub fn fraction(&self, now: Instant) -> f64 {
        self.clock.fraction(now)
    }

    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.clock.remaining(now)
    }

    pub fn frame(&self, now: Instant) -> Option<Frame> {
        let bundle = self.bundle.as_ref()?;
        let item = self.current_item()?.clone();
        Some(Frame {
            phase: self.phase,
            cursor: self.cursor,
            user_id: bundle.user_id,
            display_name: bundle.display_name.clone(),
            avatar_url: bundle.avatar_url.clone(),
            item,
            segments: segments(
                bundle.items.len(),
                self.cursor.item_index,
                self.clock.fraction(now),
            ),
            active_remaining: self.clock.remaining(now),
            paused: self.phase == Phase::Paused,
            muted: self.muted,
        })
    }

    pub fn handle(&mut self, input: Input, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        match input {
            Input::Open { queue, index } => self.open(queue, index, now, &mut effects),
            Input::BundleLoaded { token, bundle } => {
                self.bundle_loaded(token, bundle, now, &mut effects)
            }
            Input::BundleFailed { token, failure } => {
                self.bundle_failed(token, failure, &mut effects)
            }
            Input::TimerElapsed { token } => {
                if self.timer != Some(token) {
                    debug!(token = token.0, "story: ignoring stale timer");
                } else {
                    self.timer = None;
                    self.advance(now, &mut effects);
                }
            }
            Input::MediaReady { token, duration } => {
                self.media_ready(token, duration, now, &mut effects)
            }
            Input::MediaEnded { token } => {
                if self.is_live_media(token) {
                    self.advance(now, &mut effects);
                }
            }
            Input::MediaFailed { token, reason } => {
                if self.is_live_media(token) {
                    warn!(reason = %reason, "story: media failed to load, skipping item");
                    self.advance(now, &mut effects);
                }
            }
            Input::Next => {
                if self.is_navigable() {
                    self.advance(now, &mut effects);
                }
            }
            Input::Prev => {
                if self.is_navigable() {
                    self.regress(now, &mut effects);
                }
            }
            Input::Pause => self.pause(now, &mut effects),
            Input::Resume => self.resume(now, &mut effects),
            Input::TogglePause => {
                if self.phase == Phase::Paused {
                    self.resume(now, &mut effects);
                } else {
                    self.pause(now, &mut effects);
                }
            }
            Input::ToggleMute => self.toggle_mute(now, &mut effects),
            Input::Close => self.close(CloseReason::Requested, &mut effects),
            Input::DismissOutside => self.close(CloseReason::DismissedOutside, &mut effects),
        }
        effects
    }

    fn open(&mut self, queue: Vec<UserId>, index: usize, now: Instant, effects: &mut Vec<Effect>) {
        if index >= queue.len() {
            warn!(index, queue_len = queue.len(), "story: open request out of range");
            return;
        }
        if self.is_open() {
            // Selecting another entry point while open starts a new session.
            self.teardown_session(effects);
        }
        self.queue = queue;
        self.begin_load(index, EntryPoint::First, now, effects);
    }

    fn begin_load(
        &mut self,
        user_index: usize,
        entry: EntryPoint,
        now: Instant,
        effects: &mut Vec<Effect>,
    ) {
        self.release_item(effects);
        if self.pending.take().is_some() {
            effects.push(Effect::CancelFetch);
        }

        let user_id = self.queue[user_index];
        self.phase = Phase::Loading;
        self.cursor = PlaybackCursor {
            user_index,
            item_index: 0,
        };

        if let Some(bundle) = self.session_cache.get(&user_id).cloned() {
            debug!(user_id = user_id.0, "story: serving bundle from session cache");
            self.enter_bundle(bundle, entry, now, effects);
            return;
        }

        let token = FetchToken(self.mint());
        self.pending = Some(PendingLoad {
            token,
            user_id,
            entry,
        });
        effects.push(Effect::FetchBundle { token, user_id });
    }

    fn bundle_loaded(
        &mut self,
        token: FetchToken,
        bundle: UserStoryBundle,
        now: Instant,
        effects: &mut Vec<Effect>,
    ) {
        let Some(pending) = self.take_pending(token) else {
            return;
        };
        if bundle.is_empty() {
            self.fail_load(pending.user_id, LoadFailure::EmptyResult, effects);
            return;
        }
        self.session_cache.insert(pending.user_id, bundle.clone());
        self.enter_bundle(bundle, pending.entry, now, effects);
    }

    fn bundle_failed(&mut self, token: FetchToken, failure: LoadFailure, effects: &mut Vec<Effect>) {
        let Some(pending) = self.take_pending(token) else {
            return;
        };
        self.fail_load(pending.user_id, failure, effects);
    }

    fn take_pending(&mut self, token: FetchToken) -> Option<PendingLoad> {
        match self.pending {
            Some(pending) if pending.token == token && self.phase == Phase::Loading => {
                self.pending = None;
                Some(pending)
            }
            _ => {
                debug!(token = token.0, "story: ignoring stale bundle response");
                None
            }
        }
    }

    fn fail_load(&mut self, user_id: UserId, failure: LoadFailure, effects: &mut Vec<Effect>) {
        warn!(user_id = user_id.0, ?failure, "story: bundle load failed");
        effects.push(Effect::LoadFailed { user_id, failure });
        self.close(CloseReason::LoadFailed, effects);
    }

    fn enter_bundle(
        &mut self,
        bundle: UserStoryBundle,
        entry: EntryPoint,
        now: Instant,
        effects: &mut Vec<Effect>,
    ) {
        self.cursor.item_index = match entry {
            EntryPoint::First => 0,
            EntryPoint::Last => bundle.last_index().unwrap_or(0),
        };
        self.bundle = Some(bundle);
        if !self.overlay_visible {
            self.overlay_visible = true;
            effects.push(Effect::Opened);
        }
        self.activate_item(now, effects);
    }

    fn activate_item(&mut self, now: Instant, effects: &mut Vec<Effect>) {
        self.release_item(effects);
        let Some(item) = self
            .bundle
            .as_ref()
            .and_then(|bundle| bundle.items.get(self.cursor.item_index))
            .cloned()
        else {
            return;
        };

        effects.push(Effect::ReportView { story_id: item.id });

        if item.content_type.is_timed_by_media() {
            let token = MediaToken(self.mint());
            self.media = Some(token);
            self.clock.arm(None);
            self.phase = Phase::Transitioning;
            effects.push(Effect::LoadMedia {
                token,
                item,
                muted: self.muted,
            });
        } else {
            let duration = item.duration_hint().unwrap_or(self.settings.item_duration);
            self.clock.arm(Some(duration));
            self.clock.run(now);
            self.arm_timer(duration, effects);
            self.phase = Phase::Playing;
        }
        self.render(now, effects);
    }

    fn media_ready(
        &mut self,
        token: MediaToken,
        duration: Duration,
        now: Instant,
        effects: &mut Vec<Effect>,
    ) {
        if !self.is_live_media(token) {
            return;
        }
        self.clock.set_duration(duration);
        match self.phase {
            Phase::Transitioning => {
                self.clock.run(now);
                self.phase = Phase::Playing;
                effects.push(Effect::PlayMedia);
                self.render(now, effects);
            }
            Phase::Paused => self.render(now, effects),
            _ => {}
        }
    }

    fn advance(&mut self, now: Instant, effects: &mut Vec<Effect>) {
        let Some(len) = self.bundle.as_ref().map(|bundle| bundle.items.len()) else {
            return;
        };
        if self.cursor.item_index + 1 < len {
            self.cursor.item_index += 1;
            self.activate_item(now, effects);
        } else if self.cursor.user_index + 1 < self.queue.len() {
            self.begin_load(self.cursor.user_index + 1, EntryPoint::First, now, effects);
        } else {
            self.close(CloseReason::EndOfQueue, effects);
        }
    }

    fn regress(&mut self, now: Instant, effects: &mut Vec<Effect>) {
        if self.cursor.item_index > 0 {
            self.cursor.item_index -= 1;
            self.activate_item(now, effects);
        } else if self.cursor.user_index > 0 {
            self.begin_load(self.cursor.user_index - 1, EntryPoint::Last, now, effects);
        } else {
            self.close(CloseReason::StartOfQueue, effects);
        }
    }

    fn pause(&mut self, now: Instant, effects: &mut Vec<Effect>) {
        if !matches!(self.phase, Phase::Playing | Phase::Transitioning) {
            return;
        }
        self.cancel_timer(effects);
        if self.media.is_some() {
            effects.push(Effect::PauseMedia);
        }
        self.clock.halt(now);
        self.phase = Phase::Paused;
        self.render(now, effects);
    }

    fn resume(&mut self, now: Instant, effects: &mut Vec<Effect>) {
        if self.phase != Phase::Paused {
            return;
        }
        if self.media.is_some() {
            if self.clock.duration().is_some() {
                self.clock.run(now);
                self.phase = Phase::Playing;
                effects.push(Effect::PlayMedia);
            } else {
                // Metadata still outstanding; MediaReady starts playback.
                self.phase = Phase::Transitioning;
            }
        } else {
            let remaining = self
                .clock
                .remaining(now)
                .unwrap_or(self.settings.item_duration);
            self.clock.run(now);
            self.arm_timer(remaining, effects);
            self.phase = Phase::Playing;
        }
        self.render(now, effects);
    }

    fn toggle_mute(&mut self, now: Instant, effects: &mut Vec<Effect>) {
        self.muted = !self.muted;
        if self.media.is_some() {
            effects.push(Effect::SetMuted(self.muted));
        }
        self.render(now, effects);
    }

    fn close(&mut self, reason: CloseReason, effects: &mut Vec<Effect>) {
        if !self.is_open() {
            return;
        }
        let was_visible = self.overlay_visible;
        self.teardown_session(effects);
        info!(?reason, "story: viewer closed");
        // A failed first load is reported through LoadFailed alone.
        if was_visible || reason != CloseReason::LoadFailed {
            effects.push(Effect::Closed { reason });
        }
    }

    fn teardown_session(&mut self, effects: &mut Vec<Effect>) {
        if self.pending.take().is_some() {
            effects.push(Effect::CancelFetch);
        }
        self.release_item(effects);
        self.bundle = None;
        self.session_cache.clear();
        self.queue.clear();
        self.cursor = PlaybackCursor::default();
        self.overlay_visible = false;
        self.phase = Phase::Closed;
    }

    /// Cancels the timer and unloads media of whatever item is active.
    fn release_item(&mut self, effects: &mut Vec<Effect>) {
        self.cancel_timer(effects);
        if self.media.take().is_some() {
            effects.push(Effect::UnloadMedia);
        }
        self.clock.reset();
    }

    fn cancel_timer(&mut self, effects: &mut Vec<Effect>) {
        if self.timer.take().is_some() {
            effects.push(Effect::CancelTimer);
        }
    }

    fn arm_timer(&mut self, after: Duration, effects: &mut Vec<Effect>) {
        self.cancel_timer(effects);
        let token = TimerToken(self.mint());
        self.timer = Some(token);
        effects.push(Effect::ArmTimer { token, after });
    }

    fn render(&self, now: Instant, effects: &mut Vec<Effect>) {
        if let Some(frame) = self.frame(now) {
            effects.push(Effect::Render(frame));
        }
    }

    fn is_live_media(&self, token: MediaToken) -> bool {
        let live = self.media == Some(token);
        if !live {
            debug!(token = token.0, "story: ignoring stale media signal");
        }
        live
    }

    fn is_navigable(&self) -> bool {
        matches!(
            self.phase,
            Phase::Playing | Phase::Paused | Phase::Transitioning
        )
    }

    fn mint(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }
}

#[cfg(test)]
#[path = "tests/playback_tests.rs"]
mod tests;
