//! Media surfaces that play video story items.
//!
//! The viewer owns exactly one surface and calls [`MediaSurface::unload`]
//! before every new load, so at most one item is ever playing. Surfaces
//! report back through the [`MediaSignals`] handed to `load`.

use std::{
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use shared::domain::StoryItem;
use tokio::{
    sync::mpsc::WeakUnboundedSender,
    task::JoinHandle,
    time::{sleep, Instant},
};
use tracing::debug;

use crate::{
    playback::{Input, MediaToken},
    viewer::DriverMessage,
};

pub const DEFAULT_SIMULATED_LENGTH: Duration = Duration::from_secs(8);

#[derive(Clone)]
pub struct MediaSignals {
    token: MediaToken,
    tx: WeakUnboundedSender<DriverMessage>,
}

impl MediaSignals {
    pub(crate) fn new(token: MediaToken, tx: WeakUnboundedSender<DriverMessage>) -> Self {
        Self { token, tx }
    }

    pub fn token(&self) -> MediaToken {
        self.token
    }

    /// Metadata has loaded and the decoded duration is known.
    pub fn ready(&self, duration: Duration) {
        self.send(Input::MediaReady {
            token: self.token,
            duration,
        });
    }

    pub fn ended(&self) {
        self.send(Input::MediaEnded { token: self.token });
    }

    pub fn failed(&self, reason: impl Into<String>) {
        self.send(Input::MediaFailed {
            token: self.token,
            reason: reason.into(),
        });
    }

    fn send(&self, input: Input) {
        if let Some(tx) = self.tx.upgrade() {
            let _ = tx.send(DriverMessage::Input(input));
        }
    }
}

pub trait MediaSurface: Send + Sync {
    fn load(&self, item: &StoryItem, muted: bool, signals: MediaSignals);
    fn play(&self);
    fn pause(&self);
    fn unload(&self);
    fn set_muted(&self, muted: bool);
    fn is_playing(&self) -> bool;
}

/// Surface for environments that cannot decode video; every load fails so
/// the viewer skips the item.
pub struct UnsupportedMediaSurface;

impl MediaSurface for UnsupportedMediaSurface {
    fn load(&self, item: &StoryItem, _muted: bool, signals: MediaSignals) {
        signals.failed(format!("cannot play {} content", item.content_type));
    }

    fn play(&self) {}

    fn pause(&self) {}

    fn unload(&self) {}

    fn set_muted(&self, _muted: bool) {}

    fn is_playing(&self) -> bool {
        false
    }
}

#[derive(Default)]
struct SimulatedState {
    signals: Option<MediaSignals>,
    length: Duration,
    position: Duration,
    playing_since: Option<Instant>,
    muted: bool,
    metadata_task: Option<JoinHandle<()>>,
    end_task: Option<JoinHandle<()>>,
}

impl SimulatedState {
    fn stop_tasks(&mut self) {
        if let Some(task) = self.metadata_task.take() {
            task.abort();
        }
        if let Some(task) = self.end_task.take() {
            task.abort();
        }
    }
}

/// Headless stand-in for a video element. Playback length comes from the
/// item's duration hint, falling back to a fixed length; metadata arrives
/// after `metadata_delay`.
pub struct SimulatedMediaSurface {
    default_length: Duration,
    metadata_delay: Duration,
    state: Mutex<SimulatedState>,
}

impl SimulatedMediaSurface {
    pub fn new(default_length: Duration, metadata_delay: Duration) -> Self {
        Self {
            default_length,
            metadata_delay,
            state: Mutex::new(SimulatedState::default()),
        }
    }

    pub fn muted(&self) -> bool {
        self.lock().muted
    }

    pub fn position(&self) -> Duration {
        let state = self.lock();
        match state.playing_since {
            Some(since) => (state.position + since.elapsed()).min(state.length),
            None => state.position,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimulatedState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for SimulatedMediaSurface {
    fn default() -> Self {
        Self::new(DEFAULT_SIMULATED_LENGTH, Duration::from_millis(50))
    }
}

impl MediaSurface for SimulatedMediaSurface {
    fn load(&self, item: &StoryItem, muted: bool, signals: MediaSignals) {
        let mut state = self.lock();
        state.stop_tasks();
        *state = SimulatedState {
            muted,
            ..SimulatedState::default()
        };

        if item.content_url.trim().is_empty() {
            signals.failed("media source is empty");
            return;
        }

        let length = item.duration_hint().unwrap_or(self.default_length);
        state.length = length;
        state.signals = Some(signals.clone());

        debug!(
            story_id = item.id.0,
            token = signals.token().0,
            ?length,
            "media: simulated load"
        );
        let delay = self.metadata_delay;
        state.metadata_task = Some(tokio::spawn(async move {
            sleep(delay).await;
            signals.ready(length);
        }));
    }

    fn play(&self) {
        let mut state = self.lock();
        if state.playing_since.is_some() {
            return;
        }
        let Some(signals) = state.signals.clone() else {
            return;
        };
        let left = state.length.saturating_sub(state.position);
        state.playing_since = Some(Instant::now());
        state.end_task = Some(tokio::spawn(async move {
            sleep(left).await;
            signals.ended();
        }));
    }

    fn pause(&self) {
        let mut state = self.lock();
        if let Some(since) = state.playing_since.take() {
            state.position += since.elapsed();
        }
        if let Some(task) = state.end_task.take() {
            task.abort();
        }
    }

    fn unload(&self) {
        let mut state = self.lock();
        state.stop_tasks();
        let muted = state.muted;
        *state = SimulatedState {
            muted,
            ..SimulatedState::default()
        };
    }

    fn set_muted(&self, muted: bool) {
        self.lock().muted = muted;
    }

    fn is_playing(&self) -> bool {
        self.lock().playing_since.is_some()
    }
}
