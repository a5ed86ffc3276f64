//! Runtime driver for [`StoryPlayback`].
//!
//! One tokio task owns the state machine and carries out its effects: it
//! holds the single timer task, the single bundle fetch and the media
//! surface. UI code talks to it through a cloneable [`ViewerHandle`] and
//! listens on a broadcast of [`ViewerEvent`]s.

use std::{sync::Arc, time::Duration};

use shared::domain::{StoryItem, UserId};
use tokio::{
    sync::{
        broadcast,
        mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender},
        oneshot,
    },
    task::JoinHandle,
    time::{sleep, Instant},
};
use tracing::{debug, warn};

use crate::{
    error::ViewerError,
    media::{MediaSignals, MediaSurface, UnsupportedMediaSurface},
    playback::{
        CloseReason, Effect, Frame, Input, LoadFailure, Phase, PlaybackCursor, PlaybackSettings,
        StoryPlayback, TimerToken,
    },
    StoryFeed,
};

const EVENT_CAPACITY: usize = 256;

pub(crate) enum DriverMessage {
    Input(Input),
    Snapshot(oneshot::Sender<ViewerSnapshot>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewerEvent {
    Opened,
    Frame(Frame),
    Closed { reason: CloseReason },
    LoadFailed { user_id: UserId, failure: LoadFailure },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewerSnapshot {
    pub phase: Phase,
    pub cursor: PlaybackCursor,
    pub item: Option<StoryItem>,
    pub timer_armed: bool,
    pub live_timers: usize,
    pub fetch_in_flight: bool,
    pub media_loaded: bool,
    pub media_playing: bool,
    pub muted: bool,
    pub fraction: f64,
    pub remaining: Option<Duration>,
}

#[derive(Clone)]
pub struct ViewerHandle {
    tx: UnboundedSender<DriverMessage>,
    events: broadcast::Sender<ViewerEvent>,
}

impl ViewerHandle {
    pub fn open(&self, queue: Vec<UserId>, index: usize) -> Result<(), ViewerError> {
        if index >= queue.len() {
            return Err(ViewerError::OutOfRange {
                index,
                len: queue.len(),
            });
        }
        self.send(Input::Open { queue, index })
    }

    /// Opens `queue` at the entry belonging to `user_id`, the way tapping a
    /// story ring selects one user out of the whole row.
    pub fn open_user(&self, queue: Vec<UserId>, user_id: UserId) -> Result<(), ViewerError> {
        let index = queue
            .iter()
            .position(|candidate| *candidate == user_id)
            .ok_or(ViewerError::UnknownUser { user_id })?;
        self.open(queue, index)
    }

    pub fn next(&self) -> Result<(), ViewerError> {
        self.send(Input::Next)
    }

    pub fn prev(&self) -> Result<(), ViewerError> {
        self.send(Input::Prev)
    }

    pub fn pause(&self) -> Result<(), ViewerError> {
        self.send(Input::Pause)
    }

    pub fn resume(&self) -> Result<(), ViewerError> {
        self.send(Input::Resume)
    }

    pub fn toggle_pause(&self) -> Result<(), ViewerError> {
        self.send(Input::TogglePause)
    }

    pub fn toggle_mute(&self) -> Result<(), ViewerError> {
        self.send(Input::ToggleMute)
    }

    pub fn close(&self) -> Result<(), ViewerError> {
        self.send(Input::Close)
    }

    /// A click landed outside the viewer surface.
    pub fn dismiss_outside(&self) -> Result<(), ViewerError> {
        self.send(Input::DismissOutside)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewerEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> Result<ViewerSnapshot, ViewerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(DriverMessage::Snapshot(reply_tx))
            .map_err(|_| ViewerError::Stopped)?;
        reply_rx.await.map_err(|_| ViewerError::Stopped)
    }

    fn send(&self, input: Input) -> Result<(), ViewerError> {
        self.tx
            .send(DriverMessage::Input(input))
            .map_err(|_| ViewerError::Stopped)
    }
}

pub struct StoryViewer;

impl StoryViewer {
    /// Spawns a viewer that cannot play video; video items are skipped.
    pub fn spawn(feed: Arc<dyn StoryFeed>, settings: PlaybackSettings) -> ViewerHandle {
        Self::spawn_with_media(feed, Arc::new(UnsupportedMediaSurface), settings)
    }

    pub fn spawn_with_media(
        feed: Arc<dyn StoryFeed>,
        media: Arc<dyn MediaSurface>,
        settings: PlaybackSettings,
    ) -> ViewerHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let driver = Driver {
            playback: StoryPlayback::new(settings),
            feed,
            media,
            self_tx: tx.downgrade(),
            events: events.clone(),
            timer: None,
            fetch: None,
        };
        tokio::spawn(driver.run(rx));
        ViewerHandle { tx, events }
    }
}

struct Driver {
    playback: StoryPlayback,
    feed: Arc<dyn StoryFeed>,
    media: Arc<dyn MediaSurface>,
    self_tx: WeakUnboundedSender<DriverMessage>,
    events: broadcast::Sender<ViewerEvent>,
    timer: Option<(TimerToken, JoinHandle<()>)>,
    fetch: Option<JoinHandle<()>>,
}

impl Driver {
    async fn run(mut self, mut rx: UnboundedReceiver<DriverMessage>) {
        while let Some(message) = rx.recv().await {
            match message {
                DriverMessage::Input(input) => self.dispatch(input),
                DriverMessage::Snapshot(reply) => {
                    let _ = reply.send(self.snapshot());
                }
            }
        }
        // Every handle is gone; leave nothing running behind.
        self.dispatch(Input::Close);
        self.abort_fetch();
        self.abort_timer();
        debug!("viewer: driver stopped");
    }

    fn dispatch(&mut self, input: Input) {
        if let Input::TimerElapsed { token } = &input {
            if matches!(&self.timer, Some((live, _)) if live == token) {
                self.timer = None;
            }
        }
        let effects = self.playback.handle(input, Instant::now());
        for effect in effects {
            self.apply(effect);
        }
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::FetchBundle { token, user_id } => {
                self.abort_fetch();
                let feed = Arc::clone(&self.feed);
                let tx = self.self_tx.clone();
                self.fetch = Some(tokio::spawn(async move {
                    let input = match feed.fetch_bundle(user_id).await {
                        Ok(bundle) => Input::BundleLoaded { token, bundle },
                        Err(err) => {
                            let failure = if err.is_empty_result() {
                                LoadFailure::EmptyResult
                            } else {
                                LoadFailure::Network(err.to_string())
                            };
                            Input::BundleFailed { token, failure }
                        }
                    };
                    if let Some(tx) = tx.upgrade() {
                        let _ = tx.send(DriverMessage::Input(input));
                    }
                }));
            }
            Effect::CancelFetch => self.abort_fetch(),
            Effect::ArmTimer { token, after } => {
                self.abort_timer();
                let tx = self.self_tx.clone();
                let task = tokio::spawn(async move {
                    sleep(after).await;
                    if let Some(tx) = tx.upgrade() {
                        let _ = tx.send(DriverMessage::Input(Input::TimerElapsed { token }));
                    }
                });
                self.timer = Some((token, task));
            }
            Effect::CancelTimer => self.abort_timer(),
            Effect::LoadMedia { token, item, muted } => {
                self.media
                    .load(&item, muted, MediaSignals::new(token, self.self_tx.clone()));
            }
            Effect::PlayMedia => self.media.play(),
            Effect::PauseMedia => self.media.pause(),
            Effect::UnloadMedia => self.media.unload(),
            Effect::SetMuted(muted) => self.media.set_muted(muted),
            Effect::ReportView { story_id } => {
                let feed = Arc::clone(&self.feed);
                tokio::spawn(async move {
                    if let Err(err) = feed.report_view(story_id).await {
                        warn!(story_id = story_id.0, error = %err, "story: failed to record view");
                    }
                });
            }
            Effect::Opened => self.publish(ViewerEvent::Opened),
            Effect::Render(frame) => self.publish(ViewerEvent::Frame(frame)),
            Effect::Closed { reason } => self.publish(ViewerEvent::Closed { reason }),
            Effect::LoadFailed { user_id, failure } => {
                self.publish(ViewerEvent::LoadFailed { user_id, failure })
            }
        }
    }

    fn publish(&self, event: ViewerEvent) {
        // No subscribers is fine; the viewer keeps playing headless.
        let _ = self.events.send(event);
    }

    fn abort_timer(&mut self) {
        if let Some((_, task)) = self.timer.take() {
            task.abort();
        }
    }

    fn abort_fetch(&mut self) {
        if let Some(task) = self.fetch.take() {
            task.abort();
        }
    }

    fn snapshot(&self) -> ViewerSnapshot {
        let now = Instant::now();
        ViewerSnapshot {
            phase: self.playback.phase(),
            cursor: self.playback.cursor(),
            item: self.playback.current_item().cloned(),
            timer_armed: self.playback.timer_armed(),
            live_timers: usize::from(self.timer.is_some()),
            fetch_in_flight: self.playback.fetch_in_flight(),
            media_loaded: self.playback.media_loaded(),
            media_playing: self.media.is_playing(),
            muted: self.playback.muted(),
            fraction: self.playback.fraction(now),
            remaining: self.playback.remaining(now),
        }
    }
}

#[cfg(test)]
#[path = "tests/viewer_tests.rs"]
mod tests;
