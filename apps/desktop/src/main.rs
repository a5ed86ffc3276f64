use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use client_core::{SimulatedMediaSurface, StoriesClient, StoryViewer, ViewerEvent, ViewerHandle};
use futures::StreamExt;
use shared::domain::{ActionTarget, FeedAction, StoryId, UserId};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod render;
mod settings;

use settings::load_settings;

const METADATA_DELAY: Duration = Duration::from_millis(150);

#[derive(Parser, Debug)]
#[command(name = "story-viewer", about = "Headless story viewer for the feed service")]
struct Args {
    /// Settings file; defaults to ./story-viewer.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    server_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play the stories of one or more users in order.
    Play {
        #[arg(long = "user", required = true)]
        users: Vec<i64>,
        /// Index into the user list to start from.
        #[arg(long, default_value_t = 0)]
        start: usize,
        #[arg(long)]
        item_duration_ms: Option<u64>,
        #[arg(long)]
        unmuted: bool,
    },
    /// List who has seen one of your stories.
    Viewers {
        #[arg(long)]
        story: i64,
    },
    /// Like, bookmark or share a feed item.
    Action {
        #[arg(value_enum)]
        action: ActionArg,
        #[arg(long)]
        target_type: String,
        #[arg(long)]
        target_id: i64,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Print the shareable link of a story.
    Link {
        #[arg(long)]
        story: i64,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ActionArg {
    Like,
    Bookmark,
    Share,
}

impl From<ActionArg> for FeedAction {
    fn from(value: ActionArg) -> Self {
        match value {
            ActionArg::Like => FeedAction::Like,
            ActionArg::Bookmark => FeedAction::Bookmark,
            ActionArg::Share => FeedAction::Share,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ViewerKey {
    Next,
    Prev,
    TogglePause,
    ToggleMute,
    Close,
    Dismiss,
    Link,
    Viewers,
    Help,
}

fn parse_key(line: &str) -> Option<ViewerKey> {
    match line.trim() {
        "n" | "next" => Some(ViewerKey::Next),
        "p" | "prev" => Some(ViewerKey::Prev),
        "" | "space" | "pause" => Some(ViewerKey::TogglePause),
        "m" | "mute" => Some(ViewerKey::ToggleMute),
        "q" | "close" => Some(ViewerKey::Close),
        "x" | "outside" => Some(ViewerKey::Dismiss),
        "l" | "link" => Some(ViewerKey::Link),
        "v" | "viewers" => Some(ViewerKey::Viewers),
        "h" | "help" | "?" => Some(ViewerKey::Help),
        _ => None,
    }
}

fn check_start(users: usize, start: usize) -> Result<()> {
    if start >= users {
        anyhow::bail!("--start {start} is out of range for {users} user(s)");
    }
    Ok(())
}

fn print_help() {
    println!("commands: n(ext) p(rev) <enter>=pause/resume m(ute) l(ink) v(iewers) x=click outside q(uit)");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = load_settings(args.config.as_deref())?;
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    let client = Arc::new(StoriesClient::new(&settings.server_url)?);

    match args.command {
        Command::Play {
            users,
            start,
            item_duration_ms,
            unmuted,
        } => {
            if let Some(ms) = item_duration_ms {
                settings.item_duration_ms = ms;
            }
            if unmuted {
                settings.start_muted = false;
            }
            check_start(users.len(), start)?;
            let queue = users.into_iter().map(UserId).collect();
            play(client, &settings, queue, start).await?;
        }
        Command::Viewers { story } => {
            let viewers = client.story_viewers(StoryId(story)).await?;
            println!("{}", render::format_viewers(&viewers));
        }
        Command::Action {
            action,
            target_type,
            target_id,
            comment,
        } => {
            let response = client
                .perform_action(
                    action.into(),
                    &ActionTarget::new(target_type, target_id),
                    comment,
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Link { story } => {
            println!("{}", client.story_link(StoryId(story))?);
        }
    }

    Ok(())
}

async fn play(
    client: Arc<StoriesClient>,
    settings: &settings::Settings,
    queue: Vec<UserId>,
    start: usize,
) -> Result<()> {
    let media = Arc::new(SimulatedMediaSurface::new(
        settings.simulated_video_length(),
        METADATA_DELAY,
    ));
    let handle = StoryViewer::spawn_with_media(client.clone(), media, settings.playback());
    let mut events = BroadcastStream::new(handle.subscribe());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    info!(users = queue.len(), start, server = %settings.server_url, "opening story viewer");
    handle.open(queue, start)?;
    print_help();

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(Ok(event)) => {
                    println!("{}", render::format_event(&event, Utc::now()));
                    if matches!(event, ViewerEvent::Closed { .. } | ViewerEvent::LoadFailed { .. }) {
                        break;
                    }
                }
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(skipped, "renderer fell behind viewer events");
                }
                None => break,
            },
            line = lines.next_line() => {
                match line.context("failed to read stdin")? {
                    Some(line) => match parse_key(&line) {
                        Some(key) => handle_key(&client, &handle, key).await?,
                        None => println!("unknown command '{}'", line.trim()),
                    },
                    None => {
                        handle.close()?;
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

async fn handle_key(client: &StoriesClient, handle: &ViewerHandle, key: ViewerKey) -> Result<()> {
    match key {
        ViewerKey::Next => handle.next()?,
        ViewerKey::Prev => handle.prev()?,
        ViewerKey::TogglePause => handle.toggle_pause()?,
        ViewerKey::ToggleMute => handle.toggle_mute()?,
        ViewerKey::Close => handle.close()?,
        ViewerKey::Dismiss => handle.dismiss_outside()?,
        ViewerKey::Help => print_help(),
        ViewerKey::Link | ViewerKey::Viewers => {
            let Some(item) = handle.snapshot().await?.item else {
                println!("no story is showing");
                return Ok(());
            };
            if key == ViewerKey::Link {
                println!("{}", client.story_link(item.id)?);
            } else {
                match client.story_viewers(item.id).await {
                    Ok(viewers) => println!("{}", render::format_viewers(&viewers)),
                    Err(err) => println!("could not list viewers: {err}"),
                }
            }
        }
    }
    Ok(())
}
