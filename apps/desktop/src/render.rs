//! Plain-text rendering of viewer frames and events.

use chrono::{DateTime, Utc};
use client_core::{CloseReason, Frame, LoadFailure, SegmentFill, ViewerEvent};
use shared::domain::{ContentType, StoryViewerEntry};

const SEGMENT_WIDTH: usize = 8;

pub fn progress_bar(segments: &[SegmentFill]) -> String {
    segments
        .iter()
        .map(|segment| {
            let filled = (segment.width() * SEGMENT_WIDTH as f64).round() as usize;
            let filled = filled.min(SEGMENT_WIDTH);
            format!("{}{}", "#".repeat(filled), "-".repeat(SEGMENT_WIDTH - filled))
        })
        .collect::<Vec<_>>()
        .join("|")
}

pub fn age(created_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (now - created_at).num_minutes().max(0);
    if minutes < 1 {
        "just now".to_string()
    } else if minutes < 60 {
        format!("{minutes}m ago")
    } else {
        format!("{}h ago", minutes / 60)
    }
}

pub fn format_frame(frame: &Frame, now: DateTime<Utc>) -> String {
    let state = if frame.paused { "||" } else { ">" };
    let content = match frame.item.content_type {
        ContentType::Image => format!("image {}", frame.item.content_url),
        ContentType::Video => {
            let sound = if frame.muted { "muted" } else { "sound on" };
            format!("video {} ({sound})", frame.item.content_url)
        }
        ContentType::Text => {
            let background = frame.item.background_color.as_deref().unwrap_or("#000");
            format!("text \"{}\" on {background}", frame.item.content_url)
        }
    };
    let posted = frame
        .item
        .created_at
        .map(|created_at| format!(" · {}", age(created_at, now)))
        .unwrap_or_default();
    format!(
        "[{}] {} {state} {content} ({}/{}){posted}",
        frame.display_name,
        progress_bar(&frame.segments),
        frame.cursor.item_index + 1,
        frame.segments.len(),
    )
}

pub fn format_event(event: &ViewerEvent, now: DateTime<Utc>) -> String {
    match event {
        ViewerEvent::Opened => "story viewer opened".to_string(),
        ViewerEvent::Frame(frame) => format_frame(frame, now),
        ViewerEvent::Closed { reason } => {
            let why = match reason {
                CloseReason::Requested => "closed",
                CloseReason::DismissedOutside => "dismissed",
                CloseReason::EndOfQueue => "no more stories",
                CloseReason::StartOfQueue => "already at the first story",
                CloseReason::LoadFailed => "stories could not be loaded",
            };
            format!("story viewer closed: {why}")
        }
        ViewerEvent::LoadFailed { user_id, failure } => match failure {
            LoadFailure::EmptyResult => format!("user {user_id} has no stories"),
            LoadFailure::Network(message) => {
                format!("could not load stories for user {user_id}: {message}")
            }
        },
    }
}

pub fn format_viewers(viewers: &[StoryViewerEntry]) -> String {
    if viewers.is_empty() {
        return "No viewers yet.".to_string();
    }
    viewers
        .iter()
        .map(|viewer| format!("  {}", viewer.name))
        .collect::<Vec<_>>()
        .join("\n")
}
