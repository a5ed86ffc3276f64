use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(StoryId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Image,
    Video,
    Text,
}

impl ContentType {
    /// Accepts bare kinds (`image`) as well as MIME types (`image/jpeg`).
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim().to_ascii_lowercase();
        if raw.starts_with("image") {
            Some(Self::Image)
        } else if raw.starts_with("video") {
            Some(Self::Video)
        } else if raw.starts_with("text") {
            Some(Self::Text)
        } else {
            None
        }
    }

    pub fn is_timed_by_media(self) -> bool {
        matches!(self, Self::Video)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Text => "text",
        };
        f.write_str(name)
    }
}

/// One entry of a user's story bundle.
///
/// For text items `content_url` holds the text body itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryItem {
    pub id: StoryId,
    pub content_type: ContentType,
    pub content_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_hint_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl StoryItem {
    pub fn duration_hint(&self) -> Option<Duration> {
        self.duration_hint_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStoryBundle {
    pub user_id: UserId,
    pub display_name: String,
    pub avatar_url: String,
    pub items: Vec<StoryItem>,
}

impl UserStoryBundle {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn last_index(&self) -> Option<usize> {
        self.items.len().checked_sub(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryViewerEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    pub name: String,
    #[serde(default)]
    pub avatar_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedAction {
    Like,
    Bookmark,
    Share,
}

impl FeedAction {
    pub fn path_segment(self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Bookmark => "bookmark",
            Self::Share => "share",
        }
    }
}

/// Something a feed action can be applied to, e.g. `post/42`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionTarget {
    pub kind: String,
    pub id: i64,
}

impl ActionTarget {
    pub fn new(kind: impl Into<String>, id: i64) -> Self {
        Self {
            kind: kind.into(),
            id,
        }
    }
}
