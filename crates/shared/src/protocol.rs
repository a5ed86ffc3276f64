//! Wire shapes of the feed service and their normalization into domain types.
//!
//! The stories endpoint has shipped several response layouts over time: an
//! envelope with `user_info` or `user`, item fields named `content` or
//! `media_url`, and occasionally a bare item array. Everything is accepted
//! here and folded into one [`UserStoryBundle`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{ContentType, StoryId, StoryItem, StoryViewerEntry, UserId, UserStoryBundle},
    error::{ApiException, ErrorCode},
};

pub const STATUS_SUCCESS: &str = "success";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireStoryItem {
    pub id: i64,
    #[serde(alias = "media_type")]
    pub content_type: String,
    #[serde(default, alias = "content_url", alias = "media_url")]
    pub content: String,
    #[serde(default, alias = "background_color")]
    pub background: Option<String>,
    #[serde(default, alias = "duration_ms")]
    pub duration: Option<u64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireUserInfo {
    #[serde(default, alias = "user_id")]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "avatar_url")]
    pub profile_pic: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoriesEnvelope {
    pub stories: Vec<WireStoryItem>,
    #[serde(default, alias = "user")]
    pub user_info: Option<WireUserInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoriesResponse {
    Envelope(StoriesEnvelope),
    Bare(Vec<WireStoryItem>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedBundle {
    pub bundle: UserStoryBundle,
    /// Items dropped because their content type is not playable.
    pub skipped: usize,
}

impl StoriesResponse {
    pub fn into_bundle(self, requested: UserId) -> NormalizedBundle {
        let (stories, user) = match self {
            Self::Envelope(envelope) => (envelope.stories, envelope.user_info.unwrap_or_default()),
            Self::Bare(stories) => (stories, WireUserInfo::default()),
        };

        let total = stories.len();
        let items: Vec<StoryItem> = stories.into_iter().filter_map(normalize_item).collect();
        let skipped = total - items.len();

        NormalizedBundle {
            bundle: UserStoryBundle {
                user_id: user.id.map(UserId).unwrap_or(requested),
                display_name: user.name,
                avatar_url: user.profile_pic.unwrap_or_default(),
                items,
            },
            skipped,
        }
    }
}

fn normalize_item(item: WireStoryItem) -> Option<StoryItem> {
    let content_type = ContentType::parse(&item.content_type)?;
    Some(StoryItem {
        id: StoryId(item.id),
        content_type,
        content_url: item.content,
        duration_hint_ms: item.duration,
        background_color: item.background.filter(|color| !color.trim().is_empty()),
        created_at: item.created_at,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewersResponse {
    pub status: String,
    #[serde(default)]
    pub viewers: Vec<StoryViewerEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ViewersResponse {
    pub fn into_viewers(self) -> Result<Vec<StoryViewerEntry>, ApiException> {
        if self.status == STATUS_SUCCESS {
            Ok(self.viewers)
        } else {
            Err(rejected(self.message))
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ActionRequest {
    pub fn is_empty(&self) -> bool {
        self.content.is_none()
    }
}

/// Response of like/bookmark/share style endpoints. Endpoint specific
/// fields such as `likes_count` or `bookmarked` land in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ActionResponse {
    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }

    pub fn into_result(self) -> Result<Self, ApiException> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(rejected(self.message))
        }
    }

    pub fn flag(&self, key: &str) -> Option<bool> {
        self.extra.get(key).and_then(serde_json::Value::as_bool)
    }

    pub fn count(&self, key: &str) -> Option<i64> {
        self.extra.get(key).and_then(serde_json::Value::as_i64)
    }
}

fn rejected(message: Option<String>) -> ApiException {
    ApiException::new(
        ErrorCode::Rejected,
        message.unwrap_or_else(|| "An error occurred.".to_string()),
    )
}
