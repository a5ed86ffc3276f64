use async_trait::async_trait;
use reqwest::Client;
use shared::{
    domain::{ActionTarget, FeedAction, StoryId, StoryViewerEntry, UserId, UserStoryBundle},
    error::{ApiException, ErrorCode},
    protocol::{ActionRequest, ActionResponse, StoriesResponse, ViewersResponse},
};
use tracing::{debug, info, warn};
use url::Url;

pub mod error;
pub mod media;
pub mod playback;
pub mod progress;
pub mod viewer;

pub use error::{StoriesError, ViewerError};
pub use media::{MediaSignals, MediaSurface, SimulatedMediaSurface, UnsupportedMediaSurface};
pub use playback::{
    CloseReason, Frame, LoadFailure, Phase, PlaybackCursor, PlaybackSettings, StoryPlayback,
    DEFAULT_ITEM_DURATION,
};
pub use progress::SegmentFill;
pub use viewer::{StoryViewer, ViewerEvent, ViewerHandle, ViewerSnapshot};

/// Source of story bundles and sink for view receipts.
#[async_trait]
pub trait StoryFeed: Send + Sync {
    async fn fetch_bundle(&self, user_id: UserId) -> Result<UserStoryBundle, StoriesError>;
    async fn report_view(&self, story_id: StoryId) -> Result<(), StoriesError>;
}

pub struct MissingStoryFeed;

#[async_trait]
impl StoryFeed for MissingStoryFeed {
    async fn fetch_bundle(&self, _user_id: UserId) -> Result<UserStoryBundle, StoriesError> {
        Err(StoriesError::Unavailable)
    }

    async fn report_view(&self, _story_id: StoryId) -> Result<(), StoriesError> {
        Err(StoriesError::Unavailable)
    }
}

pub struct StoriesClient {
    http: Client,
    base_url: Url,
}

impl StoriesClient {
    pub fn new(server_url: &str) -> Result<Self, StoriesError> {
        Self::with_http_client(Client::new(), server_url)
    }

    pub fn with_http_client(http: Client, server_url: &str) -> Result<Self, StoriesError> {
        let trimmed = server_url.trim().trim_end_matches('/');
        let base_url =
            Url::parse(&format!("{trimmed}/")).map_err(|source| StoriesError::InvalidServerUrl {
                url: server_url.to_string(),
                source,
            })?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, StoriesError> {
        self.base_url
            .join(path)
            .map_err(|source| StoriesError::InvalidServerUrl {
                url: format!("{}{path}", self.base_url),
                source,
            })
    }

    /// Fetches one user's bundle. An empty bundle is reported as
    /// [`StoriesError::EmptyResult`] so callers treat it like a failed load.
    pub async fn fetch_bundle(&self, user_id: UserId) -> Result<UserStoryBundle, StoriesError> {
        let url = self.endpoint(&format!("feed/api/stories/{user_id}"))?;
        let res = self.http.get(url).send().await?.error_for_status()?;
        let body: StoriesResponse = res.json().await?;
        let normalized = body.into_bundle(user_id);
        if normalized.skipped > 0 {
            warn!(
                user_id = user_id.0,
                skipped = normalized.skipped,
                "stories: dropped items with unplayable content type"
            );
        }
        if normalized.bundle.is_empty() {
            return Err(StoriesError::EmptyResult { user_id });
        }
        debug!(
            user_id = user_id.0,
            items = normalized.bundle.items.len(),
            "stories: bundle fetched"
        );
        Ok(normalized.bundle)
    }

    pub async fn report_view(&self, story_id: StoryId) -> Result<(), StoriesError> {
        let url = self.endpoint(&format!("feed/api/story/{story_id}/view"))?;
        self.http.post(url).send().await?.error_for_status()?;
        Ok(())
    }

    /// Identities that have seen one of the current user's stories.
    pub async fn story_viewers(
        &self,
        story_id: StoryId,
    ) -> Result<Vec<StoryViewerEntry>, StoriesError> {
        let url = self.endpoint(&format!("api/stories/{story_id}/viewers"))?;
        let res = self.http.get(url).send().await?.error_for_status()?;
        let body: ViewersResponse = res.json().await?;
        Ok(body.into_viewers()?)
    }

    /// Runs a like/bookmark/share action. A response whose status is not
    /// `success` becomes [`StoriesError::Api`] carrying the server message.
    pub async fn perform_action(
        &self,
        action: FeedAction,
        target: &ActionTarget,
        comment: Option<String>,
    ) -> Result<ActionResponse, StoriesError> {
        let url = self.endpoint(&format!(
            "feed/api/{}/{}/{}",
            target.kind,
            target.id,
            action.path_segment()
        ))?;
        let body = ActionRequest { content: comment };
        let mut req = self.http.post(url);
        if !body.is_empty() {
            req = req.json(&body);
        }
        let res = req.send().await?;
        let status = res.status();
        let response: ActionResponse = res.json().await.map_err(|err| {
            if err.is_decode() {
                StoriesError::from(ApiException::new(
                    ErrorCode::Malformed,
                    format!("unreadable {} response: {err}", action.path_segment()),
                ))
            } else {
                StoriesError::Http(err)
            }
        })?;
        if !status.is_success() && response.is_success() {
            // Trust the transport status over a contradictory body.
            return Err(ApiException::new(
                ErrorCode::from_http_status(status.as_u16()),
                format!("http {status}"),
            )
            .into());
        }
        let response = response.into_result()?;
        info!(
            action = action.path_segment(),
            target_kind = %target.kind,
            target_id = target.id,
            "feed: action applied"
        );
        Ok(response)
    }

    /// Shareable link for one story, as offered by "Copy Link".
    pub fn story_link(&self, story_id: StoryId) -> Result<Url, StoriesError> {
        self.endpoint(&format!("feed/story/{story_id}"))
    }
}

#[async_trait]
impl StoryFeed for StoriesClient {
    async fn fetch_bundle(&self, user_id: UserId) -> Result<UserStoryBundle, StoriesError> {
        StoriesClient::fetch_bundle(self, user_id).await
    }

    async fn report_view(&self, story_id: StoryId) -> Result<(), StoriesError> {
        StoriesClient::report_view(self, story_id).await
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
