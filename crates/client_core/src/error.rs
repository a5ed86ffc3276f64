use shared::{domain::UserId, error::ApiException};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoriesError {
    #[error("invalid server url '{url}': {source}")]
    InvalidServerUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("user {user_id} has no stories")]
    EmptyResult { user_id: UserId },
    #[error("server rejected request: {0}")]
    Api(#[from] ApiException),
    #[error("story feed is unavailable")]
    Unavailable,
}

impl StoriesError {
    pub fn is_empty_result(&self) -> bool {
        matches!(self, Self::EmptyResult { .. })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ViewerError {
    #[error("story viewer task has stopped")]
    Stopped,
    #[error("start index {index} is outside a queue of {len} users")]
    OutOfRange { index: usize, len: usize },
    #[error("user {user_id} is not part of the story queue")]
    UnknownUser { user_id: UserId },
}
