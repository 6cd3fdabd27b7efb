//! Posting-platform seam
//!
//! Everything the pipelines need from the remote platform goes through this
//! trait so the publish and scheduling flows can be exercised against a fake.

use async_trait::async_trait;

use crate::domain::accounts::ProfileFields;

/// Profile data as reported by the platform for the authenticated account.
#[derive(Debug, Clone)]
pub struct PlatformProfile {
    pub external_id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub profile_image_url: Option<String>,
    pub verified: bool,
}

impl From<PlatformProfile> for ProfileFields {
    fn from(p: PlatformProfile) -> Self {
        ProfileFields {
            username: p.username,
            display_name: p.display_name,
            profile_image_url: p.profile_image_url,
            verified: p.verified,
        }
    }
}

/// Fresh credentials returned by a refresh-token exchange.
#[derive(Debug, Clone)]
pub struct RefreshedCredentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Lifetime of the new access token in seconds
    pub expires_in: i64,
}

#[derive(Debug)]
pub enum PlatformError {
    Http(reqwest::Error),
    /// Platform said slow down. Message is the response body.
    RateLimited(String),
    /// Credentials rejected. The account needs to re-authorize.
    AuthExpired(String),
    /// Platform rejected an upload or an attached media id
    InvalidMedia(String),
    /// Any other non-success platform response
    Api { status: u16, body: String },
}

impl std::fmt::Display for PlatformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlatformError::Http(e) => write!(f, "HTTP error: {}", e),
            PlatformError::RateLimited(msg) => write!(f, "rate limited by platform: {}", msg),
            PlatformError::AuthExpired(msg) => write!(f, "platform credentials expired: {}", msg),
            PlatformError::InvalidMedia(msg) => write!(f, "platform rejected media: {}", msg),
            PlatformError::Api { status, body } => {
                write!(f, "platform API error ({}): {}", status, body)
            }
        }
    }
}

impl std::error::Error for PlatformError {}

impl From<reqwest::Error> for PlatformError {
    fn from(e: reqwest::Error) -> Self {
        PlatformError::Http(e)
    }
}

#[async_trait]
pub trait Platform: Send + Sync {
    /// Publish a post, returning the platform-assigned post id.
    async fn publish(
        &self,
        access_token: &str,
        text: &str,
        media_ids: &[String],
    ) -> Result<String, PlatformError>;

    /// Upload raw media bytes, returning the platform media id to attach.
    async fn upload_media(
        &self,
        access_token: &str,
        data: &[u8],
        mime: &str,
    ) -> Result<String, PlatformError>;

    /// Fetch the authenticated account's current profile.
    async fn fetch_profile(&self, access_token: &str) -> Result<PlatformProfile, PlatformError>;

    /// Trade a refresh token for new credentials.
    async fn refresh_credentials(
        &self,
        refresh_token: &str,
    ) -> Result<RefreshedCredentials, PlatformError>;
}
