use async_trait::async_trait;
use base64::Engine;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::services::platform::{
    Platform, PlatformError, PlatformProfile, RefreshedCredentials,
};

#[derive(Clone)]
pub struct TwitterClient {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    http: Client,
}

impl TwitterClient {
    pub fn new(client_id: &str, client_secret: &str, redirect_uri: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            redirect_uri: redirect_uri.to_string(),
            http: Client::new(),
        }
    }

    /// Generate PKCE code verifier and challenge
    fn generate_pkce() -> (String, String) {
        // Generate random 32 bytes for code verifier
        let verifier_bytes: [u8; 32] = rand::rng().random();
        let code_verifier = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(verifier_bytes);

        // Create code challenge (SHA256 hash of verifier, base64url encoded)
        let mut hasher = Sha256::new();
        hasher.update(code_verifier.as_bytes());
        let hash = hasher.finalize();
        let code_challenge = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hash);

        (code_verifier, code_challenge)
    }

    /// Generate random state for CSRF protection
    fn generate_state() -> String {
        let bytes: [u8; 16] = rand::rng().random();
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Build Basic auth header for OAuth token requests
    fn basic_auth_header(&self) -> String {
        let credentials = format!("{}:{}", self.client_id, self.client_secret);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(credentials)
        )
    }

    /// Step 1: Build authorization URL and return state + verifier to store
    pub fn get_authorize_url(&self, scopes: &[&str]) -> AuthorizeRequest {
        let state = Self::generate_state();
        let (code_verifier, code_challenge) = Self::generate_pkce();

        let scope = scopes.join("%20");

        let url = format!(
            "https://x.com/i/oauth2/authorize?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}&code_challenge={}&code_challenge_method=S256",
            percent_encode(&self.client_id),
            percent_encode(&self.redirect_uri),
            scope,
            percent_encode(&state),
            percent_encode(&code_challenge)
        );

        AuthorizeRequest {
            url,
            state,
            code_verifier,
        }
    }

    /// Step 2: Exchange authorization code for access token
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse, TwitterError> {
        let url = "https://api.x.com/2/oauth2/token";

        let params = [
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", &self.redirect_uri),
            ("code_verifier", code_verifier),
        ];

        let resp = self
            .http
            .post(url)
            .header("Authorization", self.basic_auth_header())
            .header("Content-Type", "application/x-www-form-urlencoded")
            .form(&params)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(api_error(resp).await?);
        }

        let token: TokenResponse = resp.json().await?;
        Ok(token)
    }

    /// Refresh an access token
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, TwitterError> {
        let url = "https://api.x.com/2/oauth2/token";

        let params = [
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let resp = self
            .http
            .post(url)
            .header("Authorization", self.basic_auth_header())
            .header("Content-Type", "application/x-www-form-urlencoded")
            .form(&params)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(api_error(resp).await?);
        }

        let token: TokenResponse = resp.json().await?;
        Ok(token)
    }

    /// Get the authenticated user's profile
    pub async fn get_me(&self, access_token: &str) -> Result<TwitterUser, TwitterError> {
        let url = "https://api.x.com/2/users/me?user.fields=profile_image_url,verified";

        let resp = self
            .http
            .get(url)
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(api_error(resp).await?);
        }

        let wrapper: UserResponse = resp.json().await?;
        Ok(wrapper.data)
    }

    /// Post a tweet.
    ///
    /// # Arguments
    /// * `access_token` - OAuth 2.0 bearer token for the account
    /// * `text` - The tweet text content
    /// * `media_ids` - Twitter media IDs to attach (uploaded via `upload_media`). Max 4 images OR 1 video.
    pub async fn post_tweet(
        &self,
        access_token: &str,
        text: &str,
        media_ids: Option<&[String]>,
    ) -> Result<TweetResponse, TwitterError> {
        let url = "https://api.x.com/2/tweets";

        let mut body = serde_json::json!({ "text": text });

        if let Some(ids) = media_ids {
            if !ids.is_empty() {
                body["media"] = serde_json::json!({
                    "media_ids": ids
                });
            }
        }

        let resp = self
            .http
            .post(url)
            .header("Authorization", format!("Bearer {}", access_token))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(api_error(resp).await?);
        }

        let wrapper: TweetResponseWrapper = resp.json().await?;
        Ok(wrapper.data)
    }

    /// Upload media using the v2 API
    /// For images: uses simple upload
    /// For videos: uses chunked upload (INIT/APPEND/FINALIZE)
    pub async fn upload_media(
        &self,
        access_token: &str,
        data: &[u8],
        media_type: &str,
    ) -> Result<String, TwitterError> {
        // Videos require chunked upload
        if media_type.starts_with("video/") {
            return self
                .upload_media_chunked(access_token, data, media_type)
                .await;
        }

        // Simple upload for images
        let url = "https://api.x.com/2/media/upload";

        let media_category = if media_type == "image/gif" {
            "tweet_gif"
        } else {
            "tweet_image"
        };

        let part = reqwest::multipart::Part::bytes(data.to_vec())
            .mime_str(media_type)
            .map_err(|e| TwitterError::Api {
                status: 0,
                body: format!("Invalid mime type: {}", e),
            })?;

        let form = reqwest::multipart::Form::new()
            .text("media_category", media_category.to_string())
            .text("media_type", media_type.to_string())
            .part("media", part);

        let resp = self
            .http
            .post(url)
            .header("Authorization", format!("Bearer {}", access_token))
            .multipart(form)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(TwitterError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        let wrapper: MediaUploadResponse =
            serde_json::from_str(&text).map_err(|e| TwitterError::Api {
                status: status.as_u16(),
                body: format!("Failed to parse response: {} - body: {}", e, text),
            })?;
        Ok(wrapper.data.id)
    }

    /// Upload media using chunked upload via dedicated v2 endpoints
    /// Required for videos, works for any media type
    async fn upload_media_chunked(
        &self,
        access_token: &str,
        data: &[u8],
        media_type: &str,
    ) -> Result<String, TwitterError> {
        // Twitter v2 API doesn't accept video/quicktime, map to mp4
        let media_type = if media_type == "video/quicktime" {
            "video/mp4"
        } else {
            media_type
        };

        let media_category = if media_type.starts_with("video/") {
            "tweet_video"
        } else if media_type == "image/gif" {
            "tweet_gif"
        } else {
            "tweet_image"
        };

        // Step 1: INIT via /2/media/upload/initialize (JSON body)
        println!(
            "[upload_media_chunked] INIT: media_type={}, total_bytes={}, media_category={}",
            media_type,
            data.len(),
            media_category
        );

        let init_body = serde_json::json!({
            "media_type": media_type,
            "total_bytes": data.len(),
            "media_category": media_category
        });

        let resp = self
            .http
            .post("https://api.x.com/2/media/upload/initialize")
            .header("Authorization", format!("Bearer {}", access_token))
            .header("Content-Type", "application/json")
            .json(&init_body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(TwitterError::Api {
                status: status.as_u16(),
                body: format!("INIT failed: {}", text),
            });
        }

        let init_response: MediaUploadResponse =
            serde_json::from_str(&text).map_err(|e| TwitterError::Api {
                status: status.as_u16(),
                body: format!("Failed to parse INIT response: {} - body: {}", e, text),
            })?;
        let media_id = init_response.data.id;

        println!("[upload_media_chunked] Got media_id: {}", media_id);

        // Step 2: APPEND via /2/media/upload/{media_id}/append (multipart)
        const CHUNK_SIZE: usize = 1024 * 1024; // 1MB
        let chunks: Vec<_> = data.chunks(CHUNK_SIZE).collect();
        let total_segments = chunks.len();

        for (segment_index, chunk) in chunks.into_iter().enumerate() {
            println!(
                "[upload_media_chunked] APPEND segment {}/{} ({} bytes)",
                segment_index + 1,
                total_segments,
                chunk.len()
            );

            let part = reqwest::multipart::Part::bytes(chunk.to_vec())
                .mime_str(media_type)
                .map_err(|e| TwitterError::Api {
                    status: 0,
                    body: format!("Invalid mime type: {}", e),
                })?;

            let append_form = reqwest::multipart::Form::new()
                .text("segment_index", segment_index.to_string())
                .part("media", part);

            let resp = self
                .http
                .post(format!(
                    "https://api.x.com/2/media/upload/{}/append",
                    media_id
                ))
                .header("Authorization", format!("Bearer {}", access_token))
                .multipart(append_form)
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await?;
                return Err(TwitterError::Api {
                    status: status.as_u16(),
                    body: format!("APPEND failed at segment {}: {}", segment_index, text),
                });
            }
        }

        // Step 3: FINALIZE via /2/media/upload/{media_id}/finalize
        println!("[upload_media_chunked] FINALIZE");

        let resp = self
            .http
            .post(format!(
                "https://api.x.com/2/media/upload/{}/finalize",
                media_id
            ))
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(TwitterError::Api {
                status: status.as_u16(),
                body: format!("FINALIZE failed: {}", text),
            });
        }

        let finalize_response: MediaUploadResponse =
            serde_json::from_str(&text).map_err(|e| TwitterError::Api {
                status: status.as_u16(),
                body: format!("Failed to parse FINALIZE response: {} - body: {}", e, text),
            })?;

        // Step 4: Poll STATUS if processing is needed
        if let Some(ref processing_info) = finalize_response.data.processing_info {
            if processing_info.state != "succeeded" {
                self.wait_for_processing(access_token, &media_id).await?;
            }
        }

        println!("[upload_media_chunked] Complete, media_id: {}", media_id);
        Ok(media_id)
    }

    /// Poll the STATUS endpoint until processing completes
    async fn wait_for_processing(
        &self,
        access_token: &str,
        media_id: &str,
    ) -> Result<(), TwitterError> {
        let url = format!(
            "https://api.x.com/2/media/upload?command=STATUS&media_id={}",
            media_id
        );

        loop {
            let resp = self
                .http
                .get(&url)
                .header("Authorization", format!("Bearer {}", access_token))
                .send()
                .await?;

            let status = resp.status();
            let text = resp.text().await?;

            if !status.is_success() {
                return Err(TwitterError::Api {
                    status: status.as_u16(),
                    body: format!("STATUS check failed: {}", text),
                });
            }

            let status_response: MediaUploadResponse =
                serde_json::from_str(&text).map_err(|e| TwitterError::Api {
                    status: status.as_u16(),
                    body: format!("Failed to parse STATUS response: {} - body: {}", e, text),
                })?;

            if let Some(processing_info) = status_response.data.processing_info {
                match processing_info.state.as_str() {
                    "succeeded" => return Ok(()),
                    "failed" => {
                        return Err(TwitterError::Api {
                            status: status.as_u16(),
                            body: "Media processing failed".to_string(),
                        });
                    }
                    _ => {
                        // Wait before polling again
                        let wait_secs = processing_info.check_after_secs.unwrap_or(5);
                        tokio::time::sleep(tokio::time::Duration::from_secs(wait_secs as u64))
                            .await;
                    }
                }
            } else {
                // No processing_info means it's done
                return Ok(());
            }
        }
    }
}

/// Read the non-2xx response body into an Api error.
async fn api_error(resp: reqwest::Response) -> Result<TwitterError, TwitterError> {
    let status = resp.status().as_u16();
    let body = resp.text().await?;
    Ok(TwitterError::Api { status, body })
}

#[derive(Debug, Deserialize)]
struct MediaUploadResponse {
    data: MediaUploadData,
}

#[derive(Debug, Deserialize)]
struct MediaUploadData {
    id: String,
    #[allow(dead_code)]
    media_key: Option<String>,
    #[allow(dead_code)]
    expires_after_secs: Option<i64>,
    processing_info: Option<MediaProcessingInfo>,
}

#[derive(Debug, Deserialize)]
struct MediaProcessingInfo {
    state: String,
    #[allow(dead_code)]
    progress_percent: Option<i32>,
    check_after_secs: Option<i32>,
}

fn percent_encode(s: &str) -> String {
    percent_encoding::utf8_percent_encode(s, percent_encoding::NON_ALPHANUMERIC).to_string()
}

#[derive(Debug)]
pub struct AuthorizeRequest {
    pub url: String,
    pub state: String,
    pub code_verifier: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_token: Option<String>,
    pub scope: String,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    data: TwitterUser,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TwitterUser {
    pub id: String,
    pub name: String,
    pub username: String,
    pub profile_image_url: Option<String>,
    pub verified: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct TweetResponseWrapper {
    data: TweetResponse,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TweetResponse {
    pub id: String,
    pub text: String,
}

#[derive(Debug)]
pub enum TwitterError {
    Http(reqwest::Error),
    Api { status: u16, body: String },
}

impl From<reqwest::Error> for TwitterError {
    fn from(e: reqwest::Error) -> Self {
        TwitterError::Http(e)
    }
}

impl std::fmt::Display for TwitterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TwitterError::Http(e) => write!(f, "HTTP error: {}", e),
            TwitterError::Api { status, body } => {
                write!(f, "Twitter API error ({}): {}", status, body)
            }
        }
    }
}

impl std::error::Error for TwitterError {}

impl From<TwitterError> for PlatformError {
    fn from(e: TwitterError) -> Self {
        match e {
            TwitterError::Http(e) => PlatformError::Http(e),
            TwitterError::Api { status: 429, body } => PlatformError::RateLimited(body),
            TwitterError::Api {
                status: 401 | 403,
                body,
            } => PlatformError::AuthExpired(body),
            TwitterError::Api { status, body } => PlatformError::Api { status, body },
        }
    }
}

#[async_trait]
impl Platform for TwitterClient {
    async fn publish(
        &self,
        access_token: &str,
        text: &str,
        media_ids: &[String],
    ) -> Result<String, PlatformError> {
        let ids = if media_ids.is_empty() {
            None
        } else {
            Some(media_ids)
        };
        let tweet = self.post_tweet(access_token, text, ids).await?;
        Ok(tweet.id)
    }

    async fn upload_media(
        &self,
        access_token: &str,
        data: &[u8],
        mime: &str,
    ) -> Result<String, PlatformError> {
        // Inherent upload_media does the simple/chunked dispatch
        TwitterClient::upload_media(self, access_token, data, mime)
            .await
            .map_err(|e| match e {
                TwitterError::Api { status: 400, body } => PlatformError::InvalidMedia(body),
                other => other.into(),
            })
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<PlatformProfile, PlatformError> {
        let user = self.get_me(access_token).await?;
        Ok(PlatformProfile {
            external_id: user.id,
            username: user.username,
            display_name: Some(user.name),
            profile_image_url: user.profile_image_url,
            verified: user.verified.unwrap_or(false),
        })
    }

    async fn refresh_credentials(
        &self,
        refresh_token: &str,
    ) -> Result<RefreshedCredentials, PlatformError> {
        let token = self.refresh_token(refresh_token).await?;
        Ok(RefreshedCredentials {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_in: token.expires_in,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16, body: &str) -> TwitterError {
        TwitterError::Api {
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_rate_limit_maps_to_rate_limited() {
        match PlatformError::from(api(429, "too many requests")) {
            PlatformError::RateLimited(body) => assert_eq!(body, "too many requests"),
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[test]
    fn test_unauthorized_maps_to_auth_expired() {
        assert!(matches!(
            PlatformError::from(api(401, "token expired")),
            PlatformError::AuthExpired(_)
        ));
        assert!(matches!(
            PlatformError::from(api(403, "forbidden")),
            PlatformError::AuthExpired(_)
        ));
    }

    #[test]
    fn test_other_statuses_stay_api_errors() {
        match PlatformError::from(api(422, "duplicate content")) {
            PlatformError::Api { status, body } => {
                assert_eq!(status, 422);
                assert_eq!(body, "duplicate content");
            }
            other => panic!("expected Api, got {:?}", other),
        }
    }
}
