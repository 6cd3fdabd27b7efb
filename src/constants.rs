//! Application constants

/// Platform character limit for a single post
pub const MAX_POST_CHARS: usize = 280;

/// Maximum number of image attachments per post
pub const MAX_IMAGES_PER_POST: usize = 4;

/// Hard size ceiling for image uploads (5 MB)
pub const IMAGE_MAX_BYTES: usize = 5 * 1024 * 1024;

/// Hard size ceiling for gif uploads (15 MB)
pub const GIF_MAX_BYTES: usize = 15 * 1024 * 1024;

/// Default size ceiling for video uploads (512 MB).
/// Tunable via VIDEO_MAX_UPLOAD_MB since platform limits change.
pub const DEFAULT_VIDEO_MAX_MB: usize = 512;

/// Maximum request body size for media uploads (600 MB)
pub const MAX_MEDIA_UPLOAD_SIZE: usize = 600 * 1024 * 1024;

/// Minimum lead time for a scheduled post (seconds in the future)
pub const MIN_SCHEDULE_LEAD_SECS: i64 = 60;

/// Maximum scheduling horizon (2 years)
pub const MAX_SCHEDULE_HORIZON_DAYS: i64 = 730;

/// Default page size for paginated list endpoints
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Maximum page size for paginated list endpoints
pub const MAX_PAGE_SIZE: i64 = 100;

/// Default TTL for cached account lists (5 minutes)
pub const DEFAULT_ACCOUNT_CACHE_TTL_SECS: u64 = 300;
