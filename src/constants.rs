//! Application-wide constants
//!
//! Centralizes magic values that are used across multiple modules.

/// Video file extensions recognized by the application.
/// Used for library scanning, import, and file detection.
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "mov", "m4v", "mpg", "mpeg", "webm", "wmv", "flv", "ts", "ogg", "ogv",
    "3gp", "3g2",
];

/// Directory names skipped entirely during a scan walk.
pub const IGNORED_SCAN_DIRS: &[&str] = &["node_modules", ".git", ".svn", "__pycache__"];

/// Default cache TTL values.
pub mod cache {
    /// Episode metadata cache freshness duration (7 days).
    pub const EPISODE_METADATA_TTL_DAYS: i64 = 7;
}
