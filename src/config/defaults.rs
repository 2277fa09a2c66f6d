/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
// Web server defaults
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8000;

// Device identity reported to DVR clients
pub const DEFAULT_FRIENDLY_NAME: &str = "hdhr-proxy";
pub const DEFAULT_DEVICE_ID: &str = "hdhrproxy";
pub const DEFAULT_MODEL_NUMBER: &str = "HDTC-2US";
pub const DEFAULT_FIRMWARE_NAME: &str = "hdhomeruntc_atsc";
pub const DEFAULT_FIRMWARE_VERSION: &str = "20170930";

// Origin defaults
pub const DEFAULT_UPSTREAM_BASE_URL: &str = "https://dlhd.sx/";
pub const DEFAULT_LANDING_PAGE: &str = "/stream/stream-{channel}.php";
pub const DEFAULT_INDEX_PATTERN: &str =
    r#"(?:source|src|file)\s*:\s*["'](?P<url>[^"']+\.m3u8[^"']*)["']"#;
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 8;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 60;
pub const DEFAULT_MAX_REDIRECTS: usize = 2;

// Tuner defaults
pub const DEFAULT_MAX_TUNERS: usize = 2;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 20;

// Transcode defaults
pub const DEFAULT_TRANSCODE_COMMAND: &str = "ffmpeg";
pub const DEFAULT_CHUNK_SIZE: usize = 512;
