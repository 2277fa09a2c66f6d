use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use url::Url;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

pub mod defaults;
pub mod duration_serde;

use defaults::*;

/// Environment prefix for configuration overrides, e.g.
/// `HDHR_PROXY_TUNER__MAX_TUNERS=4`.
pub const ENV_PREFIX: &str = "HDHR_PROXY_";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub tuner: TunerConfig,
    #[serde(default)]
    pub transcode: TranscodeConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// URL the remuxer uses to reach this server. Derived from host/port
    /// when unset.
    #[serde(default)]
    pub internal_base_url: Option<String>,
}

/// Identity advertised through `/discover.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_friendly_name")]
    pub friendly_name: String,
    #[serde(default = "default_device_id")]
    pub device_id: String,
    #[serde(default = "default_model_number")]
    pub model_number: String,
    #[serde(default = "default_firmware_name")]
    pub firmware_name: String,
    #[serde(default = "default_firmware_version")]
    pub firmware_version: String,
}

/// HLS origin configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_base_url")]
    pub base_url: String,
    /// Landing page path, `{channel}` is replaced with the channel number
    #[serde(default = "default_landing_page")]
    pub landing_page: String,
    /// Regex locating the index playlist URL in the landing page. Uses the
    /// `url` capture group when present, the whole match otherwise.
    /// `{channel}` is replaced with the escaped channel number.
    #[serde(default = "default_index_pattern")]
    pub index_pattern: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
    #[serde(default = "default_session_ttl", with = "duration_serde")]
    pub session_ttl: Duration,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunerConfig {
    /// Maximum number of channels tuned at the same time
    #[serde(default = "default_max_tuners")]
    pub max_tuners: usize,
    /// How long a tuner keeps running without listeners
    #[serde(default = "default_idle_timeout", with = "duration_serde")]
    pub idle_timeout: Duration,
}

/// External remuxer invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeConfig {
    /// Can be a full path (/usr/bin/ffmpeg) or command name (ffmpeg)
    #[serde(default = "default_transcode_command")]
    pub command: String,
    /// Arguments, `{input}` is replaced with the channel's local playlist URL
    /// and `{loglevel}` with `quiet` or `debug`
    #[serde(default = "default_transcode_args")]
    pub args: Vec<String>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Forward remuxer diagnostics into the application log
    #[serde(default)]
    pub debug: bool,
}

/// Channel registry filtering and overrides
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    #[serde(default, deserialize_with = "comma_list")]
    pub allow: Option<Vec<String>>,
    #[serde(default, deserialize_with = "comma_list")]
    pub exclude: Option<Vec<String>>,
    #[serde(default, deserialize_with = "comma_list")]
    pub country_allow: Option<Vec<String>>,
    #[serde(default, deserialize_with = "comma_list")]
    pub country_exclude: Option<Vec<String>>,
    /// Replaces the built-in channel list when non-empty
    #[serde(default)]
    pub entries: Vec<ChannelEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelEntry {
    pub number: String,
    pub name: String,
    #[serde(default)]
    pub country_code: String,
    #[serde(default)]
    pub xmltv_id: String,
    #[serde(default)]
    pub call_sign: String,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_friendly_name() -> String {
    DEFAULT_FRIENDLY_NAME.to_string()
}

fn default_device_id() -> String {
    DEFAULT_DEVICE_ID.to_string()
}

fn default_model_number() -> String {
    DEFAULT_MODEL_NUMBER.to_string()
}

fn default_firmware_name() -> String {
    DEFAULT_FIRMWARE_NAME.to_string()
}

fn default_firmware_version() -> String {
    DEFAULT_FIRMWARE_VERSION.to_string()
}

fn default_upstream_base_url() -> String {
    DEFAULT_UPSTREAM_BASE_URL.to_string()
}

fn default_landing_page() -> String {
    DEFAULT_LANDING_PAGE.to_string()
}

fn default_index_pattern() -> String {
    DEFAULT_INDEX_PATTERN.to_string()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)
}

fn default_session_ttl() -> Duration {
    Duration::from_secs(DEFAULT_SESSION_TTL_SECS)
}

fn default_max_redirects() -> usize {
    DEFAULT_MAX_REDIRECTS
}

fn default_max_tuners() -> usize {
    DEFAULT_MAX_TUNERS
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)
}

fn default_transcode_command() -> String {
    DEFAULT_TRANSCODE_COMMAND.to_string()
}

fn default_transcode_args() -> Vec<String> {
    [
        "-i", "{input}", "-vcodec", "copy", "-acodec", "copy", "-f", "mpegts", "-loglevel",
        "{loglevel}", "pipe:1",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            internal_base_url: None,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            friendly_name: default_friendly_name(),
            device_id: default_device_id(),
            model_number: default_model_number(),
            firmware_name: default_firmware_name(),
            firmware_version: default_firmware_version(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_upstream_base_url(),
            landing_page: default_landing_page(),
            index_pattern: default_index_pattern(),
            user_agent: default_user_agent(),
            request_timeout: default_request_timeout(),
            session_ttl: default_session_ttl(),
            max_redirects: default_max_redirects(),
        }
    }
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            max_tuners: default_max_tuners(),
            idle_timeout: default_idle_timeout(),
        }
    }
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            command: default_transcode_command(),
            args: default_transcode_args(),
            chunk_size: default_chunk_size(),
            debug: false,
        }
    }
}

/// Accepts either a list or a comma separated string, so the same setting
/// works from TOML and from a single environment variable.
fn comma_list<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    struct CommaListVisitor;

    impl<'de> Visitor<'de> for CommaListVisitor {
        type Value = Option<Vec<String>>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a list of strings or a comma separated string")
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D2>(self, deserializer: D2) -> Result<Self::Value, D2::Error>
        where
            D2: Deserializer<'de>,
        {
            deserializer.deserialize_any(CommaListVisitor)
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            let items: Vec<String> = value
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect();
            Ok(if items.is_empty() { None } else { Some(items) })
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
            Ok(Some(vec![value.to_string()]))
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
            Ok(Some(vec![value.to_string()]))
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let mut items = Vec::new();
            while let Some(item) = seq.next_element::<serde_json::Value>()? {
                match item {
                    serde_json::Value::String(s) => items.push(s.trim().to_string()),
                    other => items.push(other.to_string()),
                }
            }
            Ok(Some(items))
        }
    }

    deserializer.deserialize_any(CommaListVisitor)
}

impl WebConfig {
    /// Base URL the remuxer subprocess uses to pull playlists from this server
    pub fn internal_url(&self) -> Result<Url, url::ParseError> {
        match &self.internal_base_url {
            Some(url) => Url::parse(url),
            None => {
                let host = match self.host.as_str() {
                    "0.0.0.0" | "::" | "[::]" => "127.0.0.1",
                    host => host,
                };
                Url::parse(&format!("http://{}:{}/", host, self.port))
            }
        }
    }
}

impl Config {
    /// Load configuration: defaults, then the TOML file (when present), then
    /// `HDHR_PROXY_` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__")).extract()
    }

    /// Load configuration from a TOML string, used by tests and tooling
    pub fn from_toml_str(contents: &str) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::string(contents))
            .extract()
    }
}
