use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pattern::{MatchMode, PatternTable};
use crate::platform::PlatformId;
use crate::wait::RetryBudget;

pub mod render;

const CONFIG_FILENAME: &str = "config.toml";
pub const CONFIG_DIR: &str = ".botprobe";

fn default_state_dir() -> PathBuf {
    PathBuf::from(CONFIG_DIR)
}

fn default_webdriver_url() -> String {
    "http://localhost:9515".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_millis() -> u64 {
    1000
}

fn default_completion_threshold() -> u32 {
    2
}

fn default_follow_up() -> String {
    "hi".to_string()
}

fn default_send_retry_attempts() -> u32 {
    10
}

fn default_send_retry_interval_millis() -> u64 {
    10_000
}

fn default_keystroke_pause_millis() -> u64 {
    500
}

fn default_post_send_pause_millis() -> u64 {
    1000
}

fn default_selector_attempts() -> u32 {
    10
}

fn default_selector_interval_millis() -> u64 {
    1000
}

fn default_bind() -> String {
    "127.0.0.1:5000".to_string()
}

fn default_run_timeout_secs() -> u64 {
    600
}

fn default_response_types() -> Vec<String> {
    vec!["A".to_string(), "B".to_string()]
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    /// Holds `sessions/` and `logs/`. Relative paths resolve against the
    /// directory containing `.botprobe/`.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct WebDriverConfig {
    #[serde(default = "default_webdriver_url")]
    pub url: String,
    #[serde(default)]
    pub headless: bool,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            url: default_webdriver_url(),
            headless: false,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Probe engine timing and termination.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval_millis")]
    pub poll_interval_millis: u64,
    /// Classified replies after which a run terminates.
    #[serde(default = "default_completion_threshold")]
    pub completion_threshold: u32,
    /// Sent after every matched reply.
    #[serde(default = "default_follow_up")]
    pub follow_up: String,
    #[serde(default = "default_send_retry_attempts")]
    pub send_retry_attempts: u32,
    #[serde(default = "default_send_retry_interval_millis")]
    pub send_retry_interval_millis: u64,
    #[serde(default = "default_keystroke_pause_millis")]
    pub keystroke_pause_millis: u64,
    #[serde(default = "default_post_send_pause_millis")]
    pub post_send_pause_millis: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_millis: default_poll_interval_millis(),
            completion_threshold: default_completion_threshold(),
            follow_up: default_follow_up(),
            send_retry_attempts: default_send_retry_attempts(),
            send_retry_interval_millis: default_send_retry_interval_millis(),
            keystroke_pause_millis: default_keystroke_pause_millis(),
            post_send_pause_millis: default_post_send_pause_millis(),
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis)
    }

    /// Budget for the blocking-widget wait before each send.
    pub fn send_budget(&self) -> RetryBudget {
        RetryBudget::new(
            self.send_retry_attempts,
            Duration::from_millis(self.send_retry_interval_millis),
        )
    }

    pub fn keystroke_pause(&self) -> Duration {
        Duration::from_millis(self.keystroke_pause_millis)
    }

    pub fn post_send_pause(&self) -> Duration {
        Duration::from_millis(self.post_send_pause_millis)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default = "default_selector_attempts")]
    pub selector_attempts: u32,
    #[serde(default = "default_selector_interval_millis")]
    pub selector_interval_millis: u64,
    /// Unset: wait for the operator forever.
    #[serde(default)]
    pub answer_timeout_secs: Option<u64>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            selector_attempts: default_selector_attempts(),
            selector_interval_millis: default_selector_interval_millis(),
            answer_timeout_secs: None,
        }
    }
}

impl AuthConfig {
    pub fn budget(&self) -> RetryBudget {
        RetryBudget::new(
            self.selector_attempts,
            Duration::from_millis(self.selector_interval_millis),
        )
    }

    pub fn answer_timeout(&self) -> Option<Duration> {
        self.answer_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
    /// Response types accepted by `/trigger`.
    #[serde(default = "default_response_types")]
    pub response_types: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            run_timeout_secs: default_run_timeout_secs(),
            response_types: default_response_types(),
        }
    }
}

impl ServerConfig {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

/// Selector overrides for one platform. Empty `blocking` disables the wait.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct SelectorSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocking: Option<String>,
}

/// `[platforms.<id>]`: overrides layered on a built-in adapter.
///
/// ```toml
/// [platforms.fb]
/// pin = "000000"
/// conversation_url = "https://www.messenger.com/t/<thread>"
/// [platforms.fb.patterns.B]
/// hi = ["Develope club\nHi!"]
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PlatformSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default, skip_serializing)]
    pub pin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_input: Option<String>,
    /// Empty string disables echo detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub echo_marker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_mode: Option<MatchMode>,
    #[serde(default)]
    pub selectors: SelectorSettings,
    #[serde(default)]
    pub patterns: PatternTable,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub webdriver: WebDriverConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub server: ServerConfig,
    /// Keyed by platform id (`fb`, `ig`, `line`).
    #[serde(default)]
    pub platforms: BTreeMap<String, PlatformSettings>,
}

impl ProjectConfig {
    /// Search upward from `start` for a `.botprobe/config.toml` file and load it.
    /// Returns the default config if no file is found.
    pub fn load(start: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = Self::find_config_file(start) {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: ProjectConfig = toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            config
                .check_platform_keys()
                .with_context(|| format!("invalid {}", path.display()))?;
            Ok((config, Some(path)))
        } else {
            Ok((ProjectConfig::default(), None))
        }
    }

    fn find_config_file(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILENAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }

    fn check_platform_keys(&self) -> Result<()> {
        for key in self.platforms.keys() {
            key.parse::<PlatformId>()
                .with_context(|| format!("unknown platform section [platforms.{key}]"))?;
        }
        Ok(())
    }

    /// Settings for `platform`, accepting any alias as the section key.
    pub fn platform(&self, platform: PlatformId) -> Option<&PlatformSettings> {
        self.platforms
            .iter()
            .find(|(key, _)| key.parse::<PlatformId>().ok() == Some(platform))
            .map(|(_, settings)| settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn default_config_values() {
        let config = ProjectConfig::default();
        assert_eq!(config.paths.state_dir, PathBuf::from(".botprobe"));
        assert_eq!(config.webdriver.url, "http://localhost:9515");
        assert!(!config.webdriver.headless);
        assert_eq!(config.webdriver.request_timeout_secs, 30);
        assert_eq!(config.monitor.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.monitor.completion_threshold, 2);
        assert_eq!(config.monitor.follow_up, "hi");
        assert_eq!(config.monitor.send_budget().attempts, 10);
        assert_eq!(
            config.monitor.send_budget().interval,
            Duration::from_secs(10)
        );
        assert_eq!(config.monitor.keystroke_pause(), Duration::from_millis(500));
        assert_eq!(config.monitor.post_send_pause(), Duration::from_secs(1));
        assert_eq!(config.auth.budget().attempts, 10);
        assert!(config.auth.answer_timeout().is_none());
        assert_eq!(config.server.bind, "127.0.0.1:5000");
        assert_eq!(config.server.run_timeout(), Duration::from_secs(600));
        assert_eq!(config.server.response_types, vec!["A", "B"]);
        assert!(config.platforms.is_empty());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[paths]
state_dir = "/var/lib/botprobe"

[webdriver]
url = "http://127.0.0.1:4444"
headless = true
request_timeout_secs = 10

[monitor]
poll_interval_millis = 250
completion_threshold = 3
follow_up = "hello"
send_retry_attempts = 3
send_retry_interval_millis = 100
keystroke_pause_millis = 0
post_send_pause_millis = 0

[auth]
selector_attempts = 5
selector_interval_millis = 200
answer_timeout_secs = 300

[server]
bind = "0.0.0.0:8080"
run_timeout_secs = 120
response_types = ["A", "B", "C"]

[platforms.fb]
pin = "771200"
conversation_url = "https://www.messenger.com/t/42"
[platforms.fb.selectors]
composer = "textarea"
[platforms.fb.patterns.C]
"介紹" = ["Develope club\n不是"]

[platforms.instagram]
username = "tester"
password = "secret"
match_mode = "contains"
"#;
        let config: ProjectConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.paths.state_dir, PathBuf::from("/var/lib/botprobe"));
        assert_eq!(config.webdriver.url, "http://127.0.0.1:4444");
        assert!(config.webdriver.headless);
        assert_eq!(config.monitor.completion_threshold, 3);
        assert_eq!(config.monitor.follow_up, "hello");
        assert_eq!(config.monitor.send_budget().attempts, 3);
        assert_eq!(
            config.auth.answer_timeout(),
            Some(Duration::from_secs(300))
        );
        assert_eq!(config.server.response_types.len(), 3);

        let fb = config.platform(PlatformId::Fb).unwrap();
        assert_eq!(fb.pin.as_deref(), Some("771200"));
        assert_eq!(fb.selectors.composer.as_deref(), Some("textarea"));
        assert!(fb.patterns.accepted("C", "介紹").is_some());

        let ig = config.platform(PlatformId::Ig).unwrap();
        assert_eq!(ig.username.as_deref(), Some("tester"));
        assert_eq!(ig.match_mode, Some(MatchMode::Contains));

        assert!(config.platform(PlatformId::Line).is_none());
        config.check_platform_keys().unwrap();
    }

    #[test]
    fn parse_partial_config() {
        let toml = r#"
[monitor]
poll_interval_millis = 500
"#;
        let config: ProjectConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.monitor.poll_interval_millis, 500);
        assert_eq!(config.monitor.completion_threshold, 2);
        assert_eq!(config.server.run_timeout_secs, 600);
    }

    #[test]
    fn secrets_are_not_serialized() {
        let toml = r#"
[platforms.ig]
username = "tester"
password = "secret"
pin = "1234"
"#;
        let config: ProjectConfig = toml::from_str(toml).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("tester"));
        assert!(!json.contains("secret"));
        assert!(!json.contains("1234"));
    }

    #[test]
    fn load_from_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join(".botprobe");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("config.toml"),
            r#"
[server]
bind = "127.0.0.1:6000"
"#,
        )
        .unwrap();

        let (config, path) = ProjectConfig::load(tmp.path()).unwrap();
        assert!(path.is_some());
        assert_eq!(config.server.bind, "127.0.0.1:6000");
    }

    #[test]
    fn load_returns_default_when_no_file() {
        let tmp = tempfile::tempdir().unwrap();
        let (config, path) = ProjectConfig::load(tmp.path()).unwrap();
        assert!(path.is_none());
        assert_eq!(config.server.bind, "127.0.0.1:5000");
    }

    #[test]
    fn load_rejects_unknown_platform_section() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join(".botprobe");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("config.toml"), "[platforms.telegram]\n").unwrap();

        let err = ProjectConfig::load(tmp.path()).unwrap_err();
        assert!(format!("{err:#}").contains("platforms.telegram"));
    }

    #[test]
    fn load_walks_up_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join(".botprobe");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("config.toml"),
            r#"
[webdriver]
headless = true
"#,
        )
        .unwrap();

        let nested = tmp.path().join("src").join("deep").join("nested");
        fs::create_dir_all(&nested).unwrap();

        let (config, path) = ProjectConfig::load(&nested).unwrap();
        assert!(path.is_some());
        assert!(config.webdriver.headless);
    }
}
