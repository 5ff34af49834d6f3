//! `botprobe config` output.

use std::path::Path;

use anyhow::{Context, Result};

use super::ProjectConfig;
use crate::platform::{LoginFlow, PlatformAdapter, PlatformId, adapter_for};

fn resolved(config: &ProjectConfig) -> Vec<PlatformAdapter> {
    PlatformId::ALL
        .into_iter()
        .map(|id| adapter_for(id, config.platform(id)))
        .collect()
}

fn source_label(config_path: Option<&Path>) -> String {
    config_path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults, no .botprobe/config.toml found)".to_string())
}

fn push_kv(output: &mut String, key: &str, value: impl std::fmt::Display) {
    output.push_str(&format!("  {key:<24} {value}\n"));
}

fn set_or_not(value: &Option<String>) -> &'static str {
    if value.is_some() { "(set)" } else { "(not set)" }
}

pub fn human(config: &ProjectConfig, config_path: Option<&Path>) -> String {
    let mut output = String::new();

    output.push_str("Paths\n");
    push_kv(&mut output, "state_dir", config.paths.state_dir.display());
    output.push('\n');

    output.push_str("WebDriver\n");
    push_kv(&mut output, "url", &config.webdriver.url);
    push_kv(&mut output, "headless", config.webdriver.headless);
    push_kv(
        &mut output,
        "request_timeout",
        format!("{}s", config.webdriver.request_timeout_secs),
    );
    output.push('\n');

    let monitor = &config.monitor;
    output.push_str("Monitor\n");
    push_kv(
        &mut output,
        "poll_interval",
        format!("{}ms", monitor.poll_interval_millis),
    );
    push_kv(&mut output, "completion_threshold", monitor.completion_threshold);
    push_kv(&mut output, "follow_up", &monitor.follow_up);
    push_kv(
        &mut output,
        "send_retry",
        format!(
            "{} x {}ms",
            monitor.send_retry_attempts, monitor.send_retry_interval_millis
        ),
    );
    push_kv(
        &mut output,
        "keystroke_pause",
        format!("{}ms", monitor.keystroke_pause_millis),
    );
    push_kv(
        &mut output,
        "post_send_pause",
        format!("{}ms", monitor.post_send_pause_millis),
    );
    output.push('\n');

    output.push_str("Auth\n");
    push_kv(
        &mut output,
        "selector_wait",
        format!(
            "{} x {}ms",
            config.auth.selector_attempts, config.auth.selector_interval_millis
        ),
    );
    push_kv(
        &mut output,
        "answer_timeout",
        config
            .auth
            .answer_timeout_secs
            .map(|s| format!("{s}s"))
            .unwrap_or_else(|| "(none)".to_string()),
    );
    output.push('\n');

    output.push_str("Server\n");
    push_kv(&mut output, "bind", &config.server.bind);
    push_kv(
        &mut output,
        "run_timeout",
        format!("{}s", config.server.run_timeout_secs),
    );
    push_kv(
        &mut output,
        "response_types",
        config.server.response_types.join(", "),
    );
    output.push('\n');

    for adapter in resolved(config) {
        output.push_str(&format!("Platform {}\n", adapter.id));
        push_kv(&mut output, "conversation_url", &adapter.conversation_url);
        let login = match &adapter.login {
            LoginFlow::Manual { .. } => "manual",
            LoginFlow::Credentials { .. } => "credentials",
        };
        push_kv(&mut output, "login", login);
        push_kv(&mut output, "probe_input", &adapter.probe_input);
        push_kv(
            &mut output,
            "echo_marker",
            adapter
                .echo_marker
                .as_deref()
                .map(|m| format!("{m:?}"))
                .unwrap_or_else(|| "(none)".to_string()),
        );
        push_kv(&mut output, "match_mode", adapter.match_mode.as_str());
        push_kv(
            &mut output,
            "username",
            adapter
                .credentials
                .username
                .as_deref()
                .unwrap_or("(prompt)"),
        );
        push_kv(
            &mut output,
            "password",
            set_or_not(&adapter.credentials.password),
        );
        push_kv(&mut output, "pin", set_or_not(&adapter.credentials.pin));
        for (response_type, input, accepted) in adapter.patterns.iter() {
            output.push_str(&format!(
                "  - {response_type} / {input} => {}\n",
                accepted
                    .iter()
                    .map(|a| format!("{a:?}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        output.push('\n');
    }

    output.push_str("Source Path\n");
    push_kv(&mut output, "path", source_label(config_path));

    output
}

pub fn json(config: &ProjectConfig, config_path: Option<&Path>) -> Result<String> {
    let payload = serde_json::json!({
        "paths": &config.paths,
        "webdriver": &config.webdriver,
        "monitor": &config.monitor,
        "auth": &config.auth,
        "server": &config.server,
        "platforms": resolved(config),
        "source_path": source_label(config_path),
    });
    serde_json::to_string_pretty(&payload).context("failed to serialize config to JSON")
}
