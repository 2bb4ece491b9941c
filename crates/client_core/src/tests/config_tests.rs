use std::{collections::HashMap, path::PathBuf};

use super::*;

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect();
    move |name| vars.get(name).cloned()
}

fn settings_file(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "client-settings-{}-{name}.toml",
        std::process::id()
    ));
    fs::write(&path, contents).expect("write settings file");
    path
}

#[test]
fn defaults_apply_without_file_or_env() {
    let settings = load_settings_from(Path::new("/nonexistent/client.toml"), env_from(&[]))
        .expect("defaults");
    assert_eq!(settings, ClientSettings::default());
    assert_eq!(settings.auth_scheme, "Token");
    assert_eq!(settings.in_flight_max_age, Duration::from_secs(120));
    assert_eq!(settings.dedup_policy, DedupPolicy::Suppress);
    assert!(!settings.optimistic_echo);
}

#[test]
fn file_values_override_defaults() {
    let path = settings_file(
        "file",
        r#"
api_base_url = "https://chat.example.com"
request_timeout_ms = 2500
dedup_policy = "join"
optimistic_echo = true
page_size = 25
"#,
    );

    let settings = load_settings_from(&path, env_from(&[])).expect("settings");
    let _ = fs::remove_file(&path);

    assert_eq!(settings.api_base_url, "https://chat.example.com");
    assert_eq!(settings.request_timeout, Duration::from_millis(2500));
    assert_eq!(settings.dedup_policy, DedupPolicy::Join);
    assert!(settings.optimistic_echo);
    assert_eq!(settings.page_size, 25);
    assert_eq!(settings.auth_scheme, "Token");
}

#[test]
fn env_overrides_file() {
    let path = settings_file(
        "env",
        r#"
api_base_url = "https://file.example.com"
in_flight_max_age_secs = 30
"#,
    );

    let settings = load_settings_from(
        &path,
        env_from(&[
            ("HUB_API_URL", "https://env.example.com"),
            ("APP__IN_FLIGHT_MAX_AGE_SECS", "15"),
            ("APP__AUTH_SCHEME", "Bearer"),
            ("APP__DEDUP_POLICY", "Join"),
            ("APP__OPTIMISTIC_ECHO", "yes"),
        ]),
    )
    .expect("settings");
    let _ = fs::remove_file(&path);

    assert_eq!(settings.api_base_url, "https://env.example.com");
    assert_eq!(settings.in_flight_max_age, Duration::from_secs(15));
    assert_eq!(settings.auth_scheme, "Bearer");
    assert_eq!(settings.dedup_policy, DedupPolicy::Join);
    assert!(settings.optimistic_echo);
}

#[test]
fn app_base_url_wins_over_hub_url() {
    let settings = load_settings_from(
        Path::new("/nonexistent/client.toml"),
        env_from(&[
            ("HUB_API_URL", "https://hub.example.com"),
            ("APP__API_BASE_URL", "https://app.example.com"),
        ]),
    )
    .expect("settings");
    assert_eq!(settings.api_base_url, "https://app.example.com");
}

#[test]
fn invalid_numbers_are_rejected() {
    let err = load_settings_from(
        Path::new("/nonexistent/client.toml"),
        env_from(&[("APP__REQUEST_TIMEOUT_MS", "soon")]),
    )
    .expect_err("bad timeout");
    assert!(err.to_string().contains("APP__REQUEST_TIMEOUT_MS"));
}

#[test]
fn unknown_dedup_policy_is_rejected() {
    let err = load_settings_from(
        Path::new("/nonexistent/client.toml"),
        env_from(&[("APP__DEDUP_POLICY", "queue")]),
    )
    .expect_err("bad policy");
    assert!(err.to_string().contains("queue"));
}

#[test]
fn malformed_file_is_an_error() {
    let path = settings_file("malformed", "page_size = \"many\"");
    let result = load_settings_from(&path, env_from(&[]));
    let _ = fs::remove_file(&path);
    assert!(result.is_err());
}
