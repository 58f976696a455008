use brrtchain::security::BearerJwtGate;
use brrtchain::{ConfigError, Pipeline, PipelineConfig, RouteTable};
use std::io::Write;
use std::time::Duration;

fn write_config(yaml: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_yaml_file() {
    let file = write_config(
        "request_timeout_ms: 1500\nauth:\n  jwt_secret: from-file\n  token_cookie: access_token\n  session_ttl_secs: 90\n",
    );
    let config = PipelineConfig::from_yaml_file(file.path()).unwrap();

    assert_eq!(config.request_timeout(), Some(Duration::from_millis(1500)));
    assert_eq!(config.auth.jwt_secret, "from-file");
    assert_eq!(config.auth.token_cookie.as_deref(), Some("access_token"));
    assert_eq!(config.auth.session_ttl(), Duration::from_secs(90));
    assert_eq!(config.auth.session_cookie, "sid");
}

#[test]
fn test_env_overrides_file_values() {
    let file = write_config("request_timeout_ms: 1500\nauth:\n  jwt_secret: from-file\n");
    let mut config = PipelineConfig::from_yaml_file(file.path()).unwrap();
    config
        .apply_overrides_from(|name| match name {
            "BRRTC_JWT_SECRET" => Some("from-env".to_string()),
            "BRRTC_SESSION_TTL_SECS" => Some("45".to_string()),
            _ => None,
        })
        .unwrap();

    assert_eq!(config.auth.jwt_secret, "from-env");
    assert_eq!(config.auth.session_ttl_secs, 45);
    assert_eq!(config.request_timeout_ms, Some(1500));
}

#[test]
fn test_missing_file_and_bad_yaml() {
    let err = PipelineConfig::from_yaml_file("/definitely/not/here.yaml").unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));

    let file = write_config("auth: [not, a, map]\n");
    assert!(matches!(
        PipelineConfig::from_yaml_file(file.path()),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn test_empty_secret_rejected_for_bearer_gate() {
    let config = PipelineConfig::default();
    assert!(matches!(
        BearerJwtGate::from_config(&config.auth),
        Err(ConfigError::MissingSecret)
    ));
}

#[test]
fn test_config_drives_pipeline_timeout() {
    let config = PipelineConfig::from_yaml_str("request_timeout_ms: 250\n").unwrap();
    let pipeline = Pipeline::builder(RouteTable::default()).config(&config).build();
    assert_eq!(pipeline.request_timeout(), Some(Duration::from_millis(250)));

    let none = Pipeline::builder(RouteTable::default())
        .config(&PipelineConfig::default())
        .build();
    assert_eq!(none.request_timeout(), None);
}
