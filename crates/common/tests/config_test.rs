use repair_qa_common::config::SystemConfig;
use std::fs;
use tempfile::TempDir;

const MINIMAL: &str = r#"
[upstream]
base_url = "http://localhost:5001/v1"

[images]
static_dir = "/srv/images"
base_url = "http://localhost:8000/api/qa/images/"
cache_path = "/srv/cache/image_embeddings.json"

[knowledge]
triples_path = "/srv/triples.txt"
"#;

#[test]
fn test_config_load_from_toml() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("test_config.toml");

    let config_content = r#"
[server]
host = "127.0.0.1"
port = 9000

[upstream]
base_url = "http://dify.local/v1"
user = "tester"
base_city = "Taiyuan"
idle_timeout_secs = 30

[[routing.channels]]
name = "echarts"
selectors = ["1755001"]

[[routing.channels]]
name = "plain_text"
selectors = ["1755002", "1755003"]

[stream]
surface_errors = true
idle_timeout_secs = 600

[images]
static_dir = "/srv/images"
base_url = "http://localhost:9000/api/qa/images/"
cache_path = "/srv/cache/image_embeddings.json"
score_threshold = 0.5

[embedding]
model = "text-embedding-v3"
dimensions = 512
segment_words = true

[knowledge]
triples_path = "/srv/triples.txt"
per_keyword_limit = 10

[logging]
level = "debug"
json = true
"#;

    fs::write(&config_path, config_content).unwrap();

    let config = SystemConfig::from_file(&config_path).unwrap();

    assert_eq!(config.bind_address(), "127.0.0.1:9000");
    assert_eq!(config.upstream.user, "tester");
    assert_eq!(config.upstream.base_city, "Taiyuan");
    assert_eq!(config.upstream.idle_timeout().as_secs(), 30);
    assert_eq!(config.routing.channels.len(), 2);
    assert_eq!(config.routing.channels[1].name, "plain_text");
    assert_eq!(config.routing.channels[1].selectors, vec!["1755002", "1755003"]);
    assert!(config.stream.surface_errors);
    assert_eq!(config.stream.idle_timeout().map(|d| d.as_secs()), Some(600));
    assert_eq!(config.images.score_threshold, 0.5);
    assert_eq!(config.embedding.dimensions, 512);
    assert!(config.embedding.segment_words);
    assert_eq!(config.knowledge.per_keyword_limit, 10);
    assert!(config.logging.json);
}

#[test]
fn test_config_defaults_applied() {
    let config = SystemConfig::from_toml_str(MINIMAL).unwrap();

    assert_eq!(config.server.port, 8000);
    assert!(config.server.api_key.is_none());
    assert_eq!(config.upstream.api_key_env, "DIFY_API_KEY");
    assert_eq!(config.upstream.idle_timeout_secs, 120);
    assert!(config.routing.table_path.is_none());
    assert!(config.routing.channels.is_empty());
    assert!(!config.stream.surface_errors);
    assert!(config.stream.idle_timeout().is_none());
    assert_eq!(config.images.score_threshold, 0.4);
    assert_eq!(config.images.top_k, 2);
    assert_eq!(config.embedding.model, "text-embedding-v4");
    assert_eq!(config.embedding.dimensions, 1024);
    assert!(!config.embedding.segment_words);
    assert_eq!(config.knowledge.per_keyword_limit, 20);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_config_resolves_server_key_from_env() {
    std::env::set_var("REPAIR_QA_TEST_SERVER_KEY", "s3cret");
    let content = format!(
        "[server]\napi_key_env = \"REPAIR_QA_TEST_SERVER_KEY\"\n{}",
        MINIMAL
    );

    let config = SystemConfig::from_toml_str(&content).unwrap();

    assert_eq!(config.server.api_key.as_deref(), Some("s3cret"));
}

#[test]
fn test_config_validation_invalid_base_url() {
    let content = MINIMAL.replace("http://localhost:5001/v1", "localhost:5001");

    let result = SystemConfig::from_toml_str(&content);
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("upstream.base_url"));
}

#[test]
fn test_config_validation_invalid_threshold() {
    let content = MINIMAL.replace(
        "cache_path = \"/srv/cache/image_embeddings.json\"",
        "cache_path = \"/srv/cache/image_embeddings.json\"\nscore_threshold = 1.5",
    );

    let result = SystemConfig::from_toml_str(&content);
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("score_threshold"));
}

#[test]
fn test_config_validation_zero_keyword_limit() {
    let content = MINIMAL.replace(
        "triples_path = \"/srv/triples.txt\"",
        "triples_path = \"/srv/triples.txt\"\nper_keyword_limit = 0",
    );

    let result = SystemConfig::from_toml_str(&content);
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("per_keyword_limit"));
}

#[test]
fn test_config_missing_file() {
    let result = SystemConfig::from_file("/nonexistent/repair-qa.toml");
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("failed to read"));
}

#[test]
fn test_config_missing_required_section() {
    let result = SystemConfig::from_toml_str("[upstream]\nbase_url = \"http://x\"\n");
    assert!(result.is_err());
}
