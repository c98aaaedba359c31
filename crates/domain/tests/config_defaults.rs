use dadp_domain::config::Config;
use dadp_domain::model::Shape;

#[test]
fn default_shape_is_aop() {
    let config = Config::default();
    assert_eq!(config.hub.shape, Shape::Aop);
}

#[test]
fn partial_toml_fills_remaining_defaults() {
    let toml_str = r#"
[hub]
base_url = "https://hub.internal"
alias = "billing"

[batch]
min_size = 50
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.hub.base_url, "https://hub.internal");
    assert_eq!(config.hub.alias, "billing");
    assert_eq!(config.batch.min_size, 50);
    assert_eq!(config.batch.max_size, 10_000);
    assert_eq!(config.sync.interval_secs, 30);
    assert!(config.intercept.fallback_to_original);
}

#[test]
fn wrapper_shape_parses() {
    let toml_str = r#"
[hub]
base_url = "https://hub.internal"
alias = "billing"
shape = "WRAPPER"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.hub.shape, Shape::Wrapper);
    assert_eq!(config.hub.shape.state_dir_name(), ".dadp-wrapper");
    assert_eq!(config.hub.shape.config_file_name(), "wrapper-config.json");
}
