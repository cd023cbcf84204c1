use image_rotator::config::Configuration;
use image_rotator::display::RotationTiming;
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn defaults_match_display_defaults() {
    let cfg: Configuration = serde_yaml::from_str("{}").unwrap();
    assert_eq!(cfg.timing(), RotationTiming::default());
    assert_eq!(cfg.interval, Duration::from_millis(5000));
    assert_eq!(cfg.fade, Duration::from_millis(1000));
    assert_eq!(cfg.image_root, PathBuf::from("."));
    assert!(cfg.sources.is_empty());
    assert_eq!(cfg.listing_collection, "listings");
    assert_eq!(cfg.listing_images_field, "images");
    assert!(cfg.validated().is_ok());
}

#[test]
fn parse_kebab_case_config() {
    let yaml = r#"
image-root: "/srv/images"
sources:
  - cars/civic-front.jpg
  - cars/civic-side.jpg
  - ""
interval: 3s
fade: 750ms
max-concurrent-loads: 4
seed-documents: "seed.yaml"
listing-collection: homes
listing-images-field: photos
auth:
  users:
    admin@example.com: hunter2
  token-ttl: 15m
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(cfg.image_root, PathBuf::from("/srv/images"));
    assert_eq!(cfg.sources.len(), 3);
    assert_eq!(cfg.timing(), RotationTiming::from_millis(3000, 750));
    assert_eq!(cfg.max_concurrent_loads, 4);
    assert_eq!(cfg.seed_documents, Some(PathBuf::from("seed.yaml")));
    assert_eq!(cfg.listing_collection, "homes");
    assert_eq!(cfg.listing_images_field, "photos");
    assert_eq!(cfg.auth.users.len(), 1);
    assert_eq!(cfg.auth.token_ttl, Duration::from_secs(15 * 60));
    assert!(cfg.validated().is_ok());
}

#[test]
fn interval_may_be_shorter_than_fade() {
    let yaml = r#"
interval: 200ms
fade: 1s
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    assert!(cfg.validated().is_ok());
}

#[test]
fn rejects_zero_durations() {
    for yaml in ["interval: 0s", "fade: 0s", "auth:\n  token-ttl: 0s"] {
        let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.validated().is_err(), "expected {yaml:?} to be rejected");
    }
}

#[test]
fn rejects_zero_concurrency_and_bad_users() {
    let cfg: Configuration = serde_yaml::from_str("max-concurrent-loads: 0").unwrap();
    assert!(cfg.validated().is_err());

    let yaml = r#"
auth:
  users:
    not-an-email: secret
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    let err = cfg.validated().unwrap_err();
    assert!(format!("{err:#}").contains("not-an-email"));
}

#[test]
fn unparseable_duration_is_an_error() {
    let res: Result<Configuration, _> = serde_yaml::from_str("interval: soon");
    assert!(res.is_err());
}

#[test]
fn loads_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "sources: [a.jpg, b.jpg]\ninterval: 2s\n").unwrap();
    let cfg = Configuration::from_yaml_file(&path)
        .unwrap()
        .validated()
        .unwrap();
    assert_eq!(cfg.sources, vec!["a.jpg", "b.jpg"]);
    assert_eq!(cfg.interval, Duration::from_secs(2));

    assert!(Configuration::from_yaml_file(dir.path().join("missing.yaml")).is_err());
}
