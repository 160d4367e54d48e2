//! Shipped configuration acceptance tests.

use rms_common::config::{PlatformKind, ProbeConfig};
use std::path::Path;

#[test]
fn test_shipped_config_matches_defaults() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/default.toml");
    let shipped = ProbeConfig::from_file(&path).unwrap();
    let defaults = ProbeConfig::default();

    assert_eq!(shipped.to_toml().unwrap(), defaults.to_toml().unwrap());
    assert_eq!(shipped.platform, PlatformKind::Simulated);
    assert!(shipped.validate().unwrap().is_empty());
}
