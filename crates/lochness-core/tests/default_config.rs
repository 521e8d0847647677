use std::time::Duration;

use lochness_core::config::{parse_config, KeystoreBackend};

#[test]
fn shipped_default_config_validates() {
    let cfg = parse_config(include_str!("../../../configs/default.toml")).expect("parse");
    assert_eq!(cfg.bind(), "127.0.0.1:8095");
    assert!(!cfg.require_principal());
    assert_eq!(cfg.workers(), 2);
    assert_eq!(cfg.stuck_after(), Duration::from_secs(3600));
    assert_eq!(cfg.keystore.backend, KeystoreBackend::Env);
    assert!(cfg.data_sources.is_empty());
}

#[test]
fn unknown_keystore_backend_is_rejected() {
    let err = parse_config("[keystore]\nbackend = \"vault\"\n").unwrap_err();
    assert!(err.to_string().contains("vault"), "{err}");
}
