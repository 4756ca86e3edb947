use shared_utils::config::{Config, ConfigError, ConfigManager, Protocol};
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_full_config() {
    let mut file = NamedTempFile::new().unwrap();

    let config_str = r#"
        log_level = "debug"

        [interface]
        name = "server"
        port = 1194
        protocol = "udp"
        network = "10.8.0.0"
        netmask = "255.255.255.0"
        dns1 = "9.9.9.9"
        dns2 = "149.112.112.112"
        compression = false

        [endpoint]
        public_host = "gw.funcho.example"
        public_port = 1194

        [pki]
        easy_rsa_dir = "/srv/funchovpn/easy-rsa"
        openvpn_dir = "/srv/funchovpn/openvpn"
        source_dir = "/usr/share/easy-rsa"

        [service]
        unit = "openvpn@server"
        status_path = "/run/openvpn/status.log"

        [store]
        path = "/srv/funchovpn/clients.json"
    "#;

    file.write_all(config_str.as_bytes()).unwrap();

    let config = Config::load(file.path()).unwrap();

    assert_eq!(config.log_level, "debug");
    assert_eq!(config.interface.name, "server");
    assert_eq!(config.interface.port, 1194);
    assert_eq!(config.interface.protocol, Protocol::Udp);
    assert_eq!(config.interface.dns1.as_deref(), Some("9.9.9.9"));
    assert_eq!(config.interface.dns2.as_deref(), Some("149.112.112.112"));
    assert_eq!(config.endpoint.public_host, "gw.funcho.example");
    assert_eq!(
        config.pki.easy_rsa_dir.to_str(),
        Some("/srv/funchovpn/easy-rsa")
    );
    assert_eq!(
        config.service.status_path.to_str(),
        Some("/run/openvpn/status.log")
    );
    assert_eq!(config.store.path.to_str(), Some("/srv/funchovpn/clients.json"));
}

#[test]
fn test_minimal_config_gets_defaults() {
    let mut file = NamedTempFile::new().unwrap();

    // An empty file is a valid configuration; every section has defaults.
    file.write_all(b"").unwrap();

    let config = Config::load(file.path()).unwrap();

    assert_eq!(config.interface.port, 1194);
    assert_eq!(config.interface.network, "10.8.0.0");
    assert_eq!(config.interface.netmask, "255.255.255.0");
    assert_eq!(config.service.unit, "openvpn@server");
    assert_eq!(config.log_level, "info");
}

#[test]
fn test_invalid_netmask_rejected() {
    let mut file = NamedTempFile::new().unwrap();

    let config_str = r#"
        [interface]
        netmask = "255.255.252.0"
    "#;

    file.write_all(config_str.as_bytes()).unwrap();

    let result = Config::load(file.path());

    match result {
        Err(ConfigError::InvalidValue { key, .. }) => {
            assert_eq!(key, "interface.netmask");
        }
        other => panic!("expected InvalidValue for interface.netmask, got {other:?}"),
    }
}

#[test]
fn test_invalid_network_rejected() {
    let mut file = NamedTempFile::new().unwrap();

    let config_str = r#"
        [interface]
        network = "10.8.0.0/24"
    "#;

    file.write_all(config_str.as_bytes()).unwrap();

    let result = Config::load(file.path());

    match result {
        Err(ConfigError::InvalidValue { key, .. }) => {
            assert_eq!(key, "interface.network");
        }
        other => panic!("expected InvalidValue for interface.network, got {other:?}"),
    }
}

#[test]
fn test_missing_file_is_file_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");

    match Config::load(&path) {
        Err(ConfigError::FileNotFound(p)) => assert_eq!(p, path),
        other => panic!("expected FileNotFound, got {other:?}"),
    }
}

#[test]
fn test_manager_roundtrip() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"log_level = \"warn\"\n").unwrap();

    let mut manager = ConfigManager::load(file.path()).unwrap();
    assert_eq!(manager.config().log_level, "warn");

    manager.config_mut().interface.compression = true;
    manager.save().unwrap();

    let reloaded = ConfigManager::load(file.path()).unwrap();
    assert!(reloaded.config().interface.compression);
}
