//! Tests for SSH Tunnel Configuration Types

use super::*;
use indoc::indoc;
use std::path::PathBuf;

#[test]
fn test_ssh_config_creation_with_password() {
    let config = SshTunnelConfig::with_password("bastion.example.com", "admin", "secret123");

    assert_eq!(config.host, "bastion.example.com");
    assert_eq!(config.port, 22);
    assert_eq!(config.username, "admin");
    assert_eq!(config.timeout_seconds, 30);
    assert!(matches!(
        config.auth_method().unwrap(),
        SshAuthMethod::Password { password } if password == "secret123"
    ));
}

#[test]
fn test_ssh_config_creation_with_private_key() {
    let config =
        SshTunnelConfig::with_private_key("bastion.example.com", "admin", "/home/user/.ssh/id_rsa")
            .passphrase("hunter2");

    let expected = PathBuf::from("/home/user/.ssh/id_rsa");
    assert!(matches!(
        config.auth_method().unwrap(),
        SshAuthMethod::PrivateKey { path, passphrase: Some("hunter2") } if *path == expected
    ));
}

#[test]
fn test_ssh_config_requires_a_credential() {
    let mut config = SshTunnelConfig::with_password("bastion.example.com", "admin", "secret");
    config.password = None;

    let err = config.validate().unwrap_err();
    assert!(matches!(err, DesklineError::Configuration(_)));
    assert!(err.to_string().contains("requires a private key or a password"));
}

#[test]
fn test_ssh_config_rejects_both_credentials() {
    let mut config = SshTunnelConfig::with_private_key("bastion.example.com", "admin", "/k");
    config.password = Some("secret".into());

    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("both a private key and a password"));
}

#[test]
fn test_ssh_config_empty_password_counts_as_unset() {
    let mut config = SshTunnelConfig::with_private_key("bastion.example.com", "admin", "/k");
    config.password = Some(String::new());

    assert!(config.validate().is_ok());
}

#[test]
fn test_ssh_config_validation_empty_host() {
    let config = SshTunnelConfig::with_password("", "admin", "secret");
    let result = config.validate();

    assert!(result.is_err());
    let err = result.unwrap_err();
    assert!(err.to_string().contains("host cannot be empty"));
}

#[test]
fn test_ssh_config_validation_invalid_port() {
    let config = SshTunnelConfig::with_password("bastion.example.com", "admin", "secret").port(0);
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("port cannot be 0"));
}

#[test]
fn test_ssh_config_validation_empty_username() {
    let config = SshTunnelConfig::with_password("bastion.example.com", "", "secret");
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("username cannot be empty"));
}

#[test]
fn test_ssh_config_builder_methods() {
    let config = SshTunnelConfig::with_password("bastion.example.com", "admin", "secret")
        .port(2222)
        .timeout(60)
        .keepalive(30);

    assert_eq!(config.port, 2222);
    assert_eq!(config.timeout_seconds, 60);
    assert_eq!(config.keepalive_seconds, 30);
}

#[test]
fn test_ssh_config_from_toml_uses_defaults() {
    let config: SshTunnelConfig = toml::from_str(indoc! {r#"
        host = "bastion.internal"
        username = "deploy"
        private_key_path = "/etc/deskline/id_ed25519"
    "#})
    .unwrap();

    assert_eq!(config.port, 22);
    assert_eq!(config.timeout_seconds, 30);
    assert_eq!(config.keepalive_seconds, 0);
    assert!(config.validate().is_ok());
}

#[test]
fn test_ssh_config_secrets_not_serialized() {
    let config = SshTunnelConfig::with_password("bastion.example.com", "admin", "secret");
    let json = serde_json::to_string(&config).unwrap();
    assert!(!json.contains("secret"));
}
