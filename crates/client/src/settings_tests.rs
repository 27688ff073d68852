// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;

use super::*;

fn env_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> =
        vars.iter().map(|&(k, v)| (k.to_owned(), v.to_owned())).collect();
    move |name: &str| map.get(name).cloned()
}

fn write_config(dir: &tempfile::TempDir, body: serde_json::Value) -> anyhow::Result<String> {
    let path = dir.path().join("application.json");
    std::fs::write(&path, serde_json::to_vec(&body)?)?;
    Ok(path.display().to_string())
}

#[test]
fn defaults_without_file_or_env() -> anyhow::Result<()> {
    let settings = Settings::load_with(env_from(&[]))?;
    assert_eq!(settings.maas_agent_url, "http://maas-agent:8080");
    assert_eq!(settings.tenant_manager_url, "ws://tenant-manager:8080");
    assert_eq!(settings.namespace, "default");
    assert!(settings.tls_ca_path.is_none());
    Ok(())
}

#[test]
fn file_values_are_read() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_config(
        &dir,
        serde_json::json!({
            "maas": { "agent": { "url": "http://agent.file:8080" } },
            "tenant-manager": { "url": "ws://tm.file:8080" },
            "microservice": { "namespace": "test-namespace" },
            "tls": { "ca-path": "/etc/ca.pem" }
        }),
    )?;

    let settings = Settings::load_with(env_from(&[(ENV_CONFIG_FILE, &path)]))?;
    assert_eq!(settings.maas_agent_url, "http://agent.file:8080");
    assert_eq!(settings.tenant_manager_url, "ws://tm.file:8080");
    assert_eq!(settings.namespace, "test-namespace");
    assert_eq!(settings.tls_ca_path, Some(PathBuf::from("/etc/ca.pem")));
    Ok(())
}

#[test]
fn env_overrides_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_config(
        &dir,
        serde_json::json!({
            "maas": { "agent": { "url": "http://agent.file:8080" } },
            "microservice": { "namespace": "file-ns" }
        }),
    )?;

    let settings = Settings::load_with(env_from(&[
        (ENV_CONFIG_FILE, &path),
        (ENV_MAAS_AGENT_URL, "http://agent.env:8080"),
        (ENV_NAMESPACE, "env-ns"),
    ]))?;
    assert_eq!(settings.maas_agent_url, "http://agent.env:8080");
    assert_eq!(settings.namespace, "env-ns");
    assert_eq!(settings.tenant_manager_url, DEFAULT_TENANT_MANAGER_URL);
    Ok(())
}

#[test]
fn cloud_namespace_is_fallback() -> anyhow::Result<()> {
    let settings = Settings::load_with(env_from(&[(ENV_CLOUD_NAMESPACE, "cloud-ns")]))?;
    assert_eq!(settings.namespace, "cloud-ns");

    let settings = Settings::load_with(env_from(&[
        (ENV_CLOUD_NAMESPACE, "cloud-ns"),
        (ENV_NAMESPACE, "service-ns"),
    ]))?;
    assert_eq!(settings.namespace, "service-ns");
    Ok(())
}

#[test]
fn empty_env_values_are_ignored() -> anyhow::Result<()> {
    let settings = Settings::load_with(env_from(&[(ENV_MAAS_AGENT_URL, "")]))?;
    assert_eq!(settings.maas_agent_url, DEFAULT_MAAS_AGENT_URL);
    Ok(())
}

#[test]
fn broken_file_is_an_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("bad.json");
    std::fs::write(&path, "not json")?;
    let path = path.display().to_string();

    assert!(Settings::load_with(env_from(&[(ENV_CONFIG_FILE, &path)])).is_err());
    Ok(())
}

#[test]
#[serial_test::serial]
fn from_env_reads_process_environment() {
    std::env::set_var(ENV_MAAS_AGENT_URL, "http://agent.process:9000");
    let settings = Settings::from_env();
    std::env::remove_var(ENV_MAAS_AGENT_URL);
    assert_eq!(settings.maas_agent_url, "http://agent.process:9000");
}
