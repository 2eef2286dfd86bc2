//! Configuration loader tests

use envctl_domain::error::Error;
use envctl_infrastructure::config::ConfigLoader;
use tempfile::TempDir;

const SAMPLE: &str = r"
portForwards:
  - name: prometheus
    cluster: workload
    namespace: monitoring
    target:
      kind: service
      name: prometheus-operated
    remotePort: 9090
  - name: grafana
    cluster: management
    namespace: monitoring
    target:
      kind: service
      name: grafana
    localPort: 3000
    remotePort: 3000
mcpServers:
  - name: prometheus
    type: localCommand
    command: mcp-prometheus
    env:
      PROMETHEUS_URL: http://localhost:9090
    proxyPort: 7010
    requiresPortForwards: [prometheus]
aggregator:
  port: 8090
healthCheckIntervalSeconds: 30
";

fn write_config(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, content).expect("write config");
    path
}

#[test]
fn loads_and_validates_a_full_config() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_config(&dir, SAMPLE);

    let config = ConfigLoader::new()
        .with_config_path(&path)
        .load()
        .expect("load");
    assert_eq!(config.port_forwards.len(), 2);
    assert_eq!(config.mcp_servers.len(), 1);
    assert_eq!(config.aggregator.port, 8090);
    assert_eq!(
        config.health_check_interval(),
        std::time::Duration::from_secs(30)
    );
}

#[test]
fn unknown_fields_are_a_config_error() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_config(&dir, "aggregator:\n  port: 8090\nmystery: 1\n");

    let err = ConfigLoader::new()
        .with_config_path(&path)
        .load()
        .expect_err("unknown field must be rejected");
    assert!(matches!(err, Error::Config { .. }));
}

#[test]
fn missing_file_is_a_config_error() {
    let dir = TempDir::new().expect("tempdir");
    let err = ConfigLoader::new()
        .with_config_path(dir.path().join("nope.yaml"))
        .load()
        .expect_err("missing file must be an error");
    assert!(matches!(err, Error::Config { .. }));
}

#[test]
fn dangling_dependency_is_a_config_error() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_config(
        &dir,
        r"
mcpServers:
  - name: lonely
    type: localCommand
    command: mcp-lonely
    proxyPort: 7010
    requiresPortForwards: [missing]
aggregator:
  port: 8090
",
    );
    let err = ConfigLoader::new()
        .with_config_path(&path)
        .load()
        .expect_err("dangling dependency must be rejected");
    assert!(err.to_string().contains("missing"));
}
