//! Loading application configuration from disk.

use std::io::Write;
use std::time::Duration;

use rekon::AppConfig;
use rekon::rekon_core::Error;
use tempfile::NamedTempFile;

fn write_config(text: &str) -> Result<NamedTempFile, String> {
    let mut file = NamedTempFile::new().map_err(|e| e.to_string())?;
    file.write_all(text.as_bytes()).map_err(|e| e.to_string())?;
    Ok(file)
}

#[test]
fn file_overrides_selected_policies() -> Result<(), String> {
    let file = write_config(
        r#"
[engine.budget]
emergency_margin_ms = 20000

[engine.propagation]
interval_ms = 5000
max_wait_ms = 60000

[delivery]
log_stream = "local"
"#,
    )?;

    let config = AppConfig::load(Some(file.path())).map_err(|e| e.to_string())?;
    assert_eq!(config.engine.budget.emergency_margin(), Duration::from_secs(20));
    assert_eq!(config.engine.budget.operation_ceiling(), Duration::from_secs(840));
    assert_eq!(config.engine.propagation.max_wait(), Duration::from_secs(60));
    assert_eq!(config.engine.convergence.max_wait(), Duration::from_secs(600));
    assert_eq!(config.delivery.log_stream, "local");
    Ok(())
}

#[test]
fn malformed_file_is_a_config_error() -> Result<(), String> {
    let file = write_config("[engine\nbudget = 1")?;
    let result = AppConfig::load(Some(file.path()));
    assert!(matches!(result, Err(Error::Config { .. })));
    Ok(())
}

#[test]
fn missing_file_is_a_config_error() {
    let result = AppConfig::load(Some(std::path::Path::new("/nonexistent/rekon.toml")));
    assert!(matches!(result, Err(Error::Config { .. })));
}

#[test]
fn margin_above_ceiling_is_rejected() -> Result<(), String> {
    let file = write_config("[engine.budget]\nemergency_margin_ms = 900000\n")?;
    let result = AppConfig::load(Some(file.path()));
    assert!(matches!(result, Err(Error::Config { .. })));
    Ok(())
}
