//! Service configuration, read from the environment (and `.env`).

use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::report::models::{PageFormat, PagePresets};

const DEFAULT_TEMP_DIR: &str = "./tempReports";
const DEFAULT_ENGINE_BIN: &str = "phantomjs";
const DEFAULT_ENGINE_ARGS: &str = "--web-security=no --ignore-ssl-errors=yes engine-bridge.js";
const DEFAULT_ENGINE_CALL_TIMEOUT_SECS: u64 = 20;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 27;
const DEFAULT_MARGIN: &str = "1cm";
const DEFAULT_FOOTER_HEIGHT: &str = "1cm";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {message}")]
    Invalid { name: String, message: String },
}

/// How the rendering engine process is started.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub call_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_ENGINE_BIN),
            args: split_args(DEFAULT_ENGINE_ARGS),
            call_timeout: Duration::from_secs(DEFAULT_ENGINE_CALL_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Directory receiving the exported PDF files.
    pub temp_dir: PathBuf,
    pub presets: PagePresets,
    pub engine: EngineConfig,
    pub request_timeout: Duration,
    pub host: String,
    pub port: u16,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            temp_dir: PathBuf::from(DEFAULT_TEMP_DIR),
            presets: PagePresets::default(),
            engine: EngineConfig::default(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl RendererConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();

        let page_size: PageFormat = parse_var("REPORT_PAGE_SIZE", PageFormat::A4)?;
        let margin = var_or("REPORT_PAGE_MARGIN", DEFAULT_MARGIN);
        let footer_height = var_or("REPORT_FOOTER_HEIGHT", DEFAULT_FOOTER_HEIGHT);

        let engine = EngineConfig {
            program: PathBuf::from(var_or("RENDER_ENGINE_BIN", DEFAULT_ENGINE_BIN)),
            args: split_args(&var_or("RENDER_ENGINE_ARGS", DEFAULT_ENGINE_ARGS)),
            call_timeout: Duration::from_secs(parse_var(
                "RENDER_ENGINE_CALL_TIMEOUT_SECS",
                DEFAULT_ENGINE_CALL_TIMEOUT_SECS,
            )?),
        };

        Ok(Self {
            temp_dir: PathBuf::from(var_or("REPORT_TEMP_DIR", DEFAULT_TEMP_DIR)),
            presets: PagePresets::new(page_size, margin, footer_height),
            engine,
            request_timeout: Duration::from_secs(parse_var(
                "REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?),
            host: var_or("SERVER_HOST", "0.0.0.0"),
            port: parse_var("SERVER_PORT", 8080u16)?,
        })
    }
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| {
        log::warn!("{} not set, using default: {}", name, default);
        default.to_string()
    })
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            name: name.to_string(),
            message: e.to_string(),
        }),
        Err(_) => {
            log::warn!("{} not set, using default: {}", name, default);
            Ok(default)
        }
    }
}

fn split_args(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RendererConfig::default();
        assert_eq!(config.temp_dir, PathBuf::from("./tempReports"));
        assert_eq!(config.request_timeout, Duration::from_secs(27));
        assert_eq!(config.presets.portrait.page_size, PageFormat::A4);
        assert_eq!(config.presets.landscape.margin, "1cm");
        assert!(config.engine.args.contains(&"--web-security=no".to_string()));
    }

    #[test]
    fn test_parse_var_reports_invalid_values() {
        env::set_var("REPORT_RENDERER_TEST_PORT", "not-a-port");
        let result: Result<u16, _> = parse_var("REPORT_RENDERER_TEST_PORT", 8080);
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));

        env::set_var("REPORT_RENDERER_TEST_PORT", " 9090 ");
        assert_eq!(parse_var("REPORT_RENDERER_TEST_PORT", 8080u16).unwrap(), 9090);
        env::remove_var("REPORT_RENDERER_TEST_PORT");
    }

    #[test]
    fn test_split_args() {
        assert_eq!(split_args("  --a   b "), vec!["--a".to_string(), "b".to_string()]);
    }
}
