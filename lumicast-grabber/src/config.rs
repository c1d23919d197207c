//! Configuration for the grabber binary.

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use lumicast_core::{
    CaptureMethod, CaptureSettings, GrabError, PipelineConfig, RecoveryPolicy, ServerTarget,
};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrabberConfig {
    /// Screen capture settings.
    pub capture: CaptureConfig,
    /// Recovery thresholds and cooldowns.
    pub recovery: RecoveryPolicy,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Hyperion servers that receive every frame.
    pub servers: Vec<ServerTarget>,
}

/// The `[capture]` table: the method plus the engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub method: CaptureMethod,
    #[serde(flatten)]
    pub settings: CaptureSettings,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive: "info", "debug", "lumicast_core=trace", ...
    /// `RUST_LOG` takes precedence.
    pub level: String,
    /// Optional log file path. If empty, logs to stderr.
    pub file: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for GrabberConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            recovery: RecoveryPolicy::default(),
            logging: LoggingConfig::default(),
            servers: vec![ServerTarget::default()],
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: String::new(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl GrabberConfig {
    /// Load and validate a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, GrabError> {
        let config = match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents).map_err(|e| {
                GrabError::Configuration(format!("{}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                return Err(GrabError::Configuration(format!(
                    "cannot read {}: {e}",
                    path.display()
                )));
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, GrabError> {
        toml::from_str(text).map_err(|e| GrabError::Configuration(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String, GrabError> {
        toml::to_string_pretty(self).map_err(|e| GrabError::Configuration(e.to_string()))
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> Result<(), GrabError> {
        let text = Self::default().to_toml()?;
        std::fs::write(path, text).map_err(|e| {
            GrabError::Configuration(format!("cannot write {}: {e}", path.display()))
        })
    }

    pub fn validate(&self) -> Result<(), GrabError> {
        if self.logging.level.trim().is_empty() {
            return Err(GrabError::Configuration("logging.level is empty".into()));
        }
        self.to_pipeline_config().validate()
    }

    pub fn to_pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            method: self.capture.method,
            capture: self.capture.settings.clone(),
            servers: self.servers.clone(),
            recovery: self.recovery.clone(),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use lumicast_core::ProtocolKind;

    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = GrabberConfig::default().to_toml().unwrap();
        assert!(text.contains("[capture]"));
        assert!(text.contains("scaling_factor = 8"));
        assert!(text.contains("method = \"dxgi\""));
        assert!(text.contains("[[servers]]"));
    }

    #[test]
    fn roundtrip_config() {
        let cfg = GrabberConfig::default();
        let parsed = GrabberConfig::parse(&cfg.to_toml().unwrap()).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg = GrabberConfig::parse(
            r#"
            [capture]
            method = "legacy"
            scaling_factor = 4

            [[servers]]
            host = "hyperion.local"
            port = 19445
            protocol = "protobuf"
            priority = 100
            "#,
        )
        .unwrap();

        assert_eq!(cfg.capture.method, CaptureMethod::Legacy);
        assert_eq!(cfg.capture.settings.scaling_factor, 4);
        assert_eq!(cfg.capture.settings.max_fps, 30);
        assert_eq!(cfg.recovery, RecoveryPolicy::default());
        assert_eq!(cfg.servers.len(), 1);
        assert_eq!(cfg.servers[0].protocol, ProtocolKind::ProtoBuf);
        assert_eq!(cfg.servers[0].duration_ms, -1);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn pipeline_config_carries_every_section() {
        let mut cfg = GrabberConfig::default();
        cfg.capture.method = CaptureMethod::Legacy;
        cfg.recovery.max_consecutive_failures = 2;
        let pipeline = cfg.to_pipeline_config();
        assert_eq!(pipeline.method, CaptureMethod::Legacy);
        assert_eq!(pipeline.recovery.max_consecutive_failures, 2);
        assert_eq!(pipeline.servers, cfg.servers);
    }

    #[test]
    fn invalid_values_rejected() {
        let mut cfg = GrabberConfig::default();
        cfg.capture.settings.scaling_factor = 6;
        assert!(matches!(cfg.validate(), Err(GrabError::Configuration(_))));

        let mut cfg = GrabberConfig::default();
        cfg.servers[0].port = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unparsable_text_is_a_configuration_error() {
        let err = GrabberConfig::parse("[capture\nmethod = 1").unwrap_err();
        assert!(matches!(err, GrabError::Configuration(_)));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("lumicast-grabber-does-not-exist.toml");
        let cfg = GrabberConfig::load(&path).unwrap();
        assert_eq!(cfg, GrabberConfig::default());
    }

    #[test]
    fn write_then_load() {
        let path = std::env::temp_dir().join(format!(
            "lumicast-grabber-{}.toml",
            std::process::id()
        ));
        GrabberConfig::write_default(&path).unwrap();
        let cfg = GrabberConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(cfg, GrabberConfig::default());
    }
}
