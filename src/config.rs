use crate::engine::AnalyzerOptions;
use crate::level::Level;
use crate::error::{AnalyzerError, AnalyzerResult};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScaledPtrCheckConfig {
    #[serde(default)]
    pub checkers: CheckersConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub target: TargetConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct CheckersConfig {
    #[serde(default)]
    pub disabled: Vec<String>,

    #[serde(flatten)]
    pub levels: HashMap<String, Level>,
}

/// Engine limits; unset keys keep the built-in defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub loop_bound: Option<u32>,
    pub max_steps: Option<usize>,
    pub max_inline_depth: Option<usize>,
    pub propagate_through_arithmetic: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    /// Pointer width in chars: 8 (LP64) or 4 (ILP32).
    pub pointer_width: Option<u64>,
}

impl ScaledPtrCheckConfig {
    /// Overlay the file's engine and target settings on `options`.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyzerError::Config`] for values the engine cannot run with.
    pub fn apply_to(&self, mut options: AnalyzerOptions) -> AnalyzerResult<AnalyzerOptions> {
        if let Some(n) = self.engine.loop_bound {
            options.loop_bound = n;
        }
        if let Some(n) = self.engine.max_steps {
            if n == 0 {
                return Err(AnalyzerError::config("engine.max_steps must be positive"));
            }
            options.max_steps = n;
        }
        if let Some(n) = self.engine.max_inline_depth {
            options.max_inline_depth = n;
        }
        if let Some(flag) = self.engine.propagate_through_arithmetic {
            options.propagate_through_arithmetic = flag;
        }
        if let Some(width) = self.target.pointer_width {
            if !matches!(width, 4 | 8) {
                return Err(AnalyzerError::config(format!(
                    "target.pointer_width must be 4 or 8, got {width}"
                )));
            }
            options.target.pointer_width = width;
        }
        Ok(options)
    }
}

pub const DEFAULT_CONFIG_FILE_NAME: &str = "scaled-ptr-check.toml";

pub fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
    let mut cur = Some(start_dir);
    while let Some(dir) = cur {
        let candidate = dir.join(DEFAULT_CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        cur = dir.parent();
    }
    None
}

pub fn load_config_file(path: &Path) -> Result<ScaledPtrCheckConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let cfg: ScaledPtrCheckConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    Ok(cfg)
}

pub fn load_config(
    explicit_path: Option<&Path>,
    start_dir: &Path,
) -> Result<Option<(PathBuf, ScaledPtrCheckConfig)>> {
    if let Some(p) = explicit_path {
        let cfg = load_config_file(p)?;
        return Ok(Some((p.to_path_buf(), cfg)));
    }

    let Some(p) = find_config_file(start_dir) else {
        return Ok(None);
    };
    let cfg = load_config_file(&p)?;
    Ok(Some((p, cfg)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_sections() {
        let cfg: ScaledPtrCheckConfig = toml::from_str(
            r#"
            [checkers]
            disabled = ["other"]
            bad_scaled_pointer_arithmetic = "error"

            [engine]
            loop_bound = 4
            propagate_through_arithmetic = true

            [target]
            pointer_width = 4
            "#,
        )
        .expect("valid config");
        assert_eq!(cfg.checkers.disabled, ["other"]);
        assert_eq!(
            cfg.checkers.levels.get("bad_scaled_pointer_arithmetic"),
            Some(&Level::Error)
        );

        let options = cfg.apply_to(AnalyzerOptions::default()).expect("valid options");
        assert_eq!(options.loop_bound, 4);
        assert!(options.propagate_through_arithmetic);
        assert_eq!(options.target.pointer_width, 4);
        assert_eq!(options.max_steps, AnalyzerOptions::default().max_steps);
    }

    #[test]
    fn rejects_bad_pointer_width() {
        let cfg: ScaledPtrCheckConfig = toml::from_str("[target]\npointer_width = 2\n").expect("parses");
        let err = cfg.apply_to(AnalyzerOptions::default()).unwrap_err();
        assert!(err.to_string().contains("pointer_width"));
    }

    #[test]
    fn unknown_engine_keys_are_errors() {
        let parsed: Result<ScaledPtrCheckConfig, _> = toml::from_str("[engine]\nloop_bund = 3\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn discovery_walks_up_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).expect("mkdir");
        std::fs::write(dir.path().join(DEFAULT_CONFIG_FILE_NAME), "[checkers]\n").expect("write");

        let (path, _) = load_config(None, &nested).expect("load").expect("found");
        assert_eq!(path, dir.path().join(DEFAULT_CONFIG_FILE_NAME));
    }
}
