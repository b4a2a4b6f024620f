use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
    pub registry: RegistryConfig,
    pub run: RunConfig,
    pub scoring: ScoringConfig,
    pub inspect: InspectConfig,
    pub report: ReportConfig,
    pub ui: UiConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoringConfig {
    pub issue_fraction_threshold: f64,
    pub stale_after_days: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InspectConfig {
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportConfig {
    pub persist: bool,
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct UiConfig {
    pub color: bool,
    pub max_table_rows: usize,
}

impl EffectiveConfig {
    pub fn defaults(home_dir: &Path) -> Self {
        Self {
            config_path: None,
            registry: RegistryConfig {
                path: home_dir.join(".config/projorch/registry.toml"),
            },
            run: RunConfig { workers: 4 },
            scoring: ScoringConfig {
                issue_fraction_threshold: 0.5,
                stale_after_days: 180,
            },
            inspect: InspectConfig {
                exclude: vec![
                    "**/.git/**".to_string(),
                    "**/.projorch/**".to_string(),
                    "**/node_modules/**".to_string(),
                ],
            },
            report: ReportConfig {
                persist: true,
                dir: home_dir.join(".config/projorch/reports"),
            },
            ui: UiConfig {
                color: true,
                max_table_rows: 20,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    registry: Option<RawRegistryConfig>,
    run: Option<RawRunConfig>,
    scoring: Option<RawScoringConfig>,
    inspect: Option<RawInspectConfig>,
    report: Option<RawReportConfig>,
    ui: Option<RawUiConfig>,
}

#[derive(Debug, Deserialize)]
struct RawRegistryConfig {
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRunConfig {
    workers: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawScoringConfig {
    issue_fraction_threshold: Option<f64>,
    stale_after_days: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawInspectConfig {
    exclude: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawReportConfig {
    persist: Option<bool>,
    dir: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawUiConfig {
    color: Option<bool>,
    max_table_rows: Option<usize>,
}

pub fn default_config_path(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/projorch/config.toml")
}

pub fn load(config_path: Option<&Path>, home_dir: &Path) -> Result<EffectiveConfig> {
    let mut cfg = EffectiveConfig::defaults(home_dir);

    let path = config_path
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| default_config_path(home_dir));

    if path.exists() {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("設定ファイルの読み取りに失敗しました: {}", path.display()))?;
        let raw: RawConfig =
            toml::from_str(&s).context("設定ファイル(TOML)の解析に失敗しました")?;
        apply_raw_config(&mut cfg, raw, home_dir);
        cfg.config_path = Some(path.display().to_string());
    } else if config_path.is_some() {
        return Err(anyhow!("設定ファイルが見つかりません: {}", path.display()));
    }

    apply_env_overrides(&mut cfg, home_dir, |key| std::env::var(key).ok())?;
    validate(&cfg)?;

    Ok(cfg)
}

fn apply_raw_config(cfg: &mut EffectiveConfig, raw: RawConfig, home_dir: &Path) {
    if let Some(registry) = raw.registry {
        if let Some(path) = registry.path {
            cfg.registry.path = crate::platform::expand_tilde(&path, home_dir);
        }
    }

    if let Some(run) = raw.run {
        if let Some(workers) = run.workers {
            cfg.run.workers = workers;
        }
    }

    if let Some(scoring) = raw.scoring {
        if let Some(threshold) = scoring.issue_fraction_threshold {
            cfg.scoring.issue_fraction_threshold = threshold;
        }
        if let Some(days) = scoring.stale_after_days {
            cfg.scoring.stale_after_days = days;
        }
    }

    if let Some(inspect) = raw.inspect {
        if let Some(exclude) = inspect.exclude {
            cfg.inspect.exclude = exclude;
        }
    }

    if let Some(report) = raw.report {
        if let Some(persist) = report.persist {
            cfg.report.persist = persist;
        }
        if let Some(dir) = report.dir {
            cfg.report.dir = crate::platform::expand_tilde(&dir, home_dir);
        }
    }

    if let Some(ui) = raw.ui {
        if let Some(color) = ui.color {
            cfg.ui.color = color;
        }
        if let Some(max_table_rows) = ui.max_table_rows {
            cfg.ui.max_table_rows = max_table_rows;
        }
    }
}

fn apply_env_overrides(
    cfg: &mut EffectiveConfig,
    home_dir: &Path,
    var: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(v) = var("PROJORCH_REGISTRY") {
        let v = v.trim();
        if !v.is_empty() {
            cfg.registry.path = crate::platform::expand_tilde(v, home_dir);
        }
    }
    if let Some(v) = var("PROJORCH_RUN_WORKERS") {
        cfg.run.workers = v
            .trim()
            .parse::<usize>()
            .with_context(|| "PROJORCH_RUN_WORKERS")?;
    }
    if let Some(v) = var("PROJORCH_SCORING_ISSUE_FRACTION_THRESHOLD") {
        cfg.scoring.issue_fraction_threshold = v
            .trim()
            .parse::<f64>()
            .with_context(|| "PROJORCH_SCORING_ISSUE_FRACTION_THRESHOLD")?;
    }
    if let Some(v) = var("PROJORCH_SCORING_STALE_AFTER_DAYS") {
        cfg.scoring.stale_after_days = v
            .trim()
            .parse::<u64>()
            .with_context(|| "PROJORCH_SCORING_STALE_AFTER_DAYS")?;
    }
    if let Some(v) = var("PROJORCH_INSPECT_EXCLUDE") {
        let parts: Vec<String> = v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();
        if !parts.is_empty() {
            cfg.inspect.exclude = parts;
        }
    }
    if let Some(v) = var("PROJORCH_REPORT_PERSIST") {
        cfg.report.persist = parse_bool(&v).with_context(|| "PROJORCH_REPORT_PERSIST")?;
    }
    if let Some(v) = var("PROJORCH_REPORT_DIR") {
        let v = v.trim();
        if !v.is_empty() {
            cfg.report.dir = crate::platform::expand_tilde(v, home_dir);
        }
    }
    if let Some(v) = var("PROJORCH_UI_COLOR") {
        cfg.ui.color = parse_bool(&v).with_context(|| "PROJORCH_UI_COLOR")?;
    }
    if let Some(v) = var("PROJORCH_UI_MAX_TABLE_ROWS") {
        cfg.ui.max_table_rows = v
            .trim()
            .parse::<usize>()
            .with_context(|| "PROJORCH_UI_MAX_TABLE_ROWS")?;
    }

    Ok(())
}

pub fn validate(cfg: &EffectiveConfig) -> Result<()> {
    let threshold = cfg.scoring.issue_fraction_threshold;
    if !(0.0..=1.0).contains(&threshold) {
        return Err(anyhow!(
            "scoring.issue_fraction_threshold は 0.0〜1.0 で指定してください（指定値: {threshold}）"
        ));
    }
    if cfg.run.workers == 0 {
        return Err(anyhow!("run.workers は 1 以上で指定してください"));
    }
    crate::inspect::build_exclude_set(&cfg.inspect.exclude)?;
    Ok(())
}

fn parse_bool(s: &str) -> Result<bool> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!(
            "真偽値が不正です: {s}（true|false|1|0|yes|no|on|off を指定してください）"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn home() -> PathBuf {
        PathBuf::from("/home/test")
    }

    #[test]
    fn file_values_override_defaults() {
        let mut cfg = EffectiveConfig::defaults(&home());
        let raw: RawConfig = toml::from_str(
            r#"
[registry]
path = "~/work/registry.toml"

[run]
workers = 2

[scoring]
issue_fraction_threshold = 0.25
"#,
        )
        .expect("parse");
        apply_raw_config(&mut cfg, raw, &home());
        assert_eq!(cfg.registry.path, home().join("work/registry.toml"));
        assert_eq!(cfg.run.workers, 2);
        assert_eq!(cfg.scoring.issue_fraction_threshold, 0.25);
        assert_eq!(cfg.scoring.stale_after_days, 180);
    }

    #[test]
    fn env_overrides_beat_file_values() {
        let mut cfg = EffectiveConfig::defaults(&home());
        cfg.run.workers = 2;
        let env: HashMap<&str, &str> = [
            ("PROJORCH_RUN_WORKERS", "8"),
            ("PROJORCH_INSPECT_EXCLUDE", "**/target/**, **/dist/**"),
            ("PROJORCH_REPORT_PERSIST", "off"),
        ]
        .into_iter()
        .collect();
        apply_env_overrides(&mut cfg, &home(), |k| env.get(k).map(|v| v.to_string()))
            .expect("overrides");
        assert_eq!(cfg.run.workers, 8);
        assert_eq!(cfg.inspect.exclude, vec!["**/target/**", "**/dist/**"]);
        assert!(!cfg.report.persist);
    }

    #[test]
    fn invalid_env_bool_is_an_error() {
        let mut cfg = EffectiveConfig::defaults(&home());
        let err = apply_env_overrides(&mut cfg, &home(), |k| {
            (k == "PROJORCH_UI_COLOR").then(|| "maybe".to_string())
        })
        .unwrap_err();
        assert!(format!("{err:#}").contains("PROJORCH_UI_COLOR"));
    }

    #[test]
    fn threshold_outside_unit_interval_is_rejected() {
        let mut cfg = EffectiveConfig::defaults(&home());
        cfg.scoring.issue_fraction_threshold = 1.5;
        assert!(validate(&cfg).is_err());
        cfg.scoring.issue_fraction_threshold = 1.0;
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut cfg = EffectiveConfig::defaults(&home());
        cfg.run.workers = 0;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn unknown_sections_are_rejected() {
        assert!(toml::from_str::<RawConfig>("[nope]\nx = 1\n").is_err());
    }
}
