use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

use crate::core::{ProjectRef, ProjectType};

/// Read-only, validated list of projects. Entries keep the order of the source
/// artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct Registry {
    projects: Vec<ProjectRef>,
    source: Option<PathBuf>,
}

/// `[[project]]` tables (TOML) or `{ "project": [...] }` (JSON).
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTable {
    #[serde(default)]
    project: Vec<RawEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEntry {
    id: String,
    path: String,
    #[serde(rename = "type")]
    project_type: String,
    #[serde(default)]
    repo: Option<String>,
}

/// A JSON registry is either a bare array of entries or a table with a
/// `project` array. The shape is picked first so that serde reports the
/// offending field instead of a failed variant match.
fn parse_json_entries(s: &str) -> Result<Vec<RawEntry>> {
    let value: serde_json::Value = serde_json::from_str(s)?;
    let entries = if value.is_array() {
        serde_json::from_value(value)?
    } else {
        serde_json::from_value::<RawTable>(value)?.project
    };
    Ok(entries)
}

/// Which registry entries a command should touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Ids(Vec<String>),
}

impl Selection {
    pub fn from_ids(ids: Vec<String>) -> Self {
        if ids.is_empty() {
            Selection::All
        } else {
            Selection::Ids(ids)
        }
    }
}

impl Registry {
    pub fn from_entries(projects: Vec<ProjectRef>) -> Result<Self> {
        validate_entries(&projects)?;
        Ok(Self {
            projects,
            source: None,
        })
    }

    pub fn load(path: &Path, home_dir: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| {
            format!("レジストリの読み取りに失敗しました: {}", path.display())
        })?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let entries = if is_json {
            parse_json_entries(&s).context("レジストリ(JSON)の解析に失敗しました")?
        } else {
            toml::from_str::<RawTable>(&s)
                .context("レジストリ(TOML)の解析に失敗しました")?
                .project
        };

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut projects = Vec::with_capacity(entries.len());
        for entry in entries {
            let project_type = entry
                .project_type
                .parse::<ProjectType>()
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("レジストリ項目 `{}`", entry.id))?;
            let expanded = crate::platform::expand_tilde(&entry.path, home_dir);
            let path = if expanded.is_absolute() {
                expanded
            } else {
                base_dir.join(expanded)
            };
            projects.push(ProjectRef {
                id: entry.id.trim().to_string(),
                project_type,
                path,
                repo: entry
                    .repo
                    .map(|r| r.trim().to_string())
                    .filter(|r| !r.is_empty()),
            });
        }

        validate_entries(&projects)
            .with_context(|| format!("レジストリ: {}", path.display()))?;
        Ok(Self {
            projects,
            source: Some(path.to_path_buf()),
        })
    }

    pub fn projects(&self) -> &[ProjectRef] {
        &self.projects
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn get(&self, id: &str) -> Option<&ProjectRef> {
        self.projects.iter().find(|p| p.id == id)
    }

    /// Resolves a selection to registry entries. Unknown ids are rejected up
    /// front so that no project is touched on a bad request.
    pub fn select(&self, selection: &Selection) -> Result<Vec<ProjectRef>> {
        match selection {
            Selection::All => Ok(self.projects.clone()),
            Selection::Ids(ids) => {
                let unknown: Vec<&str> = ids
                    .iter()
                    .map(String::as_str)
                    .filter(|id| self.get(id).is_none())
                    .collect();
                if !unknown.is_empty() {
                    return Err(anyhow!(
                        "レジストリに存在しないプロジェクトです: {}",
                        unknown.join(", ")
                    ));
                }
                let wanted: BTreeSet<&str> = ids.iter().map(String::as_str).collect();
                Ok(self
                    .projects
                    .iter()
                    .filter(|p| wanted.contains(p.id.as_str()))
                    .cloned()
                    .collect())
            }
        }
    }
}

fn validate_entries(projects: &[ProjectRef]) -> Result<()> {
    if projects.is_empty() {
        return Err(anyhow!("レジストリが空です（[[project]] を1件以上定義してください）"));
    }
    let mut seen = BTreeSet::new();
    for p in projects {
        if p.id.is_empty() {
            return Err(anyhow!("プロジェクトIDが空です: {}", p.path.display()));
        }
        if !seen.insert(p.id.as_str()) {
            return Err(anyhow!("プロジェクトIDが重複しています: {}", p.id));
        }
        if p.path.as_os_str().is_empty() {
            return Err(anyhow!("プロジェクトのパスが空です: {}", p.id));
        }
    }
    Ok(())
}
