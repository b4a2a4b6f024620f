use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde_json::json;
use time::OffsetDateTime;

use super::{Scenario, ScenarioStep, StepContext, StepEffect, apply_journaled, require_reachable};
use crate::core::{ProjectSnapshot, ProjectType, RepoState, ScenarioName};
use crate::journal::JournalEntry;

const NOTES_FILE: &str = "RELEASE_NOTES.md";

pub(super) fn scenario() -> Scenario {
    Scenario {
        name: ScenarioName::Release,
        applies_to,
        steps: vec![
            ScenarioStep::validate("check-clean-tree", check_clean_tree),
            ScenarioStep::validate("read-version", read_version),
            ScenarioStep::journaled("write-release-notes", write_release_notes),
            ScenarioStep::journaled("publish-release", publish_release),
        ],
    }
}

fn applies_to(project_type: ProjectType) -> bool {
    match project_type {
        ProjectType::PowerShellModule
        | ProjectType::PythonPackage
        | ProjectType::CSharpProject
        | ProjectType::JSProject => true,
        ProjectType::Unknown => false,
    }
}

fn check_clean_tree(snapshot: &ProjectSnapshot, _ctx: &StepContext<'_>) -> Result<StepEffect> {
    require_reachable(snapshot)?;
    match snapshot.repository {
        RepoState::Clean => Ok(StepEffect::new("作業ツリーはクリーンです")),
        RepoState::Dirty => Err(anyhow!("未コミットの変更があるためリリースできません")),
        RepoState::Unknown => Err(anyhow!(
            "リポジトリの状態が不明なためリリースできません"
        )),
    }
}

fn read_version(snapshot: &ProjectSnapshot, _ctx: &StepContext<'_>) -> Result<StepEffect> {
    let found = find_version(&snapshot.project.path, snapshot.project.project_type)?;
    Ok(StepEffect::new(format!(
        "バージョン {} を検出しました（{}）",
        found.version, found.source
    ))
    .with_payload(json!({
        "version": found.version,
        "tag": found.tag(),
        "source": found.source,
    })))
}

fn write_release_notes(snapshot: &ProjectSnapshot, ctx: &StepContext<'_>) -> Result<StepEffect> {
    let found = find_version(&snapshot.project.path, snapshot.project.project_type)?;
    let notes = render_notes(snapshot, &found);
    let path = snapshot.project.path.join(NOTES_FILE);
    let action = if path.exists() { "更新" } else { "作成" };
    let payload = json!({
        "path": NOTES_FILE,
        "tag": found.tag(),
        "bytes": notes.len(),
        "action": if path.exists() { "overwrite" } else { "create" },
    });

    if ctx.is_dry_run() {
        return Ok(StepEffect::new(format!(
            "{NOTES_FILE} を{action}します（{} bytes）",
            notes.len()
        ))
        .with_payload(payload));
    }

    apply_journaled(snapshot, ctx, "write-release-notes", |journal| {
        journal.write_file(&path, &notes)
    })?;
    Ok(StepEffect::new(format!("{NOTES_FILE} を{action}しました")).with_payload(payload))
}

fn publish_release(snapshot: &ProjectSnapshot, ctx: &StepContext<'_>) -> Result<StepEffect> {
    let repo = snapshot
        .project
        .repo
        .clone()
        .ok_or_else(|| anyhow!("repo が未設定のため公開できません（registry の repo を指定してください）"))?;
    let found = find_version(&snapshot.project.path, snapshot.project.project_type)?;
    let tag = found.tag();

    if ctx.is_dry_run() {
        return Ok(StepEffect::new(format!("{repo} にリリース {tag} を作成します"))
            .with_payload(json!({ "repo": repo, "tag": tag })));
    }

    let notes = render_notes(snapshot, &found);
    let url = ctx.remote.create_release(&repo, &tag, &notes)?;
    let recorded = apply_journaled(snapshot, ctx, "publish-release", |journal| {
        journal.record(JournalEntry::ReleasePublished {
            repo: repo.clone(),
            tag: tag.clone(),
        })
    });
    if let Err(err) = recorded {
        ctx.remote
            .delete_release(&repo, &tag)
            .context("作成したリリースを削除できませんでした")?;
        return Err(err);
    }
    Ok(StepEffect::new(format!("リリース {tag} を作成しました: {url}"))
        .with_payload(json!({ "repo": repo, "tag": tag, "url": url })))
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FoundVersion {
    version: String,
    source: String,
}

impl FoundVersion {
    fn tag(&self) -> String {
        format!("v{}", self.version)
    }
}

fn render_notes(snapshot: &ProjectSnapshot, found: &FoundVersion) -> String {
    let date = OffsetDateTime::now_utc().date();
    format!(
        "# {} {}\n\n- リリース日: {date}\n- 種別: {}\n- バージョン定義: {}\n",
        snapshot.project.id,
        found.tag(),
        snapshot.project.project_type,
        found.source
    )
}

fn find_version(root: &Path, project_type: ProjectType) -> Result<FoundVersion> {
    let (file, version) = match project_type {
        ProjectType::PowerShellModule => {
            let file = first_with_extension(root, "psd1")?;
            let body = read(&file)?;
            (file, psd1_version(&body))
        }
        ProjectType::PythonPackage => {
            let file = root.join("pyproject.toml");
            let body = read(&file)?;
            (file, pyproject_version(&body)?)
        }
        ProjectType::CSharpProject => {
            let file = first_with_extension(root, "csproj")?;
            let body = read(&file)?;
            (file, csproj_version(&body))
        }
        ProjectType::JSProject => {
            let file = root.join("package.json");
            let body = read(&file)?;
            (file, package_json_version(&body)?)
        }
        ProjectType::Unknown => {
            return Err(anyhow!("種別 Unknown のプロジェクトはバージョンを持ちません"));
        }
    };
    let source = super::display_rel(root, &file);
    let version = version.ok_or_else(|| anyhow!("バージョンが見つかりません: {source}"))?;
    Ok(FoundVersion { version, source })
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("ファイルを読み取れません: {}", path.display()))
}

fn first_with_extension(root: &Path, ext: &str) -> Result<PathBuf> {
    let mut found: Vec<PathBuf> = std::fs::read_dir(root)
        .with_context(|| format!("ディレクトリを読み取れません: {}", root.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case(ext))
        })
        .collect();
    found.sort();
    found
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("*.{ext} が見つかりません: {}", root.display()))
}

fn psd1_version(body: &str) -> Option<String> {
    body.lines().find_map(|line| {
        let (key, value) = line.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("ModuleVersion") {
            return None;
        }
        let v = value.trim().trim_matches(|c| c == '\'' || c == '"').trim();
        (!v.is_empty()).then(|| v.to_string())
    })
}

fn pyproject_version(body: &str) -> Result<Option<String>> {
    let doc: toml::Value = toml::from_str(body).context("pyproject.toml の解析に失敗しました")?;
    let version = doc
        .get("project")
        .and_then(|p| p.get("version"))
        .or_else(|| {
            doc.get("tool")
                .and_then(|t| t.get("poetry"))
                .and_then(|p| p.get("version"))
        })
        .and_then(|v| v.as_str())
        .map(str::to_string);
    Ok(version)
}

fn csproj_version(body: &str) -> Option<String> {
    let start = body.find("<Version>")? + "<Version>".len();
    let end = body[start..].find("</Version>")? + start;
    let v = body[start..end].trim();
    (!v.is_empty()).then(|| v.to_string())
}

fn package_json_version(body: &str) -> Result<Option<String>> {
    let doc: serde_json::Value =
        serde_json::from_str(body).context("package.json の解析に失敗しました")?;
    Ok(doc.get("version").and_then(|v| v.as_str()).map(str::to_string))
}
