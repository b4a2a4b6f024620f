use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde_json::json;

use super::{
    Scenario, ScenarioStep, StepContext, StepEffect, apply_journaled, display_rel, require_reachable,
};
use crate::core::{ProjectSnapshot, ProjectType, ScenarioName};
use crate::inspect;

const INDEX_FILE: &str = "docs/INDEX.md";

pub(super) fn scenario() -> Scenario {
    Scenario {
        name: ScenarioName::DocSync,
        applies_to,
        steps: vec![
            ScenarioStep::validate("check-docs", check_docs),
            ScenarioStep::journaled("normalize-markdown", normalize_markdown),
            ScenarioStep::journaled("write-docs-index", write_docs_index),
            ScenarioStep::report("report-docs", report_docs),
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

fn check_docs(snapshot: &ProjectSnapshot, _ctx: &StepContext<'_>) -> Result<StepEffect> {
    require_reachable(snapshot)?;
    if !snapshot.project.path.join("README.md").is_file() {
        return Err(anyhow!("README.md がありません"));
    }
    Ok(StepEffect::new("README.md を確認しました"))
}

fn normalize_markdown(snapshot: &ProjectSnapshot, ctx: &StepContext<'_>) -> Result<StepEffect> {
    let root = &snapshot.project.path;
    let mut changes: Vec<(PathBuf, String, usize)> = Vec::new();
    for path in markdown_files(root, ctx)? {
        let body = std::fs::read_to_string(&path)
            .with_context(|| format!("ファイルを読み取れません: {}", path.display()))?;
        let (fixed, inserted) = normalize(&body);
        if inserted > 0 {
            changes.push((path, fixed, inserted));
        }
    }

    let payload = json!({
        "files": changes
            .iter()
            .map(|(p, _, n)| json!({ "path": display_rel(root, p), "inserted_lines": n }))
            .collect::<Vec<_>>(),
    });
    if changes.is_empty() {
        return Ok(StepEffect::new("整形が必要な Markdown はありません").with_payload(payload));
    }
    if ctx.is_dry_run() {
        return Ok(StepEffect::new(format!(
            "{} 件の Markdown を整形します",
            changes.len()
        ))
        .with_payload(payload));
    }

    apply_journaled(snapshot, ctx, "normalize-markdown", |journal| {
        for (path, fixed, _) in &changes {
            journal.write_file(path, fixed)?;
        }
        Ok(())
    })?;
    Ok(StepEffect::new(format!("{} 件の Markdown を整形しました", changes.len()))
        .with_payload(payload))
}

fn write_docs_index(snapshot: &ProjectSnapshot, ctx: &StepContext<'_>) -> Result<StepEffect> {
    let root = &snapshot.project.path;
    let index_path = root.join(INDEX_FILE);
    let entries: Vec<String> = markdown_files(root, ctx)?
        .iter()
        .map(|p| display_rel(root, p))
        .filter(|rel| rel != INDEX_FILE)
        .collect();
    let body = render_index(&entries);

    let current = std::fs::read_to_string(&index_path).ok();
    let action = match current.as_deref() {
        Some(existing) if existing == body => "unchanged",
        Some(_) => "overwrite",
        None => "create",
    };
    let payload = json!({ "path": INDEX_FILE, "entries": entries.len(), "action": action });

    if action == "unchanged" {
        return Ok(StepEffect::new(format!("{INDEX_FILE} は最新です")).with_payload(payload));
    }
    if ctx.is_dry_run() {
        return Ok(StepEffect::new(format!(
            "{INDEX_FILE} を書き出します（{} 件）",
            entries.len()
        ))
        .with_payload(payload));
    }

    apply_journaled(snapshot, ctx, "write-docs-index", |journal| {
        journal.write_file(&index_path, &body)
    })?;
    Ok(StepEffect::new(format!(
        "{INDEX_FILE} を書き出しました（{} 件）",
        entries.len()
    ))
    .with_payload(payload))
}

fn report_docs(snapshot: &ProjectSnapshot, ctx: &StepContext<'_>) -> Result<StepEffect> {
    let count = markdown_files(&snapshot.project.path, ctx)?.len();
    Ok(StepEffect::new(format!("Markdown {count} 件"))
        .with_payload(json!({ "markdown_files": count })))
}

fn markdown_files(root: &Path, ctx: &StepContext<'_>) -> Result<Vec<PathBuf>> {
    let exclude = inspect::build_exclude_set(&["**/node_modules/**".to_string()])?;
    let mut files = Vec::new();
    let stats = inspect::walk_files(root, &exclude, ctx.deadline(), |entry| {
        let is_md = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("md"));
        if is_md {
            files.push(entry.path().to_path_buf());
        }
    });
    if stats.truncated {
        return Err(ctx.timed_out());
    }
    Ok(files)
}

/// Inserts a blank line between a `#### ` heading (or a line ending in `**:`)
/// and a task-list item that directly follows it. Returns the new text and the
/// number of inserted lines.
pub(crate) fn normalize(body: &str) -> (String, usize) {
    let lines: Vec<&str> = body.split('\n').collect();
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    let mut inserted = 0;
    for (i, line) in lines.iter().copied().enumerate() {
        out.push(line);
        let opens_list = line.starts_with("#### ") || line.trim_end().ends_with("**:");
        let next_is_task = lines.get(i + 1).is_some_and(|n| n.starts_with("- ["));
        if opens_list && next_is_task {
            out.push("");
            inserted += 1;
        }
    }
    (out.join("\n"), inserted)
}

fn render_index(entries: &[String]) -> String {
    let mut s = String::from("# Documentation Index\n\n");
    for rel in entries {
        let link = match rel.strip_prefix("docs/") {
            Some(inside) => inside.to_string(),
            None => format!("../{rel}"),
        };
        s.push_str(&format!("- [{rel}]({link})\n"));
    }
    s
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::super::testing::{snapshot, temp_root, write};
    use super::*;
    use crate::core::{RepoState, RunMode};
    use crate::remote::OfflineRemote;
    use crate::scenarios::{JournalInverse, StepAction};

    fn ctx(mode: RunMode) -> StepContext<'static> {
        StepContext {
            run_id: "d1",
            mode,
            timeout: Duration::from_secs(5),
            remote: &OfflineRemote,
        }
    }

    #[test]
    fn normalize_inserts_blank_line_before_task_lists() {
        let input = "#### Sprint 1\n- [ ] a\n\n**Deliverables**:\n- [x] b\n#### Done\n\n- [ ] c";
        let (fixed, inserted) = normalize(input);
        assert_eq!(inserted, 2);
        assert_eq!(
            fixed,
            "#### Sprint 1\n\n- [ ] a\n\n**Deliverables**:\n\n- [x] b\n#### Done\n\n- [ ] c"
        );
        assert_eq!(normalize(&fixed), (fixed.clone(), 0));
    }

    #[test]
    fn index_links_are_relative_to_docs_dir() {
        let body = render_index(&["README.md".to_string(), "docs/guide.md".to_string()]);
        assert!(body.contains("- [README.md](../README.md)\n"));
        assert!(body.contains("- [docs/guide.md](guide.md)\n"));
    }

    #[test]
    fn live_doc_sync_is_reversible() {
        let root = temp_root("docsync");
        write(&root.join("README.md"), "# x\n#### Tasks\n- [ ] one\n");
        write(&root.join("docs/guide.md"), "guide\n");
        let snap = snapshot(&root, ProjectType::PythonPackage, RepoState::Clean);
        let live = ctx(RunMode::Live);

        check_docs(&snap, &live).unwrap();
        normalize_markdown(&snap, &live).unwrap();
        write_docs_index(&snap, &live).unwrap();
        assert_eq!(
            std::fs::read_to_string(root.join("README.md")).unwrap(),
            "# x\n#### Tasks\n\n- [ ] one\n"
        );
        assert!(root.join(INDEX_FILE).exists());

        JournalInverse {
            step: "write-docs-index",
        }
        .run(&snap, &live)
        .unwrap();
        JournalInverse {
            step: "normalize-markdown",
        }
        .run(&snap, &live)
        .unwrap();
        assert!(!root.join(INDEX_FILE).exists());
        assert_eq!(
            std::fs::read_to_string(root.join("README.md")).unwrap(),
            "# x\n#### Tasks\n- [ ] one\n"
        );

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn markdown_walk_honours_the_time_limit() {
        let root = temp_root("docsync-timeout");
        write(&root.join("README.md"), "#### Tasks\n- [ ] one\n");
        let snap = snapshot(&root, ProjectType::PythonPackage, RepoState::Clean);
        let expired = StepContext {
            timeout: Duration::ZERO,
            ..ctx(RunMode::Live)
        };
        let err = normalize_markdown(&snap, &expired).unwrap_err();
        assert!(err.to_string().contains("時間制限"), "{err}");
        assert_eq!(
            std::fs::read_to_string(root.join("README.md")).unwrap(),
            "#### Tasks\n- [ ] one\n"
        );
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn missing_readme_fails_validation() {
        let root = temp_root("docsync-noreadme");
        let snap = snapshot(&root, ProjectType::JSProject, RepoState::Clean);
        assert!(check_docs(&snap, &ctx(RunMode::Live)).is_err());
        let _ = std::fs::remove_dir_all(&root);
    }
}
