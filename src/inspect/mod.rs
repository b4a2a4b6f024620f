use std::io::ErrorKind;
use std::path::Path;
use std::time::{Duration, Instant, SystemTime};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use walkdir::{DirEntry, WalkDir};

use crate::core::{Issue, IssueCategory, ProjectRef, ProjectSnapshot, RepoState, Severity};
use crate::platform;
use crate::workers::{self, CancelToken};

/// Reports whether a project root is a clean working tree.
pub trait RepoProbe: Send + Sync {
    /// `Ok(None)` when the root is not a repository.
    fn is_clean(&self, root: &Path, timeout: Duration) -> Result<Option<bool>>;
}

/// `git status` through the timeout-bounded runner. Uses `--no-optional-locks`
/// so that inspection never writes to the repository.
#[derive(Debug, Clone, Default)]
pub struct GitCliProbe;

impl RepoProbe for GitCliProbe {
    fn is_clean(&self, root: &Path, timeout: Duration) -> Result<Option<bool>> {
        let root_s = root.display().to_string();
        let out = platform::run_command(
            "git",
            &[
                "--no-optional-locks",
                "-C",
                root_s.as_str(),
                "status",
                "--porcelain",
            ],
            timeout,
        )?;
        if out.success() {
            return Ok(Some(out.stdout.trim().is_empty()));
        }
        if out.stderr.to_ascii_lowercase().contains("not a git repository") {
            return Ok(None);
        }
        Err(anyhow::anyhow!(
            "git status が失敗しました（exit_code={}）: {}",
            out.exit_code,
            out.stderr.trim()
        ))
    }
}

#[derive(Debug, Clone)]
pub struct InspectOptions {
    pub timeout: Duration,
    pub exclude: Vec<String>,
    pub stale_after_days: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WalkStats {
    pub files: u64,
    pub errors: u64,
    pub access_denied: u64,
    pub truncated: bool,
}

pub fn build_exclude_set(excludes: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in ["**/.projorch", "**/.projorch/**", "**/.git", "**/.git/**"] {
        builder.add(Glob::new(pat).with_context(|| format!("exclude glob が不正です: {pat}"))?);
    }
    for pat in excludes {
        builder.add(Glob::new(pat).with_context(|| format!("exclude glob が不正です: {pat}"))?);
        // `dir/**` also prunes `dir` itself so the walk never descends into it.
        if let Some(dir) = pat.strip_suffix("/**") {
            if !dir.is_empty() {
                builder
                    .add(Glob::new(dir).with_context(|| format!("exclude glob が不正です: {pat}"))?);
            }
        }
    }
    Ok(builder.build()?)
}

/// Walks regular files under `root`, skipping excluded entries (matched against
/// the path relative to `root`). Stops early once `deadline` passes.
pub fn walk_files(
    root: &Path,
    exclude: &GlobSet,
    deadline: Option<Instant>,
    mut on_file: impl FnMut(&DirEntry),
) -> WalkStats {
    let mut stats = WalkStats::default();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| match e.path().strip_prefix(root) {
            Ok(rel) => rel.as_os_str().is_empty() || !exclude.is_match(rel),
            Err(_) => true,
        });

    for entry in walker {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            stats.truncated = true;
            break;
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                stats.errors = stats.errors.saturating_add(1);
                if err
                    .io_error()
                    .is_some_and(|e| e.kind() == ErrorKind::PermissionDenied)
                {
                    stats.access_denied = stats.access_denied.saturating_add(1);
                }
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        stats.files = stats.files.saturating_add(1);
        on_file(&entry);
    }
    stats
}

pub struct Inspector<'a> {
    opts: InspectOptions,
    exclude: GlobSet,
    probe: &'a dyn RepoProbe,
}

impl<'a> Inspector<'a> {
    pub fn new(opts: InspectOptions, probe: &'a dyn RepoProbe) -> Result<Self> {
        let exclude = build_exclude_set(&opts.exclude)?;
        Ok(Self {
            opts,
            exclude,
            probe,
        })
    }

    /// Inspects every project on at most `workers` threads. Output order follows
    /// `projects`.
    pub fn inspect_all(
        &self,
        projects: &[ProjectRef],
        workers: usize,
        cancel: &CancelToken,
    ) -> Vec<ProjectSnapshot> {
        workers::run_bounded(projects.iter().collect(), workers, cancel, |p| {
            self.inspect(p)
        })
    }

    /// Read-only, single pass over the project root. Never fails: environmental
    /// problems end up as issues on the snapshot.
    pub fn inspect(&self, project: &ProjectRef) -> ProjectSnapshot {
        let _span = tracing::debug_span!("inspect", project = %project.id).entered();
        let root = project.path.as_path();
        let mut issues = Vec::new();

        let meta = match std::fs::metadata(root) {
            Ok(meta) => meta,
            Err(err) => {
                let (exists, issue) = match err.kind() {
                    ErrorKind::NotFound => (
                        false,
                        Issue::new(
                            IssueCategory::Unreachable,
                            Severity::Warning,
                            format!("ルートパスが存在しません: {}", root.display()),
                        ),
                    ),
                    ErrorKind::PermissionDenied => (
                        true,
                        Issue::new(
                            IssueCategory::AccessDenied,
                            Severity::Error,
                            format!("ルートパスへのアクセスが拒否されました: {}", root.display()),
                        ),
                    ),
                    _ => (
                        true,
                        Issue::new(
                            IssueCategory::Unreachable,
                            Severity::Warning,
                            format!("ルートパスを読み取れません: {}: {err}", root.display()),
                        ),
                    ),
                };
                tracing::warn!(project = %project.id, error = %err, "project root is unreachable");
                issues.push(issue);
                return unreachable_snapshot(project, exists, issues);
            }
        };
        if !meta.is_dir() {
            issues.push(Issue::new(
                IssueCategory::Unreachable,
                Severity::Warning,
                format!("ルートパスがディレクトリではありません: {}", root.display()),
            ));
            return unreachable_snapshot(project, true, issues);
        }

        let deadline = Instant::now() + self.opts.timeout;
        let extensions = project.project_type.script_extensions();
        let mut script_count: u64 = 0;
        let mut newest: Option<SystemTime> = meta.modified().ok();

        let stats = walk_files(root, &self.exclude, Some(deadline), |entry| {
            let is_script = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)));
            if is_script {
                script_count = script_count.saturating_add(1);
            }
            if let Some(modified) = entry.metadata().ok().and_then(|m| m.modified().ok()) {
                if newest.is_none_or(|n| modified > n) {
                    newest = Some(modified);
                }
            }
        });

        if stats.errors > 0 {
            issues.push(Issue::new(
                IssueCategory::AccessDenied,
                Severity::Warning,
                format!(
                    "{} 件のエントリを読み取れませんでした（権限拒否 {} 件）",
                    stats.errors, stats.access_denied
                ),
            ));
        }
        if stats.truncated {
            issues.push(Issue::new(
                IssueCategory::InspectionTruncated,
                Severity::Warning,
                format!(
                    "時間制限（{:?}）に達したため走査を打ち切りました（files={}）",
                    self.opts.timeout, stats.files
                ),
            ));
        }

        let repo_timeout = deadline
            .saturating_duration_since(Instant::now())
            .max(Duration::from_millis(500));
        let repository = match self.probe.is_clean(root, repo_timeout) {
            Ok(Some(true)) => RepoState::Clean,
            Ok(Some(false)) => {
                issues.push(Issue::new(
                    IssueCategory::UncommittedChanges,
                    Severity::Warning,
                    "未コミットの変更があります",
                ));
                RepoState::Dirty
            }
            Ok(None) => {
                issues.push(Issue::new(
                    IssueCategory::NotARepository,
                    Severity::Info,
                    "リポジトリではありません",
                ));
                RepoState::Unknown
            }
            Err(err) => {
                issues.push(Issue::new(
                    IssueCategory::RepositoryProbeFailed,
                    Severity::Warning,
                    format!("リポジトリ状態を取得できませんでした: {err:#}"),
                ));
                RepoState::Unknown
            }
        };

        if let Some(newest) = newest {
            let stale_after = Duration::from_secs(self.opts.stale_after_days.saturating_mul(86_400));
            let age = SystemTime::now().duration_since(newest).unwrap_or_default();
            if self.opts.stale_after_days > 0 && age > stale_after {
                issues.push(Issue::new(
                    IssueCategory::StaleActivity,
                    Severity::Info,
                    format!(
                        "最終更新から {} 日以上経過しています",
                        self.opts.stale_after_days
                    ),
                ));
            }
        }

        issues.sort();
        ProjectSnapshot {
            project: project.clone(),
            exists: true,
            reachable: true,
            repository,
            file_count: stats.files,
            script_count,
            last_modified: newest.map(format_system_time),
            issues,
        }
    }
}

fn unreachable_snapshot(project: &ProjectRef, exists: bool, issues: Vec<Issue>) -> ProjectSnapshot {
    ProjectSnapshot {
        project: project.clone(),
        exists,
        reachable: false,
        repository: RepoState::Unknown,
        file_count: 0,
        script_count: 0,
        last_modified: None,
        issues,
    }
}

fn format_system_time(t: SystemTime) -> String {
    OffsetDateTime::from(t)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;
    use crate::core::ProjectType;

    struct FixedProbe(Option<bool>);

    impl RepoProbe for FixedProbe {
        fn is_clean(&self, _root: &Path, _timeout: Duration) -> Result<Option<bool>> {
            Ok(self.0)
        }
    }

    struct FailingProbe;

    impl RepoProbe for FailingProbe {
        fn is_clean(&self, _root: &Path, timeout: Duration) -> Result<Option<bool>> {
            Err(anyhow::anyhow!("タイムアウトしました（{timeout:?}）: git"))
        }
    }

    fn opts() -> InspectOptions {
        InspectOptions {
            timeout: Duration::from_secs(10),
            exclude: vec!["**/node_modules/**".to_string()],
            stale_after_days: 0,
        }
    }

    fn temp_root() -> PathBuf {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!(
            "projorch-inspect-test-{}-{seq}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write(path: &Path, body: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    #[test]
    fn missing_root_yields_unreachable_snapshot() {
        let probe = FixedProbe(Some(true));
        let inspector = Inspector::new(opts(), &probe).unwrap();
        let project = ProjectRef::new("gone", ProjectType::PythonPackage, "/nonexistent/projorch/x");
        let snap = inspector.inspect(&project);
        assert!(!snap.exists);
        assert!(!snap.reachable);
        assert!(snap.has_issue(IssueCategory::Unreachable));
        assert_eq!(snap.repository, RepoState::Unknown);
    }

    #[test]
    fn counts_scripts_by_project_type_and_skips_excluded_dirs() {
        let root = temp_root();
        write(&root.join("Module.psm1"), "function X {}");
        write(&root.join("Module.psd1"), "@{ ModuleVersion = '1.0.0' }");
        write(&root.join("tools/build.ps1"), "Write-Host hi");
        write(&root.join("README.md"), "# x");
        write(&root.join("node_modules/dep/index.ps1"), "ignored");
        write(&root.join(".projorch/journal/run/step.json"), "{}");

        let probe = FixedProbe(Some(true));
        let inspector = Inspector::new(opts(), &probe).unwrap();
        let project = ProjectRef::new("A", ProjectType::PowerShellModule, &root);
        let snap = inspector.inspect(&project);

        assert!(snap.reachable);
        assert_eq!(snap.file_count, 4);
        assert_eq!(snap.script_count, 3);
        assert_eq!(snap.repository, RepoState::Clean);
        assert!(snap.last_modified.is_some());
        assert!(snap.issues.is_empty(), "issues={:?}", snap.issues);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn dirty_tree_and_probe_failures_become_issues() {
        let root = temp_root();
        write(&root.join("a.py"), "print(1)");
        let project = ProjectRef::new("B", ProjectType::PythonPackage, &root);

        let dirty = FixedProbe(Some(false));
        let snap = Inspector::new(opts(), &dirty).unwrap().inspect(&project);
        assert_eq!(snap.repository, RepoState::Dirty);
        assert!(snap.has_issue(IssueCategory::UncommittedChanges));

        let snap = Inspector::new(opts(), &FailingProbe).unwrap().inspect(&project);
        assert_eq!(snap.repository, RepoState::Unknown);
        assert!(snap.has_issue(IssueCategory::RepositoryProbeFailed));
        assert!(snap.reachable);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn inspection_does_not_modify_the_tree() {
        let root = temp_root();
        write(&root.join("src/app.js"), "console.log(1)");
        let before: Vec<PathBuf> = WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok().map(|e| e.into_path()))
            .collect();

        let probe = FixedProbe(None);
        let inspector = Inspector::new(opts(), &probe).unwrap();
        let project = ProjectRef::new("J", ProjectType::JSProject, &root);
        let first = inspector.inspect(&project);
        let second = inspector.inspect(&project);
        assert_eq!(first, second);
        assert!(first.has_issue(IssueCategory::NotARepository));

        let after: Vec<PathBuf> = WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok().map(|e| e.into_path()))
            .collect();
        assert_eq!(before, after);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn inspect_all_keeps_registry_order() {
        let probe = FixedProbe(None);
        let inspector = Inspector::new(opts(), &probe).unwrap();
        let projects: Vec<ProjectRef> = (0..6)
            .map(|i| {
                ProjectRef::new(
                    format!("p{i}"),
                    ProjectType::Unknown,
                    format!("/nonexistent/projorch/{i}"),
                )
            })
            .collect();
        let snaps = inspector.inspect_all(&projects, 3, &CancelToken::new());
        let ids: Vec<&str> = snaps.iter().map(|s| s.project.id.as_str()).collect();
        assert_eq!(ids, ["p0", "p1", "p2", "p3", "p4", "p5"]);
    }

    #[test]
    fn invalid_exclude_glob_is_rejected() {
        assert!(build_exclude_set(&["[".to_string()]).is_err());
    }
}
