use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::remote::RemoteApi;

pub const STATE_DIR: &str = ".projorch";

/// One forward effect, written down before the effect happens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JournalEntry {
    Created { path: PathBuf },
    Moved { from: PathBuf, to: PathBuf },
    Backup { path: PathBuf, backup: PathBuf },
    ReleasePublished { repo: String, tag: String },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct JournalFile {
    run_id: String,
    step: String,
    entries: Vec<JournalEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub undone: usize,
    /// Entries whose forward effect never happened (partial forward step).
    pub absent: usize,
}

/// Append-only record of what a mutating step did to one project, stored at
/// `<root>/.projorch/journal/<run_id>/<step>.json`.
#[derive(Debug)]
pub struct Journal {
    root: PathBuf,
    file: PathBuf,
    data: JournalFile,
}

pub fn journal_dir(root: &Path, run_id: &str) -> PathBuf {
    root.join(STATE_DIR).join("journal").join(run_id)
}

pub fn journal_path(root: &Path, run_id: &str, step: &str) -> PathBuf {
    journal_dir(root, run_id).join(format!("{step}.json"))
}

pub fn quarantine_dir(root: &Path, run_id: &str) -> PathBuf {
    root.join(STATE_DIR).join("quarantine").join(run_id)
}

/// Creates `<root>/.projorch` with a `.gitignore` of `*`, so run state never
/// shows up as uncommitted changes in the project repository.
pub fn ensure_state_dir(root: &Path) -> Result<()> {
    let dir = root.join(STATE_DIR);
    let ignore = dir.join(".gitignore");
    if ignore.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("状態ディレクトリの作成に失敗しました: {}", dir.display()))?;
    std::fs::write(&ignore, "*\n")
        .with_context(|| format!("書き込みに失敗しました: {}", ignore.display()))
}

fn backup_dir(root: &Path, run_id: &str, step: &str) -> PathBuf {
    root.join(STATE_DIR).join("backup").join(run_id).join(step)
}

impl Journal {
    pub fn open(root: &Path, run_id: &str, step: &str) -> Result<Self> {
        let file = journal_path(root, run_id, step);
        let data = match read_journal(&file)? {
            Some(data) => data,
            None => JournalFile {
                run_id: run_id.to_string(),
                step: step.to_string(),
                entries: Vec::new(),
            },
        };
        Ok(Self {
            root: root.to_path_buf(),
            file,
            data,
        })
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.data.entries
    }

    pub fn record(&mut self, entry: JournalEntry) -> Result<()> {
        ensure_state_dir(&self.root)?;
        self.data.entries.push(entry);
        self.flush()
    }

    /// Copies `path` aside and records the backup. Call before modifying `path`.
    pub fn backup(&mut self, path: &Path) -> Result<()> {
        ensure_state_dir(&self.root)?;
        let dir = backup_dir(&self.root, &self.data.run_id, &self.data.step);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("バックアップ先の作成に失敗しました: {}", dir.display()))?;
        let backup = dir.join(format!("{:04}.bak", self.data.entries.len()));
        std::fs::copy(path, &backup).with_context(|| {
            format!(
                "バックアップに失敗しました: {} -> {}",
                path.display(),
                backup.display()
            )
        })?;
        self.record(JournalEntry::Backup {
            path: path.to_path_buf(),
            backup,
        })
    }

    /// Creates `path` with `contents`, journaling it and every missing ancestor
    /// directory (outermost first) before anything is created.
    pub fn create_file(&mut self, path: &Path, contents: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            let mut missing: Vec<&Path> = parent.ancestors().take_while(|a| !a.exists()).collect();
            missing.reverse();
            for dir in missing {
                self.record(JournalEntry::Created {
                    path: dir.to_path_buf(),
                })?;
                std::fs::create_dir(dir).with_context(|| {
                    format!("ディレクトリの作成に失敗しました: {}", dir.display())
                })?;
            }
        }
        self.record(JournalEntry::Created {
            path: path.to_path_buf(),
        })?;
        std::fs::write(path, contents)
            .with_context(|| format!("ファイルの作成に失敗しました: {}", path.display()))
    }

    /// Overwrites `path` if it exists (after a backup), otherwise creates it.
    pub fn write_file(&mut self, path: &Path, contents: &str) -> Result<()> {
        if path.exists() {
            self.backup(path)?;
            std::fs::write(path, contents)
                .with_context(|| format!("ファイルの書き込みに失敗しました: {}", path.display()))
        } else {
            self.create_file(path, contents)
        }
    }

    pub fn move_path(&mut self, from: &Path, to: &Path) -> Result<()> {
        ensure_state_dir(&self.root)?;
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("移動先の作成に失敗しました: {}", parent.display()))?;
        }
        if to.exists() {
            return Err(anyhow!("移動先が既に存在します: {}", to.display()));
        }
        self.record(JournalEntry::Moved {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
        })?;
        std::fs::rename(from, to).map_err(|e| {
            anyhow!(
                "移動できませんでした: {} -> {}: {e}",
                from.display(),
                to.display()
            )
        })
    }

    fn flush(&self) -> Result<()> {
        write_journal(&self.file, &self.data)
    }
}

/// Undoes every journaled effect of `step` in reverse order and removes the
/// journal. A missing journal is a no-op, so replaying twice is harmless.
/// Entries that fail to undo stay in the journal and the call returns an error.
pub fn replay(root: &Path, run_id: &str, step: &str, remote: &dyn RemoteApi) -> Result<ReplaySummary> {
    let file = journal_path(root, run_id, step);
    let Some(mut data) = read_journal(&file)? else {
        return Ok(ReplaySummary::default());
    };

    let mut summary = ReplaySummary::default();
    let mut failed: Vec<JournalEntry> = Vec::new();
    let mut errors: Vec<String> = Vec::new();

    for entry in data.entries.iter().rev() {
        match undo(entry, remote) {
            Ok(true) => summary.undone += 1,
            Ok(false) => summary.absent += 1,
            Err(err) => {
                errors.push(format!("{err:#}"));
                failed.push(entry.clone());
            }
        }
    }

    if errors.is_empty() {
        std::fs::remove_file(&file)
            .with_context(|| format!("ジャーナルの削除に失敗しました: {}", file.display()))?;
        let _ = std::fs::remove_dir_all(backup_dir(root, run_id, step));
        return Ok(summary);
    }

    failed.reverse();
    data.entries = failed;
    write_journal(&file, &data)?;
    Err(anyhow!(
        "{} 件の取り消しに失敗しました: {}",
        errors.len(),
        errors.join("; ")
    ))
}

fn undo(entry: &JournalEntry, remote: &dyn RemoteApi) -> Result<bool> {
    match entry {
        JournalEntry::Created { path } => {
            let meta = match std::fs::symlink_metadata(path) {
                Ok(meta) => meta,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
                Err(e) => return Err(anyhow!("{}: {e}", path.display())),
            };
            if meta.is_dir() {
                std::fs::remove_dir(path)
                    .with_context(|| format!("ディレクトリを削除できません: {}", path.display()))?;
            } else {
                std::fs::remove_file(path)
                    .with_context(|| format!("ファイルを削除できません: {}", path.display()))?;
            }
            Ok(true)
        }
        JournalEntry::Moved { from, to } => {
            if !to.exists() {
                return Ok(false);
            }
            if from.exists() {
                return Err(anyhow!("元の場所が既に存在します: {}", from.display()));
            }
            if let Some(parent) = from.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("ディレクトリの作成に失敗しました: {}", parent.display()))?;
            }
            std::fs::rename(to, from).map_err(|e| {
                anyhow!(
                    "元に戻せませんでした: {} -> {}: {e}",
                    to.display(),
                    from.display()
                )
            })?;
            Ok(true)
        }
        JournalEntry::Backup { path, backup } => {
            if !backup.exists() {
                return Ok(false);
            }
            std::fs::copy(backup, path).with_context(|| {
                format!("バックアップから復元できません: {}", path.display())
            })?;
            Ok(true)
        }
        JournalEntry::ReleasePublished { repo, tag } => {
            remote.delete_release(repo, tag)?;
            Ok(true)
        }
    }
}

fn read_journal(file: &Path) -> Result<Option<JournalFile>> {
    let s = match std::fs::read_to_string(file) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(anyhow!("ジャーナルを読み取れません: {}: {e}", file.display()));
        }
    };
    let data = serde_json::from_str(&s)
        .with_context(|| format!("ジャーナルの解析に失敗しました: {}", file.display()))?;
    Ok(Some(data))
}

fn write_journal(file: &Path, data: &JournalFile) -> Result<()> {
    if let Some(parent) = file.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("ジャーナルディレクトリの作成に失敗しました: {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(data)?;
    std::fs::write(file, json)
        .with_context(|| format!("ジャーナルの書き込みに失敗しました: {}", file.display()))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;
    use crate::remote::OfflineRemote;

    fn temp_root() -> PathBuf {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!(
            "projorch-journal-test-{}-{seq}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn replay_undoes_created_moved_and_backed_up_files() {
        let root = temp_root();
        std::fs::write(root.join("README.md"), "old").unwrap();
        std::fs::write(root.join("build.log"), "log").unwrap();

        let mut journal = Journal::open(&root, "run1", "step").unwrap();
        journal.create_file(&root.join("docs/INDEX.md"), "index").unwrap();
        journal.write_file(&root.join("README.md"), "new").unwrap();
        let dest = quarantine_dir(&root, "run1").join("build.log");
        journal.move_path(&root.join("build.log"), &dest).unwrap();
        assert_eq!(journal.entries().len(), 4);

        let summary = replay(&root, "run1", "step", &OfflineRemote).unwrap();
        assert_eq!(summary.undone, 4);
        assert!(!root.join("docs").exists());
        assert_eq!(std::fs::read_to_string(root.join("README.md")).unwrap(), "old");
        assert_eq!(std::fs::read_to_string(root.join("build.log")).unwrap(), "log");
        assert!(!journal_path(&root, "run1", "step").exists());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn create_file_journals_every_missing_ancestor() {
        let root = temp_root();
        let mut journal = Journal::open(&root, "run4", "step").unwrap();
        journal
            .create_file(&root.join("a/b/c/file.txt"), "x")
            .unwrap();
        let created: Vec<PathBuf> = journal
            .entries()
            .iter()
            .map(|e| match e {
                JournalEntry::Created { path } => path.clone(),
                other => panic!("unexpected entry: {other:?}"),
            })
            .collect();
        assert_eq!(
            created,
            [
                root.join("a"),
                root.join("a/b"),
                root.join("a/b/c"),
                root.join("a/b/c/file.txt"),
            ]
        );

        replay(&root, "run4", "step", &OfflineRemote).unwrap();
        assert!(!root.join("a").exists());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn state_dir_ignores_itself() {
        let root = temp_root();
        assert!(!root.join(STATE_DIR).exists());
        let mut journal = Journal::open(&root, "run5", "step").unwrap();
        assert!(!root.join(STATE_DIR).exists());
        journal.create_file(&root.join("NEW.md"), "x").unwrap();
        assert_eq!(
            std::fs::read_to_string(root.join(STATE_DIR).join(".gitignore")).unwrap(),
            "*\n"
        );
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn replay_without_journal_is_a_noop() {
        let root = temp_root();
        let summary = replay(&root, "missing", "step", &OfflineRemote).unwrap();
        assert_eq!(summary, ReplaySummary::default());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn replay_tolerates_effects_that_never_happened() {
        let root = temp_root();
        let mut journal = Journal::open(&root, "run2", "step").unwrap();
        journal
            .record(JournalEntry::Created {
                path: root.join("never-written.txt"),
            })
            .unwrap();
        let summary = replay(&root, "run2", "step", &OfflineRemote).unwrap();
        assert_eq!(summary, ReplaySummary { undone: 0, absent: 1 });
        let _ = std::fs::remove_dir_all(&root);
    }

    struct RecordingRemote(Mutex<Vec<String>>);

    impl RemoteApi for RecordingRemote {
        fn create_release(&self, _repo: &str, _tag: &str, _notes: &str) -> Result<String> {
            Err(anyhow!("unused"))
        }

        fn delete_release(&self, repo: &str, tag: &str) -> Result<()> {
            self.0.lock().unwrap().push(format!("{repo}@{tag}"));
            Ok(())
        }
    }

    #[test]
    fn replay_deletes_published_releases_and_keeps_failed_entries() {
        let root = temp_root();
        let mut journal = Journal::open(&root, "run3", "publish").unwrap();
        journal
            .record(JournalEntry::ReleasePublished {
                repo: "o/r".to_string(),
                tag: "v1.0.0".to_string(),
            })
            .unwrap();

        assert!(replay(&root, "run3", "publish", &OfflineRemote).is_err());
        let kept = Journal::open(&root, "run3", "publish").unwrap();
        assert_eq!(kept.entries().len(), 1);

        let remote = RecordingRemote(Mutex::new(Vec::new()));
        replay(&root, "run3", "publish", &remote).unwrap();
        assert_eq!(*remote.0.lock().unwrap(), vec!["o/r@v1.0.0".to_string()]);

        let _ = std::fs::remove_dir_all(&root);
    }
}
