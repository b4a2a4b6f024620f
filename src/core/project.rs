use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProjectType {
    PowerShellModule,
    PythonPackage,
    CSharpProject,
    JSProject,
    Unknown,
}

impl ProjectType {
    pub const ALL: [ProjectType; 5] = [
        ProjectType::PowerShellModule,
        ProjectType::PythonPackage,
        ProjectType::CSharpProject,
        ProjectType::JSProject,
        ProjectType::Unknown,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            ProjectType::PowerShellModule => "PowerShellModule",
            ProjectType::PythonPackage => "PythonPackage",
            ProjectType::CSharpProject => "CSharpProject",
            ProjectType::JSProject => "JSProject",
            ProjectType::Unknown => "Unknown",
        }
    }

    /// File extensions counted as scripts/sources for this project type.
    pub const fn script_extensions(self) -> &'static [&'static str] {
        match self {
            ProjectType::PowerShellModule => &["ps1", "psm1", "psd1"],
            ProjectType::PythonPackage => &["py", "pyi"],
            ProjectType::CSharpProject => &["cs", "csx"],
            ProjectType::JSProject => &["js", "mjs", "cjs", "ts", "tsx", "jsx"],
            ProjectType::Unknown => &["ps1", "psm1", "py", "cs", "js", "ts", "sh"],
        }
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "powershellmodule" | "powershell" | "pwsh" | "psmodule" => {
                Ok(ProjectType::PowerShellModule)
            }
            "pythonpackage" | "python" | "py" => Ok(ProjectType::PythonPackage),
            "csharpproject" | "csharp" | "cs" | "dotnet" => Ok(ProjectType::CSharpProject),
            "jsproject" | "js" | "javascript" | "typescript" | "node" => Ok(ProjectType::JSProject),
            "unknown" => Ok(ProjectType::Unknown),
            _ => Err(format!(
                "プロジェクト種別が不正です: {s}（PowerShellModule|PythonPackage|CSharpProject|JSProject|Unknown を指定してください）"
            )),
        }
    }
}

/// A registry entry. Loaded once and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub id: String,
    #[serde(rename = "type")]
    pub project_type: ProjectType,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
}

impl ProjectRef {
    pub fn new(id: impl Into<String>, project_type: ProjectType, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            project_type,
            path: path.into(),
            repo: None,
        }
    }
}
