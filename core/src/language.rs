use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Implementation language of a candidate project. Decides which
/// `[candidate.<lang>]` commands build and run it.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Language {
    Java,
    #[strum(to_string = "cpp", serialize = "c++")]
    Cpp,
    C,
}

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("Not a directory: '{0}'")]
    NotADir(PathBuf),

    #[error("Cannot read project config: {0}")]
    ProjectConfig(#[from] fsutil::Error),

    #[error("Unknown programming language '{0}' in {1}")]
    Unknown(String, PathBuf),

    #[error("Cannot tell the language of project '{0}' (no config.json, CMakeLists.txt, src/*.java or Makefile)")]
    Undetectable(PathBuf),
}

/// `config.json` at the project root, as handed out with the course skeleton.
#[derive(Debug, Deserialize)]
struct ProjectManifest {
    #[serde(rename = "programming language")]
    programming_language: Option<String>,
}

impl Language {
    pub const MANIFEST: &str = "config.json";

    /// Reads `config.json` when present, otherwise guesses from build files.
    pub fn detect(project_dir: impl AsRef<Path>) -> Result<Self, DetectError> {
        let dir = project_dir.as_ref();
        if !dir.is_dir() {
            return Err(DetectError::NotADir(dir.to_owned()));
        }

        let manifest_path = dir.join(Self::MANIFEST);
        if manifest_path.is_file() {
            let manifest: ProjectManifest = fsutil::read_json_with_deserialize(&manifest_path)?;
            if let Some(name) = manifest.programming_language {
                return name
                    .trim()
                    .parse()
                    .map_err(|_| DetectError::Unknown(name, manifest_path));
            }
            log::debug!("{:?} has no \"programming language\" key", manifest_path);
        }

        if dir.join("CMakeLists.txt").is_file() {
            return Ok(Language::Cpp);
        }
        if contains_ext(&dir.join("src"), "java", 8) {
            return Ok(Language::Java);
        }
        if dir.join("Makefile").is_file() && contains_ext(dir, "c", 1) {
            return Ok(Language::C);
        }
        Err(DetectError::Undetectable(dir.to_owned()))
    }
}

/// Whether `dir` holds a `*.ext` file within `depth` levels.
fn contains_ext(dir: &Path, ext: &str, depth: usize) -> bool {
    let Ok(entries) = fsutil::read_dir(dir) else {
        return false
    };
    entries.filter_map(Result::ok).any(|entry| {
        let path = entry.path();
        match entry.file_type() {
            Ok(ft) if ft.is_dir() => depth > 1 && contains_ext(&path, ext, depth - 1),
            Ok(_) => path.extension().map_or(false, |e| e == ext),
            Err(_) => false,
        }
    })
}
