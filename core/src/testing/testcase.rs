use std::path::{Path, PathBuf};

use serde::Serialize;

/// One test program and its optional stdin. Names are unique within a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TestCase {
    pub name: String,
    pub source_path: PathBuf,
    pub input_path: Option<PathBuf>,
}

impl TestCase {
    pub fn new(
        name: impl Into<String>,
        source: impl Into<PathBuf>,
        input: Option<impl Into<PathBuf>>,
    ) -> Self {
        Self {
            name: name.into(),
            source_path: source.into(),
            input_path: input.map(Into::into),
        }
    }

    /// Reads the input file. `None` when the case has no input.
    pub async fn read_input(&self) -> fsutil::Result<Option<Vec<u8>>> {
        let Some(path) = &self.input_path else {
            return Ok(None)
        };
        tokio::fs::read(path)
            .await
            .map(Some)
            .map_err(|e| fsutil::Error::SingleIO("Cannot read input", path.clone(), e))
    }
}

/// File layout of a test library: `testfile<N>.txt` with optional `input<N>.txt`.
pub struct Discovery;

impl Discovery {
    const SOURCE_PREFIX: &str = "testfile";
    const INPUT_PREFIX: &str = "input";
    const EXT: &str = "txt";

    /// `N` of `testfile<N>.txt`.
    fn case_number(path: &Path) -> Option<u32> {
        if path.extension()? != Self::EXT {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        stem.strip_prefix(Self::SOURCE_PREFIX)?.parse().ok()
    }

    fn numbered_sources(dir: &Path) -> fsutil::Result<Vec<(u32, PathBuf)>> {
        let mut res: Vec<_> = fsutil::read_dir(dir)?
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().map(|ft| ft.is_file()).unwrap_or(false))
            .filter_map(|entry| {
                let path = entry.path();
                Self::case_number(&path).map(|n| (n, path))
            })
            .collect();
        res.sort_by_key(|(n, _)| *n);
        Ok(res)
    }

    /// Cases directly inside `dir`, ordered by number.
    pub fn cases_in_dir(dir: impl AsRef<Path>) -> fsutil::Result<Vec<TestCase>> {
        let dir = dir.as_ref();
        let cases = Self::numbered_sources(dir)?
            .into_iter()
            .map(|(n, source)| {
                let input = dir.join(format!("{}{}.{}", Self::INPUT_PREFIX, n, Self::EXT));
                let name = source
                    .file_name()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                TestCase {
                    name,
                    source_path: source,
                    input_path: input.is_file().then_some(input),
                }
            })
            .collect();
        Ok(cases)
    }

    fn has_sources(dir: &Path) -> bool {
        Self::numbered_sources(dir)
            .map(|v| !v.is_empty())
            .unwrap_or(false)
    }

    /// Leaf directories holding `testfile*.txt`, at any depth below `root`.
    /// A directory with test files is not searched further.
    pub fn libraries(root: impl AsRef<Path>) -> fsutil::Result<Vec<PathBuf>> {
        fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> fsutil::Result<()> {
            if Discovery::has_sources(dir) {
                out.push(dir.to_owned());
                return Ok(());
            }
            for sub in fsutil::sorted_subdirs(dir)? {
                walk(&sub, out)?;
            }
            Ok(())
        }

        let root = root.as_ref();
        let mut libs = Vec::new();
        if !root.is_dir() {
            return Ok(libs);
        }
        for sub in fsutil::sorted_subdirs(root)? {
            walk(&sub, &mut libs)?;
        }
        Ok(libs)
    }

    /// Every case of every library, named `<lib>/<file>` relative to `root`.
    pub fn collect_all(root: impl AsRef<Path>) -> fsutil::Result<Vec<TestCase>> {
        let root = root.as_ref();
        let mut all = Vec::new();
        for lib in Self::libraries(root)? {
            let prefix = lib.strip_prefix(root).unwrap_or(&lib).to_owned();
            for mut case in Self::cases_in_dir(&lib)? {
                case.name = prefix.join(&case.name).to_string_lossy().into_owned();
                all.push(case);
            }
        }
        Ok(all)
    }

    /// Number for a new case in `dir`: one past the largest in use.
    pub fn next_case_number(dir: impl AsRef<Path>) -> fsutil::Result<u32> {
        let max = Self::numbered_sources(dir.as_ref())?
            .last()
            .map(|(n, _)| *n)
            .unwrap_or(0);
        Ok(max + 1)
    }
}
