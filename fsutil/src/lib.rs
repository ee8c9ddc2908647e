use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs::{self, File, ReadDir},
    io::BufReader,
    path::{Path, PathBuf},
    time::SystemTime,
};

pub mod error {
    use std::{io, path::PathBuf};

    pub type Result<T> = std::result::Result<T, self::Error>;

    type Msg = &'static str;

    #[derive(Debug, thiserror::Error)]
    pub enum Error {
        #[error("{0} ({1}): {2}")]
        SingleIO(Msg, PathBuf, #[source] io::Error),

        #[error("{0} (from='{1}', to='{2}'): {3}")]
        FromToIO(Msg, PathBuf, PathBuf, #[source] io::Error),

        #[error("Failed to canonicalize path '{0}': {1}")]
        CanonicalizePath(PathBuf, #[source] io::Error),

        #[error("Cannot serialize to JSON (dest='{0}'): {1}")]
        SerializeToJson(PathBuf, #[source] serde_json::Error),

        #[error("Cannot deserialize from JSON (src='{0}'): {1}")]
        DeserializeFromJson(PathBuf, #[source] serde_json::Error),
    }
}
pub use error::{Error, Result};

/// Identity of a file's contents as far as mtime and length can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileStamp {
    pub modified: SystemTime,
    pub len: u64,
}

pub fn mkdir_all(path: impl AsRef<Path>) -> Result<()> {
    let dir = path.as_ref();
    fs::create_dir_all(dir).map_err(|e| Error::SingleIO("Cannot create dir", dir.to_owned(), e))
}

pub fn write<P, C>(filepath: P, contents: C) -> Result<()>
where
    P: AsRef<Path>,
    C: AsRef<[u8]>,
{
    fs::write(&filepath, contents)
        .map_err(|e| Error::SingleIO("Cannot write file", filepath.as_ref().to_owned(), e))
}

pub fn write_with_mkdir<P, C>(filepath: P, contents: C) -> Result<()>
where
    P: AsRef<Path>,
    C: AsRef<[u8]>,
{
    if let Some(dir) = filepath.as_ref().parent() {
        self::mkdir_all(dir)?;
    }
    self::write(filepath, contents)
}

pub fn read_to_string(filepath: impl AsRef<Path>) -> Result<String> {
    fs::read_to_string(&filepath)
        .map_err(|e| Error::SingleIO("Cannot read file", filepath.as_ref().to_owned(), e))
}

pub fn remove_dir_all(dir: impl AsRef<Path>) -> Result<()> {
    fs::remove_dir_all(&dir)
        .map_err(|e| Error::SingleIO("Cannot remove dir", dir.as_ref().to_owned(), e))
}

pub fn write_json_with_mkdir<P, T>(filepath: P, data: &T) -> Result<()>
where
    P: AsRef<Path>,
    T: Serialize,
{
    let s = serde_json::to_string_pretty(data)
        .map_err(|e| Error::SerializeToJson(filepath.as_ref().to_owned(), e))?;
    write_with_mkdir(filepath, &s)
}

pub fn read_json_with_deserialize<P, T>(filepath: P) -> Result<T>
where
    P: AsRef<Path>,
    T: DeserializeOwned,
{
    let filepath = filepath.as_ref();
    let f = File::open(filepath)
        .map_err(|e| Error::SingleIO("Cannot read file", filepath.to_owned(), e))?;
    serde_json::from_reader(BufReader::new(f))
        .map_err(|e| Error::DeserializeFromJson(filepath.to_owned(), e))
}

pub fn copy_file(from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<u64> {
    fs::copy(&from, &to).map_err(|e| {
        Error::FromToIO(
            "Cannot copy file",
            from.as_ref().to_owned(),
            to.as_ref().to_owned(),
            e,
        )
    })
}

pub fn read_dir(dir: impl AsRef<Path>) -> Result<ReadDir> {
    fs::read_dir(&dir).map_err(|e| Error::SingleIO("Cannot read dir", dir.as_ref().to_owned(), e))
}

/// Lists the subdirectories of `dir`, sorted by path.
pub fn sorted_subdirs(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = self::read_dir(&dir)?
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .map(|entry| entry.path())
        .collect();
    dirs.sort();
    Ok(dirs)
}

pub fn canonicalize_path(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    path.canonicalize()
        .map_err(|e| Error::CanonicalizePath(path.to_owned(), e))
}

pub fn file_stamp(path: impl AsRef<Path>) -> Result<FileStamp> {
    let path = path.as_ref();
    let meta = fs::metadata(path)
        .map_err(|e| Error::SingleIO("Cannot stat file", path.to_owned(), e))?;
    let modified = meta
        .modified()
        .map_err(|e| Error::SingleIO("Cannot get mtime", path.to_owned(), e))?;
    Ok(FileStamp {
        modified,
        len: meta.len(),
    })
}

/// Join `path` onto `base` unless it is already absolute.
/// ```
/// use fsutil::resolve_against;
/// use std::path::Path;
///
/// assert_eq!(resolve_against("/etc", "foo"), Path::new("/etc/foo"));
/// assert_eq!(resolve_against("/etc", "/usr/bin"), Path::new("/usr/bin"));
/// ```
pub fn resolve_against(base: impl AsRef<Path>, path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if path.is_absolute() {
        path.to_owned()
    } else {
        base.as_ref().join(path)
    }
}

/// Normalize the path
/// ```
/// use fsutil::normalize_path;
/// use std::path::Path;
///
/// assert_eq!(normalize_path("./hoge/.config/././foo"), Path::new("hoge/.config/foo"));
/// assert_eq!(normalize_path("hoge/.config/../../bar/."), Path::new("bar"));
/// assert_eq!(normalize_path("/foo/"), Path::new("/foo"));
/// assert_eq!(normalize_path("./././."), Path::new("."));
/// ```
pub fn normalize_path(path: impl AsRef<Path>) -> PathBuf {
    use ::std::path::Component;
    let components = path.as_ref().components();
    let mut stack = Vec::with_capacity(components.size_hint().1.unwrap_or(4));
    for c in components {
        match c {
            Component::CurDir => (),
            Component::ParentDir if !stack.is_empty() => {
                stack.pop();
            }
            _ => {
                stack.push(c);
            }
        }
    }
    if stack.is_empty() {
        stack.push(Component::CurDir);
    }
    stack.iter().collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sorted_subdirs_skips_files() {
        let tmp = tempfile::tempdir().unwrap();
        mkdir_all(tmp.path().join("b")).unwrap();
        mkdir_all(tmp.path().join("a")).unwrap();
        write(tmp.path().join("c.txt"), "x").unwrap();

        let dirs = sorted_subdirs(tmp.path()).unwrap();
        assert_eq!(dirs, vec![tmp.path().join("a"), tmp.path().join("b")]);
    }

    #[test]
    fn read_missing_file_mentions_path() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("nope.txt");
        let err = read_to_string(&missing).unwrap_err();
        assert!(err.to_string().contains("nope.txt"), "{}", err);
    }

    #[test]
    fn file_stamp_tracks_length() {
        let tmp = tempfile::tempdir().unwrap();
        let f = tmp.path().join("a.txt");
        write(&f, "12345").unwrap();
        assert_eq!(file_stamp(&f).unwrap().len, 5);
    }
}
