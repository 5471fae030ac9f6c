//! Axona `.set` header files
//!
//! A `.set` file is a list of `key value` lines. The recording mode used to be
//! read positionally from a fixed character of the file; [`get_mode`] keeps
//! that behaviour for old callers, [`SetHeader`] reads it by key.

use crate::error::{StashError, StashResult};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Zero-based line holding the mode character
pub const MODE_LINE: usize = 14;

/// Zero-based column of the mode character
pub const MODE_COLUMN: usize = 10;

async fn read(path: &Path) -> StashResult<String> {
    match fs::read(path).await {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(StashError::PathNotFound(path.to_path_buf()))
        }
        Err(e) => Err(StashError::io(format!("reading header {}", path.display()), e)),
    }
}

/// Character at line 15, column 11 of a header file
pub async fn get_mode(path: &Path) -> StashResult<char> {
    let content = read(path).await?;
    mode_char(&content).ok_or_else(|| StashError::HeaderTooShort {
        path: path.to_path_buf(),
        line: MODE_LINE + 1,
        column: MODE_COLUMN + 1,
    })
}

fn mode_char(content: &str) -> Option<char> {
    content.lines().nth(MODE_LINE)?.chars().nth(MODE_COLUMN)
}

/// Parsed `.set` header
#[derive(Debug, Clone, Default)]
pub struct SetHeader {
    path: PathBuf,
    entries: Vec<(String, String)>,
}

impl SetHeader {
    /// Parse header text; lines without a value map to an empty string
    pub fn parse(content: &str) -> Self {
        let entries = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| match line.split_once(char::is_whitespace) {
                Some((key, value)) => (key.to_string(), value.trim().to_string()),
                None => (line.to_string(), String::new()),
            })
            .collect();
        Self {
            path: PathBuf::new(),
            entries,
        }
    }

    /// Read and parse a header file
    pub async fn open(path: &Path) -> StashResult<Self> {
        let content = read(path).await?;
        Ok(Self {
            path: path.to_path_buf(),
            ..Self::parse(&content)
        })
    }

    /// Value of the first line with `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Recording mode of a channel (`mode_ch_{channel}`)
    pub fn mode(&self, channel: usize) -> StashResult<&str> {
        let key = format!("mode_ch_{}", channel);
        self.get(&key).ok_or_else(|| StashError::HeaderKeyMissing {
            path: self.path.clone(),
            key,
        })
    }

    /// All entries in file order
    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> String {
        let mut lines: Vec<String> = (0..14).map(|i| format!("key_{} {}", i, i)).collect();
        lines.push("mode_ch_0 3".to_string());
        lines.push("mode_ch_1 5".to_string());
        lines.push("sw_version 1.2.2.14".to_string());
        lines.push("comment".to_string());
        lines.join("\r\n")
    }

    #[tokio::test]
    async fn mode_is_read_positionally() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.set");
        std::fs::write(&path, sample()).unwrap();

        assert_eq!(get_mode(&path).await.unwrap(), '3');
    }

    #[tokio::test]
    async fn short_header_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.set");
        std::fs::write(&path, "trial_date Monday\n").unwrap();

        let err = get_mode(&path).await.unwrap_err();
        assert!(matches!(
            err,
            StashError::HeaderTooShort {
                line: 15,
                column: 11,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn missing_header_is_path_not_found() {
        let err = get_mode(Path::new("/nonexistent/x.set")).await.unwrap_err();
        assert!(matches!(err, StashError::PathNotFound(_)));
    }

    #[test]
    fn parses_keys() {
        let header = SetHeader::parse(&sample());
        assert_eq!(header.get("sw_version"), Some("1.2.2.14"));
        assert_eq!(header.get("comment"), Some(""));
        assert_eq!(header.mode(1).unwrap(), "5");
        assert!(matches!(
            header.mode(7),
            Err(StashError::HeaderKeyMissing { ref key, .. }) if key == "mode_ch_7"
        ));
    }

    #[tokio::test]
    async fn open_records_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.set");
        std::fs::write(&path, sample()).unwrap();

        let header = SetHeader::open(&path).await.unwrap();
        assert_eq!(header.entries().len(), 18);
        match header.mode(9) {
            Err(StashError::HeaderKeyMissing { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected {:?}", other),
        }
    }
}
