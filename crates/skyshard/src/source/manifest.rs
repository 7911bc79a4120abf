//! Source manifests: plain text files listing one source per line.

use std::path::Path;

use snafu::prelude::*;

use skyshard_core::error::ReadManifestSnafu;

use crate::error::ConfigError;

/// Read a manifest file. Blank lines and `#` comments are ignored.
pub fn load_manifest(path: impl AsRef<Path>) -> Result<Vec<String>, ConfigError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).context(ReadManifestSnafu { path })?;
    Ok(parse_manifest(&contents))
}

pub fn parse_manifest(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_manifest_skips_blank_lines() {
        let sources = parse_manifest("s3://a/1.csv\n\n  s3://a/2.csv  \n# retired\n/local/3.csv\n");
        assert_eq!(sources, vec!["s3://a/1.csv", "s3://a/2.csv", "/local/3.csv"]);
    }

    #[test]
    fn test_load_manifest_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "one.csv").unwrap();
        writeln!(file, "two.csv").unwrap();

        let sources = load_manifest(file.path()).unwrap();
        assert_eq!(sources, vec!["one.csv", "two.csv"]);
    }

    #[test]
    fn test_load_missing_manifest_fails() {
        let err = load_manifest("/nonexistent/manifest.txt").unwrap_err();
        assert!(matches!(err, ConfigError::ReadManifest { .. }));
    }
}
