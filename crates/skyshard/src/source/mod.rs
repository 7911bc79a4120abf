//! Input side of the pipeline: opening sources and turning their bytes into
//! validated records.

mod manifest;
mod opener;
pub mod reader;
mod traits;

pub use manifest::{load_manifest, parse_manifest};
pub use opener::StorageOpener;
pub use reader::{
    RawRecord, ReadOutcome, ReaderCounters, ReaderOptions, RecordReader, SkipReason,
    ValidatedRecord,
};
pub use traits::{OpenedSource, SourceOpener};

use std::collections::HashSet;

/// Name stem used for counter-named output files produced from `location`.
///
/// The last path segment without its final extension, e.g.
/// `s3://bucket/gPhoton/part-0042.csv` gives `part-0042`.
pub fn file_root(location: &str) -> String {
    let name = location
        .trim_end_matches('/')
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(location);
    let stem = std::path::Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name);
    if stem.is_empty() {
        "part".to_string()
    } else {
        stem.to_string()
    }
}

/// [`file_root`] for every location, made unique across the list.
///
/// The first location with a given stem keeps it. Later ones get `-1`, `-2`,
/// ... appended, skipping any name another location already uses, so
/// counter-named files from different sources never share a name.
pub fn unique_file_roots(locations: &[String]) -> Vec<String> {
    let stems: Vec<String> = locations.iter().map(|l| file_root(l)).collect();
    let mut taken: HashSet<String> = stems.iter().cloned().collect();
    let mut seen = HashSet::new();

    stems
        .into_iter()
        .map(|stem| {
            if seen.insert(stem.clone()) {
                return stem;
            }
            (1..)
                .map(|n| format!("{stem}-{n}"))
                .find(|candidate| taken.insert(candidate.clone()))
                .unwrap_or(stem)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_root_strips_directory_and_extension() {
        assert_eq!(file_root("s3://bucket/gPhoton/part-0042.csv"), "part-0042");
        assert_eq!(file_root("/data/sample.csv"), "sample");
        assert_eq!(file_root("relative/events"), "events");
        assert_eq!(file_root("https://host/dir/"), "dir");
    }

    #[test]
    fn test_file_root_fallback() {
        assert_eq!(file_root(""), "part");
    }

    #[test]
    fn test_unique_file_roots_disambiguates_shared_stems() {
        let locations = [
            "s3://a/part.csv",
            "s3://b/part.csv",
            "s3://c/part-1.csv",
            "s3://d/part.csv",
            "other.csv",
        ]
        .map(String::from);

        assert_eq!(
            unique_file_roots(&locations),
            vec!["part", "part-2", "part-1", "part-3", "other"]
        );
    }

    #[test]
    fn test_unique_file_roots_keeps_distinct_stems() {
        let locations = ["a.csv", "b.csv"].map(String::from);
        assert_eq!(unique_file_roots(&locations), vec!["a", "b"]);
    }
}
