//! Partition path resolution against a pre-built directory tree.
//!
//! The tree looks like `root/zoneID=<n>/<ra-bin>[/<dec-bin>]`, where bin
//! folders are labelled with their range, e.g. `72<=ra<108` or
//! `324<=ra<=360`. The resolver only ever reads the tree. Zone folders are
//! matched on the first integer in their name; bin folders are ordered by
//! their leading signed integer so the Nth folder is the Nth interval no
//! matter what order the filesystem lists them in.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use snafu::prelude::*;
use tracing::debug;

use crate::error::{
    BinOutOfRangeSnafu, ListDirSnafu, MissingDeclinationSnafu, NonFiniteCoordinateSnafu,
    PartitionError, ZoneNotFoundSnafu,
};

static ZONE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("zone pattern is valid"));
static BIN_LOWER_BOUND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+").expect("bin pattern is valid"));

/// Key fields of one record that decide its partition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartitionKey {
    pub zone_id: i32,
    pub ra: f64,
    /// Only populated when declination partitioning is enabled.
    pub dec: Option<f64>,
}

/// One binned coordinate axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinAxis {
    pub name: &'static str,
    pub min: f64,
    pub max: f64,
    pub width: f64,
}

impl BinAxis {
    /// Right ascension over `[0, 360]`.
    pub fn right_ascension(width: f64) -> Self {
        Self {
            name: "ra",
            min: 0.0,
            max: 360.0,
            width,
        }
    }

    /// Declination over `[-90, 90]`.
    pub fn declination(width: f64) -> Self {
        Self {
            name: "dec",
            min: -90.0,
            max: 90.0,
            width,
        }
    }

    /// Number of intervals covering `[min, max]`.
    pub fn bin_count(&self) -> usize {
        ((self.max - self.min) / self.width).ceil() as usize
    }

    /// Signed bin index relative to zero, before shifting by the bins below zero.
    ///
    /// Interval boundaries belong to the upper interval, except `max` itself,
    /// which is kept in the last interval instead of opening a new one.
    fn relative_index(&self, value: f64) -> Option<i64> {
        if !value.is_finite() {
            return None;
        }
        let scaled = value / self.width;
        if value == self.max {
            Some(scaled.ceil() as i64 - 1)
        } else {
            Some(scaled.floor() as i64)
        }
    }
}

/// Shape of the partition tree below the zone level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartitionGrid {
    pub ra: BinAxis,
    pub dec: Option<BinAxis>,
}

impl PartitionGrid {
    /// Zone and right-ascension partitioning only.
    pub fn new(ra_width: f64) -> Self {
        Self {
            ra: BinAxis::right_ascension(ra_width),
            dec: None,
        }
    }

    /// Add a declination level below each right-ascension bin.
    pub fn with_declination(mut self, dec_width: f64) -> Self {
        self.dec = Some(BinAxis::declination(dec_width));
        self
    }
}

/// A bin folder and the lower bound parsed from its label.
#[derive(Debug, Clone)]
struct BinFolder {
    lower: i64,
    path: PathBuf,
}

/// Maps partition keys to existing partition directories.
///
/// Listings are cached for the resolver's lifetime, so one resolver must not
/// outlive changes to the tree. Each worker owns its own resolver.
#[derive(Debug)]
pub struct PartitionResolver {
    root: PathBuf,
    grid: PartitionGrid,
    zones: Option<HashMap<i64, PathBuf>>,
    bins: HashMap<PathBuf, Arc<[BinFolder]>>,
}

impl PartitionResolver {
    pub fn new(root: impl Into<PathBuf>, grid: PartitionGrid) -> Self {
        Self {
            root: root.into(),
            grid,
            zones: None,
            bins: HashMap::new(),
        }
    }

    /// Resolve the partition directory for `key`.
    ///
    /// Only the first lookup under a directory touches the filesystem.
    pub async fn resolve(&mut self, key: &PartitionKey) -> Result<PathBuf, PartitionError> {
        let zone_dir = self.zone_dir(key.zone_id).await?;
        let ra_axis = self.grid.ra;
        let ra_dir = self.select_bin(&zone_dir, &ra_axis, key.ra).await?;

        match self.grid.dec {
            None => Ok(ra_dir),
            Some(dec_axis) => {
                let dec = key.dec.context(MissingDeclinationSnafu)?;
                self.select_bin(&ra_dir, &dec_axis, dec).await
            }
        }
    }

    async fn zone_dir(&mut self, zone_id: i32) -> Result<PathBuf, PartitionError> {
        if self.zones.is_none() {
            let mut zones = HashMap::new();
            for path in list_subdirs(&self.root).await? {
                let number = file_name(&path)
                    .and_then(|name| ZONE_NUMBER.find(name))
                    .and_then(|m| m.as_str().parse::<i64>().ok());
                if let Some(number) = number {
                    zones.entry(number).or_insert(path);
                }
            }
            debug!(root = %self.root.display(), zones = zones.len(), "Indexed zone folders");
            self.zones = Some(zones);
        }

        self.zones
            .as_ref()
            .and_then(|zones| zones.get(&i64::from(zone_id)))
            .cloned()
            .context(ZoneNotFoundSnafu {
                zone_id,
                root: self.root.clone(),
            })
    }

    async fn select_bin(
        &mut self,
        parent: &Path,
        axis: &BinAxis,
        value: f64,
    ) -> Result<PathBuf, PartitionError> {
        let Some(relative) = axis.relative_index(value) else {
            return NonFiniteCoordinateSnafu {
                axis: axis.name,
                value,
            }
            .fail();
        };

        let folders = self.sorted_bins(parent).await?;
        let below_zero = folders.iter().filter(|f| f.lower < 0).count() as i64;
        let index = relative + below_zero;

        match usize::try_from(index).ok().and_then(|i| folders.get(i)) {
            Some(folder) => Ok(folder.path.clone()),
            None => BinOutOfRangeSnafu {
                axis: axis.name,
                value,
                index,
                bins: folders.len(),
                path: parent.to_path_buf(),
            }
            .fail(),
        }
    }

    async fn sorted_bins(&mut self, parent: &Path) -> Result<Arc<[BinFolder]>, PartitionError> {
        if let Some(folders) = self.bins.get(parent) {
            return Ok(Arc::clone(folders));
        }

        let mut folders: Vec<BinFolder> = list_subdirs(parent)
            .await?
            .into_iter()
            .filter_map(|path| {
                let lower = file_name(&path)
                    .and_then(|name| BIN_LOWER_BOUND.find(name))
                    .and_then(|m| m.as_str().parse::<i64>().ok())?;
                Some(BinFolder { lower, path })
            })
            .collect();
        folders.sort_by(|a, b| a.lower.cmp(&b.lower).then_with(|| a.path.cmp(&b.path)));

        let folders: Arc<[BinFolder]> = folders.into();
        self.bins.insert(parent.to_path_buf(), Arc::clone(&folders));
        Ok(folders)
    }
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|name| name.to_str())
}

/// Immediate sub-directories of `dir`, sorted by name.
async fn list_subdirs(dir: &Path) -> Result<Vec<PathBuf>, PartitionError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .context(ListDirSnafu { path: dir })?;

    let mut dirs = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .context(ListDirSnafu { path: dir })?
    {
        let path = entry.path();
        // Follows symlinks, so linked bin folders count.
        if tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_dir()) {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ZONES: [i32; 3] = [10829, 10830, 10831];

    /// Labels in the form the directory generator produces them.
    fn labels(id: &str, min: i64, max: i64, step: i64) -> Vec<String> {
        (min..max)
            .step_by(step as usize)
            .map(|lower| {
                if lower == max - step {
                    format!("{lower}<={id}<={}", lower + step)
                } else {
                    format!("{lower}<={id}<{}", lower + step)
                }
            })
            .collect()
    }

    fn build_tree(with_dec: bool) -> TempDir {
        let dir = TempDir::new().unwrap();
        for zone in ZONES {
            for ra in labels("ra", 0, 360, 36) {
                let ra_dir = dir.path().join(format!("zoneID={zone}")).join(ra);
                if with_dec {
                    for dec in labels("dec", -90, 90, 18) {
                        std::fs::create_dir_all(ra_dir.join(dec)).unwrap();
                    }
                } else {
                    std::fs::create_dir_all(ra_dir).unwrap();
                }
            }
        }
        dir
    }

    fn key(zone_id: i32, ra: f64) -> PartitionKey {
        PartitionKey {
            zone_id,
            ra,
            dec: None,
        }
    }

    fn relative(root: &Path, path: PathBuf) -> String {
        path.strip_prefix(root)
            .unwrap()
            .to_string_lossy()
            .into_owned()
    }

    /// Parse `lo<=id<hi` / `lo<=id<=hi` into (lo, hi, closed_upper).
    fn parse_label(label: &str) -> (f64, f64, bool) {
        let (lo, rest) = label.split_once("<=").unwrap();
        let closed = rest.contains("<=");
        let hi = rest.rsplit('<').next().unwrap().trim_start_matches('=');
        (lo.parse().unwrap(), hi.parse().unwrap(), closed)
    }

    #[tokio::test]
    async fn test_ra_resolution_cases() {
        let tree = build_tree(false);
        let mut resolver = PartitionResolver::new(tree.path(), PartitionGrid::new(36.0));

        let cases = [
            (10829, 0.0, "zoneID=10829/0<=ra<36"),
            (10830, 360.0, "zoneID=10830/324<=ra<=360"),
            (10829, 72.0, "zoneID=10829/72<=ra<108"),
            (10831, 45.0, "zoneID=10831/36<=ra<72"),
            (10829, 108.0, "zoneID=10829/108<=ra<144"),
            (10830, 216.0, "zoneID=10830/216<=ra<252"),
            (10831, 359.99999, "zoneID=10831/324<=ra<=360"),
            (10829, 83.12345, "zoneID=10829/72<=ra<108"),
            (10830, 258.00001, "zoneID=10830/252<=ra<288"),
            (10829, 36.0, "zoneID=10829/36<=ra<72"),
        ];

        for (zone, ra, expected) in cases {
            let path = resolver.resolve(&key(zone, ra)).await.unwrap();
            assert_eq!(relative(tree.path(), path), expected, "zone {zone}, ra {ra}");
        }
    }

    #[tokio::test]
    async fn test_ra_bin_contains_value() {
        let tree = build_tree(false);
        let mut resolver = PartitionResolver::new(tree.path(), PartitionGrid::new(36.0));

        let mut ra = 0.0;
        while ra < 360.0 {
            let path = resolver.resolve(&key(10830, ra)).await.unwrap();
            let label = path.file_name().unwrap().to_str().unwrap();
            let (lo, hi, closed) = parse_label(label);
            assert!(lo <= ra, "{ra} below {label}");
            assert!(if closed { ra <= hi } else { ra < hi }, "{ra} above {label}");
            ra += 0.73;
        }
    }

    #[tokio::test]
    async fn test_declination_resolution_cases() {
        let tree = build_tree(true);
        let grid = PartitionGrid::new(36.0).with_declination(18.0);
        let mut resolver = PartitionResolver::new(tree.path(), grid);

        let cases = [
            (10829, 0.0, -90.0, "zoneID=10829/0<=ra<36/-90<=dec<-72"),
            (10830, 360.0, 90.0, "zoneID=10830/324<=ra<=360/72<=dec<=90"),
            (10831, 100.0, 0.0, "zoneID=10831/72<=ra<108/0<=dec<18"),
            (10831, 100.0, -0.5, "zoneID=10831/72<=ra<108/-18<=dec<0"),
            (10829, 200.0, -72.0, "zoneID=10829/180<=ra<216/-72<=dec<-54"),
            (10829, 200.0, 71.999, "zoneID=10829/180<=ra<216/54<=dec<72"),
        ];

        for (zone, ra, dec, expected) in cases {
            let path = resolver
                .resolve(&PartitionKey {
                    zone_id: zone,
                    ra,
                    dec: Some(dec),
                })
                .await
                .unwrap();
            assert_eq!(relative(tree.path(), path), expected, "dec {dec}");
        }
    }

    #[tokio::test]
    async fn test_declination_bin_contains_value() {
        let tree = build_tree(true);
        let grid = PartitionGrid::new(36.0).with_declination(18.0);
        let mut resolver = PartitionResolver::new(tree.path(), grid);

        let mut dec = -90.0;
        while dec < 90.0 {
            let path = resolver
                .resolve(&PartitionKey {
                    zone_id: 10829,
                    ra: 10.0,
                    dec: Some(dec),
                })
                .await
                .unwrap();
            let label = path.file_name().unwrap().to_str().unwrap();
            let (lo, hi, closed) = parse_label(label);
            assert!(lo <= dec && (if closed { dec <= hi } else { dec < hi }), "{dec} not in {label}");
            dec += 0.37;
        }
    }

    #[tokio::test]
    async fn test_resolution_is_idempotent() {
        let tree = build_tree(false);
        let mut resolver = PartitionResolver::new(tree.path(), PartitionGrid::new(36.0));
        let first = resolver.resolve(&key(10831, 123.4)).await.unwrap();
        let second = resolver.resolve(&key(10831, 123.4)).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_unknown_zone_fails() {
        let tree = build_tree(false);
        let mut resolver = PartitionResolver::new(tree.path(), PartitionGrid::new(36.0));
        let err = resolver.resolve(&key(99999, 10.0)).await.unwrap_err();
        assert!(matches!(err, PartitionError::ZoneNotFound { zone_id: 99999, .. }));
    }

    #[tokio::test]
    async fn test_out_of_range_values_fail() {
        let tree = build_tree(false);
        let mut resolver = PartitionResolver::new(tree.path(), PartitionGrid::new(36.0));

        for (ra, index) in [(360.5, 10), (-0.1, -1)] {
            let err = resolver.resolve(&key(10829, ra)).await.unwrap_err();
            assert!(
                matches!(err, PartitionError::BinOutOfRange { axis: "ra", bins: 10, index: i, .. } if i == index),
                "ra {ra} gave {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_non_finite_values_fail() {
        let tree = build_tree(false);
        let mut resolver = PartitionResolver::new(tree.path(), PartitionGrid::new(36.0));

        for ra in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = resolver.resolve(&key(10829, ra)).await.unwrap_err();
            assert!(
                matches!(err, PartitionError::NonFiniteCoordinate { axis: "ra", .. }),
                "ra {ra} gave {err:?}"
            );
            assert!(!err.to_string().contains(&i64::MIN.to_string()), "{err}");
        }
    }

    #[tokio::test]
    async fn test_missing_declination_fails() {
        let tree = build_tree(true);
        let grid = PartitionGrid::new(36.0).with_declination(18.0);
        let mut resolver = PartitionResolver::new(tree.path(), grid);
        let err = resolver.resolve(&key(10829, 10.0)).await.unwrap_err();
        assert!(matches!(err, PartitionError::MissingDeclination));
    }

    #[tokio::test]
    async fn test_resolver_never_creates_directories() {
        let tree = build_tree(false);
        let mut resolver = PartitionResolver::new(tree.path(), PartitionGrid::new(36.0));
        let _ = resolver.resolve(&key(12345, 10.0)).await;
        assert!(!tree.path().join("zoneID=12345").exists());
    }

    #[tokio::test]
    async fn test_missing_root_reports_list_error() {
        let mut resolver = PartitionResolver::new("/nonexistent/skyshard", PartitionGrid::new(36.0));
        let err = resolver.resolve(&key(10829, 10.0)).await.unwrap_err();
        assert!(matches!(err, PartitionError::ListDir { .. }));
    }

    #[test]
    fn test_bin_count() {
        assert_eq!(BinAxis::right_ascension(36.0).bin_count(), 10);
        assert_eq!(BinAxis::declination(18.0).bin_count(), 10);
        assert_eq!(BinAxis::right_ascension(50.0).bin_count(), 8);
    }

    #[test]
    fn test_upper_bound_lands_in_last_bin_for_uneven_widths() {
        let axis = BinAxis::right_ascension(50.0);
        assert_eq!(axis.relative_index(360.0), Some(7));
        assert_eq!(axis.relative_index(355.0), Some(7));
        assert_eq!(axis.relative_index(350.0), Some(7));
        assert_eq!(axis.relative_index(349.9), Some(6));
    }
}
