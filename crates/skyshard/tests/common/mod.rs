//! Shared fixtures: partition trees, photon rows and an in-memory opener.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use parquet::file::reader::{FileReader, SerializedFileReader};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

use skyshard::error::SourceError;
use skyshard::source::{OpenedSource, SourceOpener};

pub const ZONES: [i32; 3] = [10829, 10830, 10831];

/// Bin labels the way the tree generator writes them.
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

/// Build `root/zoneID=<z>/<ra-bin>[/<dec-bin>]` with 36 degree RA bins and
/// 18 degree dec bins.
pub fn build_tree(root: &Path, with_dec: bool) {
    for zone in ZONES {
        for ra in labels("ra", 0, 360, 36) {
            let ra_dir = root.join(format!("zoneID={zone}")).join(ra);
            if with_dec {
                for dec in labels("dec", -90, 90, 18) {
                    std::fs::create_dir_all(ra_dir.join(dec)).unwrap();
                }
            } else {
                std::fs::create_dir_all(ra_dir).unwrap();
            }
        }
    }
}

/// One valid `|`-delimited photon-event row.
pub fn photon_row(zone: i32, time: i64, ra: f64, dec: f64) -> String {
    format!("{zone}|{time}|0.1|0.2|0.3|1.5|2.5|10|20|3|0.01|0.02|{ra}|{dec}|0")
}

/// Every `.parquet` file below `dir`, sorted.
pub fn parquet_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "parquet") {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}

/// Number of rows stored in a Parquet file.
pub fn row_count(path: &Path) -> i64 {
    let reader = SerializedFileReader::new(std::fs::File::open(path).unwrap()).unwrap();
    reader.metadata().file_metadata().num_rows()
}

/// Path of `file` relative to `root`, with `/` separators.
pub fn relative(root: &Path, file: &Path) -> String {
    file.strip_prefix(root)
        .unwrap()
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Reader that fails on every read.
struct BrokenStream;

impl AsyncRead for BrokenStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::other("connection reset")))
    }
}

/// Opener over in-memory sources.
#[derive(Default)]
pub struct MemoryOpener {
    sources: HashMap<String, Vec<u8>>,
    /// Sources whose stream breaks after their contents.
    truncated: HashMap<String, Vec<u8>>,
    report_length: bool,
}

impl MemoryOpener {
    pub fn new() -> Self {
        Self {
            report_length: true,
            ..Self::default()
        }
    }

    pub fn with_source(mut self, location: &str, rows: &[String]) -> Self {
        self.sources.insert(location.to_string(), lines(rows));
        self
    }

    pub fn with_truncated_source(mut self, location: &str, rows: &[String]) -> Self {
        self.truncated.insert(location.to_string(), lines(rows));
        self
    }

    pub fn without_length(mut self) -> Self {
        self.report_length = false;
        self
    }
}

fn lines(rows: &[String]) -> Vec<u8> {
    let mut data = rows.join("\n");
    data.push('\n');
    data.into_bytes()
}

#[async_trait]
impl SourceOpener for MemoryOpener {
    async fn open(&self, location: &str) -> Result<OpenedSource, SourceError> {
        let length = |data: &Vec<u8>| self.report_length.then_some(data.len() as u64);

        if let Some(data) = self.sources.get(location) {
            return Ok(OpenedSource {
                reader: Box::new(io::Cursor::new(data.clone())),
                content_length: length(data),
                location: location.to_string(),
            });
        }
        if let Some(data) = self.truncated.get(location) {
            return Ok(OpenedSource {
                reader: Box::new(io::Cursor::new(data.clone()).chain(BrokenStream)),
                content_length: length(data),
                location: location.to_string(),
            });
        }
        Err(SourceError::InvalidLocation {
            location: location.to_string(),
        })
    }
}
