//! Cache-aware download of the remote inputs: occurrence dump, country
//! boundary, and the climate / elevation / soil rasters.
//!
//! Every input has one cache file; a file that already exists is never
//! touched again, so deleting a single cache entry re-fetches exactly that
//! input. Gzipped sources are downloaded next to their cache file and
//! decompressed into place.

use dwldutil::{DLFile, Downloader};
use flate2::read::MultiGzDecoder;
use indicatif::ProgressStyle;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("I/O error for '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create async runtime: {0}")]
    Runtime(#[source] io::Error),

    #[error("download of {url} produced no file at {}", destination.display())]
    Unavailable { url: String, destination: PathBuf },
}

/// One remote input and the cache file it must end up in.
#[derive(Debug, Clone)]
pub struct FetchJob {
    pub url: String,
    pub destination: PathBuf,
    /// The remote file is gzipped and must be decompressed into the
    /// destination.
    pub gzip: bool,
}

impl FetchJob {
    pub fn new(url: String, destination: PathBuf) -> Self {
        let gzip = url.ends_with(".gz");
        FetchJob {
            url,
            destination,
            gzip,
        }
    }

    /// Where the raw download lands: the destination itself, or a `.gz`
    /// sibling that is decompressed and removed afterwards.
    fn download_path(&self) -> PathBuf {
        if self.gzip {
            let mut raw = self.destination.clone().into_os_string();
            raw.push(".gz");
            PathBuf::from(raw)
        } else {
            self.destination.clone()
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct FetchSummary {
    pub downloaded: usize,
    pub cached: usize,
}

/// Download every job whose cache file is missing, then decompress the
/// gzipped ones into place.
pub fn fetch_missing(jobs: &[FetchJob]) -> Result<FetchSummary, FetchError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| FetchError::Io { path, source }
    };

    let (cached, missing): (Vec<&FetchJob>, Vec<&FetchJob>) =
        jobs.iter().partition(|job| job.destination.exists());

    eprintln!(
        "> {} of {} inputs already cached, {} to download.",
        cached.len(),
        jobs.len(),
        missing.len()
    );
    if missing.is_empty() {
        return Ok(FetchSummary {
            downloaded: 0,
            cached: cached.len(),
        });
    }

    for job in &missing {
        if let Some(parent) = job.destination.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(FetchError::Runtime)?;

    runtime.block_on(async {
        let mut downloader = Downloader::new();
        for job in &missing {
            let file = DLFile::new()
                .with_url(&job.url)
                .with_path(&job.download_path().to_string_lossy());
            // `add_file` consumes the downloader and returns a new one.
            downloader = downloader.add_file(file);
        }

        // Progress style that does not need the total file size.
        let style = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap()
            .progress_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
        downloader
            .with_style(style)
            .with_max_concurrent_downloads(4)
            .with_max_redirections(5)
            .start();
    });

    for job in &missing {
        if job.gzip {
            let raw = job.download_path();
            if raw.exists() {
                decompress_gz(&raw, &job.destination).map_err(io_err(&job.destination))?;
                fs::remove_file(&raw).map_err(io_err(&raw))?;
            }
        }
        if !job.destination.exists() {
            return Err(FetchError::Unavailable {
                url: job.url.clone(),
                destination: job.destination.clone(),
            });
        }
    }

    eprintln!("> Downloaded {} inputs.", missing.len());
    Ok(FetchSummary {
        downloaded: missing.len(),
        cached: cached.len(),
    })
}

fn decompress_gz(src: &Path, dest: &Path) -> io::Result<()> {
    let input = File::open(src)?;
    let decoder = MultiGzDecoder::new(BufReader::new(input));
    let mut reader = BufReader::new(decoder);

    let output = File::create(dest)?;
    let mut writer = BufWriter::new(output);

    let mut buffer = [0u8; 65536];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        writer.write_all(&buffer[..bytes_read])?;
    }
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    #[test]
    fn gz_suffix_marks_a_job_for_decompression() {
        let plain = FetchJob::new(
            "https://example.org/elev.tif".to_string(),
            PathBuf::from("cache/elevation.tif"),
        );
        assert!(!plain.gzip);
        assert_eq!(plain.download_path(), PathBuf::from("cache/elevation.tif"));

        let packed = FetchJob::new(
            "https://example.org/dump.tsv.gz".to_string(),
            PathBuf::from("cache/occurrences_picea_abies.tsv"),
        );
        assert!(packed.gzip);
        assert_eq!(
            packed.download_path(),
            PathBuf::from("cache/occurrences_picea_abies.tsv.gz")
        );
    }

    #[test]
    fn cached_jobs_are_never_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("boundary.geojson");
        fs::write(&destination, "{}").unwrap();

        let jobs = vec![FetchJob::new(
            "https://example.invalid/boundary.geojson".to_string(),
            destination,
        )];
        let summary = fetch_missing(&jobs).unwrap();
        assert_eq!(
            summary,
            FetchSummary {
                downloaded: 0,
                cached: 1
            }
        );
    }

    #[test]
    fn decompress_reproduces_the_original_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let packed = dir.path().join("dump.tsv.gz");
        let unpacked = dir.path().join("dump.tsv");

        let payload = b"gbifID\tdecimalLongitude\n1\t10.5\n";
        let mut encoder = GzEncoder::new(File::create(&packed).unwrap(), Compression::default());
        encoder.write_all(payload).unwrap();
        encoder.finish().unwrap();

        decompress_gz(&packed, &unpacked).unwrap();
        assert_eq!(fs::read(&unpacked).unwrap(), payload);
    }
}
