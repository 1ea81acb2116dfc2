//! Release archive resource - download and extract the daemon binary

use anyhow::{Context, Result, bail};
use declarative::{ApplyContext, ApplyResult, Resource, ResourceState};
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::Attributes;
use super::file::write_atomic;
use crate::schema::ArchiveFormat;

/// Release archives are a few MB; anything near this is not a release
const MAX_DOWNLOAD_SIZE: u64 = 200 * 1024 * 1024;

/// Fetches the raw bytes of an archive
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Downloads over HTTP(S)
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpFetcher;

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let agent = ureq::Agent::new_with_defaults();

        let mut response = agent
            .get(url)
            .header(
                "User-Agent",
                concat!("sachet-converge/", env!("CARGO_PKG_VERSION")),
            )
            .call()
            .with_context(|| format!("Failed to download {url}"))?;

        response
            .body_mut()
            .with_config()
            .limit(MAX_DOWNLOAD_SIZE)
            .read_to_vec()
            .context("Failed to read response body")
    }
}

/// The daemon binary extracted from a release archive
///
/// Present when `<release_dir>/<binary>` exists. Other versions already
/// under the install root are left alone.
pub struct ReleaseArchive {
    pub url: String,
    pub format: ArchiveFormat,
    pub release_dir: PathBuf,
    pub binary: String,
    fetcher: Arc<dyn Fetcher>,
}

impl ReleaseArchive {
    pub fn new(
        url: &str,
        format: ArchiveFormat,
        release_dir: impl AsRef<Path>,
        binary: &str,
    ) -> Self {
        Self {
            url: url.to_string(),
            format,
            release_dir: release_dir.as_ref().to_path_buf(),
            binary: binary.to_string(),
            fetcher: Arc::new(HttpFetcher),
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Where the extracted binary lives
    pub fn binary_path(&self) -> PathBuf {
        self.release_dir.join(&self.binary)
    }

    fn installed(&self) -> bool {
        self.binary_path().is_file()
    }
}

impl fmt::Debug for ReleaseArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseArchive")
            .field("url", &self.url)
            .field("format", &self.format)
            .field("release_dir", &self.release_dir)
            .field("binary", &self.binary)
            .finish_non_exhaustive()
    }
}

impl Resource for ReleaseArchive {
    fn id(&self) -> String {
        self.release_dir.display().to_string()
    }

    fn description(&self) -> String {
        format!("Install {} from {}", self.binary_path().display(), self.url)
    }

    fn resource_type(&self) -> &'static str {
        "archive"
    }

    fn current_state(&self) -> Result<ResourceState> {
        if self.installed() {
            Ok(self.desired_state())
        } else {
            Ok(ResourceState::Absent)
        }
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::Present {
            details: Some(self.binary_path().display().to_string()),
        }
    }

    fn apply(&self, ctx: &mut ApplyContext) -> Result<ApplyResult> {
        if self.installed() {
            return Ok(ApplyResult::NoChange);
        }
        if ctx.dry_run {
            return Ok(ApplyResult::Skipped {
                reason: "Dry run".to_string(),
            });
        }

        log::info!("Downloading {}", self.url);
        let data = self.fetcher.fetch(&self.url)?;
        log::debug!("Downloaded {} bytes", data.len());

        let binary = match self.format {
            ArchiveFormat::TarGz => extract_targz(&data, &self.binary)?,
            ArchiveFormat::Zip => extract_zip(&data, &self.binary)?,
        };

        fs::create_dir_all(&self.release_dir)
            .with_context(|| format!("Failed to create {}", self.release_dir.display()))?;
        write_atomic(&self.binary_path(), &binary, &Attributes::with_mode(0o755))?;
        log::info!("Installed {}", self.binary_path().display());

        Ok(ApplyResult::Created)
    }
}

fn is_binary_entry(path: &Path, binary_name: &str) -> bool {
    path.file_name().is_some_and(|n| n == binary_name)
}

/// Pull the named binary out of a gzipped tarball
pub fn extract_targz(data: &[u8], binary_name: &str) -> Result<Vec<u8>> {
    use flate2::read::GzDecoder;
    use tar::Archive;

    let mut archive = Archive::new(GzDecoder::new(data));
    for entry in archive.entries().context("Failed to read tar archive")? {
        let mut entry = entry.context("Corrupt tar entry")?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        if is_binary_entry(&entry.path()?, binary_name) {
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents)?;
            return Ok(contents);
        }
    }

    bail!("Binary '{}' not found in archive", binary_name)
}

/// Pull the named binary out of a zip archive
pub fn extract_zip(data: &[u8], binary_name: &str) -> Result<Vec<u8>> {
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(data)).context("Failed to read zip archive")?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() || !is_binary_entry(Path::new(file.name()), binary_name) {
            continue;
        }
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;
        return Ok(contents);
    }

    bail!("Binary '{}' not found in zip archive", binary_name)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn targz(files: &[(&str, &[u8])]) -> Vec<u8> {
        let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn zipped(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (path, data) in files {
            writer
                .start_file(*path, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    /// Serves fixed bytes and counts requests
    pub(crate) struct Canned {
        pub(crate) data: Vec<u8>,
        pub(crate) hits: Arc<AtomicUsize>,
    }

    impl Fetcher for Canned {
        fn fetch(&self, _url: &str) -> Result<Vec<u8>> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            Ok(self.data.clone())
        }
    }

    #[test]
    fn test_extract_targz_finds_nested_binary() {
        let data = targz(&[
            ("sachet-0.3.1.linux-amd64/LICENSE", b"MIT"),
            ("sachet-0.3.1.linux-amd64/sachet", b"\x7fELF"),
        ]);
        assert_eq!(extract_targz(&data, "sachet").unwrap(), b"\x7fELF");
        assert!(extract_targz(&data, "other").is_err());
    }

    #[test]
    fn test_extract_zip() {
        let data = zipped(&[("sachet-0.3.1.windows-amd64/sachet", b"MZ")]);
        assert_eq!(extract_zip(&data, "sachet").unwrap(), b"MZ");
        assert!(extract_zip(&data, "nope").is_err());
    }

    #[test]
    fn test_apply_downloads_once() {
        let tmp = tempfile::tempdir().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let archive = ReleaseArchive::new(
            "https://example.invalid/sachet.tar.gz",
            ArchiveFormat::TarGz,
            tmp.path().join("sachet-0.3.1.linux-amd64"),
            "sachet",
        )
        .with_fetcher(Arc::new(Canned {
            data: targz(&[("sachet-0.3.1.linux-amd64/sachet", b"binary")]),
            hits: hits.clone(),
        }));

        let mut ctx = ApplyContext::new(false);
        assert_eq!(archive.current_state().unwrap(), ResourceState::Absent);
        assert!(matches!(archive.apply(&mut ctx).unwrap(), ApplyResult::Created));

        let path = archive.binary_path();
        assert_eq!(fs::read(&path).unwrap(), b"binary");
        assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o755);

        assert!(matches!(archive.apply(&mut ctx).unwrap(), ApplyResult::NoChange));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_archive_without_binary_fails_cleanly() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = ReleaseArchive::new(
            "https://example.invalid/sachet.tar.gz",
            ArchiveFormat::TarGz,
            tmp.path().join("release"),
            "sachet",
        )
        .with_fetcher(Arc::new(Canned {
            data: targz(&[("README.md", b"hi")]),
            hits: Arc::new(AtomicUsize::new(0)),
        }));

        assert!(archive.apply(&mut ApplyContext::new(false)).is_err());
        assert!(!archive.release_dir.exists());
    }
}
