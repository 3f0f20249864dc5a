// Page source: image entries of a zip archive or a directory, in natural order

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::core::errors::{ArchiveError, ArchiveResult};
use crate::core::types::PageSource;
use crate::utils::natural_sort::natural_cmp;

/// Entries larger than this are skipped
pub const MAX_ENTRY_SIZE: u64 = 100 * 1024 * 1024;

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

/// Whether an entry path names a page image (metadata entries excluded).
pub fn is_page_image(entry_path: &str) -> bool {
    let path = Path::new(entry_path);
    if path.components().any(|c| c.as_os_str() == "__MACOSX") {
        return false;
    }
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.starts_with("._") {
        return false;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[derive(Debug, Clone)]
enum Location {
    ZipIndex(usize),
    File(PathBuf),
}

#[derive(Debug, Clone)]
struct PageEntry {
    filename: String,
    entry_path: String,
    location: Location,
}

enum Backing {
    Zip(ZipArchive<BufReader<File>>),
    Directory,
}

/// Image pages of one archive, listed and ordered up front, read lazily.
pub struct PageArchive {
    source: PathBuf,
    backing: Backing,
    entries: Vec<PageEntry>,
}

impl PageArchive {
    /// Open a `.zip` file or a directory and list its page images.
    ///
    /// Fails if the source is missing or unreadable, if an image entry is
    /// encrypted, or if there are no images at all.
    pub fn open(path: &Path) -> ArchiveResult<Self> {
        if !path.exists() {
            return Err(ArchiveError::NotFound(path.to_path_buf()));
        }

        let (backing, mut entries) = if path.is_dir() {
            (Backing::Directory, list_directory(path)?)
        } else {
            let mut archive = ZipArchive::new(BufReader::new(File::open(path)?))?;
            let entries = list_zip(&mut archive)?;
            (Backing::Zip(archive), entries)
        };

        if entries.is_empty() {
            return Err(ArchiveError::NoImages(path.to_path_buf()));
        }

        entries.sort_by(|a, b| {
            natural_cmp(&a.filename, &b.filename).then_with(|| natural_cmp(&a.entry_path, &b.entry_path))
        });

        info!("Found {} page images in {}", entries.len(), path.display());
        Ok(Self {
            source: path.to_path_buf(),
            backing,
            entries,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Consume the archive into a one-shot page iterator.
    pub fn into_pages(self) -> Pages {
        Pages {
            backing: self.backing,
            entries: self.entries.into_iter().enumerate(),
        }
    }
}

/// Lazily reads one page per step. An `Err` item means the archive became
/// unreadable mid-run.
pub struct Pages {
    backing: Backing,
    entries: std::iter::Enumerate<std::vec::IntoIter<PageEntry>>,
}

impl Pages {
    fn read(&mut self, entry: &PageEntry) -> ArchiveResult<Vec<u8>> {
        let entry_read = |source: std::io::Error| ArchiveError::EntryRead {
            name: entry.entry_path.clone(),
            source,
        };

        match (&mut self.backing, &entry.location) {
            (Backing::Zip(archive), Location::ZipIndex(index)) => {
                let mut file = archive.by_index(*index)?;
                let mut bytes = Vec::with_capacity(file.size().min(MAX_ENTRY_SIZE) as usize);
                file.read_to_end(&mut bytes).map_err(entry_read)?;
                Ok(bytes)
            }
            (_, Location::File(path)) => std::fs::read(path).map_err(entry_read),
            (Backing::Directory, Location::ZipIndex(_)) => Err(entry_read(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "zip entry requested from a directory source",
            ))),
        }
    }
}

impl Iterator for Pages {
    type Item = ArchiveResult<PageSource>;

    fn next(&mut self) -> Option<Self::Item> {
        let (position, entry) = self.entries.next()?;
        let page_number = position + 1;
        debug!("Reading page {} ({})", page_number, entry.entry_path);

        Some(self.read(&entry).map(|bytes| PageSource {
            page_number,
            filename: entry.filename,
            entry_path: entry.entry_path,
            image_bytes: Arc::new(bytes),
        }))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

fn too_large(name: &str, size: u64) -> bool {
    if size > MAX_ENTRY_SIZE {
        warn!("Skipping large file: {name} ({size} bytes exceeds {MAX_ENTRY_SIZE} bytes limit)");
        return true;
    }
    false
}

fn list_zip(archive: &mut ZipArchive<BufReader<File>>) -> ArchiveResult<Vec<PageEntry>> {
    let mut entries = Vec::new();

    for index in 0..archive.len() {
        // Raw access reads metadata without needing a password
        let file = archive.by_index_raw(index)?;
        if file.is_dir() || !is_page_image(file.name()) {
            continue;
        }

        let entry_path = file.name().to_string();
        if file.encrypted() {
            return Err(ArchiveError::PasswordProtected(entry_path));
        }
        if too_large(&entry_path, file.size()) {
            continue;
        }

        let filename = Path::new(&entry_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| entry_path.clone());

        entries.push(PageEntry {
            filename,
            entry_path,
            location: Location::ZipIndex(index),
        });
    }

    Ok(entries)
}

fn list_directory(root: &Path) -> ArchiveResult<Vec<PageEntry>> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let entry_path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if !is_page_image(&entry_path) {
            continue;
        }

        let size = entry.metadata().map_err(std::io::Error::from)?.len();
        if too_large(&entry_path, size) {
            continue;
        }

        entries.push(PageEntry {
            filename: entry.file_name().to_string_lossy().into_owned(),
            entry_path,
            location: Location::File(entry.path().to_path_buf()),
        });
    }

    Ok(entries)
}
