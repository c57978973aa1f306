//! Jar container codec.
//!
//! A [`Package`] keeps the original archive open and records edits on top
//! of it. Entries nobody touched are raw-copied into the output, so their
//! compressed bytes, timestamps and extra fields survive unchanged. New and
//! replaced entries are deflated with a fixed timestamp, which keeps the
//! output of a patch run deterministic.

use std::io::{Cursor, Read, Write};

use tracing::trace;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("corrupt container: {0}")]
    CorruptContainer(String),

    #[error("entry {0:?} already exists")]
    DuplicateEntry(String),

    #[error("no entry {0:?}")]
    NoSuchEntry(String),
}

impl From<zip::result::ZipError> for ContainerError {
    fn from(e: zip::result::ZipError) -> Self {
        ContainerError::CorruptContainer(e.to_string())
    }
}

impl From<std::io::Error> for ContainerError {
    fn from(e: std::io::Error) -> Self {
        ContainerError::CorruptContainer(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ContainerError>;

#[derive(Debug, Clone)]
enum Payload {
    /// Still the archive's record at this index.
    Original(usize),
    Modified(Vec<u8>),
}

#[derive(Debug, Clone)]
struct Entry {
    path: String,
    payload: Payload,
}

pub struct Package {
    archive: ZipArchive<Cursor<Vec<u8>>>,
    entries: Vec<Entry>,
}

impl Package {
    /// Read the central directory of `bytes`.
    pub fn open(bytes: Vec<u8>) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut entries = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let file = archive.by_index_raw(i)?;
            entries.push(Entry {
                path: file.name().to_string(),
                payload: Payload::Original(i),
            });
        }
        Ok(Self { archive, entries })
    }

    /// Entry paths in archive order. Each call starts from the first entry.
    pub fn entries(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|e| e.path.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.position(path).is_some()
    }

    fn position(&self, path: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.path == path)
    }

    /// Uncompressed content of `path`.
    pub fn read(&mut self, path: &str) -> Result<Vec<u8>> {
        let pos = self
            .position(path)
            .ok_or_else(|| ContainerError::NoSuchEntry(path.to_string()))?;
        match &self.entries[pos].payload {
            Payload::Modified(bytes) => Ok(bytes.clone()),
            Payload::Original(index) => {
                let mut file = self.archive.by_index(*index)?;
                let mut out = Vec::with_capacity(file.size() as usize);
                file.read_to_end(&mut out)?;
                Ok(out)
            }
        }
    }

    pub fn replace(&mut self, path: &str, bytes: Vec<u8>) -> Result<()> {
        let pos = self
            .position(path)
            .ok_or_else(|| ContainerError::NoSuchEntry(path.to_string()))?;
        self.entries[pos].payload = Payload::Modified(bytes);
        Ok(())
    }

    /// Append a new entry at the end of the archive.
    pub fn add(&mut self, path: &str, bytes: Vec<u8>) -> Result<()> {
        if self.contains(path) {
            return Err(ContainerError::DuplicateEntry(path.to_string()));
        }
        self.entries.push(Entry {
            path: path.to_string(),
            payload: Payload::Modified(bytes),
        });
        Ok(())
    }

    pub fn remove(&mut self, path: &str) -> Result<()> {
        let pos = self
            .position(path)
            .ok_or_else(|| ContainerError::NoSuchEntry(path.to_string()))?;
        self.entries.remove(pos);
        Ok(())
    }

    /// Whether `path` still holds the bytes it was opened with.
    pub fn is_untouched(&self, path: &str) -> bool {
        self.position(path)
            .is_some_and(|p| matches!(self.entries[p].payload, Payload::Original(_)))
    }

    /// Serialize the archive with every edit applied.
    pub fn write(&mut self) -> Result<Vec<u8>> {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(DateTime::default());
        let mut out = ZipWriter::new(Cursor::new(Vec::new()));
        for entry in &self.entries {
            match &entry.payload {
                Payload::Original(index) => {
                    let file = self.archive.by_index_raw(*index)?;
                    out.raw_copy_file(file)?;
                }
                Payload::Modified(bytes) => {
                    trace!(path = %entry.path, len = bytes.len(), "writing entry");
                    out.start_file(entry.path.as_str(), options)?;
                    out.write_all(bytes)?;
                }
            }
        }
        Ok(out.finish()?.into_inner())
    }
}

/// Build an archive from `(path, bytes)` pairs with the same options the
/// writer uses for new entries.
pub fn build<'a>(entries: impl IntoIterator<Item = (&'a str, &'a [u8])>) -> Result<Vec<u8>> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());
    let mut out = ZipWriter::new(Cursor::new(Vec::new()));
    for (path, bytes) in entries {
        out.start_file(path, options)?;
        out.write_all(bytes)?;
    }
    Ok(out.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        build([
            ("plugin.yml", b"name: X\n".as_slice()),
            ("a/B.class", b"\xCA\xFE\xBA\xBE".as_slice()),
            ("readme.txt", b"hello".as_slice()),
        ])
        .unwrap()
    }

    #[test]
    fn test_entries_in_archive_order() {
        let pkg = Package::open(sample()).unwrap();
        let names: Vec<_> = pkg.entries().collect();
        assert_eq!(names, ["plugin.yml", "a/B.class", "readme.txt"]);
        // Restartable.
        assert_eq!(pkg.entries().count(), 3);
    }

    #[test]
    fn test_garbage_is_corrupt() {
        assert!(matches!(
            Package::open(b"not a zip at all".to_vec()),
            Err(ContainerError::CorruptContainer(_))
        ));
    }

    #[test]
    fn test_edits_apply_on_write() {
        let mut pkg = Package::open(sample()).unwrap();
        pkg.replace("readme.txt", b"bye".to_vec()).unwrap();
        pkg.add("license.properties", b"k=v\n".to_vec()).unwrap();
        pkg.remove("a/B.class").unwrap();
        assert!(matches!(
            pkg.add("plugin.yml", Vec::new()),
            Err(ContainerError::DuplicateEntry(_))
        ));
        assert!(matches!(pkg.remove("missing"), Err(ContainerError::NoSuchEntry(_))));

        let mut out = Package::open(pkg.write().unwrap()).unwrap();
        let names: Vec<String> = out.entries().map(str::to_string).collect();
        assert_eq!(names, ["plugin.yml", "readme.txt", "license.properties"]);
        assert_eq!(out.read("readme.txt").unwrap(), b"bye");
        assert_eq!(out.read("plugin.yml").unwrap(), b"name: X\n");
    }

    #[test]
    fn test_untouched_entries_are_raw_copied() {
        let original = sample();
        let mut pkg = Package::open(original.clone()).unwrap();
        assert!(pkg.is_untouched("a/B.class"));
        let rewritten = pkg.write().unwrap();
        let mut a = ZipArchive::new(Cursor::new(original)).unwrap();
        let mut b = ZipArchive::new(Cursor::new(rewritten)).unwrap();
        for i in 0..a.len() {
            let fa = a.by_index_raw(i).unwrap();
            let (name, crc, size, compressed) = (fa.name().to_string(), fa.crc32(), fa.size(), fa.compressed_size());
            drop(fa);
            let fb = b.by_name(&name).unwrap();
            assert_eq!((crc, size, compressed), (fb.crc32(), fb.size(), fb.compressed_size()));
        }
    }

    #[test]
    fn test_write_is_deterministic() {
        let mut a = Package::open(sample()).unwrap();
        a.add("x", b"1".to_vec()).unwrap();
        let mut b = Package::open(sample()).unwrap();
        b.add("x", b"1".to_vec()).unwrap();
        assert_eq!(a.write().unwrap(), b.write().unwrap());
    }
}
