//! Gzip-compressed tar archives of job output directories.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io;
use std::path::Path;

/// Compress `source` into `destination`. Entries are stored under the
/// directory's own name, so `plots/` archives as `plots/a.png`.
pub fn compress_directory(source: &Path, destination: &Path) -> io::Result<()> {
    let metadata = std::fs::metadata(source)?;
    if !metadata.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Directory not found: {}", source.display()),
        ));
    }

    let root = source
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| ".".into());

    let file = File::create(destination)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder.append_dir_all(&root, source)?;
    builder.into_inner()?.finish()?.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;

    fn entries(archive: &Path) -> Vec<String> {
        let mut archive = tar::Archive::new(GzDecoder::new(File::open(archive).unwrap()));
        let mut names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|entry| entry.unwrap().path().unwrap().display().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_compress_directory() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("plots");
        std::fs::create_dir_all(source.join("nested")).unwrap();
        std::fs::write(source.join("a.png"), b"png").unwrap();
        std::fs::write(source.join("nested/b.csv"), b"1,2").unwrap();

        let destination = dir.path().join("plots.tar.gz");
        compress_directory(&source, &destination).unwrap();

        let names = entries(&destination);
        assert!(names.contains(&"plots/a.png".to_string()));
        assert!(names.contains(&"plots/nested/b.csv".to_string()));
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = compress_directory(&dir.path().join("nope"), &dir.path().join("nope.tar.gz"))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
