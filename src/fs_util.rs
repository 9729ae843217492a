use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use crate::error::AtlasError;

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<(), AtlasError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| AtlasError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| AtlasError::Filesystem(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| AtlasError::Filesystem(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(AtlasError::Filesystem(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| AtlasError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| AtlasError::Filesystem(err.to_string()))?;
        }
        let mut outfile =
            fs::File::create(&entry_path).map_err(|err| AtlasError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| AtlasError::Filesystem(err.to_string()))?;
    }
    Ok(())
}

pub fn validate_zip(zip_path: &Path) -> Result<(), AtlasError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| AtlasError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| AtlasError::Filesystem(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| AtlasError::Filesystem(err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        io::copy(&mut entry, &mut io::sink())
            .map_err(|err| AtlasError::Filesystem(err.to_string()))?;
    }
    Ok(())
}

/// Where a downloaded archive unpacks inside the session layout:
/// `DCIM*.zip` into `DCIM/`, `PROCESSED_DATA_<X>.zip` into
/// `PROCESSED_DATA/<X>/`, anything else into a folder named after its stem.
pub fn archive_destination(session_dir: &Path, key: &str) -> PathBuf {
    let stem = key.strip_suffix(".zip").unwrap_or(key);
    if stem.starts_with("DCIM") {
        return session_dir.join("DCIM");
    }
    if let Some(subfolder) = stem.strip_prefix("PROCESSED_DATA_") {
        return session_dir.join("PROCESSED_DATA").join(subfolder);
    }
    session_dir.join(stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_destinations() {
        let session = Path::new("/data/20231021_REU-TROUDEAU_ASV-1_01");
        assert_eq!(
            archive_destination(session, "DCIM.zip"),
            session.join("DCIM")
        );
        assert_eq!(
            archive_destination(session, "DCIM_2.zip"),
            session.join("DCIM")
        );
        assert_eq!(
            archive_destination(session, "PROCESSED_DATA_IA.zip"),
            session.join("PROCESSED_DATA").join("IA")
        );
        assert_eq!(
            archive_destination(session, "GPS.zip"),
            session.join("GPS")
        );
    }
}
