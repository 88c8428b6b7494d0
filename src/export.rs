//! Download artefacts for stored certificates.
//!
//! Roots are handed out as a bare `.crt` (their key never leaves the store);
//! every other certificate is bundled with its key into a zip archive.

use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::certificate_info::CertificateRecord;
use crate::encoding;
use crate::error::{PkiError, Result};

pub const CA_CERT_CONTENT_TYPE: &str = "application/x-x509-ca-cert";
pub const ZIP_CONTENT_TYPE: &str = "application/zip";

/// A file ready to be written to disk or returned as a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// File stem for a certificate: lowercase common name, spaces as underscores.
pub fn slug(common_name: &str) -> String {
    common_name.to_lowercase().replace(' ', "_")
}

/// SHA-256 fingerprint of the certificate's DER encoding, colon separated.
pub fn fingerprint(record: &CertificateRecord) -> Result<String> {
    let certificate = encoding::decode_certificate(&record.certificate_bytes)?;
    let der = certificate
        .to_der()
        .map_err(|e| PkiError::crypto("Failed to encode certificate as DER", e))?;
    let digest = hex::encode_upper(Sha256::digest(&der));
    Ok(digest
        .as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect::<Vec<_>>()
        .join(":"))
}

pub fn bundle(record: &CertificateRecord) -> Result<Download> {
    let name = slug(&record.info.common_name);
    if record.is_root() {
        return Ok(Download {
            file_name: format!("{}.crt", name),
            content_type: CA_CERT_CONTENT_TYPE,
            bytes: record.certificate_bytes.clone(),
        });
    }

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(format!("{}.crt", name), options)?;
    zip.write_all(&record.certificate_bytes)
        .map_err(zip::result::ZipError::from)?;
    zip.start_file(format!("{}.key", name), options.unix_permissions(0o600))?;
    zip.write_all(&record.private_key_bytes)
        .map_err(zip::result::ZipError::from)?;
    let bytes = zip.finish()?.into_inner();

    Ok(Download {
        file_name: format!("{}.zip", name),
        content_type: ZIP_CONTENT_TYPE,
        bytes,
    })
}

/// Write `bundle(record)` into `directory`, returning the file path.
pub fn write_bundle(directory: &Path, record: &CertificateRecord) -> Result<PathBuf> {
    let download = bundle(record)?;
    let path = directory.join(&download.file_name);
    fs::create_dir_all(directory).map_err(|e| PkiError::persistence(directory, e))?;
    fs::write(&path, &download.bytes).map_err(|e| PkiError::persistence(&path, e))?;
    Ok(path)
}

/// Write the certificate and key as separate `.crt` and `.key` files.
pub fn write_pair(directory: &Path, record: &CertificateRecord) -> Result<(PathBuf, PathBuf)> {
    let name = slug(&record.info.common_name);
    let certificate_path = directory.join(format!("{}.crt", name));
    let key_path = directory.join(format!("{}.key", name));
    fs::create_dir_all(directory).map_err(|e| PkiError::persistence(directory, e))?;
    fs::write(&certificate_path, &record.certificate_bytes)
        .map_err(|e| PkiError::persistence(&certificate_path, e))?;
    fs::write(&key_path, &record.private_key_bytes)
        .map_err(|e| PkiError::persistence(&key_path, e))?;
    restrict_permissions(&key_path)?;
    Ok((certificate_path, key_path))
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|e| PkiError::persistence(path, e))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate_info::CertificateInfo;
    use std::io::Read;

    fn record(cn: &str, parent_id: u64) -> CertificateRecord {
        let mut record = CertificateRecord::pending(CertificateInfo::new(cn, 30), parent_id);
        record.id = parent_id + 1;
        record.certificate_bytes = b"CERT".to_vec();
        record.private_key_bytes = b"KEY".to_vec();
        record
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("Yeka Root CA"), "yeka_root_ca");
    }

    #[test]
    fn test_root_download_is_certificate_only() {
        let download = bundle(&record("Test Root", 0)).unwrap();
        assert_eq!(download.file_name, "test_root.crt");
        assert_eq!(download.content_type, CA_CERT_CONTENT_TYPE);
        assert_eq!(download.bytes, b"CERT");
    }

    #[test]
    fn test_leaf_download_is_zip_with_key() {
        let download = bundle(&record("Go Web", 1)).unwrap();
        assert_eq!(download.file_name, "go_web.zip");
        assert_eq!(download.content_type, ZIP_CONTENT_TYPE);

        let mut archive = zip::ZipArchive::new(Cursor::new(download.bytes)).unwrap();
        assert_eq!(archive.len(), 2);
        let mut key = String::new();
        archive
            .by_name("go_web.key")
            .unwrap()
            .read_to_string(&mut key)
            .unwrap();
        assert_eq!(key, "KEY");
        assert!(archive.by_name("go_web.crt").is_ok());
    }

    #[test]
    fn test_write_pair() {
        let dir = tempfile::tempdir().unwrap();
        let (crt, key) = write_pair(&dir.path().join("out"), &record("Go Web", 1)).unwrap();
        assert_eq!(fs::read(crt).unwrap(), b"CERT");
        assert_eq!(fs::read(key).unwrap(), b"KEY");
    }
}
