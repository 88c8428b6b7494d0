//! Certificate manager: orchestrates the storage and the certificate factory.
//!
//! A record moves through three states:
//!
//! ```text
//! Pending (caller template) -> Signed (in-flight key material) -> Persisted
//! ```
//!
//! `Signed` only exists inside [`Manager::create`]; nothing is written to the
//! storage until signing succeeded, so a failed creation leaves no record behind.
//! Errors from the storage and factory are returned unchanged.

use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::{X509StoreContext, X509};
use tracing::{debug, info};

use crate::certificate_factory::{
    issued_by, CertificateFactory, CertificateTemplate, SignedPair, ROOT_CA_PATH_LENGTH,
};
use crate::certificate_info::{CertificateInfo, CertificateRecord, ROOT_PARENT_ID};
use crate::encoding::{decode_certificate, decode_private_key};
use crate::error::{PkiError, Result};
use crate::storage::{ParentFilter, Storage};

pub struct Manager<S: Storage> {
    storage: S,
    factory: CertificateFactory,
}

impl<S: Storage> Manager<S> {
    pub fn new(storage: S, factory: CertificateFactory) -> Self {
        Self { storage, factory }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn factory(&self) -> &CertificateFactory {
        &self.factory
    }

    /// Sign and persist `record`, returning its new id.
    ///
    /// A `parent_id` of zero creates a self-signed root (and marks the record's
    /// info as a CA); otherwise the parent is loaded and must be able to sign.
    /// On success the record carries its id and key material; on failure it is
    /// left as the caller passed it.
    pub fn create(&self, record: &mut CertificateRecord) -> Result<u64> {
        if record.id != 0 {
            return Err(PkiError::Validation(format!(
                "record already has id {}",
                record.id
            )));
        }
        record.info.validate()?;

        let signed = if record.is_root() {
            self.factory
                .create_root_ca(CertificateTemplate::from_info(&record.info))?
        } else {
            self.sign_with_parent(record)?
        };

        let mut persisted = record.clone();
        if persisted.is_root() {
            persisted.info.is_ca = true;
        }
        let (certificate_bytes, private_key_bytes) = signed.encode()?;
        persisted.certificate_bytes = certificate_bytes;
        persisted.private_key_bytes = private_key_bytes;

        let id = self.storage.store(&mut persisted)?;
        *record = persisted;
        info!(id, parent_id = record.parent_id, "created certificate");
        Ok(id)
    }

    pub fn add_root_ca(&self, info: CertificateInfo) -> Result<CertificateRecord> {
        let mut record = CertificateRecord::pending(info, ROOT_PARENT_ID);
        self.create(&mut record)?;
        Ok(record)
    }

    pub fn add_server_certificate(
        &self,
        info: CertificateInfo,
        parent_id: u64,
    ) -> Result<CertificateRecord> {
        if parent_id == ROOT_PARENT_ID {
            return Err(PkiError::Validation(
                "server certificates need a parent id".to_string(),
            ));
        }
        let mut record = CertificateRecord::pending(info, parent_id);
        self.create(&mut record)?;
        Ok(record)
    }

    pub fn load(&self, id: u64) -> Result<CertificateRecord> {
        self.storage.load(id)
    }

    pub fn search(&self, query: &str, filter: ParentFilter) -> Result<Vec<CertificateRecord>> {
        self.storage.search(query, filter)
    }

    /// The record `id` followed by each ancestor up to its root.
    pub fn chain(&self, id: u64) -> Result<Vec<CertificateRecord>> {
        let mut chain = Vec::new();
        let mut current = self.storage.load(id)?;
        loop {
            if current.is_root() {
                chain.push(current);
                return Ok(chain);
            }
            // Parents are always created first, so ids strictly decrease.
            if current.parent_id >= current.id {
                return Err(PkiError::IndexCorruption(format!(
                    "record {} has parent {} that is not older",
                    current.id, current.parent_id
                )));
            }
            let parent = self.storage.load(current.parent_id)?;
            chain.push(current);
            current = parent;
        }
    }

    /// Check the chain of trust from `id` to its root: every certificate must
    /// name its parent as issuer and verify against the parent's key, the root
    /// must be self-signed, and OpenSSL must accept the assembled chain.
    pub fn verify(&self, id: u64) -> Result<bool> {
        let certificates = self
            .chain(id)?
            .iter()
            .map(|record| decode_certificate(&record.certificate_bytes))
            .collect::<Result<Vec<X509>>>()?;

        for link in certificates.windows(2) {
            if !issued_by(&link[0], &link[1])? {
                debug!(id, "certificate is not issued by its parent");
                return Ok(false);
            }
        }
        let (leaf, root) = match (certificates.first(), certificates.last()) {
            (Some(leaf), Some(root)) => (leaf, root),
            _ => return Err(PkiError::NotFound { id }),
        };
        if !issued_by(root, root)? {
            debug!(id, "root certificate is not self-signed");
            return Ok(false);
        }

        let mut trust = X509StoreBuilder::new()
            .map_err(|e| PkiError::crypto("Failed to create X509 store", e))?;
        trust
            .add_cert(root.clone())
            .map_err(|e| PkiError::crypto("Failed to add root to X509 store", e))?;
        let trust = trust.build();

        let mut intermediates: Stack<X509> =
            Stack::new().map_err(|e| PkiError::crypto("Failed to create certificate stack", e))?;
        for certificate in certificates
            .iter()
            .skip(1)
            .take(certificates.len().saturating_sub(2))
        {
            intermediates
                .push(certificate.clone())
                .map_err(|e| PkiError::crypto("Failed to add intermediate", e))?;
        }

        let mut context = X509StoreContext::new()
            .map_err(|e| PkiError::crypto("Failed to create X509 store context", e))?;
        context
            .init(&trust, leaf, &intermediates, |ctx| {
                let valid = ctx.verify_cert()?;
                if !valid {
                    debug!(id, error = %ctx.error(), "chain verification failed");
                }
                Ok(valid)
            })
            .map_err(|e| PkiError::crypto("Failed to verify certificate chain", e))
    }

    fn sign_with_parent(&self, record: &CertificateRecord) -> Result<SignedPair> {
        let parent = self.storage.load(record.parent_id)?;
        if !parent.can_sign() {
            return Err(PkiError::Validation(format!(
                "parent {} is not a certificate authority",
                parent.id
            )));
        }
        if !parent.has_key_material() {
            return Err(PkiError::decoding(
                format!("certificate {}", parent.id),
                "missing certificate or private key",
            ));
        }
        let parent_certificate = decode_certificate(&parent.certificate_bytes)?;
        let parent_key = decode_private_key(&parent.private_key_bytes)?;

        let mut template = CertificateTemplate::from_info(&record.info);
        if template.is_ca {
            template.path_length = Some(self.child_path_length(&parent)?);
        }
        self.factory
            .create_server_certificate(template, &parent_certificate, &parent_key)
    }

    /// BasicConstraints pathlen for a CA issued by `parent`, counting down
    /// from the root's length one per intermediate level.
    fn child_path_length(&self, parent: &CertificateRecord) -> Result<u32> {
        let depth = self.chain(parent.id)?.len() as u32 - 1;
        ROOT_CA_PATH_LENGTH
            .checked_sub(depth)
            .and_then(|parent_length| parent_length.checked_sub(1))
            .ok_or_else(|| {
                PkiError::Validation(format!(
                    "certificate {} cannot issue further CA certificates",
                    parent.id
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_storage::FileStorage;

    /// Accepts nothing, so every creation fails after signing.
    struct ReadOnlyStorage;

    impl Storage for ReadOnlyStorage {
        fn store(&self, _record: &mut CertificateRecord) -> Result<u64> {
            Err(PkiError::Validation("storage is read-only".to_string()))
        }

        fn load(&self, id: u64) -> Result<CertificateRecord> {
            Err(PkiError::NotFound { id })
        }

        fn search(&self, _query: &str, _filter: ParentFilter) -> Result<Vec<CertificateRecord>> {
            Ok(Vec::new())
        }
    }

    fn manager(dir: &tempfile::TempDir) -> Manager<FileStorage> {
        let storage = FileStorage::open(dir.path().join("certs.json")).unwrap();
        Manager::new(storage, CertificateFactory::default())
    }

    #[test]
    fn test_root_is_marked_ca() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);
        let root = manager
            .add_root_ca(CertificateInfo::new("Test Root", 365))
            .unwrap();
        assert_eq!(root.id, 1);
        assert!(root.info.is_ca);
        assert!(root.has_key_material());
        assert!(manager.verify(root.id).unwrap());
    }

    #[test]
    fn test_failed_create_leaves_record_untouched() {
        let manager = Manager::new(ReadOnlyStorage, CertificateFactory::default());
        let mut record = CertificateRecord::pending(CertificateInfo::new("Test Root", 365), 0);
        let original = record.clone();

        let err = manager.create(&mut record).unwrap_err();
        assert!(matches!(err, PkiError::Validation(_)));
        assert_eq!(record, original);
        assert!(!record.info.is_ca);
        assert!(!record.has_key_material());
    }

    #[test]
    fn test_leaf_cannot_sign() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);
        let root = manager
            .add_root_ca(CertificateInfo::new("Test Root", 365))
            .unwrap();
        let leaf = manager
            .add_server_certificate(CertificateInfo::new("leaf.local", 30), root.id)
            .unwrap();

        let err = manager
            .add_server_certificate(CertificateInfo::new("grandchild", 30), leaf.id)
            .unwrap_err();
        assert!(matches!(err, PkiError::Validation(_)));
        assert_eq!(manager.search("", ParentFilter::All).unwrap().len(), 2);
    }

    #[test]
    fn test_intermediate_chain_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);
        let root = manager
            .add_root_ca(CertificateInfo::new("Yeka Root CA", 365))
            .unwrap();
        let intermediate = manager
            .add_server_certificate(
                CertificateInfo::new("Yeka Intermediate CA", 180).certificate_authority(true),
                root.id,
            )
            .unwrap();
        let leaf = manager
            .add_server_certificate(
                CertificateInfo::new("Go Web", 30).dns_name("cc.local"),
                intermediate.id,
            )
            .unwrap();

        let chain: Vec<u64> = manager.chain(leaf.id).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(chain, vec![leaf.id, intermediate.id, root.id]);
        assert!(manager.verify(leaf.id).unwrap());
    }

    #[test]
    fn test_path_length_is_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);
        let mut parent = manager
            .add_root_ca(CertificateInfo::new("root", 365))
            .unwrap()
            .id;
        for level in 0..ROOT_CA_PATH_LENGTH {
            parent = manager
                .add_server_certificate(
                    CertificateInfo::new(format!("level {}", level), 30).certificate_authority(true),
                    parent,
                )
                .unwrap()
                .id;
        }
        let err = manager
            .add_server_certificate(
                CertificateInfo::new("too deep", 30).certificate_authority(true),
                parent,
            )
            .unwrap_err();
        assert!(matches!(err, PkiError::Validation(_)));

        let leaf = manager
            .add_server_certificate(CertificateInfo::new("leaf", 30), parent)
            .unwrap();
        assert!(manager.verify(leaf.id).unwrap());
    }

    #[test]
    fn test_tampered_certificate_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);
        let root_a = manager.add_root_ca(CertificateInfo::new("Root", 365)).unwrap();
        let root_b = manager.add_root_ca(CertificateInfo::new("Root", 365)).unwrap();
        let leaf = manager
            .add_server_certificate(CertificateInfo::new("leaf", 30), root_a.id)
            .unwrap();

        let leaf_cert = decode_certificate(&leaf.certificate_bytes).unwrap();
        let other_root = decode_certificate(&root_b.certificate_bytes).unwrap();
        // Same subject name but a different key must not verify.
        assert!(!issued_by(&leaf_cert, &other_root).unwrap());
    }
}
