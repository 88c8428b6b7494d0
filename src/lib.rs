//! PKI Tree - Self-hosted Certificate Authority Library
//!
//! Issues X.509 certificates arranged in a parent/child hierarchy and keeps
//! every certificate together with its private key in a persistent store
//! indexed by parent.
//!
//! # Overview
//!
//! ```text
//! Root CA (self-signed, parent_id = 0, pathlen=2)
//!   ├── Intermediate CA (is_ca = true, pathlen=1)
//!   │     └── Server certificate (CA=false)
//!   └── Server certificate (CA=false)
//! ```
//!
//! Identifiers are positive, strictly increasing and never reused. A record's
//! parent always exists and always has a smaller id, so the tree is acyclic.
//!
//! # Modules
//!
//! - [`key_generator`]: ECDSA P-256 (default) and RSA private keys
//! - [`certificate_factory`]: builds and signs certificates from a template
//! - [`storage`]: the `Storage` trait consumed by the manager
//! - [`file_storage`]: JSON snapshot backed store with atomic persistence
//! - [`manager`]: creation, chain walking and chain-of-trust verification
//! - [`export`]: `.crt` and zip download artefacts
//! - [`configs`]: TOML application configuration
//!
//! # Example
//!
//! ```no_run
//! use pki_tree::certificate_factory::CertificateFactory;
//! use pki_tree::certificate_info::CertificateInfo;
//! use pki_tree::file_storage::FileStorage;
//! use pki_tree::manager::Manager;
//!
//! fn main() -> pki_tree::error::Result<()> {
//!     let storage = FileStorage::open("data/certificates.json")?;
//!     let manager = Manager::new(storage, CertificateFactory::default());
//!
//!     let root = manager.add_root_ca(CertificateInfo::new("Yeka Root CA", 3650))?;
//!     let server = manager.add_server_certificate(
//!         CertificateInfo::new("Go Web", 365)
//!             .ip_address("127.0.0.1")
//!             .dns_name("cc.local"),
//!         root.id,
//!     )?;
//!     assert!(manager.verify(server.id)?);
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! Library operations return [`error::Result`]; callers that only need to
//! distinguish missing records use [`error::PkiError::is_not_found`].

pub mod certificate_factory;
pub mod certificate_info;
pub mod configs;
pub mod encoding;
pub mod error;
pub mod export;
pub mod file_storage;
pub mod key_generator;
pub mod manager;
pub mod storage;
