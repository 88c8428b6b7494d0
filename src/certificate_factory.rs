//! Certificate Factory Module
//!
//! Turns certificate metadata into a signed X.509v3 certificate and a fresh
//! private key, anchored to a parent identity or self-signed when there is none.
//!
//! # Hierarchy
//! ```text
//! Root CA (self-signed, pathlen=2)
//!   ├── Intermediate CA (signed by parent, pathlen decreases per level)
//!   │     └── Server certificate (CA=false)
//!   └── Server certificate (CA=false)
//! ```
//!
//! All signing happens in [`CertificateFactory::create_certificate`]. Root and
//! server creation only differ in whether an [`Issuer`] is supplied, so both
//! paths share one encoding and signature routine.
//!
//! # Example
//! ```rust,no_run
//! use pki_tree::certificate_factory::{CertificateFactory, CertificateTemplate};
//! use pki_tree::certificate_info::CertificateInfo;
//! # fn example() -> pki_tree::error::Result<()> {
//! let factory = CertificateFactory::default();
//!
//! let root = factory.create_root_ca(CertificateTemplate::from_info(
//!     &CertificateInfo::new("Example Root CA", 3650).country("US"),
//! ))?;
//!
//! let server = factory.create_server_certificate(
//!     CertificateTemplate::from_info(&CertificateInfo::new("api.local", 365).dns_name("api.local")),
//!     &root.certificate,
//!     &root.private_key,
//! )?;
//! # let _ = server;
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
    SubjectKeyIdentifier,
};
use openssl::x509::{X509Name, X509NameRef, X509};
use tracing::debug;

use crate::certificate_info::CertificateInfo;
use crate::encoding;
use crate::error::{PkiError, Result};
use crate::key_generator::{KeyGenerator, PrivateKey};

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2
const SERIAL_NUMBER_BITS: i32 = 128;
pub const ROOT_CA_PATH_LENGTH: u32 = 2;

/// Everything the factory needs to know about the certificate to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateTemplate {
    pub common_name: String,
    pub country: String,
    pub organization: String,
    pub ip_addresses: Vec<String>,
    pub dns_names: Vec<String>,
    pub not_after: DateTime<Utc>,
    pub is_ca: bool,
    /// BasicConstraints pathlen for CA certificates.
    pub path_length: Option<u32>,
}

impl CertificateTemplate {
    pub fn from_info(info: &CertificateInfo) -> Self {
        Self {
            common_name: info.common_name.clone(),
            country: info.country.clone(),
            organization: info.organization.clone(),
            ip_addresses: info.ip_addresses.clone(),
            dns_names: info.dns_names.clone(),
            not_after: info.expires_at,
            is_ca: info.is_ca,
            path_length: None,
        }
    }

    fn to_info(&self) -> CertificateInfo {
        CertificateInfo {
            common_name: self.common_name.clone(),
            country: self.country.clone(),
            organization: self.organization.clone(),
            ip_addresses: self.ip_addresses.clone(),
            dns_names: self.dns_names.clone(),
            expires_at: self.not_after,
            is_ca: self.is_ca,
        }
    }
}

/// The identity that signs a non-root certificate.
#[derive(Debug, Clone, Copy)]
pub struct Issuer<'a> {
    pub certificate: &'a X509,
    pub key: &'a PrivateKey,
}

/// A freshly signed certificate and the key it certifies, not yet persisted.
#[derive(Debug, Clone)]
pub struct SignedPair {
    pub certificate: X509,
    pub private_key: PrivateKey,
}

impl SignedPair {
    /// PEM certificate and PKCS#8 key blobs, in that order.
    pub fn encode(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        Ok((
            encoding::encode_certificate(&self.certificate)?,
            encoding::encode_private_key(&self.private_key)?,
        ))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CertificateFactory {
    keys: KeyGenerator,
}

impl CertificateFactory {
    pub fn new(keys: KeyGenerator) -> Self {
        Self { keys }
    }

    pub fn key_generator(&self) -> &KeyGenerator {
        &self.keys
    }

    /// Self-signed CA certificate. `is_ca` is forced on.
    pub fn create_root_ca(&self, mut template: CertificateTemplate) -> Result<SignedPair> {
        template.is_ca = true;
        template.path_length = Some(template.path_length.unwrap_or(ROOT_CA_PATH_LENGTH));
        self.create_certificate(&template, None)
    }

    /// Certificate signed by `parent_key`, with the issuer taken from
    /// `parent_certificate`'s subject. Not a CA unless the template says so.
    pub fn create_server_certificate(
        &self,
        template: CertificateTemplate,
        parent_certificate: &X509,
        parent_key: &PrivateKey,
    ) -> Result<SignedPair> {
        self.create_certificate(
            &template,
            Some(Issuer {
                certificate: parent_certificate,
                key: parent_key,
            }),
        )
    }

    /// Build and sign a certificate.
    ///
    /// With no issuer the certificate signs itself using its own new key;
    /// otherwise it is signed by the issuer's key.
    pub fn create_certificate(
        &self,
        template: &CertificateTemplate,
        issuer: Option<Issuer<'_>>,
    ) -> Result<SignedPair> {
        template.to_info().validate()?;

        let private_key = self.keys.generate()?;
        let issuer_certificate = issuer.map(|i| i.certificate);

        let mut builder =
            X509::builder().map_err(|e| PkiError::crypto("Failed to create X509 builder", e))?;
        builder
            .set_version(X509_VERSION_3)
            .map_err(|e| PkiError::crypto("Failed to set version", e))?;

        let serial = random_serial()?;
        builder
            .set_serial_number(&serial)
            .map_err(|e| PkiError::crypto("Failed to set serial number", e))?;

        let subject_name = build_subject_name(template)?;
        builder
            .set_subject_name(&subject_name)
            .map_err(|e| PkiError::crypto("Failed to set subject", e))?;
        let issuer_name: &X509NameRef = match issuer_certificate {
            Some(parent) => parent.subject_name(),
            None => &subject_name,
        };
        builder
            .set_issuer_name(issuer_name)
            .map_err(|e| PkiError::crypto("Failed to set issuer", e))?;

        let not_before = Asn1Time::days_from_now(0)
            .map_err(|e| PkiError::crypto("Failed to create not_before", e))?;
        builder
            .set_not_before(&not_before)
            .map_err(|e| PkiError::crypto("Failed to set not_before", e))?;
        let not_after = Asn1Time::from_unix(template.not_after.timestamp())
            .map_err(|e| PkiError::crypto("Failed to create not_after", e))?;
        builder
            .set_not_after(&not_after)
            .map_err(|e| PkiError::crypto("Failed to set not_after", e))?;

        builder
            .set_pubkey(private_key.pkey())
            .map_err(|e| PkiError::crypto("Failed to set public key", e))?;

        let mut bc = BasicConstraints::new();
        bc.critical();
        if template.is_ca {
            bc.ca();
            if let Some(path_length) = template.path_length {
                bc.pathlen(path_length);
            }
        }
        let bc = bc
            .build()
            .map_err(|e| PkiError::crypto("Failed to build BasicConstraints", e))?;
        builder
            .append_extension(bc)
            .map_err(|e| PkiError::crypto("Failed to add BasicConstraints", e))?;

        let mut ku = KeyUsage::new();
        ku.critical();
        if template.is_ca {
            ku.key_cert_sign().crl_sign().digital_signature();
        } else {
            ku.digital_signature();
            // Key transport only makes sense for RSA keys
            if private_key.is_rsa() {
                ku.key_encipherment();
            }
        }
        let ku = ku
            .build()
            .map_err(|e| PkiError::crypto("Failed to build KeyUsage", e))?;
        builder
            .append_extension(ku)
            .map_err(|e| PkiError::crypto("Failed to add KeyUsage", e))?;

        let eku = ExtendedKeyUsage::new()
            .server_auth()
            .client_auth()
            .build()
            .map_err(|e| PkiError::crypto("Failed to build ExtendedKeyUsage", e))?;
        builder
            .append_extension(eku)
            .map_err(|e| PkiError::crypto("Failed to add ExtendedKeyUsage", e))?;

        let ski = SubjectKeyIdentifier::new()
            .build(&builder.x509v3_context(issuer_certificate.map(|c| &**c), None))
            .map_err(|e| PkiError::crypto("Failed to build SubjectKeyIdentifier", e))?;
        builder
            .append_extension(ski)
            .map_err(|e| PkiError::crypto("Failed to add SubjectKeyIdentifier", e))?;

        if let Some(parent) = issuer_certificate {
            let aki = AuthorityKeyIdentifier::new()
                .keyid(false)
                .issuer(false)
                .build(&builder.x509v3_context(Some(&**parent), None))
                .map_err(|e| PkiError::crypto("Failed to build AuthorityKeyIdentifier", e))?;
            builder
                .append_extension(aki)
                .map_err(|e| PkiError::crypto("Failed to add AuthorityKeyIdentifier", e))?;
        }

        if !template.ip_addresses.is_empty() || !template.dns_names.is_empty() {
            let mut san = SubjectAlternativeName::new();
            for dns in &template.dns_names {
                san.dns(dns);
            }
            for ip in &template.ip_addresses {
                san.ip(ip);
            }
            let san = san
                .build(&builder.x509v3_context(issuer_certificate.map(|c| &**c), None))
                .map_err(|e| PkiError::crypto("Failed to build SubjectAlternativeName", e))?;
            builder
                .append_extension(san)
                .map_err(|e| PkiError::crypto("Failed to add SubjectAlternativeName", e))?;
        }

        let signing_key = issuer.map(|i| i.key).unwrap_or(&private_key);
        builder
            .sign(signing_key.pkey(), MessageDigest::sha256())
            .map_err(|e| PkiError::crypto("Failed to sign certificate", e))?;

        debug!(
            common_name = %template.common_name,
            is_ca = template.is_ca,
            self_signed = issuer.is_none(),
            "signed certificate"
        );

        Ok(SignedPair {
            certificate: builder.build(),
            private_key,
        })
    }
}

fn random_serial() -> Result<openssl::asn1::Asn1Integer> {
    let mut serial = BigNum::new().map_err(|e| PkiError::crypto("Failed to allocate serial", e))?;
    serial
        .rand(SERIAL_NUMBER_BITS, MsbOption::MAYBE_ZERO, false)
        .map_err(|e| PkiError::crypto("Failed to generate serial", e))?;
    serial
        .to_asn1_integer()
        .map_err(|e| PkiError::crypto("Failed to encode serial", e))
}

fn build_subject_name(template: &CertificateTemplate) -> Result<X509Name> {
    let mut name_builder =
        X509Name::builder().map_err(|e| PkiError::crypto("Failed to create name builder", e))?;
    name_builder
        .append_entry_by_nid(Nid::COMMONNAME, &template.common_name)
        .map_err(|e| PkiError::crypto("Failed to set CN", e))?;
    if !template.country.is_empty() {
        name_builder
            .append_entry_by_nid(Nid::COUNTRYNAME, &template.country)
            .map_err(|e| PkiError::crypto("Failed to set country", e))?;
    }
    if !template.organization.is_empty() {
        name_builder
            .append_entry_by_nid(Nid::ORGANIZATIONNAME, &template.organization)
            .map_err(|e| PkiError::crypto("Failed to set organization", e))?;
    }
    Ok(name_builder.build())
}

/// `(nid, value)` pairs of a distinguished name, in order.
pub fn name_entries(name: &X509NameRef) -> Result<Vec<(Nid, String)>> {
    name.entries()
        .map(|entry| {
            let value = entry
                .data()
                .to_string()
                .map_err(|e| PkiError::decoding("name entry", e))?;
            Ok((entry.object().nid(), value))
        })
        .collect()
}

/// True when `child` names `issuer` as its issuer and carries a signature that
/// verifies against `issuer`'s public key.
pub fn issued_by(child: &X509, issuer: &X509) -> Result<bool> {
    if name_entries(child.issuer_name())? != name_entries(issuer.subject_name())? {
        return Ok(false);
    }
    let issuer_key = issuer
        .public_key()
        .map_err(|e| PkiError::crypto("Failed to read issuer public key", e))?;
    child
        .verify(&issuer_key)
        .map_err(|e| PkiError::crypto("Failed to verify certificate signature", e))
}
