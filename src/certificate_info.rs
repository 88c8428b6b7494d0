//! Certificate metadata and the durable record the store persists.

use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PkiError, Result};

/// Parent id carried by root records.
pub const ROOT_PARENT_ID: u64 = 0;

/// Subject metadata embedded in every record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub common_name: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub organization: String,
    /// Textual IPv4/IPv6 addresses placed in the subject alternative name.
    #[serde(default)]
    pub ip_addresses: Vec<String>,
    #[serde(default)]
    pub dns_names: Vec<String>,
    pub expires_at: DateTime<Utc>,
    /// Whether a child certificate may itself sign certificates. Roots are
    /// always CAs regardless of this flag.
    #[serde(default)]
    pub is_ca: bool,
}

impl CertificateInfo {
    /// Info with only a common name, valid for `validity_days` from now.
    pub fn new(common_name: impl Into<String>, validity_days: u32) -> Self {
        Self {
            common_name: common_name.into(),
            country: String::new(),
            organization: String::new(),
            ip_addresses: Vec::new(),
            dns_names: Vec::new(),
            expires_at: Utc::now() + Duration::days(i64::from(validity_days)),
            is_ca: false,
        }
    }

    pub fn country(mut self, country: impl Into<String>) -> Self {
        self.country = country.into();
        self
    }

    pub fn organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = organization.into();
        self
    }

    pub fn ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_addresses.push(ip.into());
        self
    }

    pub fn dns_name(mut self, dns: impl Into<String>) -> Self {
        self.dns_names.push(dns.into());
        self
    }

    pub fn expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = expires_at;
        self
    }

    pub fn certificate_authority(mut self, is_ca: bool) -> Self {
        self.is_ca = is_ca;
        self
    }

    /// Required-field checks applied before any key is generated.
    pub fn validate(&self) -> Result<()> {
        if self.common_name.trim().is_empty() {
            return Err(PkiError::Validation("common name is required".to_string()));
        }
        if !self.country.is_empty()
            && !(self.country.len() == 2 && self.country.chars().all(|c| c.is_ascii_alphabetic()))
        {
            return Err(PkiError::Validation(format!(
                "country must be a two-letter code, got {:?}",
                self.country
            )));
        }
        for ip in &self.ip_addresses {
            ip.parse::<IpAddr>()
                .map_err(|_| PkiError::Validation(format!("invalid IP address {:?}", ip)))?;
        }
        for dns in &self.dns_names {
            if dns.is_empty() || dns.chars().any(char::is_whitespace) {
                return Err(PkiError::Validation(format!("invalid DNS name {:?}", dns)));
            }
        }
        if self.expires_at <= Utc::now() {
            return Err(PkiError::Validation(format!(
                "expiry {} is not in the future",
                self.expires_at
            )));
        }
        Ok(())
    }

    /// Case-insensitive match of `query` against the common name and DNS names.
    /// An empty query matches everything.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return true;
        }
        self.common_name.to_lowercase().contains(&query)
            || self
                .dns_names
                .iter()
                .any(|dns| dns.to_lowercase().contains(&query))
    }
}

/// The durable unit of storage.
///
/// `id` is zero until the store assigns one. Certificate and key blobs hold the
/// PEM transport encoding produced by [`crate::encoding`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    #[serde(default)]
    pub id: u64,
    pub parent_id: u64,
    #[serde(with = "base64_bytes", default)]
    pub certificate_bytes: Vec<u8>,
    #[serde(with = "base64_bytes", default)]
    pub private_key_bytes: Vec<u8>,
    pub info: CertificateInfo,
}

impl CertificateRecord {
    /// A pending record: metadata and parent only, no key material yet.
    pub fn pending(info: CertificateInfo, parent_id: u64) -> Self {
        Self {
            id: 0,
            parent_id,
            certificate_bytes: Vec::new(),
            private_key_bytes: Vec::new(),
            info,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id == ROOT_PARENT_ID
    }

    /// Roots always sign; children only when created as CAs.
    pub fn can_sign(&self) -> bool {
        self.is_root() || self.info.is_ca
    }

    pub fn has_key_material(&self) -> bool {
        !self.certificate_bytes.is_empty() && !self.private_key_bytes.is_empty()
    }
}

impl std::fmt::Debug for CertificateRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateRecord")
            .field("id", &self.id)
            .field("parent_id", &self.parent_id)
            .field("certificate_bytes", &self.certificate_bytes.len())
            .field("private_key_bytes", &"<redacted>")
            .field("info", &self.info)
            .finish()
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_info() -> CertificateInfo {
        CertificateInfo::new("Test Root", 30)
            .country("ID")
            .organization("Example")
            .ip_address("127.0.0.1")
            .dns_name("ca.local")
    }

    #[test]
    fn test_valid_info_passes() {
        assert!(valid_info().validate().is_ok());
    }

    #[test]
    fn test_validation_rules() {
        let cases = [
            CertificateInfo { common_name: "   ".to_string(), ..valid_info() },
            CertificateInfo { country: "Indonesia".to_string(), ..valid_info() },
            CertificateInfo { ip_addresses: vec!["300.1.1.1".to_string()], ..valid_info() },
            CertificateInfo { dns_names: vec!["bad name".to_string()], ..valid_info() },
            CertificateInfo { expires_at: Utc::now() - Duration::days(1), ..valid_info() },
        ];
        for info in cases {
            assert!(
                matches!(info.validate(), Err(PkiError::Validation(_))),
                "{:?} should be rejected",
                info
            );
        }
    }

    #[test]
    fn test_query_matches_case_insensitively() {
        let info = valid_info();
        assert!(info.matches(""));
        assert!(info.matches("test root"));
        assert!(info.matches("CA.LOCAL"));
        assert!(!info.matches("example"));
    }

    #[test]
    fn test_record_json_keeps_blobs() {
        let mut record = CertificateRecord::pending(valid_info(), 3);
        record.id = 4;
        record.certificate_bytes = b"-----BEGIN CERTIFICATE-----".to_vec();
        record.private_key_bytes = vec![0, 1, 2, 255];
        let json = serde_json::to_string(&record).unwrap();
        let decoded: CertificateRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_debug_redacts_key() {
        let mut record = CertificateRecord::pending(valid_info(), 0);
        record.private_key_bytes = b"secret-key-material".to_vec();
        let debug_str = format!("{:?}", record);
        assert!(!debug_str.contains("secret-key-material"));
        assert!(debug_str.contains("redacted"));
    }
}
