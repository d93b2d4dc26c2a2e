use crate::error::{BootstrapError, Result};
use chrono::{Datelike, Utc};
use rcgen::{
    date_time_ymd, BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};
use tracing::debug;

const CA_VALIDITY_YEARS: i32 = 10;
const LEAF_VALIDITY_YEARS: i32 = 1;

/// PEM encoded certificate and private key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertPair {
    pub cert_pem: String,
    pub key_pem: String,
}

/// What a leaf certificate may be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Usage {
    Server,
    Client,
    ServerAndClient,
}

/// Subject and names of a certificate to issue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertRequest {
    pub common_name: String,
    pub organization: Option<String>,
    /// DNS names and IP addresses; IP literals become IP SANs
    pub sans: Vec<String>,
    pub usage: Usage,
}

impl CertRequest {
    pub fn new(common_name: impl Into<String>, usage: Usage) -> Self {
        Self {
            common_name: common_name.into(),
            organization: None,
            sans: Vec::new(),
            usage,
        }
    }

    pub fn organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn sans<I, S>(mut self, sans: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for san in sans {
            let san = san.into();
            if !san.is_empty() && !self.sans.contains(&san) {
                self.sans.push(san);
            }
        }
        self
    }
}

/// A signing certificate authority held in memory
pub struct CertificateAuthority {
    name: String,
    cert: Certificate,
    key: KeyPair,
    cert_pem: String,
}

impl CertificateAuthority {
    /// Mint a new self-signed authority
    pub fn generate(common_name: &str) -> Result<Self> {
        let err = |e: rcgen::Error| BootstrapError::certificate_error(common_name, e.to_string());

        let key = KeyPair::generate().map_err(err)?;
        let mut params = CertificateParams::new(Vec::<String>::new()).map_err(err)?;
        params.distinguished_name = distinguished_name(common_name, None);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
        ];
        set_validity(&mut params, CA_VALIDITY_YEARS);

        let cert = params.self_signed(&key).map_err(err)?;
        let cert_pem = cert.pem();
        debug!("Generated certificate authority {}", common_name);

        Ok(Self {
            name: common_name.to_string(),
            cert,
            key,
            cert_pem,
        })
    }

    /// Load an authority staged by an earlier pass
    pub fn from_pem(name: &str, cert_pem: &str, key_pem: &str) -> Result<Self> {
        let err = |e: rcgen::Error| BootstrapError::invalid_material(name, e.to_string());

        let key = KeyPair::from_pem(key_pem).map_err(err)?;
        let params = CertificateParams::from_ca_cert_pem(cert_pem).map_err(err)?;
        // Only used as an issuer handle; the original PEM stays the published CA
        let cert = params.self_signed(&key).map_err(err)?;

        Ok(Self {
            name: name.to_string(),
            cert,
            key,
            cert_pem: cert_pem.to_string(),
        })
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn key_pem(&self) -> String {
        self.key.serialize_pem()
    }

    /// Issue a leaf certificate with a fresh key
    pub fn issue(&self, request: &CertRequest) -> Result<CertPair> {
        let err =
            |e: rcgen::Error| BootstrapError::certificate_error(&request.common_name, e.to_string());

        let key = KeyPair::generate().map_err(err)?;
        let mut params = CertificateParams::new(request.sans.clone()).map_err(err)?;
        params.distinguished_name =
            distinguished_name(&request.common_name, request.organization.as_deref());
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = match request.usage {
            Usage::Server => vec![ExtendedKeyUsagePurpose::ServerAuth],
            Usage::Client => vec![ExtendedKeyUsagePurpose::ClientAuth],
            Usage::ServerAndClient => vec![
                ExtendedKeyUsagePurpose::ServerAuth,
                ExtendedKeyUsagePurpose::ClientAuth,
            ],
        };
        set_validity(&mut params, LEAF_VALIDITY_YEARS);

        let cert = params
            .signed_by(&key, &self.cert, &self.key)
            .map_err(err)?;
        debug!("Issued {} signed by {}", request.common_name, self.name);

        Ok(CertPair {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
        })
    }
}

/// Key pair the API server verifies service account tokens with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccountKey {
    pub private_pem: String,
    pub public_pem: String,
}

impl ServiceAccountKey {
    pub fn generate() -> Result<Self> {
        let key = KeyPair::generate()
            .map_err(|e| BootstrapError::certificate_error("sa", e.to_string()))?;
        Ok(Self {
            private_pem: key.serialize_pem(),
            public_pem: key.public_key_pem(),
        })
    }

    pub fn from_pem(private_pem: &str) -> Result<Self> {
        let key = KeyPair::from_pem(private_pem)
            .map_err(|e| BootstrapError::invalid_material("sa.key", e.to_string()))?;
        Ok(Self {
            private_pem: private_pem.to_string(),
            public_pem: key.public_key_pem(),
        })
    }
}

fn distinguished_name(common_name: &str, organization: Option<&str>) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    if let Some(organization) = organization {
        dn.push(DnType::OrganizationName, organization);
    }
    dn.push(DnType::CommonName, common_name);
    dn
}

fn set_validity(params: &mut CertificateParams, years: i32) {
    let today = Utc::now().date_naive();
    let (month, day) = (today.month() as u8, today.day() as u8);
    params.not_before = date_time_ymd(today.year(), month, day);
    // Clamp the day so the end date exists in every month
    params.not_after = date_time_ymd(today.year() + years, month, day.min(28));
}
