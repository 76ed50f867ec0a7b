use std::fmt;

use crate::error::Result;

/**
    Role a license assigns to a key.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyRole {
    Content,
    Signing,
    Other,
}

/**
    A key decoded from a license response.
*/
#[derive(Clone, PartialEq, Eq)]
pub struct LicenseKey {
    pub kid: Vec<u8>,
    pub key: Vec<u8>,
    pub role: KeyRole,
}

impl LicenseKey {
    pub fn new(kid: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>, role: KeyRole) -> Self {
        Self {
            kid: kid.into(),
            key: key.into(),
            role,
        }
    }
}

/// Renders as lowercase hex `kid:key`.
impl fmt::Display for LicenseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", hex::encode(&self.kid), hex::encode(&self.key))
    }
}

impl fmt::Debug for LicenseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LicenseKey")
            .field("kid", &hex::encode(&self.kid))
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

/**
    The Widevine CDM capability the pipeline delegates to.

    Device material is always handed over as a WVD container. Errors are
    reported as [`crate::Error::DeviceUnavailable`] for device problems and
    [`crate::Error::License`] for protocol problems.
*/
pub trait Cdm: Send + Sync {
    /// Convert a private key in any supported encoding to PKCS#1 DER.
    fn private_key_der(&self, private_key: &[u8]) -> Result<Vec<u8>>;

    /// Build a CDM device from a WVD container without keeping it.
    fn check_device(&self, wvd: &[u8]) -> Result<()>;

    /// Fixed request body that asks a license server for its service certificate.
    fn service_certificate_request(&self) -> Vec<u8>;

    /// Open a license session for the device in `wvd`.
    fn open(&self, wvd: &[u8]) -> Result<Box<dyn CdmSession>>;
}

/**
    One license exchange. A session is used for a single challenge and
    dropped afterwards.
*/
pub trait CdmSession: Send {
    fn set_service_certificate(&mut self, certificate: &[u8]) -> Result<()>;

    /// Automatic-type license challenge for a PSSH box.
    fn license_challenge(&mut self, pssh: &[u8]) -> Result<Vec<u8>>;

    fn parse_license(&mut self, response: &[u8]) -> Result<Vec<LicenseKey>>;
}

#[cfg(feature = "widevine")]
pub use self::widevine::WidevineCdm;

#[cfg(feature = "widevine")]
mod widevine {
    use rsa::RsaPrivateKey;
    use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
    use rsa::pkcs8::DecodePrivateKey;

    use drm_widevine::core::{KeyType, PsshBox};
    use drm_widevine::{Device, LicenseType, Session};

    use super::{Cdm, CdmSession, KeyRole, LicenseKey};
    use crate::error::{Error, Result};
    use crate::wvd::{self, WvdHeader};

    /// Header the CDM accepts for devices stored with type and level 0.
    const CDM_HEADER: WvdHeader = WvdHeader {
        version: 2,
        device_type: 2,
        security_level: 3,
        flags: 0,
    };

    /**
        [`Cdm`] backed by the `drm-widevine` crate.
    */
    #[derive(Debug, Clone, Copy, Default)]
    pub struct WidevineCdm;

    impl WidevineCdm {
        pub fn new() -> Self {
            Self
        }

        fn device(&self, wvd: &[u8]) -> Result<Device> {
            let parts = wvd::decode(wvd)?;
            let header = WvdHeader {
                device_type: match parts.header.device_type {
                    0 => CDM_HEADER.device_type,
                    other => other,
                },
                security_level: match parts.header.security_level {
                    0 => CDM_HEADER.security_level,
                    other => other,
                },
                ..CDM_HEADER
            };
            let bytes = wvd::encode_with(header, &parts.client_id, &parts.private_key)?;
            Device::from_bytes(&bytes)
                .map_err(|e| Error::DeviceUnavailable(format!("invalid WVD device: {e}")))
        }
    }

    impl Cdm for WidevineCdm {
        fn private_key_der(&self, private_key: &[u8]) -> Result<Vec<u8>> {
            let parse_error = |e: &dyn std::fmt::Display| {
                Error::DeviceUnavailable(format!("unreadable private key: {e}"))
            };

            let key = match std::str::from_utf8(private_key) {
                Ok(pem) if pem.trim_start().starts_with("-----BEGIN") => {
                    RsaPrivateKey::from_pkcs1_pem(pem)
                        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
                        .map_err(|e| parse_error(&e))?
                }
                _ => RsaPrivateKey::from_pkcs1_der(private_key)
                    .or_else(|_| RsaPrivateKey::from_pkcs8_der(private_key))
                    .map_err(|e| parse_error(&e))?,
            };

            let der = key.to_pkcs1_der().map_err(|e| parse_error(&e))?;
            Ok(der.as_bytes().to_vec())
        }

        fn check_device(&self, wvd: &[u8]) -> Result<()> {
            self.device(wvd).map(|_| ())
        }

        fn service_certificate_request(&self) -> Vec<u8> {
            Session::service_certificate_request()
        }

        fn open(&self, wvd: &[u8]) -> Result<Box<dyn CdmSession>> {
            let device = self.device(wvd)?;
            Ok(Box::new(WidevineSession {
                session: Session::new(device),
            }))
        }
    }

    struct WidevineSession {
        session: Session,
    }

    impl CdmSession for WidevineSession {
        fn set_service_certificate(&mut self, certificate: &[u8]) -> Result<()> {
            self.session
                .set_service_certificate(certificate)
                .map_err(|e| Error::License(format!("invalid service certificate: {e}")))?;
            Ok(())
        }

        fn license_challenge(&mut self, pssh: &[u8]) -> Result<Vec<u8>> {
            let pssh = PsshBox::from_bytes(pssh)
                .map_err(|e| Error::License(format!("invalid PSSH box: {e}")))?;
            self.session
                .build_license_challenge(&pssh, LicenseType::Automatic)
                .map_err(|e| Error::License(format!("failed to build license challenge: {e}")))
        }

        fn parse_license(&mut self, response: &[u8]) -> Result<Vec<LicenseKey>> {
            let keys = self
                .session
                .parse_license_response(response)
                .map_err(|e| Error::License(format!("failed to parse license response: {e}")))?;

            Ok(keys
                .iter()
                .map(|k| {
                    let role = match k.key_type() {
                        KeyType::Content => KeyRole::Content,
                        KeyType::Signing => KeyRole::Signing,
                        _ => KeyRole::Other,
                    };
                    LicenseKey::new(k.kid().to_vec(), k.key().to_vec(), role)
                })
                .collect())
        }
    }

}
