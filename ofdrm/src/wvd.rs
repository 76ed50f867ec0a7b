use thiserror::Error;

const MAGIC: &[u8] = b"WVD";
const VERSION: u8 = 2;
const HEADER_LEN: usize = 7;

/// Device type written by [`encode`].
pub const DEVICE_TYPE: u8 = 0;
/// Security level written by [`encode`].
pub const SECURITY_LEVEL: u8 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WvdError {
    #[error("invalid WVD magic bytes")]
    BadMagic,
    #[error("WVD data is truncated")]
    Truncated,
    #[error("unsupported WVD version {0}")]
    UnsupportedVersion(u8),
    #[error("WVD field too large to serialize ({0} bytes, max 65535)")]
    FieldTooLarge(usize),
}

/**
    Fixed-size header of a WVD container.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WvdHeader {
    pub version: u8,
    pub device_type: u8,
    pub security_level: u8,
    pub flags: u8,
}

impl Default for WvdHeader {
    fn default() -> Self {
        Self {
            version: VERSION,
            device_type: DEVICE_TYPE,
            security_level: SECURITY_LEVEL,
            flags: 0,
        }
    }
}

/**
    The two blobs carried by a WVD container, unparsed.
*/
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WvdParts {
    pub header: WvdHeader,
    pub private_key: Vec<u8>,
    pub client_id: Vec<u8>,
}

/**
    Serialize a device into a version 2 WVD container.

    Layout:
      [0..3]  magic "WVD"
      [3]     version (2)
      [4]     device type (0)
      [5]     security level (0)
      [6]     flags (0)
      [7..9]  private key length (u16 big-endian)
      ...     private key (PKCS#1 DER)
      [..+2]  client id length (u16 big-endian)
      ...     client id blob
*/
pub fn encode(client_id: &[u8], private_key: &[u8]) -> Result<Vec<u8>, WvdError> {
    encode_with(WvdHeader::default(), client_id, private_key)
}

/// Like [`encode`], with an explicit header.
pub fn encode_with(
    header: WvdHeader,
    client_id: &[u8],
    private_key: &[u8],
) -> Result<Vec<u8>, WvdError> {
    let private_key_len = field_len(private_key)?;
    let client_id_len = field_len(client_id)?;

    let mut buffer = Vec::with_capacity(HEADER_LEN + 4 + private_key.len() + client_id.len());
    buffer.extend(MAGIC);
    buffer.push(header.version);
    buffer.push(header.device_type);
    buffer.push(header.security_level);
    buffer.push(header.flags);

    buffer.extend(private_key_len);
    buffer.extend(private_key);
    buffer.extend(client_id_len);
    buffer.extend(client_id);
    Ok(buffer)
}

/**
    Split a WVD container into its header and blobs.

    Only the framing is checked here; whether the key and client id are
    usable is up to the CDM.
*/
pub fn decode(data: &[u8]) -> Result<WvdParts, WvdError> {
    let header = header(data)?;
    if header.version != VERSION {
        return Err(WvdError::UnsupportedVersion(header.version));
    }

    let (private_key, rest) = read_field(&data[HEADER_LEN..])?;
    let (client_id, _) = read_field(rest)?;

    Ok(WvdParts {
        header,
        private_key: private_key.to_vec(),
        client_id: client_id.to_vec(),
    })
}

/// Read the header without touching the payload.
pub fn header(data: &[u8]) -> Result<WvdHeader, WvdError> {
    if !data.starts_with(MAGIC) {
        return Err(WvdError::BadMagic);
    }
    match data.get(MAGIC.len()..HEADER_LEN) {
        Some(&[version, device_type, security_level, flags]) => Ok(WvdHeader {
            version,
            device_type,
            security_level,
            flags,
        }),
        _ => Err(WvdError::Truncated),
    }
}

fn field_len(field: &[u8]) -> Result<[u8; 2], WvdError> {
    u16::try_from(field.len())
        .map(u16::to_be_bytes)
        .map_err(|_| WvdError::FieldTooLarge(field.len()))
}

fn read_field(data: &[u8]) -> Result<(&[u8], &[u8]), WvdError> {
    let len = match data.get(..2) {
        Some(&[hi, lo]) => u16::from_be_bytes([hi, lo]) as usize,
        _ => return Err(WvdError::Truncated),
    };
    let rest = &data[2..];
    if rest.len() < len {
        return Err(WvdError::Truncated);
    }
    Ok(rest.split_at(len))
}
