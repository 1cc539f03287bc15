use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};

use crate::{
    error::{HlsError, HlsResult},
    m3u8::EncryptionRef,
    util::http::HttpClient,
};

/// Where the IV of each segment comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IvSource {
    /// Every segment shares the IV pinned by the playlist.
    Static([u8; 16]),
    /// The IV is derived from `media_sequence + segment index`.
    Sequence { media_sequence: u64 },
}

impl IvSource {
    pub fn iv_for(&self, index: usize) -> [u8; 16] {
        match self {
            IvSource::Static(iv) => *iv,
            IvSource::Sequence { media_sequence } => {
                sequence_iv(media_sequence.wrapping_add(index as u64))
            }
        }
    }
}

/// Zero buffer with the big-endian 32-bit sequence number in its last four
/// bytes. Sequence numbers beyond `u32::MAX` wrap.
pub fn sequence_iv(sequence: u64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[12..].copy_from_slice(&(sequence as u32).to_be_bytes());
    iv
}

/// Parse a `0x`-prefixed hex IV into 16 bytes, left-padding short values.
pub fn parse_iv(iv: &str) -> HlsResult<[u8; 16]> {
    let hex = iv
        .strip_prefix("0x")
        .or_else(|| iv.strip_prefix("0X"))
        .unwrap_or(iv);
    u128::from_str_radix(hex, 16)
        .map(u128::to_be_bytes)
        .map_err(|_| HlsError::InvalidIv(iv.to_string()))
}

/// Decryption material shared read-only by every worker of a job.
pub enum SegmentKey {
    Clear,
    Aes128 { key: [u8; 16], iv: IvSource },
}

impl SegmentKey {
    pub fn aes128(key: &[u8], iv: IvSource) -> HlsResult<Self> {
        let key: [u8; 16] = key
            .try_into()
            .map_err(|_| HlsError::InvalidKeyLength(key.len()))?;
        Ok(Self::Aes128 { key, iv })
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, SegmentKey::Aes128 { .. })
    }

    /// IV used for the segment at `index`, if the segment is encrypted.
    pub fn iv_for(&self, index: usize) -> Option<[u8; 16]> {
        match self {
            SegmentKey::Clear => None,
            SegmentKey::Aes128 { iv, .. } => Some(iv.iv_for(index)),
        }
    }

    pub fn to_decryptor(&self, index: usize) -> SegmentDecryptor {
        match self {
            SegmentKey::Clear => SegmentDecryptor::Clear,
            SegmentKey::Aes128 { key, iv } => {
                let iv = iv.iv_for(index);
                SegmentDecryptor::Aes128(cbc::Decryptor::<aes::Aes128>::new(
                    key.into(),
                    (&iv).into(),
                ))
            }
        }
    }

    pub fn decrypt(&self, index: usize, data: bytes::Bytes) -> HlsResult<bytes::Bytes> {
        self.to_decryptor(index).decrypt(index, data)
    }
}

pub enum SegmentDecryptor {
    Clear,
    Aes128(cbc::Decryptor<aes::Aes128>),
}

impl SegmentDecryptor {
    pub fn decrypt(self, index: usize, data: bytes::Bytes) -> HlsResult<bytes::Bytes> {
        Ok(match self {
            SegmentDecryptor::Clear => data,
            SegmentDecryptor::Aes128(decryptor) => decryptor
                .decrypt_padded_vec_mut::<Pkcs7>(&data)
                .map_err(|source| HlsError::DecryptError { index, source })?
                .into(),
        })
    }
}

/// Turns the key reference of a manifest into decryption material.
#[derive(Clone, Default)]
pub struct KeyResolver {
    /// Hex key overriding the one referenced by the playlist.
    manual_key: Option<String>,
}

impl KeyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_manual_key(key: Option<String>) -> Self {
        Self { manual_key: key }
    }

    pub async fn resolve(
        &self,
        client: &HttpClient,
        encryption: Option<&EncryptionRef>,
        media_sequence: u64,
    ) -> HlsResult<SegmentKey> {
        let Some(encryption) = encryption else {
            return Ok(SegmentKey::Clear);
        };

        let iv = match &encryption.iv {
            Some(iv) => IvSource::Static(parse_iv(iv)?),
            None => IvSource::Sequence { media_sequence },
        };

        let key_bytes = if let Some(key) = &self.manual_key {
            hex::decode(key)?
        } else {
            tracing::debug!("Fetching key from {}", encryption.key_url);
            let response = client
                .get(encryption.key_url.clone())
                .send()
                .await
                .map_err(|e| HlsError::KeyFetchError(e.to_string()))?;
            if !response.status().is_success() {
                return Err(HlsError::KeyFetchError(format!(
                    "HTTP {}",
                    response.status()
                )));
            }
            response
                .bytes()
                .await
                .map_err(|e| HlsError::KeyFetchError(e.to_string()))?
                .to_vec()
        };

        SegmentKey::aes128(&key_bytes, iv)
    }
}
