//! Symmetric payload ciphers for the device-facing hop
//!
//! Two algorithms, both with a fixed 16-byte key:
//!
//! - **AES-128-CBC**, fixed IV. Variable-length payloads use PKCS#7; the
//!   16-byte actuator block is already one AES block and goes unpadded.
//! - **XOR**, 16-byte repeating keystream.
//!
//! These provide obfuscation for constrained firmware, not authentication.

use crate::config::{CipherConfig, CipherKind};
use crate::error::{DecryptError, Error, Result};
use aes::cipher::block_padding::{NoPadding, Pkcs7};
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::Engine as _;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Cipher block and actuator message size
pub const BLOCK_LEN: usize = 16;

/// Standard alphabet, padding optional on decode
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &base64::alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Clone, PartialEq, Eq)]
pub enum PayloadCipher {
    Aes128Cbc {
        key: [u8; BLOCK_LEN],
        iv: [u8; BLOCK_LEN],
    },
    Xor {
        key: [u8; BLOCK_LEN],
    },
}

// Keys stay out of logs
impl std::fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadCipher::Aes128Cbc { .. } => f.write_str("PayloadCipher::Aes128Cbc"),
            PayloadCipher::Xor { .. } => f.write_str("PayloadCipher::Xor"),
        }
    }
}

fn aes_encryptor(key: &[u8; BLOCK_LEN], iv: &[u8; BLOCK_LEN]) -> Aes128CbcEnc {
    Aes128CbcEnc::new(GenericArray::from_slice(key), GenericArray::from_slice(iv))
}

fn aes_decryptor(key: &[u8; BLOCK_LEN], iv: &[u8; BLOCK_LEN]) -> Aes128CbcDec {
    Aes128CbcDec::new(GenericArray::from_slice(key), GenericArray::from_slice(iv))
}

fn hex16(value: &str, field: &str) -> Result<[u8; BLOCK_LEN]> {
    let bytes = hex::decode(value.trim())
        .map_err(|e| Error::Config(format!("cipher {} is not hex: {}", field, e)))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| Error::Config(format!("cipher {} must be 16 bytes, got {}", field, b.len())))
}

impl PayloadCipher {
    pub fn from_config(config: &CipherConfig) -> Result<Self> {
        let key = hex16(&config.key, "key")?;
        Ok(match config.kind {
            CipherKind::Aes128Cbc => PayloadCipher::Aes128Cbc {
                key,
                iv: hex16(&config.iv, "iv")?,
            },
            CipherKind::Xor => PayloadCipher::Xor { key },
        })
    }

    fn xor(key: &[u8; BLOCK_LEN], data: &[u8]) -> Vec<u8> {
        data.iter()
            .zip(key.iter().cycle())
            .map(|(b, k)| b ^ k)
            .collect()
    }

    /// Encrypt a variable-length payload (PKCS#7 for AES)
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        match self {
            PayloadCipher::Aes128Cbc { key, iv } => aes_encryptor(key, iv)
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            PayloadCipher::Xor { key } => Self::xor(key, plaintext),
        }
    }

    /// Decrypt a variable-length payload, validating length and padding
    pub fn decrypt(&self, ciphertext: &[u8]) -> std::result::Result<Vec<u8>, DecryptError> {
        if ciphertext.is_empty() {
            return Err(DecryptError::InvalidLength(0));
        }
        match self {
            PayloadCipher::Aes128Cbc { key, iv } => {
                if ciphertext.len() % BLOCK_LEN != 0 {
                    return Err(DecryptError::InvalidLength(ciphertext.len()));
                }
                aes_decryptor(key, iv)
                    .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                    .map_err(|_| DecryptError::BadPadding)
            }
            PayloadCipher::Xor { key } => Ok(Self::xor(key, ciphertext)),
        }
    }

    /// Encrypt one 16-byte block without padding
    pub fn encrypt_block(&self, block: &[u8; BLOCK_LEN]) -> [u8; BLOCK_LEN] {
        let mut out = [0u8; BLOCK_LEN];
        match self {
            PayloadCipher::Aes128Cbc { key, iv } => {
                let ct = aes_encryptor(key, iv)
                    .encrypt_padded_vec_mut::<NoPadding>(block);
                out.copy_from_slice(&ct[..BLOCK_LEN]);
            }
            PayloadCipher::Xor { key } => {
                for (o, (b, k)) in out.iter_mut().zip(block.iter().zip(key)) {
                    *o = b ^ k;
                }
            }
        }
        out
    }

    /// Decrypt one 16-byte block without padding
    pub fn decrypt_block(&self, block: &[u8]) -> std::result::Result<[u8; BLOCK_LEN], DecryptError> {
        if block.len() != BLOCK_LEN {
            return Err(DecryptError::InvalidLength(block.len()));
        }
        let plain = match self {
            PayloadCipher::Aes128Cbc { key, iv } => aes_decryptor(key, iv)
                .decrypt_padded_vec_mut::<NoPadding>(block)
                .map_err(|_| DecryptError::BadPadding)?,
            PayloadCipher::Xor { key } => Self::xor(key, block),
        };
        let mut out = [0u8; BLOCK_LEN];
        out.copy_from_slice(&plain[..BLOCK_LEN]);
        Ok(out)
    }

    /// Decode and decrypt one `base64(ciphertext)` line
    pub fn decrypt_line(&self, line: &[u8]) -> std::result::Result<Vec<u8>, DecryptError> {
        let ciphertext = BASE64
            .decode(line.trim_ascii())
            .map_err(|e| DecryptError::InvalidBase64(e.to_string()))?;
        self.decrypt(&ciphertext)
    }

    /// Encrypt and encode one line (terminator not included)
    pub fn encrypt_line(&self, plaintext: &[u8]) -> Vec<u8> {
        BASE64.encode(self.encrypt(plaintext)).into_bytes()
    }
}

/// ASCII class value at the start of a 16-byte block, zero-filled after it
///
/// Values longer than one block are truncated.
pub fn class_block(value: &str) -> [u8; BLOCK_LEN] {
    let mut block = [0u8; BLOCK_LEN];
    let bytes = value.as_bytes();
    let n = bytes.len().min(BLOCK_LEN);
    block[..n].copy_from_slice(&bytes[..n]);
    block
}

/// Inverse of [`class_block`]
pub fn class_from_block(block: &[u8; BLOCK_LEN]) -> Option<String> {
    let end = block.iter().position(|&b| b == 0).unwrap_or(BLOCK_LEN);
    std::str::from_utf8(&block[..end]).ok().map(str::to_string)
}
