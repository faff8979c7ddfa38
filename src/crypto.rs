//! Payload encryption for both channels.
//!
//! The device speaks AES-128-ECB with PKCS#7 padding. The control channel
//! uses the device's 16-byte local key directly; the media channel derives
//! its own session key as `MD5(local_key ‖ "stream")`.

use aes::Aes128;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};

use crate::constants::STREAM_KEY_SUFFIX;
use crate::error::CamError;

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// One connection's symmetric cipher.
#[derive(Clone)]
pub struct CamCipher {
    cipher: Aes128,
}

impl CamCipher {
    pub fn new(key: &[u8; 16]) -> Self {
        Self {
            cipher: Aes128::new(key.into()),
        }
    }

    /// Derive the media-channel session key from the local key.
    pub fn stream_key(local_key: &[u8; 16]) -> [u8; 16] {
        let mut input = Vec::with_capacity(local_key.len() + STREAM_KEY_SUFFIX.len());
        input.extend_from_slice(local_key);
        input.extend_from_slice(STREAM_KEY_SUFFIX);
        md5::compute(&input).0
    }

    /// Encrypt a plaintext payload, applying PKCS#7 padding.
    ///
    /// Padding is always applied; an empty or block-aligned plaintext gains
    /// a full padding block, matching what the device expects.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let pad = BLOCK_SIZE - (plaintext.len() % BLOCK_SIZE);
        let mut output = Vec::with_capacity(plaintext.len() + pad);
        output.extend_from_slice(plaintext);
        output.resize(plaintext.len() + pad, pad as u8);

        for chunk in output.chunks_mut(BLOCK_SIZE) {
            self.cipher.encrypt_block(chunk.into());
        }

        output
    }

    /// Decrypt a ciphertext payload and strip the PKCS#7 padding.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CamError> {
        if ciphertext.is_empty() || !ciphertext.len().is_multiple_of(BLOCK_SIZE) {
            return Err(CamError::Decode(format!(
                "ciphertext length {} is not a positive multiple of {}",
                ciphertext.len(),
                BLOCK_SIZE
            )));
        }

        let mut output = ciphertext.to_vec();
        for chunk in output.chunks_mut(BLOCK_SIZE) {
            self.cipher.decrypt_block(chunk.into());
        }

        let pad = output[output.len() - 1] as usize;
        if pad == 0 || pad > BLOCK_SIZE || pad > output.len() {
            return Err(CamError::Decode(format!("invalid padding byte {pad}")));
        }
        if !output[output.len() - pad..].iter().all(|&b| b == pad as u8) {
            return Err(CamError::Decode("inconsistent padding bytes".to_string()));
        }

        output.truncate(output.len() - pad);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8; 16] = b"0123456789abcdef";

    #[test]
    fn roundtrip_various_lengths() {
        let cipher = CamCipher::new(KEY);
        for len in [0usize, 1, 15, 16, 17, 31, 32, 100] {
            let plaintext: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let encrypted = cipher.encrypt(&plaintext);
            assert!(encrypted.len().is_multiple_of(BLOCK_SIZE));
            assert!(encrypted.len() > plaintext.len(), "padding always added");
            let decrypted = cipher.decrypt(&encrypted).unwrap();
            assert_eq!(decrypted, plaintext, "length {len}");
        }
    }

    #[test]
    fn block_aligned_input_gains_full_pad_block() {
        let cipher = CamCipher::new(KEY);
        let encrypted = cipher.encrypt(&[0u8; 32]);
        assert_eq!(encrypted.len(), 48);
    }

    #[test]
    fn decrypt_rejects_unaligned_input() {
        let cipher = CamCipher::new(KEY);
        assert!(cipher.decrypt(&[0u8; 15]).is_err());
        assert!(cipher.decrypt(&[]).is_err());
    }

    #[test]
    fn decrypt_rejects_garbage_padding() {
        let cipher = CamCipher::new(KEY);
        // Random ciphertext decrypts to a block whose trailing byte is very
        // unlikely to form valid padding; run a few to make the point.
        let mut rejected = 0;
        for seed in 0u8..8 {
            let block: Vec<u8> = (0..16).map(|i| seed.wrapping_mul(31).wrapping_add(i)).collect();
            if cipher.decrypt(&block).is_err() {
                rejected += 1;
            }
        }
        assert!(rejected > 0);
    }

    #[test]
    fn stream_key_differs_from_local_key() {
        let derived = CamCipher::stream_key(KEY);
        assert_ne!(&derived, KEY);
        // Deterministic: same input, same digest.
        assert_eq!(derived, CamCipher::stream_key(KEY));
    }

    #[test]
    fn stream_key_is_md5_of_key_plus_suffix() {
        let mut input = KEY.to_vec();
        input.extend_from_slice(b"stream");
        assert_eq!(CamCipher::stream_key(KEY), md5::compute(&input).0);
    }
}
