/*
 * Copyright 2025 Luc Lenôtre
 *
 * This file is part of Maestro.
 *
 * Maestro is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * Maestro is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * Maestro. If not, see <https://www.gnu.org/licenses/>.
 */

//! Per-block encryption: key derivation and the permute-and-mask envelope.
//!
//! Encryption composes three invertible layers: AES-256-ECB over 16-byte
//! groups, a byte permutation, and an XOR keystream. The permutation and the
//! keystream are derived from a seed binding the working key, the block
//! number and the hashed PIN, so identical plaintext stored in two different
//! blocks produces distinct bytes on disk.
//!
//! The permutation and the keystream are produced by two independent
//! ChaCha20-based generators seeded with the same 32-byte digest. The exact
//! output of these generators is part of the on-disk format: changing them
//! invalidates previously written images.

use crate::error::{Error, Result};
use aes::Aes256;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::seq::SliceRandom;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use sha2::{Digest, Sha256};
use sha3::Shake256;

/// The size of an AES block in bytes.
const AES_BLOCK: usize = 16;

/// Argon2 memory cost in KiB (1 MiB working set).
///
/// This is a format-compatibility knob: changing it invalidates every
/// previously formatted image.
const ARGON2_MEMORY_KIB: u32 = 1024;
/// Argon2 iteration count.
const ARGON2_TIME_COST: u32 = 2;
/// Argon2 parallelism degree.
const ARGON2_LANES: u32 = 2;

/// Deterministic per-block cipher over the image blocks.
pub struct SectorCipher {
    /// Raw password bytes, kept for re-derivation when the salt changes.
    password: Vec<u8>,
    /// SHAKE-256 digest of the PIN, truncated to 16 bytes.
    pin16: [u8; 16],
    /// The 32-byte working key.
    key: [u8; 32],
    /// AES-256 instance keyed with the working key.
    aes: Aes256,
}

impl SectorCipher {
    /// Creates a cipher from the given credentials.
    ///
    /// Until [`rekey`](Self::rekey) is called with the salt stored in the
    /// superblock (or generated at format time), the key is derived from a
    /// placeholder salt (the hashed PIN) and must not be used to touch
    /// encrypted blocks.
    pub fn new(password: &str, pin: &str) -> Result<Self> {
        let pin16 = hash_pin(pin);
        let password = password.as_bytes().to_vec();
        let key = derive_key(&password, &pin16, &pin16)?;
        let aes = Aes256::new(GenericArray::from_slice(&key));
        Ok(Self {
            password,
            pin16,
            key,
            aes,
        })
    }

    /// Re-derives the working key against `derivation_salt`.
    pub fn rekey(&mut self, derivation_salt: &[u8; 16]) -> Result<()> {
        self.key = derive_key(&self.password, &self.pin16, derivation_salt)?;
        self.aes = Aes256::new(GenericArray::from_slice(&self.key));
        Ok(())
    }

    /// Returns the SHA-256 digest of the working key.
    ///
    /// The superblock stores this value so wrong credentials can be detected
    /// without decrypting any protected block.
    pub fn key_digest(&self) -> [u8; 32] {
        Sha256::digest(self.key).into()
    }

    /// Derives the seed driving the permutation and the keystream of block
    /// `block`.
    fn seed(&self, block: u32) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.key);
        hasher.update(block.to_be_bytes());
        hasher.update(self.pin16);
        hasher.finalize().into()
    }

    /// Builds the byte permutation of length `len` for `seed`.
    fn permutation(seed: [u8; 32], len: usize) -> Vec<usize> {
        let mut rng = ChaCha20Rng::from_seed(seed);
        let mut indices: Vec<usize> = (0..len).collect();
        indices.shuffle(&mut rng);
        indices
    }

    /// Builds the XOR keystream of length `len` for `seed`.
    ///
    /// Uses a fresh generator: the keystream does not share state with the
    /// permutation even though both use the same seed.
    fn keystream(seed: [u8; 32], len: usize) -> Vec<u8> {
        let mut rng = ChaCha20Rng::from_seed(seed);
        let mut mask = vec![0; len];
        rng.fill_bytes(&mut mask);
        mask
    }

    /// Encrypts `data` for storage in block `block`.
    ///
    /// The length of `data` must be a positive multiple of 16 bytes.
    pub fn encrypt(&self, block: u32, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() || data.len() % AES_BLOCK != 0 {
            return Err(Error::InvalidSize(AES_BLOCK));
        }
        let mut buf = data.to_vec();
        for chunk in buf.chunks_exact_mut(AES_BLOCK) {
            self.aes.encrypt_block(GenericArray::from_mut_slice(chunk));
        }
        let seed = self.seed(block);
        let perm = Self::permutation(seed, buf.len());
        let mut out: Vec<u8> = perm.iter().map(|&i| buf[i]).collect();
        for (b, m) in out.iter_mut().zip(Self::keystream(seed, data.len())) {
            *b ^= m;
        }
        Ok(out)
    }

    /// Decrypts `data` read from block `block`.
    ///
    /// The length of `data` must be a positive multiple of 16 bytes.
    pub fn decrypt(&self, block: u32, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() || data.len() % AES_BLOCK != 0 {
            return Err(Error::InvalidSize(AES_BLOCK));
        }
        let seed = self.seed(block);
        let mut buf = data.to_vec();
        for (b, m) in buf.iter_mut().zip(Self::keystream(seed, data.len())) {
            *b ^= m;
        }
        let perm = Self::permutation(seed, buf.len());
        let mut out = vec![0; buf.len()];
        for (i, &p) in perm.iter().enumerate() {
            out[p] = buf[i];
        }
        for chunk in out.chunks_exact_mut(AES_BLOCK) {
            self.aes.decrypt_block(GenericArray::from_mut_slice(chunk));
        }
        Ok(out)
    }
}

/// SHAKE-256 digest of the PIN, truncated to 16 bytes.
fn hash_pin(pin: &str) -> [u8; 16] {
    use sha3::digest::{ExtendableOutput, Update, XofReader};
    let mut hasher = Shake256::default();
    hasher.update(pin.as_bytes());
    let mut reader = hasher.finalize_xof();
    let mut pin16 = [0u8; 16];
    reader.read(&mut pin16);
    pin16
}

/// Derives the 32-byte working key: Argon2id over the password and hashed
/// PIN, then SHA-256 over the result.
///
/// The PIN digest is part of the Argon2 secret so that a wrong PIN changes
/// the working key and is caught by the superblock verifier at mount.
fn derive_key(password: &[u8], pin16: &[u8; 16], salt: &[u8]) -> Result<[u8; 32]> {
    let mut secret = Vec::with_capacity(password.len() + pin16.len());
    secret.extend_from_slice(password);
    secret.extend_from_slice(pin16);
    let params = Params::new(ARGON2_MEMORY_KIB, ARGON2_TIME_COST, ARGON2_LANES, Some(32))
        .map_err(Error::KeyDerivation)?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut k0 = [0u8; 32];
    argon2
        .hash_password_into(&secret, salt, &mut k0)
        .map_err(Error::KeyDerivation)?;
    Ok(Sha256::digest(k0).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> SectorCipher {
        let mut cipher = SectorCipher::new("hunter2", "1234").unwrap();
        cipher.rekey(&[7; 16]).unwrap();
        cipher
    }

    #[test]
    fn roundtrip_all_block_sizes() {
        let cipher = cipher();
        for len in [16, 64, 512, 4096] {
            let plain: Vec<u8> = (0..len).map(|i| (i * 31) as u8).collect();
            for block in [1, 2, 255] {
                let enc = cipher.encrypt(block, &plain).unwrap();
                assert_ne!(enc, plain);
                assert_eq!(cipher.decrypt(block, &enc).unwrap(), plain);
            }
        }
    }

    #[test]
    fn ciphertext_depends_on_block_number() {
        let cipher = cipher();
        let plain = vec![0u8; 4096];
        let a = cipher.encrypt(10, &plain).unwrap();
        let b = cipher.encrypt(11, &plain).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn encryption_is_deterministic() {
        let mut a = SectorCipher::new("p", "0000").unwrap();
        let mut b = SectorCipher::new("p", "0000").unwrap();
        a.rekey(&[3; 16]).unwrap();
        b.rekey(&[3; 16]).unwrap();
        let plain: Vec<u8> = (0..4096).map(|i| i as u8).collect();
        assert_eq!(
            a.encrypt(42, &plain).unwrap(),
            b.encrypt(42, &plain).unwrap()
        );
        assert_eq!(a.key_digest(), b.key_digest());
    }

    #[test]
    fn rekey_changes_the_working_key() {
        let mut cipher = SectorCipher::new("p", "1234").unwrap();
        let before = cipher.key_digest();
        cipher.rekey(&[9; 16]).unwrap();
        assert_ne!(cipher.key_digest(), before);
    }

    #[test]
    fn credentials_change_the_working_key() {
        let mut a = SectorCipher::new("p", "1234").unwrap();
        let mut b = SectorCipher::new("q", "1234").unwrap();
        let mut c = SectorCipher::new("p", "4321").unwrap();
        for cipher in [&mut a, &mut b, &mut c] {
            cipher.rekey(&[0; 16]).unwrap();
        }
        assert_ne!(a.key_digest(), b.key_digest());
        assert_ne!(a.key_digest(), c.key_digest());
    }

    #[test]
    fn rejects_unaligned_buffers() {
        let cipher = cipher();
        assert!(matches!(
            cipher.encrypt(1, &[0; 15]),
            Err(Error::InvalidSize(_))
        ));
        assert!(matches!(cipher.encrypt(1, &[]), Err(Error::InvalidSize(_))));
        assert!(matches!(
            cipher.decrypt(1, &[0; 17]),
            Err(Error::InvalidSize(_))
        ));
    }
}
