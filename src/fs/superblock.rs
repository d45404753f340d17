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

//! The superblock, stored in the clear in block 0.

/// The filesystem's signature, at offset 0 of the image.
pub const MAGIC: [u8; 4] = *b"SFSE";
/// Number of significant superblock bytes; the rest of block 0 is zero
/// padding.
pub const SUPERBLOCK_SIZE: usize = 64;

/// The contents of block 0.
///
/// The superblock is the only plaintext region of the image: it carries the
/// derivation salt and the key verifier needed before any encrypted block
/// can be read.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Superblock {
    /// Number of bitmap blocks following the superblock.
    pub num_bitmap_blocks: u32,
    /// Number of inode table blocks following the bitmap.
    pub num_inode_blocks: u32,
    /// Number of files at format time. Informational only.
    pub file_count: u32,
    /// Salt fed to the key derivation alongside the password.
    pub derivation_salt: [u8; 16],
    /// SHA-256 of the derived working key.
    pub key_verifier: [u8; 32],
}

impl Superblock {
    /// Decodes the superblock from the raw contents of block 0.
    ///
    /// Returns `None` if the block does not carry the magic, i.e. the image
    /// is not formatted.
    pub fn decode(block: &[u8]) -> Option<Self> {
        if block.len() < SUPERBLOCK_SIZE || block[0..4] != MAGIC {
            return None;
        }
        let mut derivation_salt = [0; 16];
        derivation_salt.copy_from_slice(&block[16..32]);
        let mut key_verifier = [0; 32];
        key_verifier.copy_from_slice(&block[32..64]);
        Some(Self {
            num_bitmap_blocks: u32::from_be_bytes(block[4..8].try_into().unwrap()),
            num_inode_blocks: u32::from_be_bytes(block[8..12].try_into().unwrap()),
            file_count: u32::from_be_bytes(block[12..16].try_into().unwrap()),
            derivation_salt,
            key_verifier,
        })
    }

    /// Encodes the superblock, zero-padded to `block_size`.
    pub fn encode(&self, block_size: usize) -> Vec<u8> {
        let mut buf = Vec::with_capacity(block_size);
        buf.extend_from_slice(&MAGIC);
        buf.extend_from_slice(&self.num_bitmap_blocks.to_be_bytes());
        buf.extend_from_slice(&self.num_inode_blocks.to_be_bytes());
        buf.extend_from_slice(&self.file_count.to_be_bytes());
        buf.extend_from_slice(&self.derivation_salt);
        buf.extend_from_slice(&self.key_verifier);
        buf.resize(block_size, 0);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let sb = Superblock {
            num_bitmap_blocks: 1,
            num_inode_blocks: 2,
            file_count: 0,
            derivation_salt: [0xaa; 16],
            key_verifier: [0xbb; 32],
        };
        let buf = sb.encode(4096);
        assert_eq!(buf.len(), 4096);
        assert_eq!(&buf[0..4], b"SFSE");
        assert_eq!(&buf[4..8], &[0, 0, 0, 1]);
        assert_eq!(&buf[8..12], &[0, 0, 0, 2]);
        assert!(buf[SUPERBLOCK_SIZE..].iter().all(|b| *b == 0));
        assert_eq!(Superblock::decode(&buf), Some(sb));
    }

    #[test]
    fn decode_rejects_missing_magic() {
        assert_eq!(Superblock::decode(&[0; 4096]), None);
        let mut buf = vec![0; 4096];
        buf[0..4].copy_from_slice(b"EXT2");
        assert_eq!(Superblock::decode(&buf), None);
        // Truncated input
        assert_eq!(Superblock::decode(b"SFSE"), None);
    }
}
