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

//! Logical block access over the encrypted image.

use crate::crypt::SectorCipher;
use crate::device::BlockDevice;
use crate::error::{Error, Result};

/// The default size of a logical block in bytes.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Routes logical block reads and writes through the cipher.
///
/// Block 0 holds the superblock and bypasses encryption in both directions:
/// it carries the material needed to check credentials before the cipher can
/// be trusted.
pub struct BlockLayer {
    /// The underlying sector device.
    dev: BlockDevice,
    /// The per-block cipher.
    cipher: SectorCipher,
    /// The size of a logical block in bytes.
    block_size: usize,
}

impl BlockLayer {
    /// Creates the layer over `dev`, encrypting with `cipher`.
    ///
    /// `block_size` must be a positive multiple of the device's sector size.
    pub fn new(dev: BlockDevice, cipher: SectorCipher, block_size: usize) -> Result<Self> {
        if block_size == 0 || block_size % dev.sector_size() != 0 {
            return Err(Error::InvalidSize(dev.sector_size()));
        }
        Ok(Self {
            dev,
            cipher,
            block_size,
        })
    }

    /// Returns the size of a logical block in bytes.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Returns the number of logical blocks in the image.
    pub fn total_blocks(&self) -> u32 {
        (self.dev.disk_size() / self.block_size as u64) as u32
    }

    /// Returns the cipher.
    pub fn cipher(&self) -> &SectorCipher {
        &self.cipher
    }

    /// Returns the cipher mutably, for re-keying at mount or format time.
    pub fn cipher_mut(&mut self) -> &mut SectorCipher {
        &mut self.cipher
    }

    /// Number of sectors spanned by one logical block.
    fn sectors_per_block(&self) -> u64 {
        (self.block_size / self.dev.sector_size()) as u64
    }

    /// Reads and decrypts logical block `block`.
    pub fn read_block(&mut self, block: u32) -> Result<Vec<u8>> {
        let raw = self
            .dev
            .read(block as u64 * self.sectors_per_block(), self.block_size)?;
        if block == 0 {
            return Ok(raw);
        }
        self.cipher.decrypt(block, &raw)
    }

    /// Encrypts and writes `data` to logical block `block`.
    ///
    /// Buffers shorter than the block size are zero-padded up to it.
    pub fn write_block(&mut self, block: u32, data: &[u8]) -> Result<()> {
        if data.len() > self.block_size {
            return Err(Error::InvalidSize(self.block_size));
        }
        let mut buf = data.to_vec();
        buf.resize(self.block_size, 0);
        let out = if block == 0 {
            buf
        } else {
            self.cipher.encrypt(block, &buf)?
        };
        self.dev
            .write(block as u64 * self.sectors_per_block(), &out)
    }

    /// Flushes and releases the device.
    pub fn close(self) -> Result<()> {
        self.dev.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DEFAULT_SECTOR_SIZE;
    use tempfile::NamedTempFile;

    fn layer(blocks: u64) -> (NamedTempFile, BlockLayer) {
        let image = NamedTempFile::new().unwrap();
        image
            .as_file()
            .set_len(blocks * DEFAULT_BLOCK_SIZE as u64)
            .unwrap();
        let dev = BlockDevice::open(image.path(), DEFAULT_SECTOR_SIZE).unwrap();
        let mut cipher = SectorCipher::new("p", "1234").unwrap();
        cipher.rekey(&[1; 16]).unwrap();
        let layer = BlockLayer::new(dev, cipher, DEFAULT_BLOCK_SIZE).unwrap();
        (image, layer)
    }

    #[test]
    fn block_zero_is_plaintext() {
        let (image, mut layer) = layer(4);
        layer.write_block(0, b"SFSE superblock").unwrap();
        let raw = std::fs::read(image.path()).unwrap();
        assert_eq!(&raw[0..15], b"SFSE superblock");
        assert_eq!(&layer.read_block(0).unwrap()[0..15], b"SFSE superblock");
    }

    #[test]
    fn other_blocks_are_encrypted() {
        let (image, mut layer) = layer(4);
        let data = vec![0x5a; DEFAULT_BLOCK_SIZE];
        layer.write_block(2, &data).unwrap();
        let raw = std::fs::read(image.path()).unwrap();
        assert_ne!(&raw[2 * DEFAULT_BLOCK_SIZE..3 * DEFAULT_BLOCK_SIZE], &data[..]);
        assert_eq!(layer.read_block(2).unwrap(), data);
    }

    #[test]
    fn short_writes_are_zero_padded() {
        let (_image, mut layer) = layer(4);
        layer.write_block(1, b"abc").unwrap();
        let data = layer.read_block(1).unwrap();
        assert_eq!(&data[0..3], b"abc");
        assert!(data[3..].iter().all(|b| *b == 0));
        assert_eq!(data.len(), DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn oversized_write_is_rejected() {
        let (_image, mut layer) = layer(4);
        let data = vec![0; DEFAULT_BLOCK_SIZE + 1];
        assert!(matches!(
            layer.write_block(1, &data),
            Err(Error::InvalidSize(_))
        ));
    }

    #[test]
    fn block_size_must_be_sector_aligned() {
        let image = NamedTempFile::new().unwrap();
        image.as_file().set_len(4096).unwrap();
        let dev = BlockDevice::open(image.path(), DEFAULT_SECTOR_SIZE).unwrap();
        let cipher = SectorCipher::new("p", "1234").unwrap();
        assert!(matches!(
            BlockLayer::new(dev, cipher, 1000),
            Err(Error::InvalidSize(_))
        ));
    }
}
