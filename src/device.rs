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

//! Sector-addressed access to the raw image file.

use crate::error::{Error, Result};
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// The default size of a sector in bytes.
pub const DEFAULT_SECTOR_SIZE: usize = 512;

/// A fixed-size random-access byte store addressed by sector.
///
/// The device performs no caching and no retries. Staying within the bounds
/// of the image is the caller's responsibility.
pub struct BlockDevice {
    /// The opened image file.
    file: std::fs::File,
    /// The total size of the image in bytes.
    disk_size: u64,
    /// The size of a sector in bytes.
    sector_size: usize,
}

impl BlockDevice {
    /// Opens the image at `path` for reading and writing.
    ///
    /// The image must already exist; its size is recorded at open time and
    /// never changes afterwards.
    pub fn open(path: &Path, sector_size: usize) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let disk_size = file.metadata()?.len();
        Ok(Self {
            file,
            disk_size,
            sector_size,
        })
    }

    /// Returns the total size of the image in bytes.
    pub fn disk_size(&self) -> u64 {
        self.disk_size
    }

    /// Returns the size of a sector in bytes.
    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    /// Fails unless `len` is a positive multiple of the sector size.
    fn check_len(&self, len: usize) -> Result<()> {
        if len == 0 || len % self.sector_size != 0 {
            return Err(Error::InvalidSize(self.sector_size));
        }
        Ok(())
    }

    /// Reads `len` bytes starting at sector `sector`.
    pub fn read(&mut self, sector: u64, len: usize) -> Result<Vec<u8>> {
        self.check_len(len)?;
        let mut buf = vec![0; len];
        self.file
            .seek(SeekFrom::Start(sector * self.sector_size as u64))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Writes `data` starting at sector `sector`.
    pub fn write(&mut self, sector: u64, data: &[u8]) -> Result<()> {
        self.check_len(data.len())?;
        self.file
            .seek(SeekFrom::Start(sector * self.sector_size as u64))?;
        self.file.write_all(data)?;
        Ok(())
    }

    /// Flushes pending writes and releases the underlying file.
    pub fn close(self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn device(len: u64) -> (NamedTempFile, BlockDevice) {
        let image = NamedTempFile::new().unwrap();
        image.as_file().set_len(len).unwrap();
        let dev = BlockDevice::open(image.path(), DEFAULT_SECTOR_SIZE).unwrap();
        (image, dev)
    }

    #[test]
    fn read_write_roundtrip() {
        let (_image, mut dev) = device(8192);
        assert_eq!(dev.disk_size(), 8192);
        let data = vec![0xab; 1024];
        dev.write(2, &data).unwrap();
        assert_eq!(dev.read(2, 1024).unwrap(), data);
        // Sectors around the written range stay zeroed
        assert_eq!(dev.read(1, 512).unwrap(), vec![0; 512]);
        assert_eq!(dev.read(4, 512).unwrap(), vec![0; 512]);
    }

    #[test]
    fn rejects_unaligned_lengths() {
        let (_image, mut dev) = device(4096);
        assert!(matches!(dev.read(0, 100), Err(Error::InvalidSize(_))));
        assert!(matches!(dev.read(0, 0), Err(Error::InvalidSize(_))));
        assert!(matches!(
            dev.write(0, &[0; 513]),
            Err(Error::InvalidSize(_))
        ));
    }

    #[test]
    fn data_survives_reopen() {
        let image = NamedTempFile::new().unwrap();
        image.as_file().set_len(4096).unwrap();
        let data: Vec<u8> = (0..512).map(|i| i as u8).collect();
        {
            let mut dev = BlockDevice::open(image.path(), DEFAULT_SECTOR_SIZE).unwrap();
            dev.write(3, &data).unwrap();
            dev.close().unwrap();
        }
        let mut dev = BlockDevice::open(image.path(), DEFAULT_SECTOR_SIZE).unwrap();
        assert_eq!(dev.read(3, 512).unwrap(), data);
    }
}
