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

//! The on-disk inode record.

use crate::error::{Error, Result};
use std::str;

/// The size of an inode record in bytes.
pub const INODE_SIZE: usize = 64;
/// The number of direct block pointers per inode.
pub const DIRECT_POINTERS: usize = 4;
/// The maximum stored length of a file name in bytes.
pub const NAME_SIZE: usize = 32;

/// One file's record inside the inode table.
///
/// Stored encrypted, 64 bytes per slot. The name is NUL-padded on disk;
/// trailing NULs are stripped on read.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Inode {
    /// Whether the slot describes a live file.
    pub valid: bool,
    /// File size in bytes.
    pub size: u64,
    /// File name, at most [`NAME_SIZE`] bytes of UTF-8.
    pub name: String,
    /// Direct data block pointers. A 0 terminates the used prefix.
    pub direct: [u32; DIRECT_POINTERS],
    /// Indirect block pointer. Reserved, always 0.
    pub indirect: u32,
    /// Double-indirect block pointer. Reserved, always 0.
    pub double_indirect: u32,
    /// Slot index inside the inode table.
    pub position: u32,
}

impl Inode {
    /// Marker byte of a valid slot.
    pub const VALID: u8 = 0x01;

    /// Creates an empty valid inode named `name` at slot `position`.
    pub fn new(name: String, position: u32) -> Self {
        Self {
            valid: true,
            size: 0,
            name,
            direct: [0; DIRECT_POINTERS],
            indirect: 0,
            double_indirect: 0,
            position,
        }
    }

    /// Encodes the inode into its 64-byte on-disk form.
    pub fn encode(&self) -> [u8; INODE_SIZE] {
        let mut buf = [0u8; INODE_SIZE];
        buf[0] = if self.valid { Self::VALID } else { 0 };
        // 7-byte big-endian size
        buf[1..8].copy_from_slice(&self.size.to_be_bytes()[1..8]);
        let name = self.name.as_bytes();
        let name_len = name.len().min(NAME_SIZE);
        buf[8..8 + name_len].copy_from_slice(&name[..name_len]);
        for (i, ptr) in self.direct.iter().enumerate() {
            buf[40 + i * 4..44 + i * 4].copy_from_slice(&ptr.to_be_bytes());
        }
        buf[56..60].copy_from_slice(&self.indirect.to_be_bytes());
        buf[60..64].copy_from_slice(&self.double_indirect.to_be_bytes());
        buf
    }

    /// Decodes the inode stored in `data`, belonging to slot `position`.
    pub fn decode(data: &[u8], position: u32) -> Result<Self> {
        if data.len() < INODE_SIZE {
            return Err(Error::Decode);
        }
        let mut size_bytes = [0u8; 8];
        size_bytes[1..8].copy_from_slice(&data[1..8]);
        let name_field = &data[8..8 + NAME_SIZE];
        let name_len = name_field
            .iter()
            .rposition(|b| *b != 0)
            .map(|i| i + 1)
            .unwrap_or(0);
        let name = str::from_utf8(&name_field[..name_len])
            .map_err(|_| Error::Decode)?
            .to_owned();
        let mut direct = [0u32; DIRECT_POINTERS];
        for (i, ptr) in direct.iter_mut().enumerate() {
            *ptr = u32::from_be_bytes(data[40 + i * 4..44 + i * 4].try_into().unwrap());
        }
        Ok(Self {
            valid: data[0] == Self::VALID,
            size: u64::from_be_bytes(size_bytes),
            name,
            direct,
            indirect: u32::from_be_bytes(data[56..60].try_into().unwrap()),
            double_indirect: u32::from_be_bytes(data[60..64].try_into().unwrap()),
            position,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let inode = Inode {
            valid: true,
            size: 16384,
            name: "notes.txt".to_owned(),
            direct: [3, 4, 9, 10],
            indirect: 0,
            double_indirect: 0,
            position: 17,
        };
        let buf = inode.encode();
        assert_eq!(buf[0], Inode::VALID);
        assert_eq!(Inode::decode(&buf, 17).unwrap(), inode);
    }

    #[test]
    fn seven_byte_size_field() {
        let mut inode = Inode::new("f".to_owned(), 0);
        inode.size = (1 << 56) - 1;
        let decoded = Inode::decode(&inode.encode(), 0).unwrap();
        assert_eq!(decoded.size, (1 << 56) - 1);
    }

    #[test]
    fn invalid_slot_keeps_fields() {
        let mut inode = Inode::new("old".to_owned(), 2);
        inode.valid = false;
        let decoded = Inode::decode(&inode.encode(), 2).unwrap();
        assert!(!decoded.valid);
        assert_eq!(decoded.name, "old");
    }

    #[test]
    fn name_is_truncated_to_field_size() {
        let inode = Inode::new("x".repeat(40), 0);
        let decoded = Inode::decode(&inode.encode(), 0).unwrap();
        assert_eq!(decoded.name, "x".repeat(NAME_SIZE));
    }

    #[test]
    fn non_utf8_name_is_a_decode_error() {
        let mut buf = Inode::new("ok".to_owned(), 0).encode();
        buf[8] = 0xff;
        buf[9] = 0xfe;
        assert!(matches!(Inode::decode(&buf, 0), Err(Error::Decode)));
    }

    #[test]
    fn short_buffer_is_a_decode_error() {
        assert!(matches!(Inode::decode(&[0; 63], 0), Err(Error::Decode)));
    }
}
