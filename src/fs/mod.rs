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

//! Filesystem layout and operations over the encrypted block substrate.
//!
//! The image is partitioned into the superblock (block 0), the allocation
//! bitmap, the inode table and the data region. An in-memory directory maps
//! file names to inodes; it is a projection of the inode table, rebuilt at
//! mount and updated only after the corresponding inode write succeeded.

pub mod inode;
pub mod superblock;

use crate::block::BlockLayer;
use crate::error::{Error, Result};
use crate::fs::inode::{DIRECT_POINTERS, INODE_SIZE, Inode, NAME_SIZE};
use crate::fs::superblock::Superblock;
use crate::util::ceil_division;
use log::{debug, info, warn};
use rand_core::{OsRng, RngCore};
use std::collections::BTreeMap;
use std::io::Read;

/// Every this many blocks of image, one block of inode table.
const BLOCKS_PER_INODE_BLOCK: u32 = 10_000;

/// On-disk layout constants, computed from the image size alone.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Layout {
    /// Total number of logical blocks in the image.
    total_blocks: u32,
    /// Number of allocation bitmap blocks, starting at block 1.
    num_bitmap_blocks: u32,
    /// Number of inode table blocks, following the bitmap.
    num_inode_blocks: u32,
    /// First data block number.
    offset_data: u32,
}

impl Layout {
    /// Computes the layout of an image of `total_blocks` blocks.
    fn compute(total_blocks: u32, block_size: usize) -> Result<Self> {
        let num_inode_blocks = (total_blocks / BLOCKS_PER_INODE_BLOCK).max(1);
        let reserved = 1 + num_inode_blocks;
        let Some(data_candidate) = total_blocks.checked_sub(reserved).filter(|n| *n > 0) else {
            return Err(Error::ImageTooSmall);
        };
        let num_bitmap_blocks =
            ceil_division(data_candidate as u64, block_size as u64 * 8) as u32;
        let offset_data = 1 + num_bitmap_blocks + num_inode_blocks;
        if offset_data >= total_blocks {
            return Err(Error::ImageTooSmall);
        }
        Ok(Self {
            total_blocks,
            num_bitmap_blocks,
            num_inode_blocks,
            offset_data,
        })
    }
}

/// A mounted encrypted filesystem.
pub struct FileSystem {
    /// Encrypted block access to the image.
    blocks: BlockLayer,
    /// The on-disk layout.
    layout: Layout,
    /// Name → inode projection of the inode table.
    directory: BTreeMap<String, Inode>,
}

impl FileSystem {
    /// Mounts the filesystem stored on `blocks`.
    ///
    /// If the image carries the superblock magic, the cipher is re-keyed
    /// with the stored derivation salt and the derived key is checked
    /// against the stored verifier; a mismatch fails with
    /// [`Error::BadCredentials`] before any encrypted block is read.
    /// Otherwise the image is formatted.
    pub fn mount(mut blocks: BlockLayer) -> Result<Self> {
        let layout = Layout::compute(blocks.total_blocks(), blocks.block_size())?;
        let raw = blocks.read_block(0)?;
        let mut fs = Self {
            blocks,
            layout,
            directory: BTreeMap::new(),
        };
        match Superblock::decode(&raw) {
            Some(sb) => {
                fs.blocks.cipher_mut().rekey(&sb.derivation_salt)?;
                if fs.blocks.cipher().key_digest() != sb.key_verifier {
                    return Err(Error::BadCredentials);
                }
                fs.load_inodes()?;
                info!("mounted image: {} file(s)", fs.directory.len());
            }
            None => fs.format()?,
        }
        Ok(fs)
    }

    /// Formats the image, destroying all its contents.
    ///
    /// A fresh derivation salt is generated, the cipher is re-keyed, a new
    /// superblock is written and the bitmap and inode table are zeroed
    /// through the encrypted path.
    pub fn format(&mut self) -> Result<()> {
        let mut derivation_salt = [0u8; 16];
        OsRng.fill_bytes(&mut derivation_salt);
        self.blocks.cipher_mut().rekey(&derivation_salt)?;
        let sb = Superblock {
            num_bitmap_blocks: self.layout.num_bitmap_blocks,
            num_inode_blocks: self.layout.num_inode_blocks,
            file_count: 0,
            derivation_salt,
            key_verifier: self.blocks.cipher().key_digest(),
        };
        let buf = sb.encode(self.blocks.block_size());
        self.blocks.write_block(0, &buf)?;
        let zeros = vec![0u8; self.blocks.block_size()];
        for block in 1..self.layout.offset_data {
            self.blocks.write_block(block, &zeros)?;
        }
        self.directory.clear();
        info!(
            "formatted image: {} blocks ({} bitmap, {} inode table)",
            self.layout.total_blocks, self.layout.num_bitmap_blocks, self.layout.num_inode_blocks
        );
        Ok(())
    }

    /// Number of inode slots per block.
    fn inodes_per_block(&self) -> u32 {
        (self.blocks.block_size() / INODE_SIZE) as u32
    }

    /// First block of the inode table.
    fn inode_table_start(&self) -> u32 {
        1 + self.layout.num_bitmap_blocks
    }

    /// Sets or clears the bitmap bit of data block `block`.
    ///
    /// Blocks below the data region are ignored.
    fn set_bitmap(&mut self, block: u32, used: bool) -> Result<()> {
        let Some(relative) = block.checked_sub(self.layout.offset_data) else {
            return Ok(());
        };
        let byte_index = (relative / 8) as usize;
        let bit = relative % 8;
        let block_size = self.blocks.block_size();
        let bitmap_block = 1 + (byte_index / block_size) as u32;
        let mut data = self.blocks.read_block(bitmap_block)?;
        let offset = byte_index % block_size;
        if used {
            data[offset] |= 1 << bit;
        } else {
            data[offset] &= !(1 << bit);
        }
        self.blocks.write_block(bitmap_block, &data)
    }

    /// Finds the first free data block, marks it used and returns its
    /// number.
    fn find_free_block(&mut self) -> Result<u32> {
        let block_size = self.blocks.block_size();
        for block in self.layout.offset_data..self.layout.total_blocks {
            let relative = block - self.layout.offset_data;
            let byte_index = (relative / 8) as usize;
            let bit = relative % 8;
            let bitmap_block = 1 + (byte_index / block_size) as u32;
            let data = self.blocks.read_block(bitmap_block)?;
            if data[byte_index % block_size] & (1 << bit) == 0 {
                self.set_bitmap(block, true)?;
                debug!("allocated data block {block}");
                return Ok(block);
            }
        }
        Err(Error::NoFreeBlock)
    }

    /// Returns the index of the first inode slot whose validity byte is not
    /// set.
    fn find_free_inode_position(&mut self) -> Result<u32> {
        let per_block = self.inodes_per_block();
        let total = self.layout.num_inode_blocks * per_block;
        for pos in 0..total {
            let block = self.inode_table_start() + pos / per_block;
            let data = self.blocks.read_block(block)?;
            let offset = (pos % per_block) as usize * INODE_SIZE;
            if data[offset] != Inode::VALID {
                return Ok(pos);
            }
        }
        Err(Error::NoFreeInode)
    }

    /// Writes `inode` into its slot, re-encrypting the enclosing inode
    /// block.
    fn write_inode(&mut self, inode: &Inode) -> Result<()> {
        let per_block = self.inodes_per_block();
        let block = self.inode_table_start() + inode.position / per_block;
        let offset = (inode.position % per_block) as usize * INODE_SIZE;
        let mut data = self.blocks.read_block(block)?;
        data[offset..offset + INODE_SIZE].copy_from_slice(&inode.encode());
        self.blocks.write_block(block, &data)
    }

    /// Rebuilds the directory from the inode table.
    ///
    /// Undecodable slots are skipped. Should two valid slots carry the same
    /// name, the later one wins.
    fn load_inodes(&mut self) -> Result<()> {
        self.directory.clear();
        let per_block = self.inodes_per_block();
        let start = self.inode_table_start();
        for blk in 0..self.layout.num_inode_blocks {
            let data = self.blocks.read_block(start + blk)?;
            for i in 0..per_block {
                let offset = i as usize * INODE_SIZE;
                let position = blk * per_block + i;
                match Inode::decode(&data[offset..offset + INODE_SIZE], position) {
                    Ok(inode) if inode.valid => {
                        self.directory.insert(inode.name.clone(), inode);
                    }
                    Ok(_) => {}
                    Err(_) => warn!("skipping malformed inode slot {position}"),
                }
            }
        }
        Ok(())
    }

    /// Truncates `name` to the stored maximum, on a character boundary.
    fn truncate_name(name: &str) -> String {
        let mut end = NAME_SIZE.min(name.len());
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name[..end].to_owned()
    }

    /// Creates a file holding the bytes of `source`.
    ///
    /// The source may span at most [`DIRECT_POINTERS`] blocks; a longer one
    /// fails with [`Error::TooLarge`] and every data block allocated for the
    /// attempt is released. The chosen inode slot is only written on
    /// success.
    pub fn create_file<R: Read>(&mut self, name: &str, source: &mut R) -> Result<()> {
        let name = Self::truncate_name(name);
        if self.directory.contains_key(&name) {
            return Err(Error::Exists(name));
        }
        let position = self.find_free_inode_position()?;
        let mut inode = Inode::new(name, position);
        match self.write_file_blocks(source, &mut inode) {
            Ok(size) => {
                inode.size = size;
                self.write_inode(&inode)?;
                debug!(
                    "created `{}`: {size} bytes in inode slot {position}",
                    inode.name
                );
                self.directory.insert(inode.name.clone(), inode);
                Ok(())
            }
            Err(e) => {
                // Release the blocks allocated for the failed attempt. The
                // inode slot was never written and stays free.
                for ptr in inode.direct {
                    if ptr != 0 {
                        self.set_bitmap(ptr, false)?;
                    }
                }
                Err(e)
            }
        }
    }

    /// Copies up to [`DIRECT_POINTERS`] block-sized chunks of `source` into
    /// freshly allocated data blocks recorded in `inode`, returning the
    /// number of bytes consumed.
    fn write_file_blocks<R: Read>(&mut self, source: &mut R, inode: &mut Inode) -> Result<u64> {
        let block_size = self.blocks.block_size();
        let mut chunk = vec![0u8; block_size];
        let mut size = 0u64;
        for slot in 0..DIRECT_POINTERS {
            let len = read_chunk(source, &mut chunk)?;
            if len == 0 {
                return Ok(size);
            }
            let block = self.find_free_block()?;
            inode.direct[slot] = block;
            self.blocks.write_block(block, &chunk[..len])?;
            size += len as u64;
            if len < block_size {
                return Ok(size);
            }
        }
        // Anything left past the direct blocks does not fit
        let mut probe = [0u8; 1];
        if source.read(&mut probe)? != 0 {
            return Err(Error::TooLarge);
        }
        Ok(size)
    }

    /// Returns the whole contents of the named file.
    pub fn read_file(&mut self, name: &str) -> Result<Vec<u8>> {
        let inode = self
            .directory
            .get(name)
            .ok_or_else(|| Error::NotFound(name.to_owned()))?
            .clone();
        let mut data = Vec::with_capacity(inode.size as usize);
        for ptr in inode.direct {
            if ptr == 0 {
                break;
            }
            data.extend_from_slice(&self.blocks.read_block(ptr)?);
        }
        data.truncate(inode.size as usize);
        Ok(data)
    }

    /// Deletes the named file, releasing its data blocks and inode slot.
    pub fn delete_file(&mut self, name: &str) -> Result<()> {
        let mut inode = self
            .directory
            .get(name)
            .ok_or_else(|| Error::NotFound(name.to_owned()))?
            .clone();
        for ptr in inode.direct {
            if ptr != 0 {
                self.set_bitmap(ptr, false)?;
                debug!("released data block {ptr}");
            }
        }
        inode.valid = false;
        self.write_inode(&inode)?;
        self.directory.remove(name);
        Ok(())
    }

    /// Renames a file. The inode keeps its slot.
    pub fn rename_file(&mut self, old: &str, new: &str) -> Result<()> {
        let new = Self::truncate_name(new);
        if !self.directory.contains_key(old) {
            return Err(Error::NotFound(old.to_owned()));
        }
        if self.directory.contains_key(&new) {
            return Err(Error::Exists(new));
        }
        let mut inode = self.directory[old].clone();
        inode.name = new.clone();
        self.write_inode(&inode)?;
        self.directory.remove(old);
        self.directory.insert(new, inode);
        Ok(())
    }

    /// Iterates over the `(name, size)` pairs of all files, in name order.
    pub fn list(&self) -> impl Iterator<Item = (&str, u64)> {
        self.directory
            .iter()
            .map(|(name, inode)| (name.as_str(), inode.size))
    }

    /// Flushes and releases the image.
    pub fn close(self) -> Result<()> {
        self.blocks.close()
    }
}

/// Fills `buf` from `source`, stopping at end of input. Returns the number
/// of bytes read.
fn read_chunk<R: Read>(source: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
