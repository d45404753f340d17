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

//! Errors shared across the crate.

use std::io;
use thiserror::Error;

/// Result alias used by every fallible operation of the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error occurring while operating on the filesystem.
#[derive(Debug, Error)]
pub enum Error {
    /// A transfer length is not a positive multiple of the required unit.
    #[error("length must be a positive multiple of {0} bytes")]
    InvalidSize(usize),
    /// The key derived from the provided credentials does not match the
    /// verifier stored in the superblock.
    #[error("bad credentials: derived key does not match the on-disk verifier")]
    BadCredentials,
    /// Every data block is allocated.
    #[error("no free data block available")]
    NoFreeBlock,
    /// Every inode slot is in use.
    #[error("no free inode slot available")]
    NoFreeInode,
    /// The source does not fit in the direct blocks of one inode.
    #[error("file is too large: at most 4 direct blocks are supported")]
    TooLarge,
    /// No file with the given name exists.
    #[error("file `{0}` not found")]
    NotFound(String),
    /// A file with the given name already exists.
    #[error("file `{0}` already exists")]
    Exists(String),
    /// An inode record could not be decoded.
    #[error("malformed inode record")]
    Decode,
    /// The image cannot hold the superblock, the bitmap, the inode table and
    /// at least one data block.
    #[error("image is too small to hold a filesystem")]
    ImageTooSmall,
    /// The key derivation function rejected its inputs.
    #[error("key derivation failed: {0}")]
    KeyDerivation(argon2::Error),
    /// An I/O error on the underlying image.
    #[error(transparent)]
    Io(#[from] io::Error),
}
