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

//! `sfse` opens an encrypted filesystem image and serves an interactive
//! command shell over it.

use sfse::block::{BlockLayer, DEFAULT_BLOCK_SIZE};
use sfse::crypt::SectorCipher;
use sfse::device::{BlockDevice, DEFAULT_SECTOR_SIZE};
use sfse::error::Error;
use sfse::fs::FileSystem;
use sfse::prompt::prompt;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::process::exit;
use std::{env, fmt};

/// Writes an error to stderr, then exits.
fn error<M: fmt::Display>(msg: M) -> ! {
    eprintln!("sfse: error: {msg}");
    exit(1);
}

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
    /// If true, print command line help.
    help: bool,
    /// If set, create the image with the given size in bytes before
    /// mounting.
    create_size: Option<u64>,
    /// The path to the image file.
    image_path: Option<PathBuf>,
}

fn parse_args() -> Args {
    let mut res: Args = Default::default();
    let mut args = env::args_os().skip(1);
    while let Some(arg) = args.next() {
        match arg.to_str() {
            Some("-h" | "--help") => res.help = true,
            Some("--create") => {
                let size: u64 = args
                    .next()
                    .and_then(|s| s.to_str()?.parse().ok())
                    .unwrap_or_else(|| {
                        error("--create requires a size in bytes");
                    });
                res.create_size = Some(size);
            }
            _ => res.image_path = Some(PathBuf::from(arg)),
        }
    }
    res
}

fn print_usage() {
    println!("usage: sfse [--create <size>] <image>");
    println!();
    println!("Opens the encrypted filesystem stored in <image> and serves an");
    println!("interactive shell over it. An image without a valid superblock is");
    println!("formatted with the prompted credentials.");
    println!();
    println!("  --create <size>  create <image> with the given size in bytes");
    println!("  -h, --help       print this help");
}

/// Runs one shell command. Returns `false` on `exit`.
fn run_command(fs: &mut FileSystem, line: &str) -> bool {
    let (cmd, args) = line.split_once(' ').unwrap_or((line, ""));
    let args = args.trim();
    match cmd {
        "exit" => return false,
        "list" => {
            if fs.list().next().is_none() {
                println!("no files");
            }
            for (name, size) in fs.list() {
                println!("{name} - {size} bytes");
            }
        }
        "create" => {
            let Some((name, source)) = args.split_once(' ') else {
                println!("usage: create <name> <source-path>");
                return true;
            };
            let res = File::open(source.trim())
                .map_err(Error::from)
                .and_then(|mut f| fs.create_file(name, &mut f));
            match res {
                Ok(()) => println!("created `{name}`"),
                Err(e) => println!("cannot create `{name}`: {e}"),
            }
        }
        "read" => {
            if args.is_empty() {
                println!("usage: read <name>");
                return true;
            }
            match fs.read_file(args) {
                Ok(data) => println!("{}", String::from_utf8_lossy(&data)),
                Err(e) => println!("cannot read `{args}`: {e}"),
            }
        }
        "delete" => {
            if args.is_empty() {
                println!("usage: delete <name>");
                return true;
            }
            match fs.delete_file(args) {
                Ok(()) => println!("deleted `{args}`"),
                Err(e) => println!("cannot delete `{args}`: {e}"),
            }
        }
        "rename" => {
            let Some((old, new)) = args.split_once(' ') else {
                println!("usage: rename <old> <new>");
                return true;
            };
            match fs.rename_file(old, new.trim()) {
                Ok(()) => println!("renamed `{old}` to `{}`", new.trim()),
                Err(e) => println!("cannot rename `{old}`: {e}"),
            }
        }
        "format" => {
            let confirm = prompt("Format the image? This erases all data (yes/no): ", false)
                .map(|s| s.to_lowercase() == "yes")
                .unwrap_or(false);
            if confirm {
                match fs.format() {
                    Ok(()) => println!("image formatted"),
                    Err(e) => println!("format failed: {e}"),
                }
            }
        }
        "" => {}
        _ => {
            println!("commands: list, create <name> <source>, read <name>, delete <name>, rename <old> <new>, format, exit");
        }
    }
    true
}

fn main() {
    env_logger::init();
    let args = parse_args();
    if args.help {
        print_usage();
        return;
    }
    let image_path = args.image_path.unwrap_or_else(|| {
        error("specify path to an image file");
    });
    if let Some(size) = args.create_size {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .open(&image_path)
            .unwrap_or_else(|e| {
                error(format_args!("{}: {e}", image_path.display()));
            });
        file.set_len(size).unwrap_or_else(|e| {
            error(format_args!("cannot size image: {e}"));
        });
    }
    // Prompt for credentials
    let password = prompt("Password: ", true).unwrap_or_else(|| exit(1));
    let pin = prompt("PIN: ", true).unwrap_or_else(|| exit(1));
    let cipher = SectorCipher::new(&password, &pin).unwrap_or_else(|e| error(e));
    let dev = BlockDevice::open(&image_path, DEFAULT_SECTOR_SIZE).unwrap_or_else(|e| {
        error(format_args!("{}: {e}", image_path.display()));
    });
    let layer = BlockLayer::new(dev, cipher, DEFAULT_BLOCK_SIZE).unwrap_or_else(|e| error(e));
    let mut fs = FileSystem::mount(layer).unwrap_or_else(|e| error(e));
    println!("commands: list, create, read, delete, rename, format, exit");
    loop {
        let Some(line) = prompt("sfse> ", false) else {
            break;
        };
        if !run_command(&mut fs, line.trim()) {
            break;
        }
    }
    fs.close().unwrap_or_else(|e| error(e));
}
