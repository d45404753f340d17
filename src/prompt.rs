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

//! This module implements prompting, with hidden input for credentials.

use libc::{ECHO, ECHOE, ICANON, STDIN_FILENO, TCSANOW, VMIN, tcgetattr, tcsetattr, termios};
use std::io::{BufRead, Write};
use std::mem::MaybeUninit;
use std::{fmt, io};

/// Restores the saved terminal state when dropped.
struct TermiosGuard(termios);

impl Drop for TermiosGuard {
    fn drop(&mut self) {
        unsafe {
            tcsetattr(STDIN_FILENO, TCSANOW, &self.0);
        }
    }
}

/// Turns off input echo, returning a guard restoring the terminal state.
fn hide_input() -> TermiosGuard {
    // Save termios state
    let saved = unsafe {
        let mut t: termios = MaybeUninit::zeroed().assume_init();
        tcgetattr(STDIN_FILENO, &mut t);
        t
    };
    // Set temporary termios
    let mut tmp = saved;
    tmp.c_lflag &= !(ICANON | ECHO | ECHOE);
    tmp.c_cc[VMIN] = 1;
    unsafe {
        tcsetattr(STDIN_FILENO, TCSANOW, &tmp);
    }
    TermiosGuard(saved)
}

/// Shows a prompt and reads one line. This function returns when a newline
/// is received.
///
/// Arguments:
/// - `prompt` is the prompt's text.
/// - `hidden` tells whether the input is hidden.
pub fn prompt<P: fmt::Display>(prompt: P, hidden: bool) -> Option<String> {
    let guard = hidden.then(hide_input);
    print!("{prompt}");
    let _ = io::stdout().flush();
    let input = io::stdin().lock().lines().next()?.unwrap_or_default();
    if guard.is_some() {
        println!();
    }
    Some(input)
}
