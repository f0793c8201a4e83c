// Copyright (C) 2025 Paul Hampson
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License version 3 as  published by the
// Free Software Foundation.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program.  If not, see <https://www.gnu.org/licenses/>.

//! Line based commands from the serial companion.
//!
//! ```text
//! zero
//! cal front <grams> | cal rear <grams> | cal battery <millivolts>
//! ok | y
//! cancel | n
//! factors
//! ```

use crate::calibration::CalibrationTarget;
use crate::weight::ChannelId;
use heapless::Vec;

pub const MAX_LINE_LENGTH: usize = 48;

const MAX_TOKENS: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    Zero,
    Calibrate {
        target: CalibrationTarget,
        reference: f32,
    },
    Confirm,
    Cancel,
    ShowFactors,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandError {
    Unknown,
    InvalidNumber,
}

pub fn parse(line: &str) -> Result<Command, CommandError> {
    let mut tokens = Vec::<&str, MAX_TOKENS>::new();
    for token in line.split_ascii_whitespace() {
        tokens.push(token).map_err(|_| CommandError::Unknown)?;
    }

    let is = |token: &str, word: &str| token.eq_ignore_ascii_case(word);
    match tokens.as_slice() {
        [word] if is(word, "zero") => Ok(Command::Zero),
        [word] if is(word, "ok") || is(word, "y") => Ok(Command::Confirm),
        [word] if is(word, "cancel") || is(word, "n") => Ok(Command::Cancel),
        [word] if is(word, "factors") => Ok(Command::ShowFactors),
        [word, target, rest @ ..] if is(word, "cal") => {
            let target = if is(target, "front") {
                CalibrationTarget::LoadCell(ChannelId::Front)
            } else if is(target, "rear") {
                CalibrationTarget::LoadCell(ChannelId::Rear)
            } else if is(target, "battery") {
                CalibrationTarget::BatteryVoltage
            } else {
                return Err(CommandError::Unknown);
            };
            match rest {
                [value] => Ok(Command::Calibrate {
                    target,
                    reference: parse_reference(value)?,
                }),
                [] => Err(CommandError::InvalidNumber),
                _ => Err(CommandError::Unknown),
            }
        }
        _ => Err(CommandError::Unknown),
    }
}

fn parse_reference(value: &str) -> Result<f32, CommandError> {
    let reference: f32 = value.parse().map_err(|_| CommandError::InvalidNumber)?;
    if !reference.is_finite() || reference <= 0.0 {
        return Err(CommandError::InvalidNumber);
    }
    Ok(reference)
}

/// Collects received bytes into lines. Overlong lines are dropped whole.
pub struct LineAssembler {
    buffer: Vec<u8, MAX_LINE_LENGTH>,
    overflowed: bool,
    complete: bool,
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl LineAssembler {
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            overflowed: false,
            complete: false,
        }
    }

    /// Feeds one byte, returning a completed non-empty line on `\r` or `\n`.
    pub fn push(&mut self, byte: u8) -> Option<&str> {
        if core::mem::replace(&mut self.complete, false) {
            self.buffer.clear();
        }

        match byte {
            b'\r' | b'\n' => {
                if core::mem::replace(&mut self.overflowed, false) {
                    log_warn!("Discarding overlong command line");
                    self.buffer.clear();
                    return None;
                }
                if self.buffer.is_empty() {
                    return None;
                }
                self.complete = true;
                match core::str::from_utf8(&self.buffer) {
                    Ok(line) => Some(line),
                    Err(_) => {
                        log_warn!("Discarding command line that is not valid text");
                        None
                    }
                }
            }
            _ => {
                if self.buffer.push(byte).is_err() {
                    self.overflowed = true;
                }
                None
            }
        }
    }
}
