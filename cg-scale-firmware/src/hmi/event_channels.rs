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

use cg_scale_core::command::{Command, CommandError};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};

/// Everything the operator can do to the control loop.
#[derive(Debug, PartialEq, Clone, Copy, defmt::Format)]
pub enum ScaleEvent {
    ZeroButtonPressed,
    Command(Command),
    CommandRejected(CommandError),
}

const CHANNEL_DEPTH: usize = 8;

pub type ScaleEventChannel = Channel<CriticalSectionRawMutex, ScaleEvent, CHANNEL_DEPTH>;
pub type ScaleEventSender<'a> = Sender<'a, CriticalSectionRawMutex, ScaleEvent, CHANNEL_DEPTH>;
pub type ScaleEventReceiver<'a> =
    Receiver<'a, CriticalSectionRawMutex, ScaleEvent, CHANNEL_DEPTH>;
