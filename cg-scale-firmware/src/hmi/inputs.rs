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

use crate::hmi::debouncer::Debouncer;
use crate::hmi::event_channels::{ScaleEvent, ScaleEventSender};
use defmt::debug;
use embassy_rp::gpio::Level;

/// The zero button pulls its input low while pressed.
pub async fn zero_button_handler(events: ScaleEventSender<'_>, mut debounced_btn: Debouncer<'_>) {
    loop {
        debounced_btn.wait_for_change_to(Level::Low).await;
        debug!("Zero button pressed");
        events.send(ScaleEvent::ZeroButtonPressed).await;
        debounced_btn.wait_for_change_to(Level::High).await;
    }
}
