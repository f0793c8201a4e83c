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

use embassy_futures::select::{select, Either};
use embassy_rp::gpio::{Input, Level};
use embassy_time::{Duration, Timer};

pub struct Debouncer<'a> {
    input: Input<'a>,
    debounce_time: Duration,
}

impl<'a> Debouncer<'a> {
    pub fn new(input: Input<'a>, debounce: Duration) -> Self {
        Self {
            input,
            debounce_time: debounce,
        }
    }

    /// Level once the input has been quiet for the debounce time.
    pub async fn debounce(&mut self) -> Level {
        loop {
            match select(self.input.wait_for_any_edge(), Timer::after(self.debounce_time)).await {
                // still bouncing
                Either::First(_) => continue,
                Either::Second(_) => break self.input.get_level(),
            }
        }
    }

    pub async fn wait_for_change_to(&mut self, target_level: Level) {
        loop {
            match target_level {
                Level::High => self.input.wait_for_rising_edge().await,
                Level::Low => self.input.wait_for_falling_edge().await,
            }

            if self.debounce().await == target_level {
                break;
            }
        }
    }
}
