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

use defmt::trace;
use embassy_futures::select::{Either, select};
use embassy_rp::pio::Instance;
use embassy_rp::pio_programs::ws2812::PioWs2812;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Ticker};
use smart_leds::{RGB8, brightness, gamma};

const DEFAULT_BRIGHTNESS: u8 = 64;
const HEARTBEAT_PERIOD: Duration = Duration::from_millis(250);

#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum LedStatus {
    Normal,
    LowBattery,
    Fault,
    Calibrating,
}

impl LedStatus {
    fn colour(&self) -> RGB8 {
        match self {
            LedStatus::Normal => RGB8::new(0, 255, 0),
            LedStatus::LowBattery => RGB8::new(255, 140, 0),
            LedStatus::Fault => RGB8::new(255, 0, 0),
            LedStatus::Calibrating => RGB8::new(0, 0, 255),
        }
    }

    /// Which of the eight heartbeat phases the LED is lit for.
    fn pattern(&self) -> u8 {
        match self {
            LedStatus::Normal => 0b0000_0001,
            LedStatus::LowBattery => 0b0000_0101,
            LedStatus::Fault => 0b0101_0101,
            LedStatus::Calibrating => 0b0000_1111,
        }
    }
}

pub type LedStatusSignal = Signal<CriticalSectionRawMutex, LedStatus>;

/// Single WS2812 status LED.
pub struct LedController<'a, P: Instance, const S: usize> {
    ws2812pio: PioWs2812<'a, P, S, 1>,
    status: LedStatus,
    phase: u8,
    brightness: u8,
}

impl<'a, P: Instance, const S: usize> LedController<'a, P, S> {
    pub fn new(ws2812pio: PioWs2812<'a, P, S, 1>) -> Self {
        Self {
            ws2812pio,
            status: LedStatus::Normal,
            phase: 0,
            brightness: DEFAULT_BRIGHTNESS,
        }
    }

    pub async fn run(&mut self, status_signal: &LedStatusSignal) -> ! {
        let mut heartbeat = Ticker::every(HEARTBEAT_PERIOD);
        loop {
            match select(status_signal.wait(), heartbeat.next()).await {
                Either::First(status) => {
                    if status != self.status {
                        trace!("LED status {:?}", status);
                        self.status = status;
                        self.phase = 0;
                    }
                }
                Either::Second(_) => self.phase = (self.phase + 1) % 8,
            }
            self.led_update().await;
        }
    }

    async fn led_update(&mut self) {
        let lit = self.status.pattern() & (1 << self.phase) != 0;
        let colour = match lit {
            true => self.status.colour(),
            false => RGB8::default(),
        };

        let mut final_leds = [RGB8::default(); 1];
        for (idx, led) in gamma(brightness([colour].into_iter(), self.brightness)).enumerate() {
            final_leds[idx] = led;
        }
        self.ws2812pio.write(&final_leds).await;
    }
}
