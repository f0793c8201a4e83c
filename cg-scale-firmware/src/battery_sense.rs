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

use cg_scale_core::battery::BatterySense;
use embassy_rp::adc::{self, Adc, Async, Channel};

/// Battery voltage through a resistor divider on one of the RP2040 ADC inputs.
pub struct AdcBatterySense<'d> {
    adc: Adc<'d, Async>,
    channel: Channel<'d>,
}

impl<'d> AdcBatterySense<'d> {
    pub fn new(adc: Adc<'d, Async>, channel: Channel<'d>) -> Self {
        Self { adc, channel }
    }
}

impl BatterySense for AdcBatterySense<'_> {
    type Error = adc::Error;

    async fn read_raw(&mut self) -> Result<u16, Self::Error> {
        self.adc.read(&mut self.channel).await
    }
}
