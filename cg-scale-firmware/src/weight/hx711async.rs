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

use cg_scale_core::weight::interface::AsyncStrainGaugeInterface;
use embassy_time::{Duration, Ticker, Timer};

/// Gain and input selection, applied by the number of clocks after the 24 data bits.
#[allow(dead_code)]
#[derive(Clone, Copy, Debug, defmt::Format)]
pub enum Hx711Gain {
    Gain128,
    Gain64,
    Gain32ChannelB,
}

impl Hx711Gain {
    fn tick_count(&self) -> usize {
        match self {
            Hx711Gain::Gain128 => 25,
            Hx711Gain::Gain64 => 27,
            Hx711Gain::Gain32ChannelB => 26,
        }
    }
}

const POWER_MODE_CHANGE_DELAY: Duration = Duration::from_micros(60);
const CLK_HALF_PERIOD: Duration = Duration::from_micros(1);
const VALID_DATA_BITS: usize = 24;

#[derive(Debug, defmt::Format)]
pub enum Error<OutPinE, InPinE> {
    OutPin(OutPinE),
    InPin(InPinE),
}

/// Bit-banged HX711 on two GPIOs.
pub struct Hx711Async<CLK, DATA> {
    clock_pin: CLK,
    data_pin: DATA,
    gain_clocks: usize,
    powered_up: bool,
}

impl<CLK, DATA, ClkE, DataE> Hx711Async<CLK, DATA>
where
    CLK: embedded_hal::digital::OutputPin<Error = ClkE>,
    DATA: embedded_hal_async::digital::Wait<Error = DataE>
        + embedded_hal::digital::InputPin<Error = DataE>,
{
    pub fn new(clock_pin: CLK, data_pin: DATA, gain: Hx711Gain) -> Self {
        Self {
            clock_pin,
            data_pin,
            gain_clocks: gain.tick_count(),
            powered_up: false,
        }
    }
}

impl<CLK, DATA, ClkE, DataE> AsyncStrainGaugeInterface for Hx711Async<CLK, DATA>
where
    CLK: embedded_hal::digital::OutputPin<Error = ClkE>,
    DATA: embedded_hal_async::digital::Wait<Error = DataE>
        + embedded_hal::digital::InputPin<Error = DataE>,
{
    type Error = Error<ClkE, DataE>;

    async fn initialize(&mut self) -> Result<(), Self::Error> {
        self.power_up().await
    }

    /// DOUT is pulled low by the HX711 once a conversion is waiting.
    fn is_ready(&mut self) -> Result<bool, Self::Error> {
        if !self.powered_up {
            return Ok(false);
        }
        self.data_pin.is_low().map_err(Error::InPin)
    }

    async fn get_next_reading(&mut self) -> Result<i32, Self::Error> {
        if !self.powered_up {
            self.power_up().await?;
        }

        self.data_pin.wait_for_low().await.map_err(Error::InPin)?;

        let mut clock_ticker = Ticker::every(CLK_HALF_PERIOD);
        let mut data: i32 = 0;

        // Holding the clock high for more than 60us powers the chip down, so the clock must
        // not be left high across an await on anything slower than the ticker.
        clock_ticker.next().await;
        for _ in 0..self.gain_clocks {
            data <<= 1;
            self.clock_pin.set_high().map_err(Error::OutPin)?;
            clock_ticker.next().await;
            self.clock_pin.set_low().map_err(Error::OutPin)?;
            if self.data_pin.is_high().map_err(Error::InPin)? {
                data |= 0x1;
            }
            clock_ticker.next().await;
        }

        data >>= self.gain_clocks - VALID_DATA_BITS;
        data &= (1 << VALID_DATA_BITS) - 1;
        // sign extend from bit 23
        if (data >> (VALID_DATA_BITS - 1)) & 0x1 == 0x1 {
            data |= 0xFF000000u32 as i32;
        }
        Ok(data)
    }

    async fn power_down(&mut self) -> Result<(), Self::Error> {
        self.clock_pin.set_high().map_err(Error::OutPin)?;
        Timer::after(POWER_MODE_CHANGE_DELAY).await;
        self.powered_up = false;
        Ok(())
    }

    async fn power_up(&mut self) -> Result<(), Self::Error> {
        self.clock_pin.set_low().map_err(Error::OutPin)?;
        Timer::after(POWER_MODE_CHANGE_DELAY).await;
        self.powered_up = true;
        Ok(())
    }

    fn get_adc_bit_count(&self) -> usize {
        VALID_DATA_BITS
    }
}
