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

use crate::calibration::{is_valid_factor, CalibrationSubject};
use crate::config::ScaleConfig;
use heapless::Vec;
use micromath::statistics::Mean;

/// Raw samples averaged when calibrating against a reference voltage.
const CALIBRATION_SAMPLES: usize = 8;

/// Analog input wired to the battery through a resistor divider.
pub trait BatterySense {
    type Error;

    async fn read_raw(&mut self) -> Result<u16, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Error<SenseE> {
    SenseReadingError(SenseE),
    InvalidCalibration,
}

pub struct BatteryMonitor<Sense> {
    sense: Sense,
    calibration_factor: f32,
    low_battery_mv: f32,
    last_reading_mv: Option<f32>,
}

impl<Sense, SenseE> BatteryMonitor<Sense>
where
    Sense: BatterySense<Error = SenseE>,
{
    pub fn new(sense: Sense, config: &ScaleConfig) -> Result<Self, Error<SenseE>> {
        let calibration_factor = config.default_calibration.battery;
        if !is_valid_factor(calibration_factor) {
            return Err(Error::InvalidCalibration);
        }
        Ok(Self {
            sense,
            calibration_factor,
            low_battery_mv: config.low_battery_mv,
            last_reading_mv: None,
        })
    }

    /// Battery voltage in mV.
    pub async fn read(&mut self) -> Result<f32, Error<SenseE>> {
        let raw = match self.sense.read_raw().await {
            Ok(raw) => raw,
            Err(e) => {
                self.last_reading_mv = None;
                return Err(Error::SenseReadingError(e));
            }
        };
        let millivolts = raw as f32 * self.calibration_factor;
        self.last_reading_mv = Some(millivolts);
        Ok(millivolts)
    }

    pub async fn is_low(&mut self) -> Result<bool, Error<SenseE>> {
        let millivolts = self.read().await?;
        Ok(self.classify(millivolts))
    }

    /// Exactly at the threshold is not low.
    pub fn classify(&self, millivolts: f32) -> bool {
        millivolts < self.low_battery_mv
    }

    pub fn last_reading(&self) -> Option<f32> {
        self.last_reading_mv
    }

    pub fn calibration_factor(&self) -> f32 {
        self.calibration_factor
    }

    pub fn set_calibration_factor(&mut self, factor: f32) -> Result<(), Error<SenseE>> {
        if !is_valid_factor(factor) {
            log_warn!("Rejected battery calibration factor {}", factor);
            return Err(Error::InvalidCalibration);
        }
        self.calibration_factor = factor;
        Ok(())
    }
}

impl<Sense, SenseE> CalibrationSubject for BatteryMonitor<Sense>
where
    Sense: BatterySense<Error = SenseE>,
{
    type Error = Error<SenseE>;
    const REQUIRES_ZERO: bool = false;

    async fn zero(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Mean raw ADC count.
    async fn measure(&mut self) -> Result<f32, Self::Error> {
        let mut samples = Vec::<f32, CALIBRATION_SAMPLES>::new();
        for _ in 0..CALIBRATION_SAMPLES {
            let raw = self
                .sense
                .read_raw()
                .await
                .map_err(Error::SenseReadingError)?;
            // capacity is CALIBRATION_SAMPLES
            let _ = samples.push(raw as f32);
        }
        Ok(samples.into_iter().mean())
    }

    /// Millivolts per count.
    fn derive_factor(measured: f32, reference: f32) -> f32 {
        reference / measured
    }

    fn calibration_factor(&self) -> f32 {
        self.calibration_factor
    }

    fn apply_calibration_factor(&mut self, factor: f32) -> Result<(), Self::Error> {
        self.set_calibration_factor(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockBatterySense;
    use embassy_futures::block_on;

    fn unit_monitor(raw: u16) -> BatteryMonitor<MockBatterySense> {
        let mut monitor =
            BatteryMonitor::new(MockBatterySense::constant(raw), &ScaleConfig::DEFAULT).unwrap();
        monitor.set_calibration_factor(1.0).unwrap();
        monitor
    }

    #[test]
    fn just_below_threshold_is_low() {
        let mut monitor = unit_monitor(5999);
        assert_eq!(block_on(monitor.read()), Ok(5999.0));
        assert_eq!(block_on(monitor.is_low()), Ok(true));
    }

    #[test]
    fn exactly_at_threshold_is_not_low() {
        let mut monitor = unit_monitor(6000);
        assert_eq!(block_on(monitor.is_low()), Ok(false));
    }

    #[test]
    fn reading_applies_factor() {
        let mut monitor =
            BatteryMonitor::new(MockBatterySense::constant(500), &ScaleConfig::DEFAULT).unwrap();
        monitor.set_calibration_factor(15.0).unwrap();
        assert_eq!(block_on(monitor.read()), Ok(7500.0));
        assert_eq!(monitor.last_reading(), Some(7500.0));
    }

    #[test]
    fn failed_read_clears_last_reading() {
        let mut sense = MockBatterySense::constant(500);
        let mut monitor = BatteryMonitor::new(sense.clone(), &ScaleConfig::DEFAULT).unwrap();
        block_on(monitor.read()).unwrap();

        sense.fail = true;
        monitor.sense = sense;
        assert!(block_on(monitor.read()).is_err());
        assert_eq!(monitor.last_reading(), None);
    }

    #[test]
    fn invalid_factor_keeps_previous() {
        let mut monitor = unit_monitor(1);
        assert_eq!(monitor.set_calibration_factor(0.0), Err(Error::InvalidCalibration));
        assert_eq!(monitor.calibration_factor(), 1.0);
    }
}
