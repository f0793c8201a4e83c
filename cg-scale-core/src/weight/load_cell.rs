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
use crate::config::{FilterSettings, ScaleConfig, FILTER_WINDOW};
use crate::weight::interface::AsyncStrainGaugeInterface;
use crate::weight::{ChannelId, Error};
use embassy_time::{with_timeout, Duration};
use heapless::{Deque, Vec};
#[allow(unused_imports)]
use micromath::F32Ext;

/// Below this many samples the window spread is meaningless and only the floor applies.
const MIN_SAMPLES_FOR_SPREAD: usize = 3;

/// Widens the outlier floor while the window is too small to estimate its spread.
const SPARSE_WINDOW_FLOOR_FACTOR: f32 = 16.0;

/// Scales the median absolute deviation to a standard deviation for normal noise.
const MAD_TO_SIGMA: f32 = 1.4826;

/// Upper bound on filter updates spent refilling the window, per window slot.
const REFILL_ATTEMPTS_PER_SLOT: usize = 4;

/// One HX711 channel: bounded acquisition, moving-average filtering, tare offset and
/// conversion to grams.
pub struct LoadCellChannel<StrainGauge, const K: usize = FILTER_WINDOW> {
    id: ChannelId,
    strain_gauge: StrainGauge,
    window: Deque<i32, K>,
    zero_offset: i32,
    calibration_factor: f32,
    filter: FilterSettings,
    sample_timeout: Duration,
    fresh: bool,
}

impl<StrainGauge, StrainGaugeE, const K: usize> LoadCellChannel<StrainGauge, K>
where
    StrainGauge: AsyncStrainGaugeInterface<Error = StrainGaugeE>,
{
    pub async fn new(
        id: ChannelId,
        mut strain_gauge: StrainGauge,
        config: &ScaleConfig,
    ) -> Result<Self, Error<StrainGaugeE>> {
        strain_gauge
            .initialize()
            .await
            .map_err(Error::StrainGaugeReadingError)?;

        let calibration_factor = match id {
            ChannelId::Front => config.default_calibration.front,
            ChannelId::Rear => config.default_calibration.rear,
        };
        if !is_valid_factor(calibration_factor) {
            return Err(Error::InvalidCalibration);
        }
        log_debug!(
            "Load cell {} ready, {} bit ADC",
            id.label(),
            strain_gauge.get_adc_bit_count()
        );

        Ok(Self {
            id,
            strain_gauge,
            window: Deque::new(),
            zero_offset: 0,
            calibration_factor,
            filter: config.filter,
            sample_timeout: config.sample_timeout,
            fresh: false,
        })
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn strain_gauge_mut(&mut self) -> &mut StrainGauge {
        &mut self.strain_gauge
    }

    pub async fn power_down(&mut self) -> Result<(), Error<StrainGaugeE>> {
        self.strain_gauge
            .power_down()
            .await
            .map_err(Error::StrainGaugeReadingError)
    }

    /// Wakes the gauge. The filter window is dropped since the bridge has to settle again.
    pub async fn power_up(&mut self) -> Result<(), Error<StrainGaugeE>> {
        self.strain_gauge
            .power_up()
            .await
            .map_err(Error::StrainGaugeReadingError)?;
        self.window.clear();
        self.fresh = false;
        Ok(())
    }

    pub fn is_conversion_ready(&mut self) -> Result<bool, Error<StrainGaugeE>> {
        self.strain_gauge
            .is_ready()
            .map_err(Error::StrainGaugeReadingError)
    }

    /// Waits for the next raw conversion, giving up after the sample timeout.
    pub async fn acquire(&mut self) -> Result<i32, Error<StrainGaugeE>> {
        match with_timeout(self.sample_timeout, self.strain_gauge.get_next_reading()).await {
            Ok(reading) => reading.map_err(Error::StrainGaugeReadingError),
            Err(_) => {
                log_warn!("Load cell {} timed out waiting for conversion", self.id.label());
                Err(Error::SensorTimeout)
            }
        }
    }

    /// Acquires a sample into the moving average and returns the new filtered value.
    ///
    /// A sample that lies too far from the current window is discarded and another one is taken.
    /// If the retries keep disagreeing with the window the load has really changed, so the window
    /// restarts from the newest sample.
    pub async fn update(&mut self) -> Result<f32, Error<StrainGaugeE>> {
        let mut retries = 0;
        loop {
            let sample = self.acquire().await?;
            if !self.is_outlier(sample) {
                self.push_sample(sample);
                break;
            }
            if retries >= self.filter.max_outlier_retries {
                log_debug!(
                    "Load cell {} settled at new level {}, restarting filter",
                    self.id.label(),
                    sample
                );
                self.window.clear();
                self.push_sample(sample);
                break;
            }
            retries += 1;
            log_trace!("Load cell {} rejected outlier {}", self.id.label(), sample);
        }

        self.fresh = true;
        self.filtered_sample().ok_or(Error::NoReading)
    }

    fn push_sample(&mut self, sample: i32) {
        if self.window.is_full() {
            self.window.pop_front();
        }
        // cannot fail, space was made above
        let _ = self.window.push_back(sample);
    }

    /// Judges a sample against the window median and its median absolute deviation.
    fn is_outlier(&self, sample: i32) -> bool {
        let Some(base) = self.window.front().copied() else {
            return false;
        };

        // Offsets from the first sample keep the values small enough for f32.
        let mut offsets: Vec<f32, K> = self.window.iter().map(|s| (s - base) as f32).collect();
        offsets.sort_unstable_by(f32::total_cmp);
        let median = median_of_sorted(&offsets);

        let threshold = if offsets.len() < MIN_SAMPLES_FOR_SPREAD {
            self.filter.outlier_floor_counts * SPARSE_WINDOW_FLOOR_FACTOR
        } else {
            let mut deviations: Vec<f32, K> =
                offsets.iter().map(|offset| (offset - median).abs()).collect();
            deviations.sort_unstable_by(f32::total_cmp);
            let spread = median_of_sorted(&deviations) * MAD_TO_SIGMA;
            (self.filter.outlier_sigma * spread).max(self.filter.outlier_floor_counts)
        };

        ((sample - base) as f32 - median).abs() > threshold
    }

    /// Mean of the current window, `None` before the first sample.
    pub fn filtered_sample(&self) -> Option<f32> {
        let count = self.window.len() as i64;
        if count == 0 {
            return None;
        }
        let sum: i64 = self.window.iter().map(|s| *s as i64).sum();
        // Split so the integer part stays exact for full scale 24 bit readings.
        Some((sum / count) as f32 + (sum % count) as f32 / count as f32)
    }

    /// Refills the filter under the current (unloaded) condition and takes its mean as the
    /// new zero offset. The calibration factor is untouched.
    pub async fn tare(&mut self) -> Result<(), Error<StrainGaugeE>> {
        self.refill().await?;
        let baseline = self.filtered_sample().ok_or(Error::NoReading)?;
        self.zero_offset = baseline.round() as i32;
        log_debug!("Load cell {} tare offset = {}", self.id.label(), self.zero_offset);
        Ok(())
    }

    async fn refill(&mut self) -> Result<(), Error<StrainGaugeE>> {
        self.window.clear();
        for _ in 0..K * REFILL_ATTEMPTS_PER_SLOT {
            if self.window.is_full() {
                break;
            }
            self.update().await?;
        }
        if !self.window.is_full() {
            log_warn!(
                "Load cell {} did not settle, using {} samples",
                self.id.label(),
                self.window.len()
            );
        }
        Ok(())
    }

    /// Takes a new sample and returns the calibrated weight in grams.
    pub async fn weight(&mut self) -> Result<f32, Error<StrainGaugeE>> {
        self.update().await?;
        self.current_weight().ok_or(Error::NoReading)
    }

    /// Calibrated weight of the current window without sampling again.
    pub fn current_weight(&self) -> Option<f32> {
        self.tared_counts()
            .map(|counts| counts / self.calibration_factor)
    }

    /// Filtered reading relative to the zero offset, in raw counts.
    pub fn tared_counts(&self) -> Option<f32> {
        self.filtered_sample()
            .map(|filtered| filtered - self.zero_offset as f32)
    }

    pub fn zero_offset(&self) -> i32 {
        self.zero_offset
    }

    pub fn calibration_factor(&self) -> f32 {
        self.calibration_factor
    }

    pub fn set_calibration_factor(&mut self, factor: f32) -> Result<(), Error<StrainGaugeE>> {
        if !is_valid_factor(factor) {
            log_warn!(
                "Rejected calibration factor {} for load cell {}",
                factor,
                self.id.label()
            );
            return Err(Error::InvalidCalibration);
        }
        self.calibration_factor = factor;
        Ok(())
    }

    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    /// Returns whether a sample arrived since the last call, clearing the flag.
    pub fn take_fresh(&mut self) -> bool {
        core::mem::replace(&mut self.fresh, false)
    }
}

fn median_of_sorted(values: &[f32]) -> f32 {
    let mid = values.len() / 2;
    match values.len() {
        0 => 0.0,
        n if n % 2 == 1 => values[mid],
        _ => (values[mid - 1] + values[mid]) / 2.0,
    }
}

impl<StrainGauge, StrainGaugeE, const K: usize> CalibrationSubject
    for LoadCellChannel<StrainGauge, K>
where
    StrainGauge: AsyncStrainGaugeInterface<Error = StrainGaugeE>,
{
    type Error = Error<StrainGaugeE>;
    const REQUIRES_ZERO: bool = true;

    async fn zero(&mut self) -> Result<(), Self::Error> {
        self.tare().await
    }

    async fn measure(&mut self) -> Result<f32, Self::Error> {
        self.refill().await?;
        self.tared_counts().ok_or(Error::NoReading)
    }

    /// Counts per gram.
    fn derive_factor(measured: f32, reference: f32) -> f32 {
        measured / reference
    }

    fn calibration_factor(&self) -> f32 {
        self.calibration_factor
    }

    fn apply_calibration_factor(&mut self, factor: f32) -> Result<(), Self::Error> {
        self.set_calibration_factor(factor)
    }
}
