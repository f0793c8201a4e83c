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

use crate::cg::{ReferenceDirection, WingGeometry};
use crate::storage::record::CalibrationFactors;
use embassy_time::Duration;

/// Number of raw samples averaged by each load cell channel.
pub const FILTER_WINDOW: usize = 16;

/// Outlier handling for the load cell moving average.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FilterSettings {
    /// A sample further than this many standard deviations from the window mean is rejected.
    pub outlier_sigma: f32,
    /// Lower bound on the rejection distance, in raw counts. Stops a perfectly quiet window
    /// from rejecting every sample.
    pub outlier_floor_counts: f32,
    /// Consecutive rejections after which the load is treated as having really changed.
    pub max_outlier_retries: u8,
}

/// Static configuration, built once at startup and handed to the components that need it.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScaleConfig {
    pub geometry: WingGeometry,
    pub reference_direction: ReferenceDirection,
    pub default_calibration: CalibrationFactors,
    /// Battery voltage below which the low battery flag is raised, in mV.
    pub low_battery_mv: f32,
    pub filter: FilterSettings,
    /// Longest wait for a single HX711 conversion.
    pub sample_timeout: Duration,
    /// Combined load below which no CG is computed, in grams.
    pub no_load_threshold_grams: f32,
    /// A new calibration factor more than this many times larger (or smaller) than the
    /// previous one is held back for operator confirmation.
    pub plausibility_ratio: f32,
    /// Calibration is abandoned after this long without operator input.
    pub calibration_timeout: Duration,
    pub display_refresh: Duration,
    pub serial_refresh: Duration,
    pub battery_refresh: Duration,
}

impl ScaleConfig {
    pub const DEFAULT: Self = Self {
        geometry: WingGeometry {
            peg_distance: 1200.0,
            le_stopper_distance: 300.0,
        },
        reference_direction: ReferenceDirection::StopperAheadOfFront,
        default_calibration: CalibrationFactors {
            front: 954.0,
            rear: 799.0,
            battery: 15.26,
        },
        low_battery_mv: 6000.0,
        filter: FilterSettings {
            outlier_sigma: 3.0,
            outlier_floor_counts: 64.0,
            max_outlier_retries: 3,
        },
        sample_timeout: Duration::from_millis(500),
        no_load_threshold_grams: 1.0,
        plausibility_ratio: 10.0,
        calibration_timeout: Duration::from_secs(120),
        display_refresh: Duration::from_millis(100),
        serial_refresh: Duration::from_millis(500),
        battery_refresh: Duration::from_secs(1),
    };
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
