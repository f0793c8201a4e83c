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

pub mod routine;

use crate::weight::ChannelId;

/// What a calibration routine is deriving a factor for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationTarget {
    LoadCell(ChannelId),
    BatteryVoltage,
}

impl CalibrationTarget {
    pub fn label(&self) -> &'static str {
        match self {
            CalibrationTarget::LoadCell(id) => id.label(),
            CalibrationTarget::BatteryVoltage => "battery",
        }
    }

    /// Unit of the reference the operator supplies.
    pub fn reference_unit(&self) -> &'static str {
        match self {
            CalibrationTarget::LoadCell(_) => "g",
            CalibrationTarget::BatteryVoltage => "mV",
        }
    }
}

/// Calibration factors divide or multiply raw readings, so zero and non-finite values are
/// never usable.
pub fn is_valid_factor(factor: f32) -> bool {
    factor.is_finite() && factor != 0.0
}

/// Something a [`routine::CalibrationRoutine`] can derive a factor for.
pub trait CalibrationSubject {
    type Error;

    /// Whether the subject needs a no-load baseline before the reference is applied.
    const REQUIRES_ZERO: bool;

    /// Capture the no-load baseline.
    async fn zero(&mut self) -> Result<(), Self::Error>;

    /// Measure the applied reference, in the units [`Self::derive_factor`] expects.
    async fn measure(&mut self) -> Result<f32, Self::Error>;

    fn derive_factor(measured: f32, reference: f32) -> f32;

    fn calibration_factor(&self) -> f32;

    fn apply_calibration_factor(&mut self, factor: f32) -> Result<(), Self::Error>;
}
