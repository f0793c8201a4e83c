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

pub mod interface;
pub mod load_cell;

/// The two wing support points.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelId {
    Front,
    Rear,
}

impl ChannelId {
    pub fn label(&self) -> &'static str {
        match self {
            ChannelId::Front => "front",
            ChannelId::Rear => "rear",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Error<StrainGaugeE> {
    StrainGaugeReadingError(StrainGaugeE),
    /// No conversion arrived within the configured sample timeout.
    SensorTimeout,
    /// Calibration factor was zero or not finite. The previous factor is kept.
    InvalidCalibration,
    /// Nothing has been sampled yet.
    NoReading,
}
