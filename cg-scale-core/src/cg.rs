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

//! Centre of gravity from the two support forces.
//!
//! The front support is the origin and the rear support sits at `+peg_distance`. Taking
//! moments about the front support, `rear * peg_distance = total * cg_from_front`.

/// Rig dimensions, in 1/10 mm.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WingGeometry {
    /// Distance between the two support points.
    pub peg_distance: f32,
    /// Distance from the front support point to the leading edge stopper.
    pub le_stopper_distance: f32,
}

/// Where the stopper sits relative to the front support along the chord.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReferenceDirection {
    /// The leading edge rests on a stopper in front of the front support, so the CG measured
    /// from the leading edge is `le_stopper_distance + cg_from_front`.
    StopperAheadOfFront,
    /// The stopper lies behind the front support: `le_stopper_distance - cg_from_front`.
    StopperBehindFront,
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CgResult {
    /// Grams.
    pub total_weight: f32,
    /// 1/10 mm from the front support.
    pub cg_from_front: f32,
    /// 1/10 mm from the stopper.
    pub cg_from_reference: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CgError {
    /// Combined load at or below the no-load threshold.
    DegenerateReading,
}

/// Combines the two support weights. Results outside the wing are returned as computed.
pub fn compute(
    front_weight: f32,
    rear_weight: f32,
    geometry: &WingGeometry,
    direction: ReferenceDirection,
    no_load_threshold: f32,
) -> Result<CgResult, CgError> {
    let total_weight = front_weight + rear_weight;
    if !total_weight.is_finite() || total_weight <= no_load_threshold {
        return Err(CgError::DegenerateReading);
    }

    let cg_from_front = rear_weight * geometry.peg_distance / total_weight;
    let cg_from_reference = match direction {
        ReferenceDirection::StopperAheadOfFront => geometry.le_stopper_distance + cg_from_front,
        ReferenceDirection::StopperBehindFront => geometry.le_stopper_distance - cg_from_front,
    };

    Ok(CgResult {
        total_weight,
        cg_from_front,
        cg_from_reference,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const GEOMETRY: WingGeometry = WingGeometry {
        peg_distance: 1200.0,
        le_stopper_distance: 300.0,
    };

    #[test]
    fn moment_balance() {
        let result =
            compute(300.0, 700.0, &GEOMETRY, ReferenceDirection::StopperAheadOfFront, 1.0).unwrap();
        assert_eq!(result.total_weight, 1000.0);
        assert_eq!(result.cg_from_front, 840.0);
        assert_eq!(result.cg_from_reference, 1140.0);
    }

    #[test]
    fn reference_direction_flips_offset() {
        let result =
            compute(300.0, 700.0, &GEOMETRY, ReferenceDirection::StopperBehindFront, 1.0).unwrap();
        assert_eq!(result.cg_from_reference, -540.0);
    }

    #[test]
    fn empty_scale_is_degenerate() {
        assert_eq!(
            compute(0.0, 0.0, &GEOMETRY, ReferenceDirection::StopperAheadOfFront, 1.0),
            Err(CgError::DegenerateReading)
        );
    }

    #[test]
    fn negative_drift_is_degenerate() {
        assert_eq!(
            compute(-3.0, 1.5, &GEOMETRY, ReferenceDirection::StopperAheadOfFront, 1.0),
            Err(CgError::DegenerateReading)
        );
    }

    #[test]
    fn cg_outside_supports_is_not_clamped() {
        // rear support carrying more than the total means the CG lies behind it
        let result = compute(
            -100.0,
            600.0,
            &GEOMETRY,
            ReferenceDirection::StopperAheadOfFront,
            1.0,
        )
        .unwrap();
        assert_eq!(result.cg_from_front, 1440.0);
    }

    #[test]
    fn all_load_on_front_support() {
        let result =
            compute(450.0, 0.0, &GEOMETRY, ReferenceDirection::StopperAheadOfFront, 1.0).unwrap();
        assert_eq!(result.cg_from_front, 0.0);
        assert_eq!(result.cg_from_reference, 300.0);
    }
}
