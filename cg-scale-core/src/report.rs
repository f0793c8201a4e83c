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

//! Text for the 16x2 display and the serial companion. Distances are held in 1/10 mm and
//! printed in mm.

use crate::calibration::routine::{FailureReason, RoutineState};
use crate::calibration::CalibrationTarget;
use crate::command::CommandError;
use crate::scale::{CalibrationView, ScaleError, ScaleReport};
use crate::storage::record::{CalibrationRecord, RecordSource};
use core::fmt::{self, Write};
use heapless::String;

pub const DISPLAY_COLUMNS: usize = 16;
pub const SERIAL_LINE_LENGTH: usize = 96;

/// Scratch space for a display line before it is cut to width.
const DISPLAY_SCRATCH: usize = 32;

pub type DisplayLine = String<DISPLAY_COLUMNS>;
pub type SerialLine = String<SERIAL_LINE_LENGTH>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayText {
    pub top: DisplayLine,
    pub bottom: DisplayLine,
}

fn tenths_to_mm(distance: f32) -> f32 {
    distance / 10.0
}

/// Formats into a display line, dropping whatever does not fit.
fn display_line(args: fmt::Arguments) -> DisplayLine {
    let mut scratch = String::<DISPLAY_SCRATCH>::new();
    let _ = scratch.write_fmt(args);
    let mut line = DisplayLine::new();
    for c in scratch.chars().take(DISPLAY_COLUMNS) {
        let _ = line.push(c);
    }
    line
}

fn serial_text(args: fmt::Arguments) -> SerialLine {
    let mut line = SerialLine::new();
    // overflow leaves the line truncated at the last piece that fitted
    let _ = line.write_fmt(args);
    line
}

fn failure_label(reason: FailureReason) -> &'static str {
    match reason {
        FailureReason::Cancelled => "cancelled",
        FailureReason::TimedOut => "timeout",
        FailureReason::OutOfRange => "range",
        FailureReason::MeasurementFailed => "sensor",
        FailureReason::RejectedBySubject => "factor",
    }
}

fn source_label(source: RecordSource) -> &'static str {
    match source {
        RecordSource::Stored => "stored",
        RecordSource::Defaults => "defaults",
        RecordSource::InMemory => "unsaved",
    }
}

pub fn display_text(report: &ScaleReport) -> DisplayText {
    if let Some(calibration) = &report.calibration {
        return calibration_display(calibration);
    }

    let top = if report.status.front_fault {
        display_line(format_args!("Front cell fault"))
    } else if report.status.rear_fault {
        display_line(format_args!("Rear cell fault"))
    } else {
        match report.cg {
            Some(Ok(cg)) => display_line(format_args!(
                "{:>6.0}g  {:>5.1}mm",
                cg.total_weight,
                tenths_to_mm(cg.cg_from_reference)
            )),
            Some(Err(_)) => display_line(format_args!("no load")),
            None => display_line(format_args!("---")),
        }
    };

    let marker = if report.low_battery { " LOW" } else { "" };
    let bottom = match report.battery_mv {
        Some(millivolts) => display_line(format_args!("Bat {:.2}V{}", millivolts / 1000.0, marker)),
        None => display_line(format_args!("Bat ---")),
    };

    DisplayText { top, bottom }
}

fn calibration_display(view: &CalibrationView) -> DisplayText {
    let top = display_line(format_args!("Cal {}", view.target.label()));
    let bottom = match (view.state, view.target) {
        (RoutineState::Idle, CalibrationTarget::LoadCell(_)) => {
            display_line(format_args!("Unload, press OK"))
        }
        (RoutineState::Idle, CalibrationTarget::BatteryVoltage) => {
            display_line(format_args!("Bat={:.0}mV OK", view.reference))
        }
        (RoutineState::AwaitingZero, _) => {
            display_line(format_args!("Load {:.0}g OK", view.reference))
        }
        (RoutineState::AwaitingReferenceLoad, _) => display_line(format_args!("Measuring")),
        (RoutineState::ComputingFactor, _) => display_line(format_args!(
            "Odd {:.1} OK?",
            view.computed_factor.unwrap_or(f32::NAN)
        )),
        (RoutineState::Done, _) => {
            let label = if view.persisted { "Saved" } else { "Unsaved" };
            display_line(format_args!(
                "{} {:.2}",
                label,
                view.computed_factor.unwrap_or(f32::NAN)
            ))
        }
        (RoutineState::Failed, _) => display_line(format_args!(
            "Failed: {}",
            view.failure.map(failure_label).unwrap_or("?")
        )),
    };
    DisplayText { top, bottom }
}

/// Periodic status line, e.g. `Wt:1000.0g CG:114.0mm Bat:7400mV`.
pub fn serial_line(report: &ScaleReport) -> SerialLine {
    let mut line = match report.cg {
        Some(Ok(cg)) => serial_text(format_args!(
            "Wt:{:.1}g CG:{:.1}mm",
            cg.total_weight,
            tenths_to_mm(cg.cg_from_reference)
        )),
        _ => serial_text(format_args!("Wt:--- CG:---")),
    };

    let _ = match report.battery_mv {
        Some(millivolts) => write!(line, " Bat:{:.0}mV", millivolts),
        None => write!(line, " Bat:---"),
    };
    if report.low_battery {
        let _ = line.push_str(" LOW");
    }
    if report.status.front_fault {
        let _ = line.push_str(" FRONT-FAULT");
    }
    if report.status.rear_fault {
        let _ = line.push_str(" REAR-FAULT");
    }
    line
}

/// Operator instructions for the companion interface.
pub fn calibration_prompt(view: &CalibrationView) -> SerialLine {
    let label = view.target.label();
    let factor = view.computed_factor.unwrap_or(f32::NAN);
    match (view.state, view.target) {
        (RoutineState::Idle, CalibrationTarget::LoadCell(_)) => {
            serial_text(format_args!("CAL {}: remove all load, then send ok", label))
        }
        (RoutineState::Idle, CalibrationTarget::BatteryVoltage) => serial_text(format_args!(
            "CAL {}: battery measured at {:.0}mV, send ok to apply",
            label, view.reference
        )),
        (RoutineState::AwaitingZero, _) => serial_text(format_args!(
            "CAL {}: place {:.1}g reference, then send ok",
            label, view.reference
        )),
        (RoutineState::AwaitingReferenceLoad, _) => {
            serial_text(format_args!("CAL {}: measuring", label))
        }
        (RoutineState::ComputingFactor, _) => serial_text(format_args!(
            "CAL {}: factor {:.3} is far from previous, ok to accept or cancel",
            label, factor
        )),
        (RoutineState::Done, _) if view.persisted => {
            serial_text(format_args!("CAL {}: factor {:.3} saved", label, factor))
        }
        (RoutineState::Done, _) => serial_text(format_args!(
            "CAL {}: factor {:.3} applied but not saved",
            label, factor
        )),
        (RoutineState::Failed, _) => serial_text(format_args!(
            "CAL {}: failed ({}), ok to retry",
            label,
            view.failure.map(failure_label).unwrap_or("unknown")
        )),
    }
}

pub fn factors_line(record: &CalibrationRecord) -> SerialLine {
    serial_text(format_args!(
        "Factors front:{:.3} rear:{:.3} battery:{:.4} ({})",
        record.factors.front,
        record.factors.rear,
        record.factors.battery,
        source_label(record.source)
    ))
}

pub fn error_line(error: &ScaleError) -> SerialLine {
    match error {
        ScaleError::SensorFault(channel) => {
            serial_text(format_args!("ERR {} load cell fault", channel.label()))
        }
        ScaleError::CalibrationBusy => serial_text(format_args!("ERR calibration in progress")),
        ScaleError::NoCalibrationActive => serial_text(format_args!("ERR no calibration running")),
        ScaleError::InvalidReference => serial_text(format_args!("ERR invalid reference")),
        ScaleError::Calibration(reason) => {
            serial_text(format_args!("ERR calibration {}", failure_label(*reason)))
        }
    }
}

pub fn command_error_line(error: CommandError) -> &'static str {
    match error {
        CommandError::Unknown => "ERR unknown command",
        CommandError::InvalidNumber => "ERR invalid number",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cg::{CgError, CgResult};
    use crate::scale::ScaleStatus;
    use crate::storage::record::CalibrationFactors;
    use crate::weight::ChannelId;

    fn report(
        cg: Option<Result<CgResult, CgError>>,
        battery_mv: Option<f32>,
        low: bool,
    ) -> ScaleReport {
        ScaleReport {
            cg,
            battery_mv,
            low_battery: low,
            status: ScaleStatus::default(),
            calibration: None,
        }
    }

    const CG: CgResult = CgResult {
        total_weight: 1000.0,
        cg_from_front: 840.0,
        cg_from_reference: 1140.0,
    };

    fn view(state: RoutineState) -> CalibrationView {
        CalibrationView {
            target: CalibrationTarget::LoadCell(ChannelId::Front),
            state,
            reference: 500.0,
            computed_factor: None,
            failure: None,
            persisted: false,
        }
    }

    #[test]
    fn serial_line_reports_in_mm() {
        let line = serial_line(&report(Some(Ok(CG)), Some(7400.0), false));
        assert_eq!(line.as_str(), "Wt:1000.0g CG:114.0mm Bat:7400mV");
    }

    #[test]
    fn serial_line_marks_low_battery() {
        let line = serial_line(&report(Some(Ok(CG)), Some(5900.0), true));
        assert_eq!(line.as_str(), "Wt:1000.0g CG:114.0mm Bat:5900mV LOW");
    }

    #[test]
    fn serial_line_without_load() {
        let line = serial_line(&report(Some(Err(CgError::DegenerateReading)), Some(7400.0), false));
        assert_eq!(line.as_str(), "Wt:--- CG:--- Bat:7400mV");
        let line = serial_line(&report(None, None, false));
        assert_eq!(line.as_str(), "Wt:--- CG:--- Bat:---");
    }

    #[test]
    fn display_fits_sixteen_columns() {
        let text = display_text(&report(Some(Ok(CG)), Some(7400.0), false));
        assert_eq!(text.top.as_str(), "  1000g  114.0mm");
        assert_eq!(text.bottom.as_str(), "Bat 7.40V");

        let heavy = CgResult {
            total_weight: 12_345_678.0,
            cg_from_front: 0.0,
            cg_from_reference: 123_456.0,
        };
        let text = display_text(&report(Some(Ok(heavy)), Some(5950.0), true));
        assert_eq!(text.top.len(), DISPLAY_COLUMNS);
        assert_eq!(text.bottom.as_str(), "Bat 5.95V LOW");
    }

    #[test]
    fn display_shows_no_load_and_faults() {
        let text = display_text(&report(Some(Err(CgError::DegenerateReading)), None, false));
        assert_eq!(text.top.as_str(), "no load");
        assert_eq!(text.bottom.as_str(), "Bat ---");

        let mut faulty = report(Some(Ok(CG)), None, false);
        faulty.status.rear_fault = true;
        assert_eq!(display_text(&faulty).top.as_str(), "Rear cell fault");
    }

    #[test]
    fn display_follows_calibration() {
        let mut calibrating = report(None, Some(7400.0), false);
        calibrating.calibration = Some(view(RoutineState::AwaitingZero));
        let text = display_text(&calibrating);
        assert_eq!(text.top.as_str(), "Cal front");
        assert_eq!(text.bottom.as_str(), "Load 500g OK");

        let mut failed = view(RoutineState::Failed);
        failed.failure = Some(FailureReason::TimedOut);
        calibrating.calibration = Some(failed);
        assert_eq!(display_text(&calibrating).bottom.as_str(), "Failed: timeout");
    }

    #[test]
    fn prompts_for_each_step() {
        assert_eq!(
            calibration_prompt(&view(RoutineState::Idle)).as_str(),
            "CAL front: remove all load, then send ok"
        );
        assert_eq!(
            calibration_prompt(&view(RoutineState::AwaitingZero)).as_str(),
            "CAL front: place 500.0g reference, then send ok"
        );

        let mut done = view(RoutineState::Done);
        done.computed_factor = Some(1000.0);
        done.persisted = true;
        assert_eq!(calibration_prompt(&done).as_str(), "CAL front: factor 1000.000 saved");

        let battery = CalibrationView {
            target: CalibrationTarget::BatteryVoltage,
            reference: 7400.0,
            ..view(RoutineState::Idle)
        };
        assert_eq!(
            calibration_prompt(&battery).as_str(),
            "CAL battery: battery measured at 7400mV, send ok to apply"
        );
    }

    #[test]
    fn factors_summary() {
        let record = CalibrationRecord {
            factors: CalibrationFactors {
                front: 954.0,
                rear: 799.0,
                battery: 15.26,
            },
            source: RecordSource::Defaults,
        };
        assert_eq!(
            factors_line(&record).as_str(),
            "Factors front:954.000 rear:799.000 battery:15.2600 (defaults)"
        );
    }

    #[test]
    fn error_lines() {
        assert_eq!(
            error_line(&ScaleError::SensorFault(ChannelId::Rear)).as_str(),
            "ERR rear load cell fault"
        );
        assert_eq!(
            error_line(&ScaleError::Calibration(FailureReason::TimedOut)).as_str(),
            "ERR calibration timeout"
        );
        assert_eq!(command_error_line(CommandError::InvalidNumber), "ERR invalid number");
    }
}
