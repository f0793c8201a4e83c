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

//! Operator guided calibration of a single factor.
//!
//! ```text
//! Idle -> AwaitingZero -> AwaitingReferenceLoad -> ComputingFactor -> Done
//!   \__________\__________________\___________________\______-> Failed
//! ```
//!
//! `AwaitingZero` is skipped for subjects that have no baseline (the battery divider).
//! A factor outside the plausibility band parks the routine in `ComputingFactor` until the
//! operator accepts or cancels it.

use crate::calibration::{is_valid_factor, CalibrationSubject, CalibrationTarget};
use crate::config::ScaleConfig;
use crate::storage::calibration_store::CalibrationStore;
use crate::storage::BlockStorage;
use embassy_time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RoutineState {
    Idle,
    AwaitingZero,
    AwaitingReferenceLoad,
    ComputingFactor,
    Done,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FailureReason {
    Cancelled,
    TimedOut,
    OutOfRange,
    MeasurementFailed,
    RejectedBySubject,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CalibrationError<SubjectE> {
    /// The computed factor is unusable or, as a warning, implausibly far from the previous one.
    CalibrationOutOfRange { previous: f32, computed: f32 },
    InvalidReference,
    Subject(SubjectE),
    /// The routine already finished; restart it first.
    NotRunning,
}

/// A factor that was computed but differs suspiciously from the one it replaces.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RangeWarning {
    pub previous: f32,
    pub computed: f32,
}

pub struct CalibrationRoutine {
    target: CalibrationTarget,
    reference: f32,
    state: RoutineState,
    computed_factor: Option<f32>,
    warning: Option<RangeWarning>,
    failure: Option<FailureReason>,
    persisted: bool,
    last_activity: Instant,
    timeout: Duration,
    plausibility_ratio: f32,
}

pub fn is_valid_reference(reference: f32) -> bool {
    reference.is_finite() && reference > 0.0
}

/// True if `computed` is within `ratio` times `previous` either way and has the same sign.
pub fn is_plausible(previous: f32, computed: f32, ratio: f32) -> bool {
    if !is_valid_factor(previous) {
        return true;
    }
    let change = computed / previous;
    change > 0.0 && change <= ratio && change >= 1.0 / ratio
}

impl CalibrationRoutine {
    pub fn new(
        target: CalibrationTarget,
        reference: f32,
        config: &ScaleConfig,
        now: Instant,
    ) -> Self {
        Self {
            target,
            reference,
            state: RoutineState::Idle,
            computed_factor: None,
            warning: None,
            failure: None,
            persisted: false,
            last_activity: now,
            timeout: config.calibration_timeout,
            plausibility_ratio: config.plausibility_ratio,
        }
    }

    pub fn target(&self) -> CalibrationTarget {
        self.target
    }

    pub fn state(&self) -> RoutineState {
        self.state
    }

    pub fn reference(&self) -> f32 {
        self.reference
    }

    pub fn computed_factor(&self) -> Option<f32> {
        self.computed_factor
    }

    pub fn warning(&self) -> Option<RangeWarning> {
        self.warning
    }

    pub fn failure(&self) -> Option<FailureReason> {
        self.failure
    }

    /// Whether the final factor reached persistent storage.
    pub fn persisted(&self) -> bool {
        self.persisted
    }

    /// The reference is in place and its measurement has not been taken yet.
    pub fn is_measurement_pending(&self) -> bool {
        self.state == RoutineState::AwaitingReferenceLoad
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.state, RoutineState::Done | RoutineState::Failed)
    }

    /// Change the reference mass or voltage before it is measured.
    pub fn set_reference<E>(&mut self, reference: f32) -> Result<(), CalibrationError<E>> {
        if !is_valid_reference(reference) {
            return Err(CalibrationError::InvalidReference);
        }
        if !matches!(self.state, RoutineState::Idle | RoutineState::AwaitingZero) {
            return Err(CalibrationError::NotRunning);
        }
        self.reference = reference;
        Ok(())
    }

    /// Operator confirmation. Advances the routine by one step, running whatever measurement
    /// that step needs. Confirming the reference only queues its measurement, the next call
    /// in `AwaitingReferenceLoad` takes it.
    pub async fn confirm<S, B>(
        &mut self,
        subject: &mut S,
        store: &mut CalibrationStore<B>,
        now: Instant,
    ) -> Result<RoutineState, CalibrationError<S::Error>>
    where
        S: CalibrationSubject,
        B: BlockStorage,
    {
        self.last_activity = now;
        match self.state {
            RoutineState::Idle if S::REQUIRES_ZERO => {
                if let Err(e) = subject.zero().await {
                    self.fail(FailureReason::MeasurementFailed);
                    return Err(CalibrationError::Subject(e));
                }
                log_info!("Calibrating {}: baseline captured", self.target.label());
                self.state = RoutineState::AwaitingZero;
                Ok(self.state)
            }
            RoutineState::Idle | RoutineState::AwaitingZero => {
                log_debug!("Calibrating {}: reference in place", self.target.label());
                self.state = RoutineState::AwaitingReferenceLoad;
                Ok(self.state)
            }
            RoutineState::AwaitingReferenceLoad => self.measure_reference(subject, store).await,
            RoutineState::ComputingFactor => {
                if let Some(warning) = self.warning {
                    log_warn!(
                        "Calibrating {}: operator accepted factor {} (was {})",
                        self.target.label(),
                        warning.computed,
                        warning.previous
                    );
                }
                self.apply(subject, store).await
            }
            RoutineState::Done | RoutineState::Failed => Err(CalibrationError::NotRunning),
        }
    }

    async fn measure_reference<S, B>(
        &mut self,
        subject: &mut S,
        store: &mut CalibrationStore<B>,
    ) -> Result<RoutineState, CalibrationError<S::Error>>
    where
        S: CalibrationSubject,
        B: BlockStorage,
    {
        let previous = subject.calibration_factor();
        let measured = match subject.measure().await {
            Ok(measured) => measured,
            Err(e) => {
                self.fail(FailureReason::MeasurementFailed);
                return Err(CalibrationError::Subject(e));
            }
        };

        let computed = S::derive_factor(measured, self.reference);
        log_debug!(
            "Calibrating {}: measured {} for reference {}, factor {}",
            self.target.label(),
            measured,
            self.reference,
            computed
        );
        if !is_valid_factor(computed) {
            self.fail(FailureReason::OutOfRange);
            return Err(CalibrationError::CalibrationOutOfRange { previous, computed });
        }

        self.state = RoutineState::ComputingFactor;
        self.computed_factor = Some(computed);
        if !is_plausible(previous, computed, self.plausibility_ratio) {
            log_warn!(
                "Calibrating {}: factor {} is implausible against {}, waiting for operator",
                self.target.label(),
                computed,
                previous
            );
            self.warning = Some(RangeWarning { previous, computed });
            return Ok(self.state);
        }

        self.apply(subject, store).await
    }

    async fn apply<S, B>(
        &mut self,
        subject: &mut S,
        store: &mut CalibrationStore<B>,
    ) -> Result<RoutineState, CalibrationError<S::Error>>
    where
        S: CalibrationSubject,
        B: BlockStorage,
    {
        let Some(factor) = self.computed_factor else {
            self.fail(FailureReason::OutOfRange);
            return Err(CalibrationError::NotRunning);
        };

        if let Err(e) = subject.apply_calibration_factor(factor) {
            self.fail(FailureReason::RejectedBySubject);
            return Err(CalibrationError::Subject(e));
        }

        self.persisted = store.commit_factor(self.target, factor).await.is_ok();
        if !self.persisted {
            log_warn!(
                "Calibrating {}: factor {} applied but not stored",
                self.target.label(),
                factor
            );
        }

        log_info!("Calibrating {}: new factor {}", self.target.label(), factor);
        self.state = RoutineState::Done;
        Ok(self.state)
    }

    /// Operator abort. Has no effect once the routine has finished.
    pub fn cancel(&mut self) -> RoutineState {
        if self.is_active() {
            log_info!("Calibrating {}: cancelled", self.target.label());
            self.fail(FailureReason::Cancelled);
        }
        self.state
    }

    /// Fails the routine if the operator has been idle for longer than the timeout.
    pub fn check_timeout(&mut self, now: Instant) -> bool {
        if !self.is_active() {
            return false;
        }
        let idle = now
            .checked_duration_since(self.last_activity)
            .unwrap_or(Duration::from_ticks(0));
        if idle >= self.timeout {
            log_warn!("Calibrating {}: timed out", self.target.label());
            self.fail(FailureReason::TimedOut);
            return true;
        }
        false
    }

    /// Back to `Idle` from a finished routine, keeping target and reference.
    pub fn restart(&mut self, now: Instant) {
        if self.is_active() {
            return;
        }
        self.state = RoutineState::Idle;
        self.computed_factor = None;
        self.warning = None;
        self.failure = None;
        self.persisted = false;
        self.last_activity = now;
    }

    fn fail(&mut self, reason: FailureReason) {
        self.failure = Some(reason);
        self.state = RoutineState::Failed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battery::BatteryMonitor;
    use crate::storage::record::RecordSource;
    use crate::test_utils::{MockBatterySense, MockBlockStorage, MockStrainGauge};
    use crate::weight::load_cell::LoadCellChannel;
    use crate::weight::ChannelId;
    use embassy_futures::block_on;

    const FRONT: CalibrationTarget = CalibrationTarget::LoadCell(ChannelId::Front);

    fn store(storage: MockBlockStorage) -> CalibrationStore<MockBlockStorage> {
        let mut store = CalibrationStore::new(storage, ScaleConfig::DEFAULT.default_calibration);
        block_on(store.load());
        store
    }

    fn front_channel(gauge: MockStrainGauge) -> LoadCellChannel<MockStrainGauge, 4> {
        block_on(LoadCellChannel::new(ChannelId::Front, gauge, &ScaleConfig::DEFAULT)).unwrap()
    }

    /// Unloaded at 10 000 counts, then 500 g at 1000 counts per gram.
    fn loaded_gauge() -> MockStrainGauge {
        let mut gauge = MockStrainGauge::from_readings(&[10_000; 4]);
        gauge.push_readings(&[510_000; 8]);
        gauge
    }

    #[test]
    fn load_cell_calibration_runs_to_done() {
        let mut channel = front_channel(loaded_gauge());
        let mut store = store(MockBlockStorage::erased());
        let mut routine =
            CalibrationRoutine::new(FRONT, 500.0, &ScaleConfig::DEFAULT, Instant::from_secs(0));

        assert_eq!(routine.state(), RoutineState::Idle);
        let state = block_on(routine.confirm(&mut channel, &mut store, Instant::from_secs(1)));
        assert_eq!(state, Ok(RoutineState::AwaitingZero));
        assert_eq!(channel.zero_offset(), 10_000);

        let state = block_on(routine.confirm(&mut channel, &mut store, Instant::from_secs(2)));
        assert_eq!(state, Ok(RoutineState::AwaitingReferenceLoad));
        assert!(routine.is_measurement_pending());
        assert_eq!(routine.computed_factor(), None);

        let state = block_on(routine.confirm(&mut channel, &mut store, Instant::from_secs(3)));
        assert_eq!(state, Ok(RoutineState::Done));
        assert_eq!(routine.computed_factor(), Some(1000.0));
        assert!(routine.persisted());
        assert_eq!(channel.calibration_factor(), 1000.0);
        assert_eq!(store.record().factors.front, 1000.0);
        assert_eq!(store.record().source, RecordSource::Stored);
        assert_eq!(channel.current_weight(), Some(500.0));
    }

    #[test]
    fn implausible_factor_waits_for_operator() {
        // 20 000 counts per gram against a previous 954
        let mut gauge = MockStrainGauge::from_readings(&[0; 4]);
        gauge.push_readings(&[2_000_000; 8]);
        let mut channel = front_channel(gauge);
        let mut store = store(MockBlockStorage::erased());
        let mut routine =
            CalibrationRoutine::new(FRONT, 100.0, &ScaleConfig::DEFAULT, Instant::from_secs(0));

        block_on(routine.confirm(&mut channel, &mut store, Instant::from_secs(1))).unwrap();
        block_on(routine.confirm(&mut channel, &mut store, Instant::from_secs(2))).unwrap();
        let state = block_on(routine.confirm(&mut channel, &mut store, Instant::from_secs(3)));

        assert_eq!(state, Ok(RoutineState::ComputingFactor));
        assert_eq!(
            routine.warning(),
            Some(RangeWarning {
                previous: 954.0,
                computed: 20_000.0
            })
        );
        assert_eq!(channel.calibration_factor(), 954.0);
        assert_eq!(store.record().source, RecordSource::Defaults);

        let state = block_on(routine.confirm(&mut channel, &mut store, Instant::from_secs(4)));
        assert_eq!(state, Ok(RoutineState::Done));
        assert_eq!(channel.calibration_factor(), 20_000.0);
    }

    #[test]
    fn implausible_factor_can_be_cancelled() {
        let mut gauge = MockStrainGauge::from_readings(&[0; 4]);
        gauge.push_readings(&[2_000_000; 8]);
        let mut channel = front_channel(gauge);
        let mut store = store(MockBlockStorage::erased());
        let mut routine =
            CalibrationRoutine::new(FRONT, 100.0, &ScaleConfig::DEFAULT, Instant::from_secs(0));

        for second in 1..=3 {
            let now = Instant::from_secs(second);
            block_on(routine.confirm(&mut channel, &mut store, now)).unwrap();
        }
        assert_eq!(routine.state(), RoutineState::ComputingFactor);
        assert_eq!(routine.cancel(), RoutineState::Failed);
        assert_eq!(routine.failure(), Some(FailureReason::Cancelled));
        assert_eq!(channel.calibration_factor(), 954.0);
    }

    #[test]
    fn zero_factor_fails() {
        // reference load reads the same as the baseline
        let mut channel = front_channel(MockStrainGauge::constant(10_000));
        let mut store = store(MockBlockStorage::erased());
        let mut routine =
            CalibrationRoutine::new(FRONT, 500.0, &ScaleConfig::DEFAULT, Instant::from_secs(0));

        block_on(routine.confirm(&mut channel, &mut store, Instant::from_secs(1))).unwrap();
        block_on(routine.confirm(&mut channel, &mut store, Instant::from_secs(2))).unwrap();
        let result = block_on(routine.confirm(&mut channel, &mut store, Instant::from_secs(3)));

        assert_eq!(
            result,
            Err(CalibrationError::CalibrationOutOfRange {
                previous: 954.0,
                computed: 0.0
            })
        );
        assert_eq!(routine.state(), RoutineState::Failed);
        assert_eq!(routine.failure(), Some(FailureReason::OutOfRange));
    }

    #[test]
    fn failed_routine_needs_restart() {
        let mut channel = front_channel(loaded_gauge());
        let mut store = store(MockBlockStorage::erased());
        let mut routine =
            CalibrationRoutine::new(FRONT, 500.0, &ScaleConfig::DEFAULT, Instant::from_secs(0));

        routine.cancel();
        let result = block_on(routine.confirm(&mut channel, &mut store, Instant::from_secs(1)));
        assert_eq!(result, Err(CalibrationError::NotRunning));

        routine.restart(Instant::from_secs(2));
        assert_eq!(routine.state(), RoutineState::Idle);
        assert_eq!(routine.failure(), None);
        let state = block_on(routine.confirm(&mut channel, &mut store, Instant::from_secs(3)));
        assert_eq!(state, Ok(RoutineState::AwaitingZero));
    }

    #[test]
    fn idle_operator_times_out() {
        let mut routine =
            CalibrationRoutine::new(FRONT, 500.0, &ScaleConfig::DEFAULT, Instant::from_secs(10));
        assert!(!routine.check_timeout(Instant::from_secs(100)));
        assert!(routine.check_timeout(Instant::from_secs(130)));
        assert_eq!(routine.state(), RoutineState::Failed);
        assert_eq!(routine.failure(), Some(FailureReason::TimedOut));
    }

    #[test]
    fn sensor_failure_fails_routine() {
        let mut gauge = MockStrainGauge::constant(0);
        gauge.fail(true);
        let mut channel = front_channel(gauge);
        let mut store = store(MockBlockStorage::erased());
        let mut routine =
            CalibrationRoutine::new(FRONT, 500.0, &ScaleConfig::DEFAULT, Instant::from_secs(0));

        let result = block_on(routine.confirm(&mut channel, &mut store, Instant::from_secs(1)));
        assert!(matches!(result, Err(CalibrationError::Subject(_))));
        assert_eq!(routine.failure(), Some(FailureReason::MeasurementFailed));
    }

    #[test]
    fn storage_failure_still_completes() {
        let mut storage = MockBlockStorage::erased();
        storage.fail_writes = true;
        let mut channel = front_channel(loaded_gauge());
        let mut store = store(storage);
        let mut routine =
            CalibrationRoutine::new(FRONT, 500.0, &ScaleConfig::DEFAULT, Instant::from_secs(0));

        block_on(routine.confirm(&mut channel, &mut store, Instant::from_secs(1))).unwrap();
        block_on(routine.confirm(&mut channel, &mut store, Instant::from_secs(2))).unwrap();
        let state = block_on(routine.confirm(&mut channel, &mut store, Instant::from_secs(3)));
        assert_eq!(state, Ok(RoutineState::Done));
        assert!(!routine.persisted());
        assert_eq!(channel.calibration_factor(), 1000.0);
        assert_eq!(store.record().source, RecordSource::InMemory);
    }

    #[test]
    fn battery_calibration_skips_zero_step() {
        // 400 counts at 7400 mV
        let mut monitor =
            BatteryMonitor::new(MockBatterySense::constant(400), &ScaleConfig::DEFAULT).unwrap();
        let mut store = store(MockBlockStorage::erased());
        let mut routine = CalibrationRoutine::new(
            CalibrationTarget::BatteryVoltage,
            7400.0,
            &ScaleConfig::DEFAULT,
            Instant::from_secs(0),
        );

        let state = block_on(routine.confirm(&mut monitor, &mut store, Instant::from_secs(1)));
        assert_eq!(state, Ok(RoutineState::AwaitingReferenceLoad));
        let state = block_on(routine.confirm(&mut monitor, &mut store, Instant::from_secs(2)));
        assert_eq!(state, Ok(RoutineState::Done));
        assert_eq!(routine.computed_factor(), Some(18.5));
        assert_eq!(monitor.calibration_factor(), 18.5);
        assert_eq!(store.record().factors.battery, 18.5);
    }

    #[test]
    fn reference_must_be_positive() {
        let mut routine =
            CalibrationRoutine::new(FRONT, 500.0, &ScaleConfig::DEFAULT, Instant::from_secs(0));
        assert_eq!(
            routine.set_reference::<()>(-5.0),
            Err(CalibrationError::InvalidReference)
        );
        assert_eq!(routine.set_reference::<()>(250.0), Ok(()));
        assert_eq!(routine.reference(), 250.0);
    }

    #[test]
    fn plausibility_band() {
        assert!(is_plausible(100.0, 1000.0, 10.0));
        assert!(!is_plausible(100.0, 1000.5, 10.0));
        assert!(is_plausible(100.0, 10.0, 10.0));
        assert!(!is_plausible(100.0, 9.9, 10.0));
        assert!(!is_plausible(100.0, -100.0, 10.0));
    }
}
