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

use crate::battery::{BatteryMonitor, BatterySense};
use crate::calibration::routine::{
    is_valid_reference, CalibrationError, CalibrationRoutine, FailureReason, RoutineState,
};
use crate::calibration::CalibrationTarget;
use crate::cg::{self, CgError, CgResult};
use crate::config::ScaleConfig;
use crate::storage::calibration_store::CalibrationStore;
use crate::storage::record::{CalibrationRecord, RecordSource};
use crate::storage::BlockStorage;
use crate::weight::interface::AsyncStrainGaugeInterface;
use crate::weight::load_cell::LoadCellChannel;
use crate::weight::ChannelId;
use embassy_time::Instant;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScaleStatus {
    pub front_fault: bool,
    pub rear_fault: bool,
    pub battery_fault: bool,
    /// Calibration changed but could not be written to storage.
    pub calibration_unpersisted: bool,
    /// The running calibration computed a suspicious factor.
    pub calibration_warning: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationView {
    pub target: CalibrationTarget,
    pub state: RoutineState,
    pub reference: f32,
    pub computed_factor: Option<f32>,
    pub failure: Option<FailureReason>,
    pub persisted: bool,
}

/// Everything the display and serial collaborators show for one refresh.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScaleReport {
    /// `None` until both channels have produced a reading.
    pub cg: Option<Result<CgResult, CgError>>,
    pub battery_mv: Option<f32>,
    pub low_battery: bool,
    pub status: ScaleStatus,
    pub calibration: Option<CalibrationView>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScaleError {
    SensorFault(ChannelId),
    CalibrationBusy,
    NoCalibrationActive,
    InvalidReference,
    Calibration(FailureReason),
}

/// Operator actions relevant to a running calibration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OperatorInput {
    Confirm,
    Cancel,
}

/// The measurement side of the control loop. Owns both channels, the battery monitor and the
/// calibration store, and hands the loop's attention to a calibration routine while one runs.
pub struct CgScale<FrontSG, RearSG, Sense, Storage> {
    front: LoadCellChannel<FrontSG>,
    rear: LoadCellChannel<RearSG>,
    battery: BatteryMonitor<Sense>,
    store: CalibrationStore<Storage>,
    config: ScaleConfig,
    status: ScaleStatus,
    last_cg: Option<Result<CgResult, CgError>>,
    calibration: Option<CalibrationRoutine>,
}

impl<FrontSG, RearSG, Sense, Storage> CgScale<FrontSG, RearSG, Sense, Storage>
where
    FrontSG: AsyncStrainGaugeInterface,
    RearSG: AsyncStrainGaugeInterface,
    Sense: BatterySense,
    Storage: BlockStorage,
{
    /// Loads the stored calibration and hands the factors to the channels and battery monitor.
    pub async fn new(
        front: LoadCellChannel<FrontSG>,
        rear: LoadCellChannel<RearSG>,
        battery: BatteryMonitor<Sense>,
        store: CalibrationStore<Storage>,
        config: ScaleConfig,
    ) -> Self {
        let mut scale = Self {
            front,
            rear,
            battery,
            store,
            config,
            status: ScaleStatus::default(),
            last_cg: None,
            calibration: None,
        };

        let record = scale.store.load().await;
        scale.apply_record(&record);
        scale
    }

    fn apply_record(&mut self, record: &CalibrationRecord) {
        // load() only hands out valid factors, a failure here would leave the previous
        // (default) factor in place
        let _ = self.front.set_calibration_factor(record.factors.front);
        let _ = self.rear.set_calibration_factor(record.factors.rear);
        let _ = self.battery.set_calibration_factor(record.factors.battery);
        self.status.calibration_unpersisted = record.source == RecordSource::InMemory;
    }

    /// One round-robin pass: each channel with a conversion waiting is sampled. Recomputes the
    /// CG once both channels have fresh data. Returns whether a new CG was computed.
    pub async fn sample(&mut self) -> bool {
        Self::service_channel(&mut self.front, &mut self.status.front_fault).await;
        Self::service_channel(&mut self.rear, &mut self.status.rear_fault).await;
        self.after_sampling()
    }

    /// Waits for a sample from both channels regardless of readiness.
    pub async fn measure(&mut self) -> bool {
        Self::update_channel(&mut self.front, &mut self.status.front_fault).await;
        Self::update_channel(&mut self.rear, &mut self.status.rear_fault).await;
        self.after_sampling()
    }

    fn after_sampling(&mut self) -> bool {
        if self.status.front_fault || self.status.rear_fault {
            self.last_cg = None;
            return false;
        }
        if self.is_calibrating() || !(self.front.is_fresh() && self.rear.is_fresh()) {
            return false;
        }
        self.front.take_fresh();
        self.rear.take_fresh();

        let (Some(front_weight), Some(rear_weight)) =
            (self.front.current_weight(), self.rear.current_weight())
        else {
            return false;
        };
        self.last_cg = Some(cg::compute(
            front_weight,
            rear_weight,
            &self.config.geometry,
            self.config.reference_direction,
            self.config.no_load_threshold_grams,
        ));
        true
    }

    async fn service_channel<SG: AsyncStrainGaugeInterface>(
        channel: &mut LoadCellChannel<SG>,
        fault: &mut bool,
    ) {
        match channel.is_conversion_ready() {
            Ok(true) => Self::update_channel(channel, fault).await,
            Ok(false) => {}
            Err(_) => {
                if !*fault {
                    log_warn!("Load cell {} not responding", channel.id().label());
                }
                *fault = true;
            }
        }
    }

    async fn update_channel<SG: AsyncStrainGaugeInterface>(
        channel: &mut LoadCellChannel<SG>,
        fault: &mut bool,
    ) {
        match channel.update().await {
            Ok(_) => {
                if *fault {
                    log_info!("Load cell {} recovered", channel.id().label());
                }
                *fault = false;
            }
            Err(_) => {
                if !*fault {
                    log_warn!("Load cell {} reading failed", channel.id().label());
                }
                *fault = true;
            }
        }
    }

    /// Zero both load cells under the current load.
    pub async fn zero_now(&mut self) -> Result<(), ScaleError> {
        if self.is_calibrating() {
            return Err(ScaleError::CalibrationBusy);
        }
        let front = self.front.tare().await;
        self.status.front_fault = front.is_err();
        let rear = self.rear.tare().await;
        self.status.rear_fault = rear.is_err();
        self.last_cg = None;

        if front.is_err() {
            return Err(ScaleError::SensorFault(ChannelId::Front));
        }
        if rear.is_err() {
            return Err(ScaleError::SensorFault(ChannelId::Rear));
        }
        log_info!("Scale zeroed");
        Ok(())
    }

    /// Reads the battery. A failed read is flagged and the loop carries on.
    pub async fn service_battery(&mut self) -> Option<f32> {
        match self.battery.read().await {
            Ok(millivolts) => {
                self.status.battery_fault = false;
                Some(millivolts)
            }
            Err(_) => {
                if !self.status.battery_fault {
                    log_warn!("Battery voltage read failed");
                }
                self.status.battery_fault = true;
                None
            }
        }
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibration.is_some()
    }

    pub fn start_calibration(
        &mut self,
        target: CalibrationTarget,
        reference: f32,
        now: Instant,
    ) -> Result<(), ScaleError> {
        if self.calibration.as_ref().is_some_and(|c| c.is_active()) {
            return Err(ScaleError::CalibrationBusy);
        }
        if !is_valid_reference(reference) {
            return Err(ScaleError::InvalidReference);
        }
        log_info!(
            "Starting {} calibration with reference {}",
            target.label(),
            reference
        );
        self.calibration = Some(CalibrationRoutine::new(target, reference, &self.config, now));
        self.status.calibration_warning = false;
        Ok(())
    }

    /// Routes an operator action to the running calibration.
    ///
    /// Confirming a finished routine leaves calibration (after `Done`) or restarts it (after
    /// `Failed`). Cancelling a finished routine leaves calibration.
    pub async fn operator_input(
        &mut self,
        input: OperatorInput,
        now: Instant,
    ) -> Result<RoutineState, ScaleError> {
        let routine = self
            .calibration
            .as_mut()
            .ok_or(ScaleError::NoCalibrationActive)?;

        let result = match (input, routine.state()) {
            (OperatorInput::Cancel, RoutineState::Done | RoutineState::Failed)
            | (OperatorInput::Confirm, RoutineState::Done) => {
                self.end_calibration();
                return Ok(RoutineState::Idle);
            }
            (OperatorInput::Confirm, RoutineState::Failed) => {
                routine.restart(now);
                Ok(routine.state())
            }
            (OperatorInput::Cancel, _) => Ok(routine.cancel()),
            (OperatorInput::Confirm, _) => match routine.target() {
                CalibrationTarget::LoadCell(ChannelId::Front) => routine
                    .confirm(&mut self.front, &mut self.store, now)
                    .await
                    .map_err(|e| failure_of(routine, e)),
                CalibrationTarget::LoadCell(ChannelId::Rear) => routine
                    .confirm(&mut self.rear, &mut self.store, now)
                    .await
                    .map_err(|e| failure_of(routine, e)),
                CalibrationTarget::BatteryVoltage => routine
                    .confirm(&mut self.battery, &mut self.store, now)
                    .await
                    .map_err(|e| failure_of(routine, e)),
            },
        };

        self.status.calibration_warning = routine.warning().is_some();
        if routine.state() == RoutineState::Done {
            self.status.calibration_unpersisted = !routine.persisted();
        }
        result
    }

    /// Takes a reference measurement the operator has queued. Runs from the loop rather than
    /// from the confirmation itself, so the measuring state is shown before the loop blocks on
    /// it. Returns `None` when nothing is waiting.
    pub async fn service_calibration(
        &mut self,
        now: Instant,
    ) -> Option<Result<RoutineState, ScaleError>> {
        if !self
            .calibration
            .as_ref()
            .is_some_and(|routine| routine.is_measurement_pending())
        {
            return None;
        }
        Some(self.operator_input(OperatorInput::Confirm, now).await)
    }

    pub fn check_calibration_timeout(&mut self, now: Instant) -> bool {
        self.calibration
            .as_mut()
            .is_some_and(|routine| routine.check_timeout(now))
    }

    /// Leave calibration and go back to measuring.
    pub fn end_calibration(&mut self) {
        if let Some(routine) = self.calibration.take() {
            log_debug!("Leaving {} calibration", routine.target().label());
        }
        self.status.calibration_warning = false;
        self.last_cg = None;
    }

    pub fn calibration_record(&self) -> CalibrationRecord {
        self.store.record()
    }

    pub fn status(&self) -> ScaleStatus {
        self.status
    }

    pub fn report(&self) -> ScaleReport {
        let battery_mv = self.battery.last_reading();
        ScaleReport {
            cg: self.last_cg,
            battery_mv,
            low_battery: battery_mv.is_some_and(|mv| self.battery.classify(mv)),
            status: self.status,
            calibration: self.calibration.as_ref().map(|routine| CalibrationView {
                target: routine.target(),
                state: routine.state(),
                reference: routine.reference(),
                computed_factor: routine.computed_factor(),
                failure: routine.failure(),
                persisted: routine.persisted(),
            }),
        }
    }
}

fn failure_of<E>(routine: &CalibrationRoutine, error: CalibrationError<E>) -> ScaleError {
    match (routine.failure(), error) {
        (Some(reason), _) => ScaleError::Calibration(reason),
        (None, CalibrationError::InvalidReference) => ScaleError::InvalidReference,
        (None, _) => ScaleError::NoCalibrationActive,
    }
}
