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

use crate::hmi::display::ScaleDisplay;
use crate::hmi::event_channels::{ScaleEvent, ScaleEventReceiver};
use crate::hmi::serial::SerialReporter;
use crate::led::led_control::{LedStatus, LedStatusSignal};
use cg_scale_core::battery::BatterySense;
use cg_scale_core::calibration::routine::RoutineState;
use cg_scale_core::command::Command;
use cg_scale_core::config::ScaleConfig;
use cg_scale_core::report;
use cg_scale_core::scale::{CgScale, OperatorInput, ScaleReport};
use cg_scale_core::storage::BlockStorage;
use cg_scale_core::weight::interface::AsyncStrainGaugeInterface;
use defmt::{debug, info, warn};
use embassy_futures::select::{Either, Either4, select, select4};
use embassy_time::{Duration, Instant, Ticker};
use embedded_io_async::Write;

/// Poll period for the HX711 data ready lines.
const SAMPLE_POLL_PERIOD: Duration = Duration::from_millis(10);

fn led_status_for(report: &ScaleReport) -> LedStatus {
    let status = report.status;
    if status.front_fault || status.rear_fault || status.battery_fault {
        LedStatus::Fault
    } else if report.calibration.is_some() {
        LedStatus::Calibrating
    } else if report.low_battery {
        LedStatus::LowBattery
    } else {
        LedStatus::Normal
    }
}

/// Runs the measurement loop and feeds the display, serial companion and status LED.
pub struct ApplicationManager<'a, FrontSG, RearSG, Sense, Storage, DI, W>
where
    DI: sh1106::interface::DisplayInterface,
{
    scale: CgScale<FrontSG, RearSG, Sense, Storage>,
    display: ScaleDisplay<DI>,
    reporter: SerialReporter<W>,
    events: ScaleEventReceiver<'a>,
    led_status: &'a LedStatusSignal,
    config: ScaleConfig,
}

impl<'a, FrontSG, RearSG, Sense, Storage, DI, W>
    ApplicationManager<'a, FrontSG, RearSG, Sense, Storage, DI, W>
where
    FrontSG: AsyncStrainGaugeInterface,
    RearSG: AsyncStrainGaugeInterface,
    Sense: BatterySense,
    Storage: BlockStorage,
    DI: sh1106::interface::DisplayInterface,
    W: Write,
{
    pub fn new(
        scale: CgScale<FrontSG, RearSG, Sense, Storage>,
        display: ScaleDisplay<DI>,
        reporter: SerialReporter<W>,
        events: ScaleEventReceiver<'a>,
        led_status: &'a LedStatusSignal,
        config: ScaleConfig,
    ) -> Self {
        Self {
            scale,
            display,
            reporter,
            events,
            led_status,
            config,
        }
    }

    pub async fn run(&mut self, banner: &str) -> ! {
        self.display.show_message("Starting up...");
        self.reporter.write_line(banner).await;

        self.scale.measure().await;
        self.scale.service_battery().await;
        self.write_factors().await;
        self.refresh_display().await;

        let mut sample_ticker = Ticker::every(SAMPLE_POLL_PERIOD);
        let mut display_ticker = Ticker::every(self.config.display_refresh);
        let mut battery_ticker = Ticker::every(self.config.battery_refresh);
        let mut serial_ticker = Ticker::every(self.config.serial_refresh);

        info!("Measuring");
        loop {
            let wake = select4(
                self.events.receive(),
                sample_ticker.next(),
                display_ticker.next(),
                select(battery_ticker.next(), serial_ticker.next()),
            )
            .await;

            match wake {
                Either4::First(event) => self.handle_event(event).await,
                Either4::Second(_) => {
                    self.scale.sample().await;
                    self.service_calibration().await;
                }
                Either4::Third(_) => self.refresh_display().await,
                Either4::Fourth(Either::First(_)) => {
                    self.scale.service_battery().await;
                }
                Either4::Fourth(Either::Second(_)) => {
                    if !self.scale.is_calibrating() {
                        let line = report::serial_line(&self.scale.report());
                        self.reporter.write_line(&line).await;
                    }
                }
            }
        }
    }

    async fn refresh_display(&mut self) {
        if self.scale.check_calibration_timeout(Instant::now()) {
            warn!("Calibration timed out");
            self.write_calibration_prompt().await;
        }

        let report = self.scale.report();
        self.display.show(&report::display_text(&report));
        self.led_status.signal(led_status_for(&report));
    }

    async fn handle_event(&mut self, event: ScaleEvent) {
        let now = Instant::now();
        match event {
            ScaleEvent::ZeroButtonPressed => {
                if self.scale.is_calibrating() {
                    self.operator_input(OperatorInput::Confirm, now).await
                } else {
                    self.zero().await
                }
            }
            ScaleEvent::Command(command) => {
                debug!("Command {:?}", command);
                match command {
                    Command::Zero => self.zero().await,
                    Command::Calibrate { target, reference } => {
                        match self.scale.start_calibration(target, reference, now) {
                            Ok(()) => self.write_calibration_prompt().await,
                            Err(e) => self.reporter.write_line(&report::error_line(&e)).await,
                        }
                    }
                    Command::Confirm => self.operator_input(OperatorInput::Confirm, now).await,
                    Command::Cancel => self.operator_input(OperatorInput::Cancel, now).await,
                    Command::ShowFactors => self.write_factors().await,
                }
            }
            ScaleEvent::CommandRejected(error) => {
                self.reporter
                    .write_line(report::command_error_line(error))
                    .await
            }
        }
        self.refresh_display().await;
    }

    async fn zero(&mut self) {
        match self.scale.zero_now().await {
            Ok(()) => self.reporter.write_line("OK zeroed").await,
            Err(e) => {
                warn!("Zero failed: {:?}", e);
                self.reporter.write_line(&report::error_line(&e)).await
            }
        }
    }

    async fn operator_input(&mut self, input: OperatorInput, now: Instant) {
        match self.scale.operator_input(input, now).await {
            Ok(RoutineState::Idle) if !self.scale.is_calibrating() => {
                self.reporter.write_line("CAL closed").await;
                self.write_factors().await;
            }
            Ok(_) => self.write_calibration_prompt().await,
            Err(e) => {
                self.reporter.write_line(&report::error_line(&e)).await;
                self.write_calibration_prompt().await;
            }
        }
    }

    async fn service_calibration(&mut self) {
        let Some(result) = self.scale.service_calibration(Instant::now()).await else {
            return;
        };
        if let Err(e) = result {
            self.reporter.write_line(&report::error_line(&e)).await;
        }
        self.write_calibration_prompt().await;
        self.refresh_display().await;
    }

    async fn write_calibration_prompt(&mut self) {
        if let Some(view) = self.scale.report().calibration {
            let line = report::calibration_prompt(&view);
            self.reporter.write_line(&line).await;
        }
    }

    async fn write_factors(&mut self) {
        let line = report::factors_line(&self.scale.calibration_record());
        self.reporter.write_line(&line).await;
    }
}
