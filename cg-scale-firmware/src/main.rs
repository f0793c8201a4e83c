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

#![no_std]
#![no_main]
#![allow(async_fn_in_trait)]

mod application;
mod battery_sense;
mod hmi;
mod led;
mod storage;
mod weight;

use core::cell::RefCell;
use core::fmt::Write as _;

use crate::application::application_manager::ApplicationManager;
use crate::battery_sense::AdcBatterySense;
use crate::hmi::display::ScaleDisplay;
use crate::hmi::event_channels::{ScaleEventChannel, ScaleEventSender};
use crate::hmi::serial::{SerialReporter, serial_command_handler};
use crate::led::led_control::{LedController, LedStatus, LedStatusSignal};
use crate::storage::calibration_block::FlashCalibrationBlock;
use crate::storage::storage_manager::{BlockingFlash, initialise_storage};
use crate::weight::hx711async::{Hx711Async, Hx711Gain};
use assign_resources::assign_resources;
use cg_scale_core::battery::BatteryMonitor;
use cg_scale_core::config::ScaleConfig;
use cg_scale_core::scale::CgScale;
use cg_scale_core::storage::calibration_store::CalibrationStore;
use cg_scale_core::weight::ChannelId;
use cg_scale_core::weight::load_cell::LoadCellChannel;
use defmt::{info, warn};
use embassy_executor::{Executor, Spawner};
use embassy_rp::adc::{self, Adc};
use embassy_rp::flash::Flash;
use embassy_rp::gpio::{Input, Level, Output, Pull};
use embassy_rp::i2c::{self, I2c};
use embassy_rp::peripherals::{I2C0, PIO0, UART0};
use embassy_rp::pio::Pio;
use embassy_rp::pio_programs::ws2812::{PioWs2812, PioWs2812Program};
use embassy_rp::uart::{self, BufferedUart, BufferedUartRx};
use embassy_rp::{Peri, bind_interrupts, peripherals, pio};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::Duration;
use heapless::String;
use sh1106::{Builder, prelude::*};
use static_cell::StaticCell;
#[allow(unused_imports)]
use {defmt_rtt as _, panic_probe as _};

#[cfg(feature = "zero_button")]
use crate::hmi::debouncer::Debouncer;
#[cfg(feature = "zero_button")]
use crate::hmi::inputs::zero_button_handler;

pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const FLASH_SIZE: usize = 2 * 1024 * 1024;

/// Top of flash, kept out of the firmware region by memory.x.
const NVM_PARTITION_SIZE: usize = 64 * 1024;
const NVM_KEY_VALUE_RANGE: core::ops::Range<u32> = 0..8192;

const UART_BAUD: u32 = 115_200;
const UART_BUFFER_SIZE: usize = 64;

static SCALE_EVENT_CHANNEL: ScaleEventChannel = Channel::new();
static LED_STATUS: LedStatusSignal = Signal::new();

static FLASH_MUTEX: StaticCell<Mutex<CriticalSectionRawMutex, RefCell<BlockingFlash>>> =
    StaticCell::new();
static UART_TX_BUFFER: StaticCell<[u8; UART_BUFFER_SIZE]> = StaticCell::new();
static UART_RX_BUFFER: StaticCell<[u8; UART_BUFFER_SIZE]> = StaticCell::new();
static EXECUTOR0: StaticCell<Executor> = StaticCell::new();

assign_resources! {
    front_load_cell: FrontLoadCellPins {
        clk_pin: PIN_14,
        data_pin: PIN_15,
    },
    rear_load_cell: RearLoadCellPins {
        clk_pin: PIN_12,
        data_pin: PIN_13,
    },
    battery_sense: BatterySensePins {
        adc: ADC,
        sense_pin: PIN_26,
    },
    display_i2c: DisplayI2cPins {
        sda_pin: PIN_4,
        scl_pin: PIN_5,
        i2c_peripheral: I2C0,
    },
    serial: SerialPins {
        uart: UART0,
        tx_pin: PIN_0,
        rx_pin: PIN_1,
    },
    hmi_inputs: HmiInputPins {
        zero_btn_pin: PIN_6,
    },
    led_control: LedControlResources {
        pio: PIO0,
        dma_channel: DMA_CH0,
        data_pin: PIN_16,
    },
    storage: StorageResources {
        flash: FLASH,
    },
}

struct ScaleResources {
    front_load_cell: FrontLoadCellPins,
    rear_load_cell: RearLoadCellPins,
    battery_sense: BatterySensePins,
    display_i2c: DisplayI2cPins,
    serial: SerialPins,
    storage: StorageResources,
}

bind_interrupts!(struct PioIrqs {
    PIO0_IRQ_0 => pio::InterruptHandler<PIO0>;
});

bind_interrupts!(struct I2cIrqs {
    I2C0_IRQ => i2c::InterruptHandler<I2C0>;
});

bind_interrupts!(struct UartIrqs {
    UART0_IRQ => uart::BufferedInterruptHandler<UART0>;
});

bind_interrupts!(struct AdcIrqs {
    ADC_IRQ_FIFO => adc::InterruptHandler;
});

#[cortex_m_rt::entry]
fn main() -> ! {
    let p = embassy_rp::init(Default::default());
    let resources = split_resources! {p};

    let scale_resources = ScaleResources {
        front_load_cell: resources.front_load_cell,
        rear_load_cell: resources.rear_load_cell,
        battery_sense: resources.battery_sense,
        display_i2c: resources.display_i2c,
        serial: resources.serial,
        storage: resources.storage,
    };

    info!("Launching CG scale v{}", built_info::PKG_VERSION);

    let executor0 = EXECUTOR0.init(Executor::new());
    executor0.run(|spawner| {
        core0_main(
            spawner,
            scale_resources,
            resources.hmi_inputs,
            resources.led_control,
        )
    });
}

#[allow(unused_variables)]
fn core0_main(
    spawner: Spawner,
    scale_resources: ScaleResources,
    hmi_inputs: HmiInputPins,
    led_control: LedControlResources,
) {
    #[cfg(feature = "zero_button")]
    spawner
        .spawn(zero_button_task(hmi_inputs, SCALE_EVENT_CHANNEL.sender()))
        .unwrap();
    #[cfg(feature = "status_led")]
    spawner.spawn(led_task(led_control)).unwrap();
    spawner.spawn(scale_task(spawner, scale_resources)).unwrap();
}

#[cfg(feature = "zero_button")]
#[embassy_executor::task]
async fn zero_button_task(hmi_input_pins: HmiInputPins, events: ScaleEventSender<'static>) {
    let debounced_btn = Debouncer::new(
        Input::new(hmi_input_pins.zero_btn_pin, Pull::Up),
        Duration::from_millis(20),
    );
    zero_button_handler(events, debounced_btn).await;
}

#[cfg(feature = "status_led")]
#[embassy_executor::task]
async fn led_task(led_pio_resources: LedControlResources) {
    let Pio { mut common, sm0, .. } = Pio::new(led_pio_resources.pio, PioIrqs);
    let program = PioWs2812Program::new(&mut common);
    let pio_ws2812: PioWs2812<'_, PIO0, 0, 1> = PioWs2812::new(
        &mut common,
        sm0,
        led_pio_resources.dma_channel,
        led_pio_resources.data_pin,
        &program,
    );

    LED_STATUS.signal(LedStatus::Normal);
    let mut led_controller = LedController::new(pio_ws2812);
    led_controller.run(&LED_STATUS).await;
}

#[embassy_executor::task]
async fn serial_rx_task(rx: BufferedUartRx, events: ScaleEventSender<'static>) {
    serial_command_handler(rx, events).await;
}

fn load_cell_gauge(
    clk_pin: Peri<'static, impl embassy_rp::gpio::Pin>,
    data_pin: Peri<'static, impl embassy_rp::gpio::Pin>,
) -> Hx711Async<Output<'static>, Input<'static>> {
    let clk_pin_out = Output::new(clk_pin, Level::Low);
    let data_pin = Input::new(data_pin, Pull::Up);
    Hx711Async::new(clk_pin_out, data_pin, Hx711Gain::Gain128)
}

#[embassy_executor::task]
async fn scale_task(spawner: Spawner, resources: ScaleResources) {
    let config = ScaleConfig::DEFAULT;

    let flash = Flash::<_, _, FLASH_SIZE>::new_blocking(resources.storage.flash);
    let flash_mutex = FLASH_MUTEX.init(Mutex::new(RefCell::new(flash)));
    initialise_storage(
        flash_mutex,
        (FLASH_SIZE - NVM_PARTITION_SIZE) as u32..FLASH_SIZE as u32,
        NVM_KEY_VALUE_RANGE,
    )
    .await;

    let mut uart_config = uart::Config::default();
    uart_config.baudrate = UART_BAUD;
    let uart = BufferedUart::new(
        resources.serial.uart,
        resources.serial.tx_pin,
        resources.serial.rx_pin,
        UartIrqs,
        UART_TX_BUFFER.init([0; UART_BUFFER_SIZE]),
        UART_RX_BUFFER.init([0; UART_BUFFER_SIZE]),
        uart_config,
    );
    let (tx, rx) = uart.split();
    spawner
        .spawn(serial_rx_task(rx, SCALE_EVENT_CHANNEL.sender()))
        .unwrap();

    let i2c = I2c::new_async(
        resources.display_i2c.i2c_peripheral,
        resources.display_i2c.scl_pin,
        resources.display_i2c.sda_pin,
        I2cIrqs,
        i2c::Config::default(),
    );
    let builder = Builder::new();
    #[cfg(feature = "pcb_rev1")]
    let builder = builder.with_rotation(DisplayRotation::Rotate180);
    let display = ScaleDisplay::new(builder.connect_i2c(i2c).into());

    let front_gauge = load_cell_gauge(
        resources.front_load_cell.clk_pin,
        resources.front_load_cell.data_pin,
    );
    let rear_gauge = load_cell_gauge(
        resources.rear_load_cell.clk_pin,
        resources.rear_load_cell.data_pin,
    );
    let front = LoadCellChannel::new(ChannelId::Front, front_gauge, &config)
        .await
        .unwrap_or_else(|_| panic!("Failed to start front load cell"));
    let rear = LoadCellChannel::new(ChannelId::Rear, rear_gauge, &config)
        .await
        .unwrap_or_else(|_| panic!("Failed to start rear load cell"));

    let adc = Adc::new(resources.battery_sense.adc, AdcIrqs, adc::Config::default());
    let sense_channel = adc::Channel::new_pin(resources.battery_sense.sense_pin, Pull::None);
    let battery = BatteryMonitor::new(AdcBatterySense::new(adc, sense_channel), &config)
        .unwrap_or_else(|_| panic!("Invalid default battery calibration"));

    let store = CalibrationStore::new(FlashCalibrationBlock, config.default_calibration);
    let scale = CgScale::new(front, rear, battery, store, config).await;

    let mut banner = String::<64>::new();
    if write!(
        banner,
        "CG scale v{} ({})",
        built_info::PKG_VERSION,
        built_info::GIT_COMMIT_HASH_SHORT.unwrap_or("unknown")
    )
    .is_err()
    {
        warn!("Banner truncated");
    }

    let mut application_manager = ApplicationManager::new(
        scale,
        display,
        SerialReporter::new(tx),
        SCALE_EVENT_CHANNEL.receiver(),
        &LED_STATUS,
        config,
    );
    application_manager.run(&banner).await;
}
