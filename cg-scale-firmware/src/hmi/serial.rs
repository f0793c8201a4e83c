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

use crate::hmi::event_channels::{ScaleEvent, ScaleEventSender};
use cg_scale_core::command::{self, LineAssembler};
use defmt::{debug, warn};
use embassy_time::{Duration, Timer};
use embedded_io_async::{Read, Write};

/// Pause after a receive error before reading again.
const RX_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Turns received lines into operator events.
pub async fn serial_command_handler<R: Read>(mut rx: R, events: ScaleEventSender<'_>) {
    let mut assembler = LineAssembler::new();
    let mut rx_buffer = [0u8; 16];
    loop {
        let count = match rx.read(&mut rx_buffer).await {
            Ok(count) => count,
            Err(_) => {
                warn!("Serial receive error");
                Timer::after(RX_ERROR_BACKOFF).await;
                continue;
            }
        };

        for byte in &rx_buffer[..count] {
            let Some(line) = assembler.push(*byte) else {
                continue;
            };
            let event = match command::parse(line) {
                Ok(command) => {
                    debug!("Serial command {:?}", command);
                    ScaleEvent::Command(command)
                }
                Err(error) => ScaleEvent::CommandRejected(error),
            };
            events.send(event).await;
        }
    }
}

/// Line oriented output to the companion.
pub struct SerialReporter<W> {
    tx: W,
}

impl<W: Write> SerialReporter<W> {
    pub fn new(tx: W) -> Self {
        Self { tx }
    }

    pub async fn write_line(&mut self, line: &str) {
        let result = async {
            self.tx.write_all(line.as_bytes()).await?;
            self.tx.write_all(b"\r\n").await
        }
        .await;
        if result.is_err() {
            warn!("Serial transmit failed");
        }
    }
}
