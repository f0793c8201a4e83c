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

use cg_scale_core::report::DisplayText;
use defmt::error;
use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::mono_font::ascii::{FONT_8X13, FONT_8X13_BOLD};
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::text::Text;
use embedded_layout::layout::linear::LinearLayout;
use embedded_layout::prelude::*;
use sh1106::mode::GraphicsMode;

const TITLE_STYLE: MonoTextStyle<'static, BinaryColor> =
    MonoTextStyle::new(&FONT_8X13_BOLD, BinaryColor::On);
const BODY_STYLE: MonoTextStyle<'static, BinaryColor> =
    MonoTextStyle::new(&FONT_8X13, BinaryColor::On);

/// 128x64 SH1106 showing the two line summary.
pub struct ScaleDisplay<DI>
where
    DI: sh1106::interface::DisplayInterface,
{
    display: GraphicsMode<DI>,
}

impl<DI> ScaleDisplay<DI>
where
    DI: sh1106::interface::DisplayInterface,
{
    pub fn new(mut display: GraphicsMode<DI>) -> Self {
        let _ = display.init().map_err(|_| error!("Failed to init display"));
        display.clear();
        let _ = display
            .flush()
            .map_err(|_| error!("Failed to flush display"));
        Self { display }
    }

    pub fn show_message(&mut self, message: &str) {
        self.display.clear();
        let area = self.display.bounding_box();
        let _ = Text::new(message, Point::zero(), BODY_STYLE)
            .align_to(&area, horizontal::Center, vertical::Center)
            .draw(&mut self.display);
        self.flush();
    }

    pub fn show(&mut self, text: &DisplayText) {
        self.display.clear();
        let area = self.display.bounding_box();
        let _ = LinearLayout::vertical(
            Chain::new(Text::new(text.top.as_str(), Point::zero(), TITLE_STYLE))
                .append(Text::new(text.bottom.as_str(), Point::zero(), BODY_STYLE)),
        )
        .with_alignment(horizontal::Center)
        .with_spacing(embedded_layout::layout::linear::spacing::FixedMargin(6))
        .arrange()
        .align_to(&area, horizontal::Center, vertical::Center)
        .draw(&mut self.display);
        self.flush();
    }

    fn flush(&mut self) {
        let _ = self
            .display
            .flush()
            .map_err(|_| error!("Display flush failed"));
    }
}
