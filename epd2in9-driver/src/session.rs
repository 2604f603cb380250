//! Addressing state for a single transfer into the panel RAM.
//!
//! The controller auto-increments its address counter inside the current window, so a transfer
//! is: set the window, then for every row move the cursor and write the row.

use crate::{
    buffer::{DeviceBuffer, PanelGeometry},
    comms::{BusyWait as _, CommandDataSend as _},
    epd2in9::{Command, Config, UpdateSequence},
    log::trace,
    EpdHw, Error,
};

/// Inclusive RAM bounds that the controller accepts writes into.
///
/// The x bounds are sent to the controller in units of 8 pixels: the low 3 bits are dropped, so
/// non-aligned values are truncated rather than rejected. For example, to write the first 32 x
/// positions you send 0 (0 >> 3) and 3 (31 >> 3). Writing just the first 25 x positions sends the
/// same values and actually writes all 32.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressingWindow {
    pub x_start: u16,
    pub y_start: u16,
    pub x_end: u16,
    pub y_end: u16,
}

impl AddressingWindow {
    pub const fn new(x_start: u16, y_start: u16, x_end: u16, y_end: u16) -> Self {
        Self {
            x_start,
            y_start,
            x_end,
            y_end,
        }
    }

    /// The window covering the whole panel.
    pub const fn full(geometry: PanelGeometry) -> Self {
        Self::new(0, 0, geometry.width - 1, geometry.height - 1)
    }

    /// Payload for [Command::SetRamXStartEnd].
    pub fn x_payload(&self) -> [u8; 2] {
        [column_byte(self.x_start), column_byte(self.x_end)]
    }

    /// Payload for [Command::SetRamYStartEnd], both bounds little-endian.
    pub fn y_payload(&self) -> [u8; 4] {
        let [start_low, start_high] = self.y_start.to_le_bytes();
        let [end_low, end_high] = self.y_end.to_le_bytes();
        [start_low, start_high, end_low, end_high]
    }
}

/// The RAM address counter position for the next write.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub x: u16,
    pub y: u16,
}

impl Cursor {
    pub const fn new(x: u16, y: u16) -> Self {
        Self { x, y }
    }

    /// Payload for [Command::SetRamX]. Truncated to a multiple of 8 like the window bounds.
    pub fn x_payload(&self) -> [u8; 1] {
        [column_byte(self.x)]
    }

    /// Payload for [Command::SetRamY], little-endian.
    pub fn y_payload(&self) -> [u8; 2] {
        self.y.to_le_bytes()
    }
}

fn column_byte(x: u16) -> u8 {
    ((x >> 3) & 0xFF) as u8
}

/// Window and cursor state for one transfer.
///
/// A session borrows the driver's hardware for its lifetime and remembers the last window and
/// cursor it sent. Nothing is carried over between sessions.
pub struct PanelSession<'a, HW: EpdHw> {
    hw: &'a mut HW,
    config: &'a Config,
    window: Option<AddressingWindow>,
    cursor: Option<Cursor>,
}

impl<'a, HW: EpdHw> PanelSession<'a, HW> {
    pub(crate) fn new(hw: &'a mut HW, config: &'a Config) -> Self {
        Self {
            hw,
            config,
            window: None,
            cursor: None,
        }
    }

    /// The last window sent in this session.
    pub fn window(&self) -> Option<AddressingWindow> {
        self.window
    }

    /// The last cursor position sent in this session.
    pub fn cursor(&self) -> Option<Cursor> {
        self.cursor
    }

    /// Sets the window to which the next image data will be written.
    pub async fn set_window(
        &mut self,
        spi: &mut HW::Spi,
        window: AddressingWindow,
    ) -> Result<(), Error<HW::Error>> {
        self.hw
            .send(spi, Command::SetRamXStartEnd.register(), &window.x_payload())
            .await?;
        self.hw
            .send(spi, Command::SetRamYStartEnd.register(), &window.y_payload())
            .await?;
        self.window = Some(window);
        Ok(())
    }

    /// Moves the address counter, then waits for the controller to settle. The controller
    /// rejects the next RAM write while it is still busy with the address update.
    pub async fn set_cursor(
        &mut self,
        spi: &mut HW::Spi,
        cursor: Cursor,
    ) -> Result<(), Error<HW::Error>> {
        self.hw
            .send(spi, Command::SetRamX.register(), &cursor.x_payload())
            .await?;
        self.hw
            .send(spi, Command::SetRamY.register(), &cursor.y_payload())
            .await?;
        self.cursor = Some(cursor);
        self.wait_until_idle().await
    }

    /// Writes one row of packed bytes at the start of RAM row `y`.
    pub async fn write_row(
        &mut self,
        spi: &mut HW::Spi,
        y: u16,
        row: &[u8],
    ) -> Result<(), Error<HW::Error>> {
        self.set_cursor(spi, Cursor::new(0, y)).await?;
        self.hw
            .send(spi, Command::WriteRam.register(), row)
            .await
    }

    /// Writes a whole frame: one full-panel window, then one cursor move and RAM write per row.
    pub async fn write_frame<const N: usize>(
        &mut self,
        spi: &mut HW::Spi,
        buffer: &DeviceBuffer<N>,
    ) -> Result<(), Error<HW::Error>> {
        let geometry = buffer.geometry();
        trace!("Writing {} rows", geometry.height);
        self.set_window(spi, AddressingWindow::full(geometry))
            .await?;
        for (y, row) in (0..geometry.height).zip(buffer.rows()) {
            self.write_row(spi, y, row).await?;
        }
        Ok(())
    }

    /// Refreshes the panel from RAM and waits until the refresh is done.
    ///
    /// This is the only operation that makes the panel redraw.
    pub async fn turn_on_display(&mut self, spi: &mut HW::Spi) -> Result<(), Error<HW::Error>> {
        // Clock and analog must be enabled for the pattern display, otherwise the controller
        // hangs in the busy state.
        self.hw
            .send(
                spi,
                Command::DisplayUpdateControl2.register(),
                &[UpdateSequence::ACTIVATE.bits()],
            )
            .await?;
        self.hw
            .send(spi, Command::MasterActivation.register(), &[])
            .await?;
        self.hw.send(spi, Command::Noop.register(), &[]).await?;
        self.wait_until_idle().await
    }

    /// Polls the busy line using the driver's configured interval and timeout.
    pub async fn wait_until_idle(&mut self) -> Result<(), Error<HW::Error>> {
        self.hw
            .wait_until_idle(
                self.config.busy_poll_interval_ms,
                self.config.busy_timeout_ms,
            )
            .await
    }
}
