use embedded_hal::digital::{InputPin as _, OutputPin as _, PinState};
use embedded_hal_async::{delay::DelayNs as _, spi::SpiBus as _};

use crate::{
    log::{debug, trace, warn_log},
    EpdHw, Error,
};

/// Provides "wait" support for a controller that reports its state on the busy line.
pub(crate) trait BusyWait: EpdHw {
    /// Polls the busy line every `poll_interval_ms` (at least 1 ms) until it reads low (idle).
    ///
    /// Fails with [Error::BusyTimeout] once `timeout_ms` has elapsed with the line still high. The
    /// final sleep is shortened so the wait never overshoots the timeout.
    /// With no timeout this waits forever, e.g. if the panel is unpowered.
    async fn wait_until_idle(
        &mut self,
        poll_interval_ms: u32,
        timeout_ms: Option<u32>,
    ) -> Result<(), Error<Self::Error>>;
}

/// Provides command and data framing over the raw bus.
///
/// Every frame sets the data/command line, asserts chip-select, writes one contiguous burst and
/// releases chip-select again.
pub(crate) trait CommandDataSend: EpdHw {
    /// Sends a command frame (data/command line low).
    async fn send_command(
        &mut self,
        spi: &mut <Self as EpdHw>::Spi,
        command: u8,
    ) -> Result<(), Error<Self::Error>>;

    /// Sends a data frame (data/command line high).
    async fn send_data(
        &mut self,
        spi: &mut <Self as EpdHw>::Spi,
        data: &[u8],
    ) -> Result<(), Error<Self::Error>>;

    /// Sends a command frame, followed by a data frame if `data` is not empty.
    async fn send(
        &mut self,
        spi: &mut <Self as EpdHw>::Spi,
        command: u8,
        data: &[u8],
    ) -> Result<(), Error<Self::Error>> {
        self.send_command(spi, command).await?;
        if !data.is_empty() {
            self.send_data(spi, data).await?;
        }
        Ok(())
    }
}

impl<HW: EpdHw> BusyWait for HW {
    async fn wait_until_idle(
        &mut self,
        poll_interval_ms: u32,
        timeout_ms: Option<u32>,
    ) -> Result<(), Error<HW::Error>> {
        // Busy is active high: 1 means the controller is still working.
        if !self.busy().is_high().map_err(Error::<HW::Error>::hw)? {
            return Ok(());
        }

        debug!("e-Paper busy");
        // A zero interval would never advance the elapsed time.
        let poll_interval_ms = poll_interval_ms.max(1);
        let mut waited_ms: u32 = 0;
        loop {
            let step_ms = match timeout_ms {
                Some(timeout_ms) if waited_ms >= timeout_ms => {
                    warn_log!("e-Paper still busy after {} ms, giving up", waited_ms);
                    return Err(Error::BusyTimeout { waited_ms });
                }
                // The last sleep is cut short so the wait ends on the deadline.
                Some(timeout_ms) => poll_interval_ms.min(timeout_ms - waited_ms),
                None => poll_interval_ms,
            };
            self.delay().delay_ms(step_ms).await;
            waited_ms = waited_ms.saturating_add(step_ms);
            if !self.busy().is_high().map_err(Error::<HW::Error>::hw)? {
                break;
            }
        }
        debug!("e-Paper busy release after {} ms", waited_ms);
        Ok(())
    }
}

async fn write_frame<HW: EpdHw>(
    hw: &mut HW,
    spi: &mut HW::Spi,
    dc: PinState,
    bytes: &[u8],
) -> Result<(), Error<HW::Error>> {
    hw.dc().set_state(dc).map_err(Error::<HW::Error>::hw)?;
    hw.cs().set_low().map_err(Error::<HW::Error>::hw)?;

    let written = match spi.write(bytes).await {
        Ok(()) => spi.flush().await.map_err(Error::hw),
        Err(e) => Err(Error::hw(e)),
    };

    // Chip-select is released even when the burst failed.
    hw.cs().set_high().map_err(Error::<HW::Error>::hw)?;
    written
}

impl<HW: EpdHw> CommandDataSend for HW {
    async fn send_command(
        &mut self,
        spi: &mut <Self as EpdHw>::Spi,
        command: u8,
    ) -> Result<(), Error<HW::Error>> {
        trace!("Sending EPD command: {:?}", command);
        write_frame(self, spi, PinState::Low, &[command]).await
    }

    async fn send_data(
        &mut self,
        spi: &mut <Self as EpdHw>::Spi,
        data: &[u8],
    ) -> Result<(), Error<HW::Error>> {
        write_frame(self, spi, PinState::High, data).await
    }
}
