//! This crate provides an `async`/`await` driver for the 2.9" monochrome e-paper panel (128x296,
//! IL3820/SSD1608 family controller).
//!
//! It is built on top of `embedded-hal-async` and `embedded-graphics`, making it compatible with a
//! wide range of embedded platforms.
//!
//! ## Core pieces
//!
//! - [`EpdHw`]: abstracts over the peripherals needed to talk to the panel: the serial bus, the
//!   chip-select, data/command, reset and busy lines, and a delay timer. You implement this trait
//!   once for your board.
//! - [`epd2in9::Epd2In9`]: the panel driver. It resets and configures the controller, streams
//!   packed image data into the panel RAM row by row, and triggers refreshes while polling the
//!   busy line with a bounded wait.
//! - [`buffer`]: the packed 1-bit device buffer, the panel geometry, and the conversion from a
//!   grayscale source image (in either orientation) into device bytes. The buffer also implements
//!   `embedded-graphics::DrawTarget`.
//! - [`image`]: the typed grayscale source image accepted by [`epd2in9::Epd2In9::display`].
//! - [`session`]: the addressing window and cursor state used for a single transfer.
//!
//! All operations are strictly sequential. The driver owns the control lines exclusively, and
//! the bus is lent to it for the duration of each call.
#![no_std]

use core::error::Error as CoreError;

use embedded_hal::digital::{ErrorType as PinErrorType, InputPin, OutputPin};
use embedded_hal_async::{
    delay::DelayNs,
    spi::{ErrorType as SpiErrorType, SpiBus},
};
use thiserror::Error as ThisError;

pub mod buffer;
pub mod epd2in9;
pub mod image;
pub mod session;

mod comms;
mod log;

pub use buffer::FrameError;

/// Errors returned by the driver.
///
/// `E` is the aggregated hardware error type of the [EpdHw] implementation.
#[derive(Debug, ThisError)]
pub enum Error<E> {
    /// A pin or bus operation failed.
    #[error("hardware error: {0}")]
    Hw(E),
    /// The frame data could not be built for this panel.
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// The controller kept the busy line asserted for longer than the configured timeout.
    #[error("controller unresponsive: still busy after {waited_ms} ms")]
    BusyTimeout { waited_ms: u32 },
}

impl<E> Error<E> {
    pub(crate) fn hw(e: impl Into<E>) -> Self {
        Error::Hw(e.into())
    }
}

/// Provides access to the hardware needed to control the panel.
///
/// The bus is a raw [SpiBus] rather than a `SpiDevice`: the driver frames every command and data
/// burst with the chip-select line itself.
///
/// ```rust,ignore
/// use core::convert::Infallible;
///
/// use embassy_rp::gpio::{Input, Output};
/// use embassy_rp::spi::{self, Spi};
/// use embassy_time::Delay;
/// use epd2in9_driver::EpdHw;
/// use thiserror::Error as ThisError;
///
/// /// Define an error type that can convert from the SPI and GPIO errors.
/// #[derive(Debug, ThisError)]
/// enum Error {
///   #[error("SPI error: {0:?}")]
///   SpiError(spi::Error),
/// }
///
/// impl From<Infallible> for Error {
///     fn from(_: Infallible) -> Self {
///         // GPIO errors are infallible, i.e. they can't occur, so this should be unreachable.
///         unreachable!()
///     }
/// }
///
/// impl From<spi::Error> for Error {
///     fn from(e: spi::Error) -> Self {
///         Error::SpiError(e)
///     }
/// }
///
/// struct RpEpdHw<'a> {
///     cs: Output<'a>,
///     dc: Output<'a>,
///     reset: Output<'a>,
///     busy: Input<'a>,
///     delay: Delay,
/// }
///
/// impl<'a> EpdHw for RpEpdHw<'a> {
///     type Spi = Spi<'a, embassy_rp::peripherals::SPI0, spi::Async>;
///     type Cs = Output<'a>;
///     type Dc = Output<'a>;
///     type Reset = Output<'a>;
///     type Busy = Input<'a>;
///     type Delay = Delay;
///     type Error = Error;
///
///     fn cs(&mut self) -> &mut Self::Cs {
///       &mut self.cs
///     }
///
///     fn dc(&mut self) -> &mut Self::Dc {
///       &mut self.dc
///     }
///
///     fn reset(&mut self) -> &mut Self::Reset {
///       &mut self.reset
///     }
///
///     fn busy(&mut self) -> &mut Self::Busy {
///       &mut self.busy
///     }
///
///     fn delay(&mut self) -> &mut Self::Delay {
///       &mut self.delay
///     }
/// }
/// ```
pub trait EpdHw {
    type Spi: SpiBus;
    type Cs: OutputPin;
    type Dc: OutputPin;
    type Reset: OutputPin;
    type Busy: InputPin;
    type Delay: DelayNs;
    type Error: CoreError
        + From<<Self::Spi as SpiErrorType>::Error>
        + From<<Self::Cs as PinErrorType>::Error>
        + From<<Self::Dc as PinErrorType>::Error>
        + From<<Self::Reset as PinErrorType>::Error>
        + From<<Self::Busy as PinErrorType>::Error>;

    fn cs(&mut self) -> &mut Self::Cs;
    fn dc(&mut self) -> &mut Self::Dc;
    fn reset(&mut self) -> &mut Self::Reset;
    fn busy(&mut self) -> &mut Self::Busy;
    fn delay(&mut self) -> &mut Self::Delay;
}
