use bitflags::bitflags;
use embedded_hal::{
    digital::OutputPin as _,
    spi::{Phase, Polarity},
};
use embedded_hal_async::delay::DelayNs as _;

use crate::{
    buffer::{DeviceBuffer, FrameError, PanelGeometry},
    comms::{BusyWait as _, CommandDataSend as _},
    image::SourceImage,
    log::debug,
    session::{AddressingWindow, Cursor, PanelSession},
    EpdHw, Error,
};

/// LUT for a full refresh. Slower, but leaves no ghosting. Selected by default.
pub const LUT_FULL_UPDATE: [u8; 30] = [
    0x50, 0xAA, 0x55, 0xAA, 0x11, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0x1F, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];
/// LUT for a partial refresh. Fast, but a full refresh should be done occasionally.
pub const LUT_PARTIAL_UPDATE: [u8; 30] = [
    0x10, 0x18, 0x18, 0x08, 0x18, 0x18, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x13, 0x14, 0x44, 0x12, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// The refresh waveform written to the LUT register.
pub enum RefreshMode {
    /// Use [LUT_FULL_UPDATE].
    #[default]
    Full,
    /// Use [LUT_PARTIAL_UPDATE].
    Partial,
}

impl RefreshMode {
    /// Returns the LUT to use for this refresh mode.
    pub fn lut(&self) -> &'static [u8; 30] {
        match self {
            RefreshMode::Full => &LUT_FULL_UPDATE,
            RefreshMode::Partial => &LUT_PARTIAL_UPDATE,
        }
    }
}

/// The height of the display (portrait orientation).
pub const DISPLAY_HEIGHT: u16 = 296;
/// The width of the display (portrait orientation).
pub const DISPLAY_WIDTH: u16 = 128;
/// The geometry of the 2.9" panel.
pub const DISPLAY_GEOMETRY: PanelGeometry = PanelGeometry::new(DISPLAY_WIDTH, DISPLAY_HEIGHT);
/// The gate count is sent as a 9-bit value, so no panel driven by this controller is taller.
pub const MAX_GATE_LINES: u16 = 512;
/// Bytes available in an [Epd2In9Buffer]. Geometries passed to [Epd2In9::with_geometry] must fit.
pub const BUFFER_CAPACITY: usize = DISPLAY_GEOMETRY.buffer_length();
/// The buffer type used by [Epd2In9].
pub type Epd2In9Buffer = DeviceBuffer<BUFFER_CAPACITY>;

pub const RECOMMENDED_SPI_HZ: u32 = 4_000_000; // 4 MHz
/// Use this phase in conjunction with [RECOMMENDED_SPI_POLARITY] so that the EPD can capture data
/// on the rising edge.
pub const RECOMMENDED_SPI_PHASE: Phase = Phase::CaptureOnFirstTransition;
/// Use this polarity in conjunction with [RECOMMENDED_SPI_PHASE] so that the EPD can capture data
/// on the rising edge.
pub const RECOMMENDED_SPI_POLARITY: Polarity = Polarity::IdleLow;

/// Default interval between two reads of the busy line.
pub const DEFAULT_BUSY_POLL_INTERVAL_MS: u32 = 200;
/// Default upper bound for a single busy wait. A full refresh takes around 2 seconds.
pub const DEFAULT_BUSY_TIMEOUT_MS: u32 = 30_000;

// Reset pulse timing. Shorter pulses can leave the controller uninitialised.
const RESET_SETTLE_MS: u32 = 200;
const RESET_PULSE_MS: u32 = 5;

/// Driver configuration.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// The LUT written during initialisation.
    pub refresh_mode: RefreshMode,
    /// How long to sleep between two reads of the busy line. Zero is treated as 1 ms.
    pub busy_poll_interval_ms: u32,
    /// How long to wait for the busy line before failing with [Error::BusyTimeout]. `None` waits
    /// forever.
    pub busy_timeout_ms: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_mode: RefreshMode::Full,
            busy_poll_interval_ms: DEFAULT_BUSY_POLL_INTERVAL_MS,
            busy_timeout_ms: Some(DEFAULT_BUSY_TIMEOUT_MS),
        }
    }
}

/// Low-level commands for the Epd2In9. You probably want to use the other methods exposed on the
/// [Epd2In9] for most operations, but can send commands directly with [Epd2In9::send] for low-level
/// control or experimentation.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Gate count (panel rows - 1, 9 bits little-endian) and scan direction.
    DriverOutputControl = 0x01,
    /// Used to configure the on chip voltage booster and regulator.
    BoosterSoftStartControl = 0x0C,
    /// Changes the auto-increment behaviour of the address counter. See [DataEntryMode].
    DataEntryModeSetting = 0x11,
    /// Activates the display update sequence. This must be set beforehand using [Command::DisplayUpdateControl2].
    /// This operation must not be interrupted.
    MasterActivation = 0x20,
    /// Configures the display update sequence for use with [Command::MasterActivation].
    DisplayUpdateControl2 = 0x22,
    /// Writes data to the frame buffer, auto-incrementing the address counter.
    WriteRam = 0x24,
    /// Writes to the VCOM register.
    WriteVcom = 0x2C,
    /// Writes the LUT register (30 bytes).
    WriteLut = 0x32,
    /// Number of dummy line periods per gate.
    SetDummyLinePeriod = 0x3A,
    /// Gate line width.
    SetGateLineWidth = 0x3B,
    /// Sets the inclusive start and end of the x axis, in bytes. See [AddressingWindow].
    SetRamXStartEnd = 0x44,
    /// Sets the inclusive start and end of the y axis.
    SetRamYStartEnd = 0x45,
    /// Sets the current x coordinate of the address counter, in bytes.
    SetRamX = 0x4E,
    /// Sets the current y coordinate of the address counter.
    SetRamY = 0x4F,
    /// Does nothing, but terminates other commands such as [Command::WriteRam].
    Noop = 0xFF,
}

impl Command {
    /// Returns the register address for this command.
    pub fn register(&self) -> u8 {
        *self as u8
    }
}

bitflags! {
    /// Payload of [Command::DataEntryModeSetting].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DataEntryMode: u8 {
        const X_INCREMENT = 0b0000_0001;
        const Y_INCREMENT = 0b0000_0010;
        /// Move along y before x.
        const Y_FIRST = 0b0000_0100;
    }
}

impl DataEntryMode {
    /// Auto-increment X and Y, moving in the X direction first (rows).
    pub const ROWS: Self = Self::X_INCREMENT.union(Self::Y_INCREMENT);
}

bitflags! {
    /// Payload of [Command::DisplayUpdateControl2].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UpdateSequence: u8 {
        const ENABLE_CLOCK = 0b1000_0000;
        const ENABLE_ANALOG = 0b0100_0000;
        const DISPLAY_PATTERN = 0b0000_0100;
    }
}

impl UpdateSequence {
    /// Enable the clock and analog, then display the pattern from RAM.
    pub const ACTIVATE: Self = Self::ENABLE_CLOCK
        .union(Self::ENABLE_ANALOG)
        .union(Self::DISPLAY_PATTERN);
}

/// Sent with [Command::BoosterSoftStartControl] during initialisation.
const BOOSTER_SOFT_START_INIT_DATA: [u8; 3] = [0xD7, 0xD6, 0x9D];
/// VCOM for roughly 7 degrees celsius.
const VCOM_INIT_DATA: [u8; 1] = [0xA8];
/// 4 dummy lines per gate.
const DUMMY_LINE_PERIOD_INIT_DATA: [u8; 1] = [0x1A];
/// 2us per line.
const GATE_LINE_WIDTH_INIT_DATA: [u8; 1] = [0x08];

/// Controls the 2.9" monochrome e-paper panel.
///
/// The display has a portrait orientation. Pixels are packed with a set bit for white and a
/// cleared bit for black; see [DeviceBuffer].
///
/// A new driver starts uninitialised. [Epd2In9::init] resets and configures the controller and
/// returns the ready driver, which can then display images.
pub struct Epd2In9<HW, STATE>
where
    HW: EpdHw,
    STATE: State,
{
    hw: HW,
    geometry: PanelGeometry,
    config: Config,
    state: STATE,
}

trait StateInternal {}
#[allow(private_bounds)]
pub trait State: StateInternal {}

macro_rules! impl_base_state {
    ($state:ident) => {
        impl StateInternal for $state {}
        impl State for $state {}
    };
}

/// The controller has not been configured since power-up or the last reset.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateUninitialized();
impl_base_state!(StateUninitialized);

/// The register sequence has been written and the controller accepts image data.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateReady {
    mode: RefreshMode,
}
impl_base_state!(StateReady);

impl<HW> Epd2In9<HW, StateUninitialized>
where
    HW: EpdHw,
{
    /// Creates a driver for the 128x296 panel with the default [Config].
    pub fn new(hw: HW) -> Self {
        Self::with_config(hw, Config::default())
    }

    pub fn with_config(hw: HW, config: Config) -> Self {
        Epd2In9 {
            hw,
            geometry: DISPLAY_GEOMETRY,
            config,
            state: StateUninitialized(),
        }
    }

    /// Creates a driver for a panel of the same family with a different size.
    ///
    /// The width must be a multiple of 8, the height at most [MAX_GATE_LINES], and the packed
    /// frame must fit in [BUFFER_CAPACITY].
    pub fn with_geometry(
        hw: HW,
        geometry: PanelGeometry,
        config: Config,
    ) -> Result<Self, FrameError> {
        if geometry.height > MAX_GATE_LINES {
            return Err(FrameError::InvalidGeometry {
                width: geometry.width,
                height: geometry.height,
            });
        }
        geometry.validate(BUFFER_CAPACITY)?;
        Ok(Epd2In9 {
            hw,
            geometry,
            config,
            state: StateUninitialized(),
        })
    }

    /// Resets the controller and writes the register sequence. The ready driver is only returned
    /// once every register has been written.
    pub async fn init(
        mut self,
        spi: &mut HW::Spi,
    ) -> Result<Epd2In9<HW, StateReady>, Error<HW::Error>> {
        debug!("Initialising display");
        reset_impl(&mut self.hw).await?;

        // Gate count, GD = 0, SM = 0, TB = 0.
        let [gates_low, gates_high] = (self.geometry.height - 1).to_le_bytes();
        self.send(
            spi,
            Command::DriverOutputControl,
            &[gates_low, gates_high, 0x00],
        )
        .await?;
        self.send(
            spi,
            Command::BoosterSoftStartControl,
            &BOOSTER_SOFT_START_INIT_DATA,
        )
        .await?;
        self.send(spi, Command::WriteVcom, &VCOM_INIT_DATA).await?;
        self.send(spi, Command::SetDummyLinePeriod, &DUMMY_LINE_PERIOD_INIT_DATA)
            .await?;
        self.send(spi, Command::SetGateLineWidth, &GATE_LINE_WIDTH_INIT_DATA)
            .await?;
        self.send(
            spi,
            Command::DataEntryModeSetting,
            &[DataEntryMode::ROWS.bits()],
        )
        .await?;

        let mode = self.config.refresh_mode;
        debug!("Writing {:?} LUT", mode);
        self.send(spi, Command::WriteLut, mode.lut()).await?;

        debug!("Display ready");
        Ok(Epd2In9 {
            hw: self.hw,
            geometry: self.geometry,
            config: self.config,
            state: StateReady { mode },
        })
    }
}

impl<HW, STATE> Epd2In9<HW, STATE>
where
    HW: EpdHw,
    STATE: State,
{
    pub fn geometry(&self) -> PanelGeometry {
        self.geometry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Hardware resets the controller. It must be initialised again afterwards.
    pub async fn reset(mut self) -> Result<Epd2In9<HW, StateUninitialized>, Error<HW::Error>> {
        reset_impl(&mut self.hw).await?;
        Ok(Epd2In9 {
            hw: self.hw,
            geometry: self.geometry,
            config: self.config,
            state: StateUninitialized(),
        })
    }

    /// Send the following command and data to the display, as a command frame followed by a data
    /// frame (if `data` is not empty).
    pub async fn send(
        &mut self,
        spi: &mut HW::Spi,
        command: Command,
        data: &[u8],
    ) -> Result<(), Error<HW::Error>> {
        self.hw.send(spi, command.register(), data).await
    }

    /// Waits until the busy line reads idle, bounded by [Config::busy_timeout_ms].
    pub async fn wait_until_idle(&mut self) -> Result<(), Error<HW::Error>> {
        self.hw
            .wait_until_idle(
                self.config.busy_poll_interval_ms,
                self.config.busy_timeout_ms,
            )
            .await
    }

    /// Gives the hardware back, e.g. to release the bus and pins.
    pub fn release(self) -> HW {
        self.hw
    }
}

impl<HW: EpdHw> Epd2In9<HW, StateReady> {
    pub fn refresh_mode(&self) -> RefreshMode {
        self.state.mode
    }

    /// Sets the refresh mode, rewriting the LUT register if it changed.
    pub async fn set_refresh_mode(
        &mut self,
        spi: &mut HW::Spi,
        mode: RefreshMode,
    ) -> Result<(), Error<HW::Error>> {
        if self.state.mode == mode {
            return Ok(());
        }
        debug!("Changing refresh mode to {:?}", mode);
        self.send(spi, Command::WriteLut, mode.lut()).await?;
        self.state.mode = mode;
        Ok(())
    }

    /// Creates an all-white buffer for this panel, for drawing with `embedded-graphics`.
    pub fn new_buffer(&self) -> Result<Epd2In9Buffer, FrameError> {
        Epd2In9Buffer::new(self.geometry)
    }

    /// Opens a session for low-level window, cursor and RAM writes.
    pub fn session(&mut self) -> PanelSession<'_, HW> {
        PanelSession::new(&mut self.hw, &self.config)
    }

    /// Sets the window to which the next image data will be written.
    pub async fn set_window(
        &mut self,
        spi: &mut HW::Spi,
        window: AddressingWindow,
    ) -> Result<(), Error<HW::Error>> {
        self.session().set_window(spi, window).await
    }

    /// Sets the cursor position to write the next data to, then waits while the controller is
    /// busy.
    pub async fn set_cursor(
        &mut self,
        spi: &mut HW::Spi,
        cursor: Cursor,
    ) -> Result<(), Error<HW::Error>> {
        self.session().set_cursor(spi, cursor).await
    }

    /// Packs `image` and displays it. `None` does nothing.
    ///
    /// The image must be the panel size, or the panel size transposed (it is then rotated by 90
    /// degrees, see [DeviceBuffer::from_image]). The image is packed before anything is sent, so
    /// an unsupported size fails without touching the panel.
    pub async fn display<I>(
        &mut self,
        spi: &mut HW::Spi,
        image: Option<&I>,
    ) -> Result<(), Error<HW::Error>>
    where
        I: SourceImage + ?Sized,
    {
        let Some(image) = image else {
            return Ok(());
        };
        let buffer = Epd2In9Buffer::from_image(self.geometry, image)?;
        self.display_buffer(spi, &buffer).await
    }

    /// Writes a packed buffer to the panel RAM and displays it.
    pub async fn display_buffer<const N: usize>(
        &mut self,
        spi: &mut HW::Spi,
        buffer: &DeviceBuffer<N>,
    ) -> Result<(), Error<HW::Error>> {
        if buffer.geometry() != self.geometry {
            return Err(FrameError::GeometryMismatch.into());
        }
        debug!("Displaying frame");
        let mut session = self.session();
        session.write_frame(spi, buffer).await?;
        session.turn_on_display(spi).await
    }

    /// Fills the whole panel with `fill` (`0xFF` is white, `0x00` is black) and displays it.
    pub async fn clear(&mut self, spi: &mut HW::Spi, fill: u8) -> Result<(), Error<HW::Error>> {
        debug!("Clearing display with {:?}", fill);
        let buffer = Epd2In9Buffer::filled(self.geometry, fill)?;
        let mut session = self.session();
        session.write_frame(spi, &buffer).await?;
        session.turn_on_display(spi).await
    }

    /// Refreshes the panel from whatever is in RAM and waits until it is done.
    pub async fn turn_on_display(&mut self, spi: &mut HW::Spi) -> Result<(), Error<HW::Error>> {
        self.session().turn_on_display(spi).await
    }
}

async fn reset_impl<HW: EpdHw>(hw: &mut HW) -> Result<(), Error<HW::Error>> {
    debug!("Resetting EPD");
    hw.reset().set_high().map_err(Error::<HW::Error>::hw)?;
    hw.delay().delay_ms(RESET_SETTLE_MS).await;
    hw.reset().set_low().map_err(Error::<HW::Error>::hw)?;
    hw.delay().delay_ms(RESET_PULSE_MS).await;
    hw.reset().set_high().map_err(Error::<HW::Error>::hw)?;
    hw.delay().delay_ms(RESET_SETTLE_MS).await;
    Ok(())
}
