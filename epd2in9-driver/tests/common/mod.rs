//! A recording mock of the panel hardware. Pins, bus and delay share one event log, so tests can
//! check the exact order of line changes, bus writes and sleeps.
#![allow(dead_code)]

use std::{cell::RefCell, collections::VecDeque, convert::Infallible, rc::Rc};

use embedded_hal::digital::{ErrorType as PinErrorType, InputPin, OutputPin};
use embedded_hal_async::{
    delay::DelayNs,
    spi::{ErrorType as SpiErrorType, SpiBus},
};
use epd2in9_driver::EpdHw;
use thiserror::Error as ThisError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Reset(bool),
    Dc(bool),
    Cs(bool),
    Write(Vec<u8>),
    Flush,
    DelayMs(u32),
    BusyRead(bool),
}

#[derive(Debug, ThisError)]
pub enum MockError {
    #[error("mock hardware never fails")]
    Never,
}

impl From<Infallible> for MockError {
    fn from(e: Infallible) -> Self {
        match e {}
    }
}

type Log = Rc<RefCell<Vec<Event>>>;

#[derive(Default)]
struct BusyScript {
    levels: VecDeque<bool>,
    stuck: bool,
}

/// Handle kept by the test to inspect the log and script the busy line.
#[derive(Clone, Default)]
pub struct Recorder {
    log: Log,
    busy: Rc<RefCell<BusyScript>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.log.borrow().clone()
    }

    pub fn clear(&self) {
        self.log.borrow_mut().clear();
    }

    /// The next busy reads return these levels, then idle.
    pub fn script_busy(&self, levels: &[bool]) {
        self.busy.borrow_mut().levels.extend(levels.iter().copied());
    }

    /// Busy reads high forever.
    pub fn stick_busy(&self) {
        self.busy.borrow_mut().stuck = true;
    }

    pub fn frames(&self) -> Vec<Frame> {
        frames(&self.events())
    }

    pub fn commands(&self) -> Vec<(u8, Vec<u8>)> {
        commands(&self.frames())
    }

    pub fn writes(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Write(_)))
            .count()
    }

    pub fn delays(&self) -> Vec<u32> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                Event::DelayMs(ms) => Some(*ms),
                _ => None,
            })
            .collect()
    }
}

pub struct MockPin {
    log: Log,
    event: fn(bool) -> Event,
}

impl PinErrorType for MockPin {
    type Error = Infallible;
}

impl OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.log.borrow_mut().push((self.event)(false));
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.log.borrow_mut().push((self.event)(true));
        Ok(())
    }
}

pub struct MockBusy {
    log: Log,
    script: Rc<RefCell<BusyScript>>,
}

impl PinErrorType for MockBusy {
    type Error = Infallible;
}

impl InputPin for MockBusy {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        let mut script = self.script.borrow_mut();
        let level = script.stuck || script.levels.pop_front().unwrap_or(false);
        self.log.borrow_mut().push(Event::BusyRead(level));
        Ok(level)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.is_high().map(|high| !high)
    }
}

pub struct MockDelay {
    log: Log,
}

impl DelayNs for MockDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.log.borrow_mut().push(Event::DelayMs(ns / 1_000_000));
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.log.borrow_mut().push(Event::DelayMs(ms));
    }
}

pub struct MockSpi {
    log: Log,
}

impl SpiErrorType for MockSpi {
    type Error = Infallible;
}

impl SpiBus for MockSpi {
    async fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        words.fill(0);
        Ok(())
    }

    async fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        self.log.borrow_mut().push(Event::Write(words.to_vec()));
        Ok(())
    }

    async fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        read.fill(0);
        self.write(write).await
    }

    async fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        self.write(&words.to_vec()).await
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.log.borrow_mut().push(Event::Flush);
        Ok(())
    }
}

pub struct MockHw {
    cs: MockPin,
    dc: MockPin,
    reset: MockPin,
    busy: MockBusy,
    delay: MockDelay,
}

impl EpdHw for MockHw {
    type Spi = MockSpi;
    type Cs = MockPin;
    type Dc = MockPin;
    type Reset = MockPin;
    type Busy = MockBusy;
    type Delay = MockDelay;
    type Error = MockError;

    fn cs(&mut self) -> &mut Self::Cs {
        &mut self.cs
    }

    fn dc(&mut self) -> &mut Self::Dc {
        &mut self.dc
    }

    fn reset(&mut self) -> &mut Self::Reset {
        &mut self.reset
    }

    fn busy(&mut self) -> &mut Self::Busy {
        &mut self.busy
    }

    fn delay(&mut self) -> &mut Self::Delay {
        &mut self.delay
    }
}

pub fn mock_hw() -> (MockHw, MockSpi, Recorder) {
    let recorder = Recorder::default();
    let pin = |event: fn(bool) -> Event| MockPin {
        log: recorder.log.clone(),
        event,
    };
    let hw = MockHw {
        cs: pin(Event::Cs),
        dc: pin(Event::Dc),
        reset: pin(Event::Reset),
        busy: MockBusy {
            log: recorder.log.clone(),
            script: recorder.busy.clone(),
        },
        delay: MockDelay {
            log: recorder.log.clone(),
        },
    };
    let spi = MockSpi {
        log: recorder.log.clone(),
    };
    (hw, spi, recorder)
}

/// One chip-select bracketed bus write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub is_command: bool,
    pub bytes: Vec<u8>,
}

/// Rebuilds frames from the event log, asserting the framing rules along the way: every write
/// happens with chip-select low, and chip-select goes low then high exactly once per write.
pub fn frames(events: &[Event]) -> Vec<Frame> {
    let mut frames = Vec::new();
    let mut dc = None;
    let mut cs_low = false;
    let mut writes_in_frame = 0;

    for event in events {
        match event {
            Event::Dc(level) => {
                assert!(!cs_low, "data/command changed inside a frame");
                dc = Some(*level);
            }
            Event::Cs(false) => {
                assert!(!cs_low, "chip-select asserted twice");
                cs_low = true;
                writes_in_frame = 0;
            }
            Event::Cs(true) => {
                if cs_low {
                    assert_eq!(writes_in_frame, 1, "frame must hold exactly one write");
                }
                cs_low = false;
            }
            Event::Write(bytes) => {
                assert!(cs_low, "write without chip-select");
                writes_in_frame += 1;
                let level = dc.expect("data/command line never set");
                frames.push(Frame {
                    is_command: !level,
                    bytes: bytes.clone(),
                });
            }
            _ => {}
        }
    }
    assert!(!cs_low, "frame left open");
    frames
}

/// Groups frames into (command, concatenated data) pairs.
pub fn commands(frames: &[Frame]) -> Vec<(u8, Vec<u8>)> {
    let mut commands: Vec<(u8, Vec<u8>)> = Vec::new();
    for frame in frames {
        if frame.is_command {
            assert_eq!(frame.bytes.len(), 1, "commands are single bytes");
            commands.push((frame.bytes[0], Vec::new()));
        } else {
            commands
                .last_mut()
                .expect("data frame before any command")
                .1
                .extend_from_slice(&frame.bytes);
        }
    }
    commands
}
