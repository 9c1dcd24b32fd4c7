//! Emulator abstraction for Crowdplay sessions.

use crate::error::EnvError;
use crate::types::{Frame, InputEvent};
use std::path::Path;

/// An opaque, stateful emulator instance.
///
/// Each session owns exactly one emulator for its whole lifetime and drives
/// it from a single task. Dropping the handle releases the engine and every
/// resource it holds.
///
/// All methods are synchronous: emulation is computation-bound and never
/// suspends.
pub trait Emulator: Send {
    /// Advances the emulation by one step.
    fn advance(&mut self) -> Result<(), EnvError>;

    /// Reads one byte of addressable memory.
    fn read_byte(&self, address: u16) -> Result<u8, EnvError>;

    /// Writes one byte of addressable memory.
    fn write_byte(&mut self, address: u16, value: u8) -> Result<(), EnvError>;

    /// Delivers a button press or release.
    fn send_input(&mut self, event: InputEvent) -> Result<(), EnvError>;

    /// Captures the current screen.
    fn capture_frame(&mut self) -> Result<Frame, EnvError>;

    /// Serializes the full machine state.
    fn serialize_state(&self) -> Result<Vec<u8>, EnvError>;

    /// Restores a previously serialized machine state.
    fn deserialize_state(&mut self, blob: &[u8]) -> Result<(), EnvError>;

    /// Enables or disables realtime throttling.
    ///
    /// Sessions run unthrottled: a round's ticks are computed as fast as
    /// possible and the real-time pacing comes from the vote cadence.
    fn set_realtime_throttle(&mut self, enabled: bool);
}

/// Creates emulator instances from ROM images.
pub trait EmulatorFactory: Send + Sync {
    /// Boots a fresh emulator for the given ROM image.
    fn launch(&self, rom: &Path) -> Result<Box<dyn Emulator>, EnvError>;
}
