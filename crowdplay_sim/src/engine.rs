//! Scripted emulator with fault injection.
//!
//! The fake engine is fully deterministic: its state is a tick counter,
//! the held-button mask and 64 KiB of memory. Every captured frame starts
//! with the tick count it was taken at, so tests can tell frames apart.

use crowdplay_env::{Button, Emulator, EmulatorFactory, EnvError, Frame, InputEvent};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Size of the emulated address space.
pub const MEMORY_SIZE: usize = 0x10000;

/// Joypad register: currently held buttons.
pub const JOYPAD_ADDR: u16 = 0xff00;

/// Bit of the most recently pressed button.
pub const LAST_PRESS_ADDR: u16 = 0xff01;

/// Captured frame size (a 1/8 scale Game Boy screen).
pub const FRAME_WIDTH: u32 = 20;
pub const FRAME_HEIGHT: u32 = 18;

const STATE_HEADER: usize = 8;

/// Joypad bit for a button.
pub fn button_bit(button: Button) -> u8 {
    match button {
        Button::Right => 0x01,
        Button::Left => 0x02,
        Button::Up => 0x04,
        Button::Down => 0x08,
        Button::A => 0x10,
        Button::B => 0x20,
        Button::Select => 0x40,
        Button::Start => 0x80,
    }
}

/// Reads the tick count stamped into a frame.
pub fn frame_tick(frame: &Frame) -> Option<u64> {
    let bytes = frame.pixels.get(..8)?;
    Some(u64::from_le_bytes(bytes.try_into().ok()?))
}

/// Reads the tick count of a serialized state.
pub fn state_tick(state: &[u8]) -> Option<u64> {
    let bytes = state.get(..STATE_HEADER)?;
    Some(u64::from_le_bytes(bytes.try_into().ok()?))
}

/// Deterministic fake engine.
pub struct ScriptedEmulator {
    rom: String,
    ticks: u64,
    memory: Vec<u8>,
    throttled: bool,

    /// Steps advanced since launch (not part of the state)
    advanced: u64,
    fail_after: Option<u64>,
    live: Arc<AtomicUsize>,
}

impl ScriptedEmulator {
    fn new(rom: String, fail_after: Option<u64>, live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            rom,
            ticks: 0,
            memory: vec![0; MEMORY_SIZE],
            throttled: true,
            advanced: 0,
            fail_after,
            live,
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn is_throttled(&self) -> bool {
        self.throttled
    }

    fn held(&self) -> u8 {
        self.memory[JOYPAD_ADDR as usize]
    }
}

impl Drop for ScriptedEmulator {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Emulator for ScriptedEmulator {
    fn advance(&mut self) -> Result<(), EnvError> {
        if let Some(limit) = self.fail_after {
            if self.advanced >= limit {
                return Err(EnvError::engine(format!(
                    "{}: emulation fault after {} ticks",
                    self.rom, self.advanced
                )));
            }
        }

        self.ticks += 1;
        self.advanced += 1;

        // Work RAM scribble so the state depends on the input history
        let slot = 0xc000 + (self.ticks % 0x100) as usize;
        self.memory[slot] = self.memory[slot].wrapping_add(self.held() ^ self.ticks as u8);
        Ok(())
    }

    fn read_byte(&self, address: u16) -> Result<u8, EnvError> {
        Ok(self.memory[address as usize])
    }

    fn write_byte(&mut self, address: u16, value: u8) -> Result<(), EnvError> {
        self.memory[address as usize] = value;
        Ok(())
    }

    fn send_input(&mut self, event: InputEvent) -> Result<(), EnvError> {
        let joypad = JOYPAD_ADDR as usize;
        match event {
            InputEvent::Press(button) => {
                self.memory[joypad] |= button_bit(button);
                self.memory[LAST_PRESS_ADDR as usize] = button_bit(button);
            }
            InputEvent::Release(button) => self.memory[joypad] &= !button_bit(button),
        }
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<Frame, EnvError> {
        let len = (FRAME_WIDTH * FRAME_HEIGHT) as usize;
        let mut pixels = Vec::with_capacity(len);
        pixels.extend_from_slice(&self.ticks.to_le_bytes());
        pixels.push(self.held());
        let base = 0xc000 + (self.ticks % 0x100) as usize;
        pixels.extend((0..len - pixels.len()).map(|i| self.memory[(base + i) % MEMORY_SIZE]));
        Ok(Frame::new(FRAME_WIDTH, FRAME_HEIGHT, pixels))
    }

    fn serialize_state(&self) -> Result<Vec<u8>, EnvError> {
        let mut state = Vec::with_capacity(STATE_HEADER + MEMORY_SIZE);
        state.extend_from_slice(&self.ticks.to_le_bytes());
        state.extend_from_slice(&self.memory);
        Ok(state)
    }

    fn deserialize_state(&mut self, blob: &[u8]) -> Result<(), EnvError> {
        if blob.len() != STATE_HEADER + MEMORY_SIZE {
            return Err(EnvError::SerializationError(format!(
                "{}: state blob has {} bytes, expected {}",
                self.rom,
                blob.len(),
                STATE_HEADER + MEMORY_SIZE
            )));
        }
        self.ticks = state_tick(blob).unwrap_or_default();
        self.memory.copy_from_slice(&blob[STATE_HEADER..]);
        Ok(())
    }

    fn set_realtime_throttle(&mut self, enabled: bool) {
        self.throttled = enabled;
    }
}

/// Launches [`ScriptedEmulator`]s and tracks how many are alive.
#[derive(Default)]
pub struct ScriptedEmulatorFactory {
    live: Arc<AtomicUsize>,
    launched: AtomicUsize,
    faults: Mutex<HashMap<String, u64>>,
    refused: Mutex<HashSet<String>>,
}

impl ScriptedEmulatorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engines for `rom` fail once they have advanced `ticks` steps.
    ///
    /// `rom` is the file stem, e.g. `"tetris"` for `roms/tetris.gb`.
    pub fn fail_after(&self, rom: &str, ticks: u64) {
        lock(&self.faults).insert(rom.to_string(), ticks);
    }

    /// Clears injected engine faults for `rom`.
    pub fn heal(&self, rom: &str) {
        lock(&self.faults).remove(rom);
    }

    /// Refuses to launch `rom` at all.
    pub fn refuse_launch(&self, rom: &str) {
        lock(&self.refused).insert(rom.to_string());
    }

    /// Engines currently alive.
    pub fn live_engines(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Engines launched so far.
    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

impl EmulatorFactory for ScriptedEmulatorFactory {
    fn launch(&self, rom: &Path) -> Result<Box<dyn Emulator>, EnvError> {
        let stem = rom
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        if lock(&self.refused).contains(&stem) {
            return Err(EnvError::engine(format!("failed to load rom {}", rom.display())));
        }

        let fail_after = lock(&self.faults).get(&stem).copied();
        self.launched.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedEmulator::new(stem, fail_after, self.live.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launch(factory: &ScriptedEmulatorFactory) -> Box<dyn Emulator> {
        factory.launch(Path::new("roms/tetris.gb")).unwrap()
    }

    #[test]
    fn test_state_roundtrip_restores_ticks_and_memory() {
        let factory = ScriptedEmulatorFactory::new();
        let mut engine = launch(&factory);
        for _ in 0..50 {
            engine.advance().unwrap();
        }
        engine.write_byte(0xd158, 0x42).unwrap();
        let state = engine.serialize_state().unwrap();
        assert_eq!(state_tick(&state), Some(50));

        let mut other = launch(&factory);
        other.deserialize_state(&state).unwrap();
        assert_eq!(other.read_byte(0xd158).unwrap(), 0x42);
        assert_eq!(other.serialize_state().unwrap(), state);
    }

    #[test]
    fn test_inputs_drive_joypad_register() {
        let factory = ScriptedEmulatorFactory::new();
        let mut engine = launch(&factory);

        engine.send_input(InputEvent::Press(Button::Up)).unwrap();
        assert_eq!(engine.read_byte(JOYPAD_ADDR).unwrap(), 0x04);
        engine.send_input(InputEvent::Release(Button::Up)).unwrap();
        assert_eq!(engine.read_byte(JOYPAD_ADDR).unwrap(), 0);
        assert_eq!(engine.read_byte(LAST_PRESS_ADDR).unwrap(), 0x04);
    }

    #[test]
    fn test_frames_carry_tick() {
        let factory = ScriptedEmulatorFactory::new();
        let mut engine = launch(&factory);
        engine.advance().unwrap();
        let frame = engine.capture_frame().unwrap();
        assert_eq!(frame_tick(&frame), Some(1));
        assert_eq!(frame.pixels.len(), (FRAME_WIDTH * FRAME_HEIGHT) as usize);
    }

    #[test]
    fn test_fault_injection_counts_from_launch() {
        let factory = ScriptedEmulatorFactory::new();
        factory.fail_after("tetris", 3);
        let mut engine = launch(&factory);
        for _ in 0..3 {
            engine.advance().unwrap();
        }
        assert!(engine.advance().is_err());
    }

    #[test]
    fn test_rejects_truncated_state() {
        let factory = ScriptedEmulatorFactory::new();
        let mut engine = launch(&factory);
        assert!(matches!(
            engine.deserialize_state(&[1, 2, 3]),
            Err(EnvError::SerializationError(_))
        ));
    }

    #[test]
    fn test_live_counter_tracks_drop() {
        let factory = ScriptedEmulatorFactory::new();
        let a = launch(&factory);
        let b = launch(&factory);
        assert_eq!(factory.live_engines(), 2);
        drop(a);
        assert_eq!(factory.live_engines(), 1);
        drop(b);
        assert_eq!(factory.live_engines(), 0);
        assert_eq!(factory.launched(), 2);
    }

    #[test]
    fn test_refused_launch() {
        let factory = ScriptedEmulatorFactory::new();
        factory.refuse_launch("tetris");
        assert!(factory.launch(Path::new("roms/tetris.gb")).is_err());
        assert_eq!(factory.live_engines(), 0);
    }
}
