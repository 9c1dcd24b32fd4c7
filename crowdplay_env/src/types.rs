//! Common types shared by the Crowdplay adapters and the session core.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Identity of a session: one per chat channel.
///
/// Supplied by the transport and treated as an opaque key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a user issuing commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallerId(pub u64);

impl std::fmt::Display for CallerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to a published ballot.
///
/// Uses UUID v4 so transports can mint handles without coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BallotId(pub Uuid);

impl BallotId {
    /// Creates a new random BallotId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BallotId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BallotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 chars for readability
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// A physical button on the emulated handheld.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Button {
    Up,
    Down,
    Left,
    Right,
    A,
    B,
    Start,
    Select,
}

/// An input event delivered to the emulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputEvent {
    Press(Button),
    Release(Button),
}

/// One entry of the ballot menu.
///
/// The declaration order of [`Action::MENU`] is the vote tie-break key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Up,
    Down,
    Left,
    Right,
    A,
    B,
    Start,
    Select,
    NoInput,
}

impl Action {
    /// The fixed ballot menu, in declaration order.
    pub const MENU: [Action; 9] = [
        Action::Up,
        Action::Down,
        Action::Left,
        Action::Right,
        Action::A,
        Action::B,
        Action::Start,
        Action::Select,
        Action::NoInput,
    ];

    /// The reaction glyph voters use for this action.
    pub fn glyph(&self) -> &'static str {
        match self {
            Action::Up => "⬆",
            Action::Down => "⬇",
            Action::Left => "⬅",
            Action::Right => "➡",
            Action::A => "🅰",
            Action::B => "🅱",
            Action::Start => "➖",
            Action::Select => "➕",
            Action::NoInput => "❌",
        }
    }

    /// Human-readable label for the controls listing.
    pub fn label(&self) -> &'static str {
        match self {
            Action::Up => "UP",
            Action::Down => "DOWN",
            Action::Left => "LEFT",
            Action::Right => "RIGHT",
            Action::A => "A BUTTON",
            Action::B => "B BUTTON",
            Action::Start => "START",
            Action::Select => "SELECT",
            Action::NoInput => "NO INPUT",
        }
    }

    /// Looks up an action by its reaction glyph.
    pub fn from_glyph(glyph: &str) -> Option<Action> {
        Action::MENU.iter().copied().find(|a| a.glyph() == glyph)
    }

    /// The button this action drives, if any.
    pub fn button(&self) -> Option<Button> {
        match self {
            Action::Up => Some(Button::Up),
            Action::Down => Some(Button::Down),
            Action::Left => Some(Button::Left),
            Action::Right => Some(Button::Right),
            Action::A => Some(Button::A),
            Action::B => Some(Button::B),
            Action::Start => Some(Button::Start),
            Action::Select => Some(Button::Select),
            Action::NoInput => None,
        }
    }

    /// The press/release pulse this action applies during a round.
    ///
    /// `NoInput` maps to `(None, None)`.
    pub fn pulse(&self) -> (Option<InputEvent>, Option<InputEvent>) {
        match self.button() {
            Some(button) => (
                Some(InputEvent::Press(button)),
                Some(InputEvent::Release(button)),
            ),
            None => (None, None),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Vote counts per action as reported by the transport.
///
/// A count of 1 is the ballot's own default marker, not a vote.
pub type Tallies = HashMap<Action, u32>;

/// Authorization level of a caller as judged by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthLevel {
    /// Channel/server administrator
    Admin,
    /// On the global allow-list
    Exempt,
    /// No command privileges
    None,
}

impl AuthLevel {
    /// Returns true if the caller may run session commands.
    pub fn may_command(&self) -> bool {
        matches!(self, AuthLevel::Admin | AuthLevel::Exempt)
    }
}

/// A still frame captured from the emulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Row-major RGBA pixels
    pub pixels: Vec<u8>,
}

impl Frame {
    /// Creates a frame from raw RGBA pixels.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }
}

/// An animated artifact ready for publishing.
///
/// Encoding into a concrete image format is the transport's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Frames in playback order; frame 0 doubles as the static preview
    pub frames: Vec<Frame>,

    /// Playback duration of each frame in milliseconds
    pub frame_duration_ms: u32,
}

impl Artifact {
    /// Returns the number of frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns true if the artifact has no frames.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// The static preview frame.
    pub fn preview(&self) -> Option<&Frame> {
        self.frames.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_menu_order_ends_with_no_input() {
        assert_eq!(Action::MENU.len(), 9);
        assert_eq!(Action::MENU[0], Action::Up);
        assert_eq!(Action::MENU[8], Action::NoInput);
    }

    #[test]
    fn test_glyph_lookup() {
        for action in Action::MENU {
            assert_eq!(Action::from_glyph(action.glyph()), Some(action));
        }
        assert_eq!(Action::from_glyph("🙂"), None);
    }

    #[test]
    fn test_pulse_pairs_press_with_release() {
        assert_eq!(
            Action::Start.pulse(),
            (
                Some(InputEvent::Press(Button::Start)),
                Some(InputEvent::Release(Button::Start))
            )
        );
        assert_eq!(Action::NoInput.pulse(), (None, None));
    }

    #[test]
    fn test_auth_levels() {
        assert!(AuthLevel::Admin.may_command());
        assert!(AuthLevel::Exempt.may_command());
        assert!(!AuthLevel::None.may_command());
    }
}
