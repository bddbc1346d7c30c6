//! Decoding of multi-discrete actions into host controls.
//!
//! Axis order is fixed: vertical, horizontal, special move, grab, and for V3
//! a trailing frame-delay bucket. Zero is NOOP on every axis.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::schema::{Schema, SchemaVersion};
use crate::types::Action;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vertical {
    #[default]
    Noop,
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Horizontal {
    #[default]
    Noop,
    Left,
    Right,
}

/// Special-move axis. `LongJump` only exists from V2 on; in V1 index 2 is
/// `Dash`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialMove {
    #[default]
    Noop,
    Jump,
    LongJump,
    Dash,
}

impl SpecialMove {
    fn from_index(index: u32, version: SchemaVersion) -> Self {
        match (version, index) {
            (_, 1) => Self::Jump,
            (SchemaVersion::V1, 2) | (_, 3) => Self::Dash,
            (_, 2) => Self::LongJump,
            _ => Self::Noop,
        }
    }

    const fn index(self, version: SchemaVersion) -> u32 {
        match (self, version) {
            (Self::Noop, _) => 0,
            (Self::Jump, _) => 1,
            (Self::LongJump, _) | (Self::Dash, SchemaVersion::V1) => 2,
            (Self::Dash, _) => 3,
        }
    }
}

/// Decoded controls for one tick, in the host's input conventions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Controls {
    pub vertical: Vertical,
    pub horizontal: Horizontal,
    pub special: SpecialMove,
    pub grab: bool,
    /// Frame-delay bucket (V3 only, 0 otherwise).
    pub delay_frames: u32,
}

impl Controls {
    /// Decode an action against `schema`.
    ///
    /// The action must already lie inside the schema's action space.
    pub fn decode(action: &Action, schema: &Schema) -> Result<Self, ValidationError> {
        schema.action_space().validate(action)?;
        let vertical = match action.axis(0) {
            1 => Vertical::Up,
            2 => Vertical::Down,
            _ => Vertical::Noop,
        };
        let horizontal = match action.axis(1) {
            1 => Horizontal::Left,
            2 => Horizontal::Right,
            _ => Horizontal::Noop,
        };
        Ok(Self {
            vertical,
            horizontal,
            special: SpecialMove::from_index(action.axis(2), schema.version),
            grab: action.axis(3) == 1,
            delay_frames: if schema.version.has_delay_axis() {
                action.axis(4)
            } else {
                0
            },
        })
    }

    /// Encode back into an action for `schema`.
    ///
    /// `LongJump` has no V1 encoding and degrades to `Jump`.
    pub fn encode(&self, schema: &Schema) -> Action {
        let special = match (self.special, schema.version) {
            (SpecialMove::LongJump, SchemaVersion::V1) => SpecialMove::Jump,
            (special, _) => special,
        };
        let mut axes = vec![
            match self.vertical {
                Vertical::Noop => 0,
                Vertical::Up => 1,
                Vertical::Down => 2,
            },
            match self.horizontal {
                Horizontal::Noop => 0,
                Horizontal::Left => 1,
                Horizontal::Right => 2,
            },
            special.index(schema.version),
            u32::from(self.grab),
        ];
        if schema.version.has_delay_axis() {
            axes.push(self.delay_frames);
        }
        Action::new(axes)
    }

    /// Horizontal stick value: left is -1, right is 1.
    pub const fn move_x(&self) -> i8 {
        match self.horizontal {
            Horizontal::Noop => 0,
            Horizontal::Left => -1,
            Horizontal::Right => 1,
        }
    }

    /// Vertical stick value: up is -1, down is 1 (screen coordinates).
    pub const fn move_y(&self) -> i8 {
        match self.vertical {
            Vertical::Noop => 0,
            Vertical::Up => -1,
            Vertical::Down => 1,
        }
    }

    pub const fn jump(&self) -> bool {
        matches!(self.special, SpecialMove::Jump)
    }

    pub const fn long_jump(&self) -> bool {
        matches!(self.special, SpecialMove::LongJump)
    }

    pub const fn dash(&self) -> bool {
        matches!(self.special, SpecialMove::Dash)
    }

    /// Apply a single named command on top of these controls.
    #[must_use]
    pub const fn with(mut self, command: Command) -> Self {
        match command {
            Command::Up => self.vertical = Vertical::Up,
            Command::Down => self.vertical = Vertical::Down,
            Command::Left => self.horizontal = Horizontal::Left,
            Command::Right => self.horizontal = Horizontal::Right,
            Command::Jump => self.special = SpecialMove::Jump,
            Command::LongJump => self.special = SpecialMove::LongJump,
            Command::Dash => self.special = SpecialMove::Dash,
            Command::Grab => self.grab = true,
            Command::Wait => {}
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// Named input used by replay scripts, e.g. `right+jump`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Up,
    Down,
    Left,
    Right,
    Jump,
    LongJump,
    Dash,
    Grab,
    Wait,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "up" => Self::Up,
            "down" => Self::Down,
            "left" => Self::Left,
            "right" => Self::Right,
            "jump" => Self::Jump,
            "long_jump" | "longjump" => Self::LongJump,
            "dash" => Self::Dash,
            "grab" => Self::Grab,
            "wait" | "noop" => Self::Wait,
            other => return Err(format!("unknown command '{other}'")),
        })
    }
}

/// Parse a `+`-joined command chord such as `right+dash`.
pub fn parse_chord(chord: &str) -> Result<Controls, String> {
    chord
        .split('+')
        .map(str::parse::<Command>)
        .try_fold(Controls::default(), |controls, command| Ok(controls.with(command?)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
