//! Versioned observation/action schema.
//!
//! [`Schema`] pairs a [`SchemaVersion`] with the configured value ranges and
//! owns the single conversion from a raw [`GameTick`] into an
//! [`Observation`] for each revision. The observation and action spaces it
//! reports are what the learner packs arrays against, so they must agree
//! exactly with what [`Schema::observe`] produces.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, SchemaError};
use crate::termination::TerminationEvent;
use crate::types::{
    ActionSpace, Observation, ObservationSpace, ObservationV1, ObservationV2, ObservationV3,
    VisionGrid,
};

// ---------------------------------------------------------------------------
// SchemaVersion
// ---------------------------------------------------------------------------

/// Observation/action schema revision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVersion {
    /// 10x10 vision, four action axes with a three-way special move.
    V1,
    /// 20x20 vision, movement flags and positions, long jump added.
    #[default]
    V2,
    /// 40x40 vision, screen position, frame-delay action axis.
    V3,
}

impl SchemaVersion {
    /// Side length of the vision grid.
    pub const fn vision_size(self) -> usize {
        match self {
            Self::V1 => 10,
            Self::V2 => 20,
            Self::V3 => 40,
        }
    }

    /// Largest entity/terrain code a vision cell may hold.
    pub const fn entity_max(self) -> u8 {
        match self {
            Self::V1 => 30,
            Self::V2 | Self::V3 => 100,
        }
    }

    /// Number of values on the special-move axis.
    pub const fn special_moves(self) -> usize {
        match self {
            Self::V1 => 3,
            Self::V2 | Self::V3 => 4,
        }
    }

    /// Whether the action carries a trailing frame-delay bucket.
    pub const fn has_delay_axis(self) -> bool {
        matches!(self, Self::V3)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::V1 => "v1",
            Self::V2 => "v2",
            Self::V3 => "v3",
        }
    }
}

impl std::fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaVersion {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "v1" | "1" => Ok(Self::V1),
            "v2" | "2" => Ok(Self::V2),
            "v3" | "3" => Ok(Self::V3),
            other => Err(SchemaError::UnknownVersion(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// GameTick
// ---------------------------------------------------------------------------

/// Raw fields of one game tick as delivered by the game-interop layer.
///
/// Carries the union of every revision's inputs; each revision reads only
/// the fields it needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameTick {
    pub vision: Vec<Vec<i64>>,
    pub speed_x_y: [f32; 2],
    pub can_dash: bool,
    pub stamina: f32,
    pub death_flag: bool,
    pub finished_level: bool,
    pub target: [f32; 2],
    pub position: [f32; 2],
    pub screen_position: [f32; 2],
    pub is_climbing: bool,
    pub on_ground: bool,
}

impl GameTick {
    /// Quiet tick with an empty vision grid of side `size`.
    pub fn blank(size: usize) -> Self {
        Self {
            vision: vec![vec![0; size]; size],
            speed_x_y: [0.0; 2],
            can_dash: true,
            stamina: 1.0,
            death_flag: false,
            finished_level: false,
            target: [0.0; 2],
            position: [0.0; 2],
            screen_position: [0.0; 2],
            is_climbing: false,
            on_ground: true,
        }
    }

    /// Termination event encoded by this tick's flags.
    pub const fn termination(&self) -> TerminationEvent {
        TerminationEvent::from_flags(self.death_flag, self.finished_level)
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

fn default_position_range() -> [f32; 2] {
    [-10_000.0, 10_000.0]
}
fn default_speed_range() -> [f32; 2] {
    [-1000.0, 1000.0]
}
fn default_stamina_range() -> [f32; 2] {
    [-1.0, 1.0]
}
const fn default_delay_buckets() -> usize {
    4
}

/// Schema revision plus the value ranges its spaces are bounded by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub version: SchemaVersion,

    /// Bounds for `position`, `screen_position` and `target` components.
    #[serde(default = "default_position_range")]
    pub position_range: [f32; 2],

    /// Bounds for `speed_x_y` components.
    #[serde(default = "default_speed_range")]
    pub speed_range: [f32; 2],

    /// Bounds for the (already normalised) stamina value.
    #[serde(default = "default_stamina_range")]
    pub stamina_range: [f32; 2],

    /// Number of frame-delay buckets on the last action axis (V3 only).
    #[serde(default = "default_delay_buckets")]
    pub delay_buckets: usize,
}

impl Default for Schema {
    fn default() -> Self {
        Self::new(SchemaVersion::default())
    }
}

impl Schema {
    /// Schema for `version` with default ranges.
    pub fn new(version: SchemaVersion) -> Self {
        Self {
            version,
            position_range: default_position_range(),
            speed_range: default_speed_range(),
            stamina_range: default_stamina_range(),
            delay_buckets: default_delay_buckets(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, [low, high]) in [
            ("schema.position_range", self.position_range),
            ("schema.speed_range", self.speed_range),
            ("schema.stamina_range", self.stamina_range),
        ] {
            if low >= high || !low.is_finite() || !high.is_finite() {
                return Err(ConfigError::InvalidRange {
                    field: field.into(),
                    low,
                    high,
                });
            }
        }
        if self.version.has_delay_axis() && self.delay_buckets == 0 {
            return Err(ConfigError::invalid("schema.delay_buckets", "must be >= 1"));
        }
        Ok(())
    }

    /// Dict observation space matching [`observe`](Self::observe) output.
    pub fn observation_space(&self) -> ObservationSpace {
        let size = self.version.vision_size();
        let flag = || ObservationSpace::MultiBinary { n: 1 };
        let pair = |[low, high]: [f32; 2]| ObservationSpace::uniform_box(low, high, vec![2]);

        let mut spaces = BTreeMap::new();
        spaces.insert("can_dash".to_string(), flag());
        spaces.insert(
            "map_entities_vision".to_string(),
            ObservationSpace::uniform_box(
                0.0,
                f32::from(self.version.entity_max()),
                vec![size, size],
            ),
        );
        spaces.insert("speed_x_y".to_string(), pair(self.speed_range));
        spaces.insert(
            "stamina".to_string(),
            ObservationSpace::uniform_box(self.stamina_range[0], self.stamina_range[1], vec![1]),
        );
        if self.version != SchemaVersion::V1 {
            spaces.insert("is_climbing".to_string(), flag());
            spaces.insert("on_ground".to_string(), flag());
            spaces.insert("position".to_string(), pair(self.position_range));
            spaces.insert("target".to_string(), pair(self.position_range));
        }
        if self.version == SchemaVersion::V3 {
            spaces.insert("screen_position".to_string(), pair(self.position_range));
        }
        ObservationSpace::Dict { spaces }
    }

    /// Multi-discrete action space: vertical, horizontal, special move, grab,
    /// and for V3 the frame-delay bucket.
    pub fn action_space(&self) -> ActionSpace {
        let mut nvec = vec![3, 3, self.version.special_moves(), 2];
        if self.version.has_delay_axis() {
            nvec.push(self.delay_buckets);
        }
        ActionSpace::new(nvec)
    }

    /// Number of action axes.
    pub const fn action_len(&self) -> usize {
        if self.version.has_delay_axis() { 5 } else { 4 }
    }

    /// Convert a raw tick into this revision's observation.
    ///
    /// Continuous values are clamped into their configured ranges; vision
    /// codes outside `[0, ENTITY_MAX]` and mis-shaped grids are rejected.
    pub fn observe(&self, tick: &GameTick) -> Result<Observation, SchemaError> {
        let vision = self.vision(&tick.vision)?;
        Ok(self.assemble(tick, vision))
    }

    /// All-zero observation for this revision.
    pub fn blank_observation(&self) -> Observation {
        let size = self.version.vision_size();
        self.assemble(&GameTick::blank(size), VisionGrid::empty(size))
    }

    fn assemble(&self, tick: &GameTick, vision: VisionGrid) -> Observation {
        let stamina = clamp_to(tick.stamina, self.stamina_range);
        let speed_x_y = clamp_pair(tick.speed_x_y, self.speed_range);
        // A dead player is never on the ground.
        let on_ground = tick.on_ground && !tick.death_flag;
        match self.version {
            SchemaVersion::V1 => Observation::V1(ObservationV1 {
                can_dash: tick.can_dash,
                map_entities_vision: vision,
                speed_x_y,
                stamina,
            }),
            SchemaVersion::V2 => Observation::V2(ObservationV2 {
                can_dash: tick.can_dash,
                is_climbing: tick.is_climbing,
                map_entities_vision: vision,
                on_ground,
                position: clamp_pair(tick.position, self.position_range),
                speed_x_y,
                stamina,
                target: clamp_pair(tick.target, self.position_range),
            }),
            SchemaVersion::V3 => Observation::V3(ObservationV3 {
                can_dash: tick.can_dash,
                is_climbing: tick.is_climbing,
                map_entities_vision: vision,
                on_ground,
                position: clamp_pair(tick.position, self.position_range),
                screen_position: clamp_pair(tick.screen_position, self.position_range),
                speed_x_y,
                stamina,
                target: clamp_pair(tick.target, self.position_range),
            }),
        }
    }

    fn vision(&self, raw: &[Vec<i64>]) -> Result<VisionGrid, SchemaError> {
        let expected = self.version.vision_size();
        let max = self.version.entity_max();
        if raw.len() != expected {
            return Err(SchemaError::VisionShape {
                expected,
                rows: raw.len(),
                cols: raw.first().map_or(0, Vec::len),
            });
        }
        let mut rows = Vec::with_capacity(expected);
        for row in raw {
            if row.len() != expected {
                return Err(SchemaError::VisionShape {
                    expected,
                    rows: raw.len(),
                    cols: row.len(),
                });
            }
            let cells = row
                .iter()
                .map(|&value| {
                    u8::try_from(value)
                        .ok()
                        .filter(|code| *code <= max)
                        .ok_or(SchemaError::EntityOutOfRange { value, max })
                })
                .collect::<Result<Vec<u8>, _>>()?;
            rows.push(cells);
        }
        Ok(VisionGrid::from_rows(rows))
    }
}

/// Like `f32::clamp`, but never panics: an inverted range yields `high`
/// and NaN bounds or values fall back to the other operand.
fn clamp_to(value: f32, [low, high]: [f32; 2]) -> f32 {
    value.max(low).min(high)
}

fn clamp_pair([x, y]: [f32; 2], range: [f32; 2]) -> [f32; 2] {
    [clamp_to(x, range), clamp_to(y, range)]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_constants() {
        assert_eq!(SchemaVersion::V1.vision_size(), 10);
        assert_eq!(SchemaVersion::V2.vision_size(), 20);
        assert_eq!(SchemaVersion::V3.vision_size(), 40);
        assert_eq!(SchemaVersion::V1.entity_max(), 30);
        assert_eq!(SchemaVersion::V3.entity_max(), 100);
    }

    #[test]
    fn version_parses() {
        assert_eq!("v3".parse::<SchemaVersion>().unwrap(), SchemaVersion::V3);
        assert_eq!("V1".parse::<SchemaVersion>().unwrap(), SchemaVersion::V1);
        assert!("v9".parse::<SchemaVersion>().is_err());
    }

    #[test]
    fn action_spaces_per_revision() {
        assert_eq!(Schema::new(SchemaVersion::V1).action_space().nvec(), &[3, 3, 3, 2]);
        assert_eq!(Schema::new(SchemaVersion::V2).action_space().nvec(), &[3, 3, 4, 2]);
        assert_eq!(
            Schema::new(SchemaVersion::V3).action_space().nvec(),
            &[3, 3, 4, 2, 4]
        );
        assert_eq!(Schema::new(SchemaVersion::V3).action_len(), 5);
    }

    #[test]
    fn observe_matches_observation_space_for_every_revision() {
        for version in [SchemaVersion::V1, SchemaVersion::V2, SchemaVersion::V3] {
            let schema = Schema::new(version);
            let tick = GameTick::blank(version.vision_size());
            let obs = schema.observe(&tick).unwrap();
            assert_eq!(obs.schema(), version);
            assert!(
                schema.observation_space().contains(&obs),
                "{version} observation outside its space"
            );
            assert_eq!(schema.observation_space().size(), obs.dim());
        }
    }

    #[test]
    fn observe_clamps_continuous_values() {
        let schema = Schema::default();
        let mut tick = GameTick::blank(20);
        tick.speed_x_y = [5000.0, -5000.0];
        tick.stamina = 3.0;
        let obs = schema.observe(&tick).unwrap();
        assert_eq!(obs.speed(), [1000.0, -1000.0]);
        assert!((obs.stamina() - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn observe_rejects_wrong_vision_size() {
        let schema = Schema::default();
        let tick = GameTick::blank(10);
        let err = schema.observe(&tick).unwrap_err();
        assert!(matches!(err, SchemaError::VisionShape { expected: 20, .. }));
    }

    #[test]
    fn observe_rejects_ragged_vision() {
        let schema = Schema::new(SchemaVersion::V1);
        let mut tick = GameTick::blank(10);
        tick.vision[4].pop();
        let err = schema.observe(&tick).unwrap_err();
        assert_eq!(
            err,
            SchemaError::VisionShape {
                expected: 10,
                rows: 10,
                cols: 9
            }
        );
    }

    #[test]
    fn observe_rejects_out_of_range_entity() {
        let schema = Schema::new(SchemaVersion::V1);
        let mut tick = GameTick::blank(10);
        tick.vision[0][0] = 31;
        assert_eq!(
            schema.observe(&tick).unwrap_err(),
            SchemaError::EntityOutOfRange { value: 31, max: 30 }
        );
        tick.vision[0][0] = -1;
        assert!(schema.observe(&tick).is_err());
    }

    #[test]
    fn dead_player_is_not_on_ground() {
        let schema = Schema::default();
        let mut tick = GameTick::blank(20);
        tick.death_flag = true;
        let Observation::V2(obs) = schema.observe(&tick).unwrap() else {
            panic!("expected V2");
        };
        assert!(!obs.on_ground);
    }

    #[test]
    fn v1_space_has_no_positional_keys() {
        let space = Schema::new(SchemaVersion::V1).observation_space();
        let ObservationSpace::Dict { spaces } = space else {
            panic!("expected Dict");
        };
        assert!(!spaces.contains_key("position"));
        assert_eq!(spaces.len(), 4);
    }

    #[test]
    fn unvalidated_ranges_do_not_panic() {
        let schema = Schema {
            stamina_range: [110.0, 0.0],
            speed_range: [f32::NAN, 6.0],
            ..Schema::default()
        };
        let mut tick = GameTick::blank(schema.version.vision_size());
        tick.stamina = 50.0;
        tick.speed_x_y = [-9.0, f32::NAN];

        let obs = schema.observe(&tick).unwrap();
        assert!(obs.stamina().abs() < f32::EPSILON);
        assert_eq!(obs.speed(), [-9.0, 6.0]);
    }

    #[test]
    fn validate_rejects_inverted_range() {
        let mut schema = Schema::default();
        schema.speed_range = [10.0, -10.0];
        assert!(matches!(
            schema.validate(),
            Err(ConfigError::InvalidRange { .. })
        ));
    }

    #[test]
    fn tick_termination_flags() {
        let mut tick = GameTick::blank(10);
        assert_eq!(tick.termination(), TerminationEvent::Normal);
        tick.finished_level = true;
        assert_eq!(tick.termination(), TerminationEvent::FinishedLevel);
    }
}
