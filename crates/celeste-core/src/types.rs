use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::schema::SchemaVersion;

// ---------------------------------------------------------------------------
// EpisodeId
// ---------------------------------------------------------------------------

/// Opaque episode identifier issued by a policy source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpisodeId(String);

impl EpisodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fresh random id: 16 hex digits drawn from `rng`.
    pub fn random(rng: &mut impl rand::RngCore) -> Self {
        Self(format!("{:016x}", rng.next_u64()))
    }

    /// `true` before the first episode has been issued.
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for EpisodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EpisodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for EpisodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// VisionGrid
// ---------------------------------------------------------------------------

/// Square grid of entity/terrain codes centred on the player.
///
/// Serialises as a nested JSON array (row-major). Shape is not checked
/// here; [`Schema::observe`](crate::schema::Schema::observe) builds grids of
/// the right side length and [`ObservationSpace::contains`] rejects the rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VisionGrid {
    rows: Vec<Vec<u8>>,
}

impl VisionGrid {
    /// All-zero grid of side length `size`.
    pub fn empty(size: usize) -> Self {
        Self {
            rows: vec![vec![0; size]; size],
        }
    }

    pub const fn from_rows(rows: Vec<Vec<u8>>) -> Self {
        Self { rows }
    }

    /// Number of rows.
    pub const fn side(&self) -> usize {
        self.rows.len()
    }

    pub fn is_square(&self) -> bool {
        let side = self.side();
        self.rows.iter().all(|row| row.len() == side)
    }

    pub fn get(&self, row: usize, col: usize) -> Option<u8> {
        self.rows.get(row).and_then(|r| r.get(col)).copied()
    }

    pub fn rows(&self) -> &[Vec<u8>] {
        &self.rows
    }

    /// Cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = u8> + '_ {
        self.rows.iter().flat_map(|row| row.iter().copied())
    }
}

// ---------------------------------------------------------------------------
// Observation revisions
// ---------------------------------------------------------------------------

/// First schema revision: 10x10 vision, no positional keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationV1 {
    pub can_dash: bool,
    pub map_entities_vision: VisionGrid,
    pub speed_x_y: [f32; 2],
    pub stamina: f32,
}

/// Second schema revision: 20x20 vision, movement flags, position and target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationV2 {
    pub can_dash: bool,
    pub is_climbing: bool,
    pub map_entities_vision: VisionGrid,
    pub on_ground: bool,
    pub position: [f32; 2],
    pub speed_x_y: [f32; 2],
    pub stamina: f32,
    pub target: [f32; 2],
}

/// Third schema revision: 40x40 vision plus the camera's screen position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationV3 {
    pub can_dash: bool,
    pub is_climbing: bool,
    pub map_entities_vision: VisionGrid,
    pub on_ground: bool,
    pub position: [f32; 2],
    pub screen_position: [f32; 2],
    pub speed_x_y: [f32; 2],
    pub stamina: f32,
    pub target: [f32; 2],
}

// ---------------------------------------------------------------------------
// Observation
// ---------------------------------------------------------------------------

/// One tick's observation, tagged with the schema revision that produced it.
///
/// Fields are declared in key order so the serialised JSON object matches
/// the ordered packing the learner applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "schema", rename_all = "snake_case")]
pub enum Observation {
    V1(ObservationV1),
    V2(ObservationV2),
    V3(ObservationV3),
}

const fn flag(value: bool) -> f32 {
    if value { 1.0 } else { 0.0 }
}

fn vision_values(grid: &VisionGrid) -> Vec<f32> {
    grid.cells().map(f32::from).collect()
}

impl Observation {
    /// Schema revision of this observation.
    pub const fn schema(&self) -> SchemaVersion {
        match self {
            Self::V1(_) => SchemaVersion::V1,
            Self::V2(_) => SchemaVersion::V2,
            Self::V3(_) => SchemaVersion::V3,
        }
    }

    pub const fn vision(&self) -> &VisionGrid {
        match self {
            Self::V1(o) => &o.map_entities_vision,
            Self::V2(o) => &o.map_entities_vision,
            Self::V3(o) => &o.map_entities_vision,
        }
    }

    pub const fn speed(&self) -> [f32; 2] {
        match self {
            Self::V1(o) => o.speed_x_y,
            Self::V2(o) => o.speed_x_y,
            Self::V3(o) => o.speed_x_y,
        }
    }

    pub const fn can_dash(&self) -> bool {
        match self {
            Self::V1(o) => o.can_dash,
            Self::V2(o) => o.can_dash,
            Self::V3(o) => o.can_dash,
        }
    }

    pub const fn stamina(&self) -> f32 {
        match self {
            Self::V1(o) => o.stamina,
            Self::V2(o) => o.stamina,
            Self::V3(o) => o.stamina,
        }
    }

    /// Player tile position. `None` for revisions without positional keys.
    pub const fn position(&self) -> Option<[f32; 2]> {
        match self {
            Self::V1(_) => None,
            Self::V2(o) => Some(o.position),
            Self::V3(o) => Some(o.position),
        }
    }

    /// Per-key flattened values, in key order.
    ///
    /// Booleans become `0.0`/`1.0`; the vision grid is row-major.
    pub fn features(&self) -> BTreeMap<&'static str, Vec<f32>> {
        let mut out = BTreeMap::new();
        match self {
            Self::V1(o) => {
                out.insert("can_dash", vec![flag(o.can_dash)]);
                out.insert("map_entities_vision", vision_values(&o.map_entities_vision));
                out.insert("speed_x_y", o.speed_x_y.to_vec());
                out.insert("stamina", vec![o.stamina]);
            }
            Self::V2(o) => {
                out.insert("can_dash", vec![flag(o.can_dash)]);
                out.insert("is_climbing", vec![flag(o.is_climbing)]);
                out.insert("map_entities_vision", vision_values(&o.map_entities_vision));
                out.insert("on_ground", vec![flag(o.on_ground)]);
                out.insert("position", o.position.to_vec());
                out.insert("speed_x_y", o.speed_x_y.to_vec());
                out.insert("stamina", vec![o.stamina]);
                out.insert("target", o.target.to_vec());
            }
            Self::V3(o) => {
                out.insert("can_dash", vec![flag(o.can_dash)]);
                out.insert("is_climbing", vec![flag(o.is_climbing)]);
                out.insert("map_entities_vision", vision_values(&o.map_entities_vision));
                out.insert("on_ground", vec![flag(o.on_ground)]);
                out.insert("position", o.position.to_vec());
                out.insert("screen_position", o.screen_position.to_vec());
                out.insert("speed_x_y", o.speed_x_y.to_vec());
                out.insert("stamina", vec![o.stamina]);
                out.insert("target", o.target.to_vec());
            }
        }
        out
    }

    /// All features concatenated in key order.
    pub fn flat(&self) -> Vec<f32> {
        self.features().into_values().flatten().collect()
    }

    /// Length of [`flat`](Self::flat).
    pub fn dim(&self) -> usize {
        self.features().values().map(Vec::len).sum()
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// Fixed-length tuple of small integers, one per control axis.
///
/// Serialises as a plain JSON list. All-zero is NOOP.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action {
    axes: Vec<u32>,
}

impl Action {
    pub const fn new(axes: Vec<u32>) -> Self {
        Self { axes }
    }

    /// NOOP action with `len` axes.
    pub fn noop(len: usize) -> Self {
        Self { axes: vec![0; len] }
    }

    pub const fn len(&self) -> usize {
        self.axes.len()
    }

    pub const fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    pub fn is_noop(&self) -> bool {
        self.axes.iter().all(|a| *a == 0)
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.axes
    }

    pub fn into_vec(self) -> Vec<u32> {
        self.axes
    }

    pub fn axis(&self, index: usize) -> u32 {
        self.axes.get(index).copied().unwrap_or(0)
    }

    /// Pad with NOOP axes up to `len`. Longer actions are left untouched.
    #[must_use]
    pub fn padded(mut self, len: usize) -> Self {
        if self.axes.len() < len {
            self.axes.resize(len, 0);
        }
        self
    }
}

impl From<Vec<u32>> for Action {
    fn from(axes: Vec<u32>) -> Self {
        Self::new(axes)
    }
}

// ---------------------------------------------------------------------------
// ObservationSpace
// ---------------------------------------------------------------------------

/// Shape and bounds of valid observations. Follows Gymnasium conventions.
///
/// `Box` bounds are stored flattened (one entry per element of `shape`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObservationSpace {
    Box {
        low: Vec<f32>,
        high: Vec<f32>,
        shape: Vec<usize>,
    },
    MultiBinary {
        n: usize,
    },
    Dict {
        spaces: BTreeMap<String, Self>,
    },
}

impl ObservationSpace {
    /// Box with uniform bounds.
    pub fn uniform_box(low: f32, high: f32, shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self::Box {
            low: vec![low; len],
            high: vec![high; len],
            shape,
        }
    }

    pub fn shape(&self) -> Vec<usize> {
        match self {
            Self::Box { shape, .. } => shape.clone(),
            Self::MultiBinary { n } => vec![*n],
            Self::Dict { .. } => vec![], // composite; query children
        }
    }

    pub fn size(&self) -> usize {
        match self {
            Self::Dict { spaces } => spaces.values().map(Self::size).sum(),
            _ => self.shape().iter().product(),
        }
    }

    /// Check flattened values against a leaf space. Always `false` for `Dict`.
    #[allow(clippy::float_cmp)]
    pub fn contains_values(&self, values: &[f32]) -> bool {
        match self {
            Self::Box { low, high, .. } => {
                values.len() == low.len()
                    && values
                        .iter()
                        .zip(low.iter().zip(high.iter()))
                        .all(|(v, (l, h))| v >= l && v <= h)
            }
            Self::MultiBinary { n } => {
                values.len() == *n && values.iter().all(|v| *v == 0.0 || *v == 1.0)
            }
            Self::Dict { .. } => false,
        }
    }

    /// Check an observation against this space.
    ///
    /// A `Dict` space requires the observation's key set to match exactly.
    pub fn contains(&self, obs: &Observation) -> bool {
        match self {
            Self::Dict { spaces } => {
                let features = obs.features();
                features.len() == spaces.len()
                    && features.iter().all(|(key, values)| {
                        spaces
                            .get(*key)
                            .is_some_and(|space| space.contains_values(values))
                    })
            }
            leaf => leaf.contains_values(&obs.flat()),
        }
    }

    /// Validate, returning a [`ValidationError`] when the observation is outside.
    pub fn validate(&self, obs: &Observation) -> Result<(), ValidationError> {
        if self.contains(obs) {
            Ok(())
        } else {
            Err(ValidationError::ObservationOutsideSpace)
        }
    }
}

// ---------------------------------------------------------------------------
// ActionSpace
// ---------------------------------------------------------------------------

/// Multi-discrete action space: axis `i` takes values in `[0, nvec[i])`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpace {
    nvec: Vec<usize>,
}

impl ActionSpace {
    pub const fn new(nvec: Vec<usize>) -> Self {
        Self { nvec }
    }

    pub fn nvec(&self) -> &[usize] {
        &self.nvec
    }

    /// Number of axes.
    pub const fn len(&self) -> usize {
        self.nvec.len()
    }

    pub const fn is_empty(&self) -> bool {
        self.nvec.is_empty()
    }

    pub fn noop(&self) -> Action {
        Action::noop(self.nvec.len())
    }

    /// Sample a random action. Takes `&mut impl Rng` for determinism.
    #[allow(clippy::cast_possible_truncation)]
    pub fn sample(&self, rng: &mut impl rand::Rng) -> Action {
        Action::new(
            self.nvec
                .iter()
                .map(|n| rng.gen_range(0..*n) as u32)
                .collect(),
        )
    }

    pub fn contains(&self, action: &Action) -> bool {
        self.validate(action).is_ok()
    }

    pub fn validate(&self, action: &Action) -> Result<(), ValidationError> {
        if action.len() != self.nvec.len() {
            return Err(ValidationError::ActionDimMismatch {
                expected: self.nvec.len(),
                got: action.len(),
            });
        }
        for (axis, (value, max)) in action.as_slice().iter().zip(&self.nvec).enumerate() {
            if *value as usize >= *max {
                return Err(ValidationError::ActionOutOfRange {
                    axis,
                    value: *value,
                    max: *max,
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StepResult / ResetResult
// ---------------------------------------------------------------------------

/// Side-channel info attached to every step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepInfo {
    pub died: bool,
    pub finished_level: bool,
}

/// Result of `env.step(action)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub observation: Observation,
    pub reward: f32,
    /// Episode ended by death or level completion.
    pub terminated: bool,
    /// Always `false`: there is no step-count cutoff.
    pub truncated: bool,
    pub info: StepInfo,
}

impl StepResult {
    pub const fn is_done(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// Reset info. Carries nothing; kept for the Gymnasium `(obs, info)` shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetInfo {}

/// Result of `env.reset()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetResult {
    pub observation: Observation,
    pub info: ResetInfo,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
