// celeste-core: Types, schema, traits, config and errors for the Celeste RL bridge.

pub mod config;
pub mod controls;
pub mod error;
pub mod schema;
pub mod termination;
pub mod traits;
pub mod types;

pub mod prelude {
    pub use crate::config::{
        BridgeConfig, CelesteConfig, ClientConfig, InferenceMode, LoggingConfig, RoutingConfig,
        ServerConfig,
    };
    pub use crate::controls::{Command, Controls};
    pub use crate::error::{
        CelesteError, ConfigError, PolicyCallError, SchemaError, ValidationError,
    };
    pub use crate::schema::{GameTick, Schema, SchemaVersion};
    pub use crate::termination::TerminationEvent;
    pub use crate::traits::{Policy, PolicySource};
    pub use crate::types::{
        Action, ActionSpace, EpisodeId, Observation, ObservationSpace, ResetInfo, ResetResult,
        StepInfo, StepResult, VisionGrid,
    };
}
