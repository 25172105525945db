// pfslam_sim/src/prelude.rs

pub use crate::cli::Cli;
pub use crate::config::{RunConfig, ScenarioConfig};
pub use crate::error::{Result, SimError};
pub use crate::observer::{GateConfig, Observation, ScanObserver, SensorFrame};
pub use crate::pipeline::{run, DropNewestSender, RunSummary};
pub use crate::publish::{write_map, MapPublisher, OutputConfig, Publication};
pub use crate::sensors::{LidarModel, OdometryModel, SimulationRng};
pub use crate::world::{DriverConfig, Segment, WaypointDriver, World};
