#![warn(missing_docs)]
//! Deterministic lockstep simulation: per-scope command queues, the tick
//! controller, owner contexts and catch-up.

pub mod bundle;
pub mod catchup;
pub mod dispatch;
pub mod hooks;
pub mod owner;
pub mod payload;
pub mod persist;
pub mod queue;
pub mod region;
pub mod tick;
pub mod world;

pub use bundle::{
    Area, Cell, Designation, DesignationTarget, RegionNotice, RegionStateBundle, Thing, ThingId,
    Zone, ZoneKind, STARTING_AREAS,
};
pub use catchup::{
    catch_up_region, BatchOutcome, CatchUpAbandoned, CatchUpConfig, CatchUpDriver, CatchUpHandle,
    CatchUpOutcome,
};
pub use dispatch::DispatchError;
pub use hooks::{NoopHooks, SimulationHooks};
pub use owner::{OwnerContextStack, OwnerScope, Party};
pub use payload::{CommandBody, DesignateTarget, DesignatorOrder};
pub use persist::{DocumentReader, DocumentWriter, JsonReader, JsonWriter, PersistError};
pub use queue::{CommandLog, QueueError, ScopeQueue};
pub use region::Region;
pub use tick::{FrameReport, Simulation, StepOutcome, StepReport, TickGate};
pub use world::{TimeSpeed, WorldState};
