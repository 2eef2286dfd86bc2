//! Port interfaces consumed by the application layer

mod bus;
mod cluster;
mod control;
mod state;
mod supervisor;

pub use bus::{BusStream, EventBus, StatusSink};
pub use cluster::{ClusterGateway, Tunnel, TunnelSpec};
pub use control::{ClusterCatalog, ClusterControl, ConfigSource, LoginOutput};
pub use state::StateStore;
pub use supervisor::{Supervisor, SupervisorFactory};
