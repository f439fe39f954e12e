//! Routing topology and live path discovery

mod node;
mod routing;

pub use node::{Direction, Node, NodeId, NodeKind};
pub use routing::{GraphBuilder, Path, RoutingGraph};
