//! Routing graph arena and live path discovery

use crate::error::{Result, RouteError};
use crate::format::SlotId;
use crate::graph::{Direction, Node, NodeId, NodeKind};
use parking_lot::RwLock;
use tracing::{debug, trace};

/// Ordered list of nodes reached from a start node over live edges
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    start: NodeId,
    direction: Direction,
    nodes: Vec<NodeId>,
}

impl Path {
    pub fn start(&self) -> NodeId {
        self.start
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Visited nodes in discovery order, start node first
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().copied()
    }
}

/// Builder for the static topology
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<Node>,
    edges: Vec<(NodeId, NodeId)>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node and return its arena id
    pub fn add_node(&mut self, name: impl Into<String>, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u16);
        self.nodes.push(Node::new(id, name, kind));
        id
    }

    /// Add a static downstream edge
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> &mut Self {
        self.edges.push((from, to));
        self
    }

    /// Validate edges and freeze the topology
    pub fn build(mut self) -> Result<RoutingGraph> {
        let count = self.nodes.len();
        let mut upstream = vec![Vec::new(); count];

        for &(from, to) in &self.edges {
            if from.index() >= count {
                return Err(RouteError::UnknownNode(from));
            }
            if to.index() >= count {
                return Err(RouteError::UnknownNode(to));
            }
            if !self.nodes[from.index()].downstream.contains(&to) {
                self.nodes[from.index()].downstream.push(to);
                upstream[to.index()].push(from);
            }
        }

        Ok(RoutingGraph {
            nodes: self.nodes,
            upstream,
            selections: RwLock::new(vec![None; count]),
        })
    }
}

/// Arena of processing nodes plus the mutable selector state
///
/// Topology is frozen at build time. Selector choices live behind a lock so
/// a control path may flip them while negotiations read them.
pub struct RoutingGraph {
    nodes: Vec<Node>,
    upstream: Vec<Vec<NodeId>>,
    selections: RwLock<Vec<Option<NodeId>>>,
}

impl RoutingGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id.index()).ok_or(RouteError::UnknownNode(id))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Look up a node by name
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().find(|n| n.name == name).map(|n| n.id)
    }

    /// DMA endpoint node serving a logical channel
    pub fn dma_node(&self, channel: u8, direction: Direction) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|n| {
                n.kind
                    == NodeKind::DmaEndpoint {
                        channel,
                        direction,
                    }
            })
            .map(|n| n.id)
    }

    /// Graph node carrying a format slot
    pub fn slot_node(&self, slot: SlotId) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|n| n.kind == NodeKind::FormatSlot { slot })
            .map(|n| n.id)
    }

    /// Static neighbours in the given walking direction
    fn neighbours(&self, id: NodeId, direction: Direction) -> &[NodeId] {
        match direction {
            Direction::Playback => &self.nodes[id.index()].downstream,
            Direction::Capture => &self.upstream[id.index()],
        }
    }

    fn is_adjacent(&self, a: NodeId, b: NodeId) -> bool {
        self.nodes[a.index()].downstream.contains(&b) || self.upstream[a.index()].contains(&b)
    }

    /// Point a selector at one of its neighbours, or disconnect it with `None`
    pub fn set_selection(&self, selector: NodeId, target: Option<NodeId>) -> Result<()> {
        let node = self.node(selector)?;
        if !node.kind.is_selector() {
            return Err(RouteError::InvalidConfig(format!(
                "node '{}' is not a selector",
                node.name
            )));
        }
        if let Some(target) = target {
            self.node(target)?;
            if !self.is_adjacent(selector, target) {
                return Err(RouteError::InvalidConfig(format!(
                    "selector '{}' has no edge to {}",
                    node.name, target
                )));
            }
        }

        self.selections.write()[selector.index()] = target;
        debug!("Selector {} -> {:?}", node.name, target);
        Ok(())
    }

    /// Current choice of a selector
    pub fn selection(&self, selector: NodeId) -> Option<NodeId> {
        self.selections
            .read()
            .get(selector.index())
            .copied()
            .flatten()
    }

    /// Walk live edges from `start` in `direction`
    ///
    /// Selectors pass the walk only to their selected neighbour; a selector
    /// with no live choice ends that branch. Every node appears at most once.
    /// Nothing is cached: selector state is re-read on every call.
    pub fn discover(&self, start: NodeId, direction: Direction) -> Result<Path> {
        self.node(start)?;

        let selections = self.selections.read();
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![start];
        let mut nodes = Vec::new();

        while let Some(id) = stack.pop() {
            if visited[id.index()] {
                continue;
            }
            visited[id.index()] = true;
            nodes.push(id);

            let node = &self.nodes[id.index()];
            let neighbours = self.neighbours(id, direction);

            if node.kind.is_selector() {
                match selections[id.index()] {
                    Some(next) if neighbours.contains(&next) => {
                        if !visited[next.index()] {
                            stack.push(next);
                        }
                    }
                    _ => trace!("Selector {} is dead for {}", node.name, direction),
                }
                continue;
            }

            // Reverse so the first listed neighbour is walked first
            for &next in neighbours.iter().rev() {
                if !visited[next.index()] {
                    stack.push(next);
                }
            }
        }

        trace!(
            "Discovered {} nodes from {} ({})",
            nodes.len(),
            self.nodes[start.index()].name,
            direction
        );

        Ok(Path {
            start,
            direction,
            nodes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dma(channel: u8) -> NodeKind {
        NodeKind::DmaEndpoint {
            channel,
            direction: Direction::Playback,
        }
    }

    #[test]
    fn test_follows_selected_edge_only() {
        let mut b = GraphBuilder::new();
        let rdma = b.add_node("RDMA0", dma(0));
        let mux = b.add_node("SPUS OUT0", NodeKind::Selector);
        let sifs0 = b.add_node("SIFS0", NodeKind::FormatSlot { slot: SlotId(0) });
        let sifs1 = b.add_node("SIFS1", NodeKind::FormatSlot { slot: SlotId(1) });
        b.connect(rdma, mux).connect(mux, sifs0).connect(mux, sifs1);
        let graph = b.build().unwrap();

        graph.set_selection(mux, Some(sifs1)).unwrap();
        let path = graph.discover(rdma, Direction::Playback).unwrap();
        assert_eq!(path.nodes(), &[rdma, mux, sifs1]);

        // Re-discovery observes the new choice
        graph.set_selection(mux, Some(sifs0)).unwrap();
        let path = graph.discover(rdma, Direction::Playback).unwrap();
        assert_eq!(path.nodes(), &[rdma, mux, sifs0]);
    }

    #[test]
    fn test_dead_selector_ends_path() {
        let mut b = GraphBuilder::new();
        let rdma = b.add_node("RDMA0", dma(0));
        let mux = b.add_node("SPUS OUT0", NodeKind::Selector);
        let sifs0 = b.add_node("SIFS0", NodeKind::FormatSlot { slot: SlotId(0) });
        b.connect(rdma, mux).connect(mux, sifs0);
        let graph = b.build().unwrap();

        let path = graph.discover(rdma, Direction::Playback).unwrap();
        assert_eq!(path.nodes(), &[rdma, mux]);
        assert!(!path.is_empty());
    }

    #[test]
    fn test_cycle_terminates() {
        let mut b = GraphBuilder::new();
        let a = b.add_node("A", dma(0));
        let x = b.add_node("X", NodeKind::ConversionUnit { channel: 0 });
        let y = b.add_node("Y", NodeKind::ConversionUnit { channel: 1 });
        b.connect(a, x).connect(x, y).connect(y, x).connect(y, a);
        let graph = b.build().unwrap();

        let path = graph.discover(a, Direction::Playback).unwrap();
        assert_eq!(path.len(), 3);

        let path = graph.discover(a, Direction::Capture).unwrap();
        assert_eq!(path.nodes(), &[a, y, x]);
    }

    #[test]
    fn test_capture_walks_upstream_through_selector() {
        let mut b = GraphBuilder::new();
        let uaif0 = b.add_node(
            "UAIF0",
            NodeKind::PhysicalInterface {
                override_format: None,
            },
        );
        let uaif1 = b.add_node(
            "UAIF1",
            NodeKind::PhysicalInterface {
                override_format: None,
            },
        );
        let nsrc = b.add_node("NSRC0", NodeKind::Selector);
        let wdma = b.add_node(
            "WDMA0",
            NodeKind::DmaEndpoint {
                channel: 0,
                direction: Direction::Capture,
            },
        );
        b.connect(uaif0, nsrc).connect(uaif1, nsrc).connect(nsrc, wdma);
        let graph = b.build().unwrap();

        graph.set_selection(nsrc, Some(uaif1)).unwrap();
        let path = graph.discover(wdma, Direction::Capture).unwrap();
        assert_eq!(path.nodes(), &[wdma, nsrc, uaif1]);
        assert_eq!(graph.dma_node(0, Direction::Capture), Some(wdma));
        assert_eq!(graph.dma_node(0, Direction::Playback), None);
    }

    #[test]
    fn test_selection_must_be_adjacent() {
        let mut b = GraphBuilder::new();
        let rdma = b.add_node("RDMA0", dma(0));
        let mux = b.add_node("MUX", NodeKind::Selector);
        let far = b.add_node("FAR", NodeKind::Selector);
        b.connect(rdma, mux);
        let graph = b.build().unwrap();

        assert!(graph.set_selection(mux, Some(far)).is_err());
        assert!(graph.set_selection(rdma, None).is_err());
        assert!(graph.discover(NodeId(42), Direction::Playback).is_err());
    }

    #[test]
    fn test_unknown_edge_rejected() {
        let mut b = GraphBuilder::new();
        let a = b.add_node("A", dma(0));
        b.connect(a, NodeId(9));
        assert!(matches!(b.build(), Err(RouteError::UnknownNode(NodeId(9)))));
    }
}
