//! Target format resolution over a discovered path

use crate::error::{Result, RouteError};
use crate::format::{PcmFormat, SlotId, SlotTable};
use crate::graph::{NodeKind, Path, RoutingGraph};
use tracing::debug;

/// Outcome of resolving a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// Slot that defined the format, if the path reached one
    pub slot: Option<SlotId>,
    pub format: PcmFormat,
}

/// Walks a path to its nearest format-defining node
///
/// Borrows the slot table mutably: master delegation and interface overrides
/// write back into the slots they touch.
pub struct FormatResolver<'a> {
    graph: &'a RoutingGraph,
    slots: &'a mut SlotTable,
}

impl<'a> FormatResolver<'a> {
    pub fn new(graph: &'a RoutingGraph, slots: &'a mut SlotTable) -> Self {
        Self { graph, slots }
    }

    /// Resolve the format the far end of `path` requires
    pub fn resolve(&mut self, path: &Path) -> Result<Resolution> {
        let slot = self.first_slot(path);
        let override_format = self.first_override(path);

        let Some(slot) = slot else {
            return match override_format {
                Some(format) => Ok(Resolution { slot: None, format }),
                None => Err(RouteError::PathIncomplete {
                    start: path.start(),
                    direction: path.direction(),
                }),
            };
        };

        let master = self.slots.get(slot)?.master;
        if let Some(master) = master {
            let format = self.resolve_master(master)?;
            debug!("{} follows master {}: {}", slot, master, format);
            self.slots.get_mut(slot)?.store(format);
        } else if let Some(format) = override_format {
            debug!("Interface override on {}: {}", slot, format);
            self.slots.get_mut(slot)?.store(format);
        }

        Ok(Resolution {
            slot: Some(slot),
            format: self.slots.get(slot)?.effective(),
        })
    }

    /// Resolve a master slot over its own freshly discovered path
    ///
    /// Delegation is one hop: the master's own master is not followed.
    fn resolve_master(&mut self, master: SlotId) -> Result<PcmFormat> {
        let direction = self.slots.get(master)?.direction;
        let node = self
            .graph
            .slot_node(master)
            .ok_or(RouteError::UnknownSlot(master))?;
        let path = self.graph.discover(node, direction)?;

        if let Some(format) = self.first_override(&path) {
            self.slots.get_mut(master)?.store(format);
        }
        Ok(self.slots.get(master)?.effective())
    }

    fn first_slot(&self, path: &Path) -> Option<SlotId> {
        path.iter().find_map(|id| match self.graph.node(id).ok()?.kind {
            NodeKind::FormatSlot { slot } => Some(slot),
            _ => None,
        })
    }

    fn first_override(&self, path: &Path) -> Option<PcmFormat> {
        path.iter().find_map(|id| match self.graph.node(id).ok()?.kind {
            NodeKind::PhysicalInterface { override_format } => override_format,
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FormatSlot;
    use crate::graph::{Direction, GraphBuilder, NodeId};

    struct Fixture {
        graph: RoutingGraph,
        slots: SlotTable,
        rdma: NodeId,
        wdma: NodeId,
    }

    /// RDMA0 -> SIFS0 -> UAIF0 (optionally overriding), and
    /// UAIF1 -> SIFM0 (slaved to SIFS0) -> WDMA0
    fn fixture(uaif_override: Option<PcmFormat>, floor: Option<PcmFormat>) -> Fixture {
        let mut slots = SlotTable::new();
        let mut sifs = FormatSlot::new(SlotId(0), "SIFS0", Direction::Playback, PcmFormat::new(44100, 16, 2));
        if let Some(floor) = floor {
            sifs = sifs.with_floor(floor);
        }
        let sifs_id = slots.push(sifs);
        let sifm_id = slots.push(
            FormatSlot::new(SlotId(0), "SIFM0", Direction::Capture, PcmFormat::new(16000, 16, 1))
                .with_master(sifs_id),
        );

        let mut b = GraphBuilder::new();
        let rdma = b.add_node(
            "RDMA0",
            NodeKind::DmaEndpoint {
                channel: 0,
                direction: Direction::Playback,
            },
        );
        let sifs = b.add_node("SIFS0", NodeKind::FormatSlot { slot: sifs_id });
        let uaif0 = b.add_node(
            "UAIF0",
            NodeKind::PhysicalInterface {
                override_format: uaif_override,
            },
        );
        let uaif1 = b.add_node(
            "UAIF1",
            NodeKind::PhysicalInterface {
                override_format: None,
            },
        );
        let sifm = b.add_node("SIFM0", NodeKind::FormatSlot { slot: sifm_id });
        let wdma = b.add_node(
            "WDMA0",
            NodeKind::DmaEndpoint {
                channel: 0,
                direction: Direction::Capture,
            },
        );
        b.connect(rdma, sifs)
            .connect(sifs, uaif0)
            .connect(uaif1, sifm)
            .connect(sifm, wdma);

        Fixture {
            graph: b.build().unwrap(),
            slots,
            rdma,
            wdma,
        }
    }

    fn resolve(f: &mut Fixture, start: NodeId, direction: Direction) -> Result<Resolution> {
        let path = f.graph.discover(start, direction)?;
        FormatResolver::new(&f.graph, &mut f.slots).resolve(&path)
    }

    #[test]
    fn test_resolves_nearest_slot() {
        let mut f = fixture(None, None);
        let rdma = f.rdma;
        let res = resolve(&mut f, rdma, Direction::Playback).unwrap();
        assert_eq!(res.slot, Some(SlotId(0)));
        assert_eq!(res.format, PcmFormat::new(44100, 16, 2));
    }

    #[test]
    fn test_result_never_below_floor() {
        let floor = PcmFormat::new(48000, 24, 2);
        for stored in [
            PcmFormat::new(8000, 16, 1),
            PcmFormat::new(96000, 16, 2),
            PcmFormat::new(48000, 32, 8),
        ] {
            let mut f = fixture(None, Some(floor));
            f.slots.get_mut(SlotId(0)).unwrap().store(stored);
            let rdma = f.rdma;
            let res = resolve(&mut f, rdma, Direction::Playback).unwrap();
            assert!(res.format.rate >= floor.rate);
            assert!(res.format.width >= floor.width);
            assert!(res.format.channels >= floor.channels);
        }
    }

    #[test]
    fn test_override_written_into_nearest_slot() {
        let forced = PcmFormat::new(16000, 16, 2);
        let mut f = fixture(Some(forced), None);
        let rdma = f.rdma;
        let res = resolve(&mut f, rdma, Direction::Playback).unwrap();
        assert_eq!(res.format, forced);
        assert_eq!(f.slots.get(SlotId(0)).unwrap().stored(), forced);
    }

    #[test]
    fn test_slave_copies_master_and_keeps_it() {
        let mut f = fixture(None, None);
        let wdma = f.wdma;
        let res = resolve(&mut f, wdma, Direction::Capture).unwrap();
        assert_eq!(res.slot, Some(SlotId(1)));
        assert_eq!(res.format, PcmFormat::new(44100, 16, 2));
        assert_eq!(f.slots.get(SlotId(1)).unwrap().stored(), PcmFormat::new(44100, 16, 2));
    }

    #[test]
    fn test_master_override_propagates_to_slave() {
        let forced = PcmFormat::new(32000, 24, 2);
        let mut f = fixture(Some(forced), None);
        let wdma = f.wdma;
        let res = resolve(&mut f, wdma, Direction::Capture).unwrap();
        assert_eq!(res.format, forced);
        assert_eq!(f.slots.get(SlotId(0)).unwrap().stored(), forced);
    }

    #[test]
    fn test_stored_format_round_trips() {
        let mut f = fixture(None, None);
        let committed = PcmFormat::new(96000, 32, 4);
        f.slots.get_mut(SlotId(0)).unwrap().store(committed);
        let rdma = f.rdma;
        let res = resolve(&mut f, rdma, Direction::Playback).unwrap();
        assert_eq!(res.format, committed);
    }

    #[test]
    fn test_no_target_is_path_incomplete() {
        let mut slots = SlotTable::new();
        let mut b = GraphBuilder::new();
        let rdma = b.add_node(
            "RDMA0",
            NodeKind::DmaEndpoint {
                channel: 0,
                direction: Direction::Playback,
            },
        );
        let mux = b.add_node("MUX", NodeKind::Selector);
        b.connect(rdma, mux);
        let graph = b.build().unwrap();

        let path = graph.discover(rdma, Direction::Playback).unwrap();
        let err = FormatResolver::new(&graph, &mut slots).resolve(&path).unwrap_err();
        assert_eq!(
            err,
            RouteError::PathIncomplete {
                start: rdma,
                direction: Direction::Playback
            }
        );
    }
}
