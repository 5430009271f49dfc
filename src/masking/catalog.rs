/// Per-plane island inventory: detection, bookkeeping and consumption.

use ndarray::{s, ArrayView4};
use rayon::prelude::*;
use tracing::debug;

use super::flood::IslandSearch;
use crate::error::MaskError;
use crate::types::{Connectivity, Island, MAX_ISLANDS_PER_PLANE};

/// Address of an island inside a catalog: plane (channel) and encounter index.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub plane: usize,
    pub index: usize,
}

impl NodeId {
    pub fn new(plane: usize, index: usize) -> Self {
        NodeId { plane, index }
    }
}

/// Detection parameters for one catalog build.
#[derive(Clone, Debug, PartialEq)]
pub struct CatalogParams {
    /// Pixels above `gate_ratio × global_max` are candidate emission.
    pub gate_ratio: f32,
    /// Island cap per plane (size-1 islands do not count).
    pub max_islands: usize,
    /// Polarization plane to search.
    pub polarization: usize,
}

impl Default for CatalogParams {
    fn default() -> Self {
        CatalogParams {
            gate_ratio: super::sidelobe::DEFAULT_SIDELOBE_RATIO,
            max_islands: MAX_ISLANDS_PER_PLANE,
            polarization: 0,
        }
    }
}

/// Islands per plane in encounter order (brightest first).
///
/// Islands are never dropped from the arena; consuming one only clears its
/// live flag so clusters can still reach its pixels by `NodeId`.
#[derive(Clone, Debug)]
pub struct IslandCatalog {
    planes: Vec<Vec<Island>>,
    live: Vec<Vec<bool>>,
    global_max: f32,
    gate: f32,
}

impl IslandCatalog {
    /// Detect islands on every channel of `residual` at the chosen polarization.
    ///
    /// Channels are searched in parallel, each with its own search mask.
    pub fn build(residual: ArrayView4<'_, f32>, params: &CatalogParams) -> Result<Self, MaskError> {
        if !(params.gate_ratio > 0.0 && params.gate_ratio.is_finite()) {
            return Err(MaskError::config(
                "gate_ratio",
                format!("must be positive, got {}", params.gate_ratio),
            ));
        }
        if params.max_islands == 0 {
            return Err(MaskError::config("max_islands_per_plane", "must be at least 1"));
        }

        let (nx, ny, npol, nchan) = residual.dim();
        if nx == 0 || ny == 0 || npol == 0 || nchan == 0 {
            return Err(MaskError::DataShape(format!(
                "residual has a zero-sized axis: {:?}",
                residual.shape()
            )));
        }
        let pol = params.polarization;
        if pol >= npol {
            return Err(MaskError::DataShape(format!(
                "polarization {} out of range (grid has {})",
                pol, npol
            )));
        }

        let global_max = residual
            .slice(s![.., .., pol, ..])
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(f32::NEG_INFINITY, f32::max);

        if !(global_max > 0.0) {
            debug!(global_max, "no positive emission in residual");
            return Ok(IslandCatalog {
                planes: vec![Vec::new(); nchan],
                live: vec![Vec::new(); nchan],
                global_max,
                gate: 0.0,
            });
        }

        let gate = params.gate_ratio * global_max;

        let planes = (0..nchan)
            .into_par_iter()
            .map(|chan| detect_plane(residual, pol, chan, gate, params.max_islands))
            .collect::<Result<Vec<_>, MaskError>>()?;

        for (chan, islands) in planes.iter().enumerate() {
            if !islands.is_empty() {
                debug!(chan, islands = islands.len(), peak = islands[0].peak, "plane islands");
            }
        }

        let live = planes.iter().map(|p| vec![true; p.len()]).collect();
        Ok(IslandCatalog {
            planes,
            live,
            global_max,
            gate,
        })
    }

    pub fn num_planes(&self) -> usize {
        self.planes.len()
    }

    /// All islands detected on `plane`, consumed or not.
    pub fn plane(&self, plane: usize) -> &[Island] {
        &self.planes[plane]
    }

    pub fn island(&self, node: NodeId) -> &Island {
        &self.planes[node.plane][node.index]
    }

    pub fn is_live(&self, node: NodeId) -> bool {
        self.live
            .get(node.plane)
            .and_then(|p| p.get(node.index))
            .copied()
            .unwrap_or(false)
    }

    /// Live islands on `plane` in encounter order.
    pub fn live_nodes(&self, plane: usize) -> impl Iterator<Item = NodeId> + '_ {
        self.live[plane]
            .iter()
            .enumerate()
            .filter(|(_, &alive)| alive)
            .map(move |(index, _)| NodeId::new(plane, index))
    }

    pub(crate) fn remove(&mut self, node: NodeId) {
        self.live[node.plane][node.index] = false;
    }

    pub fn is_exhausted(&self) -> bool {
        self.live.iter().all(|p| p.iter().all(|&alive| !alive))
    }

    /// Brightest live island; ties go to the lowest plane, then the earliest entry.
    pub fn brightest(&self) -> Option<NodeId> {
        let mut best: Option<(NodeId, f32)> = None;
        for plane in 0..self.planes.len() {
            for node in self.live_nodes(plane) {
                let peak = self.island(node).peak;
                if best.map_or(true, |(_, b)| peak > b) {
                    best = Some((node, peak));
                }
            }
        }
        best.map(|(node, _)| node)
    }

    /// Island peaks per plane, in encounter order.
    pub fn island_peaks(&self) -> Vec<Vec<f32>> {
        self.planes
            .iter()
            .map(|p| p.iter().map(|i| i.peak).collect())
            .collect()
    }

    pub fn total_islands(&self) -> usize {
        self.planes.iter().map(Vec::len).sum()
    }

    /// Planes holding at least one island.
    pub fn occupied_planes(&self) -> Vec<usize> {
        self.planes
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.is_empty())
            .map(|(i, _)| i)
            .collect()
    }

    /// Maximum residual amplitude at the searched polarization.
    pub fn global_max(&self) -> f32 {
        self.global_max
    }

    /// Amplitude gate used for detection.
    pub fn gate(&self) -> f32 {
        self.gate
    }
}

/// Flood-fill one channel until its mask is exhausted or the cap is reached.
///
/// Isolated pixels are discarded without counting toward the cap.
fn detect_plane(
    residual: ArrayView4<'_, f32>,
    pol: usize,
    chan: usize,
    gate: f32,
    max_islands: usize,
) -> Result<Vec<Island>, MaskError> {
    let plane = residual.slice(s![.., .., pol..pol + 1, chan..chan + 1]);
    let search = IslandSearch::new(plane.mapv(|v| v > gate), plane, Connectivity::Cube)?;

    let mut islands = Vec::new();
    for mut island in search {
        if island.is_isolated() {
            continue;
        }
        // Slice-local coordinates back to cube coordinates
        island.peak_coord.pol = pol;
        island.peak_coord.chan = chan;
        for c in island.pixels.iter_mut() {
            c.pol = pol;
            c.chan = chan;
        }
        islands.push(island);
        if islands.len() == max_islands {
            break;
        }
    }
    Ok(islands)
}
