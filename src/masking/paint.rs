/// Mask painting: selected clusters become 1.0 pixels in a cumulative mask.

use std::collections::BTreeSet;

use ndarray::{Array4, ArrayView4};

use super::catalog::{IslandCatalog, NodeId};
use super::select::Cluster;
use crate::error::MaskError;

/// Paint every pixel of every selected cluster into a copy of `prior`.
///
/// Starts from zeros when there is no prior mask. Pixels are only ever set,
/// never cleared, so successive masks grow monotonically.
pub fn paint_mask(
    shape: (usize, usize, usize, usize),
    prior: Option<ArrayView4<'_, f32>>,
    clusters: &[Cluster],
    catalog: &IslandCatalog,
) -> Result<Array4<f32>, MaskError> {
    let mut mask = match prior {
        Some(p) if p.dim() != shape => {
            return Err(MaskError::DataShape(format!(
                "prior mask {:?} does not match residual {:?}",
                p.shape(),
                shape
            )))
        }
        Some(p) => p.to_owned(),
        None => Array4::zeros(shape),
    };

    // Working copies; painted nodes are dropped as their plane is handled.
    let mut pending: Vec<BTreeSet<NodeId>> = clusters
        .iter()
        .map(|c| c.tree.nodes().collect())
        .collect();

    for plane in 0..catalog.num_planes() {
        for nodes in pending.iter_mut() {
            // Nodes are ordered by plane, so this plane's nodes sit at the front
            while let Some(&node) = nodes.first() {
                if node.plane != plane {
                    break;
                }
                nodes.pop_first();
                for c in &catalog.island(node).pixels {
                    let Some(px) = mask.get_mut(c.index()) else {
                        return Err(MaskError::DataShape(format!(
                            "island pixel {:?} lies outside the mask {:?}",
                            c, shape
                        )));
                    };
                    *px = 1.0;
                }
            }
        }
    }

    Ok(mask)
}
