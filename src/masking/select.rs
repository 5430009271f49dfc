/// Greedy cluster selection: the N brightest non-overlapping emission features.

use tracing::debug;

use super::catalog::IslandCatalog;
use super::linker::{build_tree, IslandTree};

/// One selected emission feature.
#[derive(Clone, Debug, PartialEq)]
pub struct Cluster {
    /// Peak of the root island.
    pub peak: f32,
    pub tree: IslandTree,
}

/// Pick up to `npeak` clusters, brightest root first.
///
/// Every island linked into a cluster is consumed from `catalog`, so no island
/// belongs to two clusters. Stops early once the catalog is exhausted.
pub fn select_clusters(catalog: &mut IslandCatalog, npeak: usize) -> Vec<Cluster> {
    let mut clusters = Vec::new();
    while clusters.len() < npeak {
        let Some(root) = catalog.brightest() else {
            break;
        };
        let peak = catalog.island(root).peak;

        let mut tree = IslandTree::new(root);
        build_tree(&mut tree, root, catalog);
        for node in tree.nodes() {
            catalog.remove(node);
        }

        debug!(
            plane = root.plane,
            peak,
            islands = tree.len(),
            "selected cluster"
        );
        clusters.push(Cluster { peak, tree });
    }
    clusters
}
