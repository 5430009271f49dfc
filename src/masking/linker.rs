/// Cross-plane linking: islands on neighbouring channels that overlap on the
/// sky are joined into one tree.

use std::collections::{BTreeMap, HashSet};

use super::catalog::{IslandCatalog, NodeId};
use crate::types::Coord;

/// Spectral neighbours examined for each node, in this order.
const PLANE_OFFSETS: [isize; 2] = [-1, 1];

/// Parent → children adjacency of one cluster, rooted at its brightest island.
#[derive(Clone, Debug, PartialEq)]
pub struct IslandTree {
    root: NodeId,
    children: BTreeMap<NodeId, Vec<NodeId>>,
}

impl IslandTree {
    pub fn new(root: NodeId) -> Self {
        let mut children = BTreeMap::new();
        children.insert(root, Vec::new());
        IslandTree { root, children }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.children.contains_key(&node)
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.children.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every node in the tree, ordered by (plane, index).
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    fn add_child(&mut self, parent: NodeId, child: NodeId) {
        self.children.entry(parent).or_default().push(child);
        self.children.insert(child, Vec::new());
    }
}

struct Frame {
    node: NodeId,
    /// Next entry of `PLANE_OFFSETS` to scan.
    stage: usize,
}

/// Grow `tree` from `start` over every live island reachable through sky overlap
/// on adjacent planes.
///
/// Neighbour planes are scanned one at a time; islands discovered on a plane are
/// expanded depth-first before the parent moves on to its next offset. An
/// explicit frame stack replaces recursion so deep cubes cannot overflow.
/// Nodes already in the tree are never added again.
pub fn build_tree(tree: &mut IslandTree, start: NodeId, catalog: &IslandCatalog) {
    if !tree.contains(start) {
        tree.children.insert(start, Vec::new());
    }

    let mut stack = vec![Frame { node: start, stage: 0 }];
    while let Some(Frame { node, stage }) = stack.pop() {
        let Some(&offset) = PLANE_OFFSETS.get(stage) else {
            continue;
        };
        stack.push(Frame {
            node,
            stage: stage + 1,
        });

        let Some(plane) = node.plane.checked_add_signed(offset) else {
            continue;
        };
        if plane >= catalog.num_planes() {
            continue;
        }

        let footprint: HashSet<(usize, usize, usize)> =
            catalog.island(node).pixels.iter().map(Coord::sky).collect();

        let found: Vec<NodeId> = catalog
            .live_nodes(plane)
            .filter(|&n| !tree.contains(n))
            .filter(|&n| {
                catalog
                    .island(n)
                    .pixels
                    .iter()
                    .any(|c| footprint.contains(&c.sky()))
            })
            .collect();

        for &child in &found {
            tree.add_child(node, child);
        }
        // Reverse so the first discovered child is expanded first
        for &child in found.iter().rev() {
            stack.push(Frame {
                node: child,
                stage: 0,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::masking::catalog::CatalogParams;
    use ndarray::Array4;

    /// Paint a 2-pixel vertical bar at (x, y..=y+1) on `chan`.
    fn bar(cube: &mut Array4<f32>, x: usize, y: usize, chan: usize, peak: f32) {
        cube[[x, y, 0, chan]] = peak;
        cube[[x, y + 1, 0, chan]] = peak * 0.9;
    }

    fn catalog_of(cube: &Array4<f32>) -> IslandCatalog {
        let params = CatalogParams {
            gate_ratio: 0.1,
            ..CatalogParams::default()
        };
        IslandCatalog::build(cube.view(), &params).unwrap()
    }

    #[test]
    fn test_chain_across_planes() {
        let mut cube = Array4::<f32>::zeros((10, 10, 1, 4));
        // Drifts one pixel per channel but keeps overlapping
        bar(&mut cube, 3, 3, 0, 5.0);
        bar(&mut cube, 3, 4, 1, 6.0);
        bar(&mut cube, 3, 5, 2, 10.0);
        bar(&mut cube, 3, 6, 3, 4.0);

        let catalog = catalog_of(&cube);
        let root = NodeId::new(2, 0);
        let mut tree = IslandTree::new(root);
        build_tree(&mut tree, root, &catalog);

        assert_eq!(tree.len(), 4);
        assert_eq!(tree.children(root), &[NodeId::new(1, 0), NodeId::new(3, 0)]);
        assert_eq!(tree.children(NodeId::new(1, 0)), &[NodeId::new(0, 0)]);
        assert!(tree.children(NodeId::new(3, 0)).is_empty());
    }

    #[test]
    fn test_empty_plane_breaks_chain() {
        let mut cube = Array4::<f32>::zeros((10, 10, 1, 3));
        bar(&mut cube, 3, 3, 0, 5.0);
        bar(&mut cube, 3, 3, 2, 5.0);

        let catalog = catalog_of(&cube);
        let root = NodeId::new(0, 0);
        let mut tree = IslandTree::new(root);
        build_tree(&mut tree, root, &catalog);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_diamond_adds_each_node_once() {
        let mut cube = Array4::<f32>::zeros((12, 12, 1, 3));
        // Plane 0: wide island A spanning x = 2..=6
        for x in 2..=6 {
            cube[[x, 5, 0, 0]] = 8.0;
        }
        // Plane 1: B over the left end, C over the right end
        bar(&mut cube, 2, 5, 1, 7.0);
        bar(&mut cube, 6, 5, 1, 6.0);
        // Plane 2: D spanning both B and C
        for x in 2..=6 {
            cube[[x, 6, 0, 2]] = 5.0;
        }

        let catalog = catalog_of(&cube);
        let a = NodeId::new(0, 0);
        let (b, c) = (NodeId::new(1, 0), NodeId::new(1, 1));
        let d = NodeId::new(2, 0);

        let mut tree = IslandTree::new(a);
        build_tree(&mut tree, a, &catalog);

        assert_eq!(tree.len(), 4);
        assert_eq!(tree.children(a), &[b, c]);
        assert_eq!(tree.children(b), &[d]);
        assert!(tree.children(c).is_empty(), "D already linked through B");
        let edges: usize = tree.nodes().map(|n| tree.children(n).len()).sum();
        assert_eq!(edges, tree.len() - 1, "tree, not a graph");
    }

    #[test]
    fn test_consumed_islands_not_linked() {
        let mut cube = Array4::<f32>::zeros((10, 10, 1, 2));
        bar(&mut cube, 3, 3, 0, 5.0);
        bar(&mut cube, 3, 3, 1, 6.0);

        let mut catalog = catalog_of(&cube);
        catalog.remove(NodeId::new(1, 0));
        let root = NodeId::new(0, 0);
        let mut tree = IslandTree::new(root);
        build_tree(&mut tree, root, &catalog);
        assert_eq!(tree.len(), 1);
    }
}
