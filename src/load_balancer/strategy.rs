//! Node selection strategies.

use crate::cluster::Node;

/// Picks one node out of the available nodes of a cluster.
///
/// `begin` and `done` bracket every dispatch to the chosen node, whether the
/// node came from `select` or from a sticky session.
pub trait DispatchStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Choose a node. `nodes` holds only available nodes, in cluster order.
    fn select(&self, cluster: &str, nodes: &[Node]) -> Option<Node>;

    fn begin(&self, _cluster: &str, _node: &Node) {}

    fn done(&self, _cluster: &str, _node: &Node) {}
}
