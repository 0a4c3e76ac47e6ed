//! Topology manager: the views known by a node, indexed by view number.

mod view;

pub use view::{View, root_for};

use std::{collections::BTreeMap, sync::Arc};

use crate::{NodeError, PeerId, ViewNumber};

/// Relation a peer holds with a node in a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Relation {
    /// Peer is the parent of the node
    Parent,
    /// Peer is a child of the node
    Child,
}

/// Number of views kept below the current one.
const RETAINED_PAST_VIEWS: u64 = 2;

/// Views of one node.
///
/// The initial view is given at construction, the following ones are derived from the host
/// list with [View::derive] so that every node computes the same tree without communicating.
#[derive(Debug, Clone)]
pub struct Views {
    node: PeerId,
    branching: usize,
    views: BTreeMap<ViewNumber, Arc<View>>,
    current: ViewNumber,
}

impl Views {
    /// Views starting with `initial`.
    pub fn new(node: PeerId, initial: View, branching: usize) -> Self {
        let current = initial.number();

        Self {
            node,
            branching,
            views: BTreeMap::from([(current, Arc::new(initial))]),
            current,
        }
    }

    /// Current view number
    pub fn current_number(&self) -> ViewNumber {
        self.current
    }

    /// Oldest view still known
    pub fn oldest_number(&self) -> ViewNumber {
        self.views
            .first_key_value()
            .map(|(number, _)| *number)
            .unwrap_or(self.current)
    }

    /// Current view
    pub fn current(&self) -> Option<Arc<View>> {
        self.get(self.current)
    }

    /// View `number`, if known
    pub fn get(&self, number: ViewNumber) -> Option<Arc<View>> {
        self.views.get(&number).cloned()
    }

    /// Parent of this node in `view`
    pub fn parent(&self, view: ViewNumber) -> Option<PeerId> {
        self.get(view).and_then(|v| v.parent().cloned())
    }

    /// Children of this node in `view`
    pub fn children(&self, view: ViewNumber) -> Vec<PeerId> {
        self.get(view)
            .map(|v| v.children().to_vec())
            .unwrap_or_default()
    }

    /// `child` and all its descendants in `view`
    pub fn subtree(&self, view: ViewNumber, child: &str) -> Vec<PeerId> {
        self.get(view)
            .map(|v| v.subtree(child))
            .unwrap_or_default()
    }

    /// Number of children of this node in `view`
    pub fn n_children(&self, view: ViewNumber) -> usize {
        self.get(view).map(|v| v.n_children()).unwrap_or_default()
    }

    /// Host list of `view`
    pub fn host_list_on(&self, view: ViewNumber) -> Vec<PeerId> {
        self.get(view)
            .map(|v| v.host_list().to_vec())
            .unwrap_or_default()
    }

    /// True if this node is the root of `view`
    pub fn is_root(&self, view: ViewNumber) -> bool {
        self.get(view).is_some_and(|v| v.is_root())
    }

    /// True if `peer` is the parent of this node in `view`
    pub fn is_parent(&self, view: ViewNumber, peer: &str) -> bool {
        self.get(view).is_some_and(|v| v.is_parent(peer))
    }

    /// True if `peer` is a child of this node in `view`
    pub fn is_child(&self, view: ViewNumber, peer: &str) -> bool {
        self.get(view).is_some_and(|v| v.is_child(peer))
    }

    /// True if `peer` holds `relation` with this node in `view`
    pub fn has_relation(&self, view: ViewNumber, peer: &str, relation: Relation) -> bool {
        match relation {
            Relation::Parent => self.is_parent(view, peer),
            Relation::Child => self.is_child(view, peer),
        }
    }

    /// Root of `view`, computed from the latest host list known before it.
    pub fn root_for(&self, view: ViewNumber) -> Option<PeerId> {
        let (_, base) = self.views.range(..=view).next_back().or(self.views.first_key_value())?;

        root_for(view, base.host_list()).cloned()
    }

    /// Derive `number` from the latest known host list and make it the current view.
    /// Older views beyond the retention window are forgotten.
    pub fn install(&mut self, number: ViewNumber) -> Result<Arc<View>, NodeError> {
        let host_list = self
            .views
            .range(..=number)
            .next_back()
            .or(self.views.last_key_value())
            .map(|(_, view)| view.host_list().to_vec())
            .unwrap_or_default();
        let view = View::derive(number, &host_list, &self.node, self.branching)
            .map(Arc::new)
            .ok_or_else(|| NodeError::NotInHostList {
                node: self.node.clone(),
                view: number,
            })?;

        self.views.insert(number, view.clone());
        self.current = self.current.max(number);
        let oldest = self.current.saturating_sub(RETAINED_PAST_VIEWS);
        self.views.retain(|known, _| *known >= oldest);

        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts() -> Vec<PeerId> {
        (0..4).map(|i| format!("node-{i}")).collect()
    }

    fn views_of(node: &str) -> Views {
        let initial = View::derive(0, &hosts(), node, 3).unwrap();
        Views::new(node.to_string(), initial, 3)
    }

    #[test]
    fn relations_in_the_initial_view() {
        let views = views_of("node-2");

        assert_eq!(views.parent(0), Some("node-0".to_string()));
        assert!(views.children(0).is_empty());
        assert_eq!(views.n_children(0), 0);
        assert!(views.has_relation(0, "node-0", Relation::Parent));
        assert!(!views.has_relation(0, "node-1", Relation::Parent));
        assert!(!views.is_root(0));
        assert_eq!(views.host_list_on(0), hosts());
    }

    #[test]
    fn unknown_view_holds_no_relation() {
        let views = views_of("node-2");

        assert!(!views.is_parent(7, "node-0"));
        assert!(views.children(7).is_empty());
    }

    #[test]
    fn independent_nodes_agree_on_the_root_of_any_view() {
        let all: Vec<Views> = hosts().iter().map(|h| views_of(h)).collect();

        for view in 0..9 {
            let expected = all[0].root_for(view);
            assert!(all.iter().all(|views| views.root_for(view) == expected));
            assert_eq!(expected, Some(format!("node-{}", view % 4)));
        }
    }

    #[test]
    fn install_moves_the_current_view_and_forgets_old_ones() {
        let mut views = views_of("node-1");

        let view = views.install(1).unwrap();
        assert!(view.is_root());
        assert!(views.is_root(1));

        views.install(2).unwrap();
        views.install(3).unwrap();

        assert_eq!(views.current_number(), 3);
        assert_eq!(views.oldest_number(), 1);
        assert!(views.get(0).is_none());
        assert!(views.get(1).is_some());
    }

    #[test]
    fn install_fails_for_a_node_outside_the_host_list() {
        let initial = View::new(0, None, vec![], hosts(), 0);
        let mut views = Views::new("stranger".to_string(), initial, 3);

        assert!(matches!(
            views.install(1),
            Err(NodeError::NotInHostList { .. })
        ));
    }
}
