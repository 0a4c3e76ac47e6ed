use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{PeerId, ViewNumber};

/// Root of `view`: the host at index `view mod len(host_list)`.
pub fn root_for(view: ViewNumber, host_list: &[PeerId]) -> Option<&PeerId> {
    if host_list.is_empty() {
        return None;
    }
    let index = (view % host_list.len() as u64) as usize;

    host_list.get(index)
}

/// Tree topology seen by one node in one view. Never mutated: a topology change is a new view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    number: ViewNumber,
    parent: Option<PeerId>,
    children: Vec<PeerId>,
    host_list: Vec<PeerId>,
    height: u32,
    subtrees: BTreeMap<PeerId, Vec<PeerId>>,
}

impl View {
    /// View factory, `height` being the number of levels below this node.
    ///
    /// Each child is taken as a leaf until [View::with_subtree] says otherwise.
    pub fn new(
        number: ViewNumber,
        parent: Option<PeerId>,
        children: Vec<PeerId>,
        host_list: Vec<PeerId>,
        height: u32,
    ) -> Self {
        let subtrees = children
            .iter()
            .map(|child| (child.clone(), vec![child.clone()]))
            .collect();

        Self {
            number,
            parent,
            children,
            host_list,
            height,
            subtrees,
        }
    }

    /// Set the members of the subtree rooted at `child`, the child first.
    pub fn with_subtree(mut self, child: &str, members: Vec<PeerId>) -> Self {
        if self.is_child(child) {
            self.subtrees.insert(child.to_string(), members);
        }
        self
    }

    /// Derive the view of `node`: the host list rotated to start with [root_for] is laid out
    /// as a `branching`-ary heap.
    ///
    /// Returns `None` if the node is not in the host list.
    pub fn derive(
        number: ViewNumber,
        host_list: &[PeerId],
        node: &str,
        branching: usize,
    ) -> Option<Self> {
        let branching = branching.max(1);
        let len = host_list.len();
        let shift = (number % len.max(1) as u64) as usize;
        let position_in_list = host_list.iter().position(|host| host == node)?;
        let position = (position_in_list + len - shift) % len;
        let host_at = |heap_index: usize| host_list[(heap_index + shift) % len].clone();

        let parent = (position > 0).then(|| host_at((position - 1) / branching));
        let child_positions: Vec<usize> = (1..=branching)
            .map(|offset| position * branching + offset)
            .filter(|child| *child < len)
            .collect();
        let children = child_positions.iter().map(|child| host_at(*child)).collect();
        let subtrees = child_positions
            .iter()
            .map(|child| {
                let mut members = vec![*child];
                let mut next = 0;
                while next < members.len() {
                    let first = members[next] * branching + 1;
                    members.extend((first..first + branching).filter(|index| *index < len));
                    next += 1;
                }
                (
                    host_at(*child),
                    members.into_iter().map(host_at).collect(),
                )
            })
            .collect();

        let mut height = 0;
        let mut first_descendant = position;
        while first_descendant * branching + 1 < len {
            first_descendant = first_descendant * branching + 1;
            height += 1;
        }

        Some(Self {
            number,
            parent,
            children,
            host_list: host_list.to_vec(),
            height,
            subtrees,
        })
    }

    /// View number
    pub fn number(&self) -> ViewNumber {
        self.number
    }

    /// Parent of this node, `None` for the root
    pub fn parent(&self) -> Option<&PeerId> {
        self.parent.as_ref()
    }

    /// Children of this node
    pub fn children(&self) -> &[PeerId] {
        &self.children
    }

    /// `child` and all its descendants, the child first. Empty if `child` is not a child.
    pub fn subtree(&self, child: &str) -> Vec<PeerId> {
        self.subtrees.get(child).cloned().unwrap_or_default()
    }

    /// Number of children of this node
    pub fn n_children(&self) -> usize {
        self.children.len()
    }

    /// Ordered host list used for root rotation
    pub fn host_list(&self) -> &[PeerId] {
        &self.host_list
    }

    /// Levels of the subtree below this node
    pub fn height(&self) -> u32 {
        self.height
    }

    /// True if this node is the root
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// True if `peer` is the parent of this node
    pub fn is_parent(&self, peer: &str) -> bool {
        self.parent.as_deref() == Some(peer)
    }

    /// True if `peer` is a child of this node
    pub fn is_child(&self, peer: &str) -> bool {
        self.children.iter().any(|child| child == peer)
    }

    /// Root of the next view
    pub fn next_root(&self) -> Option<&PeerId> {
        root_for(self.number + 1, &self.host_list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(n: usize) -> Vec<PeerId> {
        (0..n).map(|i| format!("node-{i}")).collect()
    }

    #[test]
    fn root_for_rotates_over_the_host_list() {
        let hosts = hosts(4);

        assert_eq!(root_for(0, &hosts), Some(&hosts[0]));
        assert_eq!(root_for(1, &hosts), Some(&hosts[1]));
        assert_eq!(root_for(5, &hosts), Some(&hosts[1]));
        assert_eq!(root_for(3, &[]), None);
    }

    #[test]
    fn derived_view_of_four_hosts_is_a_root_with_three_leaves() {
        let hosts = hosts(4);

        let root = View::derive(0, &hosts, "node-0", 3).unwrap();
        let leaf = View::derive(0, &hosts, "node-2", 3).unwrap();

        assert!(root.is_root());
        assert_eq!(root.children(), &hosts[1..]);
        assert_eq!(root.height(), 1);
        assert!(leaf.is_parent("node-0"));
        assert_eq!(leaf.n_children(), 0);
        assert_eq!(leaf.height(), 0);
    }

    #[test]
    fn derived_view_starts_with_the_rotated_root() {
        let hosts = hosts(4);

        let new_root = View::derive(1, &hosts, "node-1", 3).unwrap();
        let former_root = View::derive(1, &hosts, "node-0", 3).unwrap();

        assert!(new_root.is_root());
        assert_eq!(
            new_root.children(),
            &["node-2".to_string(), "node-3".to_string(), "node-0".to_string()]
        );
        assert!(former_root.is_parent("node-1"));
    }

    #[test]
    fn derived_views_agree_on_parent_and_children() {
        let hosts = hosts(13);

        for number in 0..5 {
            let views: Vec<View> = hosts
                .iter()
                .map(|host| View::derive(number, &hosts, host, 2).unwrap())
                .collect();

            for (host, view) in hosts.iter().zip(views.iter()) {
                for child in view.children() {
                    let child_view = &views[hosts.iter().position(|h| h == child).unwrap()];
                    assert!(child_view.is_parent(host));
                }
            }
            assert_eq!(views.iter().filter(|view| view.is_root()).count(), 1);
        }
    }

    #[test]
    fn height_counts_the_deepest_level_below() {
        let hosts = hosts(7);

        assert_eq!(View::derive(0, &hosts, "node-0", 2).unwrap().height(), 2);
        assert_eq!(View::derive(0, &hosts, "node-1", 2).unwrap().height(), 1);
        assert_eq!(View::derive(0, &hosts, "node-6", 2).unwrap().height(), 0);
    }

    #[test]
    fn subtree_of_a_child_holds_all_its_descendants() {
        let hosts = hosts(7);

        let root = View::derive(0, &hosts, "node-0", 2).unwrap();
        let rotated = View::derive(1, &hosts, "node-1", 2).unwrap();

        assert_eq!(root.subtree("node-1"), vec!["node-1", "node-3", "node-4"]);
        assert_eq!(root.subtree("node-2"), vec!["node-2", "node-5", "node-6"]);
        assert_eq!(rotated.subtree("node-2"), vec!["node-2", "node-4", "node-5"]);
        assert!(root.subtree("node-3").is_empty());
    }

    #[test]
    fn explicit_view_takes_children_as_leaves() {
        let view = View::new(0, None, vec!["a".to_string()], vec![], 1)
            .with_subtree("a", vec!["a".to_string(), "b".to_string()])
            .with_subtree("b", vec!["b".to_string()]);

        assert_eq!(view.subtree("a"), vec!["a", "b"]);
        assert!(view.subtree("b").is_empty());
        assert_eq!(
            View::new(0, None, vec!["a".to_string()], vec![], 1).subtree("a"),
            vec!["a"]
        );
    }

    #[test]
    fn unknown_node_has_no_derived_view() {
        assert!(View::derive(0, &hosts(3), "stranger", 2).is_none());
    }
}
