//! The per-insertion element container.

use std::collections::HashMap;
use std::sync::Arc;

use chainlist_types::ChainName;

use crate::arena::LinkIdx;

/// Wraps one inserted element and its current chain memberships.
///
/// `heads` maps each chain name to the node's live link for that chain; its
/// size is the membership count. `pins` defers disposal across compound
/// operations (move/relink) whose intermediate state would otherwise drop
/// the last membership. A node is disposable exactly when both are empty.
#[derive(Debug)]
pub(crate) struct Node<T> {
    /// The element; taken when the node is disposed.
    pub element: Option<Arc<T>>,
    pub heads: HashMap<ChainName, LinkIdx>,
    pub pins: u32,
}

impl<T> Node<T> {
    pub fn new(element: Arc<T>) -> Self {
        Self {
            element: Some(element),
            heads: HashMap::new(),
            pins: 0,
        }
    }

    /// The node's live link for `chain`, if it is a member.
    #[must_use]
    pub fn live_link(&self, chain: &ChainName) -> Option<LinkIdx> {
        self.heads.get(chain).copied()
    }

    /// Whether the node's membership reached zero with no pin holding it.
    #[must_use]
    pub fn is_disposable(&self) -> bool {
        self.heads.is_empty() && self.pins == 0
    }
}
