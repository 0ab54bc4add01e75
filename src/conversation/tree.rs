// src/conversation/tree.rs — Arena-indexed message tree and active-path selection
//
// A conversation is stored flat: every message carries a nullable parent
// reference. The tree rebuilds the forest at read time as an indexed
// arena (id → node plus a children adjacency in insertion order), which
// keeps `detach_subtree` an arena sweep and avoids ownership cycles.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::message::{Message, MessageId, Role};
use crate::credit::CreditCount;
use crate::infra::errors::WeftError;
use crate::provider::ToolCallRecord;

/// One step of the active path: the selected node and its index among
/// its siblings at that branch point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathStep {
    pub id: MessageId,
    pub sibling_index: usize,
}

#[derive(Debug, Default)]
pub struct MessageTree {
    nodes: HashMap<MessageId, Message>,
    /// Children of each node (None = root level), in insertion order.
    children: HashMap<Option<MessageId>, Vec<MessageId>>,
    /// Advisory pointer to the branch the user last viewed. If it points
    /// at a pruned or unknown message the walk falls back to the most
    /// recent child at every branch.
    last_active_leaf: Option<MessageId>,
}

impl MessageTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from an already-loaded message set, in stored order.
    ///
    /// Unlike [`attach`](Self::attach) this tolerates whatever the store
    /// returns, including several parentless roots.
    pub fn hydrate(
        messages: impl IntoIterator<Item = Message>,
        last_active_leaf: Option<MessageId>,
    ) -> Self {
        let mut tree = Self::new();
        for message in messages {
            tree.children
                .entry(message.parent)
                .or_default()
                .push(message.id);
            tree.nodes.insert(message.id, message);
        }
        tree.last_active_leaf = last_active_leaf;
        tree
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.nodes.get(&id)
    }

    pub fn last_active_leaf(&self) -> Option<MessageId> {
        self.last_active_leaf
    }

    // ─── Mutation ───────────────────────────────────────────────

    /// Insert a new message. The parent must already exist; a parentless
    /// message is accepted only as the very first message. This is what
    /// keeps the parent graph a forest by construction.
    pub fn attach(&mut self, message: Message) -> Result<MessageId, WeftError> {
        if self.nodes.contains_key(&message.id) {
            return Err(WeftError::DuplicateMessage {
                id: message.id.to_string(),
            });
        }
        match message.parent {
            None if !self.nodes.is_empty() => return Err(WeftError::RootExists),
            Some(parent) if !self.nodes.contains_key(&parent) => {
                return Err(WeftError::ParentNotFound {
                    id: parent.to_string(),
                })
            }
            _ => {}
        }

        let id = message.id;
        self.children.entry(message.parent).or_default().push(id);
        self.nodes.insert(id, message);
        Ok(id)
    }

    /// Remove a node and all its descendants. Returns the removed ids so
    /// the repository layer can delete them.
    pub fn detach_subtree(&mut self, id: MessageId) -> Vec<MessageId> {
        if !self.nodes.contains_key(&id) {
            return Vec::new();
        }

        let mut removed = Vec::new();
        let mut queue = vec![id];
        while let Some(current) = queue.pop() {
            if let Some(kids) = self.children.remove(&Some(current)) {
                queue.extend(kids);
            }
            if let Some(node) = self.nodes.remove(&current) {
                if let Some(siblings) = self.children.get_mut(&node.parent) {
                    siblings.retain(|s| *s != current);
                }
                removed.push(current);
            }
        }

        if let Some(leaf) = self.last_active_leaf {
            if removed.contains(&leaf) {
                self.last_active_leaf = None;
            }
        }
        removed
    }

    pub fn append_content(&mut self, id: MessageId, delta: &str) -> bool {
        match self.nodes.get_mut(&id) {
            Some(node) => {
                node.append_content(delta);
                true
            }
            None => false,
        }
    }

    pub fn append_reasoning(&mut self, id: MessageId, delta: &str) -> bool {
        match self.nodes.get_mut(&id) {
            Some(node) => {
                node.append_reasoning(delta);
                true
            }
            None => false,
        }
    }

    pub fn set_call(&mut self, id: MessageId, call: Option<ToolCallRecord>) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.call = call;
        }
    }

    /// Mark a streamed message terminal. Partial content already appended
    /// is retained, never rolled back.
    pub fn finish_message(&mut self, id: MessageId, cost: Option<CreditCount>) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.in_progress = false;
            if cost.is_some() {
                node.cost = cost;
            }
        }
    }

    /// Point the conversation at a freshly completed answer.
    pub fn set_active_leaf(&mut self, id: MessageId) {
        if self.nodes.contains_key(&id) {
            self.last_active_leaf = Some(id);
        }
    }

    // ─── Active path ────────────────────────────────────────────

    /// Select the single linear path to render.
    ///
    /// At every level the children of the current node are considered in
    /// insertion order. With a hint, the child lying on the hint's
    /// ancestor chain wins; otherwise (including a stale hint) the last
    /// child wins — most recent regeneration first.
    pub fn build_active_path(&self, hint: Option<MessageId>) -> Vec<PathStep> {
        let hint_chain = hint.and_then(|h| self.ancestor_set(h));

        let mut path = Vec::new();
        let mut parent: Option<MessageId> = None;
        loop {
            let Some(kids) = self.children.get(&parent) else {
                break;
            };
            if kids.is_empty() {
                break;
            }
            let index = hint_chain
                .as_ref()
                .and_then(|chain| kids.iter().position(|k| chain.contains(k)))
                .unwrap_or(kids.len() - 1);
            let selected = kids[index];
            path.push(PathStep {
                id: selected,
                sibling_index: index,
            });
            parent = Some(selected);
        }
        path
    }

    /// Walk the active path with the stored pointer as the default hint,
    /// updating the pointer when the resolved leaf is a completed
    /// assistant answer. Returns the path and, when the pointer moved,
    /// the new leaf for the caller to persist.
    pub fn resolve_active_path(
        &mut self,
        hint: Option<MessageId>,
    ) -> (Vec<PathStep>, Option<MessageId>) {
        let effective = hint.or(self.last_active_leaf);
        let path = self.build_active_path(effective);

        let mut updated = None;
        if let Some(step) = path.last() {
            let leaf = &self.nodes[&step.id];
            if Some(step.id) != self.last_active_leaf
                && leaf.role == Role::Assistant
                && !leaf.in_progress
            {
                debug!(leaf = %step.id, "active leaf moved");
                self.last_active_leaf = Some(step.id);
                updated = Some(step.id);
            }
        }
        (path, updated)
    }

    /// Ancestors of `id` from leaf to root, inclusive. None if unknown.
    pub fn ancestor_chain(&self, id: MessageId) -> Option<Vec<MessageId>> {
        if !self.nodes.contains_key(&id) {
            return None;
        }
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(c) = current {
            chain.push(c);
            current = self.nodes.get(&c).and_then(|n| n.parent);
        }
        Some(chain)
    }

    fn ancestor_set(&self, id: MessageId) -> Option<HashSet<MessageId>> {
        self.ancestor_chain(id).map(|c| c.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::message::Message;

    fn seed_abc(tree: &mut MessageTree) -> (MessageId, MessageId, MessageId) {
        let a = tree.attach(Message::user("A", None)).unwrap();
        let mut b = Message::assistant_placeholder(a, "gpt-4.1");
        b.append_content("B");
        b.in_progress = false;
        let b = tree.attach(b).unwrap();
        let mut c = Message::assistant_placeholder(a, "gpt-4.1");
        c.append_content("C");
        c.in_progress = false;
        let c = tree.attach(c).unwrap();
        (a, b, c)
    }

    #[test]
    fn test_empty_tree_empty_path() {
        let tree = MessageTree::new();
        assert!(tree.build_active_path(None).is_empty());
    }

    #[test]
    fn test_last_sibling_wins_without_hint() {
        let mut tree = MessageTree::new();
        let (a, _b, c) = seed_abc(&mut tree);
        let path = tree.build_active_path(None);
        assert_eq!(path.len(), 2);
        assert_eq!(path[0].id, a);
        assert_eq!(path[1].id, c);
        assert_eq!(path[1].sibling_index, 1);
    }

    #[test]
    fn test_hint_selects_named_branch() {
        let mut tree = MessageTree::new();
        let (a, b, _c) = seed_abc(&mut tree);
        let path = tree.build_active_path(Some(b));
        assert_eq!(path[0].id, a);
        assert_eq!(path[1].id, b);
        assert_eq!(path[1].sibling_index, 0);
    }

    #[test]
    fn test_stale_hint_falls_back_to_last_child() {
        let mut tree = MessageTree::new();
        let (_a, _b, c) = seed_abc(&mut tree);
        let stale = MessageId::new();
        let path = tree.build_active_path(Some(stale));
        assert_eq!(path.last().unwrap().id, c);
    }

    #[test]
    fn test_hint_deep_in_branch_selects_whole_branch() {
        let mut tree = MessageTree::new();
        let (_a, b, _c) = seed_abc(&mut tree);
        let d = tree.attach(Message::user("D", Some(b))).unwrap();
        let mut e = Message::assistant_placeholder(d, "gpt-4.1");
        e.in_progress = false;
        let e = tree.attach(e).unwrap();
        // Hinting at the deep leaf routes through B at the branch point.
        let path = tree.build_active_path(Some(e));
        let ids: Vec<_> = path.iter().map(|s| s.id).collect();
        assert!(ids.contains(&b));
        assert_eq!(*ids.last().unwrap(), e);
    }

    #[test]
    fn test_attach_then_path_round_trip() {
        let mut tree = MessageTree::new();
        let (_a, b, _c) = seed_abc(&mut tree);
        let d = tree.attach(Message::user("D", Some(b))).unwrap();
        let path = tree.build_active_path(Some(d));
        assert_eq!(path.last().unwrap().id, d);
    }

    #[test]
    fn test_path_length_equals_branch_depth() {
        let mut tree = MessageTree::new();
        let mut parent = tree.attach(Message::user("root", None)).unwrap();
        for i in 0..9 {
            let mut m = Message::assistant_placeholder(parent, "gpt-4.1");
            m.append_content(&format!("turn {i}"));
            m.in_progress = false;
            parent = tree.attach(m).unwrap();
        }
        assert_eq!(tree.build_active_path(None).len(), 10);
    }

    #[test]
    fn test_attach_rejects_unknown_parent() {
        let mut tree = MessageTree::new();
        tree.attach(Message::user("root", None)).unwrap();
        let err = tree
            .attach(Message::user("orphan", Some(MessageId::new())))
            .unwrap_err();
        assert!(matches!(err, WeftError::ParentNotFound { .. }));
    }

    #[test]
    fn test_attach_rejects_second_root() {
        let mut tree = MessageTree::new();
        tree.attach(Message::user("root", None)).unwrap();
        let err = tree.attach(Message::user("another", None)).unwrap_err();
        assert!(matches!(err, WeftError::RootExists));
    }

    #[test]
    fn test_attach_rejects_duplicate_id() {
        let mut tree = MessageTree::new();
        let root = Message::user("root", None);
        let dup = root.clone();
        tree.attach(root).unwrap();
        let err = tree.attach(dup).unwrap_err();
        assert!(matches!(err, WeftError::DuplicateMessage { .. }));
    }

    #[test]
    fn test_detach_subtree_sweeps_descendants() {
        let mut tree = MessageTree::new();
        let (a, b, c) = seed_abc(&mut tree);
        let d = tree.attach(Message::user("D", Some(b))).unwrap();
        let removed = tree.detach_subtree(b);
        assert_eq!(removed.len(), 2);
        assert!(removed.contains(&b) && removed.contains(&d));
        assert!(tree.contains(a) && tree.contains(c));
        // The walk now ends at the surviving sibling.
        assert_eq!(tree.build_active_path(None).last().unwrap().id, c);
    }

    #[test]
    fn test_detach_clears_dangling_pointer() {
        let mut tree = MessageTree::new();
        let (_a, _b, c) = seed_abc(&mut tree);
        tree.set_active_leaf(c);
        tree.detach_subtree(c);
        assert_eq!(tree.last_active_leaf(), None);
    }

    #[test]
    fn test_resolve_updates_pointer_for_assistant_leaf() {
        let mut tree = MessageTree::new();
        let (_a, b, _c) = seed_abc(&mut tree);
        let (path, updated) = tree.resolve_active_path(Some(b));
        assert_eq!(path.last().unwrap().id, b);
        assert_eq!(updated, Some(b));
        assert_eq!(tree.last_active_leaf(), Some(b));
        // Resolving again with the same hint is a no-op.
        let (_, updated) = tree.resolve_active_path(Some(b));
        assert_eq!(updated, None);
    }

    #[test]
    fn test_resolve_ignores_user_leaf() {
        let mut tree = MessageTree::new();
        let (_a, b, _c) = seed_abc(&mut tree);
        let d = tree.attach(Message::user("D", Some(b))).unwrap();
        let (path, updated) = tree.resolve_active_path(Some(d));
        assert_eq!(path.last().unwrap().id, d);
        assert_eq!(updated, None);
    }

    #[test]
    fn test_resolve_ignores_in_progress_placeholder() {
        let mut tree = MessageTree::new();
        let (a, _b, _c) = seed_abc(&mut tree);
        let placeholder = tree
            .attach(Message::assistant_placeholder(a, "gpt-4.1"))
            .unwrap();
        let (_, updated) = tree.resolve_active_path(Some(placeholder));
        assert_eq!(updated, None);
    }

    #[test]
    fn test_resolve_defaults_to_stored_pointer() {
        let mut tree = MessageTree::new();
        let (_a, b, _c) = seed_abc(&mut tree);
        tree.set_active_leaf(b);
        let (path, _) = tree.resolve_active_path(None);
        assert_eq!(path.last().unwrap().id, b);
    }

    #[test]
    fn test_hydrate_reconstructs_stored_order() {
        let mut source = MessageTree::new();
        let (a, _b, c) = seed_abc(&mut source);
        let messages: Vec<Message> = source
            .build_active_path(None)
            .iter()
            .map(|s| source.get(s.id).unwrap().clone())
            .collect();
        let tree = MessageTree::hydrate(messages, Some(c));
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.build_active_path(None).first().unwrap().id, a);
        assert_eq!(tree.last_active_leaf(), Some(c));
    }

    #[test]
    fn test_streaming_appends_visible_mid_flight() {
        let mut tree = MessageTree::new();
        let root = tree.attach(Message::user("q", None)).unwrap();
        let answer = tree
            .attach(Message::assistant_placeholder(root, "gpt-4.1"))
            .unwrap();
        tree.append_content(answer, "par");
        // A concurrent reader may observe the partial string; the graph
        // itself stays consistent.
        assert_eq!(tree.get(answer).unwrap().content, "par");
        assert_eq!(tree.build_active_path(None).last().unwrap().id, answer);
        tree.append_content(answer, "tial");
        tree.finish_message(answer, Some(CreditCount::new(1.5)));
        let msg = tree.get(answer).unwrap();
        assert_eq!(msg.content, "partial");
        assert!(!msg.in_progress);
        assert_eq!(msg.cost, Some(CreditCount::new(1.5)));
    }
}
