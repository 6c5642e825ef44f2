//! The object store and the reverse-pointer index.

use std::sync::atomic::{AtomicI64, Ordering};

use log::{debug, warn};

use crate::elements::{Id, Node, Object, ObjKind, Relation, RoleTable, Way};
use crate::tree::IdTree;

/// Start value of the unique id counters. All ids synthesized by actions
/// count downwards from here; collisions with the input are the
/// responsibility of the source.
pub const UNIQUE_ID_START: i64 = -100_000_000_000;

/// A non-owning reference to a parent object in the reverse index.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RevRef {
    pub kind: ObjKind,
    pub id: Id,
}

impl RevRef {
    pub fn way(id: Id) -> RevRef {
        RevRef {
            kind: ObjKind::Way,
            id,
        }
    }

    pub fn relation(id: Id) -> RevRef {
        RevRef {
            kind: ObjKind::Relation,
            id,
        }
    }
}

/// The object store: three trie roots for nodes, ways and relations plus a
/// fourth trie of the same shape holding the reverse-pointer lists.
///
/// The store enforces at most one object per (kind, id); a later insert
/// replaces and returns the previous object.
#[derive(Debug)]
pub struct Store {
    nodes: IdTree<Object>,
    ways: IdTree<Object>,
    rels: IdTree<Object>,
    /// Reverse-pointer lists, one space per child kind. Nodes referenced by
    /// ways or relations live in the node space; way and relation members
    /// of relations live in their own spaces.
    rev: [IdTree<Vec<RevRef>>; 3],
    pub roles: RoleTable,
    next_node_id: AtomicI64,
    next_way_id: AtomicI64,
}

impl Default for Store {
    fn default() -> Store {
        Store::new()
    }
}

impl Store {
    pub fn new() -> Store {
        Store {
            nodes: IdTree::new(),
            ways: IdTree::new(),
            rels: IdTree::new(),
            rev: [IdTree::new(), IdTree::new(), IdTree::new()],
            roles: RoleTable::new(),
            next_node_id: AtomicI64::new(UNIQUE_ID_START),
            next_way_id: AtomicI64::new(UNIQUE_ID_START),
        }
    }

    fn tree(&self, kind: ObjKind) -> &IdTree<Object> {
        match kind {
            ObjKind::Node => &self.nodes,
            ObjKind::Way => &self.ways,
            ObjKind::Relation => &self.rels,
        }
    }

    fn tree_mut(&mut self, kind: ObjKind) -> &mut IdTree<Object> {
        match kind {
            ObjKind::Node => &mut self.nodes,
            ObjKind::Way => &mut self.ways,
            ObjKind::Relation => &mut self.rels,
        }
    }

    /// Allocates a fresh negative node id.
    pub fn unique_node_id(&self) -> Id {
        self.next_node_id.fetch_sub(1, Ordering::Relaxed)
    }

    /// Allocates a fresh negative id shared by ways and relations.
    pub fn unique_way_id(&self) -> Id {
        self.next_way_id.fetch_sub(1, Ordering::Relaxed)
    }

    /// Inserts an object, routed by its kind. Replaces and returns any
    /// previous object with the same (kind, id).
    pub fn put(&mut self, obj: impl Into<Object>) -> Option<Object> {
        let obj = obj.into();
        let (kind, id) = (obj.kind(), obj.id());
        self.tree_mut(kind).insert(id, obj)
    }

    pub fn get(&self, kind: ObjKind, id: Id) -> Option<&Object> {
        self.tree(kind).get(id)
    }

    pub fn get_mut(&mut self, kind: ObjKind, id: Id) -> Option<&mut Object> {
        self.tree_mut(kind).get_mut(id)
    }

    pub fn remove(&mut self, kind: ObjKind, id: Id) -> Option<Object> {
        self.tree_mut(kind).remove(id)
    }

    pub fn node(&self, id: Id) -> Option<&Node> {
        self.nodes.get(id).and_then(Object::as_node)
    }

    pub fn node_mut(&mut self, id: Id) -> Option<&mut Node> {
        match self.nodes.get_mut(id) {
            Some(Object::Node(n)) => Some(n),
            _ => None,
        }
    }

    pub fn way(&self, id: Id) -> Option<&Way> {
        self.ways.get(id).and_then(Object::as_way)
    }

    pub fn way_mut(&mut self, id: Id) -> Option<&mut Way> {
        match self.ways.get_mut(id) {
            Some(Object::Way(w)) => Some(w),
            _ => None,
        }
    }

    pub fn relation(&self, id: Id) -> Option<&Relation> {
        self.rels.get(id).and_then(Object::as_relation)
    }

    pub fn len(&self, kind: ObjKind) -> usize {
        self.tree(kind).len()
    }

    /// True if the store holds no objects of any kind.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.ways.is_empty() && self.rels.is_empty()
    }

    /// Iterates objects of one kind in canonical trie order.
    pub fn iter(&self, kind: ObjKind) -> impl Iterator<Item = (Id, &Object)> {
        self.tree(kind).iter()
    }

    /// Snapshot of all ids of one kind in canonical trie order. The engine
    /// dispatches on id snapshots so that actions may insert objects while
    /// a pass is running.
    pub fn ids(&self, kind: ObjKind) -> Vec<Id> {
        self.tree(kind).ids()
    }

    /// Adds `parent` to the reverse-pointer list of the child object. The
    /// operation is idempotent: a parent already on the list is suppressed.
    /// Returns false in that case.
    pub fn add_rev_ptr(&mut self, child: ObjKind, id: Id, parent: RevRef) -> bool {
        add_rev(&mut self.rev[child.index()], id, parent)
    }

    /// Removes `parent` from the reverse-pointer list of the child object.
    pub fn remove_rev_ptr(&mut self, child: ObjKind, id: Id, parent: RevRef) {
        if let Some(list) = self.rev[child.index()].get_mut(id) {
            list.retain(|r| *r != parent);
        }
    }

    /// The parents referencing the child object, or an empty slice.
    pub fn rev_list(&self, child: ObjKind, id: Id) -> &[RevRef] {
        self.rev[child.index()]
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Adds all node refs of a way to the reverse index. Missing nodes are
    /// logged and skipped.
    fn rev_index_way_nodes(rev: &mut IdTree<Vec<RevRef>>, nodes: &IdTree<Object>, way: &Way) {
        for &r in &way.refs {
            if nodes.get(r).is_none() {
                warn!("node {} in way {} does not exist", r, way.attr.id);
                continue;
            }
            add_rev(rev, r, RevRef::way(way.attr.id));
        }
    }

    /// Adds all members of a relation to the reverse index, each into the
    /// space of its kind.
    fn rev_index_rel_members(
        rev: &mut [IdTree<Vec<RevRef>>; 3],
        nodes: &IdTree<Object>,
        ways: &IdTree<Object>,
        rels: &IdTree<Object>,
        rel: &Relation,
    ) {
        let mut incomplete = 0;
        for m in &rel.members {
            let exists = match m.kind {
                ObjKind::Node => nodes.get(m.id).is_some(),
                ObjKind::Way => ways.get(m.id).is_some(),
                ObjKind::Relation => rels.get(m.id).is_some(),
            };
            if !exists {
                incomplete += 1;
                continue;
            }
            add_rev(
                &mut rev[m.kind.index()],
                m.id,
                RevRef::relation(rel.attr.id),
            );
        }
        if incomplete > 0 {
            debug!(
                "relation {} incomplete, {} members missing",
                rel.attr.id, incomplete
            );
        }
    }

    /// Builds the reverse-pointer index: ways first, then relations. Called
    /// by the engine after rule initialization when any rule requires it.
    pub fn build_rev_index(&mut self) {
        debug!("building reverse pointer index");
        let Store {
            nodes,
            ways,
            rels,
            rev,
            ..
        } = self;
        for (_, obj) in ways.iter() {
            if let Object::Way(w) = obj {
                Self::rev_index_way_nodes(&mut rev[ObjKind::Node.index()], nodes, w);
            }
        }
        for (_, obj) in rels.iter() {
            if let Object::Relation(r) = obj {
                Self::rev_index_rel_members(rev, nodes, ways, rels, r);
            }
        }
    }

    /// Inserts node ids into a way's ref list at `pos` and updates the
    /// reverse index for every inserted ref.
    pub fn insert_refs(&mut self, way_id: Id, node_ids: &[Id], pos: usize) {
        debug!("inserting nodes into way {} at index {}", way_id, pos);
        let Some(way) = self.way_mut(way_id) else {
            warn!("way {} does not exist", way_id);
            return;
        };
        let pos = pos.min(way.refs.len());
        for (i, &nid) in node_ids.iter().enumerate() {
            way.refs.insert(pos + i, nid);
        }
        for &nid in node_ids {
            self.add_rev_ptr(ObjKind::Node, nid, RevRef::way(way_id));
        }
    }
}

fn add_rev(rev: &mut IdTree<Vec<RevRef>>, id: Id, parent: RevRef) -> bool {
    match rev.get_mut(id) {
        Some(list) => {
            if list.contains(&parent) {
                false
            } else {
                list.push(parent);
                true
            }
        }
        None => {
            rev.insert(id, vec![parent]);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::Member;
    use crate::elements::RoleId;

    fn store_with_way() -> Store {
        let mut s = Store::new();
        s.put(Node::new(1, 0.0, 0.0));
        s.put(Node::new(2, 1.0, 0.0));
        s.put(Node::new(3, 1.0, 1.0));
        s.put(Way::new(10, vec![1, 2, 3]));
        s
    }

    #[test]
    fn test_put_replaces() {
        let mut s = Store::new();
        s.put(Node::new(1, 0.0, 0.0));
        let old = s.put(Node::new(1, 5.0, 5.0));
        assert!(old.is_some());
        assert_eq!(s.node(1).map(|n| n.lat), Some(5.0));
        assert_eq!(s.len(ObjKind::Node), 1);
    }

    #[test]
    fn test_unique_ids_descend() {
        let s = Store::new();
        let a = s.unique_node_id();
        let b = s.unique_node_id();
        assert_eq!(a, UNIQUE_ID_START);
        assert_eq!(b, UNIQUE_ID_START - 1);
        assert_eq!(s.unique_way_id(), UNIQUE_ID_START);
    }

    #[test]
    fn test_rev_index_consistency() {
        let mut s = store_with_way();
        s.put(Relation::new(
            20,
            vec![Member {
                kind: ObjKind::Node,
                id: 2,
                role: RoleId(0),
            }],
        ));
        s.build_rev_index();

        for &r in &[1, 2, 3] {
            assert!(
                s.rev_list(ObjKind::Node, r).contains(&RevRef::way(10)),
                "node {r}"
            );
        }
        assert!(s.rev_list(ObjKind::Node, 2).contains(&RevRef::relation(20)));
        // no duplicates even if built twice
        s.build_rev_index();
        assert_eq!(s.rev_list(ObjKind::Node, 1).len(), 1);
    }

    #[test]
    fn test_rev_index_missing_node() {
        let mut s = Store::new();
        s.put(Node::new(1, 0.0, 0.0));
        s.put(Way::new(10, vec![1, 99]));
        s.build_rev_index();
        assert_eq!(s.rev_list(ObjKind::Node, 1), &[RevRef::way(10)]);
        assert!(s.rev_list(ObjKind::Node, 99).is_empty());
    }

    #[test]
    fn test_insert_refs_updates_rev() {
        let mut s = store_with_way();
        s.build_rev_index();
        s.put(Node::new(4, 0.5, 0.0));
        s.insert_refs(10, &[4], 1);
        assert_eq!(s.way(10).map(|w| w.refs.clone()), Some(vec![1, 4, 2, 3]));
        assert!(s.rev_list(ObjKind::Node, 4).contains(&RevRef::way(10)));
    }
}
