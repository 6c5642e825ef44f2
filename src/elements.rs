//! Nodes, ways and relations

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Object ids are signed 64 bit integers, partitioned by object kind.
/// Synthesized objects get negative ids (see [`Store`](crate::store::Store)).
pub type Id = i64;

/// The three OSM element kinds.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ObjKind {
    Node,
    Way,
    Relation,
}

impl ObjKind {
    /// Index of the kind within the object store (IDX_NODE, IDX_WAY, IDX_REL).
    pub fn index(self) -> usize {
        match self {
            ObjKind::Node => 0,
            ObjKind::Way => 1,
            ObjKind::Relation => 2,
        }
    }

    pub fn from_index(i: usize) -> Option<ObjKind> {
        match i {
            0 => Some(ObjKind::Node),
            1 => Some(ObjKind::Way),
            2 => Some(ObjKind::Relation),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ObjKind::Node => "node",
            ObjKind::Way => "way",
            ObjKind::Relation => "relation",
        }
    }
}

impl fmt::Display for ObjKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A tag is a pair of strings (key and value). Tags always own their
/// buffers; copying a tag between objects clones the strings.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Tag {
    pub k: String,
    pub v: String,
}

impl Tag {
    pub fn new(k: impl Into<String>, v: impl Into<String>) -> Tag {
        Tag {
            k: k.into(),
            v: v.into(),
        }
    }
}

/// Attributes common to all object kinds.
#[derive(Clone, Debug)]
pub struct Attr {
    pub id: Id,
    /// The version field doubles as the rule pass number for rule objects.
    pub version: u32,
    pub changeset: i64,
    pub uid: i32,
    /// Seconds since the epoch.
    pub timestamp: i64,
    /// Invisible objects are skipped by the rule engine but not deleted.
    pub visible: bool,
    pub tags: Vec<Tag>,
}

impl Attr {
    pub fn new(id: Id) -> Attr {
        Attr {
            id,
            version: 1,
            changeset: 0,
            uid: 0,
            timestamp: 0,
            visible: true,
            tags: Vec::new(),
        }
    }

    /// Attributes for an object synthesized by an action. The generator tag
    /// marks such objects in the output.
    pub fn generated(id: Id) -> Attr {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Attr {
            id,
            version: 1,
            changeset: 0,
            uid: 0,
            timestamp,
            visible: true,
            tags: vec![Tag::new("generator", "osmchart")],
        }
    }

    /// Returns the index of the first tag with the given key.
    pub fn find_tag(&self, key: &str) -> Option<usize> {
        self.tags.iter().position(|t| t.k == key)
    }

    /// Returns the value of the first tag with the given key.
    pub fn get_tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.k == key)
            .map(|t| t.v.as_str())
    }

    /// Sets a tag, overwriting the value if the key already exists.
    pub fn set_tag(&mut self, key: &str, val: impl Into<String>) {
        match self.find_tag(key) {
            Some(i) => self.tags[i].v = val.into(),
            None => self.tags.push(Tag::new(key, val)),
        }
    }

    /// Appends a tag without looking for duplicate keys.
    pub fn add_tag(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.tags.push(Tag::new(key, val));
    }
}

/// An OpenStreetMap node element (See [OSM wiki](http://wiki.openstreetmap.org/wiki/Node)).
#[derive(Clone, Debug)]
pub struct Node {
    pub attr: Attr,
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
}

impl Node {
    pub fn new(id: Id, lat: f64, lon: f64) -> Node {
        Node {
            attr: Attr::new(id),
            lat,
            lon,
        }
    }

    /// A node created by an action rather than by the source loader.
    pub fn generated(id: Id, lat: f64, lon: f64) -> Node {
        Node {
            attr: Attr::generated(id),
            lat,
            lon,
        }
    }
}

/// An OpenStreetMap way element (See [OSM wiki](http://wiki.openstreetmap.org/wiki/Way)).
///
/// A way contains an ordered list of node references. A valid way has
/// either zero or at least two references.
#[derive(Clone, Debug)]
pub struct Way {
    pub attr: Attr,
    pub refs: Vec<Id>,
}

impl Way {
    pub fn new(id: Id, refs: Vec<Id>) -> Way {
        Way {
            attr: Attr::new(id),
            refs,
        }
    }

    pub fn generated(id: Id, refs: Vec<Id>) -> Way {
        Way {
            attr: Attr::generated(id),
            refs,
        }
    }

    /// A way is a closed polygon iff it has at least 4 references and the
    /// first and last reference coincide.
    pub fn is_closed(&self) -> bool {
        self.refs.len() >= 4 && self.refs.first() == self.refs.last()
    }

    /// True if the way has references and the end points differ.
    pub fn is_open(&self) -> bool {
        !self.refs.is_empty() && self.refs.first() != self.refs.last()
    }

    pub fn first_ref(&self) -> Option<Id> {
        self.refs.first().copied()
    }

    pub fn last_ref(&self) -> Option<Id> {
        self.refs.last().copied()
    }
}

/// Interned relation member role.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct RoleId(pub u16);

/// Process-wide role intern table mapping role ids to strings. It is
/// pre-populated with the common OSM roles; additions extend the table
/// monotonically.
#[derive(Clone, Debug)]
pub struct RoleTable {
    names: Vec<String>,
}

/// Number of pre-populated roles; persisted indexes only store roles from
/// this id upwards.
pub const ROLE_FIRST_FREE: u16 = 14;

const DEFAULT_ROLES: [&str; ROLE_FIRST_FREE as usize] = [
    "",
    "inner",
    "outer",
    "forward",
    "backward",
    "stop",
    "platform",
    "from",
    "to",
    "via",
    "label",
    "admin_centre",
    "main_stream",
    "side_stream",
];

impl Default for RoleTable {
    fn default() -> RoleTable {
        RoleTable {
            names: DEFAULT_ROLES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl RoleTable {
    pub fn new() -> RoleTable {
        RoleTable::default()
    }

    /// Returns the id of the role, adding it to the table if necessary.
    pub fn intern(&mut self, role: &str) -> RoleId {
        if let Some(i) = self.names.iter().position(|n| n == role) {
            return RoleId(i as u16);
        }
        self.names.push(role.to_string());
        RoleId((self.names.len() - 1) as u16)
    }

    /// Returns the role string for an id, or `"n/a"` if the id is unknown.
    pub fn name(&self, role: RoleId) -> &str {
        self.names
            .get(role.0 as usize)
            .map(|s| s.as_str())
            .unwrap_or("n/a")
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// All role strings in id order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

/// A member of a relation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Member {
    pub kind: ObjKind,
    pub id: Id,
    pub role: RoleId,
}

/// An OpenStreetMap relation element (See [OSM wiki](http://wiki.openstreetmap.org/wiki/Relation)).
#[derive(Clone, Debug)]
pub struct Relation {
    pub attr: Attr,
    pub members: Vec<Member>,
}

impl Relation {
    pub fn new(id: Id, members: Vec<Member>) -> Relation {
        Relation {
            attr: Attr::new(id),
            members,
        }
    }
}

/// An enum with the OSM core elements: nodes, ways and relations.
#[derive(Clone, Debug)]
pub enum Object {
    Node(Node),
    Way(Way),
    Relation(Relation),
}

impl Object {
    pub fn kind(&self) -> ObjKind {
        match self {
            Object::Node(_) => ObjKind::Node,
            Object::Way(_) => ObjKind::Way,
            Object::Relation(_) => ObjKind::Relation,
        }
    }

    pub fn id(&self) -> Id {
        self.attr().id
    }

    pub fn attr(&self) -> &Attr {
        match self {
            Object::Node(n) => &n.attr,
            Object::Way(w) => &w.attr,
            Object::Relation(r) => &r.attr,
        }
    }

    pub fn attr_mut(&mut self) -> &mut Attr {
        match self {
            Object::Node(n) => &mut n.attr,
            Object::Way(w) => &mut w.attr,
            Object::Relation(r) => &mut r.attr,
        }
    }

    pub fn tags(&self) -> &[Tag] {
        &self.attr().tags
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Object::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_way(&self) -> Option<&Way> {
        match self {
            Object::Way(w) => Some(w),
            _ => None,
        }
    }

    pub fn as_way_mut(&mut self) -> Option<&mut Way> {
        match self {
            Object::Way(w) => Some(w),
            _ => None,
        }
    }

    pub fn as_relation(&self) -> Option<&Relation> {
        match self {
            Object::Relation(r) => Some(r),
            _ => None,
        }
    }
}

impl From<Node> for Object {
    fn from(n: Node) -> Object {
        Object::Node(n)
    }
}

impl From<Way> for Object {
    fn from(w: Way) -> Object {
        Object::Way(w)
    }
}

impl From<Relation> for Object {
    fn from(r: Relation) -> Object {
        Object::Relation(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_way_closed() {
        let mut w = Way::new(1, vec![1, 2, 3, 1]);
        assert!(w.is_closed());
        assert!(!w.is_open());
        w.refs = vec![1, 2, 3];
        assert!(!w.is_closed());
        assert!(w.is_open());
        // a triangle needs the closing repeat to count as an area
        w.refs = vec![1, 2, 1];
        assert!(!w.is_closed());
        w.refs = vec![];
        assert!(!w.is_open());
    }

    #[test]
    fn test_role_intern() {
        let mut rt = RoleTable::new();
        assert_eq!(rt.intern("outer"), RoleId(2));
        let r = rt.intern("light:sector");
        assert_eq!(r, RoleId(ROLE_FIRST_FREE));
        assert_eq!(rt.intern("light:sector"), r);
        assert_eq!(rt.name(r), "light:sector");
        assert_eq!(rt.name(RoleId(9999)), "n/a");
    }

    #[test]
    fn test_tag_ops() {
        let mut a = Attr::new(5);
        a.add_tag("seamark:type", "buoy_lateral");
        a.set_tag("name", "B1");
        a.set_tag("name", "B2");
        assert_eq!(a.get_tag("name"), Some("B2"));
        assert_eq!(a.find_tag("seamark:type"), Some(0));
        assert_eq!(a.tags.len(), 2);
    }
}
