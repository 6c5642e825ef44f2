//! The persisted binary index.
//!
//! The index caches a parsed dataset so that subsequent runs can skip the
//! source parser. Layout (all integers little endian):
//!
//! ```text
//! magic "SMRENDER.INDEX\0\0" | version u32 | flags u32
//! role_count u32 | role_bytes_len u32
//! role_count x { len u16, bytes }        interned roles
//! node_cnt u64 | way_cnt u64 | rel_cnt u64
//! node section | way section | relation section
//! ```
//!
//! Each object is a fixed record followed by its tags and, for ways and
//! relations, the reference or member payload. The dirty flag is set
//! before the sections are written and cleared only after a full
//! successful write; a reader finding it set refuses the file so that the
//! caller falls back to re-parsing the source.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info};
use memmap2::Mmap;

use crate::elements::{
    Attr, Member, Node, Object, ObjKind, Relation, RoleId, Tag, Way, ROLE_FIRST_FREE,
};
use crate::error::{new_index_error, IndexError, Result};
use crate::store::Store;

const MAGIC: &[u8; 16] = b"SMRENDER.INDEX\0\0";
const VERSION: u32 = 1;
const FLAG_DIRTY: u32 = 1;

/// Byte offset of the flags word, for clearing the dirty flag in place.
const FLAGS_OFFSET: u64 = 20;

fn write_header<W: Write>(w: &mut W, flags: u32, role_count: u32, role_bytes: u32) -> Result<()> {
    w.write_all(MAGIC)?;
    w.write_u32::<LittleEndian>(VERSION)?;
    w.write_u32::<LittleEndian>(flags)?;
    w.write_u32::<LittleEndian>(role_count)?;
    w.write_u32::<LittleEndian>(role_bytes)?;
    Ok(())
}

fn write_tag<W: Write>(w: &mut W, tag: &Tag) -> Result<()> {
    w.write_u16::<LittleEndian>(tag.k.len() as u16)?;
    w.write_all(tag.k.as_bytes())?;
    w.write_u16::<LittleEndian>(tag.v.len() as u16)?;
    w.write_all(tag.v.as_bytes())?;
    Ok(())
}

fn write_obj<W: Write>(w: &mut W, obj: &Object) -> Result<()> {
    let attr = obj.attr();
    let payload_cnt = match obj {
        Object::Node(_) => 0,
        Object::Way(way) => way.refs.len(),
        Object::Relation(rel) => rel.members.len(),
    };

    w.write_u8(obj.kind().index() as u8)?;
    w.write_i64::<LittleEndian>(attr.id)?;
    w.write_u32::<LittleEndian>(attr.version)?;
    w.write_i64::<LittleEndian>(attr.changeset)?;
    w.write_i32::<LittleEndian>(attr.uid)?;
    w.write_i64::<LittleEndian>(attr.timestamp)?;
    w.write_u8(attr.visible as u8)?;
    w.write_u16::<LittleEndian>(attr.tags.len() as u16)?;
    w.write_u32::<LittleEndian>(payload_cnt as u32)?;

    for tag in &attr.tags {
        write_tag(w, tag)?;
    }

    match obj {
        Object::Node(n) => {
            w.write_f64::<LittleEndian>(n.lat)?;
            w.write_f64::<LittleEndian>(n.lon)?;
        }
        Object::Way(way) => {
            for &r in &way.refs {
                w.write_i64::<LittleEndian>(r)?;
            }
        }
        Object::Relation(rel) => {
            for m in &rel.members {
                w.write_u8(m.kind.index() as u8)?;
                w.write_i64::<LittleEndian>(m.id)?;
                w.write_u16::<LittleEndian>(m.role.0)?;
            }
        }
    }
    Ok(())
}

/// Writes the whole store to an index file. The header's dirty flag is
/// cleared only after everything was written successfully.
pub fn write_index<P: AsRef<Path>>(path: P, store: &Store) -> Result<()> {
    info!("creating index file \"{}\"", path.as_ref().display());
    let mut f = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;

    let roles: Vec<&str> = store.roles.iter().skip(ROLE_FIRST_FREE as usize).collect();
    let role_bytes: usize = roles.iter().map(|r| r.len() + 2).sum();

    write_header(&mut f, FLAG_DIRTY, roles.len() as u32, role_bytes as u32)?;
    for role in &roles {
        f.write_u16::<LittleEndian>(role.len() as u16)?;
        f.write_all(role.as_bytes())?;
    }

    for kind in [ObjKind::Node, ObjKind::Way, ObjKind::Relation] {
        f.write_u64::<LittleEndian>(store.len(kind) as u64)?;
    }

    for kind in [ObjKind::Node, ObjKind::Way, ObjKind::Relation] {
        debug!("saving {} index...", kind.name());
        for (_, obj) in store.iter(kind) {
            write_obj(&mut f, obj)?;
        }
    }

    f.flush()?;
    f.seek(SeekFrom::Start(FLAGS_OFFSET))?;
    f.write_u32::<LittleEndian>(0)?;
    f.flush()?;
    Ok(())
}

fn read_tag(r: &mut &[u8]) -> Result<Tag> {
    let read_str = |r: &mut &[u8]| -> Result<String> {
        let len = r
            .read_u16::<LittleEndian>()
            .map_err(|_| new_index_error(IndexError::Truncated))? as usize;
        if r.len() < len {
            return Err(new_index_error(IndexError::Truncated));
        }
        let s = String::from_utf8_lossy(&r[..len]).into_owned();
        *r = &r[len..];
        Ok(s)
    };
    Ok(Tag {
        k: read_str(r)?,
        v: read_str(r)?,
    })
}

fn trunc() -> crate::error::Error {
    new_index_error(IndexError::Truncated)
}

fn read_obj(r: &mut &[u8]) -> Result<Object> {
    let kind = ObjKind::from_index(r.read_u8().map_err(|_| trunc())? as usize)
        .ok_or_else(trunc)?;
    let id = r.read_i64::<LittleEndian>().map_err(|_| trunc())?;
    let version = r.read_u32::<LittleEndian>().map_err(|_| trunc())?;
    let changeset = r.read_i64::<LittleEndian>().map_err(|_| trunc())?;
    let uid = r.read_i32::<LittleEndian>().map_err(|_| trunc())?;
    let timestamp = r.read_i64::<LittleEndian>().map_err(|_| trunc())?;
    let visible = r.read_u8().map_err(|_| trunc())? != 0;
    let tag_cnt = r.read_u16::<LittleEndian>().map_err(|_| trunc())? as usize;
    let payload_cnt = r.read_u32::<LittleEndian>().map_err(|_| trunc())? as usize;

    let mut tags = Vec::with_capacity(tag_cnt);
    for _ in 0..tag_cnt {
        tags.push(read_tag(r)?);
    }

    let attr = Attr {
        id,
        version,
        changeset,
        uid,
        timestamp,
        visible,
        tags,
    };

    let obj = match kind {
        ObjKind::Node => {
            let lat = r.read_f64::<LittleEndian>().map_err(|_| trunc())?;
            let lon = r.read_f64::<LittleEndian>().map_err(|_| trunc())?;
            Object::Node(Node { attr, lat, lon })
        }
        ObjKind::Way => {
            let mut refs = Vec::with_capacity(payload_cnt.min(1 << 20));
            for _ in 0..payload_cnt {
                refs.push(r.read_i64::<LittleEndian>().map_err(|_| trunc())?);
            }
            Object::Way(Way { attr, refs })
        }
        ObjKind::Relation => {
            let mut members = Vec::with_capacity(payload_cnt.min(1 << 20));
            for _ in 0..payload_cnt {
                let kind = ObjKind::from_index(r.read_u8().map_err(|_| trunc())? as usize)
                    .ok_or_else(trunc)?;
                let id = r.read_i64::<LittleEndian>().map_err(|_| trunc())?;
                let role = RoleId(r.read_u16::<LittleEndian>().map_err(|_| trunc())?);
                members.push(Member { kind, id, role });
            }
            Object::Relation(Relation { attr, members })
        }
    };
    Ok(obj)
}

/// Reads an index file into a fresh store. The file is mapped into memory;
/// stale (dirty) or truncated files are refused so the caller can fall
/// back to re-parsing the source.
pub fn read_index<P: AsRef<Path>>(path: P) -> Result<Store> {
    let file = File::open(path)?;
    // the file is mapped read-only and fully consumed before returning
    let mmap = unsafe { Mmap::map(&file)? };
    let mut r: &[u8] = &mmap;

    if r.len() < MAGIC.len() || &r[..MAGIC.len()] != MAGIC {
        return Err(new_index_error(IndexError::BadMagic));
    }
    r = &r[MAGIC.len()..];

    let version = r.read_u32::<LittleEndian>().map_err(|_| trunc())?;
    if version != VERSION {
        return Err(new_index_error(IndexError::BadVersion { version }));
    }
    let flags = r.read_u32::<LittleEndian>().map_err(|_| trunc())?;
    if flags & FLAG_DIRTY != 0 {
        return Err(new_index_error(IndexError::Stale));
    }

    let role_count = r.read_u32::<LittleEndian>().map_err(|_| trunc())?;
    let _role_bytes = r.read_u32::<LittleEndian>().map_err(|_| trunc())?;

    let mut store = Store::new();
    for _ in 0..role_count {
        let len = r.read_u16::<LittleEndian>().map_err(|_| trunc())? as usize;
        if r.len() < len {
            return Err(trunc());
        }
        let role = String::from_utf8_lossy(&r[..len]).into_owned();
        r = &r[len..];
        store.roles.intern(&role);
    }

    let mut counts = [0u64; 3];
    for c in counts.iter_mut() {
        *c = r.read_u64::<LittleEndian>().map_err(|_| trunc())?;
    }

    for (i, &cnt) in counts.iter().enumerate() {
        debug!(
            "loading {} {}s from index",
            cnt,
            ObjKind::from_index(i).map(|k| k.name()).unwrap_or("?")
        );
        for _ in 0..cnt {
            let obj = read_obj(&mut r)?;
            store.put(obj);
        }
    }

    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_store() -> Store {
        let mut s = Store::new();
        let mut n = Node::new(1, 45.5, 15.25);
        n.attr.add_tag("seamark:type", "light_minor");
        s.put(n);
        s.put(Node::new(2, 45.6, 15.35));
        s.put(Way::new(10, vec![1, 2]));
        let role = s.roles.intern("light:sector");
        s.put(Relation::new(
            20,
            vec![Member {
                kind: ObjKind::Way,
                id: 10,
                role,
            }],
        ));
        s
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.index");
        let store = sample_store();

        write_index(&path, &store).unwrap();
        let loaded = read_index(&path).unwrap();

        assert_eq!(loaded.len(ObjKind::Node), 2);
        assert_eq!(loaded.len(ObjKind::Way), 1);
        assert_eq!(loaded.len(ObjKind::Relation), 1);

        let n = loaded.node(1).unwrap();
        assert_eq!(n.lat, 45.5);
        assert_eq!(n.attr.get_tag("seamark:type"), Some("light_minor"));

        assert_eq!(loaded.way(10).unwrap().refs, vec![1, 2]);

        let rel = loaded.relation(20).unwrap();
        assert_eq!(rel.members.len(), 1);
        assert_eq!(loaded.roles.name(rel.members[0].role), "light:sector");
    }

    #[test]
    fn test_rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bogus.index");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"definitely not an index")
            .unwrap();
        let err = read_index(&path).unwrap_err();
        assert!(matches!(
            err.kind(),
            crate::error::ErrorKind::Index(IndexError::BadMagic)
        ));
    }

    #[test]
    fn test_rejects_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trunc.index");
        write_index(&path, &sample_store()).unwrap();

        let data = std::fs::read(&path).unwrap();
        std::fs::write(&path, &data[..data.len() - 10]).unwrap();

        let err = read_index(&path).unwrap_err();
        assert!(matches!(
            err.kind(),
            crate::error::ErrorKind::Index(IndexError::Truncated)
        ));
    }

    #[test]
    fn test_rejects_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dirty.index");
        write_index(&path, &sample_store()).unwrap();

        // flip the dirty flag back on
        let mut data = std::fs::read(&path).unwrap();
        data[FLAGS_OFFSET as usize] = FLAG_DIRTY as u8;
        std::fs::write(&path, &data).unwrap();

        let err = read_index(&path).unwrap_err();
        assert!(matches!(
            err.kind(),
            crate::error::ErrorKind::Index(IndexError::Stale)
        ));
    }
}
