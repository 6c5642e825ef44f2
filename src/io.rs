//! The interfaces to the outside world: object input/output and the
//! drawing surface.
//!
//! Parsing of the various OSM serialization formats is not part of the
//! engine; a loader only has to implement [`ObjectSource`]. Likewise the
//! drawing backend is abstracted behind the [`Canvas`] capability; the
//! projection maps geographic coordinates to canvas coordinates in
//! typographic points at the page dpi.

use log::info;

use crate::elements::{Object, ObjKind, RoleTable};
use crate::error::Result;
use crate::store::Store;

/// A stream of OSM objects feeding the store.
pub trait ObjectSource {
    /// The next object, or None at the end of the stream.
    fn next_object(&mut self) -> Option<Result<Object>>;
}

/// A sink receiving the transformed objects.
pub trait ObjectSink {
    fn write_object(&mut self, obj: &Object, roles: &RoleTable) -> Result<()>;
}

/// Drains a source into the store. Returns the number of objects loaded.
pub fn load<S: ObjectSource>(store: &mut Store, src: &mut S) -> Result<usize> {
    let mut cnt = 0;
    while let Some(obj) = src.next_object() {
        store.put(obj?);
        cnt += 1;
    }
    info!(
        "loaded {cnt} objects ({} nodes, {} ways, {} relations)",
        store.len(ObjKind::Node),
        store.len(ObjKind::Way),
        store.len(ObjKind::Relation)
    );
    Ok(cnt)
}

/// Writes all objects of the store to a sink, nodes first, then ways,
/// then relations, each kind in canonical trie order. Returns the number
/// of objects written.
pub fn save_all(store: &Store, sink: &mut dyn ObjectSink) -> Result<usize> {
    let mut cnt = 0;
    for kind in [ObjKind::Node, ObjKind::Way, ObjKind::Relation] {
        for (_, obj) in store.iter(kind) {
            sink.write_object(obj, &store.roles)?;
            cnt += 1;
        }
    }
    Ok(cnt)
}

/// A source yielding objects from a vector, mainly useful for tests and
/// embedding.
pub struct VecSource(std::vec::IntoIter<Object>);

impl VecSource {
    pub fn new(objs: Vec<Object>) -> VecSource {
        VecSource(objs.into_iter())
    }
}

impl ObjectSource for VecSource {
    fn next_object(&mut self) -> Option<Result<Object>> {
        self.0.next().map(Ok)
    }
}

/// A sink collecting objects into a vector.
#[derive(Default)]
pub struct VecSink(pub Vec<Object>);

impl ObjectSink for VecSink {
    fn write_object(&mut self, obj: &Object, _roles: &RoleTable) -> Result<()> {
        self.0.push(obj.clone());
        Ok(())
    }
}

/// Text measurement result of a [`Canvas`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TextExtents {
    pub width: f64,
    pub height: f64,
}

/// The drawing capability of a rendering backend. Coordinates are
/// typographic points at the page dpi; colours are ARGB with a 7 bit alpha
/// channel (0x00 opaque, 0x7f transparent).
pub trait Canvas {
    fn begin_pass(&mut self);
    fn end_pass(&mut self);
    fn set_source_argb(&mut self, argb: u32);
    /// Strokes a path of points with the given line width.
    fn stroke_path(&mut self, pts: &[(f64, f64)], width: f64);
    /// Fills the polygon described by the points.
    fn fill_path(&mut self, pts: &[(f64, f64)]);
    fn text_extents(&mut self, text: &str, size: f64) -> TextExtents;
    /// Draws text at a position, rotated by `angle` degrees.
    fn draw_text(&mut self, x: f64, y: f64, angle: f64, size: f64, text: &str);
    /// Places image data at a position, rotated by `angle` degrees.
    fn draw_image(&mut self, x: f64, y: f64, angle: f64, data: &[u8]);
    fn push_group(&mut self);
    fn pop_group(&mut self);
}

/// A canvas that ignores everything, for running the engine without a
/// drawing backend.
#[derive(Default)]
pub struct NullCanvas;

impl Canvas for NullCanvas {
    fn begin_pass(&mut self) {}
    fn end_pass(&mut self) {}
    fn set_source_argb(&mut self, _argb: u32) {}
    fn stroke_path(&mut self, _pts: &[(f64, f64)], _width: f64) {}
    fn fill_path(&mut self, _pts: &[(f64, f64)]) {}
    fn text_extents(&mut self, _text: &str, _size: f64) -> TextExtents {
        TextExtents::default()
    }
    fn draw_text(&mut self, _x: f64, _y: f64, _angle: f64, _size: f64, _text: &str) {}
    fn draw_image(&mut self, _x: f64, _y: f64, _angle: f64, _data: &[u8]) {}
    fn push_group(&mut self) {}
    fn pop_group(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::{Node, Way};

    #[test]
    fn test_load_save_roundtrip() {
        let mut store = Store::new();
        let mut src = VecSource::new(vec![
            Node::new(1, 1.0, 2.0).into(),
            Node::new(2, 1.5, 2.5).into(),
            Way::new(10, vec![1, 2]).into(),
        ]);
        assert_eq!(load(&mut store, &mut src).unwrap(), 3);

        let mut sink = VecSink::default();
        assert_eq!(save_all(&store, &mut sink).unwrap(), 3);
        // nodes come first, then ways
        assert_eq!(sink.0[0].kind(), ObjKind::Node);
        assert_eq!(sink.0[2].kind(), ObjKind::Way);
    }
}
