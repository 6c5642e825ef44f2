//! Closing of open polygons (the `cat_poly` action).
//!
//! Open polygons cannot be filled, so they must be closed first. They
//! occur wherever ways (typically coastlines) are clipped at the edges of
//! the bounding box used to select the data. The algorithm works in
//! stages:
//!
//! 1. Gather all tag-matched open ways.
//! 2. Build a list of their end points, keyed by node id, and sort it.
//! 3. Ways sharing an end node are chained via prev/next links.
//! 4. Each chain (or closed loop of chains) is folded into a single new
//!    way; the source ways are marked deleted.
//! 5. Ways whose remaining end points are closer than `vcdist` are closed
//!    directly.
//! 6. Still-open ways are trimmed to the page border, inserting edge
//!    points where a segment crosses it.
//! 7. The remaining end points are sorted by bearing from the page center
//!    and connected along the border, inserting the corner points lying
//!    between them, until no open way remains.

use log::{debug, info, warn};

use crate::context::Context;
use crate::elements::{Id, Node, Object, ObjKind, Way};
use crate::geo::{coord_diff, Coord, PolarCoord};
use crate::rules::Rule;
use crate::store::Store;

// corner point indexes, clockwise from northeast
const I_NE: usize = 0;
const I_E: usize = 1;
const I_SE: usize = 2;
const I_S: usize = 3;
const I_SW: usize = 4;
const I_W: usize = 5;
const I_NW: usize = 6;
const I_N: usize = 7;
/// Number of page edge points.
pub const NUM_CO: usize = 8;

// location flags of a position outside the page
const POS_N: u8 = 1;
const POS_S: u8 = 2;
const POS_E: u8 = 4;
const POS_W: u8 = 8;
/// Set if the position is in the higher half (in bearing order) of one of
/// the four main directions.
const POS_1: u8 = 32;
const POS_DIR_MSK: u8 = POS_N | POS_S | POS_E | POS_W;

/// A pre-created page edge point with its bearing from the page center.
#[derive(Clone, Copy, Debug)]
pub struct CornerPt {
    pub id: Id,
    pub coord: Coord,
    pub brg: PolarCoord,
}

/// The page corner machinery: 8 edge points (4 corners, 4 half-axis
/// points), the page center and the page border way.
pub struct CornerPoints {
    pub pts: [CornerPt; NUM_CO],
    pub center: Coord,
    pub page_way: Id,
}

/// Creates the corner points and the page border way once per context.
pub fn init_cat_poly(ctx: &mut Context) {
    if ctx.corners.is_some() {
        return;
    }

    let bb = ctx.page.bbox;
    let center = Coord::new(ctx.page.mean_lat, ctx.page.mean_lon);
    let mid_lat = (bb.ru.lat + bb.ll.lat) / 2.0;
    let mid_lon = (bb.ru.lon + bb.ll.lon) / 2.0;

    let coords = [
        bb.ru,                              // NE
        Coord::new(mid_lat, bb.ru.lon),     // E
        Coord::new(bb.ll.lat, bb.ru.lon),   // SE
        Coord::new(bb.ll.lat, mid_lon),     // S
        bb.ll,                              // SW
        Coord::new(mid_lat, bb.ll.lon),     // W
        Coord::new(bb.ru.lat, bb.ll.lon),   // NW
        Coord::new(bb.ru.lat, mid_lon),     // N
    ];

    let pts: [CornerPt; NUM_CO] = std::array::from_fn(|i| {
        let mut n = Node::generated(ctx.store.unique_node_id(), coords[i].lat, coords[i].lon);
        n.attr.add_tag("grid", "pagecorner");
        let id = n.attr.id;
        ctx.store.put(n);
        let brg = coord_diff(&center, &coords[i]);
        debug!("corner_point[{i}].bearing = {} (id = {id})", brg.bearing);
        CornerPt {
            id,
            coord: coords[i],
            brg,
        }
    });

    // the page border polygon is kept as a closed way over the 4 true
    // corners so that renderers can fill below it
    let mut border = Way::generated(
        ctx.store.unique_way_id(),
        vec![
            pts[I_NW].id,
            pts[I_SW].id,
            pts[I_SE].id,
            pts[I_NE].id,
            pts[I_NW].id,
        ],
    );
    border.attr.add_tag("border", "page");
    let page_way = border.attr.id;
    ctx.store.put(border);

    ctx.corners = Some(CornerPoints {
        pts,
        center,
        page_way,
    });
}

/// Returns the octant of a position outside the rendering window, one of
/// N, NE, E, SE, S, SW, W, NW, as or'ed POS flags. 0 means inside.
fn octant(co: &CornerPoints, crd: &Coord) -> u8 {
    let mut pos = 0;

    if crd.lat > co.pts[I_NE].coord.lat {
        pos |= POS_N;
    } else if crd.lat < co.pts[I_SE].coord.lat {
        pos |= POS_S;
    }

    if crd.lon > co.pts[I_NE].coord.lon {
        pos |= POS_E;
    } else if crd.lon < co.pts[I_NW].coord.lon {
        pos |= POS_W;
    }

    pos
}

/// Like [`octant`] but partitioning the outside into 12 areas: the four
/// main directions are split into halves, flagged with POS_1 for the half
/// that comes later in clockwise bearing order.
fn dodecant(co: &CornerPoints, crd: &Coord) -> u8 {
    let mut pos = octant(co, crd);
    if pos == 0 {
        return 0;
    }

    match pos {
        POS_N => {
            if crd.lon > co.pts[I_N].coord.lon {
                pos |= POS_1;
            }
        }
        POS_E => {
            if crd.lat < co.pts[I_E].coord.lat {
                pos |= POS_1;
            }
        }
        POS_S => {
            if crd.lon < co.pts[I_S].coord.lon {
                pos |= POS_1;
            }
        }
        POS_W => {
            if crd.lat > co.pts[I_W].coord.lat {
                pos |= POS_1;
            }
        }
        _ => {}
    }

    pos
}

fn check_bits(pos: u8, tst: u8) -> bool {
    pos & tst == tst
}

/// An entry of the way list: one gathered way fragment plus its chaining
/// state.
#[derive(Clone, Copy, Debug, Default)]
struct PolyEnt {
    way: Id,
    next: Option<usize>,
    prev: Option<usize>,
    /// Folded into a joined way, to be ignored from now on.
    del: bool,
    /// Joined but still an open way.
    open: bool,
    /// The joined replacement way.
    nw: Option<Id>,
}

/// An end point record: way list index, position of the point within the
/// way (first or last) and either its node id or its bearing from the page
/// center.
#[derive(Clone, Copy, Debug, Default)]
struct Pdef {
    wl_index: usize,
    pn: usize,
    nid: Id,
    pc: PolarCoord,
}

/// This function does some data checks on a way's references. If the first
/// or last node appears multiple times at the beginning or end, the
/// duplicates are eliminated. Returns true if the way has zero length,
/// i.e. all nodes have the same id.
pub fn check_way(w: &mut Way) -> bool {
    if w.refs.is_empty() {
        return true;
    }

    let mut i = 1;
    while i < w.refs.len() && w.refs[i] == w.refs[0] {
        i += 1;
    }
    if i >= w.refs.len() {
        debug!("all nodes of way {} have the same id", w.attr.id);
        return true;
    }
    if i > 1 {
        debug!(
            "eliminating duplicate starting nodes 1 - {} in way {}",
            i - 1,
            w.attr.id
        );
        w.refs.drain(1..i);
    }

    let last = w.refs[w.refs.len() - 1];
    let mut j = w.refs.len() as i64 - 2;
    while j >= 0 && w.refs[j as usize] == last {
        j -= 1;
    }
    if j < 0 {
        debug!("all nodes of way {} have the same id", w.attr.id);
        return true;
    }
    let keep = (j + 2) as usize;
    if keep < w.refs.len() {
        debug!("shortening way {} from {} to {keep}", w.attr.id, w.refs.len());
        w.refs.truncate(keep);
    }

    false
}

/// The end points (first and last node) of all gathered ways.
fn poly_get_node_ids(store: &Store, wl: &[PolyEnt]) -> Vec<Pdef> {
    let mut pd = vec![Pdef::default(); wl.len() * 2];
    for (i, ent) in wl.iter().enumerate() {
        let Some(w) = store.way(ent.way) else { continue };
        if w.refs.is_empty() {
            continue;
        }
        pd[i] = Pdef {
            wl_index: i,
            pn: 0,
            nid: w.refs[0],
            pc: PolarCoord::default(),
        };
        pd[i + wl.len()] = Pdef {
            wl_index: i,
            pn: w.refs.len() - 1,
            nid: w.refs[w.refs.len() - 1],
            pc: PolarCoord::default(),
        };
    }
    pd
}

/// Links ways sharing an end node. The pdef list must be sorted by node id
/// for this to work. Returns the number of connected node pairs.
fn poly_find_adj(store: &Store, wl: &mut [PolyEnt], pd: &[Pdef]) -> usize {
    debug!("{} unconnected ends", pd.len());
    let mut n = 0;
    for i in 0..pd.len().saturating_sub(1) {
        if pd[i].nid != pd[i + 1].nid {
            continue;
        }

        // more than 2 ways sharing the same end node indicates broken data
        let mut j = 2;
        while i + j < pd.len() && pd[i].nid == pd[i + j].nid {
            j += 1;
        }
        if j > 2 {
            warn!(
                "possible data error: end node {} is shared by {j} ways",
                pd[i].nid
            );
        }

        // two start points or two end points sharing a node means one of
        // the ways has the wrong direction
        if (pd[i].pn == 0) == (pd[i + 1].pn == 0) {
            warn!(
                "possible data error: either way {} or {} has wrong direction",
                store.way(wl[pd[i].wl_index].way).map(|w| w.attr.id).unwrap_or(0),
                store
                    .way(wl[pd[i + 1].wl_index].way)
                    .map(|w| w.attr.id)
                    .unwrap_or(0)
            );
        }

        wl[pd[i + 1].wl_index].next = Some(pd[i].wl_index);
        wl[pd[i].wl_index].prev = Some(pd[i + 1].wl_index);
        n += 1;
    }
    n
}

/// Walks the chain starting at `start`, counting the total node count of
/// the concatenated ways. Returns (is_loop, node count), or None on a
/// chaining inconsistency.
fn count_poly_refs(store: &Store, wl: &[PolyEnt], start: usize) -> Option<(bool, usize)> {
    let mut cnt = 0;
    let mut cur = start;
    loop {
        let w = store.way(wl[cur].way)?;
        cnt += w.refs.len() - 1;
        match wl[cur].next {
            Some(nx) if nx == start => return Some((true, cnt + 1)),
            Some(nx) => {
                if wl[nx].prev != Some(cur) {
                    warn!(
                        "possible data error: loop error in ways {} and {}, overlapping?",
                        wl[cur].way, wl[nx].way
                    );
                    return None;
                }
                cur = nx;
            }
            None => return Some((false, cnt + 1)),
        }
    }
}

/// Copies the node refs of the whole chain into `refs` (overlapping the
/// shared end/start node once) and marks the source ways deleted.
fn join_open_poly(store: &Store, wl: &mut [PolyEnt], start: usize, refs: &mut Vec<Id>) -> usize {
    let mut wcnt = 0;
    let mut cur = start;
    loop {
        if let Some(w) = store.way(wl[cur].way) {
            if refs.is_empty() {
                refs.extend_from_slice(&w.refs);
            } else {
                refs.extend_from_slice(&w.refs[1..]);
            }
        }
        if wl[cur].del {
            debug!("way {} is already part of another way", wl[cur].way);
        }
        wl[cur].del = true;
        wcnt += 1;

        match wl[cur].next {
            Some(nx) if nx == start => {
                wcnt += 1;
                return wcnt;
            }
            Some(nx) => cur = nx,
            None => return wcnt,
        }
    }
}

/// Folds every chain into a newly allocated way. Returns the number of
/// ways that are still open afterwards.
fn loop_detect(ctx: &mut Context, wl: &mut [PolyEnt]) -> usize {
    let mut ocnt = 0;

    for i in 0..wl.len() {
        if wl[i].del {
            continue;
        }
        let Some((is_loop, cnt)) = count_poly_refs(&ctx.store, wl, i) else {
            continue;
        };

        // an intermediate way of a chain is handled with its head
        if !is_loop && wl[i].prev.is_some() {
            continue;
        }

        debug!("waylist: wl_index {i} (cnt = {cnt}, loop = {is_loop})");
        let mut refs = Vec::with_capacity(cnt);
        let wcnt = join_open_poly(&ctx.store, wl, i, &mut refs);
        let w = Way::generated(ctx.store.unique_way_id(), refs);
        let nw_id = w.attr.id;
        ctx.store.put(w);
        wl[i].nw = Some(nw_id);
        debug!("{wcnt} ways joined into {nw_id}");

        if !is_loop {
            wl[i].open = true;
            ocnt += 1;
        }
    }

    ocnt
}

/// Copies the tags whose keys are listed in `keys` from the source object
/// onto the destination way, unless the destination already carries the
/// key. Returns the number of copied tags.
fn collect_tags(store: &mut Store, keys: &[String], src: &Object, dst_id: Id) -> usize {
    let mut cnt = 0;
    for key in keys {
        let Some(n) = src.attr().find_tag(key) else {
            continue;
        };
        let tag = src.tags()[n].clone();
        let Some(dst) = store.way_mut(dst_id) else {
            continue;
        };
        match dst.attr.find_tag(key) {
            Some(m) => {
                if dst.attr.tags[m].v != tag.v {
                    warn!(
                        "value mismatch of key {key} between ways {} and {}",
                        dst_id,
                        src.id()
                    );
                }
            }
            None => {
                dst.attr.tags.push(tag);
                cnt += 1;
            }
        }
    }
    cnt
}

/// Merges the selected tags of all chain source ways (and of the rule's
/// relation, if any) into each newly created way.
fn poly_join_tags(ctx: &mut Context, wl: &[PolyEnt], keys: &[String], rel: Option<&Object>) {
    for (i, ent) in wl.iter().enumerate() {
        let Some(nw) = ent.nw else { continue };
        debug!("joining tags to way {nw}");

        let mut cur = i;
        loop {
            if let Some(src) = ctx.store.way(wl[cur].way).cloned() {
                collect_tags(&mut ctx.store, keys, &Object::Way(src), nw);
            }
            match wl[cur].next {
                Some(nx) if nx != i => cur = nx,
                _ => break,
            }
        }

        if let Some(rel) = rel {
            debug!("joining relation tags");
            let rel_keys: Vec<String> = rel.tags().iter().map(|t| t.k.clone()).collect();
            collect_tags(&mut ctx.store, &rel_keys, rel, nw);
        }
    }
}

/// The distance between the end nodes of a way, in degrees. None if an end
/// node is missing.
fn end_node_dist(store: &Store, w: &Way) -> Option<f64> {
    let first = store.node(*w.refs.first()?)?;
    let last = store.node(*w.refs.last()?)?;
    Some(
        coord_diff(
            &Coord::new(first.lat, first.lon),
            &Coord::new(last.lat, last.lon),
        )
        .dist,
    )
}

/// Closes all "almost closed" ways, i.e. those whose end nodes are nearer
/// than `max_dist`. Returns the number of ways closed.
fn connect_almost_closed(ctx: &mut Context, wl: &mut [PolyEnt], max_dist: f64) -> usize {
    let mut cnt = 0;
    for ent in wl.iter_mut() {
        if !ent.open {
            continue;
        }
        let Some(nw) = ent.nw else { continue };
        let Some(w) = ctx.store.way(nw) else { continue };
        let Some(dist) = end_node_dist(&ctx.store, w) else {
            warn!("end node of way {nw} does not exist");
            continue;
        };
        if dist < max_dist {
            debug!("closing almost closed way {nw}");
            if let Some(w) = ctx.store.way_mut(nw) {
                let first = w.refs[0];
                w.refs.push(first);
            }
            ent.open = false;
            cnt += 1;
        }
    }
    debug!("closed {cnt} ways");
    cnt
}

/// Returns the nearest edge point for the position `crd` outside the page
/// at location `pos`, with `nid` the first node inside. Corner octants
/// reuse the pre-created corner nodes; everywhere else a new node is
/// created on the intersection of the outgoing segment with the page edge.
fn edge_point(ctx: &mut Context, mut crd: Coord, pos: u8, nid: Id) -> Option<Id> {
    let co = ctx.corners.as_ref()?;

    if check_bits(pos, POS_N | POS_E) {
        return Some(co.pts[I_NE].id);
    }
    if check_bits(pos, POS_S | POS_E) {
        return Some(co.pts[I_SE].id);
    }
    if check_bits(pos, POS_S | POS_W) {
        return Some(co.pts[I_SW].id);
    }
    if check_bits(pos, POS_N | POS_W) {
        return Some(co.pts[I_NW].id);
    }

    let n = ctx.store.node(nid)?;
    let (nlat, nlon) = (n.lat, n.lon);
    match pos & POS_DIR_MSK {
        POS_N => {
            let edge = co.pts[I_NE].coord.lat;
            crd.lon += (nlon - crd.lon) * (nlat - edge) / (nlat - crd.lat);
            crd.lat = edge;
        }
        POS_S => {
            let edge = co.pts[I_SE].coord.lat;
            crd.lon += (nlon - crd.lon) * (nlat - edge) / (nlat - crd.lat);
            crd.lat = co.pts[I_SW].coord.lat;
        }
        POS_E => {
            let edge = co.pts[I_NE].coord.lon;
            crd.lat += (nlat - crd.lat) * (nlon - edge) / (nlon - crd.lon);
            crd.lon = edge;
        }
        POS_W => {
            let edge = co.pts[I_NW].coord.lon;
            crd.lat += (nlat - crd.lat) * (nlon - edge) / (nlon - crd.lon);
            crd.lon = edge;
        }
        _ => {
            warn!("octant not allowed: {pos:#04x}");
            return None;
        }
    }

    let mut n = Node::generated(ctx.store.unique_node_id(), crd.lat, crd.lon);
    n.attr.add_tag("osmchart:cat_poly", "edge_point");
    let id = n.attr.id;
    ctx.store.put(n);
    Some(id)
}

/// The true reference index for position `idx` walking the way forwards
/// (`rev == false`) or backwards.
fn windex(len: usize, idx: usize, rev: bool) -> usize {
    if rev {
        len - idx - 1
    } else {
        idx
    }
}

/// Trims the node refs from one end of a way which are outside the
/// rendering window, replacing the first off-page run with an edge point.
/// Returns the index of the first node found inside, or None if the whole
/// way is outside (or a node is missing).
fn trim_way(ctx: &mut Context, way_id: Id, rev: bool) -> Option<usize> {
    let refs = ctx.store.way(way_id)?.refs.clone();
    let len = refs.len();

    let mut p = [0u8; 2];
    let mut crd = Coord::default();
    let mut i = 0;
    while i < len {
        let nid = refs[windex(len, i, rev)];
        let Some(n) = ctx.store.node(nid) else {
            warn!("node {nid} in way {way_id} does not exist");
            return None;
        };
        crd = Coord::new(n.lat, n.lon);
        p[0] = p[1];
        let co = ctx.corners.as_ref()?;
        p[1] = dodecant(co, &crd);
        if p[1] == 0 {
            break;
        }
        i += 1;
    }

    // check if at least one node is on the page
    if i >= len {
        return None;
    }

    if p[0] != 0 {
        debug!(
            "trimming way {way_id}, {} - {} out of page, octant = {:#04x}",
            windex(len, 0, rev),
            windex(len, i - 1, rev),
            p[0]
        );

        let nid = edge_point(ctx, crd, p[0], refs[windex(len, i - 1, rev)])?;
        debug!("added new edge point {nid} at ref# {}", windex(len, i - 1, rev));

        let w = ctx.store.way_mut(way_id)?;
        if !rev {
            // replace the leading off-page run [0, i) by the edge point
            w.refs[0] = nid;
            w.refs.drain(1..i);
        } else {
            // mirror image at the end of the way
            w.refs[len - i] = nid;
            w.refs.truncate(len - i + 1);
        }
    }

    Some(i)
}

/// Trims all open ways to the page border. Ways completely outside the
/// page are marked closed to drop them from further processing. Returns
/// the number of open ways remaining on the page.
fn trim_ways(ctx: &mut Context, wl: &mut [PolyEnt]) -> usize {
    let mut open = 0;
    for (i, ent) in wl.iter_mut().enumerate() {
        if !ent.open {
            continue;
        }
        let Some(nw) = ent.nw else { continue };

        if trim_way(ctx, nw, false).is_none() {
            debug!("marking {nw} at wl_index = {i} out-of-page");
            ent.open = false;
            continue;
        }
        if trim_way(ctx, nw, true).is_none() {
            warn!("way {nw} vanished while trimming its tail, this should not happen");
            ent.open = false;
            continue;
        }
        open += 1;
    }
    debug!("new open_count = {open}");
    open
}

/// Bearings from the page center to the first and last node of all open
/// ways.
fn poly_get_brg(ctx: &Context, wl: &[PolyEnt], ocnt: usize) -> Vec<Pdef> {
    let co = match &ctx.corners {
        Some(co) => co,
        None => return Vec::new(),
    };
    let mut pd = vec![Pdef::default(); ocnt * 2];
    let mut j = 0;

    for (i, ent) in wl.iter().enumerate() {
        if !ent.open || j >= ocnt {
            continue;
        }
        let Some(nw) = ent.nw else { continue };
        let Some(w) = ctx.store.way(nw) else { continue };

        let brg_of = |nid: Id| -> Option<PolarCoord> {
            let n = ctx.store.node(nid)?;
            Some(coord_diff(&co.center, &Coord::new(n.lat, n.lon)))
        };
        let Some(first) = brg_of(w.refs[0]) else { continue };
        let Some(last) = w.refs.last().and_then(|&r| brg_of(r)) else {
            continue;
        };

        pd[j] = Pdef {
            wl_index: i,
            pn: 0,
            nid: 0,
            pc: first,
        };
        pd[j + ocnt] = Pdef {
            wl_index: i,
            pn: w.refs.len() - 1,
            nid: 0,
            pc: last,
        };
        j += 1;
    }

    pd
}

/// Connects still unconnected ways along the page border. The pdef list
/// must be sorted by bearing. For each start point the next end point in
/// clockwise bearing order is found; the corner points lying between them
/// are inserted unless `no_corner` is set. End points of the same way
/// close the polygon; different ways are spliced and the function returns
/// so that the caller re-sorts the modified list. Returns the number of
/// connections made; 0 means no open ways remain.
fn connect_open(ctx: &mut Context, pd: &mut [Pdef], wl: &mut [PolyEnt], no_corner: bool) -> usize {
    let n = pd.len();
    let mut cnt = 0;

    for i in 0..n {
        // skip end points and already closed ways
        if pd[i].pn != 0 || !wl[pd[i].wl_index].open {
            continue;
        }

        for j in i + 1..i + n {
            let wrapped = j >= n;
            let jj = j % n;
            // skip start points and closed ways
            if pd[jj].pn == 0 || !wl[pd[jj].wl_index].open {
                continue;
            }

            let Some(i_way) = wl[pd[i].wl_index].nw else { continue };

            if !no_corner {
                let co_brg: Vec<f64> = match &ctx.corners {
                    Some(co) => co.pts.iter().map(|p| p.brg.bearing).collect(),
                    None => Vec::new(),
                };
                // next corner point after each of the two end points
                let mut k = co_brg
                    .iter()
                    .position(|&b| pd[i].pc.bearing < b)
                    .unwrap_or(NUM_CO);
                let mut l = co_brg
                    .iter()
                    .position(|&b| pd[jj].pc.bearing < b)
                    .unwrap_or(NUM_CO);
                // wrap around "360 degrees"
                if l < k || wrapped {
                    l += NUM_CO;
                }
                while k < l {
                    let Some(cid) = ctx.corners.as_ref().map(|co| co.pts[k % NUM_CO].id)
                    else {
                        break;
                    };
                    if let Some(w) = ctx.store.way_mut(i_way) {
                        w.refs.insert(0, cid);
                    }
                    debug!("added corner point {} (id = {cid})", k % NUM_CO);
                    k += 1;
                }
            }

            if pd[i].wl_index == pd[jj].wl_index {
                // start and end of the same way: close the polygon
                if let Some(w) = ctx.store.way_mut(i_way) {
                    let first = w.refs[0];
                    w.refs.push(first);
                }
                wl[pd[i].wl_index].open = false;
                cnt += 1;
                debug!(
                    "way {i_way} (wl_index = {}) is now closed",
                    pd[i].wl_index
                );
                break;
            }

            // different ways: splice the end-point way in front of the
            // start-point way
            let Some(j_way) = wl[pd[jj].wl_index].nw else { continue };
            let j_refs = match ctx.store.way(j_way) {
                Some(w) => w.refs.clone(),
                None => continue,
            };
            let new_len;
            if let Some(w) = ctx.store.way_mut(i_way) {
                let mut refs = j_refs;
                refs.extend_from_slice(&w.refs);
                w.refs = refs;
                new_len = w.refs.len();
            } else {
                continue;
            }
            wl[pd[jj].wl_index].open = false;
            cnt += 1;

            // the end point of the merged way moved
            for k in 0..n {
                if pd[k].wl_index == pd[i].wl_index && pd[k].pn != 0 {
                    pd[k].pn = new_len - 1;
                    break;
                }
            }
            // the merged way now starts at the other way's start point
            for k in 0..n {
                if pd[k].wl_index == pd[jj].wl_index && pd[k].pn == 0 {
                    pd[i].pc = pd[k].pc;
                    break;
                }
            }
            debug!(
                "way {j_way} (wl_index = {}) marked as closed, resorting pdef",
                pd[jj].wl_index
            );
            return cnt;
        }
    }

    debug!("{cnt} ways connected");
    cnt
}

/// State of one `cat_poly` rule.
#[derive(Default)]
pub struct CatPoly {
    ign_incomplete: bool,
    no_corner: bool,
    /// Maximum end-point distance (degrees) to close a way directly.
    vcdist: f64,
    /// Tag keys joined onto the produced ways.
    keys: Vec<String>,
    wl: Vec<PolyEnt>,
}

impl CatPoly {
    pub fn ini(&mut self, _ctx: &mut Context, rule: &Rule) -> i32 {
        if rule.kind() == ObjKind::Node {
            warn!("cat_poly() is only allowed on ways and relations");
            return -1;
        }

        let params = rule.params();
        self.ign_incomplete = params.get_bool("ign_incomplete");
        self.no_corner = params.get_bool("no_corner");

        if let Some(d) = params.get_f64("vcdist") {
            if d < 0.0 {
                warn!("vcdist must be >= 0 (dist = {d})");
                return -1;
            }
            self.vcdist = d / 60.0;
        }

        self.keys = rule.template.tags().iter().map(|t| t.k.clone()).collect();
        self.keys
            .extend(params.get_all("copy").map(str::to_string));

        debug!(
            "ign_incomplete = {}, no_corner = {}, vcdist = {}",
            self.ign_incomplete,
            self.no_corner,
            self.vcdist * 60.0
        );
        0
    }

    /// Gathers one way into the way list after sanity checks.
    fn gather(&mut self, ctx: &mut Context, way_id: Id) {
        let Some(w) = ctx.store.way_mut(way_id) else { return };
        if w.refs.len() < 2 {
            return;
        }
        if check_way(w) {
            debug!("ignoring 0-length way {way_id}");
            return;
        }
        self.wl.push(PolyEnt {
            way: way_id,
            ..PolyEnt::default()
        });
    }

    /// Runs the closing pipeline over the gathered ways.
    fn finish(&mut self, ctx: &mut Context, rel: Option<&Object>) {
        init_cat_poly(ctx);

        let mut wl = std::mem::take(&mut self.wl);

        let mut pd = poly_get_node_ids(&ctx.store, &wl);
        pd.sort_by(|a, b| a.nid.cmp(&b.nid).then(a.pn.cmp(&b.pn)));
        poly_find_adj(&ctx.store, &mut wl, &pd);
        let mut ocnt = loop_detect(ctx, &mut wl);

        poly_join_tags(ctx, &wl, &self.keys, rel);

        debug!("closing almost closed ways, ocnt = {ocnt}");
        ocnt -= connect_almost_closed(ctx, &mut wl, self.vcdist);

        debug!("trimming ways, open_count = {ocnt}");
        let ocnt = trim_ways(ctx, &mut wl);

        if !self.ign_incomplete {
            debug!("connecting incomplete polygon loops");
            let mut pd = poly_get_brg(ctx, &wl, ocnt);
            loop {
                pd.sort_by(|a, b| a.pc.bearing.total_cmp(&b.pc.bearing));
                if connect_open(ctx, &mut pd, &mut wl, self.no_corner) == 0 {
                    break;
                }
            }
        }
    }

    pub fn main(&mut self, ctx: &mut Context, rule: &Rule, id: Id) -> i32 {
        match rule.kind() {
            ObjKind::Way => {
                self.gather(ctx, id);
                0
            }
            ObjKind::Relation => {
                info!("cat_relways(id = {id})");
                let Some(rel) = ctx.store.relation(id).cloned() else {
                    return 0;
                };
                for m in &rel.members {
                    if m.kind != ObjKind::Way {
                        continue;
                    }
                    if ctx.store.way(m.id).is_none() {
                        warn!("way {} of relation {id} does not exist", m.id);
                        continue;
                    }
                    self.gather(ctx, m.id);
                }
                self.finish(ctx, Some(&Object::Relation(rel)));
                0
            }
            ObjKind::Node => -1,
        }
    }

    pub fn fini(&mut self, ctx: &mut Context, rule: &Rule) -> i32 {
        if rule.kind() == ObjKind::Way {
            self.finish(ctx, None);
        }
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Config;

    fn ctx() -> Context {
        // a window around the Kvarner test area, 1 degree on each side
        Context::new(Config {
            window: Some("44.5:14.5:45.5:15.5".to_string()),
            threads: 0,
            ..Config::default()
        })
        .unwrap()
    }

    #[test]
    fn test_check_way() {
        let mut w = Way::new(1, vec![5, 5, 5, 2, 3]);
        assert!(!check_way(&mut w));
        assert_eq!(w.refs, vec![5, 2, 3]);

        let mut w = Way::new(2, vec![1, 2, 3, 3, 3]);
        assert!(!check_way(&mut w));
        assert_eq!(w.refs, vec![1, 2, 3]);

        let mut w = Way::new(3, vec![7, 7, 7]);
        assert!(check_way(&mut w));

        let mut w = Way::new(4, vec![7]);
        assert!(check_way(&mut w));
    }

    #[test]
    fn test_octant_dodecant() {
        let mut c = ctx();
        init_cat_poly(&mut c);
        let co = c.corners.as_ref().unwrap();

        assert_eq!(octant(co, &Coord::new(45.0, 15.0)), 0);
        assert_eq!(octant(co, &Coord::new(46.0, 15.0)), POS_N);
        assert_eq!(octant(co, &Coord::new(46.0, 16.0)), POS_N | POS_E);
        assert_eq!(octant(co, &Coord::new(44.0, 14.0)), POS_S | POS_W);

        // north of the page, east half carries POS_1
        assert_eq!(dodecant(co, &Coord::new(46.0, 15.2)), POS_N | POS_1);
        assert_eq!(dodecant(co, &Coord::new(46.0, 14.8)), POS_N);
    }

    #[test]
    fn test_corner_bearings_ascending() {
        let mut c = ctx();
        init_cat_poly(&mut c);
        let co = c.corners.as_ref().unwrap();
        // clockwise from NE: the first seven bearings ascend, the north
        // point wraps around to 0
        let brgs: Vec<f64> = co.pts.iter().map(|p| p.brg.bearing).collect();
        assert!(brgs[..7].windows(2).all(|w| w[0] < w[1]));
        assert!((brgs[0] - 45.0).abs() < 10.0);
        assert!((brgs[3] - 180.0).abs() < 1e-6);
        assert!(brgs[7].abs() < 1e-6);
        // the page border way is a 5-node closed way
        let pw = c.store.way(co.page_way).unwrap();
        assert_eq!(pw.refs.len(), 5);
        assert!(pw.is_closed());
        assert_eq!(pw.attr.get_tag("border"), Some("page"));
    }

    #[test]
    fn test_chain_folding() {
        let mut c = ctx();
        // two fragments sharing node 2, forming an open chain
        c.store.put(Node::new(1, 44.8, 14.8));
        c.store.put(Node::new(2, 44.8, 15.2));
        c.store.put(Node::new(3, 45.2, 15.2));
        c.store.put(Way::new(10, vec![1, 2]));
        c.store.put(Way::new(11, vec![2, 3]));

        let mut cp = CatPoly::default();
        cp.gather(&mut c, 10);
        cp.gather(&mut c, 11);
        let mut wl = std::mem::take(&mut cp.wl);

        let mut pd = poly_get_node_ids(&c.store, &wl);
        pd.sort_by(|a, b| a.nid.cmp(&b.nid).then(a.pn.cmp(&b.pn)));
        assert_eq!(poly_find_adj(&c.store, &mut wl, &pd), 1);
        let ocnt = loop_detect(&mut c, &mut wl);
        assert_eq!(ocnt, 1);

        // one entry holds the joined way with the concatenated refs
        let joined: Vec<&PolyEnt> = wl.iter().filter(|e| e.nw.is_some()).collect();
        assert_eq!(joined.len(), 1);
        let w = c.store.way(joined[0].nw.unwrap()).unwrap();
        assert_eq!(w.refs, vec![1, 2, 3]);
        assert!(wl.iter().all(|e| e.del));
    }

    #[test]
    fn test_closed_ring_detection() {
        let mut c = ctx();
        c.store.put(Node::new(1, 44.8, 14.8));
        c.store.put(Node::new(2, 44.8, 15.2));
        c.store.put(Node::new(3, 45.2, 15.0));
        c.store.put(Way::new(10, vec![1, 2]));
        c.store.put(Way::new(11, vec![2, 3]));
        c.store.put(Way::new(12, vec![3, 1]));

        let mut cp = CatPoly::default();
        for id in [10, 11, 12] {
            cp.gather(&mut c, id);
        }
        let mut wl = std::mem::take(&mut cp.wl);
        let mut pd = poly_get_node_ids(&c.store, &wl);
        pd.sort_by(|a, b| a.nid.cmp(&b.nid).then(a.pn.cmp(&b.pn)));
        poly_find_adj(&c.store, &mut wl, &pd);
        let ocnt = loop_detect(&mut c, &mut wl);
        assert_eq!(ocnt, 0, "a full ring must not count as open");

        let joined: Vec<&PolyEnt> = wl.iter().filter(|e| e.nw.is_some()).collect();
        assert_eq!(joined.len(), 1);
        let w = c.store.way(joined[0].nw.unwrap()).unwrap();
        assert!(w.is_closed());
    }

    #[test]
    fn test_vcdist_closes() {
        let mut c = ctx();
        c.store.put(Node::new(1, 45.0, 15.0));
        c.store.put(Node::new(2, 45.1, 15.1));
        c.store.put(Node::new(3, 45.0001, 15.0));
        c.store.put(Way::new(10, vec![1, 2, 3]));

        let mut wl = vec![PolyEnt {
            way: 10,
            nw: Some(10),
            open: true,
            ..PolyEnt::default()
        }];
        // ~0.6 nm apart, vcdist of 1 nm closes it
        let n = connect_almost_closed(&mut c, &mut wl, 1.0 / 60.0);
        assert_eq!(n, 1);
        let w = c.store.way(10).unwrap();
        assert_eq!(*w.refs.last().unwrap(), 1);
        assert!(!wl[0].open);
    }

    #[test]
    fn test_trim_way_creates_edge_point() {
        let mut c = ctx();
        init_cat_poly(&mut c);
        // first two nodes north of the page, the rest inside
        c.store.put(Node::new(1, 46.0, 15.0));
        c.store.put(Node::new(2, 45.6, 15.0));
        c.store.put(Node::new(3, 45.2, 15.0));
        c.store.put(Node::new(4, 44.8, 15.0));
        c.store.put(Way::new(10, vec![1, 2, 3, 4]));

        let i = trim_way(&mut c, 10, false).unwrap();
        assert_eq!(i, 2);
        let w = c.store.way(10).unwrap();
        assert_eq!(w.refs.len(), 3);
        assert_eq!(w.refs[1], 3);
        // the new first ref is an edge point on the page border
        let ep = c.store.node(w.refs[0]).unwrap();
        assert!((ep.lat - c.page.bbox.ru.lat).abs() < 1e-9);
        assert_eq!(ep.attr.get_tag("osmchart:cat_poly"), Some("edge_point"));
    }

    #[test]
    fn test_trim_way_all_outside() {
        let mut c = ctx();
        init_cat_poly(&mut c);
        c.store.put(Node::new(1, 47.0, 15.0));
        c.store.put(Node::new(2, 47.5, 15.0));
        c.store.put(Way::new(10, vec![1, 2]));
        assert!(trim_way(&mut c, 10, false).is_none());
    }
}
