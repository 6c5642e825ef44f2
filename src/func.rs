//! The non-graphical rule actions.
//!
//! Every action is a small state struct with `ini`/`main`/`fini` entry
//! points following the integer-code protocol of the engine: a negative
//! return from `ini` is fatal, a positive one disables the rule, results
//! from `main` are logged but not propagated.

use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::Sender;
use log::{debug, info, warn};

use crate::action::Edit;
use crate::context::Context;
use crate::elements::{Id, Node, Object, ObjKind, Tag, Way};
use crate::geo::{coord_diff, course_diff, fmod2, Coord, PolarCoord};
use crate::page::{parse_length_def, PageGeom, Unit};
use crate::rules::{match_tags, tod, Rule, TagMatch, TagTemplate};
use crate::store::{RevRef, Store};

const MAX_SHAPE_PCOUNT: usize = 2000;

/// Calculates the area and the centroid of a closed polygon with Gauss's
/// area formula (shoelace formula). A positive area means the nodes are
/// ordered counterclockwise, a negative one clockwise. The area is
/// measured in square nautical miles.
pub fn poly_area(store: &Store, w: &Way) -> Option<(Coord, f64)> {
    if !w.is_closed() {
        return None;
    }

    let mut n1 = match store.node(w.refs[0]) {
        Some(n) => n,
        None => {
            warn!(
                "something is wrong with way {}: node does not exist",
                w.attr.id
            );
            return None;
        }
    };

    let mut ar = 0.0;
    let mut clat = 0.0;
    let mut clon = 0.0;

    for i in 0..w.refs.len() - 1 {
        let n0 = n1;
        n1 = match store.node(w.refs[i + 1]) {
            Some(n) => n,
            None => {
                warn!(
                    "something is wrong with way {}: node does not exist",
                    w.attr.id
                );
                return None;
            }
        };

        let x0 = n0.lon * n0.lat.to_radians().cos();
        let x1 = n1.lon * n1.lat.to_radians().cos();
        let f = x0 * n1.lat - x1 * n0.lat;
        clon += (x0 + x1) * f;
        clat += (n0.lat + n1.lat) * f;
        ar += f;
    }

    clat /= 3.0 * ar;
    clon /= 3.0 * ar * clat.to_radians().cos();
    ar *= 1800.0;

    Some((Coord::new(clat, clon), ar))
}

/// The length of a way along its (available) nodes, in degrees.
pub fn poly_len(store: &Store, w: &Way) -> f64 {
    let mut dist = 0.0;
    let mut last: Option<Coord> = None;
    for &r in &w.refs {
        let Some(n) = store.node(r) else {
            warn!("node {} of way {} does not exist", r, w.attr.id);
            continue;
        };
        let c = Coord::new(n.lat, n.lon);
        if let Some(prev) = last {
            dist += coord_diff(&prev, &c).dist;
        }
        last = Some(c);
    }
    dist
}

fn attr_tod(obj: &Object, key: &str) -> Option<f64> {
    match obj.attr().get_tag(key) {
        Some(v) => Some(tod(v)),
        None => {
            info!("object {} has no tag '{key}=*'", obj.id());
            None
        }
    }
}

// ---------------------------------------------------------------------------
// enable / disable

/// Sets the visibility of matched objects.
pub struct Visibility {
    pub visible: bool,
}

impl Visibility {
    pub fn main(&mut self, ctx: &mut Context, rule: &Rule, id: Id) -> i32 {
        if let Some(obj) = ctx.store.get_mut(rule.kind(), id) {
            obj.attr_mut().visible = self.visible;
        }
        0
    }
}

// ---------------------------------------------------------------------------
// enable_rule / disable_rule

/// Sets the visibility of another rule, addressed by its id.
pub struct RuleSwitch {
    pub enable: bool,
    target: Id,
}

impl RuleSwitch {
    pub fn new(enable: bool) -> RuleSwitch {
        RuleSwitch { enable, target: 0 }
    }

    pub fn ini(&mut self, ctx: &mut Context, rule: &Rule) -> i32 {
        let Some(id) = rule.params().get_i64("id") else {
            warn!("rule requires missing parameter 'id'");
            return -1;
        };
        if ctx.rules.get(rule.kind(), id).is_none() {
            return -1;
        }
        self.target = id;
        0
    }

    pub fn main(&mut self, ctx: &mut Context, rule: &Rule, _id: Id) -> i32 {
        if let Some(r) = ctx.rules.get_mut(rule.kind(), self.target) {
            r.template.attr_mut().visible = self.enable;
        }
        0
    }
}

// ---------------------------------------------------------------------------
// poly_area / poly_centroid / poly_len

/// Tags each closed way with its area in square nautical miles. Runs on
/// the worker pool.
pub struct PolyArea;

impl PolyArea {
    pub fn par_main(&self, store: &Store, _page: &PageGeom, id: Id, out: &Sender<Edit>) {
        let Some(w) = store.way(id) else { return };
        if let Some((_, ar)) = poly_area(store, w) {
            let _ = out.send(Edit::Tags {
                kind: ObjKind::Way,
                id,
                tags: vec![Tag::new("osmchart:area", format!("{:.8}", ar.abs()))],
            });
        }
    }

    pub fn main(&mut self, ctx: &mut Context, _rule: &Rule, id: Id) -> i32 {
        let Some(w) = ctx.store.way(id) else { return 0 };
        if let Some((_, ar)) = poly_area(&ctx.store, w) {
            let tag = Tag::new("osmchart:area", format!("{:.8}", ar.abs()));
            if let Some(w) = ctx.store.way_mut(id) {
                w.attr.tags.push(tag);
            }
        }
        0
    }
}

/// Creates a node at the centroid of each closed way, carrying the way's
/// tags. Runs on the worker pool.
pub struct PolyCentroid;

impl PolyCentroid {
    fn centroid_node(store: &Store, id: Id) -> Option<Node> {
        let w = store.way(id)?;
        let (c, _) = poly_area(store, w)?;
        let mut n = Node::generated(store.unique_node_id(), c.lat, c.lon);
        n.attr.add_tag("osmchart:id:way", format!("{}", w.attr.id));
        n.attr.tags.extend(w.attr.tags.iter().cloned());
        Some(n)
    }

    pub fn par_main(&self, store: &Store, _page: &PageGeom, id: Id, out: &Sender<Edit>) {
        if let Some(n) = Self::centroid_node(store, id) {
            let _ = out.send(Edit::Put(n.into()));
        }
    }

    pub fn main(&mut self, ctx: &mut Context, _rule: &Rule, id: Id) -> i32 {
        if let Some(n) = Self::centroid_node(&ctx.store, id) {
            ctx.store.put(n);
        }
        0
    }
}

/// Tags each way with its length in nautical miles.
pub struct PolyLen;

impl PolyLen {
    pub fn par_main(&self, store: &Store, _page: &PageGeom, id: Id, out: &Sender<Edit>) {
        let Some(w) = store.way(id) else { return };
        let len = poly_len(store, w) * 60.0;
        let _ = out.send(Edit::Tags {
            kind: ObjKind::Way,
            id,
            tags: vec![Tag::new("osmchart:length", format!("{len:.8}"))],
        });
    }

    pub fn main(&mut self, ctx: &mut Context, _rule: &Rule, id: Id) -> i32 {
        let Some(w) = ctx.store.way(id) else { return 0 };
        let len = poly_len(&ctx.store, w) * 60.0;
        if let Some(w) = ctx.store.way_mut(id) {
            w.attr.tags.push(Tag::new("osmchart:length", format!("{len:.8}")));
        }
        0
    }
}

// ---------------------------------------------------------------------------
// reverse_way / set_cw / set_ccw

/// Reverses the interior of a way's reference list, keeping the end points
/// in place.
fn reverse_way(w: &mut Way) {
    let cnt = w.refs.len();
    for i in 1..cnt / 2 {
        w.refs.swap(i, cnt - i - 1);
    }
}

pub struct ReverseWay;

impl ReverseWay {
    pub fn ini(&mut self, _ctx: &mut Context, rule: &Rule) -> i32 {
        if rule.kind() != ObjKind::Way {
            warn!("reverse_way is only applicable to ways");
            return 1;
        }
        0
    }

    pub fn main(&mut self, ctx: &mut Context, _rule: &Rule, id: Id) -> i32 {
        if let Some(w) = ctx.store.way_mut(id) {
            reverse_way(w);
        }
        0
    }
}

/// Forces the node order of closed ways to clockwise or counterclockwise.
pub struct SetDirection {
    /// true for counterclockwise (positive area).
    pub ccw: bool,
}

impl SetDirection {
    pub fn main(&mut self, ctx: &mut Context, _rule: &Rule, id: Id) -> i32 {
        let Some(w) = ctx.store.way(id) else { return 0 };
        if !w.is_closed() {
            return 0;
        }
        let Some((_, ar)) = poly_area(&ctx.store, w) else {
            return 0;
        };
        if (ar < 0.0 && self.ccw) || (ar > 0.0 && !self.ccw) {
            if let Some(w) = ctx.store.way_mut(id) {
                reverse_way(w);
            }
        }
        0
    }
}

// ---------------------------------------------------------------------------
// shape

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ShapeType {
    #[default]
    Regular,
    Sectored,
    Stared,
}

/// Angular limit of a sector: either a fixed angle in degrees or the name
/// of a tag holding it.
#[derive(Clone, Debug)]
pub enum AngleSpec {
    Deg(f64),
    Key(String),
}

impl AngleSpec {
    fn resolve(&self, obj: &Object) -> Option<f64> {
        match self {
            AngleSpec::Deg(d) => Some(*d),
            AngleSpec::Key(k) => attr_tod(obj, k),
        }
    }
}

/// Generates an N-point closed way approximating a regular polygon or
/// circle centered on each matched node.
#[derive(Default)]
pub struct Shape {
    pcount: usize,
    /// Radius in mm.
    size: f64,
    angle: f64,
    weight: f64,
    phase: f64,
    key: Option<String>,
    start: Option<AngleSpec>,
    end: Option<AngleSpec>,
    subtype: ShapeType,
    r2: f64,
}

impl Shape {
    pub fn ini(&mut self, ctx: &mut Context, rule: &Rule) -> i32 {
        let params = rule.params();
        let pcount = params.get_f64("nodes");
        let style = params.get("style").map(str::to_string);
        if pcount.is_none() && style.is_none() {
            warn!("action 'shape' requires parameter 'style' or 'nodes'");
            return 1;
        }

        self.weight = params.get_f64("weight").unwrap_or(1.0);
        self.phase = params.get_f64("phase").unwrap_or(0.0).to_radians();

        let spec_of = |key: &str| -> Option<AngleSpec> {
            params.get_f64_err(key).map(|(v, err)| {
                if err {
                    AngleSpec::Key(params.get(key).unwrap_or("").to_string())
                } else {
                    AngleSpec::Deg(v)
                }
            })
        };
        self.start = spec_of("start");
        self.end = spec_of("end");

        if let Some(s) = params.get("subtype") {
            if s.eq_ignore_ascii_case("sectored") {
                self.subtype = ShapeType::Sectored;
            } else if s.eq_ignore_ascii_case("stared") {
                self.subtype = ShapeType::Stared;
            } else {
                warn!("unknown subtype '{s}'");
            }
        }

        self.r2 = params.get_f64("r2").unwrap_or(0.0);

        self.pcount = match pcount {
            Some(n) if n < 3.0 => {
                warn!("value for 'nodes' must be at least 3");
                return 1;
            }
            Some(n) if n > MAX_SHAPE_PCOUNT as f64 => {
                warn!("'nodes' must not exceed {MAX_SHAPE_PCOUNT}");
                return 1;
            }
            Some(n) => n as usize,
            None => match style.as_deref() {
                Some("triangle") => 3,
                Some("square") => 4,
                Some("circle") => MAX_SHAPE_PCOUNT,
                Some(s) => {
                    warn!("unknown shape '{s}'");
                    return 1;
                }
                None => unreachable!(),
            },
        };

        self.size = match params.get_f64("radius") {
            Some(r) if r > 0.0 => r,
            Some(_) => 1.0,
            None => {
                warn!("action 'shape' requires parameter 'radius', defaults to 1.0mm");
                1.0
            }
        };

        // recalculate node count in case of a circle: one node every 3 px
        // of circumference
        if self.pcount == MAX_SHAPE_PCOUNT {
            self.pcount = (ctx
                .page
                .unit_to_px(2.0 * self.size * std::f64::consts::PI, Unit::Mm)
                / 3.0)
                .max(3.0) as usize;
        }

        self.angle = params.get_f64("angle").unwrap_or(0.0);
        self.key = params.get("key").map(str::to_string);

        debug!(
            "nodes = {}, radius = {:.2}, angle = {:.2}, subtype = {:?}, r2 = {}",
            self.pcount, self.size, self.angle, self.subtype, self.r2
        );
        0
    }

    fn shape_node(&self, ctx: &mut Context, center: &Node) {
        let obj = Object::Node(center.clone());
        let mut angle = std::f64::consts::FRAC_PI_2;
        if let Some(key) = &self.key {
            if let Some(v) = attr_tod(&obj, key) {
                angle = (90.0 - v).to_radians();
            }
        }

        let start = fmod2(
            self.start
                .as_ref()
                .and_then(|s| s.resolve(&obj))
                .unwrap_or(0.0)
                .to_radians()
                + std::f64::consts::FRAC_PI_2,
            2.0 * std::f64::consts::PI,
        );
        let end = fmod2(
            self.end
                .as_ref()
                .and_then(|s| s.resolve(&obj))
                .unwrap_or(360.0)
                .to_radians()
                + std::f64::consts::FRAC_PI_2,
            2.0 * std::f64::consts::PI,
        );

        let radius = ctx.page.mm2lat(self.size);
        angle += self.angle.to_radians();
        let step = 2.0 * std::f64::consts::PI / self.pcount as f64;

        let a = radius;
        let b = radius * self.weight;
        let coslat = center.lat.to_radians().cos();
        let ellipse = |a: f64, b: f64, t: f64| -> (f64, f64) {
            let lat = center.lat + a * t.cos() * (-angle).cos() - b * t.sin() * (-angle).sin();
            let lon = center.lon
                + (a * t.cos() * (-angle).sin() + b * t.sin() * (-angle).cos()) / coslat;
            (lat, lon)
        };

        let mut refs: Vec<Id> = Vec::with_capacity(self.pcount + 2);
        debug!("generating shape way with <={} nodes", self.pcount);

        for i in 0..self.pcount {
            let t = step * i as f64 - self.phase;
            if self.start.is_some() && start > t {
                continue;
            }
            if self.end.is_some() && t > end {
                break;
            }

            let (lat, lon) = ellipse(a, b, t);
            let nd = Node::generated(ctx.store.unique_node_id(), lat, lon);
            let nd_id = nd.attr.id;
            ctx.store.put(nd);
            refs.push(nd_id);

            if self.subtype == ShapeType::Stared {
                let inner = if self.r2 > 0.0 {
                    let rr = ctx.page.mm2lat(self.r2);
                    let (lat, lon) = ellipse(rr, rr * self.weight, t);
                    let m = Node::generated(ctx.store.unique_node_id(), lat, lon);
                    let m_id = m.attr.id;
                    ctx.store.put(m);
                    m_id
                } else {
                    center.attr.id
                };
                let mut v = Way::generated(ctx.store.unique_way_id(), vec![inner, nd_id]);
                v.attr.tags.extend(center.attr.tags.iter().cloned());
                ctx.store.put(v);
            }
        }

        debug!("{} nodes added", refs.len());
        if !refs.is_empty() && self.subtype != ShapeType::Stared {
            if self.start.is_none() && self.end.is_none() {
                refs.push(refs[0]);
            } else if self.subtype == ShapeType::Sectored {
                refs.push(center.attr.id);
                refs.push(refs[0]);
            }
            let mut w = Way::generated(ctx.store.unique_way_id(), refs);
            w.attr.tags.extend(center.attr.tags.iter().cloned());
            ctx.store.put(w);
        }
    }

    pub fn main(&mut self, ctx: &mut Context, rule: &Rule, id: Id) -> i32 {
        match rule.kind() {
            ObjKind::Node => {
                let Some(n) = ctx.store.node(id).cloned() else {
                    return 0;
                };
                self.shape_node(ctx, &n);
                0
            }
            ObjKind::Way => {
                let Some(refs) = ctx.store.way(id).map(|w| w.refs.clone()) else {
                    return 0;
                };
                for r in refs {
                    let Some(n) = ctx.store.node(r).cloned() else {
                        warn!("node {r} of way {id} does not exist");
                        continue;
                    };
                    self.shape_node(ctx, &n);
                }
                0
            }
            ObjKind::Relation => {
                warn!("shape() on this object type not supported");
                1
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ins_eqdist

/// Inserts synthetic nodes at equidistant geodesic intervals along a way.
/// Each new node carries the accumulated distance in nautical miles and
/// the leg bearing.
pub struct InsEqdist {
    /// Interval in degrees.
    dist: f64,
}

impl Default for InsEqdist {
    fn default() -> InsEqdist {
        InsEqdist { dist: 2.0 / 60.0 }
    }
}

impl InsEqdist {
    pub fn ini(&mut self, ctx: &mut Context, rule: &Rule) -> i32 {
        if let Some(s) = rule.params().get("distance") {
            match parse_length_def(s, Unit::Nm) {
                Ok(v) => self.dist = ctx.page.value_in(&v, Unit::Deg).abs(),
                Err(_) => {
                    warn!("cannot parse distance '{s}'");
                    return 1;
                }
            }
        }
        debug!("distance = {:.3} nm", self.dist * 60.0);
        0
    }

    pub fn main(&mut self, ctx: &mut Context, _rule: &Rule, id: Id) -> i32 {
        let Some(w) = ctx.store.way(id) else { return 0 };
        let way_tags = w.attr.tags.clone();
        let mut refs = w.refs.clone();
        if refs.len() < 2 {
            return 0;
        }

        // find the first available node (usually refs[0])
        let mut i = 0;
        let mut src: Option<Coord> = None;
        while i < refs.len() - 1 {
            match ctx.store.node(refs[i]) {
                Some(n) => {
                    src = Some(Coord::new(n.lat, n.lon));
                    break;
                }
                None => {
                    warn!("node {} of way {} does not exist", refs[i], id);
                    i += 1;
                }
            }
        }
        let Some(mut sc) = src else {
            warn!("no valid node found in way {id}");
            return -1;
        };

        let mut ddist = self.dist;
        let mut pcnt = 0;
        i += 1;
        while i < refs.len() {
            let Some(d) = ctx.store.node(refs[i]) else {
                warn!("node {} of way {} does not exist", refs[i], id);
                i += 1;
                continue;
            };
            let dc = Coord::new(d.lat, d.lon);
            let pc = coord_diff(&sc, &dc);

            if pc.dist > ddist {
                pcnt += 1;
                let lat = sc.lat + ddist * pc.bearing.to_radians().cos();
                let lon = sc.lon
                    + ddist * pc.bearing.to_radians().sin()
                        / ((lat + sc.lat) / 2.0).to_radians().cos();

                let mut n = Node::generated(ctx.store.unique_node_id(), lat, lon);
                n.attr
                    .add_tag("distance", format!("{:.1}", self.dist * pcnt as f64 * 60.0));
                n.attr.add_tag("bearing", format!("{:.1}", pc.bearing));
                n.attr.tags.extend(way_tags.iter().cloned());
                let nid = n.attr.id;
                debug!("insert node {nid} into way {id}");
                ctx.store.put(n);

                sc = Coord::new(lat, lon);
                ddist = self.dist;
                refs.insert(i, nid);
            } else {
                ddist -= pc.dist;
                sc = dc;
            }
            i += 1;
        }

        if let Some(w) = ctx.store.way_mut(id) {
            w.refs = refs;
        }
        0
    }
}

// ---------------------------------------------------------------------------
// dist_median

/// Tags each way with the median distance of its legs in nautical miles.
pub struct DistMedian;

impl DistMedian {
    pub fn main(&mut self, ctx: &mut Context, _rule: &Rule, id: Id) -> i32 {
        let Some(w) = ctx.store.way(id) else { return 0 };
        let mut legs: Vec<f64> = Vec::with_capacity(w.refs.len());
        let mut last: Option<Coord> = None;
        for &r in &w.refs {
            let Some(n) = ctx.store.node(r) else { continue };
            let c = Coord::new(n.lat, n.lon);
            if let Some(prev) = last {
                legs.push(coord_diff(&prev, &c).dist);
            }
            last = Some(c);
        }
        if legs.is_empty() {
            return 0;
        }
        legs.sort_by(|a, b| a.total_cmp(b));
        let median = if legs.len() % 2 == 1 {
            legs[legs.len() / 2]
        } else {
            (legs[legs.len() / 2 - 1] + legs[legs.len() / 2]) / 2.0
        };
        if let Some(w) = ctx.store.way_mut(id) {
            w.attr
                .tags
                .push(Tag::new("osmchart:dist_median", format!("{:.8}", median * 60.0)));
        }
        0
    }
}

// ---------------------------------------------------------------------------
// strfmt

/// Formats a new tag value from other tags of the object. The format
/// string substitutes `%(key)` by the value of tag `key` and `%.N(key)` by
/// its numeric value with N decimals; `%%` is a literal percent sign.
pub struct Strfmt {
    fmt: String,
    addtag: String,
}

impl Default for Strfmt {
    fn default() -> Strfmt {
        Strfmt {
            fmt: String::new(),
            addtag: String::new(),
        }
    }
}

impl Strfmt {
    pub fn ini(&mut self, _ctx: &mut Context, rule: &Rule) -> i32 {
        let params = rule.params();
        let Some(addtag) = params.get("addtag") else {
            warn!("parameter 'addtag' missing");
            return 1;
        };
        let Some(fmt) = params.get("format") else {
            warn!("parameter 'format' missing");
            return 1;
        };
        self.addtag = addtag.to_string();
        self.fmt = fmt.to_string();
        0
    }

    fn format(&self, obj: &Object) -> String {
        let mut out = String::with_capacity(self.fmt.len());
        let mut it = self.fmt.chars().peekable();
        while let Some(c) = it.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            match it.peek() {
                Some('%') => {
                    it.next();
                    out.push('%');
                }
                Some('(') | Some('.') => {
                    let mut prec: Option<usize> = None;
                    if *it.peek().unwrap_or(&'\0') == '.' {
                        it.next();
                        let mut p = 0;
                        while let Some(d) = it.peek().and_then(|c| c.to_digit(10)) {
                            p = p * 10 + d as usize;
                            it.next();
                        }
                        prec = Some(p);
                    }
                    if it.peek() != Some(&'(') {
                        out.push('%');
                        continue;
                    }
                    it.next();
                    let mut key = String::new();
                    for c in it.by_ref() {
                        if c == ')' {
                            break;
                        }
                        key.push(c);
                    }
                    let val = obj.attr().get_tag(&key).unwrap_or("");
                    match prec {
                        Some(p) => out.push_str(&format!("{:.*}", p, tod(val))),
                        None => out.push_str(val),
                    }
                }
                _ => out.push('%'),
            }
        }
        out
    }

    pub fn main(&mut self, ctx: &mut Context, rule: &Rule, id: Id) -> i32 {
        let Some(obj) = ctx.store.get(rule.kind(), id) else {
            return 0;
        };
        let val = self.format(obj);
        debug!("adding tag '{}'='{val}' to object {id}", self.addtag);
        if let Some(obj) = ctx.store.get_mut(rule.kind(), id) {
            obj.attr_mut().set_tag(&self.addtag, val);
        }
        0
    }
}

// ---------------------------------------------------------------------------
// translate

/// Translates tag values through a template rule object serving as a
/// lookup table.
#[derive(Default)]
pub struct Translate {
    newtag: bool,
    tmpl_tags: Vec<Tag>,
    keys: Vec<TagTemplate>,
}

impl Translate {
    pub fn ini(&mut self, ctx: &mut Context, rule: &Rule) -> i32 {
        let params = rule.params();
        let keys: Vec<&str> = params.get_all("key").collect();
        if keys.is_empty() {
            warn!("mandatory param 'key' missing");
            return 1;
        }
        let Some(id) = params.get_i64("id") else {
            warn!("mandatory param 'id' missing");
            return 1;
        };
        let Some(tmpl) = ctx.rules.get(rule.kind(), id) else {
            warn!("no template with id = {id}");
            return 1;
        };

        self.newtag = params.get_bool("newtag");
        self.tmpl_tags = tmpl.template.tags().to_vec();
        self.keys = keys
            .iter()
            .map(|k| TagTemplate::literal(k, ""))
            .collect();
        debug!("found {} keys", self.keys.len());
        0
    }

    pub fn main(&mut self, ctx: &mut Context, rule: &Rule, id: Id) -> i32 {
        let Some(obj) = ctx.store.get_mut(rule.kind(), id) else {
            return 0;
        };
        for tmpl in &self.keys {
            let TagMatch::At(n) = match_tags(obj.tags(), tmpl) else {
                continue;
            };
            // the matched value serves as lookup key in the template
            let val = obj.tags()[n].v.clone();
            let Some(repl) = self.tmpl_tags.iter().find(|t| t.k == val) else {
                continue;
            };
            let attr = obj.attr_mut();
            if self.newtag {
                let key = format!("{}:local", attr.tags[n].k);
                attr.tags.push(Tag::new(key, repl.v.clone()));
            } else {
                attr.tags[n].v = repl.v.clone();
            }
        }
        0
    }
}

// ---------------------------------------------------------------------------
// mask

const NODE_MIN_DIST: f64 = 1.0 / 60.0;

/// Collects matched nodes and masks those packed closer than a minimum
/// distance, so that the renderer can skip them.
pub struct Mask {
    min_dist: f64,
    nodes: Vec<Id>,
}

impl Default for Mask {
    fn default() -> Mask {
        Mask {
            min_dist: NODE_MIN_DIST,
            nodes: Vec::new(),
        }
    }
}

impl Mask {
    pub fn ini(&mut self, _ctx: &mut Context, rule: &Rule) -> i32 {
        if rule.kind() != ObjKind::Node {
            warn!("mask() is implemented for nodes only, yet");
            return 1;
        }
        if let Some(d) = rule.params().get_f64("distance") {
            if d <= 0.0 {
                warn!("distance must be positive, setting to default");
            } else {
                self.min_dist = d / 60.0;
            }
        }
        0
    }

    pub fn main(&mut self, _ctx: &mut Context, _rule: &Rule, id: Id) -> i32 {
        self.nodes.push(id);
        0
    }

    pub fn fini(&mut self, ctx: &mut Context, _rule: &Rule) -> i32 {
        debug!("gathered {} nodes", self.nodes.len());
        let coords: Vec<(Id, Coord)> = self
            .nodes
            .iter()
            .filter_map(|&id| ctx.store.node(id).map(|n| (id, Coord::new(n.lat, n.lon))))
            .collect();

        let mut masked = vec![false; coords.len()];
        for i in 0..coords.len() {
            if masked[i] {
                continue;
            }
            for j in i + 1..coords.len() {
                if coord_diff(&coords[i].1, &coords[j].1).dist < self.min_dist {
                    masked[j] = true;
                }
            }
        }

        for (i, &(id, _)) in coords.iter().enumerate() {
            if masked[i] {
                if let Some(n) = ctx.store.node_mut(id) {
                    n.attr.add_tag("osmchart:mask", "yes");
                }
            }
        }

        self.nodes.clear();
        0
    }
}

// ---------------------------------------------------------------------------
// random

/// Tags matched objects with a uniform random number.
pub struct Random {
    is_double: bool,
    lo: i64,
    hi: i64,
    lod: f64,
    hid: f64,
    key: String,
    state: u64,
}

impl Default for Random {
    fn default() -> Random {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9e3779b97f4a7c15);
        Random {
            is_double: false,
            lo: 0,
            hi: i32::MAX as i64,
            lod: 0.0,
            hid: 1.0,
            key: "osmchart:random".to_string(),
            state: seed,
        }
    }
}

impl Random {
    fn next(&mut self) -> u64 {
        // splitmix64
        self.state = self.state.wrapping_add(0x9e3779b97f4a7c15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
        z ^ (z >> 31)
    }

    pub fn ini(&mut self, _ctx: &mut Context, rule: &Rule) -> i32 {
        let params = rule.params();
        self.is_double = params.get_bool("type");
        if self.is_double {
            self.lod = params.get_f64("lo").unwrap_or(0.0);
            self.hid = params.get_f64("hi").unwrap_or(1.0);
        } else {
            self.lo = params.get_i64("lo").unwrap_or(0);
            self.hi = params.get_i64("hi").unwrap_or(i32::MAX as i64);
        }
        if let Some(k) = params.get("key") {
            self.key = k.to_string();
        }
        0
    }

    pub fn main(&mut self, ctx: &mut Context, rule: &Rule, id: Id) -> i32 {
        let val = if self.is_double {
            let f = self.next() as f64 / u64::MAX as f64;
            format!("{:.6}", self.lod + f * (self.hid - self.lod))
        } else {
            let span = (self.hi - self.lo).max(1) as u64;
            format!("{}", self.lo + (self.next() % span) as i64)
        };
        if let Some(obj) = ctx.store.get_mut(rule.kind(), id) {
            obj.attr_mut().set_tag(&self.key, val);
        }
        0
    }
}

// ---------------------------------------------------------------------------
// bearings

/// Tags the interior nodes of a way with the course to the next node, the
/// course deviation and the peak direction of the bend.
pub struct Bearings;

impl Bearings {
    pub fn main(&mut self, ctx: &mut Context, _rule: &Rule, id: Id) -> i32 {
        let Some(w) = ctx.store.way(id) else { return 0 };
        let nodes: Vec<(Id, Coord)> = w
            .refs
            .iter()
            .filter_map(|&r| ctx.store.node(r).map(|n| (r, Coord::new(n.lat, n.lon))))
            .collect();
        if nodes.len() < 3 {
            warn!("not enough nodes of way {id} available");
            return 1;
        }

        for i in 1..nodes.len() - 1 {
            let pc0: PolarCoord = coord_diff(&nodes[i - 1].1, &nodes[i].1);
            let pc1 = coord_diff(&nodes[i].1, &nodes[i + 1].1);
            let cd = course_diff(pc0.bearing, pc1.bearing);
            let pk = fmod2(
                pc0.bearing - (180.0 - cd) / 2.0 + if cd < 0.0 { 180.0 } else { 0.0 },
                360.0,
            );
            if let Some(n) = ctx.store.node_mut(nodes[i].0) {
                n.attr.add_tag("osmchart:peakdir", format!("{pk:.1}"));
                n.attr.add_tag("osmchart:coursedev", format!("{cd:.1}"));
                n.attr.add_tag("osmchart:bearing", format!("{:.1}", pc1.bearing));
            }
        }
        0
    }
}

// ---------------------------------------------------------------------------
// inherit_tags

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum InheritDir {
    #[default]
    Up,
    Down,
}

/// Copies selected tags from matched objects to their parents (direction
/// UP, via the reverse index) or to their children (direction DOWN, via
/// refs and members).
#[derive(Default)]
pub struct InheritTags {
    force: bool,
    kind_filter: Option<ObjKind>,
    dir: InheritDir,
    keys: Vec<String>,
}

/// Copies tag `tag` onto the destination object unless it already has the
/// key; `force` overwrites existing values. Returns 1 if the tag was
/// added, 2 if it was overwritten, 0 otherwise.
fn copy_tag_cond(store: &mut Store, kind: ObjKind, id: Id, tag: &Tag, force: bool) -> i32 {
    let Some(dst) = store.get_mut(kind, id) else {
        debug!("no such object");
        return 0;
    };
    let attr = dst.attr_mut();
    match attr.find_tag(&tag.k) {
        None => {
            debug!("adding tag {} to {kind} {id}", tag.k);
            attr.tags.push(tag.clone());
            1
        }
        Some(m) if force => {
            debug!("overwriting tag {} of {kind} {id}", tag.k);
            attr.tags[m].v = tag.v.clone();
            2
        }
        Some(_) => 0,
    }
}

impl InheritTags {
    pub fn ini(&mut self, ctx: &mut Context, rule: &Rule) -> i32 {
        let params = rule.params();
        self.force = params.get_bool("force");

        if let Some(t) = params.get("object") {
            self.kind_filter = match t.to_ascii_lowercase().as_str() {
                "way" => Some(ObjKind::Way),
                "relation" => Some(ObjKind::Relation),
                "node" => Some(ObjKind::Node),
                _ => {
                    warn!("unknown object type '{t}'");
                    None
                }
            };
        }

        if let Some(d) = params.get("direction") {
            self.dir = match d.to_ascii_lowercase().as_str() {
                "up" => InheritDir::Up,
                "down" => InheritDir::Down,
                _ => {
                    warn!("unknown direction '{d}', defaulting to UP");
                    InheritDir::Up
                }
            };
        }

        if self.kind_filter == Some(ObjKind::Node) && self.dir == InheritDir::Up {
            warn!("object type 'node' doesn't make sense together with direction 'up', ignoring 'object'");
            self.kind_filter = None;
        }

        if self.dir == InheritDir::Down {
            if rule.kind() == ObjKind::Node {
                warn!("direction 'down' doesn't make sense on node rules, ignoring rule");
                return 1;
            }
            if rule.kind() == ObjKind::Way
                && self.kind_filter.is_some()
                && self.kind_filter != Some(ObjKind::Node)
            {
                warn!("ways always have just nodes as children, ignoring 'object'");
                self.kind_filter = None;
            }
        }

        self.keys = params.get_all("key").map(str::to_string).collect();

        // force the engine to create the reverse index
        ctx.need_index += 1;
        0
    }

    pub fn main(&mut self, ctx: &mut Context, rule: &Rule, id: Id) -> i32 {
        let kind = rule.kind();
        for key in &self.keys {
            let Some(obj) = ctx.store.get(kind, id) else {
                return 0;
            };
            let Some(n) = obj.attr().find_tag(key) else {
                continue;
            };
            let tag = obj.tags()[n].clone();

            match self.dir {
                InheritDir::Up => {
                    let parents: Vec<RevRef> = ctx.store.rev_list(kind, id).to_vec();
                    for p in parents {
                        if let Some(f) = self.kind_filter {
                            if f != p.kind {
                                continue;
                            }
                        }
                        copy_tag_cond(&mut ctx.store, p.kind, p.id, &tag, self.force);
                    }
                }
                InheritDir::Down => {
                    let children: Vec<(ObjKind, Id)> = match obj {
                        Object::Relation(r) => r
                            .members
                            .iter()
                            .filter(|m| {
                                self.kind_filter.map(|f| f == m.kind).unwrap_or(true)
                            })
                            .map(|m| (m.kind, m.id))
                            .collect(),
                        Object::Way(w) => {
                            w.refs.iter().map(|&r| (ObjKind::Node, r)).collect()
                        }
                        Object::Node(_) => Vec::new(),
                    };
                    for (ckind, cid) in children {
                        copy_tag_cond(&mut ctx.store, ckind, cid, &tag, self.force);
                    }
                }
            }
        }
        0
    }
}

// ---------------------------------------------------------------------------
// zeroway

/// Returns the position of `id` within the way if it is the first or last
/// node.
fn first_or_last(w: &Way, id: Id) -> Option<usize> {
    if w.first_ref() == Some(id) {
        return Some(0);
    }
    if w.last_ref() == Some(id) {
        return Some(w.refs.len() - 1);
    }
    None
}

/// Inserts a way of length zero at a node shared as end point by two or
/// more ways and reroutes all but one of them to a new node at the same
/// position. This lets the renderer draw adjacent sections with
/// independent tags.
pub struct Zeroway;

impl Zeroway {
    pub fn ini(&mut self, ctx: &mut Context, _rule: &Rule) -> i32 {
        // force the engine to create the reverse index
        ctx.need_index += 1;
        0
    }

    pub fn main(&mut self, ctx: &mut Context, _rule: &Rule, id: Id) -> i32 {
        debug!("zeroway({id})");
        let parents = ctx.store.rev_list(ObjKind::Node, id).to_vec();
        if parents.is_empty() {
            debug!("no rev pointers for node {id}");
            return 0;
        }

        // collect the ways ending at this node
        let mut ends: Vec<(Id, usize)> = Vec::new();
        for p in &parents {
            if p.kind != ObjKind::Way {
                continue;
            }
            let Some(w) = ctx.store.way(p.id) else { continue };
            if let Some(pos) = first_or_last(w, id) {
                ends.push((p.id, pos));
            }
        }

        if ends.len() < 2 {
            debug!("node {id} has no suitable way");
            return 0;
        }

        let Some(n) = ctx.store.node(id).cloned() else {
            return 0;
        };

        // new blind node at the same position
        let blind = Node::generated(ctx.store.unique_node_id(), n.lat, n.lon);
        let blind_id = blind.attr.id;
        ctx.store.put(blind);

        // zero length way between the original and the blind node,
        // inheriting the node's tags
        let mut zw = Way::generated(ctx.store.unique_way_id(), vec![id, blind_id]);
        zw.attr.tags.extend(n.attr.tags.iter().cloned());
        let zw_id = zw.attr.id;
        ctx.store.put(zw);
        debug!("new zeroway {zw_id} created");

        ctx.store.add_rev_ptr(ObjKind::Node, id, RevRef::way(zw_id));
        ctx.store
            .add_rev_ptr(ObjKind::Node, blind_id, RevRef::way(zw_id));

        // reroute all but the first way to the blind node
        for &(wid, pos) in &ends[1..] {
            if let Some(w) = ctx.store.way_mut(wid) {
                w.refs[pos] = blind_id;
            }
            debug!("way {wid} modified");
            ctx.store.remove_rev_ptr(ObjKind::Node, id, RevRef::way(wid));
            ctx.store
                .add_rev_ptr(ObjKind::Node, blind_id, RevRef::way(wid));
        }

        0
    }
}

// ---------------------------------------------------------------------------
// split

/// Splits every way in which a matched node lies strictly interior,
/// producing a second way from the node to the way's end. The reverse
/// index is kept consistent for all moved refs.
pub struct Split;

impl Split {
    pub fn ini(&mut self, ctx: &mut Context, _rule: &Rule) -> i32 {
        // force the engine to create the reverse index
        ctx.need_index += 1;
        0
    }

    pub fn main(&mut self, ctx: &mut Context, _rule: &Rule, id: Id) -> i32 {
        let parents = ctx.store.rev_list(ObjKind::Node, id).to_vec();

        for p in parents {
            if p.kind != ObjKind::Way {
                continue;
            }
            let Some(w) = ctx.store.way(p.id) else { continue };
            let Some(i) = w.refs.iter().position(|&r| r == id) else {
                warn!("node not found in reverse pointer to way, this should not happen");
                continue;
            };
            if i == 0 || i == w.refs.len() - 1 {
                info!("way cannot be split at first/last node");
                continue;
            }

            debug!("splitting way {} at ref index {i}", p.id);
            let tags = w.attr.tags.clone();
            let tail: Vec<Id> = w.refs[i..].to_vec();

            let mut new_way = Way::generated(ctx.store.unique_way_id(), tail.clone());
            new_way.attr.tags = tags;
            let new_id = new_way.attr.id;
            ctx.store.put(new_way);

            // shorten the original way to end at the split node
            let org_refs;
            if let Some(w) = ctx.store.way_mut(p.id) {
                w.refs.truncate(i + 1);
                org_refs = w.refs.clone();
            } else {
                continue;
            }

            // move the reverse pointers of the tail
            for &r in &tail {
                if org_refs.contains(&r) {
                    ctx.store.add_rev_ptr(ObjKind::Node, r, RevRef::way(new_id));
                } else {
                    ctx.store.remove_rev_ptr(ObjKind::Node, r, RevRef::way(p.id));
                    ctx.store.add_rev_ptr(ObjKind::Node, r, RevRef::way(new_id));
                }
            }
        }

        0
    }
}

// ---------------------------------------------------------------------------
// sub

/// Invokes the subroutine rules of a given version on the nodes of each
/// matched way.
#[derive(Default)]
pub struct Sub {
    version: u32,
}

impl Sub {
    pub fn ini(&mut self, _ctx: &mut Context, rule: &Rule) -> i32 {
        match rule.params().get_i64("version") {
            Some(v) => {
                self.version = v as u32;
                0
            }
            None => {
                warn!("parameter 'version' missing");
                1
            }
        }
    }

    pub fn main(&mut self, ctx: &mut Context, rule: &Rule, id: Id) -> i32 {
        if rule.kind() != ObjKind::Way {
            warn!("sub() is only available for ways yet");
            return 1;
        }
        let Some(refs) = ctx.store.way(id).map(|w| w.refs.clone()) else {
            return 0;
        };

        for rid in ctx.rules.ids(ObjKind::Node) {
            let Some(mut sr) = ctx.rules.remove(ObjKind::Node, rid) else {
                continue;
            };
            if sr.version() == self.version && sr.template.attr().visible {
                for &nid in &refs {
                    if ctx.store.node(nid).is_none() {
                        warn!("node {nid} of way {id} does not exist");
                        continue;
                    }
                    crate::core::apply_rule_obj(ctx, &mut sr, nid);
                }
            }
            ctx.rules.put(sr);
        }
        0
    }

    pub fn fini(&mut self, ctx: &mut Context, _rule: &Rule) -> i32 {
        for rid in ctx.rules.ids(ObjKind::Node) {
            let Some(mut sr) = ctx.rules.remove(ObjKind::Node, rid) else {
                continue;
            };
            if sr.version() == self.version {
                crate::core::call_fini(ctx, &mut sr);
            }
            ctx.rules.put(sr);
        }
        0
    }
}

// ---------------------------------------------------------------------------
// del_match_tags

/// Deletes from each matched object the tags that match the rule's
/// template predicates.
#[derive(Default)]
pub struct DelMatchTags {
    count: u64,
}

impl DelMatchTags {
    pub fn main(&mut self, ctx: &mut Context, rule: &Rule, id: Id) -> i32 {
        let Some(obj) = ctx.store.get_mut(rule.kind(), id) else {
            return 0;
        };
        for tmpl in &rule.predicates {
            if let TagMatch::At(n) = match_tags(obj.tags(), tmpl) {
                obj.attr_mut().tags.remove(n);
                self.count += 1;
            }
        }
        0
    }

    pub fn fini(&mut self, _ctx: &mut Context, _rule: &Rule) -> i32 {
        debug!("{} tags deleted", self.count);
        self.count = 0;
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Config;

    fn ctx() -> Context {
        Context::new(Config {
            threads: 0,
            ..Config::default()
        })
        .unwrap()
    }

    fn square(ctx: &mut Context, ccw: bool) -> Id {
        ctx.store.put(Node::new(1, 0.0, 0.0));
        ctx.store.put(Node::new(2, 0.0, 1.0));
        ctx.store.put(Node::new(3, 1.0, 1.0));
        ctx.store.put(Node::new(4, 1.0, 0.0));
        let refs = if ccw {
            vec![1, 2, 3, 4, 1]
        } else {
            vec![1, 4, 3, 2, 1]
        };
        ctx.store.put(Way::new(10, refs));
        10
    }

    #[test]
    fn test_poly_area_sign() {
        let mut c = ctx();
        let id = square(&mut c, true);
        let w = c.store.way(id).unwrap();
        let (center, ar) = poly_area(&c.store, w).unwrap();
        assert!(ar > 0.0, "ccw polygon must have positive area");
        assert!((center.lat - 0.5).abs() < 0.01);

        let mut c = ctx();
        let id = square(&mut c, false);
        let w = c.store.way(id).unwrap();
        let (_, ar) = poly_area(&c.store, w).unwrap();
        assert!(ar < 0.0, "cw polygon must have negative area");
    }

    #[test]
    fn test_set_direction() {
        let mut c = ctx();
        let id = square(&mut c, true);
        let rule = rule_for_way();
        let mut cw = SetDirection { ccw: false };
        cw.main(&mut c, &rule, id);
        let (_, ar) = poly_area(&c.store, c.store.way(id).unwrap()).unwrap();
        assert!(ar < 0.0);

        let mut ccw = SetDirection { ccw: true };
        ccw.main(&mut c, &rule, id);
        let (_, ar) = poly_area(&c.store, c.store.way(id).unwrap()).unwrap();
        assert!(ar > 0.0);
    }

    fn rule_for_way() -> Rule {
        let mut w = Way::new(999, vec![]);
        w.attr.add_tag("_action_", "enable");
        Rule::compile(w.into())
    }

    fn rule_for_node(action: &str) -> Rule {
        let mut n = Node::new(999, 0.0, 0.0);
        n.attr.add_tag("_action_", action);
        Rule::compile(n.into())
    }

    #[test]
    fn test_ins_eqdist_spacing() {
        let mut c = ctx();
        // 10 nm along the meridian at the equator
        c.store.put(Node::new(1, 0.0, 0.0));
        c.store.put(Node::new(2, 10.0 / 60.0, 0.0));
        c.store.put(Way::new(10, vec![1, 2]));

        let mut rule = rule_for_way();
        rule.spec = crate::rules::ActionSpec::parse("ins_eqdist:distance=2").map(Some).unwrap();

        let mut act = InsEqdist::default();
        assert_eq!(act.ini(&mut c, &rule), 0);
        act.main(&mut c, &rule, 10);

        let w = c.store.way(10).unwrap();
        assert_eq!(w.refs.len(), 6);
        assert_eq!(w.refs[0], 1);
        assert_eq!(*w.refs.last().unwrap(), 2);
        for (i, &r) in w.refs[1..5].iter().enumerate() {
            let n = c.store.node(r).unwrap();
            let expect = 2.0 / 60.0 * (i + 1) as f64;
            assert!((n.lat - expect).abs() < 1e-9, "node {i} at {}", n.lat);
            assert_eq!(
                n.attr.get_tag("distance"),
                Some(format!("{:.1}", 2.0 * (i + 1) as f64).as_str())
            );
            assert_eq!(n.attr.get_tag("bearing"), Some("0.0"));
        }
    }

    #[test]
    fn test_zeroway_reroutes() {
        let mut c = ctx();
        c.store.put(Node::new(1, 0.0, 0.0));
        c.store.put(Node::new(2, 1.0, 0.0));
        c.store.put(Node::new(3, 2.0, 0.0));
        c.store.put(Way::new(10, vec![1, 2]));
        c.store.put(Way::new(11, vec![2, 3]));
        c.store.build_rev_index();

        let rule = rule_for_node("zeroway");
        let mut act = Zeroway;
        act.ini(&mut c, &rule);
        act.main(&mut c, &rule, 2);

        // way 10 keeps node 2, way 11 is rerouted to the blind node
        assert_eq!(c.store.way(10).unwrap().refs, vec![1, 2]);
        let w11 = c.store.way(11).unwrap().refs.clone();
        assert_ne!(w11[0], 2);
        let blind = w11[0];
        let bn = c.store.node(blind).unwrap();
        assert_eq!((bn.lat, bn.lon), (1.0, 0.0));

        // a zero length way connects the two nodes
        let zw: Vec<&Way> = c
            .store
            .rev_list(ObjKind::Node, blind)
            .iter()
            .filter_map(|r| c.store.way(r.id))
            .filter(|w| w.refs == vec![2, blind])
            .collect();
        assert_eq!(zw.len(), 1);

        // reverse index is consistent after the reroute
        assert!(!c
            .store
            .rev_list(ObjKind::Node, 2)
            .contains(&RevRef::way(11)));
        assert!(c
            .store
            .rev_list(ObjKind::Node, blind)
            .contains(&RevRef::way(11)));
    }

    #[test]
    fn test_split_interior() {
        let mut c = ctx();
        for (id, lat) in [(1, 0.0), (2, 1.0), (3, 2.0), (4, 3.0)] {
            c.store.put(Node::new(id, lat, 0.0));
        }
        c.store.put(Way::new(10, vec![1, 2, 3, 4]));
        c.store.build_rev_index();

        let rule = rule_for_node("split");
        let mut act = Split;
        act.ini(&mut c, &rule);
        act.main(&mut c, &rule, 3);

        assert_eq!(c.store.way(10).unwrap().refs, vec![1, 2, 3]);
        let parents = c.store.rev_list(ObjKind::Node, 4).to_vec();
        assert_eq!(parents.len(), 1);
        let new_way = c.store.way(parents[0].id).unwrap();
        assert_eq!(new_way.refs, vec![3, 4]);
        // the split node belongs to both ways
        assert!(c.store.rev_list(ObjKind::Node, 3).contains(&RevRef::way(10)));
        assert!(c
            .store
            .rev_list(ObjKind::Node, 3)
            .contains(&RevRef::way(new_way.attr.id)));
    }

    #[test]
    fn test_split_endpoint_noop() {
        let mut c = ctx();
        for (id, lat) in [(1, 0.0), (2, 1.0), (3, 2.0)] {
            c.store.put(Node::new(id, lat, 0.0));
        }
        c.store.put(Way::new(10, vec![1, 2, 3]));
        c.store.build_rev_index();

        let rule = rule_for_node("split");
        let mut act = Split;
        act.main(&mut c, &rule, 1);
        assert_eq!(c.store.way(10).unwrap().refs, vec![1, 2, 3]);
        assert_eq!(c.store.len(ObjKind::Way), 1);
    }

    #[test]
    fn test_inherit_up() {
        let mut c = ctx();
        c.store.put(Node::new(1, 0.0, 0.0));
        let mut n = Node::new(2, 1.0, 0.0);
        n.attr.add_tag("depth", "4.5");
        c.store.put(n);
        c.store.put(Way::new(10, vec![1, 2]));
        c.store.build_rev_index();

        let mut rule = rule_for_node("inherit_tags");
        rule.spec = crate::rules::ActionSpec::parse("inherit_tags:key=depth").map(Some).unwrap();
        let mut act = InheritTags::default();
        assert_eq!(act.ini(&mut c, &rule), 0);
        act.main(&mut c, &rule, 2);

        assert_eq!(c.store.way(10).unwrap().attr.get_tag("depth"), Some("4.5"));
        // existing values survive without force
        act.main(&mut c, &rule, 2);
        assert_eq!(c.store.way(10).unwrap().attr.get_tag("depth"), Some("4.5"));
    }

    #[test]
    fn test_inherit_down_way() {
        let mut c = ctx();
        c.store.put(Node::new(1, 0.0, 0.0));
        c.store.put(Node::new(2, 1.0, 0.0));
        let mut w = Way::new(10, vec![1, 2]);
        w.attr.add_tag("name", "pier");
        c.store.put(w);
        c.store.build_rev_index();

        let mut rule = rule_for_way();
        rule.spec = crate::rules::ActionSpec::parse("inherit_tags:direction=down;key=name")
            .map(Some)
            .unwrap();
        let mut act = InheritTags::default();
        assert_eq!(act.ini(&mut c, &rule), 0);
        act.main(&mut c, &rule, 10);

        assert_eq!(c.store.node(1).unwrap().attr.get_tag("name"), Some("pier"));
        assert_eq!(c.store.node(2).unwrap().attr.get_tag("name"), Some("pier"));
    }

    #[test]
    fn test_strfmt() {
        let mut c = ctx();
        let mut n = Node::new(1, 0.0, 0.0);
        n.attr.add_tag("depth", "4.567");
        n.attr.add_tag("name", "shoal");
        c.store.put(n);

        let mut rule = rule_for_node("strfmt");
        rule.spec =
            crate::rules::ActionSpec::parse("strfmt:format=%(name) %.1(depth)m;addtag=label")
                .map(Some)
                .unwrap();
        let mut act = Strfmt::default();
        assert_eq!(act.ini(&mut c, &rule), 0);
        act.main(&mut c, &rule, 1);
        assert_eq!(
            c.store.node(1).unwrap().attr.get_tag("label"),
            Some("shoal 4.6m")
        );
    }

    #[test]
    fn test_shape_square() {
        let mut c = ctx();
        c.store.put(Node::new(1, 0.0, 0.0));
        let mut rule = rule_for_node("shape");
        rule.spec = crate::rules::ActionSpec::parse("shape:nodes=4;radius=1")
            .map(Some)
            .unwrap();
        let mut act = Shape::default();
        assert_eq!(act.ini(&mut c, &rule), 0);
        act.main(&mut c, &rule, 1);

        // one new closed way with 5 refs
        let ways: Vec<&Way> = c
            .store
            .iter(ObjKind::Way)
            .filter_map(|(_, o)| o.as_way())
            .collect();
        assert_eq!(ways.len(), 1);
        let w = ways[0];
        assert_eq!(w.refs.len(), 5);
        assert!(w.is_closed());

        // centroid of the generated nodes coincides with the source node
        let (mut clat, mut clon) = (0.0, 0.0);
        for &r in &w.refs[..4] {
            let n = c.store.node(r).unwrap();
            clat += n.lat;
            clon += n.lon;
        }
        assert!((clat / 4.0).abs() < 1e-9);
        assert!((clon / 4.0).abs() < 1e-9);

        // the radius is 1 mm at page scale
        let r_deg = c.page.mm2lat(1.0);
        let n0 = c.store.node(w.refs[0]).unwrap();
        let d = coord_diff(&Coord::new(0.0, 0.0), &Coord::new(n0.lat, n0.lon)).dist;
        assert!((d - r_deg).abs() / r_deg < 1e-6);
    }

    #[test]
    fn test_mask() {
        let mut c = ctx();
        c.store.put(Node::new(1, 0.0, 0.0));
        c.store.put(Node::new(2, 0.0001, 0.0));
        c.store.put(Node::new(3, 5.0, 0.0));

        let mut rule = rule_for_node("mask");
        rule.spec = crate::rules::ActionSpec::parse("mask:distance=1").map(Some).unwrap();
        let mut act = Mask::default();
        assert_eq!(act.ini(&mut c, &rule), 0);
        for id in [1, 2, 3] {
            act.main(&mut c, &rule, id);
        }
        act.fini(&mut c, &rule);

        assert_eq!(c.store.node(1).unwrap().attr.get_tag("osmchart:mask"), None);
        assert_eq!(
            c.store.node(2).unwrap().attr.get_tag("osmchart:mask"),
            Some("yes")
        );
        assert_eq!(c.store.node(3).unwrap().attr.get_tag("osmchart:mask"), None);
    }

    #[test]
    fn test_bearings() {
        let mut c = ctx();
        c.store.put(Node::new(1, 0.0, 0.0));
        c.store.put(Node::new(2, 1.0, 0.0));
        c.store.put(Node::new(3, 1.0, 1.0));
        c.store.put(Way::new(10, vec![1, 2, 3]));

        let rule = rule_for_way();
        let mut act = Bearings;
        act.main(&mut c, &rule, 10);

        let n = c.store.node(2).unwrap();
        assert!(n.attr.get_tag("osmchart:bearing").is_some());
        assert!(n.attr.get_tag("osmchart:coursedev").is_some());
        let brg: f64 = n.attr.get_tag("osmchart:bearing").unwrap().parse().unwrap();
        assert!((brg - 90.0).abs() < 1.0);
    }

    #[test]
    fn test_translate() {
        let mut c = ctx();
        let mut n = Node::new(1, 0.0, 0.0);
        n.attr.add_tag("seamark:colour", "red");
        c.store.put(n);

        // template rule object holding the translation table
        let mut tn = Node::new(500, 0.0, 0.0);
        tn.attr.add_tag("red", "rot");
        tn.attr.add_tag("green", "gruen");
        c.rules.put(Rule::compile(tn.into()));

        let mut rule = rule_for_node("translate");
        rule.spec = crate::rules::ActionSpec::parse("translate:id=500;key=seamark:colour")
            .map(Some)
            .unwrap();
        let mut act = Translate::default();
        assert_eq!(act.ini(&mut c, &rule), 0);
        act.main(&mut c, &rule, 1);
        assert_eq!(
            c.store.node(1).unwrap().attr.get_tag("seamark:colour"),
            Some("rot")
        );
    }

    #[test]
    fn test_del_match_tags() {
        let mut c = ctx();
        let mut n = Node::new(1, 0.0, 0.0);
        n.attr.add_tag("scrap", "x");
        n.attr.add_tag("name", "keep");
        c.store.put(n);

        let mut tn = Node::new(999, 0.0, 0.0);
        tn.attr.add_tag("_action_", "del_match_tags");
        tn.attr.add_tag("scrap", "");
        let rule = Rule::compile(tn.into());

        let mut act = DelMatchTags::default();
        act.main(&mut c, &rule, 1);
        let tags = &c.store.node(1).unwrap().attr.tags;
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].k, "name");
    }
}
