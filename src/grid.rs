//! Generation of the chart border, ticks, graticule, legend and scale
//! ruler as OSM objects near the computed page edges.

use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};

use crate::context::Context;
use crate::elements::{Id, Node, Way};
use crate::geo::{transtraversal, Coord};
use crate::page::{parse_length_def, Projection, Unit};
use crate::rules::Rule;

/// distance of grid lines in degrees (should be a multiple of G_TICKS)
const G_GRID: f64 = 10.0 / 60.0;
/// distance of axis ticks in degrees (should be a multiple of G_STICKS)
const G_TICKS: f64 = 1.0 / 60.0;
/// distance of axis subticks in degrees
const G_STICKS: f64 = G_TICKS / 4.0;
/// margin from paper edge to border of chart (mm)
const G_MARGIN: f64 = 15.0;
/// width of ticks border (mm)
const G_TW: f64 = 5.0;
/// width of subticks border (mm)
const G_STW: f64 = 2.5;

/// Tenth minutes per degree; tick positions are iterated as integers at
/// this resolution.
const T_RESCALE: i64 = 600;
const TM_RESCALE: f64 = 10.0;

fn min10(x: f64) -> i64 {
    (x * T_RESCALE as f64).round() as i64
}

/// Formats of coordinate captions.
#[derive(Clone, Copy, Debug)]
pub enum CoordFmt {
    LatChar,
    LonChar,
    LatDeg,
    LonDeg,
    LatDegOnly,
    LonDegOnly,
}

/// Converts a coordinate to its chart caption.
pub fn coord_str(c: f64, fmt: CoordFmt) -> String {
    let deg = c.abs() as i64;
    let min = ((c.abs() * T_RESCALE as f64).round() as i64 % T_RESCALE) as f64 / TM_RESCALE;
    match fmt {
        CoordFmt::LatChar => {
            format!("{:02} {} {:.1}'", deg, if c < 0.0 { 'S' } else { 'N' }, min)
        }
        CoordFmt::LonChar => {
            format!("{:03} {} {:.1}'", deg, if c < 0.0 { 'W' } else { 'E' }, min)
        }
        CoordFmt::LatDeg => format!("{deg:02}° {min:.1}'"),
        CoordFmt::LonDeg => format!("{deg:03}° {min:.1}'"),
        CoordFmt::LatDegOnly => format!("{deg:02}°"),
        CoordFmt::LonDegOnly => format!("{deg:03}°"),
    }
}

/// Linear interpolation of y at xn between two support points.
fn intermediate(x0: f64, y0: f64, x1: f64, y1: f64, xn: f64) -> f64 {
    if x1 - x0 == 0.0 {
        return y0;
    }
    y0 + (xn - x0) / (x1 - x0) * (y1 - y0)
}

/// Degrees of longitude spanned by the page at a specific latitude. This
/// is constant for Mercator but varies for the transverse projection.
fn lonlen_at_lat(pw: &[Coord; 4], lat: f64) -> f64 {
    intermediate(
        pw[0].lat,
        pw[1].lon - pw[0].lon,
        pw[3].lat,
        pw[2].lon - pw[3].lon,
        lat,
    )
}

fn latlen_at_lon(pw: &[Coord; 4], lon: f64) -> f64 {
    intermediate(
        pw[3].lon,
        pw[3].lat - pw[0].lat,
        pw[2].lon,
        pw[2].lat - pw[1].lat,
        lon,
    )
}

/// Grid layout parameters.
#[derive(Clone, Debug)]
pub struct GridParams {
    pub lat_ticks: f64,
    pub lon_ticks: f64,
    pub lat_sticks: f64,
    pub lon_sticks: f64,
    pub lat_g: f64,
    pub lon_g: f64,
    pub g_margin: f64,
    pub g_tw: f64,
    pub g_stw: f64,
    pub copyright: bool,
    /// Number of points per grid line (must be >= 2).
    pub gpcnt: usize,
}

impl Default for GridParams {
    fn default() -> GridParams {
        GridParams {
            lat_ticks: G_TICKS,
            lon_ticks: G_TICKS,
            lat_sticks: G_STICKS,
            lon_sticks: G_STICKS,
            lat_g: G_GRID,
            lon_g: G_GRID,
            g_margin: G_MARGIN,
            g_tw: G_TW,
            g_stw: G_STW,
            copyright: true,
            gpcnt: 2,
        }
    }
}

impl GridParams {
    /// Chooses grid and tick spacing from the chart scale.
    pub fn auto(scale: f64) -> GridParams {
        let mut g = GridParams::default();
        let (grid, ticks, sticks) = if scale >= 250_000.0 {
            (30.0, 5.0, 1.0)
        } else if scale >= 90_000.0 {
            (10.0, 1.0, 0.25)
        } else if scale >= 20_000.0 {
            (5.0, 1.0, 0.2)
        } else {
            (1.0, 0.2, 0.05)
        };
        g.set_minutes(grid, ticks, sticks);
        g
    }

    /// Sets grid, tick and subtick spacing given in arc minutes.
    pub fn set_minutes(&mut self, grid: f64, ticks: f64, sticks: f64) {
        self.lat_g = grid / 60.0;
        self.lon_g = grid / 60.0;
        self.lat_ticks = ticks / 60.0;
        self.lon_ticks = ticks / 60.0;
        self.lat_sticks = sticks / 60.0;
        self.lon_sticks = sticks / 60.0;
    }

    /// Parses the user grid definition `G[:T[:S]]` in arc minutes.
    pub fn parse_user(&mut self, s: &str) {
        let parts: Vec<f64> = s.split(':').filter_map(|p| p.trim().parse().ok()).collect();
        match parts.as_slice() {
            [g] => self.set_minutes(*g, self.lat_ticks * 60.0, self.lat_sticks * 60.0),
            [g, t] => self.set_minutes(*g, *t, *t / 4.0),
            [g, t, s] => self.set_minutes(*g, *t, *s),
            _ => warn!("cannot parse grid definition '{s}'"),
        }
    }
}

fn mm2lat0(ctx: &Context, mm: f64, range: f64) -> f64 {
    mm * range / ctx.page.px2mm(ctx.page.h)
}

fn mm2lon0(ctx: &Context, mm: f64, range: f64) -> f64 {
    mm * range / ctx.page.px2mm(ctx.page.w)
}

/// Places a caption node.
fn geo_description(ctx: &mut Context, lat: f64, lon: f64, text: &str, pos: &str) {
    let mut n = Node::generated(ctx.store.unique_node_id(), lat, lon);
    n.attr.add_tag("grid", "text");
    n.attr.add_tag("name", text);
    n.attr.add_tag("border", pos);
    ctx.store.put(n);
}

/// Days-to-date conversion (proleptic Gregorian, Howard Hinnant's civil
/// algorithm).
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = z - era * 146097;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

/// Places the chart date node in the lower left corner.
fn grid_date(ctx: &mut Context, grd: &GridParams) {
    let bb = ctx.page.bbox;
    let lat = bb.ll.lat + ctx.page.mm2lat(grd.g_margin - grd.g_stw);
    let lon = bb.ll.lon + ctx.page.mm2lon(grd.g_margin);

    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let (y, m, d) = civil_from_days(secs.div_euclid(86400));
    let rem = secs.rem_euclid(86400);
    let date = format!("{y:04}-{m:02}-{d:02} {:02}:{:02}", rem / 3600, rem % 3600 / 60);

    let mut n = Node::generated(ctx.store.unique_node_id(), lat, lon);
    n.attr.add_tag("chartdate", date);
    ctx.store.put(n);
}

// corner index helpers of geo_square: first-or-last and first-half
fn fl(i: usize) -> bool {
    i == 0 || i == 3
}
fn f2(i: usize) -> bool {
    i <= 1
}

/// Generates one closed border square inset by `b` mm, with `cnt` points
/// per side and captioned corner nodes.
fn geo_square(ctx: &mut Context, pw0: &[Coord; 4], b: f64, v: &str, cnt: usize) {
    let mut pw = [Coord::default(); 4];
    for i in 0..4 {
        let mut p = pw0[3 - i];
        let lat_rng =
            pw0[if fl(i) { 3 } else { 2 }].lat - pw0[if fl(i) { 0 } else { 1 }].lat;
        let lon_rng =
            pw0[if f2(i) { 2 } else { 1 }].lon - pw0[if f2(i) { 3 } else { 0 }].lon;
        p.lat += mm2lat0(ctx, b, lat_rng) * if f2(i) { -1.0 } else { 1.0 };
        p.lon += mm2lon0(ctx, b, lon_rng) * if fl(i) { 1.0 } else { -1.0 };
        pw[i] = p;
    }

    let mut refs: Vec<Id> = Vec::with_capacity(4 * cnt + 1);
    for i in 0..4 {
        let mut n = Node::generated(ctx.store.unique_node_id(), pw[i].lat, pw[i].lon);
        n.attr.add_tag("grid", v);
        n.attr
            .add_tag("lat", coord_str(pw[i].lat, CoordFmt::LatChar));
        n.attr
            .add_tag("lon", coord_str(pw[i].lon, CoordFmt::LonChar));
        n.attr.add_tag("pointindex", format!("{i}"));
        refs.push(n.attr.id);
        debug!(
            "border polygon lat/lon = {:.8}/{:.8}, \"{v}\"",
            pw[i].lat, pw[i].lon
        );
        ctx.store.put(n);

        let j = (i + 1) % 4;
        let dlat = (pw[j].lat - pw[i].lat) / (cnt - 1) as f64;
        let dlon = (pw[j].lon - pw[i].lon) / (cnt - 1) as f64;
        for j in 1..cnt {
            let n = Node::generated(
                ctx.store.unique_node_id(),
                pw[i].lat + dlat * j as f64,
                pw[i].lon + dlon * j as f64,
            );
            refs.push(n.attr.id);
            ctx.store.put(n);
        }
    }

    refs.push(refs[0]);
    let mut w = Way::generated(ctx.store.unique_way_id(), refs);
    w.attr.add_tag("grid", v);
    ctx.store.put(w);
}

/// Generates one tick (or grid line) way with `cnt` interpolated points.
fn geo_tick0(ctx: &mut Context, lat1: f64, lon1: f64, lat2: f64, lon2: f64, v: &str, cnt: usize) {
    let cnt = cnt.max(2);
    let mut w = Way::generated(ctx.store.unique_way_id(), Vec::new());
    w.attr.add_tag("grid", v);
    let wid = w.attr.id;
    ctx.store.put(w);

    let dlat = (lat2 - lat1) / (cnt - 1) as f64;
    let dlon = (lon2 - lon1) / (cnt - 1) as f64;
    for i in 0..cnt {
        let n = Node::generated(
            ctx.store.unique_node_id(),
            lat1 + dlat * i as f64,
            lon1 + dlon * i as f64,
        );
        let nid = n.attr.id;
        ctx.store.put(n);
        let pos = ctx.store.way(wid).map(|w| w.refs.len()).unwrap_or(0);
        ctx.store.insert_refs(wid, &[nid], pos);
    }
}

fn geo_tick(ctx: &mut Context, lat1: f64, lon1: f64, lat2: f64, lon2: f64, v: &str) {
    geo_tick0(ctx, lat1, lon1, lat2, lon2, v, 2);
}

/// Generates the longitude ticks along the top or bottom border.
#[allow(clippy::too_many_arguments)]
fn geo_lon_ticks0(
    ctx: &mut Context,
    pw: &[Coord; 4],
    c0: usize,
    c1: usize,
    desc: &str,
    b: f64,
    b1: f64,
    b2: f64,
    b3: f64,
    g: i64,
    t: i64,
    st: i64,
) {
    if st <= 0 || t <= 0 || g <= 0 {
        return;
    }
    let bi = (min10(mm2lon0(ctx, b, pw[c1].lon - pw[c0].lon) + pw[c0].lon) / st) * st;
    debug!("g = {g}, t = {t}, st = {st}, bi = {bi}");

    let hi = min10(pw[c1].lon - mm2lon0(ctx, b, pw[c1].lon - pw[c0].lon));
    let mut lon = bi + st;
    while lon < hi {
        let lonf = lon as f64 / T_RESCALE as f64;
        let latf = intermediate(pw[c0].lon, pw[c0].lat, pw[c1].lon, pw[c1].lat, lonf);
        let latm = latlen_at_lon(pw, lonf);

        let outer = if lon % t != 0 { b2 } else { b1 };
        geo_tick(
            ctx,
            latf + mm2lat0(ctx, b3, latm),
            lonf,
            latf + mm2lat0(ctx, outer, latm),
            lonf,
            if lon % t != 0 { "subtick" } else { "tick" },
        );

        if lon % g == 0 {
            let fmt = if (g as f64) < T_RESCALE as f64 {
                CoordFmt::LonDeg
            } else {
                CoordFmt::LonDegOnly
            };
            let s = coord_str(lonf, fmt);
            geo_description(ctx, latf + mm2lat0(ctx, b2, latm), lonf, &s, desc);
        }
        lon += st;
    }
}

fn geo_lon_ticks(
    ctx: &mut Context,
    pw: &[Coord; 4],
    b: f64,
    b1: f64,
    b2: f64,
    b3: f64,
    g: i64,
    t: i64,
    st: i64,
) {
    geo_lon_ticks0(ctx, pw, 0, 1, "bottom", b, b1, b2, b3, g, t, st);
    geo_lon_ticks0(ctx, pw, 3, 2, "top", b, -b1, -b2, -b3, g, t, st);
}

/// Generates the latitude ticks along the left or right border.
#[allow(clippy::too_many_arguments)]
fn geo_lat_ticks0(
    ctx: &mut Context,
    pw: &[Coord; 4],
    c0: usize,
    c1: usize,
    desc: &str,
    b: f64,
    b1: f64,
    b2: f64,
    b3: f64,
    g: i64,
    t: i64,
    st: i64,
) {
    if st <= 0 || t <= 0 || g <= 0 {
        return;
    }
    let bi = (min10(mm2lat0(ctx, b, pw[c1].lat - pw[c0].lat) + pw[c0].lat) / st) * st;
    debug!("g = {g}, t = {t}, st = {st}, bi = {bi}");

    let hi = min10(pw[c1].lat - mm2lat0(ctx, b, pw[c1].lat - pw[c0].lat));
    let mut lat = bi + st;
    while lat < hi {
        let latf = lat as f64 / T_RESCALE as f64;
        let lonf = intermediate(pw[c0].lat, pw[c0].lon, pw[c1].lat, pw[c1].lon, latf);
        let lonm = lonlen_at_lat(pw, latf);

        let outer = if lat % t != 0 { b2 } else { b1 };
        geo_tick(
            ctx,
            latf,
            lonf + mm2lon0(ctx, b3, lonm),
            latf,
            lonf + mm2lon0(ctx, outer, lonm),
            if lat % t != 0 { "subtick" } else { "tick" },
        );

        if lat % g == 0 {
            let fmt = if (g as f64) < T_RESCALE as f64 {
                CoordFmt::LatDeg
            } else {
                CoordFmt::LatDegOnly
            };
            let s = coord_str(latf, fmt);
            geo_description(ctx, latf, lonf + mm2lon0(ctx, b2, lonm), &s, desc);
        }
        lat += st;
    }
}

fn geo_lat_ticks(
    ctx: &mut Context,
    pw: &[Coord; 4],
    b: f64,
    b1: f64,
    b2: f64,
    b3: f64,
    g: i64,
    t: i64,
    st: i64,
) {
    geo_lat_ticks0(ctx, pw, 0, 3, "left", b, b1, b2, b3, g, t, st);
    geo_lat_ticks0(ctx, pw, 1, 2, "right", b, -b1, -b2, -b3, g, t, st);
}

/// Generates the meridians of the graticule.
fn geo_lon_grid(ctx: &mut Context, pw: &[Coord; 4], b: f64, b1: f64, g: i64, st: i64, cnt: usize) {
    if st <= 0 || g <= 0 {
        return;
    }
    let bi = (min10(mm2lon0(ctx, b, pw[2].lon - pw[3].lon) + pw[3].lon) / st) * st;
    let hi = min10(pw[2].lon - mm2lon0(ctx, b, pw[2].lon - pw[3].lon));

    let mut lon = bi + st;
    while lon < hi {
        if lon % g == 0 {
            let lonf = lon as f64 / T_RESCALE as f64;
            let lat0 = if lonf < pw[0].lon + mm2lon0(ctx, b, pw[1].lon - pw[0].lon) {
                intermediate(
                    pw[0].lon + mm2lon0(ctx, b, pw[1].lon - pw[0].lon),
                    pw[0].lat,
                    pw[3].lon,
                    pw[3].lat,
                    lonf,
                )
            } else if lonf > pw[1].lon - mm2lon0(ctx, b, pw[1].lon - pw[0].lon) {
                intermediate(
                    pw[1].lon - mm2lon0(ctx, b, pw[1].lon - pw[0].lon),
                    pw[1].lat,
                    pw[2].lon,
                    pw[2].lat,
                    lonf,
                )
            } else {
                intermediate(pw[0].lon, pw[0].lat, pw[1].lon, pw[1].lat, lonf)
            };
            let lat1 = intermediate(pw[3].lon, pw[3].lat, pw[2].lon, pw[2].lat, lonf);
            let latm = latlen_at_lon(pw, lonf);
            geo_tick0(
                ctx,
                lat0 + mm2lat0(ctx, b1, latm),
                lonf,
                lat1 - mm2lat0(ctx, b1, latm),
                lonf,
                "grid",
                cnt,
            );
        }
        lon += st;
    }
}

/// Generates the parallels of the graticule.
fn geo_lat_grid(ctx: &mut Context, pw: &[Coord; 4], b: f64, b1: f64, g: i64, st: i64, cnt: usize) {
    if st <= 0 || g <= 0 {
        return;
    }
    let bi = (min10(mm2lat0(ctx, b, pw[3].lat - pw[0].lat) + pw[0].lat) / st) * st;
    let hi = min10(pw[2].lat - mm2lat0(ctx, b, pw[2].lat - pw[1].lat));

    let mut lat = bi + st;
    while lat < hi {
        if lat % g == 0 {
            let latf = lat as f64 / T_RESCALE as f64;
            let lon0 = intermediate(pw[0].lat, pw[0].lon, pw[3].lat, pw[3].lon, latf);
            let lon1 = intermediate(pw[1].lat, pw[1].lon, pw[2].lat, pw[2].lon, latf);
            let lonm = lonlen_at_lat(pw, latf);
            geo_tick0(
                ctx,
                latf,
                lon1 - mm2lon0(ctx, b1, lonm),
                latf,
                lon0 + mm2lon0(ctx, b1, lonm),
                "grid",
                cnt,
            );
        }
        lat += st;
    }
}

/// Places the legend captions: mean latitude and scale, chart title and
/// optionally the copyright line.
fn geo_legend(ctx: &mut Context, grd: &GridParams) {
    let pg = &ctx.page;
    let bb = pg.bbox;
    let lat10 = (pg.mean_lat * T_RESCALE as f64) as i64;
    let legend = format!(
        "Mean Latitude {:02} {} {:.1}', Scale = 1:{:.0}, {:.1} x {:.1} mm",
        (lat10 / T_RESCALE).abs(),
        if lat10 < 0 { 'S' } else { 'N' },
        (lat10 % T_RESCALE).abs() as f64 / TM_RESCALE,
        pg.scale,
        pg.px2mm(pg.w) - 2.0 * grd.g_margin,
        pg.px2mm(pg.h) - 2.0 * grd.g_margin
    );

    let top_lat = bb.ru.lat - ctx.page.mm2lat(grd.g_margin);
    let mid_lon = bb.ll.lon + ctx.page.wc / 2.0;
    let left_lon = bb.ll.lon + ctx.page.mm2lon(grd.g_margin);
    geo_description(ctx, top_lat, mid_lon, &legend, "top");
    let title = ctx.cfg.title.clone();
    geo_description(ctx, top_lat, left_lon, &title, "title");

    if grd.copyright {
        let lat = bb.ll.lat + ctx.page.mm2lat(grd.g_margin + grd.g_tw + grd.g_stw);
        geo_description(
            ctx,
            lat,
            mid_lon,
            "Generated with osmchart, data source: OSM.",
            "copyright",
        );
    }
}

/// Generates the whole chart frame: three border squares, ticks, captions,
/// graticule, date and legend.
pub fn grid(ctx: &mut Context, grd: &GridParams) {
    let mut bb = ctx.page.bbox;
    let mut pw = [bb.ll, Coord::default(), bb.ru, Coord::default()];
    pw[1] = Coord::new(bb.ll.lat, bb.ru.lon);
    pw[3] = Coord::new(bb.ru.lat, bb.ll.lon);

    if ctx.page.proj == Projection::Transversal {
        debug!("transforming bounding box of grid");
        let tlat = -ctx.page.transversal_lat;
        let mlon = ctx.page.mean_lon;
        for c in pw.iter_mut() {
            transtraversal(tlat, mlon, &mut c.lat, &mut c.lon);
        }
        transtraversal(tlat, mlon, &mut bb.ll.lat, &mut bb.ll.lon);
        transtraversal(tlat, mlon, &mut bb.ru.lat, &mut bb.ru.lon);
    }
    if ctx.page.polygon_window {
        pw = ctx.page.pw;
    }

    info!(
        "grid parameters: margin = {:.2} mm, tickswidth = {:.2} mm, subtickswidth = {:.2} mm, grid = {:.2}', ticks = {:.2}', subticks = {:.2}'",
        grd.g_margin,
        grd.g_tw,
        grd.g_stw,
        grd.lon_g * 60.0,
        grd.lon_ticks * 60.0,
        grd.lon_sticks * 60.0
    );

    geo_square(ctx, &pw, grd.g_margin, "outer_border", grd.gpcnt);
    geo_square(ctx, &pw, grd.g_margin + grd.g_tw, "ticks_border", grd.gpcnt);
    geo_square(
        ctx,
        &pw,
        grd.g_margin + grd.g_tw + grd.g_stw,
        "subticks_border",
        grd.gpcnt,
    );

    grid_date(ctx, grd);

    let b = grd.g_margin + grd.g_tw + grd.g_stw;
    geo_lon_ticks(
        ctx,
        &pw,
        b,
        grd.g_margin,
        grd.g_margin + grd.g_tw,
        b,
        min10(grd.lon_g),
        min10(grd.lon_ticks),
        min10(grd.lon_sticks),
    );
    geo_lat_ticks(
        ctx,
        &pw,
        b,
        grd.g_margin,
        grd.g_margin + grd.g_tw,
        b,
        min10(grd.lat_g),
        min10(grd.lat_ticks),
        min10(grd.lat_sticks),
    );

    geo_lon_grid(
        ctx,
        &pw,
        b,
        grd.g_margin,
        min10(grd.lon_g),
        min10(grd.lon_sticks),
        grd.gpcnt,
    );
    geo_lat_grid(
        ctx,
        &pw,
        b,
        grd.g_margin,
        min10(grd.lat_g),
        min10(grd.lat_sticks),
        grd.gpcnt,
    );

    geo_legend(ctx, grd);
}

/// The `grid` action. The frame is generated once at rule initialization.
#[derive(Default)]
pub struct GridAct;

impl GridAct {
    pub fn ini(&mut self, ctx: &mut Context, rule: &Rule) -> i32 {
        let mut grd = GridParams::auto(ctx.page.scale);
        if let Some(user) = ctx.cfg.grid.clone() {
            grd.parse_user(&user);
        }

        let params = rule.params();
        if let Some(m) = params.get_f64("margin") {
            grd.g_margin = m;
        }
        if let Some(t) = params.get_f64("tickswidth") {
            grd.g_tw = t;
        }
        if let Some(t) = params.get_f64("subtickswidth") {
            grd.g_stw = t;
        }
        if let Some(n) = params.get_f64("points") {
            grd.gpcnt = (n as usize).max(2);
        }
        if let Some(g) = params.get("grid") {
            grd.parse_user(g);
        }
        grd.copyright = !params.get_bool("nocopyright");

        grid(ctx, &grd);
        0
    }
}

/// height of the scale ruler (mm)
const RULER_HEIGHT_MM: f64 = 2.0;

/// The `ruler` action: a kilometre or nautical-mile scale bar near the
/// lower left page corner, generated at rule initialization.
pub struct RulerAct {
    /// number of sections
    rcnt: usize,
    /// length of one section in km
    rsec: f64,
    /// true for nautical miles
    nautical: bool,
}

impl Default for RulerAct {
    fn default() -> RulerAct {
        RulerAct {
            rcnt: 5,
            rsec: 1.0,
            nautical: false,
        }
    }
}

impl RulerAct {
    pub fn ini(&mut self, ctx: &mut Context, rule: &Rule) -> i32 {
        let params = rule.params();
        if let Some(c) = params.get_i64("count") {
            if c > 0 {
                self.rcnt = c as usize;
            }
        }
        if let Some(s) = params.get("section") {
            match parse_length_def(s, Unit::Km) {
                Ok(v) => {
                    self.nautical = v.unit == Unit::Nm;
                    self.rsec = if self.nautical { v.val * 1.852 } else { v.val };
                }
                Err(_) => warn!("cannot parse ruler section '{s}'"),
            }
        }
        self.generate(ctx);
        0
    }

    fn generate(&self, ctx: &mut Context) {
        let bb = ctx.page.bbox;
        let margin = G_MARGIN + G_TW + G_STW * 3.0;
        let p = Coord::new(
            bb.ll.lat + ctx.page.mm2lat(margin),
            bb.ll.lon + ctx.page.mm2lon(margin),
        );
        let height = ctx.page.mm2lat(RULER_HEIGHT_MM);

        // 1° lon / cos(lat) = 60 nm; 1 nm = 1.852 km
        let lon_diff = self.rsec / (60.0 * 1.852 * p.lat.to_radians().cos());
        info!(
            "generating ruler: {} sections, {lon_diff} degrees lon",
            self.rcnt
        );

        let mk_node = |ctx: &mut Context, lat: f64, lon: f64, dist: Option<String>| -> Id {
            let mut n = Node::generated(ctx.store.unique_node_id(), lat, lon);
            if let Some(d) = dist {
                n.attr.add_tag("distance", d);
            }
            let id = n.attr.id;
            ctx.store.put(n);
            id
        };

        let mut lower = mk_node(ctx, p.lat, p.lon, None);
        let zero = if self.nautical { "0 nm" } else { "0 km" };
        let mut upper = mk_node(ctx, p.lat + height, p.lon, Some(zero.to_string()));

        for i in 0..self.rcnt {
            let lon = p.lon + lon_diff * (i + 1) as f64;
            let label = if self.rsec < 1.0 {
                format!("{} m", ((i + 1) as f64 * self.rsec * 1000.0) as i64)
            } else if self.nautical {
                format!("{} nm", ((i + 1) as f64 * self.rsec / 1.852) as i64)
            } else {
                format!("{} km", ((i + 1) as f64 * self.rsec) as i64)
            };

            let n1 = mk_node(ctx, p.lat, lon, None);
            let n2 = mk_node(ctx, p.lat + height, lon, Some(label));

            let mut w = Way::generated(
                ctx.store.unique_way_id(),
                vec![lower, n1, n2, upper, lower],
            );
            w.attr.add_tag(
                "ruler_style",
                if i & 1 != 0 { "transparent" } else { "fill" },
            );
            ctx.store.put(w);

            lower = n1;
            upper = n2;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Config;
    use crate::elements::ObjKind;

    fn ctx() -> Context {
        Context::new(Config {
            window: Some("45:15:100000".to_string()),
            threads: 0,
            ..Config::default()
        })
        .unwrap()
    }

    #[test]
    fn test_coord_str() {
        assert_eq!(coord_str(45.5, CoordFmt::LatChar), "45 N 30.0'");
        assert_eq!(coord_str(-3.25, CoordFmt::LonChar), "003 W 15.0'");
        assert_eq!(coord_str(45.5, CoordFmt::LatDeg), "45° 30.0'");
        assert_eq!(coord_str(7.0, CoordFmt::LonDegOnly), "007°");
    }

    #[test]
    fn test_civil_from_days() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(19723), (2024, 1, 1));
    }

    #[test]
    fn test_grid_generates_borders() {
        let mut c = ctx();
        let mut n = Node::new(999, 0.0, 0.0);
        n.attr.add_tag("_action_", "grid");
        let rule = Rule::compile(n.into());

        let mut act = GridAct;
        assert_eq!(act.ini(&mut c, &rule), 0);

        // three closed border squares
        let squares: Vec<&Way> = c
            .store
            .iter(ObjKind::Way)
            .filter_map(|(_, o)| o.as_way())
            .filter(|w| {
                matches!(
                    w.attr.get_tag("grid"),
                    Some("outer_border") | Some("ticks_border") | Some("subticks_border")
                )
            })
            .collect();
        assert_eq!(squares.len(), 3);
        for s in squares {
            assert!(s.refs.len() >= 5);
            assert_eq!(s.refs.first(), s.refs.last());
        }

        // ticks and grid lines exist
        let ticks = c
            .store
            .iter(ObjKind::Way)
            .filter_map(|(_, o)| o.as_way())
            .filter(|w| matches!(w.attr.get_tag("grid"), Some("tick") | Some("subtick")))
            .count();
        assert!(ticks > 0, "expected tick ways");
        let grids = c
            .store
            .iter(ObjKind::Way)
            .filter_map(|(_, o)| o.as_way())
            .filter(|w| w.attr.get_tag("grid") == Some("grid"))
            .count();
        assert!(grids > 0, "expected graticule ways");
    }

    #[test]
    fn test_ruler() {
        let mut c = ctx();
        let mut n = Node::new(999, 0.0, 0.0);
        n.attr.add_tag("_action_", "ruler");
        let rule = Rule::compile(n.into());

        let mut act = RulerAct::default();
        assert_eq!(act.ini(&mut c, &rule), 0);

        let sections: Vec<&Way> = c
            .store
            .iter(ObjKind::Way)
            .filter_map(|(_, o)| o.as_way())
            .filter(|w| w.attr.get_tag("ruler_style").is_some())
            .collect();
        assert_eq!(sections.len(), 5);
        for w in &sections {
            assert_eq!(w.refs.len(), 5);
            assert_eq!(w.refs.first(), w.refs.last());
        }
        // alternating fill style
        assert_eq!(sections[0].attr.get_tag("ruler_style"), Some("fill"));
    }
}
