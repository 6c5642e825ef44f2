//! Page geometry, projections and unit conversions.
//!
//! The rendering window is given either as (center, size), as a bounding
//! box, or as a 4-corner polygon. Together with a page size, resolution and
//! optional rotation this module derives the geographic/pixel mapping every
//! geometric action depends on.

use log::{debug, info, warn};

use crate::adams::{adams_square_ii, adams_square_ii_invert, A2_LAM_SCALE, A2_PHI_SCALE};
use crate::error::{new_config_error, Result};
use crate::geo::{fmod2, Bbox, Coord};

/// Units understood by length parameters and conversions.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Unit {
    /// Unit-less value.
    #[default]
    One,
    // units in respect to the page
    Mm,
    Cm,
    Px,
    Pt,
    In,
    // units in respect to reality
    Nm,
    Km,
    M,
    Kbl,
    Ft,
    // degrees/minutes on a great circle
    Deg,
    Min,
}

impl Unit {
    pub fn name(self) -> &'static str {
        match self {
            Unit::One => "1",
            Unit::Mm => "mm",
            Unit::Cm => "cm",
            Unit::Px => "px",
            Unit::Pt => "pt",
            Unit::In => "in",
            Unit::Nm => "nm",
            Unit::Km => "km",
            Unit::M => "m",
            Unit::Kbl => "kbl",
            Unit::Ft => "ft",
            Unit::Deg => "°",
            Unit::Min => "'",
        }
    }
}

/// Parses a unit suffix. Unknown units fall back to [`Unit::One`] with a
/// warning.
pub fn parse_unit(s: &str) -> Unit {
    let s = s.trim();
    if s.is_empty() || s.starts_with(':') {
        return Unit::One;
    }
    match s.to_ascii_lowercase().as_str() {
        "nm" | "sm" => Unit::Nm,
        "kbl" => Unit::Kbl,
        "ft" => Unit::Ft,
        "mm" => Unit::Mm,
        "degrees" | "deg" | "°" => Unit::Deg,
        "'" | "min" => Unit::Min,
        "m" => Unit::M,
        "km" => Unit::Km,
        "in" | "\"" => Unit::In,
        "cm" => Unit::Cm,
        "px" => Unit::Px,
        "pt" => Unit::Pt,
        _ => {
            warn!("unknown unit '{s}', defaulting to '1'");
            Unit::One
        }
    }
}

/// A length with its unit.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Value {
    pub val: f64,
    pub unit: Unit,
}

/// Parses a string of the form `<number>[<unit>]`.
pub fn parse_length(s: &str) -> Result<Value> {
    let s = s.trim();
    let end = s
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || (i == 0 && (c == '-' || c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    let num: f64 = s[..end]
        .parse()
        .map_err(|_| new_config_error(format!("invalid length '{s}'")))?;
    Ok(Value {
        val: num,
        unit: parse_unit(&s[end..]),
    })
}

/// Like [`parse_length`] but substituting `default_unit` for unit-less
/// values.
pub fn parse_length_def(s: &str, default_unit: Unit) -> Result<Value> {
    let mut v = parse_length(s)?;
    if v.unit == Unit::One {
        v.unit = default_unit;
    }
    Ok(v)
}

/// Axis classification of a parsed coordinate. The original returned the
/// integer sentinel -1 for "no hemisphere letter" which callers testing for
/// lat/lon misinterpreted; the three cases are explicit here.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Axis {
    Lat,
    Lon,
    None,
}

/// Parses a coordinate string of format `[-]dd.ddd[NESW]` or
/// `[-]dd[NESW](dd.ddd)?` into a correctly signed value plus the axis the
/// hemisphere letter implies.
pub fn parse_coord(s: &str) -> (f64, Axis) {
    let mut it = s.trim_start().chars().peekable();
    let mut sign = 1.0;
    if it.peek() == Some(&'-') {
        it.next();
        sign = -1.0;
    }

    let mut a = 0.0;
    while let Some(c) = it.peek().copied() {
        if let Some(d) = c.to_digit(10) {
            a = a * 10.0 + d as f64;
            it.next();
        } else {
            break;
        }
    }

    let rest: String = it.collect();
    let rest = rest.trim_start();
    let Some(c) = rest.chars().next() else {
        return (a * sign, Axis::None);
    };

    let axis_of = |c: char| match c {
        'N' | 'n' | 'S' | 's' => Axis::Lat,
        'E' | 'e' | 'O' | 'o' | 'W' | 'w' => Axis::Lon,
        _ => Axis::None,
    };
    let is_negative_hemi = |c: char| matches!(c, 'S' | 's' | 'W' | 'w');

    match axis_of(c) {
        // "dd N mm.m" — degrees, hemisphere letter, optional minutes
        axis @ (Axis::Lat | Axis::Lon) => {
            if is_negative_hemi(c) {
                sign = -sign;
            }
            let min: f64 = rest[c.len_utf8()..].trim().parse().unwrap_or(0.0);
            ((a + min / 60.0) * sign, axis)
        }
        Axis::None if c == '.' => {
            // decimal fraction, optionally followed by a hemisphere letter
            let frac = rest[1..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>();
            let flen = frac.len();
            let f: f64 = frac.parse().unwrap_or(0.0);
            a += f / 10f64.powi(flen as i32);
            a *= sign;

            let tail = rest[1 + flen..].trim();
            match tail.chars().next() {
                None => (a, Axis::None),
                Some(h) => match axis_of(h) {
                    axis @ (Axis::Lat | Axis::Lon) => {
                        if is_negative_hemi(h) {
                            a = -a;
                        }
                        (a, axis)
                    }
                    Axis::None => (a, Axis::None),
                },
            }
        }
        Axis::None => (a * sign, Axis::None),
    }
}

/// Like [`parse_coord`] but substituting `def` when no hemisphere letter
/// determined the axis.
pub fn parse_coord2(s: &str, def: Axis) -> (f64, Axis) {
    match parse_coord(s) {
        (v, Axis::None) => (v, def),
        r => r,
    }
}

/// Parses a "lat:lon" tuple where either component may carry a hemisphere
/// letter reversing the roles.
fn parse_coord_tuple(s0: &str, s1: &str) -> Result<(f64, f64)> {
    let (p0, a0) = parse_coord2(s0, Axis::Lat);
    let (p1, mut a1) = parse_coord2(s1, Axis::Lon);
    let mut lat = 0.0;
    let mut lon = 0.0;

    let assign = |axis: Axis, v: f64, lat: &mut f64, lon: &mut f64| match axis {
        Axis::Lon => *lon = v,
        _ => *lat = v,
    };

    assign(a0, p0, &mut lat, &mut lon);
    if a0 == a1 {
        if p0 == 0.0 && p1 == 0.0 {
            a1 = flip(a1);
        } else if p0 == 0.0 {
            assign(flip(a0), p0, &mut lat, &mut lon);
        } else if p1 == 0.0 {
            a1 = flip(a1);
        } else {
            return Err(new_config_error(format!(
                "the {} was specified twice within the rendering window",
                if a0 == Axis::Lat {
                    "latitude"
                } else {
                    "longitude"
                }
            )));
        }
    }
    assign(a1, p1, &mut lat, &mut lon);
    Ok((lat, lon))
}

fn flip(a: Axis) -> Axis {
    match a {
        Axis::Lat => Axis::Lon,
        Axis::Lon => Axis::Lat,
        Axis::None => Axis::None,
    }
}

/// The supported map projections.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Projection {
    #[default]
    Mercator,
    Transversal,
    Adams2,
}

impl Projection {
    pub fn parse(s: &str) -> Result<Projection> {
        match s.to_ascii_lowercase().as_str() {
            "mercator" => Ok(Projection::Mercator),
            "transversal" => Ok(Projection::Transversal),
            "adams2" => Ok(Projection::Adams2),
            _ => Err(new_config_error(format!("unknown projection '{s}'"))),
        }
    }
}

// page sizes in mm
const A4_W: f64 = 210.0;
const A4_H: f64 = 297.0;
const ANSI_A_W: f64 = 8.5 * 25.4;
const ANSI_A_H: f64 = 11.0 * 25.4;
const LEGAL_H: f64 = 14.0 * 25.4;

const PAPER_SIZES: &[(&str, f64, f64)] = &[
    ("A4", A4_W, A4_H),
    ("A3", A4_H, A4_W * 2.0),
    ("A2", A4_W * 2.0, A4_H * 2.0),
    ("A1", A4_H * 2.0, A4_W * 4.0),
    ("A0", A4_W * 4.0, A4_H * 4.0),
    ("A", ANSI_A_W, ANSI_A_H),
    ("B", ANSI_A_H, ANSI_A_W * 2.0),
    ("C", ANSI_A_W * 2.0, ANSI_A_H * 2.0),
    ("D", ANSI_A_H * 2.0, ANSI_A_W * 4.0),
    ("E", ANSI_A_W * 4.0, ANSI_A_H * 4.0),
    ("letter", ANSI_A_W, ANSI_A_H),
    ("legal", ANSI_A_W, LEGAL_H),
    ("ledger", ANSI_A_H, ANSI_A_W * 2.0),
];

/// Parsed page dimension: width and height in mm plus the rotation angle in
/// radians.
fn parse_paper(paper: &str) -> Result<(f64, f64, f64)> {
    let (size, angle_str) = match paper.split_once(':') {
        Some((s, a)) => (s, Some(a)),
        None => (paper, None),
    };

    let angle = match angle_str {
        Some(a) => match a.trim().parse::<f64>() {
            Ok(deg) => deg.to_radians(),
            Err(_) => {
                warn!("invalid angle \"{a}\"");
                0.0
            }
        },
        None => 0.0,
    };

    let (width, height) = if let Some((w, h)) = size.split_once('x') {
        let w: f64 = w
            .trim()
            .parse()
            .map_err(|_| new_config_error(format!("format error in page size '{size}'")))?;
        let h: f64 = h
            .trim()
            .parse()
            .map_err(|_| new_config_error(format!("format error in page size '{size}'")))?;
        (w, h)
    } else {
        match PAPER_SIZES
            .iter()
            .find(|(name, _, _)| name.eq_ignore_ascii_case(size))
        {
            Some(&(_, w, h)) => (w, h),
            None => {
                warn!("unknown page size {size}, defaulting to A3");
                (A4_H, A4_W * 2.0)
            }
        }
    };

    if width < 0.0 || height < 0.0 || (width <= 0.0 && height <= 0.0) {
        return Err(new_config_error(
            "page width and height must be a decimal value greater than 0",
        ));
    }

    Ok((width, height, angle))
}

fn sqr_angle(a: f64) -> f64 {
    let a = fmod2(a, std::f64::consts::FRAC_PI_2);
    if a < std::f64::consts::FRAC_PI_4 {
        a
    } else {
        std::f64::consts::FRAC_PI_2 - a
    }
}

/// The complete page geometry: geographic window, projection parameters and
/// pixel dimensions. This is the former process-global render data, passed
/// explicitly wherever geometry is needed.
#[derive(Clone, Debug)]
pub struct PageGeom {
    /// Geographic bounding box (left lower / right upper).
    pub bbox: Bbox,
    /// True if the window was given as a 4-corner polygon.
    pub polygon_window: bool,
    /// Corner polygon (ll, rl, ru, lu).
    pub pw: [Coord; 4],
    /// Page rotation in radians.
    pub rot: f64,
    /// Width of the window in degrees of longitude.
    pub wc: f64,
    /// Height of the window in degrees of latitude.
    pub hc: f64,
    pub mean_lat: f64,
    /// Length of the mean latitude in degrees, corresponding to the real
    /// nautical miles of the chart width.
    pub mean_lat_len: f64,
    pub mean_lon: f64,
    /// Reference latitude of the transverse Mercator projection.
    pub transversal_lat: f64,
    /// Hyperbolic value of the mean latitude (Mercator stretching).
    pub lath: f64,
    /// Difference between hyperbolic max. and min. latitudes.
    pub lath_len: f64,
    /// Rendered image width in pixels.
    pub w: f64,
    /// Rendered image height in pixels.
    pub h: f64,
    /// Page width in pixels (equals `w` unless the page is rotated).
    pub pgw: f64,
    pub pgh: f64,
    pub dpi: u32,
    pub scale: f64,
    pub proj: Projection,
}

impl PageGeom {
    /// Computes the page geometry from a window specification, a page
    /// dimension string and the remaining parameters.
    ///
    /// Returns the geometry plus a flag telling the caller that no window
    /// was given, which forces rendering of all nodes.
    pub fn new(
        window: Option<&str>,
        paper: &str,
        proj: Projection,
        dpi: u32,
        landscape: bool,
    ) -> Result<(PageGeom, bool)> {
        let mut pg = PageGeom {
            bbox: Bbox::default(),
            polygon_window: false,
            pw: [Coord::default(); 4],
            rot: 0.0,
            wc: 0.0,
            hc: 0.0,
            mean_lat: 0.0,
            mean_lat_len: 0.0,
            mean_lon: 0.0,
            transversal_lat: 0.0,
            lath: 0.0,
            lath_len: 0.0,
            w: 0.0,
            h: 0.0,
            pgw: 0.0,
            pgh: 0.0,
            dpi,
            scale: 0.0,
            proj,
        };
        let mut render_all = false;

        match window {
            None => {
                warn!("window parameter missing, setting defaults 0:0:100000 and rendering all nodes");
                pg.scale = 100000.0;
                render_all = true;
            }
            Some(win) => pg.parse_window(win)?,
        }

        let (width_mm, height_mm, angle) = parse_paper(paper)?;
        if landscape {
            pg.w = pg.mm2px(height_mm);
            pg.h = pg.mm2px(width_mm);
        } else {
            pg.w = pg.mm2px(width_mm);
            pg.h = pg.mm2px(height_mm);
        }

        if pg.scale > 0.0 {
            if pg.w == 0.0 || pg.h == 0.0 {
                return Err(new_config_error(
                    "zero height or width only possible with bounding box window",
                ));
            }
            pg.mean_lat_len =
                pg.scale * (pg.w / pg.dpi as f64) * 2.54 / (60.0 * 1852.0 * 100.0);
        } else if pg.wc > 0.0 {
            if pg.w == 0.0 || pg.h == 0.0 {
                return Err(new_config_error(
                    "zero height or width only possible with bounding box window",
                ));
            }
            pg.mean_lat_len = pg.wc * pg.mean_lat.to_radians().cos();
        } else if pg.mean_lat_len == 0.0 {
            pg.mean_lat_len =
                (pg.bbox.ru.lon - pg.bbox.ll.lon) * pg.mean_lat.to_radians().cos();

            // autofit page to the window
            match pg.proj {
                Projection::Mercator | Projection::Transversal => {
                    let lat_range = pg.bbox.ru.lat - pg.bbox.ll.lat;
                    if pg.w == 0.0 {
                        pg.w = pg.h * pg.mean_lat_len / lat_range;
                    } else if pg.h == 0.0 {
                        pg.h = pg.w * lat_range / pg.mean_lat_len;
                    }
                    if pg.mean_lat_len * pg.h / pg.w < lat_range {
                        pg.mean_lat_len = lat_range * pg.w / pg.h;
                    }
                }
                Projection::Adams2 => {
                    if pg.w == 0.0 {
                        pg.w = pg.h;
                    } else if pg.h == 0.0 {
                        pg.h = pg.w;
                    }
                }
            }
        }

        pg.page_rotate(angle);
        pg.pgw = pg.w;
        pg.pgh = pg.h;

        if pg.proj == Projection::Adams2 {
            let s = sqr_angle(pg.rot).cos();
            pg.pgw *= s;
            pg.pgh *= s;
            debug!("final page scaled by {s}");
        }

        pg.init_bbox_mll();
        Ok((pg, render_all))
    }

    fn parse_window(&mut self, win: &str) -> Result<()> {
        let tok: Vec<&str> = win.split(':').collect();
        let colons = tok.len() - 1;
        if colons != 2 && colons != 3 && colons != 7 {
            return Err(new_config_error(format!("format error in window '{win}'")));
        }
        if self.proj == Projection::Transversal && colons != 2 {
            return Err(new_config_error(
                "window format not allowed for transversal mercator",
            ));
        }

        let (lat, lon) = parse_coord_tuple(tok[0], tok[1])?;
        self.mean_lat = lat;
        self.mean_lon = lon;

        if colons == 2 {
            // window contains length of mean latitude
            let size = tok[2].trim();
            let last = size.chars().last().unwrap_or('\0');
            let num = |s: &str| -> Result<f64> {
                s.parse()
                    .map_err(|_| new_config_error(format!("illegal size parameter '{s}'")))
            };
            if last.is_ascii_digit() || last == '.' {
                self.scale = num(size)?;
            } else if last == 'm' {
                self.mean_lat_len = num(&size[..size.len() - 1])? / 60.0;
            } else if last == 'd' {
                self.wc = num(&size[..size.len() - 1])?;
            } else {
                return Err(new_config_error(format!("illegal size parameter '{size}'")));
            }
            if self.scale < 0.0 || self.mean_lat_len < 0.0 || self.wc < 0.0 {
                return Err(new_config_error("illegal size argument, must be > 0"));
            }

            if self.proj == Projection::Transversal {
                self.transversal_lat = self.mean_lat;
                self.mean_lat = 0.0;
            }
        } else if colons == 3 {
            // window is a bounding box
            self.bbox.ll.lat = self.mean_lat;
            self.bbox.ll.lon = self.mean_lon;
            let (lat, lon) = parse_coord_tuple(tok[2], tok[3])?;
            self.bbox.ru.lat = lat;
            self.bbox.ru.lon = lon;
            self.mean_lat = (self.bbox.ru.lat + self.bbox.ll.lat) / 2.0;
            self.mean_lon = (self.bbox.ru.lon + self.bbox.ll.lon) / 2.0;
        } else {
            // 4-corner polygon window
            self.polygon_window = true;
            self.pw[0] = Coord::new(self.mean_lat, self.mean_lon);
            self.bbox.ll = self.pw[0];
            self.bbox.ru = self.pw[0];
            for i in 1..4 {
                let (lat, lon) = parse_coord_tuple(tok[i * 2], tok[i * 2 + 1])?;
                self.pw[i] = Coord::new(lat, lon);
                self.bbox.ll.lat = self.bbox.ll.lat.min(lat);
                self.bbox.ll.lon = self.bbox.ll.lon.min(lon);
                self.bbox.ru.lat = self.bbox.ru.lat.max(lat);
                self.bbox.ru.lon = self.bbox.ru.lon.max(lon);
            }
            self.mean_lat = (self.bbox.ru.lat + self.bbox.ll.lat) / 2.0;
            self.mean_lon = (self.bbox.ru.lon + self.bbox.ll.lon) / 2.0;
        }

        Ok(())
    }

    /// Inflates w × h to the smallest axis-aligned rectangle enclosing the
    /// rotated page.
    fn page_rotate(&mut self, angle: f64) {
        self.rot = angle % (2.0 * std::f64::consts::PI);
        if self.rot == 0.0 {
            return;
        }

        let a = (self.h / self.w).atan();
        let r = self.h.hypot(self.w);
        self.h = r * (a + self.rot.abs()).sin();
        self.w = r * (a - self.rot.abs()).cos();
    }

    /// Derives scale, meridians and the hyperbolic latitude stretch from
    /// mean_lat, mean_lat_len, mean_lon, w, h and dpi. The northern and
    /// southern latitudes are approximated iteratively.
    fn init_bbox_mll(&mut self) {
        self.scale = (self.mean_lat_len * 60.0 * 1852.0 * 100.0 / 2.54)
            / (self.w / self.dpi as f64);
        self.wc = self.mean_lat_len / self.mean_lat.to_radians().cos();
        self.bbox.ll.lon = self.mean_lon - self.wc / 2.0;
        self.bbox.ru.lon = self.mean_lon + self.wc / 2.0;

        self.hc = self.mean_lat_len * self.h / self.w;
        if matches!(self.proj, Projection::Mercator | Projection::Transversal) {
            self.bbox.ru.lat = self.mean_lat + self.hc / 2.0;
            self.bbox.ll.lat = self.mean_lat - self.hc / 2.0;

            for _ in 0..3 {
                self.lath = self.mean_lat.to_radians().tan().asinh();
                self.lath_len = self.bbox.ru.lat.to_radians().tan().asinh()
                    - self.bbox.ll.lat.to_radians().tan().asinh();

                let (_, lat) = self.pxf2geo(0.0, 0.0);
                self.bbox.ru.lat = lat;
                let (_, lat) = self.pxf2geo(0.0, self.h);
                self.bbox.ll.lat = lat;
                self.hc = self.bbox.ru.lat - self.bbox.ll.lat;
            }
        }
    }

    /// Convert geographic to Cartesian pixel coordinates.
    pub fn geo2pxf(&self, lon: f64, lat: f64) -> (f64, f64) {
        if self.proj == Projection::Adams2 {
            let xy = adams_square_ii(lon.to_radians(), lat.to_radians());
            let x = (xy.x + A2_LAM_SCALE) * self.w / (2.0 * A2_LAM_SCALE);
            let y = self.h - (xy.y + A2_PHI_SCALE) * self.h / (2.0 * A2_PHI_SCALE);
            return (x, y);
        }

        if !self.polygon_window {
            let x = (lon - self.bbox.ll.lon) * self.w / self.wc;
            let y = self.h
                * (0.5 - (lat.to_radians().tan().asinh() - self.lath) / self.lath_len);
            (x, y)
        } else {
            self.geo2pxf_rect(lon, lat)
        }
    }

    /// Projects the 4-corner polygon window onto the rectangular page. This
    /// does not fulfill Mercator constraints.
    fn geo2pxf_rect(&self, lon: f64, lat: f64) -> (f64, f64) {
        let pw = &self.pw;
        let mut x0 = lon - pw[0].lon;
        let mut y0 = lat - pw[0].lat;

        let sx = x0 / (pw[1].lon - pw[0].lon);
        let sy = y0 / (pw[3].lat - pw[0].lat);

        let dx = pw[3].lon - pw[0].lon;
        let dy = pw[1].lat - pw[0].lat;
        let mx = (pw[2].lon - pw[3].lon) / (pw[1].lon - pw[0].lon);
        let my = (pw[2].lat - pw[1].lat) / (pw[3].lat - pw[0].lat);

        x0 -= dx * sy;
        x0 /= 1.0 - (1.0 - mx) * sy;

        y0 -= dy * sx;
        y0 /= 1.0 - (1.0 - my) * sx;

        let x = x0 * self.w / (pw[1].lon - pw[0].lon);
        let y = self.h - y0 * self.h / (pw[3].lat - pw[0].lat);
        (x, y)
    }

    /// The inverse pixel-to-geographic mapping (Mercator family). The
    /// Adams II inverse is available through
    /// [`adams_square_ii_invert`].
    pub fn pxf2geo(&self, x: f64, y: f64) -> (f64, f64) {
        if self.proj == Projection::Adams2 {
            let px = x * 2.0 * A2_LAM_SCALE / self.w - A2_LAM_SCALE;
            let py = (self.h - y) * 2.0 * A2_PHI_SCALE / self.h - A2_PHI_SCALE;
            let lp = adams_square_ii_invert(px, py);
            return (lp.x.to_degrees(), lp.y.to_degrees());
        }
        let lon = x * self.wc / self.w + self.bbox.ll.lon;
        let lat = (self.lath_len * (0.5 - y / self.h) + self.lath).sinh().atan();
        (lon, lat.to_degrees())
    }

    /// Convert geographic to page coordinates in typographic points at the
    /// page dpi.
    pub fn geo2pt(&self, lon: f64, lat: f64) -> (f64, f64) {
        let (x, y) = self.geo2pxf(lon, lat);
        (self.px_to_unit(x, Unit::Pt), self.px_to_unit(y, Unit::Pt))
    }

    /// Convert a pixel measure to the desired unit.
    pub fn px_to_unit(&self, x: f64, unit: Unit) -> f64 {
        let dpi = self.dpi as f64;
        match unit {
            Unit::One | Unit::Px => x,
            Unit::Cm => x * 25.4 / dpi / 10.0,
            Unit::Mm => x * 25.4 / dpi,
            Unit::Pt => x * 72.0 / dpi,
            Unit::In => x / dpi,
            Unit::Nm | Unit::Min => x * self.mean_lat_len * 60.0 / self.w,
            Unit::Km => x * self.mean_lat_len * 60.0 / self.w * 1.852,
            Unit::M => x * self.mean_lat_len * 60.0 / self.w * 1852.0,
            Unit::Kbl => x * self.mean_lat_len * 60.0 / self.w * 10.0,
            Unit::Ft => x * self.mean_lat_len * 60.0 / self.w * 6076.12,
            Unit::Deg => x * self.mean_lat_len / self.w,
        }
    }

    /// Convert a measure in the given unit to pixels.
    pub fn unit_to_px(&self, x: f64, unit: Unit) -> f64 {
        let dpi = self.dpi as f64;
        match unit {
            Unit::One | Unit::Px => x,
            Unit::Cm => x / 25.4 * dpi * 10.0,
            Unit::Mm => x / 25.4 * dpi,
            Unit::Pt => x / 72.0 * dpi,
            Unit::In => x * dpi,
            Unit::Nm | Unit::Min => x / self.mean_lat_len / 60.0 * self.w,
            Unit::Km => x / self.mean_lat_len / 60.0 * self.w / 1.852,
            Unit::M => x / self.mean_lat_len / 60.0 * self.w / 1852.0,
            Unit::Kbl => x / self.mean_lat_len / 60.0 * self.w / 10.0,
            Unit::Ft => x / self.mean_lat_len / 60.0 * self.w / 6076.12,
            Unit::Deg => x / self.mean_lat_len * self.w,
        }
    }

    /// Converts a value to the desired unit.
    pub fn value_in(&self, v: &Value, unit: Unit) -> f64 {
        self.px_to_unit(self.unit_to_px(v.val, v.unit), unit)
    }

    fn mm2px(&self, mm: f64) -> f64 {
        mm / 25.4 * self.dpi as f64
    }

    pub fn px2mm(&self, px: f64) -> f64 {
        px * 25.4 / self.dpi as f64
    }

    /// Millimeters on the page expressed as degrees of latitude.
    pub fn mm2lat(&self, mm: f64) -> f64 {
        mm * (self.bbox.ru.lat - self.bbox.ll.lat) / self.px2mm(self.h)
    }

    /// Millimeters on the page expressed as degrees of longitude.
    pub fn mm2lon(&self, mm: f64) -> f64 {
        mm * (self.bbox.ru.lon - self.bbox.ll.lon) / self.px2mm(self.w)
    }

    /// Increase the page size by a border of `mm` on every side.
    pub fn add_page_border(&mut self, mm: f64) {
        debug!("adding page border of {:.1} mm", mm);
        self.pgw += self.mm2px(mm * 2.0);
        self.pgh += self.mm2px(mm * 2.0);
    }

    pub fn is_on_page(&self, c: &Coord) -> bool {
        self.bbox.contains(c)
    }

    /// Logs the chart parameters, mirroring the original startup banner.
    pub fn log_params(&self) {
        info!("*** chart parameters for rendering ***");
        info!(
            "   {:.3} {:.3} -- {:.3} {:.3}",
            self.bbox.ru.lat, self.bbox.ll.lon, self.bbox.ru.lat, self.bbox.ru.lon
        );
        info!(
            "   {:.3} {:.3} -- {:.3} {:.3}",
            self.bbox.ll.lat, self.bbox.ll.lon, self.bbox.ll.lat, self.bbox.ru.lon
        );
        info!("   wc = {:.3}°, hc = {:.3}°", self.wc, self.hc);
        info!(
            "   mean_lat = {:.3}°, mean_lat_len = {:.3} ({:.1} nm)",
            self.mean_lat,
            self.mean_lat_len,
            self.mean_lat_len * 60.0
        );
        info!(
            "   page size = {:.1} x {:.1} mm, rendering {:.1} x {:.1} px, dpi = {}",
            self.px2mm(self.pgw),
            self.px2mm(self.pgh),
            self.w,
            self.h,
            self.dpi
        );
        info!("   rotation = {:.1}°", self.rot.to_degrees());
        info!("   scale 1:{:.0}", self.scale);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn default_page() -> PageGeom {
        let (pg, _) = PageGeom::new(
            Some("45:15:100000"),
            "A3",
            Projection::Mercator,
            300,
            false,
        )
        .unwrap();
        pg
    }

    #[test]
    fn test_parse_coord_plain() {
        assert_eq!(parse_coord("12.5"), (12.5, Axis::None));
        assert_eq!(parse_coord("-7"), (-7.0, Axis::None));
    }

    #[test]
    fn test_parse_coord_hemisphere() {
        assert_eq!(parse_coord("12.5N"), (12.5, Axis::Lat));
        assert_eq!(parse_coord("12.5S"), (-12.5, Axis::Lat));
        assert_eq!(parse_coord("3.25W"), (-3.25, Axis::Lon));
        let (v, a) = parse_coord("12N30.0");
        assert_eq!(a, Axis::Lat);
        assert_approx_eq!(v, 12.5);
    }

    #[test]
    fn test_parse_length() {
        let v = parse_length("2.5mm").unwrap();
        assert_eq!(v.unit, Unit::Mm);
        assert_approx_eq!(v.val, 2.5);
        let v = parse_length_def("4", Unit::Nm).unwrap();
        assert_eq!(v.unit, Unit::Nm);
    }

    #[test]
    fn test_paper_sizes() {
        let (w, h, a) = parse_paper("A4").unwrap();
        assert_approx_eq!(w, 210.0);
        assert_approx_eq!(h, 297.0);
        assert_approx_eq!(a, 0.0);
        let (w, h, a) = parse_paper("100x50:45").unwrap();
        assert_approx_eq!(w, 100.0);
        assert_approx_eq!(h, 50.0);
        assert_approx_eq!(a, std::f64::consts::FRAC_PI_4);
    }

    #[test]
    fn test_window_center_scale() {
        let pg = default_page();
        assert_approx_eq!(pg.mean_lat, 45.0);
        assert_approx_eq!(pg.mean_lon, 15.0);
        assert!(pg.bbox.ll.lat < 45.0 && pg.bbox.ru.lat > 45.0);
        // scale recomputed from mean latitude length stays at the request
        assert_approx_eq!(pg.scale, 100000.0, 1.0);
    }

    #[test]
    fn test_mercator_roundtrip() {
        let pg = default_page();
        for &(lat, lon) in &[(45.0, 15.0), (44.9, 14.9), (45.1, 15.1)] {
            let (x, y) = pg.geo2pxf(lon, lat);
            let (lon2, lat2) = pg.pxf2geo(x, y);
            assert_approx_eq!(lon2, lon, 1e-7);
            assert_approx_eq!(lat2, lat, 1e-7);
        }
    }

    #[test]
    fn test_unit_inverse() {
        let pg = default_page();
        for unit in [
            Unit::Mm,
            Unit::Cm,
            Unit::Pt,
            Unit::In,
            Unit::Nm,
            Unit::Km,
            Unit::M,
            Unit::Ft,
            Unit::Kbl,
            Unit::Deg,
            Unit::Min,
        ] {
            let x = pg.unit_to_px(1.0, unit);
            assert_approx_eq!(pg.px_to_unit(x, unit), 1.0, 1e-9);
        }
    }

    #[test]
    fn test_window_bbox() {
        let (pg, render_all) = PageGeom::new(
            Some("44:14:45:16"),
            "A3",
            Projection::Mercator,
            300,
            false,
        )
        .unwrap();
        assert!(!render_all);
        assert_approx_eq!(pg.mean_lat, 44.5, 1e-6);
        assert!(pg.scale > 0.0);
    }

    #[test]
    fn test_rotation_inflates_page() {
        let (pg, _) = PageGeom::new(
            Some("45:15:100000"),
            "A4:30",
            Projection::Mercator,
            300,
            false,
        )
        .unwrap();
        let (pg0, _) = PageGeom::new(
            Some("45:15:100000"),
            "A4",
            Projection::Mercator,
            300,
            false,
        )
        .unwrap();
        assert!(pg.h > pg0.h);
    }

    #[test]
    fn test_bad_window() {
        assert!(PageGeom::new(Some("1:2:3:4:5"), "A3", Projection::Mercator, 300, false).is_err());
    }
}
