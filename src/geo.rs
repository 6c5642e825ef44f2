//! Geographic coordinate helpers.
//!
//! Distances returned by [`coord_diff`] are measured in degrees on the mean
//! latitude, bearings in degrees clockwise from north. One degree equals 60
//! nautical miles.

/// A geographic position in degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Coord {
    pub lat: f64,
    pub lon: f64,
}

impl Coord {
    pub fn new(lat: f64, lon: f64) -> Coord {
        Coord { lat, lon }
    }
}

/// A polar coordinate relative to some source position.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PolarCoord {
    /// Compass bearing in degrees, clockwise from north, 0 <= bearing < 360.
    pub bearing: f64,
    /// Distance in degrees of a great circle.
    pub dist: f64,
}

/// An axis-aligned latitude/longitude rectangle.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Bbox {
    /// Left lower corner.
    pub ll: Coord,
    /// Right upper corner.
    pub ru: Coord,
}

impl Bbox {
    pub fn contains(&self, c: &Coord) -> bool {
        !(c.lon < self.ll.lon || c.lon > self.ru.lon || c.lat < self.ll.lat || c.lat > self.ru.lat)
    }

    pub fn center(&self) -> Coord {
        Coord {
            lat: (self.ll.lat + self.ru.lat) / 2.0,
            lon: (self.ll.lon + self.ru.lon) / 2.0,
        }
    }

    /// Grows the box to include the coordinate.
    pub fn extend(&mut self, c: &Coord) {
        if c.lon > self.ru.lon {
            self.ru.lon = c.lon;
        }
        if c.lon < self.ll.lon {
            self.ll.lon = c.lon;
        }
        if c.lat > self.ru.lat {
            self.ru.lat = c.lat;
        }
        if c.lat < self.ll.lat {
            self.ll.lat = c.lat;
        }
    }

    /// An inverted box which any first `extend` will snap to a point.
    pub fn collector() -> Bbox {
        Bbox {
            ll: Coord::new(90.0, 180.0),
            ru: Coord::new(-90.0, -180.0),
        }
    }
}

/// Calculates bearing and distance from `src` to `dst` with the latitudes
/// projected onto the mean latitude of both points.
pub fn coord_diff(src: &Coord, dst: &Coord) -> PolarCoord {
    let dlat = dst.lat - src.lat;
    let dlon = (dst.lon - src.lon) * ((src.lat + dst.lat) / 2.0).to_radians().cos();

    let mut bearing = dlon.atan2(dlat).to_degrees();
    if bearing < 0.0 {
        bearing += 360.0;
    }

    PolarCoord {
        bearing,
        dist: dlat.hypot(dlon),
    }
}

/// The inverse of [`coord_diff`]: the position reached from `src` by
/// travelling `pc.dist` degrees on bearing `pc.bearing`.
pub fn dest_coord(src: &Coord, pc: &PolarCoord) -> Coord {
    let lat = src.lat + pc.dist * pc.bearing.to_radians().cos();
    let lon = src.lon
        + pc.dist * pc.bearing.to_radians().sin() / ((lat + src.lat) / 2.0).to_radians().cos();
    Coord { lat, lon }
}

/// Positive modulo: the result is always in [0, n).
pub fn fmod2(a: f64, n: f64) -> f64 {
    let r = a % n;
    if r < 0.0 {
        r + n
    } else {
        r
    }
}

/// Wraps a longitude into [-180, 180].
pub fn lonmod(lon: f64) -> f64 {
    let mut lon = lon % 360.0;
    if lon < -180.0 {
        lon += 360.0;
    }
    if lon > 180.0 {
        lon -= 360.0;
    }
    lon
}

/// Difference between two courses in degrees, in [-180, 180].
pub fn course_diff(a: f64, b: f64) -> f64 {
    let mut y = b - a;
    if y > 180.0 {
        y -= 360.0;
    }
    if y < -180.0 {
        y += 360.0;
    }
    y
}

/// Rotates the coordinate to a different point of reference. `theta` shifts
/// the latitude, `phi` the longitude, both in degrees.
pub fn transcoord(theta: f64, phi: f64, lat0: &mut f64, lon0: &mut f64) {
    let lat = lat0.to_radians();
    let lon = lon0.to_radians();
    let theta = theta.to_radians();
    let phi = phi.to_radians();

    let nlat = (theta.cos() * lat.sin() - lon.cos() * theta.sin() * lat.cos()).asin();
    let nlon = lon.sin().atan2(lat.tan() * theta.sin() + lon.cos() * theta.cos()) - phi;

    *lat0 = nlat.to_degrees();
    *lon0 = lonmod(nlon.to_degrees());
}

/// Transformation into the rotated reference frame of the transverse
/// Mercator projection.
pub fn transtraversal(lat: f64, lon: f64, lat0: &mut f64, lon0: &mut f64) {
    transcoord(0.0, lon, lat0, lon0);
    transcoord(lat, 0.0, lat0, lon0);
    transcoord(0.0, -lon, lat0, lon0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_coord_diff_north() {
        let src = Coord::new(0.0, 0.0);
        let dst = Coord::new(1.0, 0.0);
        let pc = coord_diff(&src, &dst);
        assert_approx_eq!(pc.bearing, 0.0);
        assert_approx_eq!(pc.dist, 1.0);
    }

    #[test]
    fn test_coord_diff_east_at_equator() {
        let pc = coord_diff(&Coord::new(0.0, 0.0), &Coord::new(0.0, 2.0));
        assert_approx_eq!(pc.bearing, 90.0);
        assert_approx_eq!(pc.dist, 2.0);
    }

    #[test]
    fn test_coord_diff_southwest() {
        let pc = coord_diff(&Coord::new(1.0, 1.0), &Coord::new(0.0, 0.0));
        assert!(pc.bearing > 180.0 && pc.bearing < 270.0);
    }

    #[test]
    fn test_dest_coord_roundtrip() {
        let src = Coord::new(45.0, 10.0);
        let dst = Coord::new(45.3, 10.4);
        let pc = coord_diff(&src, &dst);
        let back = dest_coord(&src, &pc);
        assert_approx_eq!(back.lat, dst.lat, 1e-3);
        assert_approx_eq!(back.lon, dst.lon, 1e-3);
    }

    #[test]
    fn test_fmod2() {
        assert_approx_eq!(fmod2(-90.0, 360.0), 270.0);
        assert_approx_eq!(fmod2(370.0, 360.0), 10.0);
    }

    #[test]
    fn test_lonmod() {
        assert_approx_eq!(lonmod(190.0), -170.0);
        assert_approx_eq!(lonmod(-190.0), 170.0);
        assert_approx_eq!(lonmod(10.0), 10.0);
    }

    #[test]
    fn test_course_diff() {
        assert_approx_eq!(course_diff(350.0, 10.0), 20.0);
        assert_approx_eq!(course_diff(10.0, 350.0), -20.0);
    }

    #[test]
    fn test_bbox() {
        let mut bb = Bbox::collector();
        bb.extend(&Coord::new(1.0, 2.0));
        bb.extend(&Coord::new(-1.0, 5.0));
        assert!(bb.contains(&Coord::new(0.0, 3.0)));
        assert!(!bb.contains(&Coord::new(2.0, 3.0)));
    }
}
