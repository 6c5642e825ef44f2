//! The Adams Square I+II projections.
//!
//! These map the whole globe into a square via elliptic integrals of the
//! first kind. The forward functions follow Torben Janson's formulation
//! (<https://observablehq.com/@toja/adams-world-in-a-square-i-ii>) which in
//! turn implements Bulirsch (1965) as presented by Snyder (1989), p. 239.
//! The inverse runs a Newton-Raphson iteration on the forward function, as
//! done in PROJ's adams.cpp.

const C1: f64 = 1e-3;
const C2: f64 = 1e-9;
const TOL: f64 = 1e-5;

/// Page scaling constants: the forward projection of the whole globe ends
/// up inside [-SCALE, SCALE] on both axes.
pub const A2_PHI_SCALE: f64 = 2.62181347;
pub const A2_LAM_SCALE: f64 = 2.62205760;

/// A projected position.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Xy {
    pub x: f64,
    pub y: f64,
}

/// Computes the elliptic integral of the first kind.
pub fn elliptic_f(phi: f64, m: f64) -> f64 {
    let sp = phi.sin();
    let mut h = sp * sp;
    let mut k = (1.0 - m).sqrt();

    // "complete" elliptic integral
    if h >= 1.0 || phi.abs() == std::f64::consts::FRAC_PI_2 {
        if k <= TOL {
            return if sp < 0.0 {
                f64::NEG_INFINITY
            } else {
                f64::INFINITY
            };
        }

        let mut m = 1.0;
        h = m;
        m += k;

        while (h - k).abs() > C1 * m {
            k = (h * k).sqrt();
            m /= 2.0;
            h = m;
            m += k;
        }

        if sp < 0.0 {
            -std::f64::consts::PI / m
        } else {
            std::f64::consts::PI / m
        }
    }
    // "incomplete" elliptic integral
    else {
        if k <= TOL {
            return ((1.0 + sp) / (1.0 - sp)).ln() / 2.0;
        }

        let mut y = ((1.0 - h) / h).sqrt();
        let mut n = 0.0;
        let mut m = 1.0;
        let mut p = m * k;
        let mut g = m;
        m += k;
        y -= p / y;

        if y == 0.0 {
            y = C2 * p.sqrt();
        }

        while (g - k).abs() > C1 * g {
            k = 2.0 * p.sqrt();
            n += n;
            if y < 0.0 {
                n += 1.0;
            }
            p = m * k;
            g = m;
            m += k;
            y -= p / y;

            if y == 0.0 {
                y = C2 * p.sqrt();
            }
        }

        if y < 0.0 {
            n += 1.0;
        }

        let r = ((m / y).atan() + std::f64::consts::PI * n) / m;
        if sp < 0.0 {
            -r
        } else {
            r
        }
    }
}

pub fn elliptic_factory(a: f64, b: f64, sm: bool, sn: bool) -> Xy {
    let mut m = (1.0 + (a + b).cos().min(0.0)).sqrt().asin();
    if sm {
        m = -m;
    }

    let mut n = (1.0 - (a - b).cos().max(0.0)).abs().sqrt().asin();
    if sn {
        n = -n;
    }

    Xy {
        x: elliptic_f(m, 0.5),
        y: elliptic_f(n, 0.5),
    }
}

pub fn adams_square_i(lambda: f64, phi: f64) -> Xy {
    let sp = (0.5 * phi).tan();
    let c = sp.asin().cos() * (0.5 * lambda).sin();
    let a = ((c - sp) * std::f64::consts::FRAC_1_SQRT_2).acos();
    let b = ((c + sp) * std::f64::consts::FRAC_1_SQRT_2).acos();

    elliptic_factory(a, b, lambda < 0.0, phi < 0.0)
}

pub fn adams_square_i_invert(x: f64, y: f64) -> Xy {
    let phi = (y / 1.8540746957596883).clamp(-1.0, 1.0) * std::f64::consts::FRAC_PI_2;
    let lam = if phi.abs() < std::f64::consts::PI {
        (x / 1.854074716833181).clamp(-1.0, 1.0) * std::f64::consts::PI
    } else {
        0.0
    };

    inverse(x, y, lam, phi, adams_square_i)
}

pub fn adams_square_ii(lambda: f64, phi: f64) -> Xy {
    let sp = (0.5 * phi).tan();
    let mut a = sp.asin().cos() * (0.5 * lambda).sin();
    let sm = (sp + a) < 0.0;
    let sn = (sp - a) < 0.0;
    let b = sp.acos();
    a = a.acos();

    let xy = elliptic_factory(a, b, sm, sn);

    Xy {
        x: std::f64::consts::FRAC_1_SQRT_2 * (xy.x - xy.y),
        y: std::f64::consts::FRAC_1_SQRT_2 * (xy.x + xy.y),
    }
}

pub fn adams_square_ii_invert(x: f64, y: f64) -> Xy {
    let phi = (y / A2_PHI_SCALE).clamp(-1.0, 1.0) * std::f64::consts::FRAC_PI_2;
    let lam = if phi.abs() < std::f64::consts::PI {
        (x / A2_LAM_SCALE / phi.cos()).clamp(-1.0, 1.0) * std::f64::consts::PI
    } else {
        0.0
    };

    inverse(x, y, lam, phi, adams_square_ii)
}

fn limit(a: f64, b: f64) -> f64 {
    a.clamp(-b, b)
}

/// Newton-Raphson inversion of a forward projection function, based on code
/// from PROJ written by Gerald Evenden. Converges to a residual below 1e-10
/// within at most 15 iterations for coordinates inside the valid range.
pub fn inverse(x: f64, y: f64, lam: f64, phi: f64, proj: fn(f64, f64) -> Xy) -> Xy {
    let mut lam = lam;
    let mut phi = phi;
    let mut dlam = Xy::default();
    let mut dphi = Xy::default();

    for _ in 0..15 {
        let appr = proj(lam, phi);
        let d = Xy {
            x: appr.x - x,
            y: appr.y - y,
        };

        if d.x.abs() < 1e-10 && d.y.abs() < 1e-10 {
            return Xy { x: lam, y: phi };
        }

        if d.x.abs() > 1e-6 || d.y.abs() > 1e-6 {
            // numeric partial derivatives of the forward function
            let dlam0 = if lam > 0.0 { -1e-6 } else { 1e-6 };
            let xy2 = proj(lam + dlam0, phi);
            let dtlam = Xy {
                x: (xy2.x - appr.x) / dlam0,
                y: (xy2.y - appr.y) / dlam0,
            };

            let dphi0 = if phi > 0.0 { -1e-6 } else { 1e-6 };
            let xy2 = proj(lam, phi + dphi0);
            let dtphi = Xy {
                x: (xy2.x - appr.x) / dphi0,
                y: (xy2.y - appr.y) / dphi0,
            };

            let det = dtlam.x * dtphi.y - dtphi.x * dtlam.y;
            if det != 0.0 {
                dlam = Xy {
                    x: dtphi.y / det,
                    y: -dtphi.x / det,
                };
                dphi = Xy {
                    x: -dtlam.y / det,
                    y: dtlam.x / det,
                };
            }
        }

        if x != 0.0 {
            let step = (d.x * dlam.x + d.y * dlam.y).clamp(-0.3, 0.3);
            lam = limit(lam - step, std::f64::consts::PI);
        }

        if y != 0.0 {
            let step = (d.x * dphi.x + d.y * dphi.y).clamp(-0.3, 0.3);
            phi = limit(phi - step, std::f64::consts::FRAC_PI_2);
        }
    }

    Xy { x: lam, y: phi }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_square_ii_origin() {
        let xy = adams_square_ii(0.0, 0.0);
        assert_approx_eq!(xy.x, 0.0, 1e-9);
        assert_approx_eq!(xy.y, 0.0, 1e-9);
    }

    #[test]
    fn test_square_ii_in_scale_range() {
        for &(lam, phi) in &[(3.1, 1.5), (-3.1, -1.5), (1.0, -0.7), (-2.0, 0.3)] {
            let xy = adams_square_ii(lam, phi);
            assert!(xy.x.abs() <= A2_LAM_SCALE + 1e-6, "x = {}", xy.x);
            assert!(xy.y.abs() <= A2_PHI_SCALE + 1e-6, "y = {}", xy.y);
        }
    }

    #[test]
    fn test_square_ii_roundtrip() {
        for &(lam, phi) in &[
            (0.5, 0.3),
            (-1.2, 0.8),
            (2.0, -1.0),
            (-0.1, -0.1),
            (1.0, 1.2),
        ] {
            let xy = adams_square_ii(lam, phi);
            let lp = adams_square_ii_invert(xy.x, xy.y);
            let back = adams_square_ii(lp.x, lp.y);
            assert_approx_eq!(back.x, xy.x, 1e-9);
            assert_approx_eq!(back.y, xy.y, 1e-9);
        }
    }

    #[test]
    fn test_elliptic_f_symmetry() {
        assert_approx_eq!(elliptic_f(0.4, 0.5), -elliptic_f(-0.4, 0.5), 1e-12);
        assert_approx_eq!(elliptic_f(0.0, 0.5), 0.0, 1e-12);
    }
}
