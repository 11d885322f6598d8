//! Polygamma functions used by the variance prior.

pub use statrs::function::gamma::digamma;

/// Shift the argument above this before using the asymptotic series.
const ASYMPTOTIC_MIN: f64 = 12.0;

/// Trigamma function, the derivative of [`digamma`].
pub fn trigamma(x: f64) -> f64 {
    if x.is_nan() || x == f64::NEG_INFINITY {
        return f64::NAN;
    }
    if x == f64::INFINITY {
        return 0.0;
    }
    if x <= 0.0 && x.fract() == 0.0 {
        return f64::INFINITY;
    }
    if x < 0.0 {
        // reflection: psi1(1 - x) + psi1(x) = pi^2 / sin^2(pi x)
        let s = (std::f64::consts::PI * x).sin();
        return std::f64::consts::PI.powi(2) / (s * s) - trigamma(1.0 - x);
    }

    let mut x = x;
    let mut acc = 0.0;
    while x < ASYMPTOTIC_MIN {
        acc += 1.0 / (x * x);
        x += 1.0;
    }
    let inv = 1.0 / x;
    let inv2 = inv * inv;
    acc + inv
        + inv2 / 2.0
        + inv * inv2
            * (1.0 / 6.0
                + inv2 * (-1.0 / 30.0 + inv2 * (1.0 / 42.0 + inv2 * (-1.0 / 30.0))))
}

/// Tetragamma function, the derivative of [`trigamma`]. Defined for x > 0.
pub fn tetragamma(x: f64) -> f64 {
    if x.is_nan() || x <= 0.0 {
        return f64::NAN;
    }
    if x == f64::INFINITY {
        return 0.0;
    }

    let mut x = x;
    let mut acc = 0.0;
    while x < ASYMPTOTIC_MIN {
        acc -= 2.0 / (x * x * x);
        x += 1.0;
    }
    let inv = 1.0 / x;
    let inv2 = inv * inv;
    acc - inv2
        - inv2 * inv
        - inv2
            * inv2
            * (0.5
                + inv2 * (-1.0 / 6.0 + inv2 * (1.0 / 6.0 + inv2 * (-3.0 / 10.0 + inv2 * 5.0 / 6.0))))
}

/// Solve `trigamma(x) = y` for x > 0 by Newton iteration.
///
/// Returns `NaN` for y <= 0 or `NaN`.
pub fn trigamma_inverse(y: f64) -> f64 {
    if y.is_nan() || y <= 0.0 {
        return f64::NAN;
    }
    if y > 1e7 {
        return 1.0 / y.sqrt();
    }
    if y < 1e-6 {
        return 1.0 / y;
    }

    // trigamma is convex and decreasing; from this start Newton converges
    // monotonically
    let mut x = 0.5 + 1.0 / y;
    for _ in 0..50 {
        let tri = trigamma(x);
        let dif = tri * (1.0 - tri / y) / tetragamma(x);
        x += dif;
        if -dif / x < 1e-8 {
            break;
        }
    }
    x
}
