//! Numeric clip/scale transform
//!
//! When all four bounds are enabled the value is linearly mapped from the
//! input range onto the output range; otherwise the enabled bounds clip
//! independently. Degenerate ranges collapse to the output minimum.

use crate::types::RouteDestination;

const EPSILON: f32 = 1e-5;

/// Apply the destination's transform to a value.
pub fn apply(dst: &RouteDestination, v: f32) -> f32 {
    let RouteDestination {
        in_min,
        in_max,
        out_min,
        out_max,
        ..
    } = dst;

    if in_min.enabled && in_max.enabled && out_min.enabled && out_max.enabled {
        let range = in_max.value - in_min.value;
        let t = if range.abs() < EPSILON {
            0.0
        } else {
            (v - in_min.value) / range
        };
        let out_range = out_max.value - out_min.value;
        if out_range.abs() < EPSILON {
            out_min.value
        } else {
            out_min.value + t * out_range
        }
    } else {
        let mut v = v;

        if in_min.enabled || out_min.enabled {
            let lo = if in_min.enabled {
                if out_min.enabled {
                    in_min.value.max(out_min.value)
                } else {
                    in_min.value
                }
            } else {
                out_min.value
            };
            if v < lo {
                return lo;
            }
        }

        if in_max.enabled || out_max.enabled {
            let hi = if in_max.enabled {
                if out_max.enabled {
                    in_max.value.min(out_max.value)
                } else {
                    in_max.value
                }
            } else {
                out_max.value
            };
            if v > hi {
                v = hi;
            }
        }

        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Transform;

    fn dst(
        in_min: Option<f32>,
        in_max: Option<f32>,
        out_min: Option<f32>,
        out_max: Option<f32>,
    ) -> RouteDestination {
        let t = |o: Option<f32>| match o {
            Some(v) => Transform::enabled(v),
            None => Transform::default(),
        };
        RouteDestination {
            in_min: t(in_min),
            in_max: t(in_max),
            out_min: t(out_min),
            out_max: t(out_max),
            ..Default::default()
        }
    }

    #[test]
    fn identity_scale_passes_through() {
        let d = dst(Some(0.0), Some(1.0), Some(0.0), Some(1.0));
        for v in [0.0, 0.25, 0.7, 1.0] {
            assert!((apply(&d, v) - v).abs() < 1e-6);
        }
    }

    #[test]
    fn scales_between_ranges() {
        let d = dst(Some(0.0), Some(100.0), Some(0.0), Some(255.0));
        assert!((apply(&d, 50.0) - 127.5).abs() < 1e-3);
        let d = dst(Some(0.0), Some(1.0), Some(0.0), Some(100.0));
        assert!((apply(&d, 0.25) - 25.0).abs() < 1e-3);
    }

    #[test]
    fn scale_can_extrapolate() {
        let d = dst(Some(0.0), Some(1.0), Some(0.0), Some(10.0));
        assert!((apply(&d, 2.0) - 20.0).abs() < 1e-3);
    }

    #[test]
    fn degenerate_ranges_collapse() {
        let d = dst(Some(5.0), Some(5.0), Some(1.0), Some(9.0));
        assert!((apply(&d, 7.0) - 1.0).abs() < 1e-6);
        let d = dst(Some(0.0), Some(1.0), Some(3.0), Some(3.0));
        assert!((apply(&d, 0.5) - 3.0).abs() < 1e-6);
    }

    #[test]
    fn lower_clip_only() {
        let d = dst(Some(0.5), None, None, None);
        assert!((apply(&d, 0.2) - 0.5).abs() < 1e-6);
        assert!((apply(&d, 0.8) - 0.8).abs() < 1e-6);
    }

    #[test]
    fn upper_clip_takes_tighter_bound() {
        let d = dst(None, Some(0.9), None, Some(0.7));
        assert!((apply(&d, 0.8) - 0.7).abs() < 1e-6);
        assert!((apply(&d, 0.5) - 0.5).abs() < 1e-6);
    }
}
