//! Temperature conversion between the unit's Celsius scale and the display
//! scale. The paired values are direct mappings taken from the unit's remote
//! control, which does not follow the arithmetic formula exactly; anything
//! outside the table falls back to the formula with remote-style rounding.

/// (celsius, fahrenheit) pairs as printed on the remote.
const REMOTE_SCALE: &[(f32, f32)] = &[
    (16.0, 61.0),
    (16.5, 62.0),
    (17.0, 63.0),
    (17.5, 64.0),
    (18.0, 65.0),
    (18.5, 66.0),
    (19.0, 67.0),
    (20.0, 68.0),
    (21.0, 69.0),
    (21.5, 70.0),
    (22.0, 71.0),
    (22.5, 72.0),
    (23.0, 73.0),
    (23.5, 74.0),
    (24.0, 75.0),
    (24.5, 76.0),
    (25.0, 77.0),
    (25.5, 78.0),
    (26.0, 79.0),
    (26.5, 80.0),
    (27.0, 81.0),
    (27.5, 82.0),
    (28.0, 83.0),
    (28.5, 84.0),
    (29.0, 85.0),
    (29.5, 86.0),
    (30.0, 87.0),
    (30.5, 88.0),
];

pub fn to_fahrenheit(celsius: f32) -> f32 {
    for (c, f) in REMOTE_SCALE {
        if (c - celsius).abs() < f32::EPSILON {
            return *f;
        }
    }
    (celsius * 1.8 + 32.0).round()
}

pub fn to_celsius(fahrenheit: f32) -> f32 {
    for (c, f) in REMOTE_SCALE {
        if (f - fahrenheit).abs() < f32::EPSILON {
            return *c;
        }
    }
    // Nearest half degree, matching the unit's setpoint granularity.
    ((fahrenheit - 32.0) / 1.8 * 2.0).round() / 2.0
}

pub fn celsius_to_local(celsius: f32, use_fahrenheit: bool) -> f32 {
    if use_fahrenheit {
        to_fahrenheit(celsius)
    } else {
        celsius
    }
}

pub fn local_to_celsius(local: f32, use_fahrenheit: bool) -> f32 {
    if use_fahrenheit {
        to_celsius(local)
    } else {
        local
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_table_beats_formula() {
        // 20C is 68F on the remote; the formula would give 68 too, but
        // 21C maps to 69F where the formula rounds to 70.
        assert_eq!(to_fahrenheit(21.0), 69.0);
        assert_eq!(to_celsius(69.0), 21.0);
        assert_eq!(to_fahrenheit(30.5), 88.0);
    }

    #[test]
    fn formula_fallback_outside_table() {
        assert_eq!(to_fahrenheit(0.0), 32.0);
        assert_eq!(to_celsius(32.0), 0.0);
        assert_eq!(to_celsius(90.0), 32.0);
    }

    #[test]
    fn local_conversion_is_identity_for_celsius() {
        assert_eq!(celsius_to_local(22.5, false), 22.5);
        assert_eq!(local_to_celsius(22.5, false), 22.5);
        assert_eq!(celsius_to_local(22.5, true), 72.0);
    }
}
