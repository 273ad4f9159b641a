//! Numeric-coded mirror of the current settings/status for scrapers.
//!
//! Earlier firmware derived these codes from a chain of string comparisons
//! with an inverted equality check, so several codes were wrong whenever more
//! than one branch matched. The mapping here is a plain match on the typed
//! settings.

use crate::types::{FanSpeed, HeatPumpSettings, HeatPumpStatus, Mode, Power, Vane, WideVane};

pub fn power_code(power: Power) -> i8 {
    match power {
        Power::On => 1,
        Power::Off => 0,
    }
}

pub fn fan_code(fan: FanSpeed) -> i8 {
    match fan {
        FanSpeed::Auto => -1,
        FanSpeed::Quiet => 0,
        FanSpeed::Speed1 => 1,
        FanSpeed::Speed2 => 2,
        FanSpeed::Speed3 => 3,
        FanSpeed::Speed4 => 4,
    }
}

pub fn vane_code(vane: Vane) -> i8 {
    match vane {
        Vane::Auto => -1,
        Vane::Swing => 0,
        Vane::Position1 => 1,
        Vane::Position2 => 2,
        Vane::Position3 => 3,
        Vane::Position4 => 4,
        Vane::Position5 => 5,
    }
}

pub fn wide_vane_code(wide_vane: WideVane) -> i8 {
    match wide_vane {
        WideVane::Swing => 0,
        WideVane::FullLeft => 1,
        WideVane::Left => 2,
        WideVane::Center => 3,
        WideVane::Right => 4,
        WideVane::FullRight => 5,
        WideVane::Split => 6,
    }
}

/// Mode code folds power in: a unit that is switched off reports 0 whatever
/// mode is latched.
pub fn mode_code(settings: &HeatPumpSettings) -> i8 {
    if settings.power == Power::Off {
        return 0;
    }
    match settings.mode {
        Mode::Auto => -1,
        Mode::Cool => 1,
        Mode::Dry => 2,
        Mode::Heat => 3,
        Mode::Fan => 4,
    }
}

/// Plain-text exposition of the snapshot, one gauge per line.
pub fn render(
    hostname: &str,
    version: &str,
    settings: &HeatPumpSettings,
    status: &HeatPumpStatus,
) -> String {
    let labels = format!("{{unit=\"{hostname}\",version=\"{version}\"}}");
    let mut out = String::new();
    let mut gauge = |name: &str, value: String| {
        out.push_str("# TYPE ");
        out.push_str(name);
        out.push_str(" gauge\n");
        out.push_str(name);
        out.push_str(&labels);
        out.push(' ');
        out.push_str(&value);
        out.push('\n');
    };

    gauge("heatpump_power", power_code(settings.power).to_string());
    gauge("heatpump_mode", mode_code(settings).to_string());
    gauge("heatpump_fan", fan_code(settings.fan).to_string());
    gauge("heatpump_vane", vane_code(settings.vane).to_string());
    gauge(
        "heatpump_widevane",
        wide_vane_code(settings.wide_vane).to_string(),
    );
    gauge("heatpump_temperature", settings.temperature_c.to_string());
    gauge(
        "heatpump_room_temperature",
        status.room_temperature_c.to_string(),
    );
    gauge(
        "heatpump_compressor_frequency",
        status.compressor_frequency.to_string(),
    );
    gauge(
        "heatpump_action",
        if status.operating { "1" } else { "0" }.to_string(),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_code_reports_zero_when_powered_off() {
        let mut settings = HeatPumpSettings {
            mode: Mode::Heat,
            power: Power::Off,
            ..HeatPumpSettings::default()
        };
        assert_eq!(mode_code(&settings), 0);

        settings.power = Power::On;
        assert_eq!(mode_code(&settings), 3);
    }

    #[test]
    fn each_wide_vane_position_has_a_distinct_code() {
        let positions = [
            WideVane::Swing,
            WideVane::FullLeft,
            WideVane::Left,
            WideVane::Center,
            WideVane::Right,
            WideVane::FullRight,
            WideVane::Split,
        ];
        let codes: Vec<i8> = positions.iter().map(|wv| wide_vane_code(*wv)).collect();
        assert_eq!(codes, vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn render_exposes_every_gauge_once() {
        let exposition = render(
            "HVAC_abc123",
            "2024.0.0",
            &HeatPumpSettings::default(),
            &HeatPumpStatus::default(),
        );
        assert_eq!(exposition.matches("# TYPE").count(), 9);
        assert!(exposition.contains("heatpump_power{unit=\"HVAC_abc123\",version=\"2024.0.0\"} 0"));
    }
}
