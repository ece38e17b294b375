//! Human-friendly output for a [`SessionState`].

use std::fmt::Write;

use forecast_core::{
    SessionState,
    display::{day_label, weather_icon},
};

pub fn loading(query: &str) -> String {
    format!("Loading forecast for \"{query}\"...")
}

/// Header with the place label, then one line per day. Empty forecasts render
/// as a short notice; errors are not shown here.
pub fn state(state: &SessionState) -> String {
    let mut out = String::new();

    if state.forecast.is_empty() {
        let _ = writeln!(out, "No forecast to show.");
        return out;
    }

    if let Some(place) = &state.resolved_place {
        let _ = writeln!(out, "Weather in {}", place.display_label);
    }

    for (index, day) in state.forecast.days().iter().enumerate() {
        let (min, max) = day.temperature_range();
        let _ = writeln!(
            out,
            "  {:<3} {:<6} {}° — {}°",
            weather_icon(day.weather_code).unwrap_or("NOT FOUND"),
            day_label(index, day.date),
            min,
            max,
        );
    }

    out
}
