use std::time::Duration;

pub fn format_number(value: f64) -> String {
    if value != 0.0 && !(1e-2..=1e4).contains(&value.abs()) {
        // Format in scientific notation with 4 significant digits
        format!("{:.4e}", value)
    } else {
        // Format with up to 4 decimal places, removing trailing zeros
        let s = format!("{:.4}", value);
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

pub fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 3600 {
        let hours = duration.as_secs() / 3600;
        let minutes = (duration.as_secs() % 3600) / 60;
        let seconds = duration.as_secs() % 60;
        format!("{} hrs, {} min, {} sec", hours, minutes, seconds)
    } else if duration.as_secs() >= 60 {
        let minutes = duration.as_secs() / 60;
        let seconds = duration.as_secs() % 60;
        format!("{} min, {} sec", minutes, seconds)
    } else if duration.as_secs() >= 1 {
        format!("{} sec", duration.as_secs())
    } else if duration.as_millis() >= 1 {
        format!("{} ms", duration.as_millis())
    } else {
        format!("{} us", duration.as_micros())
    }
}

pub fn assert_equal(left: f64, right: f64) {
    assert_equal_reltol(left, right, 1e-9);
}

pub fn assert_equal_reltol(left: f64, right: f64, reltol: f64) {
    let max = left.abs().max(right.abs());
    if max < f64::EPSILON {
        // If both values are close to zero, we consider them equal
        return;
    }
    let abs_diff = (left - right).abs();
    let rel_diff = abs_diff / max;

    assert!(
        rel_diff < reltol,
        "Assertion failed: left ({}) and right ({}) are not approximately equal. Relative difference: {}. Absolute difference: {}",
        left,
        right,
        rel_diff,
        abs_diff,
    );
}

/// For values expected near zero, where a relative comparison is meaningless.
pub fn assert_equal_abstol(left: f64, right: f64, abstol: f64) {
    let abs_diff = (left - right).abs();
    assert!(
        abs_diff < abstol,
        "Assertion failed: left ({}) and right ({}) differ by {} (allowed {})",
        left,
        right,
        abs_diff,
        abstol,
    );
}
