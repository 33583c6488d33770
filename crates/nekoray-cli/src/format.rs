//! Human-readable rendering helpers.

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Renders a byte count with binary prefixes and two decimals.
///
/// Works in hundredths of a unit so the rounding stays exact for every
/// `u64` input.
pub(crate) fn format_bytes(bytes: u64) -> String {
    let bytes = u128::from(bytes);
    let mut unit = 0;
    while unit + 1 < UNITS.len() && bytes >> (10 * (unit + 1)) > 0 {
        unit += 1;
    }
    let shift = 10 * unit;
    let half = (1_u128 << shift) >> 1;
    let hundredths = (bytes * 100 + half) >> shift;
    let label = UNITS.get(unit).copied().unwrap_or("B");
    format!(
        "{}.{:02} {label}",
        hundredths.div_euclid(100),
        hundredths.rem_euclid(100)
    )
}
