//! Progress extraction from separator output.
//!
//! Demucs reports progress through a tqdm bar (`  45%|####      | 45/100`).
//! Only the number directly in front of the first `%` matters.

/// Highest value a progress line may report; completion is signalled separately.
pub const MAX_PROGRESS: u8 = 99;

/// Extract a progress percentage from one line of tool output.
///
/// Returns `None` for lines without a `%` marker or whose token before the
/// marker is not a finite number. Fractions truncate toward zero and the
/// result is clamped to `0..=99`.
pub fn parse_progress(line: &str) -> Option<u8> {
    let (before, _) = line.trim().split_once('%')?;
    let token = before.split_whitespace().last()?;
    let value = token.parse::<f64>().ok().filter(|v| v.is_finite())?;
    let value = value.trunc().clamp(0.0, f64::from(MAX_PROGRESS));
    Some(value as u8)
}
