use serde::{Deserialize, Serialize};

use crate::error::{ProfileError, Result};
use crate::raw_profile::{RawProfile, ALT_COL};

/// Part of a flight a profile is built from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Leg {
    #[default]
    Ascent,
    Descent,
    Full,
}

impl Leg {
    pub fn as_str(&self) -> &'static str {
        match self {
            Leg::Ascent => "ascent",
            Leg::Descent => "descent",
            Leg::Full => "full",
        }
    }
}

/// Row index of the highest altitude sample. The first of equal maxima wins.
pub fn peak_index(altitudes: &[Option<f64>]) -> Option<usize> {
    altitudes
        .iter()
        .enumerate()
        .filter_map(|(idx, alt)| alt.filter(|value| value.is_finite()).map(|value| (idx, value)))
        .fold(None, |best: Option<(usize, f64)>, (idx, value)| match best {
            Some((_, best_value)) if best_value >= value => best,
            _ => Some((idx, value)),
        })
        .map(|(idx, _)| idx)
}

/// Rows of `raw` belonging to `leg`. The peak sample belongs to both legs.
pub fn select_leg(raw: &RawProfile, leg: Leg) -> Result<RawProfile> {
    if leg == Leg::Full {
        return Ok(raw.clone());
    }
    let altitudes = raw.values(ALT_COL)?;
    let peak = peak_index(&altitudes).ok_or(ProfileError::EmptyProfile)?;
    Ok(match leg {
        Leg::Ascent => raw.slice(0, peak + 1),
        Leg::Descent => raw.slice(peak, raw.len() - peak),
        Leg::Full => raw.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_skips_missing_altitudes() {
        let altitudes = [Some(1.0), None, Some(120.0), Some(120.0), Some(40.0)];
        assert_eq!(peak_index(&altitudes), Some(2));
        assert_eq!(peak_index(&[None, None]), None);
    }
}
