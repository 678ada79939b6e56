use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::CoreError;

/// The fixed note/folder palette. Index 0 doubles as the last-resort fallback.
pub const PALETTE: [&str; 17] = [
    "#FF3B30", "#FF6B4E", "#FF9500", "#FFCC00", "#D4E157", "#34C759", "#00C7BE", "#32ADE6",
    "#007AFF", "#5856D6", "#AF52DE", "#FF2D55", "#B0B0B8", "#555560", "#8B1A2E", "#6B7A1E",
    "#0D2B6B",
];

/// An upper-case `#RRGGBB` color.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Color(String);

impl Color {
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let c = raw.trim().to_ascii_uppercase();
        let valid = c.len() == 7
            && c.starts_with('#')
            && c[1..].chars().all(|ch| ch.is_ascii_hexdigit());
        if !valid {
            return Err(CoreError::InvalidColor(raw.to_string()));
        }
        Ok(Self(c))
    }

    pub fn palette(index: usize) -> Self {
        Self(PALETTE[index % PALETTE.len()].to_string())
    }

    pub fn fallback() -> Self {
        Self::palette(0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn in_palette(&self) -> bool {
        PALETTE.contains(&self.0.as_str())
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::fallback()
    }
}

impl fmt::Debug for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Color({})", self.0)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Color::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Pick the palette color used least often among `used`. Ties go to the
/// earliest palette entry.
pub fn least_used<'a>(used: impl IntoIterator<Item = &'a Color>) -> Color {
    let mut counts: HashMap<&str, usize> = PALETTE.iter().map(|c| (*c, 0)).collect();
    for color in used {
        if let Some(n) = counts.get_mut(color.as_str()) {
            *n += 1;
        }
    }
    let mut best = PALETTE[0];
    for candidate in PALETTE {
        if counts[candidate] < counts[best] {
            best = candidate;
        }
    }
    Color(best.to_string())
}

/// Palette entries not present in `recent`. Falls back to the whole palette
/// when every entry was used recently.
pub fn fresh_choices(recent: &[Color]) -> Vec<Color> {
    let available: Vec<Color> = PALETTE
        .iter()
        .filter(|c| !recent.iter().any(|r| r.as_str() == **c))
        .map(|c| Color(c.to_string()))
        .collect();
    if available.is_empty() {
        PALETTE.iter().map(|c| Color(c.to_string())).collect()
    } else {
        available
    }
}
