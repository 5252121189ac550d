use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Parse an inclusive port range.
///
/// Supported forms:
/// - single port number: `80`
/// - inclusive range: `8000-8010`
/// - surrounding whitespace is ignored, also around the dash
pub fn parse_range(s: &str) -> Result<(u16, u16), ValidationError> {
    let s = s.trim();
    let (start, end) = match s.split_once('-') {
        Some((a, b)) => (parse_port_str(a.trim())?, parse_port_str(b.trim())?),
        None => {
            let p = parse_port_str(s)?;
            (p, p)
        }
    };
    if start > end {
        return Err(ValidationError::InvertedRange { start, end });
    }
    Ok((start, end))
}

fn parse_port_str(s: &str) -> Result<u16, ValidationError> {
    let val: u32 = s
        .parse::<u32>()
        .map_err(|_| ValidationError::InvalidPort(s.to_string()))?;
    if val == 0 || val > 65535 {
        return Err(ValidationError::PortOutOfRange(val));
    }
    Ok(val as u16)
}

/// Named port ranges offered next to the manual start/end fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// 1-1024
    Common,
    /// 1-100
    Top100,
    /// 1-65535
    Full,
}

impl Preset {
    pub fn range(&self) -> (u16, u16) {
        match self {
            Preset::Common => (1, 1024),
            Preset::Top100 => (1, 100),
            Preset::Full => (1, 65535),
        }
    }
}

impl FromStr for Preset {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "common" => Ok(Preset::Common),
            "top100" | "top-100" => Ok(Preset::Top100),
            "full" | "all" => Ok(Preset::Full),
            other => Err(ValidationError::UnknownPreset(other.to_string())),
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (a, b) = self.range();
        let name = match self {
            Preset::Common => "common",
            Preset::Top100 => "top100",
            Preset::Full => "full",
        };
        write!(f, "{name} ({a}-{b})")
    }
}
