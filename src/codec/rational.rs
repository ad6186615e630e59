use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

/// Exact ratio for frame rates and time bases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    pub fn is_valid(self) -> bool {
        self.num > 0 && self.den > 0
    }

    pub fn inverse(self) -> Self {
        Self::new(self.den, self.num)
    }

    pub fn as_f64(self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl FromStr for Rational {
    type Err = anyhow::Error;

    /// Accepts "30", "30000/1001" or "30:1"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (num, den) = match s.split_once(|c| c == '/' || c == ':') {
            Some((num, den)) => (num.trim(), den.trim()),
            None => (s, "1"),
        };
        let num: i32 = num
            .parse()
            .with_context(|| format!("Invalid rational numerator in '{}'", s))?;
        let den: i32 = den
            .parse()
            .with_context(|| format!("Invalid rational denominator in '{}'", s))?;
        let value = Rational::new(num, den);
        if !value.is_valid() {
            bail!("Rational '{}' must be positive", s);
        }
        Ok(value)
    }
}

/// Presentation timestamp of frame `index` at `fps`, in `time_base` units.
///
/// index / fps seconds == index * fps.den * tb.den / (fps.num * tb.num) ticks,
/// computed in 128-bit so non-integer rates like 30000/1001 stay exact.
pub fn frame_pts(index: i64, fps: Rational, time_base: Rational) -> i64 {
    let numerator = index as i128 * fps.den as i128 * time_base.den as i128;
    let denominator = fps.num as i128 * time_base.num as i128;
    if denominator == 0 {
        return index;
    }
    (numerator / denominator) as i64
}
