//! The `mode#arg1[,arg2]` rule-string grammar.
//!
//! A malformed rule string never fails loudly: it parses to `None` and the
//! corresponding check simply applies no constraint.

use tracing::debug;

/// Bytes per GiB. Size rule arguments are GiB-denominated.
pub const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// A bounded range rule: `gt#a`, `lt#a` or `bw#a,b`.
///
/// The same grammar covers size bounds (GiB) and peer-count bounds, but the
/// two differ on edge inclusivity, so admission goes through either
/// [`RangeRule::admits_size`] or [`RangeRule::admits_count`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangeRule {
    Gt(f64),
    Lt(f64),
    Between(f64, f64),
}

impl RangeRule {
    /// Parse a `mode#arg1[,arg2]` rule string.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (mode, args) = raw.split_once('#')?;
        Self::from_parts(mode, args)
    }

    /// Parse a peer-count rule string, defaulting a bare number to `lt`
    /// (legacy rule format compatibility).
    pub fn parse_legacy(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match raw.split_once('#') {
            Some((mode, args)) => Self::from_parts(mode, args),
            None => Self::from_parts("lt", raw),
        }
    }

    fn from_parts(mode: &str, args: &str) -> Option<Self> {
        let mut bounds = args.split(',').map(str::trim);
        let lo: f64 = match bounds.next()?.parse() {
            Ok(v) => v,
            Err(_) => {
                debug!("Unparseable rule bound in '{}#{}', ignoring rule", mode, args);
                return None;
            }
        };
        match mode.trim() {
            "gt" => Some(Self::Gt(lo)),
            "lt" => Some(Self::Lt(lo)),
            "bw" => {
                let hi: f64 = match bounds.next().map(str::parse) {
                    Some(Ok(v)) => v,
                    _ => {
                        debug!("Range rule 'bw#{}' lacks an upper bound, ignoring rule", args);
                        return None;
                    }
                };
                Some(Self::Between(lo, hi))
            }
            other => {
                debug!("Unknown rule mode '{}', ignoring rule", other);
                None
            }
        }
    }

    /// Size semantics: `gt`/`lt` admit the bound itself, `bw` is strict.
    pub fn admits_size(&self, value: f64) -> bool {
        match *self {
            Self::Gt(lo) => value >= lo,
            Self::Lt(hi) => value <= hi,
            Self::Between(lo, hi) => lo < value && value < hi,
        }
    }

    /// Peer-count semantics: `gt`/`lt` exclude the bound, `bw` is inclusive.
    pub fn admits_count(&self, value: f64) -> bool {
        match *self {
            Self::Gt(lo) => value > lo,
            Self::Lt(hi) => value < hi,
            Self::Between(lo, hi) => lo <= value && value <= hi,
        }
    }

    /// Scale all bounds by a constant factor (e.g. GiB to bytes).
    pub fn scaled(self, factor: f64) -> Self {
        match self {
            Self::Gt(lo) => Self::Gt(lo * factor),
            Self::Lt(hi) => Self::Lt(hi * factor),
            Self::Between(lo, hi) => Self::Between(lo * factor, hi * factor),
        }
    }
}

/// Parse a single-bound eviction threshold: `mode#value`.
///
/// The mode token must be present but its spelling is not interpreted; the
/// comparison direction is fixed per criterion. An empty mode token disables
/// the rule.
pub fn parse_threshold(raw: &str) -> Option<f64> {
    let (mode, value) = raw.trim().split_once('#')?;
    if mode.trim().is_empty() {
        return None;
    }
    match value.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            debug!("Unparseable threshold value in '{}', ignoring rule", raw);
            None
        }
    }
}
