use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tolerance for scalar comparison; resource arithmetic on floats must not
/// let rounding noise fail a fits check.
const EPSILON: f64 = 1e-9;

pub type ResourceResult<T> = Result<T, ResourceError>;

#[derive(Debug, Error, PartialEq)]
pub enum ResourceError {
    #[error("resource '{0}' would go negative")]
    Underflow(String),
    #[error("resource '{0}' mixes scalar and range values")]
    KindMismatch(String),
    #[error("invalid resource specification: {0}")]
    InvalidSpec(String),
}

/// A closed integer interval, e.g. one span of a port range.
pub type Range = (u64, u64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Scalar(f64),
    Ranges(Vec<Range>),
}

/// A bundle of named quantities: scalars (`cpus`, `mem`) and range sets
/// (`ports`). Supports addition, checked subtraction, and containment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    items: BTreeMap<String, Value>,
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    /// A `cpus`/`mem` bundle, the common case.
    pub fn cpus_mem(cpus: f64, mem: f64) -> Self {
        Self::new().with_scalar("cpus", cpus).with_scalar("mem", mem)
    }

    pub fn with_scalar(mut self, name: &str, value: f64) -> Self {
        if value > EPSILON {
            self.items.insert(name.to_string(), Value::Scalar(value));
        }
        self
    }

    pub fn with_ranges(mut self, name: &str, ranges: Vec<Range>) -> Self {
        let ranges = normalize(ranges);
        if !ranges.is_empty() {
            self.items.insert(name.to_string(), Value::Ranges(ranges));
        }
        self
    }

    pub fn scalar(&self, name: &str) -> f64 {
        match self.items.get(name) {
            Some(Value::Scalar(value)) => *value,
            _ => 0.0,
        }
    }

    pub fn ranges(&self, name: &str) -> &[Range] {
        match self.items.get(name) {
            Some(Value::Ranges(ranges)) => ranges,
            _ => &[],
        }
    }

    pub fn cpus(&self) -> f64 {
        self.scalar("cpus")
    }

    pub fn mem(&self) -> f64 {
        self.scalar("mem")
    }

    pub fn is_empty(&self) -> bool {
        self.items.iter().all(|(_, value)| match value {
            Value::Scalar(scalar) => *scalar <= EPSILON,
            Value::Ranges(ranges) => ranges.is_empty(),
        })
    }

    /// Add two bundles. Scalars sum; ranges union.
    pub fn add(&self, other: &Resources) -> ResourceResult<Resources> {
        let mut out = self.clone();
        for (name, value) in &other.items {
            match (out.items.get_mut(name), value) {
                (None, value) => {
                    out.items.insert(name.clone(), value.clone());
                }
                (Some(Value::Scalar(mine)), Value::Scalar(theirs)) => {
                    *mine += theirs;
                }
                (Some(Value::Ranges(mine)), Value::Ranges(theirs)) => {
                    let mut merged = mine.clone();
                    merged.extend_from_slice(theirs);
                    *mine = normalize(merged);
                }
                _ => return Err(ResourceError::KindMismatch(name.clone())),
            }
        }
        Ok(out)
    }

    /// Subtract `other` from this bundle. Going negative on any scalar, or
    /// removing ranges that are not present, is an error.
    pub fn checked_sub(&self, other: &Resources) -> ResourceResult<Resources> {
        let mut out = self.clone();
        for (name, value) in &other.items {
            match (out.items.get_mut(name), value) {
                (None, Value::Scalar(theirs)) if *theirs <= EPSILON => {}
                (None, Value::Ranges(theirs)) if theirs.is_empty() => {}
                (None, _) => return Err(ResourceError::Underflow(name.clone())),
                (Some(Value::Scalar(mine)), Value::Scalar(theirs)) => {
                    let result = *mine - theirs;
                    if result < -EPSILON {
                        return Err(ResourceError::Underflow(name.clone()));
                    }
                    *mine = result.max(0.0);
                }
                (Some(Value::Ranges(mine)), Value::Ranges(theirs)) => {
                    *mine = subtract_ranges(mine, theirs)
                        .ok_or_else(|| ResourceError::Underflow(name.clone()))?;
                }
                _ => return Err(ResourceError::KindMismatch(name.clone())),
            }
        }
        Ok(out)
    }

    /// Whether every quantity in this bundle is available in `other`.
    pub fn fits_in(&self, other: &Resources) -> bool {
        self.items.iter().all(|(name, value)| match value {
            Value::Scalar(scalar) => *scalar <= other.scalar(name) + EPSILON,
            Value::Ranges(ranges) => ranges
                .iter()
                .all(|range| contains_range(other.ranges(name), *range)),
        })
    }

    /// Parse the CLI form, e.g. `cpus:2;mem:1024;ports:[31000-32000]`.
    pub fn parse(text: &str) -> ResourceResult<Resources> {
        let mut out = Resources::new();
        for part in text.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (name, value) = part
                .split_once(':')
                .ok_or_else(|| ResourceError::InvalidSpec(part.to_string()))?;
            let name = name.trim();
            let value = value.trim();
            if let Some(ranges) = value.strip_prefix('[').and_then(|v| v.strip_suffix(']')) {
                let ranges = ranges
                    .split(',')
                    .filter(|r| !r.trim().is_empty())
                    .map(parse_range)
                    .collect::<ResourceResult<Vec<_>>>()?;
                out = out.with_ranges(name, ranges);
            } else {
                let scalar = value
                    .parse::<f64>()
                    .map_err(|_| ResourceError::InvalidSpec(part.to_string()))?;
                out = out.with_scalar(name, scalar);
            }
        }
        Ok(out)
    }
}

fn parse_range(text: &str) -> ResourceResult<Range> {
    let text = text.trim();
    let (lo, hi) = text
        .split_once('-')
        .ok_or_else(|| ResourceError::InvalidSpec(text.to_string()))?;
    let lo = lo
        .trim()
        .parse::<u64>()
        .map_err(|_| ResourceError::InvalidSpec(text.to_string()))?;
    let hi = hi
        .trim()
        .parse::<u64>()
        .map_err(|_| ResourceError::InvalidSpec(text.to_string()))?;
    if lo > hi {
        return Err(ResourceError::InvalidSpec(text.to_string()));
    }
    Ok((lo, hi))
}

/// Sort and merge overlapping or adjacent ranges.
fn normalize(mut ranges: Vec<Range>) -> Vec<Range> {
    ranges.sort_unstable();
    let mut out: Vec<Range> = Vec::with_capacity(ranges.len());
    for (lo, hi) in ranges {
        match out.last_mut() {
            Some((_, last_hi)) if lo <= last_hi.saturating_add(1) => {
                *last_hi = (*last_hi).max(hi);
            }
            _ => out.push((lo, hi)),
        }
    }
    out
}

fn contains_range(ranges: &[Range], (lo, hi): Range) -> bool {
    ranges.iter().any(|&(a, b)| a <= lo && hi <= b)
}

/// Remove `taken` from `from`; `None` if `taken` is not fully present.
fn subtract_ranges(from: &[Range], taken: &[Range]) -> Option<Vec<Range>> {
    for &range in taken {
        if !contains_range(from, range) {
            return None;
        }
    }
    let mut out = from.to_vec();
    for &(lo, hi) in taken {
        let mut next = Vec::with_capacity(out.len() + 1);
        for (a, b) in out {
            if hi < a || b < lo {
                next.push((a, b));
                continue;
            }
            if a < lo {
                next.push((a, lo - 1));
            }
            if hi < b {
                next.push((hi + 1, b));
            }
        }
        out = next;
    }
    Some(out)
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in &self.items {
            if !first {
                write!(f, ";")?;
            }
            first = false;
            match value {
                Value::Scalar(scalar) => write!(f, "{name}:{scalar}")?,
                Value::Ranges(ranges) => {
                    write!(f, "{name}:[")?;
                    for (i, (lo, hi)) in ranges.iter().enumerate() {
                        if i > 0 {
                            write!(f, ",")?;
                        }
                        write!(f, "{lo}-{hi}")?;
                    }
                    write!(f, "]")?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let resources = Resources::parse("cpus:2;mem:1024;ports:[31000-32000]").unwrap();
        assert_eq!(resources.cpus(), 2.0);
        assert_eq!(resources.mem(), 1024.0);
        assert_eq!(resources.ranges("ports"), &[(31000, 32000)]);
        assert_eq!(
            resources.to_string(),
            "cpus:2;mem:1024;ports:[31000-32000]"
        );
        assert!(Resources::parse("cpus").is_err());
        assert!(Resources::parse("ports:[5-1]").is_err());
    }

    #[test]
    fn test_subtraction_underflow_is_an_error() {
        let total = Resources::cpus_mem(2.0, 1024.0);
        let used = Resources::cpus_mem(1.0, 512.0);
        let rest = total.checked_sub(&used).unwrap();
        assert_eq!(rest, Resources::cpus_mem(1.0, 512.0));
        assert_eq!(
            rest.checked_sub(&Resources::cpus_mem(2.0, 0.0)),
            Err(ResourceError::Underflow("cpus".to_string()))
        );
    }

    #[test]
    fn test_fits_in() {
        let offer = Resources::cpus_mem(1.0, 512.0);
        assert!(Resources::cpus_mem(1.0, 512.0).fits_in(&offer));
        assert!(Resources::cpus_mem(0.5, 128.0).fits_in(&offer));
        assert!(!Resources::cpus_mem(2.0, 128.0).fits_in(&offer));
    }

    #[test]
    fn test_add_restores_subtracted_resources() {
        let total = Resources::parse("cpus:4;mem:2048;ports:[31000-31009]").unwrap();
        let task = Resources::parse("cpus:1;mem:512;ports:[31002-31003]").unwrap();
        let rest = total.checked_sub(&task).unwrap();
        assert_eq!(rest.ranges("ports"), &[(31000, 31001), (31004, 31009)]);
        assert_eq!(rest.add(&task).unwrap(), total);
    }

    #[test]
    fn test_range_subtraction_requires_containment() {
        let have = Resources::new().with_ranges("ports", vec![(100, 200)]);
        let want = Resources::new().with_ranges("ports", vec![(150, 250)]);
        assert_eq!(
            have.checked_sub(&want),
            Err(ResourceError::Underflow("ports".to_string()))
        );
    }

    #[test]
    fn test_adjacent_ranges_merge() {
        let a = Resources::new().with_ranges("ports", vec![(100, 149)]);
        let b = Resources::new().with_ranges("ports", vec![(150, 200)]);
        assert_eq!(a.add(&b).unwrap().ranges("ports"), &[(100, 200)]);
    }
}
