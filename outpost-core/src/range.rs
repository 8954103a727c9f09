//! Compact sets of positive record ids.
//!
//! The textual form is a comma-separated list of inclusive ranges, e.g.
//! `1-5,9,20-30`. Internally the set is a sorted list of disjoint,
//! non-adjacent `(low, high)` pairs, so iteration is strictly ascending and
//! no id is ever stored twice.

use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeSet {
    ranges: Vec<(u64, u64)>,
}

impl RangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The inclusive range `[low, high]`; empty when `low > high`.
    pub fn from_range(low: u64, high: u64) -> Self {
        let mut set = Self::new();
        if low <= high {
            set.ranges.push((low, high));
        }
        set
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of ids in the set, saturating at `u64::MAX`.
    pub fn len(&self) -> u64 {
        self.ranges
            .iter()
            .fold(0u64, |acc, (lo, hi)| acc.saturating_add((hi - lo).saturating_add(1)))
    }

    pub fn min(&self) -> Option<u64> {
        self.ranges.first().map(|(lo, _)| *lo)
    }

    pub fn max(&self) -> Option<u64> {
        self.ranges.last().map(|(_, hi)| *hi)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.ranges
            .binary_search_by(|(lo, hi)| {
                if id < *lo {
                    std::cmp::Ordering::Greater
                } else if id > *hi {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .is_ok()
    }

    /// The disjoint inclusive ranges, ascending.
    pub fn ranges(&self) -> &[(u64, u64)] {
        &self.ranges
    }

    pub fn insert(&mut self, id: u64) {
        self.insert_range(id, id);
    }

    /// Add `[low, high]`, merging with overlapping or adjacent ranges.
    pub fn insert_range(&mut self, low: u64, high: u64) {
        if low > high {
            return;
        }
        let mut merged = Vec::with_capacity(self.ranges.len() + 1);
        let (mut lo, mut hi) = (low, high);
        let mut placed = false;
        for &(a, b) in &self.ranges {
            if b.saturating_add(1) < lo {
                merged.push((a, b));
            } else if hi.saturating_add(1) < a {
                if !placed {
                    merged.push((lo, hi));
                    placed = true;
                }
                merged.push((a, b));
            } else {
                lo = lo.min(a);
                hi = hi.max(b);
            }
        }
        if !placed {
            merged.push((lo, hi));
        }
        self.ranges = merged;
    }

    /// Ids contained in `other` but not in `self`, ascending.
    ///
    /// With `self` being what the server knows and `other` the local range,
    /// this is exactly what the server is missing.
    pub fn difference_from(&self, other: &RangeSet) -> RangeSet {
        let mut out = RangeSet::new();
        let mut mine = self.ranges.iter().peekable();
        for &(lo, hi) in &other.ranges {
            let mut cursor = lo;
            while cursor <= hi {
                // Skip our ranges that end before the cursor.
                while matches!(mine.peek(), Some(&&(_, b)) if b < cursor) {
                    mine.next();
                }
                match mine.peek() {
                    Some(&&(a, b)) if a <= cursor => {
                        // Cursor is covered; jump past the covering range.
                        match b.checked_add(1) {
                            Some(next) => cursor = next,
                            None => break,
                        }
                    }
                    Some(&&(a, _)) if a <= hi => {
                        out.ranges.push((cursor, a - 1));
                        cursor = a;
                    }
                    _ => {
                        out.ranges.push((cursor, hi));
                        break;
                    }
                }
            }
        }
        out
    }

    /// Ascending iteration over every id in the set.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.ranges.iter().flat_map(|&(lo, hi)| lo..=hi)
    }
}

impl FromStr for RangeSet {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = RangeSet::new();
        let input = s.trim();
        if input.is_empty() {
            return Ok(set);
        }
        for element in input.split(',') {
            let element = element.trim();
            let (low, high) = match element.split_once('-') {
                Some((a, b)) => (parse_id(s, a)?, parse_id(s, b)?),
                None => {
                    let id = parse_id(s, element)?;
                    (id, id)
                }
            };
            if low > high {
                return Err(ParseError::range(s, format!("descending range '{element}'")));
            }
            set.insert_range(low, high);
        }
        Ok(set)
    }
}

fn parse_id(input: &str, part: &str) -> Result<u64, ParseError> {
    let id: u64 = part
        .trim()
        .parse()
        .map_err(|_| ParseError::range(input, format!("'{part}' is not an id")))?;
    if id == 0 {
        return Err(ParseError::range(input, "ids start at 1"));
    }
    Ok(id)
}

impl fmt::Display for RangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, (lo, hi)) in self.ranges.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            if lo == hi {
                write!(f, "{lo}")?;
            } else {
                write!(f, "{lo}-{hi}")?;
            }
        }
        Ok(())
    }
}

impl FromIterator<u64> for RangeSet {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        let mut set = RangeSet::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", "")]
    #[case("7", "7")]
    #[case("1-5,9,20-30", "1-5,9,20-30")]
    #[case("9,1-5", "1-5,9")]
    #[case("1-3,4-6", "1-6")]
    #[case("1-10,3-4", "1-10")]
    #[case(" 2 , 3 ", "2-3")]
    fn parse_normalizes(#[case] input: &str, #[case] expected: &str) {
        let set: RangeSet = input.parse().expect("parse");
        assert_eq!(set.to_string(), expected);
    }

    #[rstest]
    #[case("0")]
    #[case("5-3")]
    #[case("a-b")]
    #[case("1,,2")]
    #[case("-4")]
    fn parse_rejects_malformed(#[case] input: &str) {
        assert!(input.parse::<RangeSet>().is_err(), "'{input}' must not parse");
    }

    #[test]
    fn iteration_is_ascending_without_duplicates() {
        let set: RangeSet = "4-6,1,5,2".parse().unwrap();
        let ids: Vec<u64> = set.iter().collect();
        assert_eq!(ids, vec![1, 2, 4, 5, 6]);
        assert_eq!(set.len(), 5);
        assert_eq!(set.min(), Some(1));
        assert_eq!(set.max(), Some(6));
    }

    #[test]
    fn len_saturates_for_huge_sets() {
        let set: RangeSet = "1-5,10-18446744073709551615".parse().unwrap();
        assert_eq!(set.len(), u64::MAX);
        assert_eq!(RangeSet::from_range(1, u64::MAX).len(), u64::MAX);
    }

    #[test]
    fn server_gaps_are_reported_as_missing() {
        let server: RangeSet = "1-30,40-45".parse().unwrap();
        let local = RangeSet::from_range(1, 50);
        let missing = server.difference_from(&local);
        assert_eq!(missing.to_string(), "31-39,46-50");
        assert_eq!(missing.len(), 14);
    }

    #[test]
    fn difference_with_empty_server_is_everything() {
        let missing = RangeSet::new().difference_from(&RangeSet::from_range(1, 3));
        assert_eq!(missing.to_string(), "1-3");
    }

    #[test]
    fn difference_when_server_caught_up_is_empty() {
        let server: RangeSet = "1-50".parse().unwrap();
        assert!(server.difference_from(&RangeSet::from_range(1, 50)).is_empty());
    }

    #[test]
    fn difference_ignores_server_ids_beyond_local() {
        let server: RangeSet = "2,60-70".parse().unwrap();
        let missing = server.difference_from(&RangeSet::from_range(1, 5));
        assert_eq!(missing.to_string(), "1,3-5");
    }

    #[test]
    fn difference_matches_naive_set_difference() {
        let server: RangeSet = "3-4,8,10-12,15".parse().unwrap();
        let local: RangeSet = "1-9,11-16".parse().unwrap();
        let naive: Vec<u64> = local.iter().filter(|id| !server.contains(*id)).collect();
        let fast: Vec<u64> = server.difference_from(&local).iter().collect();
        assert_eq!(fast, naive);
    }

    #[test]
    fn contains_checks_range_bounds() {
        let set: RangeSet = "1-5,9".parse().unwrap();
        assert!(set.contains(1) && set.contains(5) && set.contains(9));
        assert!(!set.contains(6) && !set.contains(10));
    }

    #[test]
    fn from_range_with_inverted_bounds_is_empty() {
        assert!(RangeSet::from_range(5, 4).is_empty());
    }
}
