//! 标识快照：库所 -> 颜色 -> 令牌数，作为状态图中的不可变键使用。
use std::collections::BTreeMap;
use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::net::structure::{Count, DEFAULT_COLOR};

/// An immutable marking.
///
/// Every place of the net it was taken from is present, colors with a
/// zero count are not stored, so two markings compare equal exactly
/// when every place holds the same tokens.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State {
    places: BTreeMap<String, BTreeMap<String, Count>>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_places<P, C, I>(places: I) -> Self
    where
        P: Into<String>,
        C: IntoIterator<Item = (String, Count)>,
        I: IntoIterator<Item = (P, C)>,
    {
        let mut state = State::new();
        for (place, colors) in places {
            let entry = state.places.entry(place.into()).or_default();
            for (color, count) in colors {
                if !count.is_zero() {
                    entry.insert(color, count);
                }
            }
        }
        state
    }

    /// Copy of this marking with one count replaced.
    pub fn with_tokens(&self, place: &str, color: &str, count: impl Into<Count>) -> State {
        let mut next = self.clone();
        next.put(place, color, count.into());
        next
    }

    pub(crate) fn put(&mut self, place: &str, color: &str, count: Count) {
        let entry = self.places.entry(place.to_string()).or_default();
        if count.is_zero() {
            entry.remove(color);
        } else {
            entry.insert(color.to_string(), count);
        }
    }

    pub fn contains_place(&self, place: &str) -> bool {
        self.places.contains_key(place)
    }

    pub fn tokens(&self, place: &str, color: &str) -> Count {
        self.places
            .get(place)
            .and_then(|colors| colors.get(color))
            .copied()
            .unwrap_or_default()
    }

    /// Tokens of every color; infinite as soon as one color is.
    pub fn total(&self, place: &str) -> Count {
        self.places
            .get(place)
            .map(|colors| colors.values().fold(Count::ZERO, |acc, count| acc.add(*count)))
            .unwrap_or_default()
    }

    pub fn places(&self) -> impl Iterator<Item = &str> {
        self.places.keys().map(String::as_str)
    }

    pub fn colors(&self, place: &str) -> impl Iterator<Item = (&str, Count)> {
        self.places
            .get(place)
            .into_iter()
            .flat_map(|colors| colors.iter().map(|(color, count)| (color.as_str(), *count)))
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = self
            .places
            .iter()
            .map(|(place, colors)| {
                let only_default = colors.keys().all(|color| color == DEFAULT_COLOR);
                if only_default {
                    format!("{place}: {}", self.tokens(place, DEFAULT_COLOR))
                } else {
                    let inner = colors.iter().map(|(color, count)| format!("{color}: {count}")).join(", ");
                    format!("{place}: {{{inner}}}")
                }
            })
            .join(", ");
        write!(f, "{{{body}}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_counts_do_not_affect_equality() {
        let a = State::new().with_tokens("P0", DEFAULT_COLOR, 1u64).with_tokens("P1", DEFAULT_COLOR, 0u64);
        let b = State::from_places([
            ("P0", vec![(DEFAULT_COLOR.to_string(), Count::from(1))]),
            ("P1", vec![(DEFAULT_COLOR.to_string(), Count::ZERO)]),
        ]);
        assert_eq!(a, b);
        assert!(a.contains_place("P1"));
        assert_eq!(a.to_string(), "{P0: 1, P1: 0}");
    }

    #[test]
    fn total_sums_colors() {
        let state = State::new()
            .with_tokens("P0", "Red", 2u64)
            .with_tokens("P0", DEFAULT_COLOR, 3u64);
        assert_eq!(state.total("P0"), Count::from(5));
        assert_eq!(state.with_tokens("P0", "Red", Count::INFINITE).total("P0"), Count::INFINITE);
        assert_eq!(state.to_string(), "{P0: {Default: 3, Red: 2}}");
    }
}
