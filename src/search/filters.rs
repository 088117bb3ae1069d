//! Post-retrieval metadata filters.
//!
//! Filters only ever remove candidates from the retrieved top-K set; they
//! never pull in documents the similarity search did not return.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::types::SearchHit;

/// Inclusive publication-year window.
///
/// Papers without a year always pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    pub start: i32,
    pub end: i32,
}

impl YearRange {
    pub fn new(start: i32, end: i32) -> Self {
        Self { start, end }
    }

    pub fn is_inverted(&self) -> bool {
        self.start > self.end
    }

    pub fn matches(&self, year: Option<i32>) -> bool {
        match year {
            None => true,
            Some(y) => self.start <= y && y <= self.end,
        }
    }
}

impl fmt::Display for YearRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

impl FromStr for YearRange {
    type Err = String;

    /// Parses `START..END`, `START-END` or a single `YEAR`. Years may be negative.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parse = |part: &str| {
            part.trim()
                .parse::<i32>()
                .map_err(|_| format!("invalid year '{}' in range '{s}'", part.trim()))
        };
        let (start, end) = match s.split_once("..").or_else(|| split_on_dash(s)) {
            Some((a, b)) => (parse(a)?, parse(b)?),
            None => {
                let y = parse(s)?;
                (y, y)
            }
        };
        Ok(Self { start, end })
    }
}

/// Split at the first `-` that follows a digit, so a leading sign stays with its year.
fn split_on_dash(s: &str) -> Option<(&str, &str)> {
    s.char_indices()
        .skip(1)
        .find(|&(i, c)| c == '-' && s[..i].trim_end().ends_with(|p: char| p.is_ascii_digit()))
        .map(|(i, _)| (&s[..i], &s[i + 1..]))
}

/// Conjunction of case-insensitive substring tests over title + abstract.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordFilter {
    keywords: Vec<String>,
}

impl KeywordFilter {
    /// Trims and lowercases each keyword and drops the blank ones.
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keywords }
    }

    /// Split a comma-separated list.
    pub fn parse_list(list: &str) -> Self {
        Self::new(list.split(','))
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    pub fn matches_text(&self, haystack_lower: &str) -> bool {
        self.keywords.iter().all(|k| haystack_lower.contains(k.as_str()))
    }

    pub fn matches(&self, hit: &SearchHit) -> bool {
        self.is_empty() || self.matches_text(&hit.keyword_haystack())
    }
}

/// Apply the year window to retrieved hits, keeping order.
pub fn apply_year_filter(hits: Vec<SearchHit>, range: Option<&YearRange>) -> Vec<SearchHit> {
    match range {
        Some(range) => hits.into_iter().filter(|h| range.matches(h.year)).collect(),
        None => hits,
    }
}

/// Apply the keyword filter to retrieved hits, keeping order.
pub fn apply_keyword_filter(hits: Vec<SearchHit>, filter: &KeywordFilter) -> Vec<SearchHit> {
    if filter.is_empty() {
        return hits;
    }
    hits.into_iter().filter(|h| filter.matches(h)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::Paper;

    fn hit(title: &str, abs: &str, year: Option<i32>) -> SearchHit {
        let mut paper = Paper::new(0, title, abs);
        paper.year = year;
        SearchHit::from_paper(&paper, 0, 0.5)
    }

    #[test]
    fn missing_year_always_passes() {
        let range = YearRange::new(2020, 2025);
        assert!(range.matches(None));
        assert!(range.matches(Some(2020)));
        assert!(range.matches(Some(2025)));
        assert!(!range.matches(Some(2018)));
        assert!(!range.matches(Some(2026)));
    }

    #[test]
    fn year_range_parses_common_forms() {
        assert_eq!("2020..2025".parse::<YearRange>().unwrap(), YearRange::new(2020, 2025));
        assert_eq!("2019-2021".parse::<YearRange>().unwrap(), YearRange::new(2019, 2021));
        assert_eq!(" 2022 ".parse::<YearRange>().unwrap(), YearRange::new(2022, 2022));
        assert!("twenty..2020".parse::<YearRange>().is_err());
        assert!("2025..2020".parse::<YearRange>().unwrap().is_inverted());
    }

    #[test]
    fn year_range_accepts_negative_years() {
        assert_eq!("-5..10".parse::<YearRange>().unwrap(), YearRange::new(-5, 10));
        assert_eq!("-300".parse::<YearRange>().unwrap(), YearRange::new(-300, -300));
        assert_eq!("-300--200".parse::<YearRange>().unwrap(), YearRange::new(-300, -200));
        assert_eq!("-44 - 14".parse::<YearRange>().unwrap(), YearRange::new(-44, 14));
        assert!("-".parse::<YearRange>().is_err());
        assert!("2019-".parse::<YearRange>().is_err());
    }

    #[test]
    fn keywords_are_normalized() {
        let f = KeywordFilter::new(["  Transformer ", "", "NLP", "   "]);
        assert_eq!(f.keywords(), &["transformer".to_string(), "nlp".to_string()]);
        assert!(KeywordFilter::parse_list(" , ,").is_empty());
    }

    #[test]
    fn keyword_filter_is_and_of_substrings() {
        let h = hit("Transformers for NLP", "Self-attention everywhere.", None);
        assert!(KeywordFilter::new(["transformer", "nlp"]).matches(&h));
        assert!(!KeywordFilter::new(["transformer", "vision"]).matches(&h));
        assert!(KeywordFilter::new(["ATTENTION"]).matches(&h));
    }

    #[test]
    fn filters_preserve_order() {
        let hits = vec![
            hit("a transformer", "", Some(2018)),
            hit("b transformer", "", Some(2021)),
            hit("c", "", None),
            hit("d transformer", "", Some(2023)),
        ];
        let by_year = apply_year_filter(hits, Some(&YearRange::new(2020, 2025)));
        let titles: Vec<_> = by_year.iter().map(|h| h.title.as_str()).collect();
        assert_eq!(titles, vec!["b transformer", "c", "d transformer"]);

        let by_kw = apply_keyword_filter(by_year, &KeywordFilter::new(["transformer"]));
        let titles: Vec<_> = by_kw.iter().map(|h| h.title.as_str()).collect();
        assert_eq!(titles, vec!["b transformer", "d transformer"]);
    }
}
