//! Weighted keyword scoring.

use crate::model::item::TimelineItem;
use crate::search::filter::SearchContext;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

// `\s` is Unicode-aware and covers the ideographic space (U+3000).
static KEYWORD_SPLIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("valid keyword split regex"));

pub const EXACT_TAG_WEIGHT: u32 = 100;
pub const EXACT_NAME_WEIGHT: u32 = 50;
pub const MESSAGE_PREFIX_WEIGHT: u32 = 30;
pub const SUBSTRING_WEIGHT: u32 = 10;
pub const STATUS_WEIGHT: u32 = 5;

/// Splits a raw query into normalized keywords.
///
/// Keywords are lowercased, lose leading `#`, and keep first-seen order
/// without duplicates.
pub fn parse_keywords(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    KEYWORD_SPLIT_RE
        .split(query.trim())
        .map(normalize_keyword)
        .filter(|token| !token.is_empty())
        .filter(|token| seen.insert(token.clone()))
        .collect()
}

fn normalize_keyword(token: &str) -> String {
    token.trim().trim_start_matches('#').to_lowercase()
}

/// Lowercased searchable fields of one item.
struct Fields {
    tags: Vec<String>,
    names: Vec<String>,
    message: String,
    statuses: Vec<String>,
}

impl Fields {
    fn of(item: &TimelineItem, ctx: &SearchContext<'_>) -> Self {
        let mut names = Vec::new();
        let person = match item {
            TimelineItem::Post(post) => Some(post.author_id.as_str()),
            TimelineItem::Alert(alert) => Some(alert.subject_id.as_str()),
            TimelineItem::MeetingSummary(_) => None,
        };
        if let Some(name) = person.and_then(|identity| ctx.names.get(identity)) {
            names.push(name.to_lowercase());
        }
        if let Some(name) = item
            .partition_id()
            .and_then(|partition| ctx.partition_names.get(partition))
        {
            names.push(name.to_lowercase());
        }

        match item {
            TimelineItem::Post(post) => Self {
                tags: post
                    .tags
                    .iter()
                    .map(|tag| tag.trim_start_matches('#').to_lowercase())
                    .collect(),
                names,
                message: post.message.to_lowercase(),
                statuses: post
                    .status_by_user
                    .values()
                    .map(|status| status.to_lowercase())
                    .collect(),
            },
            TimelineItem::MeetingSummary(summary) => Self {
                tags: Vec::new(),
                names,
                message: summary.title.to_lowercase(),
                statuses: Vec::new(),
            },
            TimelineItem::Alert(_) => Self {
                tags: Vec::new(),
                names,
                message: String::new(),
                statuses: Vec::new(),
            },
        }
    }

    fn keyword_score(&self, keyword: &str) -> u32 {
        let mut total = 0;
        if self.tags.iter().any(|tag| tag == keyword) {
            total += EXACT_TAG_WEIGHT;
        } else if self.tags.iter().any(|tag| tag.contains(keyword)) {
            total += SUBSTRING_WEIGHT;
        }
        for name in &self.names {
            if name == keyword {
                total += EXACT_NAME_WEIGHT;
            } else if name.contains(keyword) {
                total += SUBSTRING_WEIGHT;
            }
        }
        if self.message.starts_with(keyword) {
            total += MESSAGE_PREFIX_WEIGHT;
        } else if self.message.contains(keyword) {
            total += SUBSTRING_WEIGHT;
        }
        if self.statuses.iter().any(|status| status.contains(keyword)) {
            total += STATUS_WEIGHT;
        }
        total
    }
}

/// Scores `item` against `keywords`.
///
/// Keywords are normalized as by `parse_keywords`; blank ones are ignored.
/// Returns 0 unless every keyword matches at least one field.
pub fn score(item: &TimelineItem, keywords: &[String], ctx: &SearchContext<'_>) -> u32 {
    let keywords = keywords
        .iter()
        .map(|keyword| normalize_keyword(keyword))
        .filter(|keyword| !keyword.is_empty())
        .collect::<Vec<_>>();
    if keywords.is_empty() {
        return 0;
    }
    let fields = Fields::of(item, ctx);
    let mut total = 0u32;
    for keyword in &keywords {
        let partial = fields.keyword_score(keyword);
        if partial == 0 {
            return 0;
        }
        total = total.saturating_add(partial);
    }
    total
}

#[cfg(test)]
mod tests {
    use super::{parse_keywords, score};
    use crate::model::item::{Post, TimelineItem};
    use crate::search::filter::SearchContext;
    use std::collections::{BTreeMap, HashMap};

    fn post(tags: &[&str], message: &str) -> TimelineItem {
        TimelineItem::Post(Post {
            id: "p1".to_string(),
            author_id: "u1".to_string(),
            partition_id: "g1".to_string(),
            message: message.to_string(),
            tags: tags.iter().map(|tag| tag.to_string()).collect(),
            photo_refs: Vec::new(),
            status_by_user: BTreeMap::from([("u2".to_string(), "Resolved".to_string())]),
            read_by: BTreeMap::new(),
            memos: Vec::new(),
            timestamp_ms: Some(1),
        })
    }

    #[test]
    fn parse_keywords_normalizes_and_dedupes() {
        assert_eq!(
            parse_keywords("  #Safety\u{3000}check safety\tCHECK "),
            vec!["safety".to_string(), "check".to_string()]
        );
        assert!(parse_keywords(" # \u{3000} ").is_empty());
    }

    #[test]
    fn every_keyword_must_match() {
        let names = HashMap::new();
        let partitions = BTreeMap::new();
        let ctx = SearchContext::new(&names, &partitions, 0);
        let item = post(&["#safety"], "routine check");

        assert!(score(&item, &parse_keywords("safety check"), &ctx) > 0);
        assert_eq!(score(&item, &parse_keywords("safety missing"), &ctx), 0);
    }

    #[test]
    fn weights_follow_field_precedence() {
        let names = HashMap::from([("u1".to_string(), "Ken".to_string())]);
        let partitions = BTreeMap::from([("g1".to_string(), "Line A".to_string())]);
        let ctx = SearchContext::new(&names, &partitions, 0);
        let item = post(&["#safety"], "routine check");

        assert_eq!(score(&item, &parse_keywords("safety"), &ctx), 100);
        assert_eq!(score(&item, &parse_keywords("ken"), &ctx), 50);
        assert_eq!(score(&item, &parse_keywords("routine"), &ctx), 30);
        assert_eq!(score(&item, &parse_keywords("line"), &ctx), 10);
        assert_eq!(score(&item, &parse_keywords("resolved"), &ctx), 5);
    }

    #[test]
    fn raw_keywords_are_normalized_before_scoring() {
        let names = HashMap::new();
        let partitions = BTreeMap::new();
        let ctx = SearchContext::new(&names, &partitions, 0);
        let item = post(&["#safety"], "routine check");

        let raw = |keyword: &str| vec![keyword.to_string()];
        assert_eq!(score(&item, &raw("Safety"), &ctx), 100);
        assert_eq!(score(&item, &raw("#SAFETY"), &ctx), 100);
        assert_eq!(score(&item, &raw("#"), &ctx), 0);
    }
}
