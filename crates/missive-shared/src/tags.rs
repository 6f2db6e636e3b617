//! Tag and reference extraction from message text.
//!
//! A message may carry at most one workflow tag, written inline as
//! `@keyword` with an optional `[key:value, ...]` annotation.  Only the
//! first occurrence in the text is honored; later occurrences are ignored.
//! Extraction never fails: text without a tag yields an empty result.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::types::MessageId;

/// The closed set of workflow tags.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Tag {
    Task,
    Decision,
    Deadline,
    Defer,
    Confirm,
    Wait,
    Done,
    Fail,
    Abort,
    Retry,
}

impl Tag {
    pub const ALL: [Tag; 10] = [
        Tag::Task,
        Tag::Decision,
        Tag::Deadline,
        Tag::Defer,
        Tag::Confirm,
        Tag::Wait,
        Tag::Done,
        Tag::Fail,
        Tag::Abort,
        Tag::Retry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::Task => "task",
            Tag::Decision => "decision",
            Tag::Deadline => "deadline",
            Tag::Defer => "defer",
            Tag::Confirm => "confirm",
            Tag::Wait => "wait",
            Tag::Done => "done",
            Tag::Fail => "fail",
            Tag::Abort => "abort",
            Tag::Retry => "retry",
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown tag: {0}")]
pub struct UnknownTag(pub String);

impl std::str::FromStr for Tag {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tag::ALL
            .into_iter()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| UnknownTag(s.to_string()))
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Narrowing applied when listing tagged messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagFilter {
    All,
    Only(Tag),
}

impl TagFilter {
    pub fn matches(&self, tag: Tag) -> bool {
        match self {
            TagFilter::All => true,
            TagFilter::Only(wanted) => *wanted == tag,
        }
    }
}

impl std::str::FromStr for TagFilter {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "all" {
            Ok(TagFilter::All)
        } else {
            s.parse().map(TagFilter::Only)
        }
    }
}

/// Insertion-ordered string-to-string mapping.
///
/// Re-inserting an existing key replaces the value but keeps the key's
/// original position, matching the annotation syntax's left-to-right
/// reading.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Metadata(Vec<(String, String)>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Result of running the extractor over message text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub tag: Option<Tag>,
    pub metadata: Metadata,
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"@(task|decision|deadline|defer|confirm|wait|done|fail|abort|retry)(?:\s*\[([^\]]*)\])?",
        )
        .expect("tag pattern is valid")
    })
}

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)(?:ref:|#)([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})",
        )
        .expect("reference pattern is valid")
    })
}

/// Classify message text.
///
/// The first recognized `@tag` wins; its optional bracket annotation is
/// split into comma-separated `key:value` pairs (split on the first colon,
/// both sides trimmed, pairs missing a key or value dropped).  Two
/// synthetic entries, `tag` and `timestamp`, are always appended when a
/// tag is found.  `now` is taken as an argument so the function stays pure.
pub fn extract(text: &str, now: DateTime<Utc>) -> Extraction {
    let Some(caps) = tag_pattern().captures(text) else {
        return Extraction::default();
    };

    let Ok(tag) = caps[1].parse::<Tag>() else {
        // The pattern only matches keywords from the closed set.
        return Extraction::default();
    };

    let mut metadata = Metadata::new();
    if let Some(annotation) = caps.get(2) {
        for pair in annotation.as_str().split(',') {
            let Some((key, value)) = pair.split_once(':') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() || value.is_empty() {
                continue;
            }
            metadata.insert(key, value);
        }
    }

    metadata.insert("tag", tag.as_str());
    metadata.insert("timestamp", now.to_rfc3339());

    Extraction {
        tag: Some(tag),
        metadata,
    }
}

/// Remove the first tag token (keyword plus bracket annotation) for display.
///
/// Text without a tag is returned unchanged.
pub fn strip_tag_token(text: &str) -> String {
    match tag_pattern().find(text) {
        Some(m) => {
            let mut stripped = String::with_capacity(text.len() - m.len());
            stripped.push_str(&text[..m.start()]);
            stripped.push_str(&text[m.end()..]);
            stripped.trim().to_string()
        }
        None => text.to_string(),
    }
}

/// Resolve the message a text refers to.
///
/// An explicit reply always wins; otherwise the first inline `ref:<id>` or
/// `#<id>` reference is used, where `<id>` has the store's identifier
/// shape.  Absent both, there is no linked message.
pub fn extract_linked(text: &str, reply_to: Option<MessageId>) -> Option<MessageId> {
    if reply_to.is_some() {
        return reply_to;
    }
    let caps = reference_pattern().captures(text)?;
    Uuid::parse_str(&caps[1]).ok().map(MessageId)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        "2024-03-01T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn extracts_tag_with_annotation() {
        let result = extract("@task[assignee:bob] ship it", now());
        assert_eq!(result.tag, Some(Tag::Task));
        assert_eq!(result.metadata.get("assignee"), Some("bob"));
        assert_eq!(result.metadata.get("tag"), Some("task"));
        assert!(result.metadata.contains_key("timestamp"));
    }

    #[test]
    fn no_tag_yields_empty_extraction() {
        let result = extract("just a plain message", now());
        assert_eq!(result.tag, None);
        assert!(result.metadata.is_empty());
    }

    #[test]
    fn first_tag_wins() {
        let result = extract("@task do this @decision or that", now());
        assert_eq!(result.tag, Some(Tag::Task));
        // The second tag leaves no trace anywhere.
        assert_eq!(result.metadata.get("tag"), Some("task"));
    }

    #[test]
    fn malformed_pairs_are_dropped() {
        let result = extract("@deadline[date:2024-01-01, nonsense, :orphan, empty:]", now());
        assert_eq!(result.metadata.get("date"), Some("2024-01-01"));
        // date + tag + timestamp, nothing else survived.
        assert_eq!(result.metadata.len(), 3);
    }

    #[test]
    fn annotation_splits_on_first_colon() {
        let result = extract("@wait[until:2024-01-01T09:00]", now());
        assert_eq!(result.metadata.get("until"), Some("2024-01-01T09:00"));
    }

    #[test]
    fn duplicate_keys_keep_first_position() {
        let result = extract("@task[a:1, b:2, a:3]", now());
        let keys: Vec<&str> = result.metadata.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["a", "b", "tag", "timestamp"]);
        assert_eq!(result.metadata.get("a"), Some("3"));
    }

    #[test]
    fn extraction_is_idempotent() {
        let text = "@confirm[by:alice] looks good";
        assert_eq!(extract(text, now()), extract(text, now()));
    }

    #[test]
    fn strips_tag_token_for_display() {
        assert_eq!(strip_tag_token("@task[assignee:bob] ship it"), "ship it");
        assert_eq!(strip_tag_token("@done finished"), "finished");
        assert_eq!(strip_tag_token("no tag here"), "no tag here");
    }

    #[test]
    fn reply_takes_precedence_over_inline_reference() {
        let reply = MessageId::new();
        let other = MessageId::new();
        let text = format!("see ref:{other}");
        assert_eq!(extract_linked(&text, Some(reply)), Some(reply));
    }

    #[test]
    fn inline_reference_patterns() {
        let id = MessageId::new();
        assert_eq!(extract_linked(&format!("see ref:{id}"), None), Some(id));
        assert_eq!(extract_linked(&format!("see #{id}"), None), Some(id));
        assert_eq!(extract_linked("see nothing", None), None);
    }

    #[test]
    fn tag_filter_parses() {
        assert_eq!("all".parse::<TagFilter>().unwrap(), TagFilter::All);
        assert_eq!(
            "deadline".parse::<TagFilter>().unwrap(),
            TagFilter::Only(Tag::Deadline)
        );
        assert!("bogus".parse::<TagFilter>().is_err());
    }
}
