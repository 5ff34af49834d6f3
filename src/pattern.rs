//! Reply classification tables.
//!
//! A [`PatternTable`] maps `(response type, last probe input)` to the reply
//! prefixes the bot is allowed to answer with. Each platform ships one table;
//! config can replace individual entries.
//!
//! ## Matching
//!
//! Entries are tried in table order and the first hit wins. Entries for the
//! same pair are expected to be mutually exclusive; nothing enforces it.
//! A pair with no entry classifies every reply as unmatched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How an acceptable entry is compared against reply text.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchMode {
    /// Reply text must start with the entry.
    #[default]
    Prefix,
    /// Reply text must contain the entry anywhere (screen-capture surfaces).
    Contains,
}

impl MatchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchMode::Prefix => "prefix",
            MatchMode::Contains => "contains",
        }
    }

    fn accepts(self, text: &str, entry: &str) -> bool {
        match self {
            MatchMode::Prefix => text.starts_with(entry),
            MatchMode::Contains => text.contains(entry),
        }
    }
}

/// Result of classifying one reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// The reply matched this acceptable entry.
    Matched { entry: String },
    /// Entries exist for the pair but none matched.
    Unmatched,
    /// The table has nothing configured for the pair.
    NoEntry,
}

impl Classification {
    pub fn is_match(&self) -> bool {
        matches!(self, Classification::Matched { .. })
    }
}

/// `response type → probe input → acceptable prefixes`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternTable {
    entries: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl PatternTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert used by the built-in platform tables.
    pub fn with(mut self, response_type: &str, input: &str, accepted: &[&str]) -> Self {
        self.insert(
            response_type,
            input,
            accepted.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    /// Set (replace) the acceptable entries for one pair.
    pub fn insert(&mut self, response_type: &str, input: &str, accepted: Vec<String>) {
        self.entries
            .entry(response_type.to_string())
            .or_default()
            .insert(input.to_string(), accepted);
    }

    /// Overlay another table: every pair present in `other` replaces ours.
    pub fn merge(&mut self, other: &PatternTable) {
        for (response_type, inputs) in &other.entries {
            for (input, accepted) in inputs {
                self.insert(response_type, input, accepted.clone());
            }
        }
    }

    pub fn accepted(&self, response_type: &str, input: &str) -> Option<&[String]> {
        self.entries
            .get(response_type)
            .and_then(|inputs| inputs.get(input))
            .map(Vec::as_slice)
    }

    /// Response types that have at least one entry.
    pub fn response_types(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(BTreeMap::is_empty)
    }

    /// Iterate `(response type, input, accepted)` in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &[String])> {
        self.entries.iter().flat_map(|(response_type, inputs)| {
            inputs.iter().map(move |(input, accepted)| {
                (response_type.as_str(), input.as_str(), accepted.as_slice())
            })
        })
    }

    /// Classify a reply to `input` under `response_type`. First match wins.
    pub fn classify(
        &self,
        mode: MatchMode,
        response_type: &str,
        input: &str,
        text: &str,
    ) -> Classification {
        let Some(accepted) = self.accepted(response_type, input) else {
            return Classification::NoEntry;
        };
        accepted
            .iter()
            .find(|entry| mode.accepts(text, entry))
            .map(|entry| Classification::Matched {
                entry: entry.clone(),
            })
            .unwrap_or(Classification::Unmatched)
    }
}

/// Whether `text` is the UI's rendering of our own outbound message.
pub fn is_echo(marker: Option<&str>, text: &str) -> bool {
    match marker {
        Some(marker) if !marker.is_empty() => text.starts_with(marker),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn messenger_like() -> PatternTable {
        PatternTable::new()
            .with(
                "A",
                "介紹",
                &["Develope club\n您好", "Develope club\n愛爾麗"],
            )
            .with("A", "hi", &["Develope club\n您好", "Develope club\n愛爾麗"])
            .with(
                "B",
                "介紹",
                &["Develope club\n您好", "Develope club\n愛爾麗"],
            )
            .with("B", "hi", &["Develope club\nHi!"])
    }

    #[test]
    fn prefix_match_is_matched() {
        let table = messenger_like();
        let c = table.classify(MatchMode::Prefix, "A", "介紹", "Develope club\n您好 there");
        assert_eq!(
            c,
            Classification::Matched {
                entry: "Develope club\n您好".to_string()
            }
        );
    }

    #[test]
    fn non_prefix_is_unmatched() {
        let table = messenger_like();
        let c = table.classify(MatchMode::Prefix, "A", "介紹", "Develope club\n不是");
        assert_eq!(c, Classification::Unmatched);
        assert!(!c.is_match());
    }

    #[test]
    fn prefix_mode_ignores_matches_in_the_middle() {
        let table = messenger_like();
        let c = table.classify(MatchMode::Prefix, "B", "hi", "well Develope club\nHi!");
        assert_eq!(c, Classification::Unmatched);
    }

    #[test]
    fn contains_mode_matches_anywhere() {
        let table = PatternTable::new().with("A", "aloha", &["Aloha"]);
        let c = table.classify(MatchMode::Contains, "A", "aloha", "develope club\nAloha!");
        assert!(c.is_match());
    }

    #[test]
    fn response_type_changes_expectation_for_same_input() {
        let table = messenger_like();
        let reply = "Develope club\nHi! nice to meet you";
        assert!(!table.classify(MatchMode::Prefix, "A", "hi", reply).is_match());
        assert!(table.classify(MatchMode::Prefix, "B", "hi", reply).is_match());
    }

    #[test]
    fn missing_pair_reports_no_entry() {
        let table = messenger_like();
        assert_eq!(
            table.classify(MatchMode::Prefix, "C", "介紹", "Develope club\n不是"),
            Classification::NoEntry
        );
        assert_eq!(
            table.classify(MatchMode::Prefix, "A", "bye", "Develope club\n您好"),
            Classification::NoEntry
        );
    }

    #[test]
    fn first_entry_wins() {
        let table = PatternTable::new().with("A", "x", &["ab", "a"]);
        assert_eq!(
            table.classify(MatchMode::Prefix, "A", "x", "abc"),
            Classification::Matched {
                entry: "ab".to_string()
            }
        );
    }

    #[test]
    fn merge_replaces_only_given_pairs() {
        let mut table = messenger_like();
        let overlay = PatternTable::new().with("B", "hi", &["Develope club\nHello"]);
        table.merge(&overlay);

        assert_eq!(
            table.accepted("B", "hi").unwrap(),
            ["Develope club\nHello".to_string()]
        );
        assert_eq!(table.accepted("A", "hi").unwrap().len(), 2);
    }

    #[test]
    fn response_types_are_sorted() {
        let table = messenger_like();
        assert_eq!(table.response_types(), vec!["A", "B"]);
        assert!(!table.is_empty());
        assert!(PatternTable::new().is_empty());
    }

    #[test]
    fn parses_from_toml() {
        let toml = r#"
[A]
"介紹" = ["Develope club\n您好"]
[B]
hi = ["Develope club\nHi!"]
"#;
        let table: PatternTable = toml::from_str(toml).unwrap();
        assert_eq!(table.iter().count(), 2);
        assert!(
            table
                .classify(MatchMode::Prefix, "B", "hi", "Develope club\nHi!")
                .is_match()
        );
    }

    #[test]
    fn echo_marker_detection() {
        assert!(is_echo(Some("You sent\n"), "You sent\n介紹"));
        assert!(!is_echo(Some("You sent\n"), "Develope club\n您好"));
        assert!(!is_echo(None, "You sent\n介紹"));
        assert!(!is_echo(Some(""), "anything"));
    }

    proptest! {
        #[test]
        fn any_text_starting_with_an_entry_matches(
            idx in 0usize..2,
            suffix in ".{0,40}",
        ) {
            let table = messenger_like();
            let accepted = table.accepted("A", "介紹").unwrap();
            let text = format!("{}{}", accepted[idx], suffix);
            prop_assert!(table.classify(MatchMode::Prefix, "A", "介紹", &text).is_match());
        }

        #[test]
        fn text_starting_with_no_entry_never_matches(text in "[a-z ]{0,40}") {
            let table = messenger_like();
            for (response_type, input, _) in table.iter() {
                prop_assert!(
                    !table.classify(MatchMode::Prefix, response_type, input, &text).is_match()
                );
            }
        }
    }
}
