//! Bank display-name canonicalization.
//!
//! Resolution is an ordered pair of lookups, first match wins:
//! 1. the identifier override table,
//! 2. the cleaned provider name, mapped through the alias table.
//!
//! With neither, the name falls back to `Bank <id>`.

use regex::Regex;
use std::collections::HashMap;

use crate::config::NameConfig;
use crate::domain::CertNumber;

/// Compiled cleanup rules plus the two identity tables.
pub struct Canonicalizer {
    overrides: HashMap<CertNumber, String>,
    aliases: HashMap<String, String>,
    rules: Vec<(Regex, &'static str)>,
    whitespace: Regex,
}

impl Canonicalizer {
    pub fn new(names: &NameConfig) -> Result<Self, regex::Error> {
        let rules = vec![
            (Regex::new(r"\s*-\s*,\s*$")?, ""),
            (Regex::new(r"\s*,\s*$")?, ""),
            (Regex::new(r"(?i),\s*National Association\s*$")?, ""),
            (Regex::new(r"(?i)\s+National Association\s*$")?, ""),
            (Regex::new(r"(?i)\s+Bank USA\s*$")?, " Bank"),
        ];
        Ok(Self {
            overrides: names
                .overrides
                .iter()
                .map(|o| (o.cert, o.name.clone()))
                .collect(),
            aliases: names
                .aliases
                .iter()
                .map(|(k, v)| (k.trim().to_lowercase(), v.clone()))
                .collect(),
            rules,
            whitespace: Regex::new(r"\s+")?,
        })
    }

    /// Display name for `cert` given an optional provider name.
    pub fn canonical_name(&self, cert: CertNumber, raw: Option<&str>) -> String {
        if let Some(name) = self.overrides.get(&cert) {
            return name.clone();
        }
        raw.and_then(|r| self.resolve(r))
            .unwrap_or_else(|| format!("Bank {cert}"))
    }

    /// Cleaned and alias-mapped name; `None` when nothing is left after cleaning.
    pub fn resolve(&self, raw: &str) -> Option<String> {
        let cleaned = self.clean(raw);
        if cleaned.is_empty() {
            return None;
        }
        Some(
            self.aliases
                .get(&cleaned.to_lowercase())
                .cloned()
                .unwrap_or(cleaned),
        )
    }

    /// Apply the cleanup rules until the name stops changing.
    pub fn clean(&self, raw: &str) -> String {
        let mut current = raw.trim().to_string();
        loop {
            let mut next = current.clone();
            for (re, replacement) in &self.rules {
                next = re.replace(&next, *replacement).into_owned();
            }
            next = self.whitespace.replace_all(&next, " ").trim().to_string();
            if next == current {
                return next;
            }
            current = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NameOverride;

    fn canon() -> Canonicalizer {
        Canonicalizer::new(&NameConfig::default()).unwrap()
    }

    #[test]
    fn override_wins_even_without_raw_name() {
        let c = canon();
        assert_eq!(c.canonical_name(CertNumber(628), None), "JPMorgan Chase");
        assert_eq!(
            c.canonical_name(CertNumber(628), Some("JPMorgan Chase Bank, National Association")),
            "JPMorgan Chase"
        );
    }

    #[test]
    fn cleans_legal_suffixes_and_punctuation() {
        let c = canon();
        assert_eq!(c.clean("  First   Example Bank - , "), "First Example Bank");
        assert_eq!(c.clean("Example Bank, National Association"), "Example Bank");
        assert_eq!(c.clean("Example Bank national association"), "Example Bank");
        assert_eq!(c.clean("Example Bank USA"), "Example Bank");
        assert_eq!(c.clean("Trailing Comma Bank,"), "Trailing Comma Bank");
    }

    #[test]
    fn stacked_suffixes_reach_a_fixed_point() {
        let c = canon();
        let once = c.clean("Example Bank USA, National Association ,");
        assert_eq!(once, "Example Bank");
        assert_eq!(c.clean(&once), once);
    }

    #[test]
    fn aliases_map_cleaned_names() {
        let c = canon();
        assert_eq!(
            c.canonical_name(CertNumber(99999), Some("The Huntington National Bank")),
            "Huntington National Bank"
        );
        assert_eq!(
            c.canonical_name(CertNumber(99999), Some("HUNTINGTON")),
            "Huntington National Bank"
        );
    }

    #[test]
    fn falls_back_to_identifier() {
        let c = canon();
        assert_eq!(c.canonical_name(CertNumber(817), None), "Bank 817");
        assert_eq!(c.canonical_name(CertNumber(817), Some(" - , ")), "Bank 817");
    }

    #[test]
    fn config_extends_tables() {
        let mut names = NameConfig::default();
        names.overrides.push(NameOverride {
            cert: CertNumber(817),
            name: "PNC Bank".into(),
        });
        names
            .aliases
            .insert("truist".into(), "Truist Bank".into());
        let c = Canonicalizer::new(&names).unwrap();
        assert_eq!(c.canonical_name(CertNumber(817), None), "PNC Bank");
        assert_eq!(c.canonical_name(CertNumber(10573), Some("Truist")), "Truist Bank");
    }
}
