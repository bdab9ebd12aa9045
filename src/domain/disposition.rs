//! Disposition extraction from activity result text
//!
//! Two-stage extraction: a literal prefix marker takes precedence (the text
//! following it on the same line is the disposition); otherwise the text is
//! scanned against a fixed catalog of labels under an accent- and
//! punctuation-insensitive normalization.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Maps free text onto a platform-side label value (typically an enum item
/// id). Supplied by the configuration layer; the matching core never sees
/// platform list fields directly.
pub trait LabelResolver: Send + Sync {
    fn resolve(&self, text: &str) -> Option<String>;
}

/// Static table-backed resolver: exact normalized hit first, then a
/// contains scan in table order.
pub struct StaticLabelResolver {
    entries: Vec<(String, String)>,
}

impl StaticLabelResolver {
    pub fn new<I, L, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (L, V)>,
        L: AsRef<str>,
        V: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(label, value)| (normalize_label(label.as_ref()), value.into()))
                .collect(),
        }
    }
}

impl LabelResolver for StaticLabelResolver {
    fn resolve(&self, text: &str) -> Option<String> {
        let key = normalize_label(text);
        if key.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .or_else(|| self.entries.iter().find(|(k, _)| k.contains(&key)))
            .map(|(_, v)| v.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDisposition {
    pub disposition: Option<String>,
    pub raw: String,
}

/// Prefix marker plus label catalog, pre-normalized once.
#[derive(Debug, Clone)]
pub struct DispositionCatalog {
    prefix: String,
    entries: Vec<(String, String)>,
}

impl DispositionCatalog {
    pub fn new(prefix: &str, labels: &[String]) -> Self {
        Self {
            prefix: prefix.to_string(),
            entries: labels
                .iter()
                .map(|label| (normalize_label(label), label.clone()))
                .collect(),
        }
    }

    pub fn extract(&self, text: &str) -> ExtractedDisposition {
        let raw = text.trim().to_string();
        if raw.is_empty() {
            return ExtractedDisposition { disposition: None, raw };
        }

        if !self.prefix.is_empty() {
            if let Some(pos) = text.find(&self.prefix) {
                let tail = text[pos + self.prefix.len()..]
                    .lines()
                    .next()
                    .unwrap_or("")
                    .trim();
                if !tail.is_empty() {
                    return ExtractedDisposition {
                        disposition: Some(tail.to_string()),
                        raw,
                    };
                }
            }
        }

        let haystack = normalize_label(text);
        for (normalized, label) in &self.entries {
            if !normalized.is_empty() && haystack.contains(normalized) {
                return ExtractedDisposition {
                    disposition: Some(label.clone()),
                    raw,
                };
            }
        }

        ExtractedDisposition { disposition: None, raw }
    }
}

/// Uppercases, strips diacritics and collapses every non-alphanumeric run
/// into a single `_`, so `"NÃO  TEM-INTERESSE"` and `"nao tem interesse"`
/// compare equal.
pub fn normalize_label(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_sep = false;
    for c in text.nfd().filter(|c| !is_combining_mark(*c)) {
        if c.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(c.to_uppercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> DispositionCatalog {
        DispositionCatalog::new(
            "[DISPOSITION]",
            &[
                "REUNIÃO AGENDADA".to_string(),
                "FOLLOW-UP".to_string(),
                "NÃO TEM INTERESSE".to_string(),
            ],
        )
    }

    #[test]
    fn normalization_strips_diacritics_and_collapses_separators() {
        assert_eq!(normalize_label("REUNIÃO AGENDADA"), "REUNIAO_AGENDADA");
        assert_eq!(normalize_label("  follow -- up  "), "FOLLOW_UP");
        assert_eq!(normalize_label("nÃo tem interesse!"), "NAO_TEM_INTERESSE");
        assert_eq!(normalize_label("***"), "");
    }

    #[test]
    fn prefix_marker_wins_over_catalog() {
        let got = catalog().extract("[DISPOSITION] FOLLOW-UP\nrest of the note");
        assert_eq!(got.disposition.as_deref(), Some("FOLLOW-UP"));
        assert!(got.raw.starts_with("[DISPOSITION]"));
    }

    #[test]
    fn catalog_scan_matches_accent_insensitively() {
        let got = catalog().extract("cliente disse que nao tem interesse no momento");
        assert_eq!(got.disposition.as_deref(), Some("NÃO TEM INTERESSE"));
    }

    #[test]
    fn no_match_keeps_raw_text() {
        let got = catalog().extract("left a voicemail");
        assert_eq!(got.disposition, None);
        assert_eq!(got.raw, "left a voicemail");
    }

    #[test]
    fn empty_text_yields_nothing() {
        let got = catalog().extract("   ");
        assert_eq!(got.disposition, None);
        assert!(got.raw.is_empty());
    }

    #[test]
    fn static_resolver_exact_then_contains() {
        let resolver = StaticLabelResolver::new([
            ("OUTBOUND", "101"),
            ("INBOUND REDIRECTED", "103"),
            ("INBOUND", "102"),
        ]);
        assert_eq!(resolver.resolve("outbound").as_deref(), Some("101"));
        // No exact entry, but "INBOUND_REDIRECTED" contains "REDIRECTED".
        assert_eq!(resolver.resolve("redirected").as_deref(), Some("103"));
        assert_eq!(resolver.resolve("fax"), None);
    }
}
