//! Noise flagging for commercial and automated content
//!
//! Rules are applied in order; the first match decides. Flagged records stay
//! in the store, investigators exclude them at query time.

use crate::error::{Result, TrawlError};
use crate::records::Message;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Rule set as loaded from a TOML file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoiseRules {
    /// Regex patterns matched against the message text (case handled per pattern)
    pub text_patterns: Vec<String>,
    /// Known commercial sender identifiers, compared case-insensitively
    pub commercial_senders: Vec<String>,
    /// Numeric senders up to this many digits are treated as short codes
    pub short_code_max_len: usize,
}

impl Default for NoiseRules {
    fn default() -> Self {
        Self {
            text_patterns: vec![
                r"(?i)\bunsubscribe\b".to_string(),
                r"(?i)reply\s+stop\b".to_string(),
                r"(?i)\bSTOP\s+(?:au\s+)?\d{5}".to_string(),
                r"(?i)\bpromo(?:tion|tionnel)?\b".to_string(),
                r"(?i)offre\s+(?:sp[ée]ciale|exclusive)".to_string(),
                r"(?i)\bflash\s+sale\b".to_string(),
                r"(?i)\bsold(?:es)?\s+priv[ée]".to_string(),
                r"(?i)votre\s+code\s+(?:de\s+)?(?:v[ée]rification|confirmation)".to_string(),
                r"(?i)\byour\s+verification\s+code\b".to_string(),
                r"(?i)\bvotre\s+colis\b.*\bsuivi\b".to_string(),
                r"(?i)\bcredit\s+score\b".to_string(),
                r"(?i)f[ée]licitations?[!,]?\s+vous\s+avez\s+gagn[ée]".to_string(),
                r"(?i)\byou\s+(?:have\s+)?won\b".to_string(),
            ],
            commercial_senders: vec![
                "info".to_string(),
                "promo".to_string(),
                "noreply".to_string(),
                "no-reply".to_string(),
                "marketing".to_string(),
                "service client".to_string(),
            ],
            short_code_max_len: 6,
        }
    }
}

impl NoiseRules {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| TrawlError::Io {
            source: e,
            context: format!("Failed to read noise rules: {:?}", path),
        })?;
        Ok(toml::from_str(&content)?)
    }
}

/// Compiled noise classifier
pub struct NoiseFlagger {
    patterns: Vec<Regex>,
    senders: HashSet<String>,
    short_code_max_len: usize,
}

impl NoiseFlagger {
    pub fn new(rules: &NoiseRules) -> Result<Self> {
        let mut patterns = Vec::with_capacity(rules.text_patterns.len());
        for pattern in &rules.text_patterns {
            let regex = Regex::new(pattern).map_err(|e| {
                TrawlError::Config(format!("Invalid noise pattern '{}': {}", pattern, e))
            })?;
            patterns.push(regex);
        }

        Ok(Self {
            patterns,
            senders: rules
                .commercial_senders
                .iter()
                .map(|s| s.to_lowercase())
                .collect(),
            short_code_max_len: rules.short_code_max_len,
        })
    }

    /// Load rules from a file, falling back to the built-in default set
    pub fn from_file_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => Self::new(&NoiseRules::from_file(path)?),
            Some(path) => {
                tracing::warn!("Noise rules file {:?} not found, using defaults", path);
                Self::new(&NoiseRules::default())
            }
            None => Self::new(&NoiseRules::default()),
        }
    }

    /// Classify one record; first matching rule decides
    pub fn is_noise(&self, text: &str, sender: &str) -> bool {
        // Rule (a): commercial/spam markers in the text
        if self.patterns.iter().any(|p| p.is_match(text)) {
            return true;
        }

        // Rule (b): sender classification
        if self.senders.contains(&sender.to_lowercase()) {
            return true;
        }
        let digits = sender.strip_prefix('+').unwrap_or(sender);
        if !digits.is_empty()
            && digits.len() <= self.short_code_max_len
            && digits.chars().all(|c| c.is_ascii_digit())
        {
            return true;
        }

        // Rule (c): fallback
        false
    }

    /// Flag a batch of messages in place; returns how many were flagged
    pub fn flag_all(&self, messages: &mut [Message]) -> usize {
        let mut flagged = 0;
        for msg in messages.iter_mut() {
            msg.is_noise = self.is_noise(&msg.text, &msg.contact);
            if msg.is_noise {
                flagged += 1;
            }
        }
        flagged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flagger() -> NoiseFlagger {
        NoiseFlagger::new(&NoiseRules::default()).unwrap()
    }

    #[test]
    fn test_text_pattern_rule() {
        let f = flagger();
        assert!(f.is_noise("FLASH SALE this weekend only", "+33612345678"));
        assert!(f.is_noise("Reply STOP to opt out", "+33612345678"));
        assert!(f.is_noise("Votre code de vérification est 482910", "+33612345678"));
        assert!(!f.is_noise("on se voit demain au port", "+33612345678"));
    }

    #[test]
    fn test_short_code_rule() {
        let f = flagger();
        assert!(f.is_noise("Ton forfait arrive a expiration", "36665"));
        assert!(f.is_noise("anything", "+38200"));
        assert!(!f.is_noise("hello", "+33612345678"));
        assert!(!f.is_noise("hello", "alice"));
    }

    #[test]
    fn test_commercial_sender_rule() {
        let f = flagger();
        assert!(f.is_noise("your invoice is ready", "NoReply"));
        assert!(f.is_noise("nouveautés du mois", "promo"));
    }

    #[test]
    fn test_custom_rules_from_toml() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("noise.toml");
        std::fs::write(
            &path,
            r#"
            text_patterns = ["(?i)lottery"]
            commercial_senders = ["casino"]
            short_code_max_len = 4
            "#,
        )
        .unwrap();

        let f = NoiseFlagger::from_file_or_default(Some(&path)).unwrap();
        assert!(f.is_noise("you won the LOTTERY", "+33612345678"));
        assert!(f.is_noise("hi", "1234"));
        assert!(!f.is_noise("hi", "36665"));
        // Defaults are replaced, not merged
        assert!(!f.is_noise("FLASH SALE", "+33612345678"));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let rules = NoiseRules {
            text_patterns: vec!["(unclosed".to_string()],
            commercial_senders: vec![],
            short_code_max_len: 6,
        };
        assert!(matches!(
            NoiseFlagger::new(&rules),
            Err(TrawlError::Config(_))
        ));
    }
}
