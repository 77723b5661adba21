// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Data contexts: validation, normalization and masking.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::CustodyError;

/// Kind of sensitive value being tokenized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenContext {
    PaymentCard,
    Ssn,
    Email,
    Generic,
}

impl TokenContext {
    /// Returns the stable name of the context.
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenContext::PaymentCard => "payment_card",
            TokenContext::Ssn => "ssn",
            TokenContext::Email => "email",
            TokenContext::Generic => "generic",
        }
    }

    /// Masking applied when no override is configured.
    pub fn default_masking(&self) -> MaskingRule {
        match self {
            TokenContext::PaymentCard => MaskingRule::new(6, 4),
            TokenContext::Ssn => MaskingRule::new(0, 4),
            TokenContext::Email => MaskingRule::new(1, 0),
            TokenContext::Generic => MaskingRule::new(0, 0),
        }
    }

    /// Validates `value` and returns its normalized form.
    ///
    /// Error messages never echo the value.
    pub fn normalize(&self, value: &str) -> Result<Zeroizing<String>, CustodyError> {
        match self {
            TokenContext::PaymentCard => normalize_card(value),
            TokenContext::Ssn => normalize_ssn(value),
            TokenContext::Email => normalize_email(value),
            TokenContext::Generic => {
                if value.is_empty() {
                    return Err(CustodyError::Validation("value must not be empty".into()));
                }
                Ok(Zeroizing::new(value.to_string()))
            }
        }
    }
}

/// How much of a normalized value stays visible in its masked form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskingRule {
    /// Leading characters kept.
    pub keep_prefix: usize,
    /// Trailing characters kept.
    pub keep_suffix: usize,
    /// Replacement character.
    pub mask_char: char,
}

impl MaskingRule {
    /// Creates a rule masking with `*`.
    pub const fn new(keep_prefix: usize, keep_suffix: usize) -> Self {
        Self {
            keep_prefix,
            keep_suffix,
            mask_char: '*',
        }
    }

    /// Sets the replacement character.
    pub fn with_mask_char(mut self, mask_char: char) -> Self {
        self.mask_char = mask_char;
        self
    }

    /// Masks a normalized value.
    ///
    /// If the kept parts would cover the whole value, everything is masked.
    pub fn apply(&self, context: TokenContext, value: &str) -> String {
        if context == TokenContext::Email {
            if let Some((local, domain)) = value.split_once('@') {
                return format!("{}@{}", self.mask_chars(local), domain);
            }
        }
        self.mask_chars(value)
    }

    fn mask_chars(&self, value: &str) -> String {
        let chars: Vec<char> = value.chars().collect();
        let len = chars.len();
        if self.keep_prefix + self.keep_suffix >= len {
            return std::iter::repeat(self.mask_char).take(len).collect();
        }
        chars
            .iter()
            .enumerate()
            .map(|(i, c)| {
                if i < self.keep_prefix || i >= len - self.keep_suffix {
                    *c
                } else {
                    self.mask_char
                }
            })
            .collect()
    }
}

fn normalize_card(value: &str) -> Result<Zeroizing<String>, CustodyError> {
    let digits: Zeroizing<String> =
        Zeroizing::new(value.chars().filter(|c| *c != ' ' && *c != '-').collect());
    if !(12..=19).contains(&digits.len()) || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CustodyError::Validation(
            "payment card must be 12-19 digits".into(),
        ));
    }
    if !luhn_valid(&digits) {
        return Err(CustodyError::Validation(
            "payment card fails checksum".into(),
        ));
    }
    Ok(digits)
}

/// Luhn checksum over an all-digit string.
fn luhn_valid(digits: &str) -> bool {
    let mut sum = 0u32;
    for (i, b) in digits.bytes().rev().enumerate() {
        let mut d = (b - b'0') as u32;
        if i % 2 == 1 {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
    }
    sum % 10 == 0
}

fn normalize_ssn(value: &str) -> Result<Zeroizing<String>, CustodyError> {
    let digits: Zeroizing<String> =
        Zeroizing::new(value.chars().filter(|c| *c != ' ' && *c != '-').collect());
    if digits.len() != 9 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CustodyError::Validation("SSN must be 9 digits".into()));
    }
    let (area, rest) = digits.split_at(3);
    let (group, serial) = rest.split_at(2);
    if area == "000" || area == "666" || area.starts_with('9') {
        return Err(CustodyError::Validation("SSN area number is invalid".into()));
    }
    if group == "00" || serial == "0000" {
        return Err(CustodyError::Validation("SSN contains an all-zero group".into()));
    }
    Ok(digits)
}

fn normalize_email(value: &str) -> Result<Zeroizing<String>, CustodyError> {
    let value = value.trim();
    let mut parts = value.split('@');
    let (local, domain) = match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => (local, domain),
        _ => {
            return Err(CustodyError::Validation(
                "email must contain exactly one '@'".into(),
            ))
        }
    };
    let labels_ok = domain.split('.').all(|label| !label.is_empty());
    if local.is_empty() || !domain.contains('.') || !labels_ok {
        return Err(CustodyError::Validation("email address is malformed".into()));
    }
    if value.chars().any(char::is_whitespace) {
        return Err(CustodyError::Validation("email contains whitespace".into()));
    }
    Ok(Zeroizing::new(format!("{}@{}", local, domain.to_ascii_lowercase())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_normalization() {
        let card = TokenContext::PaymentCard
            .normalize("4111 1111-1111 1111")
            .unwrap();
        assert_eq!(card.as_str(), "4111111111111111");
    }

    #[test]
    fn test_card_rejects_bad_checksum_and_length() {
        assert!(TokenContext::PaymentCard.normalize("4111111111111112").is_err());
        assert!(TokenContext::PaymentCard.normalize("41111111111").is_err());
        assert!(TokenContext::PaymentCard.normalize("4111a11111111111").is_err());
    }

    #[test]
    fn test_card_error_does_not_echo_value() {
        let err = TokenContext::PaymentCard
            .normalize("4111111111111112")
            .unwrap_err();
        assert!(!err.to_string().contains("4111111111111112"));
    }

    #[test]
    fn test_luhn() {
        assert!(luhn_valid("4111111111111111"));
        assert!(luhn_valid("5500005555555559"));
        assert!(luhn_valid("378282246310005"));
        assert!(!luhn_valid("378282246310006"));
    }

    #[test]
    fn test_ssn_rules() {
        assert_eq!(
            TokenContext::Ssn.normalize("123-45-6789").unwrap().as_str(),
            "123456789"
        );
        assert!(TokenContext::Ssn.normalize("000-45-6789").is_err());
        assert!(TokenContext::Ssn.normalize("666-45-6789").is_err());
        assert!(TokenContext::Ssn.normalize("912-45-6789").is_err());
        assert!(TokenContext::Ssn.normalize("123-00-6789").is_err());
        assert!(TokenContext::Ssn.normalize("123-45-0000").is_err());
        assert!(TokenContext::Ssn.normalize("12345678").is_err());
    }

    #[test]
    fn test_email_rules() {
        assert_eq!(
            TokenContext::Email
                .normalize("Jane.Doe@Example.COM")
                .unwrap()
                .as_str(),
            "Jane.Doe@example.com"
        );
        assert!(TokenContext::Email.normalize("a@@b.com").is_err());
        assert!(TokenContext::Email.normalize("@b.com").is_err());
        assert!(TokenContext::Email.normalize("a@localhost").is_err());
        assert!(TokenContext::Email.normalize("a@b..com").is_err());
    }

    #[test]
    fn test_generic_rejects_empty() {
        assert!(TokenContext::Generic.normalize("").is_err());
        assert!(TokenContext::Generic.normalize("x").is_ok());
    }

    #[test]
    fn test_default_card_mask() {
        let rule = TokenContext::PaymentCard.default_masking();
        assert_eq!(
            rule.apply(TokenContext::PaymentCard, "4111111111111111"),
            "411111******1111"
        );
    }

    #[test]
    fn test_email_and_ssn_masks() {
        let email = TokenContext::Email.default_masking();
        assert_eq!(
            email.apply(TokenContext::Email, "jane@example.com"),
            "j***@example.com"
        );
        let ssn = TokenContext::Ssn.default_masking();
        assert_eq!(ssn.apply(TokenContext::Ssn, "123456789"), "*****6789");
    }

    #[test]
    fn test_short_value_fully_masked() {
        let rule = MaskingRule::new(6, 4).with_mask_char('#');
        assert_eq!(rule.apply(TokenContext::Generic, "abcd"), "####");
    }
}
