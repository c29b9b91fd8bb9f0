//! Chat address normalization.
//!
//! The driver addresses one-to-one chats as `<digits>@c.us` and groups as
//! `<id>@g.us`. Callers may hand us a bare phone number (`+1 555-0100`), which
//! is normalized by stripping formatting and appending the user suffix.

use crate::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const USER_SUFFIX: &str = "@c.us";
pub const GROUP_SUFFIX: &str = "@g.us";
pub const BROADCAST_SUFFIX: &str = "@broadcast";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatAddress(String);

impl ChatAddress {
    pub fn parse(raw: &str) -> SyncResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SyncError::Validation("chat id must not be empty".into()));
        }

        if let Some((user, server)) = trimmed.split_once('@') {
            if user.is_empty() || server.is_empty() {
                return Err(SyncError::Validation(format!("malformed chat id: {trimmed}")));
            }
            return Ok(Self(trimmed.to_string()));
        }

        let digits: String = trimmed
            .chars()
            .filter(|c| !matches!(c, '+' | ' ' | '-' | '(' | ')'))
            .collect();
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(SyncError::Validation(format!("malformed phone number: {trimmed}")));
        }

        Ok(Self(format!("{digits}{USER_SUFFIX}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part before the `@`, i.e. the phone number for one-to-one chats.
    pub fn user(&self) -> &str {
        self.0.split_once('@').map(|(user, _)| user).unwrap_or(&self.0)
    }

    pub fn is_group(&self) -> bool {
        self.0.ends_with(GROUP_SUFFIX)
    }

    pub fn is_broadcast(&self) -> bool {
        self.0.ends_with(BROADCAST_SUFFIX)
    }
}

impl fmt::Display for ChatAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strips the driver suffix from an address, leaving the phone number.
pub fn phone_of(address: &str) -> &str {
    address.split_once('@').map(|(user, _)| user).unwrap_or(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_numbers_get_user_suffix() {
        let address = ChatAddress::parse("+1 555-0100").unwrap();
        assert_eq!(address.as_str(), "15550100@c.us");
        assert_eq!(address.user(), "15550100");
        assert!(!address.is_group());
    }

    #[test]
    fn test_qualified_addresses_pass_through() {
        let address = ChatAddress::parse("15550100@c.us").unwrap();
        assert_eq!(address.as_str(), "15550100@c.us");

        let group = ChatAddress::parse("1203630-1555@g.us").unwrap();
        assert!(group.is_group());

        assert!(ChatAddress::parse("status@broadcast").unwrap().is_broadcast());
    }

    #[test]
    fn test_malformed_addresses_are_rejected() {
        for raw in ["", "   ", "abc", "+", "@c.us", "1555@"] {
            assert!(
                matches!(ChatAddress::parse(raw), Err(SyncError::Validation(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_phone_of() {
        assert_eq!(phone_of("15550100@c.us"), "15550100");
        assert_eq!(phone_of("15550100"), "15550100");
    }
}
