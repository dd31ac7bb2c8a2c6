use std::fmt;
use std::str::FromStr;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::DomainError;

/// Closed status vocabulary for one record type.
///
/// Transitions are unrestricted: any value in `ALL` may follow any other. The
/// only validation is membership, done once in [`Pipeline::parse`].
pub trait Pipeline:
    Copy + Eq + fmt::Debug + fmt::Display + Serialize + DeserializeOwned + 'static
{
    const KIND: &'static str;
    const ALL: &'static [Self];
    const INITIAL: Self;

    fn as_str(self) -> &'static str;
    fn is_terminal(self) -> bool;

    /// Case-insensitive parse; `-` and spaces are accepted in place of `_`.
    fn parse(raw: &str) -> Result<Self, DomainError> {
        let wanted = normalize_token(raw);
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| DomainError::InvalidStatus {
                kind: Self::KIND,
                value: raw.trim().to_string(),
                allowed: Self::ALL
                    .iter()
                    .map(|status| status.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

pub(crate) fn normalize_token(raw: &str) -> String {
    raw.trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c == '-' || c == ' ' { '_' } else { c })
        .collect()
}

macro_rules! status_pipeline {
    (
        $(#[$meta:meta])*
        $name:ident, kind = $kind:literal, initial = $initial:ident,
        terminal = [$($terminal:ident),+],
        { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $crate::Pipeline for $name {
            const KIND: &'static str = $kind;
            const ALL: &'static [Self] = &[$(Self::$variant),+];
            const INITIAL: Self = Self::$initial;

            fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            fn is_terminal(self) -> bool {
                matches!(self, $(Self::$terminal)|+)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$initial
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str($crate::Pipeline::as_str(*self))
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                <Self as $crate::Pipeline>::parse(s)
            }
        }
    };
}

pub(crate) use status_pipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::Low, Priority::Medium, Priority::High];

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize_token(s);
        Priority::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| {
                DomainError::validation(format!(
                    "invalid priority {:?} (expected one of: low, medium, high)",
                    s.trim()
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OpportunityStatus, TaskStatus};

    #[test]
    fn priority_orders_high_above_low() {
        let mut items = vec![Priority::Low, Priority::High, Priority::Medium];
        items.sort_by(|a, b| b.cmp(a));
        assert_eq!(items, vec![Priority::High, Priority::Medium, Priority::Low]);
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn status_parse_is_lenient_about_case_and_separators() {
        assert_eq!(TaskStatus::parse("In-Progress").unwrap(), TaskStatus::InProgress);
        assert_eq!(TaskStatus::parse(" in progress ").unwrap(), TaskStatus::InProgress);
        assert_eq!(
            "SUBMITTED".parse::<OpportunityStatus>().unwrap(),
            OpportunityStatus::Submitted
        );
    }

    #[test]
    fn unknown_status_reports_vocabulary() {
        let err = OpportunityStatus::parse("applied").unwrap_err();
        assert!(err.is_invalid_status());
        let message = err.to_string();
        assert!(message.contains("\"applied\""));
        assert!(message.contains("discovered, tracking, submitted, won, lost"));
    }

    #[test]
    fn serde_names_match_display_names() {
        for status in TaskStatus::ALL {
            let json = serde_json::to_string(status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert!(TaskStatus::Done.is_terminal());
        assert!(!TaskStatus::INITIAL.is_terminal());
    }
}
