//! Selection types for the batch engines
//!
//! These types describe which transactions a charging pass operates on and
//! which account or project a ledger operation targets. Validation happens
//! here, before any store access, so a failed validation never leaves a
//! partial write behind.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AppError;
use crate::AppResult;

/// Inclusive time window `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    /// Build a window, rejecting `start > end`
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> AppResult<Self> {
        if start > end {
            return Err(AppError::InvalidWindow {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Name matching scheme for service/account selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchScheme {
    /// Exact name equality
    #[default]
    Exact,
    /// Name starts with the given string
    StartsWith,
    /// Name contains the given string
    Contains,
}

impl fmt::Display for MatchScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchScheme::Exact => write!(f, "exact"),
            MatchScheme::StartsWith => write!(f, "startswith"),
            MatchScheme::Contains => write!(f, "contains"),
        }
    }
}

impl MatchScheme {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "exact" => Some(MatchScheme::Exact),
            "startswith" => Some(MatchScheme::StartsWith),
            "contains" => Some(MatchScheme::Contains),
            _ => None,
        }
    }
}

/// Service-side selection: everything, by system names, or by service names
///
/// System-based and service-based filtering are mutually exclusive by
/// construction; the CLI boundary maps conflicting flags to
/// [`AppError::ConflictingFilter`] before building one of these.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ServiceFilter {
    #[default]
    Any,
    Systems(Vec<String>),
    Services(Vec<String>),
}

impl ServiceFilter {
    pub fn is_any(&self) -> bool {
        matches!(self, ServiceFilter::Any)
    }

    /// Build from the two mutually exclusive name lists
    pub fn from_options(
        systems: Option<Vec<String>>,
        services: Option<Vec<String>>,
    ) -> AppResult<Self> {
        match (systems, services) {
            (Some(_), Some(_)) => Err(AppError::ConflictingFilter(
                "may only specify systems or services, but not both".to_string(),
            )),
            (Some(names), None) => Ok(ServiceFilter::Systems(names)),
            (None, Some(names)) => Ok(ServiceFilter::Services(names)),
            (None, None) => Ok(ServiceFilter::Any),
        }
    }
}

/// Account-side selection: everything, by project names, or by account names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AccountFilter {
    #[default]
    Any,
    Projects(Vec<String>),
    Accounts(Vec<String>),
}

impl AccountFilter {
    pub fn is_any(&self) -> bool {
        matches!(self, AccountFilter::Any)
    }

    /// Build from the two mutually exclusive name lists
    pub fn from_options(
        projects: Option<Vec<String>>,
        accounts: Option<Vec<String>>,
    ) -> AppResult<Self> {
        match (projects, accounts) {
            (Some(_), Some(_)) => Err(AppError::ConflictingFilter(
                "may only specify projects or accounts, but not both".to_string(),
            )),
            (Some(names), None) => Ok(AccountFilter::Projects(names)),
            (None, Some(names)) => Ok(AccountFilter::Accounts(names)),
            (None, None) => Ok(AccountFilter::Any),
        }
    }
}

/// Full parameter set for one charging pass
#[derive(Debug, Clone)]
pub struct ChargeParameters {
    pub window: TimeWindow,
    pub services: ServiceFilter,
    pub accounts: AccountFilter,
    pub scheme: MatchScheme,
    pub force_recalculate: bool,
    pub discount: Decimal,
}

impl ChargeParameters {
    /// A pass over every transaction in the window, no discount
    pub fn for_window(window: TimeWindow) -> Self {
        Self {
            window,
            services: ServiceFilter::Any,
            accounts: AccountFilter::Any,
            scheme: MatchScheme::Exact,
            force_recalculate: false,
            discount: Decimal::ZERO,
        }
    }

    /// Validate the discount range
    pub fn validate(&self) -> AppResult<()> {
        if self.discount < Decimal::ZERO || self.discount >= Decimal::ONE {
            return Err(AppError::InvalidDiscount(self.discount));
        }
        Ok(())
    }

    /// Charge-rate multiplier derived from the discount
    pub fn multiplier(&self) -> Decimal {
        Decimal::ONE - self.discount
    }
}

/// A single typed target for ledger operations that accept an account or a
/// project
///
/// Replaces instance-or-name polymorphic arguments: names are resolved to
/// ids once at the API boundary and never propagated inward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Account(i64),
    Project(i64),
}

impl Target {
    /// Build from two optional ids, requiring exactly one
    pub fn exactly_one(account: Option<i64>, project: Option<i64>) -> AppResult<Self> {
        match (account, project) {
            (Some(id), None) => Ok(Target::Account(id)),
            (None, Some(id)) => Ok(Target::Project(id)),
            _ => Err(AppError::MissingTarget),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn window() -> TimeWindow {
        let start = Utc::now();
        TimeWindow::new(start, start + Duration::days(30)).unwrap()
    }

    #[test]
    fn test_window_rejects_inverted_bounds() {
        let start = Utc::now();
        let result = TimeWindow::new(start, start - Duration::seconds(1));
        assert!(matches!(result, Err(AppError::InvalidWindow { .. })));

        // Degenerate single-instant window is allowed
        assert!(TimeWindow::new(start, start).is_ok());
    }

    #[test]
    fn test_window_contains_is_inclusive() {
        let start = Utc::now();
        let end = start + Duration::days(1);
        let w = TimeWindow::new(start, end).unwrap();
        assert!(w.contains(start));
        assert!(w.contains(end));
        assert!(!w.contains(end + Duration::seconds(1)));
    }

    #[test]
    fn test_match_scheme_parse() {
        assert_eq!(MatchScheme::from_str("exact"), Some(MatchScheme::Exact));
        assert_eq!(
            MatchScheme::from_str("STARTSWITH"),
            Some(MatchScheme::StartsWith)
        );
        assert_eq!(MatchScheme::from_str("contains"), Some(MatchScheme::Contains));
        assert_eq!(MatchScheme::from_str("glob"), None);
    }

    #[test]
    fn test_conflicting_filters_rejected() {
        let result = ServiceFilter::from_options(
            Some(vec!["cluster".to_string()]),
            Some(vec!["cpu".to_string()]),
        );
        assert!(matches!(result, Err(AppError::ConflictingFilter(_))));

        let result = AccountFilter::from_options(
            Some(vec!["proj".to_string()]),
            Some(vec!["proj-1".to_string()]),
        );
        assert!(matches!(result, Err(AppError::ConflictingFilter(_))));

        assert_eq!(
            ServiceFilter::from_options(None, None).unwrap(),
            ServiceFilter::Any
        );
    }

    #[test]
    fn test_discount_validation() {
        let mut params = ChargeParameters::for_window(window());
        assert!(params.validate().is_ok());

        params.discount = dec!(0.25);
        assert!(params.validate().is_ok());
        assert_eq!(params.multiplier(), dec!(0.75));

        params.discount = dec!(1.0);
        assert!(matches!(
            params.validate(),
            Err(AppError::InvalidDiscount(_))
        ));

        params.discount = dec!(-0.1);
        assert!(matches!(
            params.validate(),
            Err(AppError::InvalidDiscount(_))
        ));
    }

    #[test]
    fn test_target_requires_exactly_one() {
        assert_eq!(
            Target::exactly_one(Some(1), None).unwrap(),
            Target::Account(1)
        );
        assert_eq!(
            Target::exactly_one(None, Some(2)).unwrap(),
            Target::Project(2)
        );
        assert!(matches!(
            Target::exactly_one(None, None),
            Err(AppError::MissingTarget)
        ));
        assert!(matches!(
            Target::exactly_one(Some(1), Some(2)),
            Err(AppError::MissingTarget)
        ));
    }
}
