//! Structural validation rules for accounting suggestions.
//!
//! Validation never fails: malformed model output is an expected case, so
//! every problem is returned as a violation that flows into scoring instead
//! of aborting the run.

use serde::{Deserialize, Serialize};

/// Norwegian VAT codes accepted by the platform
pub const VALID_VAT_CODES: &[&str] = &["0", "1", "2", "3", "5", "6"];

/// Norwegian chart-of-accounts ranges (simplified)
pub const ACCOUNT_RANGES: &[(u32, u32, &str)] = &[
    (1000, 1999, "Assets"),
    (2000, 2999, "Liabilities"),
    (3000, 3999, "Equity"),
    (4000, 4999, "Revenue"),
    (5000, 5999, "Cost of goods sold"),
    (6000, 6999, "Operating expenses"),
    (7000, 7999, "Financial items"),
    (8000, 8999, "Other income/expenses"),
];

/// Field a violation refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    AccountNumber,
    VatCode,
}

/// One structural rule violation, with a stable code for downstream policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub code: String,
    pub field: Field,
    pub message: String,
}

impl Violation {
    fn account(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            field: Field::AccountNumber,
            message: message.into(),
        }
    }

    fn vat(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            field: Field::VatCode,
            message: message.into(),
        }
    }
}

/// Verdict on a suggestion's structural form. Produced fresh each run and
/// never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub violations: Vec<Violation>,
}

impl ValidationResult {
    pub fn violation_count(&self) -> usize {
        self.violations.len()
    }

    /// True if any violation concerns the account number. Account problems
    /// carry a hard risk override in scoring.
    pub fn has_account_violation(&self) -> bool {
        self.violations
            .iter()
            .any(|v| v.field == Field::AccountNumber)
    }
}

/// Label for the account class a number falls into, if any
pub fn account_class(account: u32) -> Option<&'static str> {
    ACCOUNT_RANGES
        .iter()
        .find(|(start, end, _)| (*start..=*end).contains(&account))
        .map(|(_, _, label)| *label)
}

fn check_account_number(account_number: Option<&str>) -> Option<Violation> {
    let raw = match account_number {
        Some(s) if !s.trim().is_empty() => s.trim(),
        _ => {
            return Some(Violation::account(
                "account_missing",
                "Account number is missing",
            ))
        }
    };

    if !raw.chars().all(|c| c.is_ascii_digit()) {
        return Some(Violation::account(
            "account_not_numeric",
            "Account number must be numeric",
        ));
    }

    if raw.len() != 4 {
        return Some(Violation::account(
            "account_length",
            "Account number must be 4 digits",
        ));
    }

    // Length-checked, so parse cannot fail
    let value: u32 = raw.parse().unwrap_or(0);
    if account_class(value).is_none() {
        return Some(Violation::account(
            "account_range",
            format!("Account number {raw} not in valid range"),
        ));
    }

    None
}

fn check_vat_code(vat_code: Option<&str>) -> Option<Violation> {
    let raw = match vat_code {
        Some(s) if !s.trim().is_empty() => s.trim(),
        _ => return Some(Violation::vat("vat_missing", "VAT code is missing")),
    };

    if !VALID_VAT_CODES.contains(&raw) {
        return Some(Violation::vat(
            "vat_unknown",
            format!(
                "VAT code {raw} is not valid. Must be one of: {}",
                VALID_VAT_CODES.join(", ")
            ),
        ));
    }

    None
}

/// Validate the structural form of a suggestion's account number and VAT
/// code. Always returns a verdict; never errors.
pub fn validate(account_number: Option<&str>, vat_code: Option<&str>) -> ValidationResult {
    let mut violations = Vec::new();
    if let Some(v) = check_account_number(account_number) {
        violations.push(v);
    }
    if let Some(v) = check_vat_code(vat_code) {
        violations.push(v);
    }

    ValidationResult {
        is_valid: violations.is_empty(),
        violations,
    }
}
