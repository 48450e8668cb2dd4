//! Status and mode enums for carts, tax rules and audit entries.

use serde::{Deserialize, Serialize};

/// Cart lifecycle status.
///
/// `Open` is the only status in which lines may change. `Expired` is set by
/// the sweeper (or a read that notices staleness), `Cancelled` when a merge
/// absorbs the cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CartStatus {
    #[default]
    Open,
    Confirmed,
    Cancelled,
    Expired,
}

impl CartStatus {
    /// Database/wire spelling of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// Whether lines and totals may still change.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

impl std::fmt::Display for CartStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CartStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "confirmed" => Ok(Self::Confirmed),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            _ => Err(format!("invalid cart status: {s}")),
        }
    }
}

/// How a cart's tax is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaxMode {
    /// One header-level percentage applied to the discounted base.
    #[default]
    Simple,
    /// Per-product tax rules with a persisted per-rule breakdown.
    Multi,
}

impl TaxMode {
    /// Database/wire spelling of the mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Multi => "multi",
        }
    }
}

impl std::fmt::Display for TaxMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaxMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "multi" => Ok(Self::Multi),
            _ => Err(format!("invalid tax mode: {s}")),
        }
    }
}

/// How a tax rule's rate is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxRuleKind {
    /// `rate` is a percentage of the taxable amount.
    Percentage,
    /// `rate` is a flat amount per unit.
    Fixed,
}

impl std::str::FromStr for TaxRuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "percentage" => Ok(Self::Percentage),
            "fixed" => Ok(Self::Fixed),
            _ => Err(format!("invalid tax rule kind: {s}")),
        }
    }
}

/// Which amount a percentage tax rule is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaxBase {
    /// The line's share of the cart base after discounts.
    #[default]
    DiscountedBase,
    /// The line subtotal before discounts.
    Gross,
}

impl std::str::FromStr for TaxBase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discounted_base" => Ok(Self::DiscountedBase),
            "gross" => Ok(Self::Gross),
            _ => Err(format!("invalid tax base: {s}")),
        }
    }
}

/// Action tag recorded in the cart audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    UpdateHeader,
    AddLine,
    UpdateLine,
    RemoveLine,
    Empty,
    DeleteCart,
    Merge,
    Expire,
}

impl AuditAction {
    /// Wire/database spelling of the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::UpdateHeader => "update_header",
            Self::AddLine => "add_line",
            Self::UpdateLine => "update_line",
            Self::RemoveLine => "remove_line",
            Self::Empty => "empty",
            Self::DeleteCart => "delete_cart",
            Self::Merge => "merge",
            Self::Expire => "expire",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update_header" => Ok(Self::UpdateHeader),
            "add_line" => Ok(Self::AddLine),
            "update_line" => Ok(Self::UpdateLine),
            "remove_line" => Ok(Self::RemoveLine),
            "empty" => Ok(Self::Empty),
            "delete_cart" => Ok(Self::DeleteCart),
            "merge" => Ok(Self::Merge),
            "expire" => Ok(Self::Expire),
            _ => Err(format!("invalid audit action: {s}")),
        }
    }
}
