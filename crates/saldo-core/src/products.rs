//! # Product Types
//!
//! The catalog entry a sale prices against. Stock lives in
//! [`crate::inventory`]; a product row only carries list price, list cost
//! and the default tax rate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::{Money, TaxRate};

/// A product available for sale.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Product {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Tenant this product belongs to.
    pub tenant_id: String,

    /// Stock Keeping Unit - business identifier, unique per tenant.
    pub sku: String,

    /// Display name, snapshotted onto order lines at sale time.
    pub name: String,

    /// List price in cents. Lines may override it per sale.
    pub price_cents: i64,

    /// Supplier list cost in cents. Last rung of the COGS fallback chain.
    pub list_cost_cents: Option<i64>,

    /// Default tax rate in basis points (825 = 8.25%).
    pub tax_rate_bps: u32,

    /// Whether product is active (soft delete).
    pub is_active: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Returns the list price as Money.
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }

    /// Returns the list cost as Money, if one is set.
    #[inline]
    pub fn list_cost(&self) -> Option<Money> {
        self.list_cost_cents.map(Money::from_cents)
    }

    /// Returns the default tax rate.
    #[inline]
    pub fn tax_rate(&self) -> TaxRate {
        TaxRate::from_bps(self.tax_rate_bps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_accessors() {
        let product = Product {
            id: "p1".to_string(),
            tenant_id: "t1".to_string(),
            sku: "SKU-1".to_string(),
            name: "Widget".to_string(),
            price_cents: 1000,
            list_cost_cents: Some(600),
            tax_rate_bps: 825,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(product.price().cents(), 1000);
        assert_eq!(product.list_cost().unwrap().cents(), 600);
        assert_eq!(product.tax_rate().bps(), 825);
    }
}
