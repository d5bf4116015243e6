//! Pricing engine
//!
//! `quote` is a pure function of the catalog entry and the selection. Same
//! input, same output: retries rely on reproducing the same total.
use crate::catalog::{BASE_OPTION_KEY, COURIER_ADD_ON, Catalog, ServiceEntry};
use serde::Serialize;

/// Default tax rate, 21 %.
pub const DEFAULT_TAX_BASIS_POINTS: u32 = 2100;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub option_keys: Vec<String>,
    pub add_on_ids: Vec<String>,
    pub extra_copies: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub label: String,
    pub unit_amount: u64,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub currency: String,
    pub lines: Vec<LineItem>,
    pub subtotal: u64,
    pub tax: u64,
    pub total: u64,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PricingError {
    #[error("unknown option '{key}' for service '{service}'")]
    UnknownOption { service: String, key: String },
    #[error("unknown add-on '{0}'")]
    UnknownAddOn(String),
    #[error("amount overflow")]
    Overflow,
}

impl LineItem {
    fn new(label: &str, unit_amount: u64, quantity: u32) -> Self {
        Self {
            label: label.to_string(),
            unit_amount,
            quantity,
        }
    }

    pub fn amount(&self) -> Option<u64> {
        self.unit_amount.checked_mul(u64::from(self.quantity))
    }
}

// keeps first occurrence, selections are sets
fn dedup(keys: &[String]) -> Vec<&str> {
    let mut seen: Vec<&str> = Vec::with_capacity(keys.len());
    for key in keys {
        if !seen.contains(&key.as_str()) {
            seen.push(key.as_str());
        }
    }
    seen
}

/// Ordered line items: base service, sub-options, add-ons, extra copies.
pub fn line_items(
    catalog: &Catalog,
    service: &ServiceEntry,
    selection: &Selection,
) -> Result<Vec<LineItem>, PricingError> {
    let mut lines = vec![LineItem::new(&service.name, service.base_price_cents, 1)];

    for key in dedup(&selection.option_keys) {
        // the base price is always charged once
        if key == BASE_OPTION_KEY {
            continue;
        }
        let option = service
            .option(key)
            .ok_or_else(|| PricingError::UnknownOption {
                service: service.slug.clone(),
                key: key.to_string(),
            })?;
        lines.push(LineItem::new(&option.label, option.amount_cents, 1));
    }

    let add_ons = dedup(&selection.add_on_ids);
    for key in &add_ons {
        let add_on = catalog
            .add_on(key)
            .ok_or_else(|| PricingError::UnknownAddOn(key.to_string()))?;
        lines.push(LineItem::new(&add_on.label, add_on.amount_cents, 1));
    }

    if selection.extra_copies > 0 && add_ons.contains(&COURIER_ADD_ON) {
        lines.push(LineItem::new(
            "Extra copy",
            catalog.extra_copy_cents,
            selection.extra_copies,
        ));
    }

    Ok(lines)
}

/// `round_half_up(subtotal * rate)` at cent resolution.
pub fn tax_for(subtotal: u64, basis_points: u32) -> Result<u64, PricingError> {
    let scaled = u128::from(subtotal) * u128::from(basis_points);
    u64::try_from((scaled + 5_000) / 10_000).map_err(|_| PricingError::Overflow)
}

impl Quote {
    pub fn from_lines(
        currency: &str,
        lines: Vec<LineItem>,
        tax_basis_points: u32,
    ) -> Result<Self, PricingError> {
        let subtotal = lines.iter().try_fold(0u64, |acc, line| {
            line.amount()
                .and_then(|amount| acc.checked_add(amount))
                .ok_or(PricingError::Overflow)
        })?;
        let tax = tax_for(subtotal, tax_basis_points)?;
        let total = subtotal.checked_add(tax).ok_or(PricingError::Overflow)?;

        Ok(Self {
            currency: currency.to_string(),
            lines,
            subtotal,
            tax,
            total,
        })
    }
}

pub fn quote(
    catalog: &Catalog,
    service: &ServiceEntry,
    selection: &Selection,
    tax_basis_points: u32,
) -> Result<Quote, PricingError> {
    let lines = line_items(catalog, service, selection)?;
    Quote::from_lines(&service.currency, lines, tax_basis_points)
}
