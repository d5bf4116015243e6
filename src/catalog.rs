//! Static service catalog
//!
//! Prices are integer minor units (cents). The catalog is configuration, it
//! is either the built-in table or a JSON document supplied at start-up.
use serde::{Deserialize, Serialize};

/// The option key that stands for the service's own base price.
pub const BASE_OPTION_KEY: &str = "base";
/// Extra copies are only billable alongside this add-on.
pub const COURIER_ADD_ON: &str = "courier";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricedItem {
    pub key: String,
    pub label: String,
    pub amount_cents: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEntry {
    pub slug: String,
    pub name: String,
    pub base_price_cents: u64,
    pub currency: String,
    #[serde(default)]
    pub options: Vec<PricedItem>,
    #[serde(default)]
    pub cal_link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    pub services: Vec<ServiceEntry>,
    #[serde(default)]
    pub add_ons: Vec<PricedItem>,
    pub extra_copy_cents: u64,
}

fn item(key: &str, label: &str, amount_cents: u64) -> PricedItem {
    PricedItem {
        key: key.to_string(),
        label: label.to_string(),
        amount_cents,
    }
}

impl ServiceEntry {
    pub fn option(&self, key: &str) -> Option<&PricedItem> {
        self.options.iter().find(|o| o.key == key)
    }
}

impl Catalog {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn service(&self, slug: &str) -> Option<&ServiceEntry> {
        self.services.iter().find(|s| s.slug == slug)
    }

    pub fn add_on(&self, key: &str) -> Option<&PricedItem> {
        self.add_ons.iter().find(|a| a.key == key)
    }

    pub fn builtin() -> Self {
        Self {
            services: vec![
                ServiceEntry {
                    slug: "power-of-attorney".into(),
                    name: "Power of Attorney".into(),
                    base_price_cents: 3500,
                    currency: "eur".into(),
                    options: vec![
                        item("signature", "Signature legalisation", 4900),
                        item("translation", "Sworn translation", 6500),
                    ],
                    cal_link: Some("notary/power-of-attorney".into()),
                },
                ServiceEntry {
                    slug: "certified-copy".into(),
                    name: "Certified Copy".into(),
                    base_price_cents: 2500,
                    currency: "eur".into(),
                    options: vec![item("multi-page", "Multi-page document", 1500)],
                    cal_link: Some("notary/certified-copy".into()),
                },
                ServiceEntry {
                    slug: "apostille".into(),
                    name: "Apostille".into(),
                    base_price_cents: 5900,
                    currency: "eur".into(),
                    options: vec![item("urgent", "Urgent processing", 3000)],
                    cal_link: None,
                },
            ],
            add_ons: vec![
                item(COURIER_ADD_ON, "Courier delivery", 1500),
                item("express", "Express handling", 2500),
            ],
            extra_copy_cents: 500,
        }
    }
}
