//! Checkout session service
//!
//! The only place that talks to the payment processor and the only place
//! that records a paid order. An attempt moves through
//! `Building -> RequestingSession -> AwaitingPayment` when a session is
//! created, and `AwaitingPayment -> Verifying -> Paid | Failed` when the
//! client returns from the hosted page.
use crate::catalog::Catalog;
use crate::config::CheckoutConfig;
use crate::error::NotaryError;
use crate::pricing::{self, LineItem, Quote, Selection};
use crate::store::OrderStore;
use crate::submission::TimeStamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Width of the fallback idempotency bucket.
pub const IDEMPOTENCY_WINDOW_SECS: i64 = 30;

// ---- wire schema ----

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutItem {
    pub service_id: String,
    #[serde(default = "one")]
    pub quantity: u32,
    #[serde(default)]
    pub add_on_ids: Vec<String>,
    #[serde(default)]
    pub option_keys: Vec<String>,
    #[serde(default)]
    pub extra_copies: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub success_url: Option<String>,
    pub failure_url: Option<String>,
    pub items: Vec<CheckoutItem>,
    pub idempotency_key: Option<String>,
    pub customer_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthCheck {
    pub test: bool,
}

/// Body of a checkout call, either a probe or a real session request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CheckoutCall {
    HealthCheck(HealthCheck),
    Create(CheckoutRequest),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CheckoutReply {
    Health { ok: bool },
    Session { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Customer {
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedItem {
    pub name: String,
    pub qty: u32,
    pub price_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub paid: bool,
    pub amount: Option<u64>,
    pub currency: String,
    pub customer: Customer,
    pub items: Vec<VerifiedItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cal_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

// ---- payment processor collaborator ----

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub currency: String,
    pub line_items: Vec<LineItem>,
    pub success_url: String,
    pub failure_url: String,
    pub idempotency_key: String,
    pub customer_email: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorLineItem {
    pub description: String,
    pub quantity: u32,
    pub price_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessorSession {
    pub id: String,
    pub payment_status: String,
    pub amount_total: Option<u64>,
    pub currency: Option<String>,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub line_items: Vec<ProcessorLineItem>,
    pub metadata: BTreeMap<String, String>,
    pub failure_reason: Option<String>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("processor unavailable: {0}")]
    Unavailable(String),
    #[error("processor rejected the request: {0}")]
    Rejected(String),
}

/// Hosted checkout provider. Repeating `create_session` with the same
/// idempotency key must hand back the same session.
pub trait PaymentProcessor {
    fn create_session(&self, request: &SessionRequest) -> Result<HostedSession, ProcessorError>;

    fn retrieve_session(&self, session_id: &str) -> Result<ProcessorSession, ProcessorError>;
}

impl<T: PaymentProcessor + ?Sized> PaymentProcessor for &T {
    fn create_session(&self, request: &SessionRequest) -> Result<HostedSession, ProcessorError> {
        (**self).create_session(request)
    }
    fn retrieve_session(&self, session_id: &str) -> Result<ProcessorSession, ProcessorError> {
        (**self).retrieve_session(session_id)
    }
}

// ---- persisted order ----

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    #[n(0)]
    Paid,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct OrderRecord {
    #[n(0)]
    pub session_id: String, // natural key
    #[n(1)]
    pub amount: u64,
    #[n(2)]
    pub currency: String,
    #[n(3)]
    pub customer_email: String,
    #[n(4)]
    pub service_slug: String,
    #[n(5)]
    pub cal_link: Option<String>,
    #[n(6)]
    pub status: OrderStatus,
    #[n(7)]
    pub created_at: TimeStamp<Utc>,
}

// ---- attempt state machine ----

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Building,
    RequestingSession,
    AwaitingPayment,
    Verifying,
    Paid,
    Failed,
}

impl AttemptState {
    fn can_advance_to(self, next: AttemptState) -> bool {
        use AttemptState::*;
        matches!(
            (self, next),
            (Building, RequestingSession)
                | (Building, Failed)
                | (RequestingSession, AwaitingPayment)
                | (RequestingSession, Failed)
                | (AwaitingPayment, Verifying)
                | (Verifying, Paid)
                | (Verifying, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AttemptState::Paid | AttemptState::Failed)
    }
}

/// Trace of one checkout attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub key: String,
    history: Vec<AttemptState>,
}

impl Attempt {
    fn start(key: String) -> Self {
        Self {
            key,
            history: vec![AttemptState::Building],
        }
    }

    fn resume(session_id: &str) -> Self {
        Self {
            key: session_id.to_string(),
            history: vec![AttemptState::AwaitingPayment],
        }
    }

    pub fn state(&self) -> AttemptState {
        self.history
            .last()
            .copied()
            .unwrap_or(AttemptState::Building)
    }

    pub fn history(&self) -> &[AttemptState] {
        &self.history
    }

    fn advance(&mut self, next: AttemptState) {
        let from = self.state();
        if from.can_advance_to(next) {
            tracing::debug!(attempt = %self.key, ?from, to = ?next, "checkout attempt transition");
            self.history.push(next);
        } else {
            tracing::error!(attempt = %self.key, ?from, to = ?next, "ignored illegal checkout transition");
        }
    }

    fn fail(&mut self, err: NotaryError) -> NotaryError {
        self.advance(AttemptState::Failed);
        err
    }
}

/// Result of a successful session request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSession {
    pub session_id: String,
    pub url: String,
    pub idempotency_key: String,
    pub quote: Quote,
    pub attempt: Attempt,
}

/// Client key when supplied, otherwise `sha256(service id, 30 s bucket)`.
pub fn idempotency_key(client_key: Option<&str>, service_id: &str, now: DateTime<Utc>) -> String {
    if let Some(key) = client_key.map(str::trim).filter(|k| !k.is_empty()) {
        return key.to_string();
    }
    let bucket = now.timestamp().div_euclid(IDEMPOTENCY_WINDOW_SECS);
    sha256::digest(format!("{service_id}:{bucket}"))
}

pub struct CheckoutService<P, O> {
    config: CheckoutConfig,
    catalog: Catalog,
    processor: P,
    orders: O,
}

impl<P: PaymentProcessor, O: OrderStore> CheckoutService<P, O> {
    pub fn new(config: CheckoutConfig, catalog: Catalog, processor: P, orders: O) -> Self {
        Self {
            config,
            catalog,
            processor,
            orders,
        }
    }

    pub fn orders(&self) -> &O {
        &self.orders
    }

    /// Entry point for a raw checkout call.
    pub fn handle(&self, call: CheckoutCall, now: DateTime<Utc>) -> Result<CheckoutReply, NotaryError> {
        match call {
            CheckoutCall::HealthCheck(HealthCheck { test: true }) => Ok(CheckoutReply::Health { ok: true }),
            CheckoutCall::HealthCheck(_) => Err(NotaryError::validation("items are required")),
            CheckoutCall::Create(request) => {
                let created = self.create_session(&request, now)?;
                Ok(CheckoutReply::Session { url: created.url })
            }
        }
    }

    fn price(&self, item: &CheckoutItem) -> Result<(Quote, Option<String>), NotaryError> {
        let service = self.catalog.service(&item.service_id).ok_or_else(|| {
            NotaryError::validation(format!("unknown service: {}", item.service_id))
        })?;
        let selection = Selection {
            option_keys: item.option_keys.clone(),
            add_on_ids: item.add_on_ids.clone(),
            extra_copies: item.extra_copies,
        };

        let mut lines = pricing::line_items(&self.catalog, service, &selection)
            .map_err(|e| NotaryError::validation(e.to_string()))?;
        for line in &mut lines {
            line.quantity = line
                .quantity
                .checked_mul(item.quantity)
                .ok_or_else(|| NotaryError::validation("quantity too large"))?;
        }
        let quote = Quote::from_lines(&service.currency, lines, self.config.tax_basis_points)
            .map_err(|e| NotaryError::validation(e.to_string()))?;

        Ok((quote, service.cal_link.clone()))
    }

    pub fn create_session(
        &self,
        request: &CheckoutRequest,
        now: DateTime<Utc>,
    ) -> Result<CreatedSession, NotaryError> {
        // nothing below may reach the processor before these checks pass
        if self.config.secret_key.is_none() {
            return Err(NotaryError::misconfigured("payment processor credentials missing"));
        }
        let item = match request.items.as_slice() {
            [] => return Err(NotaryError::validation("items are required")),
            [item] => item,
            _ => return Err(NotaryError::validation("one service per checkout")),
        };
        if item.quantity == 0 {
            return Err(NotaryError::validation("quantity must be at least 1"));
        }
        let success_url = request
            .success_url
            .clone()
            .or_else(|| self.config.success_url.clone())
            .ok_or_else(|| NotaryError::validation("successUrl is required"))?;
        let failure_url = request
            .failure_url
            .clone()
            .or_else(|| self.config.failure_url.clone())
            .ok_or_else(|| NotaryError::validation("failureUrl is required"))?;

        let key = idempotency_key(request.idempotency_key.as_deref(), &item.service_id, now);
        let mut attempt = Attempt::start(key.clone());

        let (quote, cal_link) = self.price(item).map_err(|e| attempt.fail(e))?;

        let mut metadata = BTreeMap::new();
        metadata.insert("serviceSlug".to_string(), item.service_id.clone());
        if let Some(link) = &cal_link {
            metadata.insert("calLink".to_string(), link.clone());
        }
        metadata.insert("subtotal".to_string(), quote.subtotal.to_string());
        metadata.insert("tax".to_string(), quote.tax.to_string());
        metadata.insert("total".to_string(), quote.total.to_string());
        metadata.insert("optionKeys".to_string(), item.option_keys.join(","));
        metadata.insert("addOnIds".to_string(), item.add_on_ids.join(","));
        metadata.insert("extraCopies".to_string(), item.extra_copies.to_string());

        let mut line_items = quote.lines.clone();
        if quote.tax > 0 {
            line_items.push(LineItem {
                label: "Tax".to_string(),
                unit_amount: quote.tax,
                quantity: 1,
            });
        }

        let session_request = SessionRequest {
            currency: quote.currency.clone(),
            line_items,
            success_url,
            failure_url,
            idempotency_key: key.clone(),
            customer_email: request.customer_email.clone(),
            metadata,
        };

        attempt.advance(AttemptState::RequestingSession);
        let session = self.processor.create_session(&session_request).map_err(|e| {
            tracing::error!(idempotency_key = %key, error = %e, "checkout session creation failed");
            attempt.fail(NotaryError::Upstream("could not create checkout session".into()))
        })?;
        attempt.advance(AttemptState::AwaitingPayment);

        tracing::info!(
            session_id = %session.id,
            service = %item.service_id,
            total = quote.total,
            "checkout session created"
        );

        Ok(CreatedSession {
            session_id: session.id,
            url: session.url,
            idempotency_key: key,
            quote,
            attempt,
        })
    }

    /// Safe to repeat: the order record is keyed by session id and only
    /// written when absent.
    pub fn verify(&self, request: &VerifyRequest, now: DateTime<Utc>) -> Result<VerifyResponse, NotaryError> {
        let session_id = request.session_id.trim();
        if session_id.is_empty() {
            return Err(NotaryError::validation("sessionId is required"));
        }
        if self.config.secret_key.is_none() {
            return Err(NotaryError::misconfigured("payment processor credentials missing"));
        }

        let mut attempt = Attempt::resume(session_id);
        attempt.advance(AttemptState::Verifying);

        let session = self.processor.retrieve_session(session_id).map_err(|e| match e {
            ProcessorError::NotFound(_) => {
                attempt.fail(NotaryError::NotFound(format!("checkout session not found: {session_id}")))
            }
            other => {
                tracing::error!(session_id, error = %other, "checkout session retrieval failed");
                attempt.fail(NotaryError::Upstream("could not verify checkout session".into()))
            }
        })?;

        let paid = session.payment_status == "paid";
        let cal_link = session.metadata.get("calLink").cloned();
        let currency = session
            .currency
            .clone()
            .unwrap_or_else(|| self.catalog_currency(&session));

        let response = VerifyResponse {
            paid,
            amount: session.amount_total,
            currency: currency.clone(),
            customer: Customer {
                email: session.customer_email.clone(),
                name: session.customer_name.clone(),
            },
            items: session
                .line_items
                .iter()
                .map(|li| VerifiedItem {
                    name: li.description.clone(),
                    qty: li.quantity,
                    price_id: li.price_id.clone(),
                })
                .collect(),
            cal_link: cal_link.clone(),
            failure_reason: if paid {
                None
            } else {
                Some(
                    session
                        .failure_reason
                        .clone()
                        .unwrap_or_else(|| format!("payment status: {}", session.payment_status)),
                )
            },
        };

        if !paid {
            attempt.advance(AttemptState::Failed);
            tracing::info!(session_id, status = %session.payment_status, "checkout session not paid");
            return Ok(response);
        }
        attempt.advance(AttemptState::Paid);

        let amount = session.amount_total.or_else(|| {
            session
                .metadata
                .get("total")
                .and_then(|total| total.parse().ok())
        });
        let record = OrderRecord {
            session_id: session.id.clone(),
            amount: amount.unwrap_or_default(),
            currency,
            customer_email: session.customer_email.clone().unwrap_or_default(),
            service_slug: session
                .metadata
                .get("serviceSlug")
                .cloned()
                .unwrap_or_default(),
            cal_link,
            status: OrderStatus::Paid,
            created_at: now.into(),
        };

        // the processor stays the source of truth, a failed write never flips `paid`
        match self.orders.insert_if_absent(&record) {
            Ok(true) => tracing::info!(session_id, amount = record.amount, "paid order recorded"),
            Ok(false) => tracing::debug!(session_id, "paid order already recorded"),
            Err(e) => tracing::warn!(session_id, error = %e, "failed to record paid order"),
        }

        Ok(response)
    }

    fn catalog_currency(&self, session: &ProcessorSession) -> String {
        session
            .metadata
            .get("serviceSlug")
            .and_then(|slug| self.catalog.service(slug))
            .map(|service| service.currency.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn client_key_wins() {
        let now = Utc::now();
        assert_eq!(idempotency_key(Some("abc"), "apostille", now), "abc");
        // blank keys fall back to the bucket hash
        assert_ne!(idempotency_key(Some("  "), "apostille", now), "  ");
    }

    #[test]
    fn bucket_boundaries() {
        let t0 = Utc.timestamp_opt(1_700_000_010, 0).unwrap(); // bucket start
        let t1 = Utc.timestamp_opt(1_700_000_039, 0).unwrap();
        let t2 = Utc.timestamp_opt(1_700_000_040, 0).unwrap();

        assert_eq!(idempotency_key(None, "s", t0), idempotency_key(None, "s", t1));
        assert_ne!(idempotency_key(None, "s", t1), idempotency_key(None, "s", t2));
        assert_ne!(idempotency_key(None, "s", t0), idempotency_key(None, "t", t0));
    }

    #[test]
    fn attempt_rejects_illegal_transition() {
        let mut attempt = Attempt::start("k".into());
        attempt.advance(AttemptState::Paid);
        assert_eq!(attempt.state(), AttemptState::Building);

        attempt.advance(AttemptState::RequestingSession);
        attempt.advance(AttemptState::AwaitingPayment);
        assert_eq!(attempt.state(), AttemptState::AwaitingPayment);
        assert!(!attempt.state().is_terminal());
    }

    #[test]
    fn call_parsing() {
        let probe: CheckoutCall = serde_json::from_str(r#"{"test": true}"#).unwrap();
        assert_eq!(probe, CheckoutCall::HealthCheck(HealthCheck { test: true }));

        let create: CheckoutCall = serde_json::from_str(
            r#"{"items": [{"serviceId": "apostille", "optionKeys": ["urgent"]}]}"#,
        )
        .unwrap();
        let CheckoutCall::Create(request) = create else {
            panic!("expected a create call");
        };
        assert_eq!(request.items[0].quantity, 1);
        assert!(request.items[0].add_on_ids.is_empty());
    }

    #[test]
    fn reply_serialization() {
        let health = serde_json::to_value(CheckoutReply::Health { ok: true }).unwrap();
        let session = serde_json::to_value(CheckoutReply::Session { url: "https://pay/x".into() }).unwrap();

        assert_eq!(health, serde_json::json!({"ok": true}));
        assert_eq!(session, serde_json::json!({"url": "https://pay/x"}));
    }
}
