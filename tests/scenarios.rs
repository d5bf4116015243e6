mod common;

use anyhow::Context;
use chrono::{Duration, TimeZone, Utc};
use common::{FakeDirectory, FakeProcessor, MemoryBlobStore, temp_store};
use notary_orders::{
    access::{AccessGrantService, FileRef, GrantRequest},
    catalog::Catalog,
    checkout::{CheckoutItem, CheckoutRequest, CheckoutService, VerifyRequest},
    config::{AccessConfig, CheckoutConfig, PurgeConfig},
    purge::PurgeJob,
    storage::{Access, Grantee, NOTARIZED_DOCS_PREFIX, ObjectPath, Permission},
    store::{FileIndex, OrderStore, SubmissionStore},
    submission::{DocumentType, SubmissionStatus, WizardStep},
    wizard::{Destination, IntakeForm, Navigation, Screen, WizardService},
};

fn checkout_config() -> CheckoutConfig {
    CheckoutConfig {
        secret_key: Some("sk_test_123".into()),
        success_url: Some("https://notary.example/checkout/success".into()),
        failure_url: Some("https://notary.example/checkout/failure".into()),
        ..Default::default()
    }
}

#[test]
fn order_from_intake_to_paid() -> anyhow::Result<()> {
    let (_dir, store) = temp_store("order_from_intake_to_paid")?;
    let catalog = Catalog::builtin();
    let now = Utc::now();

    let wizard = WizardService::new(&store, catalog.clone(), 2100);
    let processor = FakeProcessor::default();
    let checkout = CheckoutService::new(checkout_config(), catalog, &processor, &store);

    // intake creates the record at the first checkpoint
    let step = wizard
        .submit_intake(
            IntakeForm {
                client_email: "Jane.Doe@Example.com".into(),
                full_name: "Jane Doe".into(),
                service_slug: Some("power-of-attorney".into()),
                files: vec![],
            },
            now,
        )
        .context("intake failed")?;
    assert_eq!(step.go_to, Destination::Screen(Screen::DocumentType));

    let step = wizard.choose_document_type(&step.context, DocumentType::Legal, now)?;
    assert_eq!(step.go_to, Destination::Screen(Screen::ServiceSelection));

    let step = wizard.select_service(
        &step.context,
        "power-of-attorney",
        vec!["base".into(), "signature".into()],
        now,
    )?;
    assert_eq!(step.go_to, Destination::Screen(Screen::AddOns));

    let step = wizard.select_add_ons(&step.context, vec![], 0, now)?;
    assert!(step.persisted);

    let submission = store.get(&step.context.submission_id)?;
    assert_eq!(submission.current_step, WizardStep::AddonsSelected);
    assert_eq!(submission.total_amount_cents, Some(10_164));

    // the payload is rebuilt from the durable record
    let payload = wizard.checkout_payload(&step.context, None)?;
    let step = wizard.begin_checkout(&step.context, now)?;
    let created = checkout.create_session(&payload, now)?;
    assert_eq!(created.quote.total, 10_164);
    assert!(created.url.starts_with("https://pay.example/"));

    processor.mark_paid(&created.session_id, "Jane Doe");
    let verified = checkout.verify(
        &VerifyRequest {
            session_id: created.session_id.clone(),
        },
        now,
    )?;
    assert!(verified.paid);
    assert_eq!(verified.amount, Some(10_164));
    assert_eq!(verified.cal_link.as_deref(), Some("notary/power-of-attorney"));

    let order = store
        .get_order(&created.session_id)?
        .context("paid order was not recorded")?;
    assert_eq!(order.customer_email, "jane.doe@example.com");
    assert_eq!(order.service_slug, "power-of-attorney");

    let step = wizard.complete(&step.context, now)?;
    assert_eq!(step.go_to, Destination::Screen(Screen::Completion));
    let submission = store.get(&step.context.submission_id)?;
    assert_eq!(submission.status, SubmissionStatus::Completed);

    // a back-button visit to checkout now forwards to completion
    let entered = wizard.enter(Some(&step.context), Screen::Checkout)?;
    assert_eq!(
        entered.navigation,
        Navigation::Redirect(Destination::Screen(Screen::Completion))
    );

    Ok(())
}

// base 3500 plus signature 4900 at 21 % tax
#[test]
fn power_of_attorney_checkout_totals() -> anyhow::Result<()> {
    let (_dir, store) = temp_store("power_of_attorney_checkout_totals")?;
    let processor = FakeProcessor::default();
    let checkout = CheckoutService::new(checkout_config(), Catalog::builtin(), &processor, &store);

    let request = CheckoutRequest {
        items: vec![CheckoutItem {
            service_id: "power-of-attorney".into(),
            quantity: 1,
            add_on_ids: vec![],
            option_keys: vec!["base".into(), "signature".into()],
            extra_copies: 0,
        }],
        ..Default::default()
    };
    let created = checkout.create_session(&request, Utc::now())?;

    assert_eq!(created.quote.subtotal, 8400);
    assert_eq!(created.quote.tax, 1764);
    assert_eq!(created.quote.total, 10164);

    let sent = &processor.requests()[0];
    assert_eq!(sent.metadata["subtotal"], "8400");
    assert_eq!(sent.metadata["tax"], "1764");
    assert_eq!(sent.metadata["total"], "10164");
    assert_eq!(sent.metadata["serviceSlug"], "power-of-attorney");
    assert_eq!(sent.metadata["optionKeys"], "base,signature");
    // tax travels as its own line so the hosted total matches
    let charged: u64 = sent
        .line_items
        .iter()
        .map(|li| li.unit_amount * u64::from(li.quantity))
        .sum();
    assert_eq!(charged, 10164);

    Ok(())
}

// an email with no account fails the whole batch and touches nothing
#[test]
fn grant_for_unknown_client_is_not_found() -> anyhow::Result<()> {
    let blobs = MemoryBlobStore::default();
    let prior = vec![Permission::new(Access::Read, Grantee::User("someone-else".into()))];
    blobs.put("f1", "notarized-docs/ghost@example.com/b1/deed.pdf", Utc::now(), prior.clone());

    let service = AccessGrantService::new(
        AccessConfig {
            staff_team_id: Some("notaries".into()),
            bucket_id: Some("files".into()),
        },
        FakeDirectory::default(),
        &blobs,
    );

    let err = service
        .grant(&GrantRequest {
            client_email: "ghost@example.com".into(),
            files: vec![FileRef {
                file_id: "f1".into(),
                name: "deed.pdf".into(),
            }],
            batch_id: None,
        })
        .unwrap_err();

    assert_eq!(err.status(), 404);
    assert_eq!(err.to_string(), "Client user not found");
    assert_eq!(blobs.get("f1").unwrap().permissions, prior);

    Ok(())
}

// 7 day retention checked on day 10: day 2 goes, day 4 stays
#[test]
fn purge_removes_only_expired_client_uploads() -> anyhow::Result<()> {
    let blobs = MemoryBlobStore::default();
    let day = |d: u32| Utc.with_ymd_and_hms(2026, 3, d, 12, 0, 0).unwrap();

    blobs.put("a", "client-uploads/x@y.co/s1/old.pdf", day(2), vec![]);
    blobs.put("b", "client-uploads/x@y.co/s1/new.pdf", day(4), vec![]);

    let config = PurgeConfig {
        bucket_id: Some("files".into()),
        ..Default::default()
    };
    let summary = PurgeJob::new(&config, &blobs).run_at(day(10))?;

    assert_eq!(summary.examined, 2);
    assert_eq!(summary.deleted, 1);
    assert_eq!(blobs.ids(), vec!["b".to_string()]);

    Ok(())
}

#[test]
fn delivered_files_are_indexed_then_purged() -> anyhow::Result<()> {
    let (_dir, store) = temp_store("delivered_files_are_indexed_then_purged")?;
    let blobs = MemoryBlobStore::default();
    let uploaded = Utc::now() - Duration::days(30);

    let path = ObjectPath::new(NOTARIZED_DOCS_PREFIX, "Client@Example.com", "batch-1", "deed.pdf");
    blobs.put("f1", &path.to_string(), uploaded, vec![]);

    let grants = AccessGrantService::new(
        AccessConfig {
            staff_team_id: Some("notaries".into()),
            bucket_id: Some("files".into()),
        },
        FakeDirectory::default().with_account("client@example.com", "acct_42"),
        &blobs,
    );
    let response = grants.grant_indexed(
        &GrantRequest {
            client_email: "Client@Example.com".into(),
            files: vec![FileRef {
                file_id: "f1".into(),
                name: path.to_string(),
            }],
            batch_id: Some("batch-1".into()),
        },
        Some(&store),
    )?;
    assert!(response.results[0].ok);
    assert_eq!(store.files_for("client@example.com", Some("batch-1"))?.len(), 1);

    let config = PurgeConfig {
        bucket_id: Some("files".into()),
        ..Default::default()
    };
    let summary = PurgeJob::with_index(&config, &blobs, &store).run()?;

    assert_eq!(summary.deleted, 1);
    assert!(blobs.ids().is_empty());
    assert!(store.files_for("client@example.com", None)?.is_empty());

    Ok(())
}
