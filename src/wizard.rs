//! Wizard state machine
//!
//! The persisted [`WizardStep`] of a submission is the single source of
//! truth for where a client may be. Every screen asks [`resolve_screen`]
//! before rendering and every step operation re-checks it before writing,
//! so a replayed or duplicated screen re-syncs to the last durable
//! checkpoint instead of rewriting it.
use crate::catalog::{COURIER_ADD_ON, Catalog};
use crate::checkout::{CheckoutItem, CheckoutRequest};
use crate::error::NotaryError;
use crate::pricing::{self, Selection};
use crate::store::{StoreError, SubmissionStore};
use crate::submission::{
    DocumentType, Submission, SubmissionPatch, SubmissionStatus, UploadedFile, WizardStep,
};
use crate::utils::{looks_like_email, new_uuid_to_bech32};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Screen {
    Intake,
    DocumentType,
    ServiceSelection,
    AddOns,
    Checkout,
    Completion,
}

/// Where to send the client instead of the requested screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Catalog,
    Screen(Screen),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    Render,
    Redirect(Destination),
}

/// What to do when a step's write fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistencePolicy {
    /// Log and move on; the next render re-syncs to the durable step.
    #[default]
    OptimisticContinue,
    Block,
}

/// Handle threaded through the wizard by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WizardContext {
    pub submission_id: String,
    /// Version last seen; `None` skips the stale-update check.
    pub version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub context: WizardContext,
    pub go_to: Destination,
    pub persisted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entered {
    pub navigation: Navigation,
    pub submission: Option<Submission>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IntakeForm {
    pub client_email: String,
    pub full_name: String,
    pub service_slug: Option<String>,
    pub files: Vec<UploadedFile>,
}

impl Screen {
    pub const ALL: [Screen; 6] = [
        Screen::Intake,
        Screen::DocumentType,
        Screen::ServiceSelection,
        Screen::AddOns,
        Screen::Checkout,
        Screen::Completion,
    ];

    /// Checkpoint that must be durable before the screen may render.
    pub fn prerequisite(self) -> Option<WizardStep> {
        match self {
            Screen::Intake => None,
            Screen::DocumentType | Screen::ServiceSelection => Some(WizardStep::FormSubmitted),
            Screen::AddOns => Some(WizardStep::ServiceSelected),
            Screen::Checkout => Some(WizardStep::AddonsSelected),
            Screen::Completion => Some(WizardStep::Checkout),
        }
    }

    /// Screen a client resumes on for a persisted checkpoint.
    pub fn landing(step: WizardStep) -> Screen {
        match step {
            WizardStep::FormSubmitted => Screen::DocumentType,
            WizardStep::ServiceSelected => Screen::AddOns,
            WizardStep::AddonsSelected | WizardStep::Checkout => Screen::Checkout,
            WizardStep::Completed => Screen::Completion,
        }
    }
}

/// Pure step guard.
///
/// No submission, or a prerequisite not yet reached, sends the client to
/// the catalog. A screen behind the persisted checkpoint forwards to the
/// checkpoint's landing screen.
pub fn resolve_screen(persisted: Option<WizardStep>, requested: Screen) -> Navigation {
    let Some(step) = persisted else {
        return match requested {
            Screen::Intake => Navigation::Render,
            _ => Navigation::Redirect(Destination::Catalog),
        };
    };

    if let Some(required) = requested.prerequisite() {
        if step < required {
            return Navigation::Redirect(Destination::Catalog);
        }
    }

    let landing = Screen::landing(step);
    if landing > requested {
        return Navigation::Redirect(Destination::Screen(landing));
    }

    Navigation::Render
}

impl WizardContext {
    pub fn new(submission_id: impl Into<String>) -> Self {
        Self {
            submission_id: submission_id.into(),
            version: None,
        }
    }

    pub fn sync(&mut self, submission: &Submission) {
        self.version = Some(submission.version);
    }
}

impl StepOutcome {
    fn redirect(context: &WizardContext, navigation: Navigation) -> Self {
        let go_to = match navigation {
            Navigation::Redirect(destination) => destination,
            Navigation::Render => Destination::Catalog,
        };
        Self {
            context: context.clone(),
            go_to,
            persisted: false,
        }
    }
}

pub struct WizardService<S> {
    store: S,
    catalog: Catalog,
    tax_basis_points: u32,
    policy: PersistencePolicy,
}

// guard outcome for a step operation
enum Guard {
    Proceed(Option<Submission>),
    Stop(StepOutcome),
}

impl<S: SubmissionStore> WizardService<S> {
    pub fn new(store: S, catalog: Catalog, tax_basis_points: u32) -> Self {
        Self {
            store,
            catalog,
            tax_basis_points,
            policy: PersistencePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: PersistencePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Screen mount: decides whether to render and hands back the record.
    pub fn enter(&self, context: Option<&WizardContext>, screen: Screen) -> Result<Entered, NotaryError> {
        let submission = match context {
            None => None,
            Some(ctx) => match self.store.get(&ctx.submission_id) {
                Ok(sub) => Some(sub),
                Err(StoreError::NotFound(_)) => None,
                Err(e) => return Err(e.into()),
            },
        };

        let navigation = match &submission {
            Some(sub) if sub.status == SubmissionStatus::Cancelled => {
                Navigation::Redirect(Destination::Catalog)
            }
            Some(sub) => resolve_screen(Some(sub.current_step), screen),
            None => resolve_screen(None, screen),
        };

        Ok(Entered {
            navigation,
            submission,
        })
    }

    fn guard(&self, context: &WizardContext, screen: Screen) -> Result<Guard, NotaryError> {
        match self.enter(Some(context), screen) {
            Ok(Entered {
                navigation: Navigation::Render,
                submission,
            }) => Ok(Guard::Proceed(submission)),
            Ok(Entered { navigation, .. }) => {
                tracing::info!(submission = %context.submission_id, ?screen, ?navigation, "step replay redirected");
                Ok(Guard::Stop(StepOutcome::redirect(context, navigation)))
            }
            Err(e) if self.policy == PersistencePolicy::OptimisticContinue => {
                tracing::warn!(submission = %context.submission_id, error = %e, "step guard unavailable, continuing");
                Ok(Guard::Proceed(None))
            }
            Err(e) => Err(e),
        }
    }

    fn persist(
        &self,
        context: &WizardContext,
        patch: SubmissionPatch,
        next: Screen,
        now: DateTime<Utc>,
    ) -> Result<StepOutcome, NotaryError> {
        match self
            .store
            .update(&context.submission_id, context.version, patch, now)
        {
            Ok(submission) => {
                tracing::info!(
                    submission = %submission.id,
                    step = %submission.current_step,
                    version = submission.version,
                    "submission updated"
                );
                let mut context = context.clone();
                context.sync(&submission);
                Ok(StepOutcome {
                    context,
                    go_to: Destination::Screen(next),
                    persisted: true,
                })
            }
            Err(e) if self.policy == PersistencePolicy::OptimisticContinue => {
                tracing::warn!(
                    submission = %context.submission_id,
                    error = %e,
                    "submission update failed, continuing"
                );
                Ok(StepOutcome {
                    context: context.clone(),
                    go_to: Destination::Screen(next),
                    persisted: false,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Intake creates the submission; without a durable id nothing else works,
    /// so a failed create is always an error.
    pub fn submit_intake(&self, form: IntakeForm, now: DateTime<Utc>) -> Result<StepOutcome, NotaryError> {
        if !looks_like_email(&form.client_email) {
            return Err(NotaryError::validation("a valid email is required"));
        }
        if form.full_name.trim().is_empty() {
            return Err(NotaryError::validation("full name is required"));
        }
        if let Some(slug) = &form.service_slug {
            if self.catalog.service(slug).is_none() {
                return Err(NotaryError::validation(format!("unknown service: {slug}")));
            }
        }

        let id = new_uuid_to_bech32("sub_")
            .map_err(|e| NotaryError::misconfigured(format!("id generation failed: {e}")))?;
        let mut submission = Submission::new(id, &form.client_email, &form.full_name, now);
        submission.service_slug = form.service_slug;
        submission.uploaded_files = crate::submission::FileManifest::from_files(&form.files)
            .map_err(|e| NotaryError::validation(format!("invalid file list: {e}")))?;

        self.store.create(&submission)?;
        tracing::info!(submission = %submission.id, client = %submission.client_email, "submission created");

        let mut context = WizardContext::new(submission.id.clone());
        context.sync(&submission);

        Ok(StepOutcome {
            context,
            go_to: Destination::Screen(Screen::DocumentType),
            persisted: true,
        })
    }

    pub fn choose_document_type(
        &self,
        context: &WizardContext,
        document_type: DocumentType,
        now: DateTime<Utc>,
    ) -> Result<StepOutcome, NotaryError> {
        if let Guard::Stop(outcome) = self.guard(context, Screen::DocumentType)? {
            return Ok(outcome);
        }
        let patch = SubmissionPatch {
            document_type: Some(document_type),
            step: Some(WizardStep::FormSubmitted),
            ..Default::default()
        };
        self.persist(context, patch, Screen::ServiceSelection, now)
    }

    pub fn select_service(
        &self,
        context: &WizardContext,
        service_slug: &str,
        option_keys: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<StepOutcome, NotaryError> {
        let service = self
            .catalog
            .service(service_slug)
            .ok_or_else(|| NotaryError::validation(format!("unknown service: {service_slug}")))?;
        let selection = Selection {
            option_keys: option_keys.clone(),
            ..Default::default()
        };
        pricing::line_items(&self.catalog, service, &selection)
            .map_err(|e| NotaryError::validation(e.to_string()))?;

        if let Guard::Stop(outcome) = self.guard(context, Screen::ServiceSelection)? {
            return Ok(outcome);
        }
        let patch = SubmissionPatch {
            service_slug: Some(service_slug.to_string()),
            selected_options: Some(option_keys),
            step: Some(WizardStep::ServiceSelected),
            ..Default::default()
        };
        self.persist(context, patch, Screen::AddOns, now)
    }

    pub fn select_add_ons(
        &self,
        context: &WizardContext,
        add_on_ids: Vec<String>,
        extra_copies: u32,
        now: DateTime<Utc>,
    ) -> Result<StepOutcome, NotaryError> {
        if let Some(unknown) = add_on_ids.iter().find(|id| self.catalog.add_on(id).is_none()) {
            return Err(NotaryError::validation(format!("unknown add-on: {unknown}")));
        }
        // copies only mean something with courier delivery
        let extra_copies = if add_on_ids.iter().any(|id| id == COURIER_ADD_ON) {
            extra_copies
        } else {
            0
        };

        let submission = match self.guard(context, Screen::AddOns)? {
            Guard::Stop(outcome) => return Ok(outcome),
            Guard::Proceed(submission) => submission,
        };

        let total = submission.as_ref().and_then(|sub| {
            let service = self.catalog.service(sub.service_slug.as_deref()?)?;
            let selection = Selection {
                option_keys: sub.selected_options.clone(),
                add_on_ids: add_on_ids.clone(),
                extra_copies,
            };
            pricing::quote(&self.catalog, service, &selection, self.tax_basis_points)
                .ok()
                .map(|quote| (quote.total, quote.currency))
        });

        let patch = SubmissionPatch {
            selected_add_ons: Some(add_on_ids),
            extra_copies: Some(extra_copies),
            total,
            step: Some(WizardStep::AddonsSelected),
            ..Default::default()
        };
        self.persist(context, patch, Screen::Checkout, now)
    }

    /// Assembles the checkout payload from the persisted selections.
    pub fn checkout_payload(
        &self,
        context: &WizardContext,
        idempotency_key: Option<String>,
    ) -> Result<CheckoutRequest, NotaryError> {
        let submission = self.store.get(&context.submission_id)?;
        let service_id = submission
            .service_slug
            .clone()
            .ok_or_else(|| NotaryError::validation("no service selected"))?;

        Ok(CheckoutRequest {
            success_url: None,
            failure_url: None,
            items: vec![CheckoutItem {
                service_id,
                quantity: 1,
                add_on_ids: submission.selected_add_ons.clone(),
                option_keys: submission.selected_options.clone(),
                extra_copies: submission.extra_copies,
            }],
            idempotency_key,
            customer_email: Some(submission.client_email),
        })
    }

    pub fn begin_checkout(&self, context: &WizardContext, now: DateTime<Utc>) -> Result<StepOutcome, NotaryError> {
        if let Guard::Stop(outcome) = self.guard(context, Screen::Checkout)? {
            return Ok(outcome);
        }
        let patch = SubmissionPatch {
            step: Some(WizardStep::Checkout),
            ..Default::default()
        };
        self.persist(context, patch, Screen::Checkout, now)
    }

    /// Called once the payment has been verified as paid.
    pub fn complete(&self, context: &WizardContext, now: DateTime<Utc>) -> Result<StepOutcome, NotaryError> {
        if let Guard::Stop(outcome) = self.guard(context, Screen::Completion)? {
            return Ok(outcome);
        }
        let patch = SubmissionPatch {
            step: Some(WizardStep::Completed),
            status: Some(SubmissionStatus::Completed),
            ..Default::default()
        };
        self.persist(context, patch, Screen::Completion, now)
    }

    /// Abandons the order. The step is left where it was.
    pub fn cancel(&self, context: &WizardContext, now: DateTime<Utc>) -> Result<StepOutcome, NotaryError> {
        let submission = self.store.get(&context.submission_id)?;
        if submission.status == SubmissionStatus::Completed {
            return Err(NotaryError::validation("a completed submission cannot be cancelled"));
        }
        let patch = SubmissionPatch {
            status: Some(SubmissionStatus::Cancelled),
            ..Default::default()
        };
        let submission = self.store.update(&context.submission_id, context.version, patch, now)?;
        tracing::info!(submission = %submission.id, "submission cancelled");

        let mut context = context.clone();
        context.sync(&submission);
        Ok(StepOutcome {
            context,
            go_to: Destination::Catalog,
            persisted: true,
        })
    }
}
