//! Submission record and the types it is built from
use chrono::{DateTime, TimeZone, Utc};
use std::fmt;
use std::str::FromStr;

/// Durable checkpoint of the wizard. Declaration order is progression order.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WizardStep {
    #[n(0)]
    FormSubmitted,
    #[n(1)]
    ServiceSelected,
    #[n(2)]
    AddonsSelected,
    #[n(3)]
    Checkout,
    #[n(4)]
    Completed,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStatus {
    #[n(0)]
    Draft,
    #[n(1)]
    InProgress,
    #[n(2)]
    Completed,
    #[n(3)]
    Cancelled,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentType {
    #[n(0)]
    Personal,
    #[n(1)]
    Corporate,
    #[n(2)]
    Legal,
    #[n(3)]
    Others,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    #[n(0)]
    pub file_id: String,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub size: u64,
    #[n(3)]
    pub content_type: String,
    #[n(4)]
    pub folder_path: String,
}

/// The uploaded file list, held as one CBOR blob.
///
/// Only constructed through [`FileManifest::from_files`] or a validating
/// decode, so the bytes are always a valid encoding of a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileManifest(Vec<u8>);

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

// Submission is created at intake and mutated in place afterwards
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    #[n(0)]
    pub id: String, // bech32 encoded uuid7
    #[n(1)]
    pub client_email: String, // lowercased
    #[n(2)]
    pub full_name: String,
    #[n(3)]
    pub service_slug: Option<String>,
    #[n(4)]
    pub document_type: Option<DocumentType>,
    #[n(5)]
    pub uploaded_files: FileManifest,
    #[n(6)]
    pub selected_options: Vec<String>,
    #[n(7)]
    pub selected_add_ons: Vec<String>,
    #[n(8)]
    pub extra_copies: u32,
    #[n(9)]
    pub current_step: WizardStep,
    #[n(10)]
    pub status: SubmissionStatus,
    #[n(11)]
    pub total_amount_cents: Option<u64>,
    #[n(12)]
    pub currency: Option<String>,
    #[n(13)]
    pub created_at: TimeStamp<Utc>,
    #[n(14)]
    pub updated_at: TimeStamp<Utc>,
    #[n(15)]
    pub version: u64,
}

/// Partial update issued by a wizard step. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionPatch {
    pub document_type: Option<DocumentType>,
    pub uploaded_files: Option<Vec<UploadedFile>>,
    pub service_slug: Option<String>,
    pub selected_options: Option<Vec<String>>,
    pub selected_add_ons: Option<Vec<String>>,
    pub extra_copies: Option<u32>,
    pub total: Option<(u64, String)>,
    pub step: Option<WizardStep>,
    pub status: Option<SubmissionStatus>,
}

impl WizardStep {
    pub const ALL: [WizardStep; 5] = [
        WizardStep::FormSubmitted,
        WizardStep::ServiceSelected,
        WizardStep::AddonsSelected,
        WizardStep::Checkout,
        WizardStep::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WizardStep::FormSubmitted => "form_submitted",
            WizardStep::ServiceSelected => "service_selected",
            WizardStep::AddonsSelected => "addons_selected",
            WizardStep::Checkout => "checkout",
            WizardStep::Completed => "completed",
        }
    }
}

impl fmt::Display for WizardStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WizardStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WizardStep::ALL
            .into_iter()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| format!("unknown wizard step: {s}"))
    }
}

impl FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "personal" => Ok(DocumentType::Personal),
            "corporate" => Ok(DocumentType::Corporate),
            "legal" => Ok(DocumentType::Legal),
            "others" => Ok(DocumentType::Others),
            other => Err(format!("unknown document type: {other}")),
        }
    }
}

impl FileManifest {
    pub fn from_files(files: &[UploadedFile]) -> Result<Self, minicbor::encode::Error<std::convert::Infallible>> {
        Ok(Self(minicbor::to_vec(files)?))
    }

    pub fn files(&self) -> Result<Vec<UploadedFile>, minicbor::decode::Error> {
        minicbor::decode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Default for FileManifest {
    fn default() -> Self {
        // 0x80 is the CBOR empty array
        Self(vec![0x80])
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Into::into)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl Submission {
    /// A fresh record at the intake checkpoint.
    pub fn new(id: String, client_email: &str, full_name: &str, now: DateTime<Utc>) -> Self {
        Self {
            id,
            client_email: crate::utils::normalise_email(client_email),
            full_name: full_name.trim().to_string(),
            service_slug: None,
            document_type: None,
            uploaded_files: FileManifest::default(),
            selected_options: vec![],
            selected_add_ons: vec![],
            extra_copies: 0,
            current_step: WizardStep::FormSubmitted,
            status: SubmissionStatus::InProgress,
            total_amount_cents: None,
            currency: None,
            created_at: now.into(),
            updated_at: now.into(),
            version: 0,
        }
    }

    /// Merge a partial update. The step only ever moves forward and
    /// `updated_at`/`version` change on every call.
    pub fn apply(&mut self, patch: SubmissionPatch, now: DateTime<Utc>) -> anyhow::Result<()> {
        if let Some(document_type) = patch.document_type {
            self.document_type = Some(document_type);
        }
        if let Some(files) = patch.uploaded_files {
            self.uploaded_files = FileManifest::from_files(&files)?;
        }
        if let Some(slug) = patch.service_slug {
            self.service_slug = Some(slug);
        }
        if let Some(options) = patch.selected_options {
            self.selected_options = options;
        }
        if let Some(add_ons) = patch.selected_add_ons {
            self.selected_add_ons = add_ons;
        }
        if let Some(copies) = patch.extra_copies {
            self.extra_copies = copies;
        }
        if let Some((cents, currency)) = patch.total {
            self.total_amount_cents = Some(cents);
            self.currency = Some(currency);
        }
        if let Some(step) = patch.step {
            self.current_step = self.current_step.max(step);
        }
        if let Some(status) = patch.status {
            self.status = status;
        } else if self.current_step == WizardStep::Completed {
            self.status = SubmissionStatus::Completed;
        }

        self.updated_at = now.into();
        self.version += 1;
        Ok(())
    }

    /// Display-only object folder for client uploads of this submission.
    pub fn upload_folder(&self, scope_prefix: &str) -> String {
        crate::storage::ObjectPath::folder(scope_prefix, &self.client_email, &self.id)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

impl<C> minicbor::Encode<C> for FileManifest {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.bytes(&self.0)?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for FileManifest {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let bytes = d.bytes()?.to_vec();
        // reject anything that is not a list of files
        minicbor::decode::<Vec<UploadedFile>>(&bytes)?;

        Ok(FileManifest(bytes))
    }
}
