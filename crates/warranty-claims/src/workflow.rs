use crate::settings::{AttachmentPolicy, ClaimSettings};
use jiff::Timestamp;
use std::sync::Arc;
use tracing::{debug, warn};
use typed_builder::TypedBuilder;
use warranty_core::{
    Actor, AttachmentScanner, Claim, ClaimCommit, ClaimId, ClaimStore, Clock, CommittedClaim,
    NewTimelineEvent, NoopNotifier, NotificationPayload, Notifier, RepairTicket, RequestKey,
    Result, StorageError, TicketId, TicketWrite, TimelineEventType, WarrantyError,
};

pub const CLAIM_SUBMITTED_TEMPLATE: &str = "warranty_claim_submitted";
pub const CLAIM_STATUS_TEMPLATE: &str = "warranty_claim_status_changed";
pub const APPROVAL_REQUIRED_TEMPLATE: &str = "warranty_repair_approval_required";

/// Dependencies shared by the claim, ticket and attachment services.
///
/// ```ignore
/// let workflow = Arc::new(
///     Workflow::builder()
///         .store(store)
///         .clock(clock)
///         .scanner(scanner)
///         .build(),
/// );
/// let claims = ClaimService::new(workflow.clone());
/// let tickets = TicketService::new(workflow.clone());
/// ```
#[derive(TypedBuilder)]
pub struct Workflow<S> {
    pub(crate) store: Arc<S>,
    pub(crate) clock: Arc<dyn Clock>,
    #[builder(default = Arc::new(NoopNotifier) as Arc<dyn Notifier>)]
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) scanner: Arc<dyn AttachmentScanner>,
    #[builder(default)]
    pub(crate) settings: ClaimSettings,
    #[builder(default)]
    pub(crate) policy: AttachmentPolicy,
}

pub(crate) fn event(
    actor: &Actor,
    event_type: TimelineEventType,
    description: impl Into<String>,
    visible_to_customer: bool,
    at: Timestamp,
) -> NewTimelineEvent {
    NewTimelineEvent {
        event_type,
        description: description.into(),
        actor_id: actor.id,
        actor_type: actor.actor_type,
        timestamp: at,
        visible_to_customer,
    }
}

/// Trims `value` and fails when nothing is left.
pub(crate) fn required(value: Option<String>, field: &str) -> Result<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| WarrantyError::invalid(field, "is required", None))
}

impl<S: ClaimStore> Workflow<S> {
    pub(crate) fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub(crate) async fn require_claim(&self, id: ClaimId) -> Result<Claim> {
        self.store
            .get_claim(id)
            .await?
            .ok_or_else(|| WarrantyError::not_found("claim", id))
    }

    pub(crate) async fn require_ticket(&self, id: TicketId) -> Result<RepairTicket> {
        self.store
            .get_ticket(id)
            .await?
            .ok_or_else(|| WarrantyError::not_found("repair ticket", id))
    }

    /// The current claim when `key` was already applied to it.
    pub(crate) async fn replayed(
        &self,
        key: Option<&RequestKey>,
        claim_id: ClaimId,
    ) -> Result<Option<Claim>> {
        let Some(key) = key else {
            return Ok(None);
        };
        match self.store.recall_request(key).await? {
            Some(id) if id == claim_id => {
                debug!(%key, claim_id = %id, "request replayed");
                Ok(Some(self.require_claim(id).await?))
            }
            Some(other) => Err(WarrantyError::Conflict(format!(
                "request key {key} was already used for claim {other}"
            ))),
            None => Ok(None),
        }
    }

    /// Applies a claim write. A concurrent request carrying the same key
    /// that won the race is reported as a replay.
    pub(crate) async fn commit(
        &self,
        commit: ClaimCommit,
        ticket: Option<TicketWrite>,
    ) -> Result<CommittedClaim> {
        let key = commit.request_key.clone();
        let claim_id = commit.claim.id;
        match self.store.commit_claim(commit, ticket).await {
            Ok(committed) => Ok(committed),
            Err(StorageError::Duplicate(detail)) => {
                match self.replayed(key.as_ref(), claim_id).await? {
                    Some(claim) => Ok(CommittedClaim {
                        ticket: self.store.active_ticket(claim.id).await?,
                        claim,
                        events: Vec::new(),
                    }),
                    None => Err(StorageError::Duplicate(detail).into()),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Appends one timeline entry, re-reading the claim when a concurrent
    /// write bumped its version.
    pub(crate) async fn append_event(
        &self,
        claim_id: ClaimId,
        event: NewTimelineEvent,
    ) -> Result<Claim> {
        for _ in 0..self.settings.commit_retries {
            let claim = self.require_claim(claim_id).await?;
            let commit = ClaimCommit {
                expected_version: claim.version,
                claim,
                events: vec![event.clone()],
                request_key: None,
            };
            match self.store.commit_claim(commit, None).await {
                Ok(committed) => return Ok(committed.claim),
                Err(StorageError::Conflict(_)) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(WarrantyError::Conflict(format!(
            "claim {claim_id} kept changing while appending to its timeline"
        )))
    }

    /// Best-effort customer notification. Failures are logged.
    pub(crate) async fn notify_customer(
        &self,
        claim: &Claim,
        template_id: &str,
        extra: impl IntoIterator<Item = (&'static str, String)>,
    ) {
        let mut payload = NotificationPayload::new();
        payload.insert("claim_number", claim.claim_number.clone());
        payload.insert("status", claim.status.to_string());
        payload.insert("customer_name", claim.contact.name.clone());
        payload.extend(extra);

        if let Err(err) = self
            .notifier
            .notify(&claim.contact.email, template_id, payload)
            .await
        {
            warn!(claim = %claim.claim_number, template_id, error = %err, "claim notification failed");
        }
    }
}
