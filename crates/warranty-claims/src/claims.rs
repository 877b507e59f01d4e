use crate::attachments::{check_upload, UploadAttachment};
use crate::tickets::{cancel_open_ticket, start_ticket};
use crate::workflow::{event, required, Workflow, CLAIM_STATUS_TEMPLATE, CLAIM_SUBMITTED_TEMPLATE};
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use warranty_core::calendar::utc_year;
use warranty_core::claim::default_priority;
use warranty_core::deadline::within;
use warranty_core::{
    Actor, ActorId, BarcodeCode, BarcodeStatus, Claim, ClaimAction, ClaimCommit, ClaimFilter,
    ClaimId, ClaimStatus, ClaimStore, ContactSnapshot, ErrorKind, IssueCategory, Money,
    NewClaim, Page, Paged, Priority, ProductId, RequestKey, ResolutionType, Result, Role,
    SequenceKind, Severity, TimelineEvent, TimelineEventType, Violations, WarrantyError,
};

const MIN_ISSUE_LEN: usize = 10;
const MAX_ISSUE_LEN: usize = 5000;
const MAX_TAGS: usize = 20;

/// A customer's report of an issue against an activated barcode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitClaim {
    pub barcode: String,
    pub issue_category: IssueCategory,
    pub issue_description: String,
    pub severity: Severity,
    pub contact: ContactSnapshot,
    #[serde(default)]
    pub customer_notes: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<UploadAttachment>,
    #[serde(default)]
    pub request_key: Option<RequestKey>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidateClaim {
    pub notes: Option<String>,
    pub request_key: Option<RequestKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectClaim {
    pub reason: String,
    #[serde(default)]
    pub request_key: Option<RequestKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestInfo {
    pub message: String,
    #[serde(default)]
    pub request_key: Option<RequestKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignTechnician {
    pub technician_id: ActorId,
    #[serde(default)]
    pub estimated_completion_date: Option<Timestamp>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub request_key: Option<RequestKey>,
}

/// A generic transition from the claim state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatus {
    pub action: ClaimAction,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub repair_notes: Option<String>,
    /// Required when replacing the product.
    #[serde(default)]
    pub replacement_product_id: Option<ProductId>,
    #[serde(default)]
    pub request_key: Option<RequestKey>,
}

impl UpdateStatus {
    pub fn new(action: ClaimAction) -> Self {
        Self {
            action,
            notes: None,
            repair_notes: None,
            replacement_product_id: None,
            request_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteClaim {
    pub resolution_type: ResolutionType,
    pub resolution_notes: String,
    #[serde(default)]
    pub request_key: Option<RequestKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisputeClaim {
    pub reason: String,
    #[serde(default)]
    pub request_key: Option<RequestKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddNote {
    pub text: String,
    /// Ignored for customers, whose notes are always visible to them.
    #[serde(default)]
    pub visible_to_customer: bool,
    #[serde(default)]
    pub request_key: Option<RequestKey>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateCosts {
    pub shipping: Option<Money>,
    pub replacement: Option<Money>,
    pub request_key: Option<RequestKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkUpdate {
    pub claim_ids: Vec<ClaimId>,
    pub action: ClaimAction,
    #[serde(default)]
    pub notes: Option<String>,
    /// Each item is keyed as `<key>/<claim id>`, so a replayed bulk request
    /// skips the items that already went through.
    #[serde(default)]
    pub request_key: Option<RequestKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkFailure {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkItem {
    pub claim_id: ClaimId,
    pub status: Option<ClaimStatus>,
    pub error: Option<BulkFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkReport {
    pub items: Vec<BulkItem>,
    pub succeeded: usize,
    pub failed: usize,
}

/// Inputs of one state machine step. Each action reads the fields it needs.
#[derive(Debug, Clone, Default)]
pub(crate) struct Change {
    pub notes: Option<String>,
    pub reason: Option<String>,
    pub repair_notes: Option<String>,
    pub replacement_product_id: Option<ProductId>,
    pub technician: Option<ActorId>,
    pub estimated_completion_date: Option<Timestamp>,
    pub priority: Option<Priority>,
    pub resolution: Option<(ResolutionType, String)>,
    pub request_key: Option<RequestKey>,
}

fn authorize_action(actor: &Actor, claim: &Claim, action: ClaimAction) -> Result<()> {
    match action {
        ClaimAction::Dispute | ClaimAction::Cancel
            if actor.customer_id() == Some(claim.customer_id) =>
        {
            Ok(())
        }
        ClaimAction::Start
            if actor.has_role(Role::Technician) && claim.assigned_technician == Some(actor.id) =>
        {
            Ok(())
        }
        _ => actor.require_agent(action.as_str()),
    }
}

/// Customers may only touch their own claims.
pub(crate) fn authorize_read(actor: &Actor, claim: &Claim) -> Result<()> {
    match actor.customer_id() {
        Some(own) if own == claim.customer_id => Ok(()),
        Some(_) => Err(WarrantyError::Forbidden(format!(
            "claim {} belongs to another customer",
            claim.claim_number
        ))),
        None => actor.require_any(&[Role::Agent, Role::Admin, Role::Technician], "read claims"),
    }
}

fn redact_for(actor: &Actor, mut claim: Claim) -> Claim {
    if actor.customer_id().is_some() {
        claim.admin_notes = None;
    }
    claim
}

fn describe(action: ClaimAction, from: ClaimStatus, to: ClaimStatus, change: &Change) -> String {
    let mut text = match action {
        ClaimAction::Validate => "Claim validated".to_string(),
        ClaimAction::Reject => format!(
            "Claim rejected: {}",
            change.reason.as_deref().unwrap_or_default()
        ),
        ClaimAction::Assign => match change.technician {
            Some(technician) => format!("Technician {technician} assigned"),
            None => "Technician assigned".to_string(),
        },
        ClaimAction::Start => "Repair started".to_string(),
        ClaimAction::Complete => match &change.resolution {
            Some((resolution, _)) => format!("Claim completed with resolution {resolution}"),
            None => "Claim completed".to_string(),
        },
        ClaimAction::Dispute => format!(
            "Claim disputed: {}",
            change.reason.as_deref().unwrap_or_default()
        ),
        _ => format!("Status changed from {from} to {to}"),
    };
    if let Some(notes) = change.notes.as_deref().filter(|n| !n.trim().is_empty()) {
        text.push_str(" - ");
        text.push_str(notes.trim());
    }
    text
}

impl<S: ClaimStore> Workflow<S> {
    /// One step of the claim state machine: checks the edge and its gates,
    /// then commits the claim, its timeline entry and any ticket change
    /// together.
    pub(crate) async fn transition(
        &self,
        actor: &Actor,
        id: ClaimId,
        action: ClaimAction,
        change: Change,
    ) -> Result<Claim> {
        let claim = self.require_claim(id).await?;
        authorize_action(actor, &claim, action)?;
        if let Some(done) = self.replayed(change.request_key.as_ref(), id).await? {
            return Ok(done);
        }

        let from = claim.status;
        let to = from.apply(action, claim.disputed_from)?;
        let now = self.now();

        let mut next = claim.clone();
        let mut ticket = None;
        match action {
            ClaimAction::Validate => {
                next.validated_at = Some(now);
                next.validated_by = Some(actor.id);
                next.priority = default_priority(claim.severity, claim.issue_category);
            }
            ClaimAction::Reject => {
                next.rejection_reason = Some(required(change.reason.clone(), "reason")?);
            }
            ClaimAction::Assign => {
                let technician = change.technician.ok_or_else(|| {
                    WarrantyError::invalid("technician_id", "is required", None)
                })?;
                next.assigned_technician = Some(technician);
                if let Some(eta) = change.estimated_completion_date {
                    next.estimated_completion_date = Some(eta);
                }
                if let Some(priority) = change.priority {
                    next.priority = priority;
                }
            }
            ClaimAction::Start => {
                let live = self.store.active_ticket(id).await?.ok_or_else(|| {
                    WarrantyError::precondition(
                        "repair_ticket_required",
                        format!("claim {} has no repair ticket to start", claim.claim_number),
                    )
                })?;
                ticket = Some(start_ticket(live, now)?);
            }
            ClaimAction::Repair | ClaimAction::Replace => {
                let live = self.store.active_ticket(id).await?;
                let Some(live) = live.filter(|t| t.clears_resolution_gate()) else {
                    return Err(WarrantyError::precondition(
                        "repair_ticket_not_approved",
                        format!(
                            "claim {} needs a completed, quality-approved repair ticket",
                            claim.claim_number
                        ),
                    ));
                };
                if action == ClaimAction::Replace {
                    let product = change.replacement_product_id.ok_or_else(|| {
                        WarrantyError::invalid("replacement_product_id", "is required", None)
                    })?;
                    next.replacement_product_id = Some(product);
                }
                next.actual_completion_date = live.actual_completion_date;
                next.costs.repair = live.total_cost.unwrap_or(Money::ZERO);
            }
            ClaimAction::Complete => {
                let (resolution, notes) = change.resolution.clone().ok_or_else(|| {
                    WarrantyError::invalid("resolution_type", "is required", None)
                })?;
                let notes = required(Some(notes), "resolution_notes")?;
                if claim.resolution_type.is_some() || claim.completed_at.is_some() {
                    return Err(WarrantyError::invalid_state("claim", from, "complete"));
                }
                next.resolution_type = Some(resolution);
                next.resolution_notes = Some(notes);
                next.completed_at = Some(now);
                next.actual_completion_date.get_or_insert(now);
                next.disputed_from = None;
            }
            ClaimAction::Dispute => {
                required(change.reason.clone(), "reason")?;
                next.disputed_from = Some(from);
            }
            ClaimAction::Resolve => {
                next.disputed_from = None;
            }
            ClaimAction::Cancel | ClaimAction::Ship | ClaimAction::Deliver => {}
        }
        if to.is_terminal() {
            if let Some(live) = self.store.active_ticket(id).await? {
                ticket = cancel_open_ticket(live, now);
            }
        }

        if let Some(repair_notes) = change.repair_notes.clone() {
            next.repair_notes = Some(repair_notes);
        }
        if actor.customer_id().is_none() {
            if let Some(notes) = change.notes.clone() {
                next.admin_notes = Some(notes);
            }
        }
        next.set_status(to, actor.id, now);

        let entry = event(actor, action.event_type(), describe(action, from, to, &change), true, now);
        let committed = self
            .commit(
                ClaimCommit {
                    expected_version: claim.version,
                    claim: next,
                    events: vec![entry],
                    request_key: change.request_key,
                },
                ticket,
            )
            .await?;
        let claim = committed.claim;
        if committed.events.is_empty() {
            return Ok(claim);
        }
        info!(claim = %claim.claim_number, %from, to = %claim.status, %action, actor = %actor.id, "claim transitioned");

        if claim.resolution_type == Some(ResolutionType::Replace) && action == ClaimAction::Complete {
            // The replaced unit's warranty ends here. The claim is already
            // committed, so a failure is only logged.
            if let Err(err) = self
                .store
                .update_status(claim.barcode_id, BarcodeStatus::Active, BarcodeStatus::Claimed, actor.id, now)
                .await
            {
                warn!(claim = %claim.claim_number, barcode = %claim.barcode, error = %err, "could not mark barcode claimed");
            }
        }

        self.notify_customer(&claim, CLAIM_STATUS_TEMPLATE, [("previous_status", from.to_string())])
            .await;
        Ok(claim)
    }
}

/// Customer and agent surface of the claim workflow.
pub struct ClaimService<S> {
    workflow: Arc<Workflow<S>>,
}

impl<S> Clone for ClaimService<S> {
    fn clone(&self) -> Self {
        Self {
            workflow: self.workflow.clone(),
        }
    }
}

impl<S: ClaimStore> ClaimService<S> {
    pub fn new(workflow: Arc<Workflow<S>>) -> Self {
        Self { workflow }
    }

    fn timeout(&self) -> std::time::Duration {
        self.workflow.settings.request_timeout
    }

    fn validate_submission(&self, request: &SubmitClaim) -> Result<BarcodeCode> {
        let description_len = request.issue_description.trim().chars().count();
        let mut violations = Violations::new();
        violations
            .check(
                (MIN_ISSUE_LEN..=MAX_ISSUE_LEN).contains(&description_len),
                "issue_description",
                format!("must be {MIN_ISSUE_LEN}-{MAX_ISSUE_LEN} characters"),
                || None,
            )
            .check(
                !request.contact.name.trim().is_empty(),
                "contact.name",
                "is required",
                || None,
            )
            .check(
                request.contact.email.contains('@'),
                "contact.email",
                "must be an email address",
                || Some(request.contact.email.clone()),
            )
            .check(
                request.tags.len() <= MAX_TAGS,
                "tags",
                format!("at most {MAX_TAGS} tags"),
                || None,
            );
        for (i, attachment) in request.attachments.iter().enumerate() {
            if let Err(WarrantyError::InvalidArgument(fields)) =
                check_upload(&self.workflow.policy, attachment)
            {
                for mut field in fields {
                    field.field = format!("attachments[{i}].{}", field.field);
                    violations.push(field);
                }
            }
        }

        let code = match BarcodeCode::parse(&request.barcode) {
            Ok(code) => Some(code),
            Err(WarrantyError::InvalidArgument(fields)) => {
                fields.into_iter().for_each(|f| violations.push(f));
                None
            }
            Err(other) => return Err(other),
        };
        violations.finish()?;

        // Size limits are reported as their own kind.
        for attachment in &request.attachments {
            check_upload(&self.workflow.policy, attachment)?;
        }
        code.ok_or_else(|| WarrantyError::invalid("barcode", "is required", None))
    }

    /// Opens a `pending` claim against the caller's active barcode.
    #[instrument(skip_all, fields(actor = %actor.id, barcode = %request.barcode))]
    pub async fn submit(&self, actor: &Actor, request: SubmitClaim) -> Result<Claim> {
        let customer_id = actor.customer_id().ok_or_else(|| {
            WarrantyError::Forbidden(format!("{} {} may not submit claims", actor.actor_type, actor.id))
        })?;
        let code = self.validate_submission(&request)?;
        let wf = &self.workflow;

        within(self.timeout(), "claim.submit", async {
            if let Some(key) = &request.request_key {
                if let Some(id) = wf.store.recall_request(key).await? {
                    let claim = wf.require_claim(id).await?;
                    authorize_read(actor, &claim)?;
                    return Ok(redact_for(actor, claim));
                }
            }

            let barcode = wf
                .store
                .get_by_code(&code)
                .await?
                .ok_or_else(|| WarrantyError::not_found("barcode", &code))?;
            if barcode.customer_id != Some(customer_id) {
                return Err(WarrantyError::Forbidden(format!(
                    "barcode {code} is not registered to {customer_id}"
                )));
            }
            let now = wf.now();
            match barcode.status {
                BarcodeStatus::Active if barcode.is_expired(now) => {
                    return Err(WarrantyError::precondition(
                        "warranty_expired",
                        format!("warranty of {code} has expired"),
                    ));
                }
                BarcodeStatus::Active => {}
                BarcodeStatus::Claimed => {
                    return Err(WarrantyError::precondition(
                        "warranty_claimed",
                        format!("warranty of {code} was already used for a replacement"),
                    ));
                }
                BarcodeStatus::Expired => {
                    return Err(WarrantyError::precondition(
                        "warranty_expired",
                        format!("warranty of {code} has expired"),
                    ));
                }
                BarcodeStatus::Generated | BarcodeStatus::Revoked => {
                    return Err(WarrantyError::precondition(
                        "warranty_inactive",
                        format!("warranty of {code} is not active"),
                    ));
                }
            }
            if let Some(open) = wf.store.open_claim_for_barcode(barcode.id).await? {
                return Err(WarrantyError::Conflict(format!(
                    "barcode {code} already has open claim {}",
                    open.claim_number
                )));
            }

            let sequence = wf.store.next_sequence(SequenceKind::Claim, utc_year(now)).await?;
            let new = NewClaim {
                claim_number: SequenceKind::Claim.format(utc_year(now), sequence),
                barcode_id: barcode.id,
                barcode: barcode.code.clone(),
                customer_id,
                product_id: barcode.product_id,
                storefront_id: barcode.storefront_id,
                issue_category: request.issue_category,
                issue_description: request.issue_description.trim().to_string(),
                severity: request.severity,
                priority: Priority::Normal,
                contact: request.contact,
                customer_notes: request.customer_notes,
                tags: request.tags,
                submitted_by: actor.id,
                claim_date: now,
            };
            let submitted = event(
                actor,
                TimelineEventType::Submitted,
                format!("Claim submitted for {code}"),
                true,
                now,
            );
            let mut claim = wf
                .store
                .create_claim(new, submitted, request.request_key)
                .await?
                .claim;
            info!(claim = %claim.claim_number, claim_id = %claim.id, "claim submitted");

            if !request.attachments.is_empty() {
                for attachment in request.attachments {
                    wf.attach(actor, &claim, attachment).await?;
                }
                claim = wf.require_claim(claim.id).await?;
            }

            wf.notify_customer(&claim, CLAIM_SUBMITTED_TEMPLATE, []).await;
            Ok(claim)
        })
        .await
    }

    async fn run(&self, actor: &Actor, id: ClaimId, action: ClaimAction, change: Change) -> Result<Claim> {
        let claim = within(
            self.timeout(),
            "claim.transition",
            self.workflow.transition(actor, id, action, change),
        )
        .await?;
        Ok(redact_for(actor, claim))
    }

    pub async fn validate(&self, actor: &Actor, id: ClaimId, request: ValidateClaim) -> Result<Claim> {
        actor.require_agent("validate claims")?;
        let change = Change {
            notes: request.notes,
            request_key: request.request_key,
            ..Default::default()
        };
        self.run(actor, id, ClaimAction::Validate, change).await
    }

    pub async fn reject(&self, actor: &Actor, id: ClaimId, request: RejectClaim) -> Result<Claim> {
        actor.require_agent("reject claims")?;
        let change = Change {
            reason: Some(required(Some(request.reason), "reason")?),
            request_key: request.request_key,
            ..Default::default()
        };
        self.run(actor, id, ClaimAction::Reject, change).await
    }

    /// Asks the customer for more detail. The claim stays `pending`.
    pub async fn request_info(&self, actor: &Actor, id: ClaimId, request: RequestInfo) -> Result<Claim> {
        actor.require_agent("request claim information")?;
        let message = required(Some(request.message), "message")?;
        let wf = &self.workflow;

        within(self.timeout(), "claim.request_info", async {
            let claim = wf.require_claim(id).await?;
            if let Some(done) = wf.replayed(request.request_key.as_ref(), id).await? {
                return Ok(done);
            }
            if claim.status != ClaimStatus::Pending {
                return Err(WarrantyError::invalid_state("claim", claim.status, "request information on"));
            }
            let now = wf.now();
            let entry = event(
                actor,
                TimelineEventType::NoteAdded,
                format!("More information requested: {message}"),
                true,
                now,
            );
            let committed = wf
                .commit(
                    ClaimCommit {
                        expected_version: claim.version,
                        claim,
                        events: vec![entry],
                        request_key: request.request_key,
                    },
                    None,
                )
                .await?;
            wf.notify_customer(&committed.claim, CLAIM_STATUS_TEMPLATE, [("message", message)])
                .await;
            Ok(committed.claim)
        })
        .await
    }

    pub async fn assign_technician(
        &self,
        actor: &Actor,
        id: ClaimId,
        request: AssignTechnician,
    ) -> Result<Claim> {
        actor.require_agent("assign technicians")?;
        let change = Change {
            technician: Some(request.technician_id),
            estimated_completion_date: request.estimated_completion_date,
            priority: request.priority,
            request_key: request.request_key,
            ..Default::default()
        };
        self.run(actor, id, ClaimAction::Assign, change).await
    }

    /// Any legal transition of the state machine.
    pub async fn update_status(&self, actor: &Actor, id: ClaimId, request: UpdateStatus) -> Result<Claim> {
        let change = match request.action {
            ClaimAction::Reject | ClaimAction::Dispute => Change {
                reason: request.notes.clone(),
                notes: None,
                repair_notes: request.repair_notes,
                request_key: request.request_key,
                ..Default::default()
            },
            _ => Change {
                notes: request.notes,
                repair_notes: request.repair_notes,
                replacement_product_id: request.replacement_product_id,
                request_key: request.request_key,
                ..Default::default()
            },
        };
        self.run(actor, id, request.action, change).await
    }

    /// Applies one action to up to `max_bulk` claims. Every claim is checked
    /// on its own; failures are reported per item.
    #[instrument(skip_all, fields(actor = %actor.id, action = %request.action, count = request.claim_ids.len()))]
    pub async fn bulk_update(&self, actor: &Actor, request: BulkUpdate) -> Result<BulkReport> {
        actor.require_agent("bulk update claims")?;
        let max = self.workflow.settings.max_bulk;
        if request.claim_ids.is_empty() || request.claim_ids.len() > max {
            return Err(WarrantyError::invalid(
                "claim_ids",
                format!("must contain between 1 and {max} claims"),
                Some(request.claim_ids.len().to_string()),
            ));
        }

        let mut items = Vec::with_capacity(request.claim_ids.len());
        for id in request.claim_ids {
            let change = Change {
                notes: request.notes.clone(),
                reason: request.notes.clone(),
                request_key: request
                    .request_key
                    .as_ref()
                    .map(|key| RequestKey::new(format!("{key}/{id}"))),
                ..Default::default()
            };
            let item = match self.run(actor, id, request.action, change).await {
                Ok(claim) => BulkItem {
                    claim_id: id,
                    status: Some(claim.status),
                    error: None,
                },
                Err(err) => BulkItem {
                    claim_id: id,
                    status: None,
                    error: Some(BulkFailure {
                        kind: err.kind(),
                        message: err.to_string(),
                    }),
                },
            };
            items.push(item);
        }

        let failed = items.iter().filter(|item| item.error.is_some()).count();
        let succeeded = items.len() - failed;
        info!(succeeded, failed, "bulk update finished");
        Ok(BulkReport {
            items,
            succeeded,
            failed,
        })
    }

    /// Closes the claim with its resolution. Resolution fields are written
    /// once.
    pub async fn complete(&self, actor: &Actor, id: ClaimId, request: CompleteClaim) -> Result<Claim> {
        actor.require_agent("complete claims")?;
        let change = Change {
            resolution: Some((request.resolution_type, request.resolution_notes)),
            request_key: request.request_key,
            ..Default::default()
        };
        self.run(actor, id, ClaimAction::Complete, change).await
    }

    /// Disputes an open claim. The customer owning it or an agent may do so.
    pub async fn dispute(&self, actor: &Actor, id: ClaimId, request: DisputeClaim) -> Result<Claim> {
        let change = Change {
            reason: Some(required(Some(request.reason), "reason")?),
            request_key: request.request_key,
            ..Default::default()
        };
        self.run(actor, id, ClaimAction::Dispute, change).await
    }

    /// Returns a disputed claim to the status it was disputed from.
    pub async fn resolve_dispute(
        &self,
        actor: &Actor,
        id: ClaimId,
        notes: Option<String>,
        request_key: Option<RequestKey>,
    ) -> Result<Claim> {
        actor.require_agent("resolve disputes")?;
        let change = Change {
            notes,
            request_key,
            ..Default::default()
        };
        self.run(actor, id, ClaimAction::Resolve, change).await
    }

    pub async fn add_note(&self, actor: &Actor, id: ClaimId, request: AddNote) -> Result<Claim> {
        let text = required(Some(request.text), "text")?;
        let wf = &self.workflow;

        within(self.timeout(), "claim.add_note", async {
            let claim = wf.require_claim(id).await?;
            authorize_read(actor, &claim)?;
            if let Some(done) = wf.replayed(request.request_key.as_ref(), id).await? {
                return Ok(redact_for(actor, done));
            }
            let visible = actor.customer_id().is_some() || request.visible_to_customer;
            let entry = event(actor, TimelineEventType::NoteAdded, text, visible, wf.now());
            let committed = wf
                .commit(
                    ClaimCommit {
                        expected_version: claim.version,
                        claim,
                        events: vec![entry],
                        request_key: request.request_key,
                    },
                    None,
                )
                .await?;
            Ok(redact_for(actor, committed.claim))
        })
        .await
    }

    /// Sets shipping and replacement costs. The total is derived.
    pub async fn update_costs(&self, actor: &Actor, id: ClaimId, request: UpdateCosts) -> Result<Claim> {
        actor.require_agent("update claim costs")?;
        let wf = &self.workflow;

        within(self.timeout(), "claim.update_costs", async {
            let claim = wf.require_claim(id).await?;
            if let Some(done) = wf.replayed(request.request_key.as_ref(), id).await? {
                return Ok(done);
            }
            if claim.status.is_terminal() {
                return Err(WarrantyError::invalid_state("claim", claim.status, "update costs of"));
            }
            let mut next = claim.clone();
            if let Some(shipping) = request.shipping {
                next.costs.shipping = shipping;
            }
            if let Some(replacement) = request.replacement {
                next.costs.replacement = replacement;
            }
            let entry = event(
                actor,
                TimelineEventType::NoteAdded,
                format!(
                    "Costs updated: repair {}, shipping {}, replacement {}, total {}",
                    next.costs.repair,
                    next.costs.shipping,
                    next.costs.replacement,
                    next.total_cost()
                ),
                false,
                wf.now(),
            );
            let committed = wf
                .commit(
                    ClaimCommit {
                        expected_version: claim.version,
                        claim: next,
                        events: vec![entry],
                        request_key: request.request_key,
                    },
                    None,
                )
                .await?;
            Ok(committed.claim)
        })
        .await
    }

    pub async fn get(&self, actor: &Actor, id: ClaimId) -> Result<Claim> {
        let claim = within(self.timeout(), "claim.get", self.workflow.require_claim(id)).await?;
        authorize_read(actor, &claim)?;
        Ok(redact_for(actor, claim))
    }

    pub async fn get_by_number(&self, actor: &Actor, number: &str) -> Result<Claim> {
        let claim = within(self.timeout(), "claim.get", async {
            self.workflow
                .store
                .get_claim_by_number(number)
                .await?
                .ok_or_else(|| WarrantyError::not_found("claim", number))
        })
        .await?;
        authorize_read(actor, &claim)?;
        Ok(redact_for(actor, claim))
    }

    /// Lists claims, newest first. A customer's listing is narrowed to their
    /// own claims.
    pub async fn list(&self, actor: &Actor, mut filter: ClaimFilter, page: Page) -> Result<Paged<Claim>> {
        match actor.customer_id() {
            Some(own) => filter.customer_id = Some(own),
            None => actor.require_any(&[Role::Agent, Role::Admin, Role::Technician], "list claims")?,
        }
        let paged = within(self.timeout(), "claim.list", async {
            Ok(self.workflow.store.list_claims(&filter, page).await?)
        })
        .await?;
        Ok(paged.map(|claim| redact_for(actor, claim)))
    }

    /// Full timeline for staff.
    pub async fn timeline(&self, actor: &Actor, id: ClaimId) -> Result<Vec<TimelineEvent>> {
        actor.require_any(&[Role::Agent, Role::Admin, Role::Technician], "read claim timelines")?;
        within(self.timeout(), "claim.timeline", async {
            self.workflow.require_claim(id).await?;
            Ok(self.workflow.store.timeline(id).await?)
        })
        .await
    }

    /// The entries of a claim's timeline its customer may see.
    pub async fn timeline_for_customer(&self, actor: &Actor, id: ClaimId) -> Result<Vec<TimelineEvent>> {
        within(self.timeout(), "claim.timeline", async {
            let claim = self.workflow.require_claim(id).await?;
            authorize_read(actor, &claim)?;
            let mut events = self.workflow.store.timeline(id).await?;
            events.retain(|event| event.visible_to_customer);
            Ok(events)
        })
        .await
    }

    /// Deletes a claim with its tickets, attachments and timeline.
    #[instrument(skip_all, fields(actor = %actor.id, claim_id = %id))]
    pub async fn delete(&self, actor: &Actor, id: ClaimId) -> Result<()> {
        actor.require_admin("delete claims")?;
        within(self.timeout(), "claim.delete", async {
            if self.workflow.store.delete_claim(id).await? {
                info!("claim deleted");
                Ok(())
            } else {
                Err(WarrantyError::not_found("claim", id))
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change() -> Change {
        Change::default()
    }

    #[test]
    fn descriptions_name_the_step() {
        use ClaimStatus as S;
        assert_eq!(
            describe(ClaimAction::Ship, S::Repaired, S::Shipped, &change()),
            "Status changed from repaired to shipped"
        );

        let with_reason = Change {
            reason: Some("receipt does not match".into()),
            ..change()
        };
        assert_eq!(
            describe(ClaimAction::Reject, S::Pending, S::Rejected, &with_reason),
            "Claim rejected: receipt does not match"
        );

        let with_notes = Change {
            notes: Some(" courier 42 ".into()),
            ..change()
        };
        assert_eq!(
            describe(ClaimAction::Ship, S::Repaired, S::Shipped, &with_notes),
            "Status changed from repaired to shipped - courier 42"
        );
    }
}
