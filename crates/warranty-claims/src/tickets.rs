//! Repair tickets: the technician side of a claim.
//!
//! Every ticket write rides on a claim commit, so the ticket, the claim's
//! cost fields and the timeline entry change together.

use crate::claims::{authorize_read, Change};
use crate::workflow::{event, required, Workflow, APPROVAL_REQUIRED_TEMPLATE};
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use warranty_core::calendar::utc_year;
use warranty_core::deadline::within;
use warranty_core::ticket::{MAX_ESTIMATED_HOURS, MIN_DESCRIPTION_LEN, MIN_ESTIMATED_HOURS};
use warranty_core::{
    Actor, ActorId, Claim, ClaimAction, ClaimCommit, ClaimId, ClaimStatus, ClaimStore,
    CustomerApprovalStatus, Money, NewTicket, NewTimelineEvent, Priority, QualityCheckStatus,
    RepairTicket, RequestKey, Result, Role, SequenceKind, TicketId, TicketStatus, TicketWrite,
    TimelineEventType, Violations, WarrantyError,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTicket {
    #[serde(default)]
    pub priority: Option<Priority>,
    pub estimated_hours: f64,
    pub description: String,
    #[serde(default)]
    pub required_parts: Vec<String>,
    #[serde(default)]
    pub special_instructions: Option<String>,
    #[serde(default)]
    pub customer_approval_required: bool,
    #[serde(default)]
    pub estimated_cost: Option<Money>,
    #[serde(default)]
    pub estimated_completion_date: Option<Timestamp>,
    #[serde(default)]
    pub request_key: Option<RequestKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignTicket {
    pub technician_id: ActorId,
    #[serde(default)]
    pub estimated_completion_date: Option<Timestamp>,
    #[serde(default)]
    pub request_key: Option<RequestKey>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompleteTicket {
    pub actual_hours: f64,
    #[serde(default)]
    pub used_parts: Vec<String>,
    #[serde(default)]
    pub repair_notes: Option<String>,
    #[serde(default)]
    pub test_results: Option<String>,
    pub labor_cost: Money,
    pub parts_cost: Money,
    #[serde(default)]
    pub request_key: Option<RequestKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityCheck {
    pub approved: bool,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub request_key: Option<RequestKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerApproval {
    pub approved: bool,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub request_key: Option<RequestKey>,
}

/// Moves an assigned ticket to `in_progress`.
pub(crate) fn start_ticket(mut ticket: RepairTicket, at: Timestamp) -> Result<TicketWrite> {
    if ticket.status != TicketStatus::Assigned {
        return Err(WarrantyError::invalid_state("repair ticket", ticket.status, "start"));
    }
    let expected_version = ticket.version;
    ticket.status = TicketStatus::InProgress;
    ticket.started_at = Some(at);
    ticket.updated_at = at;
    Ok(TicketWrite::Update {
        ticket,
        expected_version,
    })
}

/// Withdraws a ticket whose claim closed before the work was finished.
/// Finished tickets are left as they are.
pub(crate) fn cancel_open_ticket(mut ticket: RepairTicket, at: Timestamp) -> Option<TicketWrite> {
    if matches!(ticket.status, TicketStatus::Completed | TicketStatus::Cancelled) {
        return None;
    }
    let expected_version = ticket.version;
    ticket.status = TicketStatus::Cancelled;
    ticket.updated_at = at;
    Some(TicketWrite::Update {
        ticket,
        expected_version,
    })
}

fn validate_create(request: &CreateTicket) -> Result<()> {
    let mut violations = Violations::new();
    violations
        .check(
            (MIN_ESTIMATED_HOURS..=MAX_ESTIMATED_HOURS).contains(&request.estimated_hours),
            "estimated_hours",
            format!("must be between {MIN_ESTIMATED_HOURS} and {MAX_ESTIMATED_HOURS}"),
            || Some(request.estimated_hours.to_string()),
        )
        .check(
            request.description.trim().chars().count() >= MIN_DESCRIPTION_LEN,
            "description",
            format!("at least {MIN_DESCRIPTION_LEN} characters"),
            || None,
        )
        .check(
            request.required_parts.iter().all(|p| !p.trim().is_empty()),
            "required_parts",
            "must not contain blank entries",
            || None,
        );
    violations.finish()
}

fn validate_complete(request: &CompleteTicket) -> Result<()> {
    let mut violations = Violations::new();
    violations.check(
        request.actual_hours > 0.0 && request.actual_hours <= MAX_ESTIMATED_HOURS,
        "actual_hours",
        format!("must be greater than 0 and at most {MAX_ESTIMATED_HOURS}"),
        || Some(request.actual_hours.to_string()),
    );
    violations.finish()
}

/// Stages a ticket update and its timeline entry on top of the claim.
struct TicketStep {
    claim: Claim,
    ticket: RepairTicket,
    events: Vec<NewTimelineEvent>,
}

pub struct TicketService<S> {
    workflow: Arc<Workflow<S>>,
}

impl<S> Clone for TicketService<S> {
    fn clone(&self) -> Self {
        Self {
            workflow: self.workflow.clone(),
        }
    }
}

impl<S: ClaimStore> TicketService<S> {
    pub fn new(workflow: Arc<Workflow<S>>) -> Self {
        Self { workflow }
    }

    fn timeout(&self) -> std::time::Duration {
        self.workflow.settings.request_timeout
    }

    /// The ticket after a replayed request, or `None` for a fresh one.
    /// Callers authorize the actor before asking.
    async fn replayed_ticket(
        &self,
        key: Option<&RequestKey>,
        claim_id: ClaimId,
    ) -> Result<Option<RepairTicket>> {
        match self.workflow.replayed(key, claim_id).await? {
            Some(_) => Ok(self.workflow.store.active_ticket(claim_id).await?),
            None => Ok(None),
        }
    }

    /// Commits a staged step, keyed by `request_key`.
    async fn apply(&self, step: TicketStep, request_key: Option<RequestKey>) -> Result<RepairTicket> {
        let expected_version = step.ticket.version;
        let ticket_number = step.ticket.ticket_number.clone();
        let committed = self
            .workflow
            .commit(
                ClaimCommit {
                    expected_version: step.claim.version,
                    claim: step.claim,
                    events: step.events,
                    request_key,
                },
                Some(TicketWrite::Update {
                    ticket: step.ticket,
                    expected_version,
                }),
            )
            .await?;
        committed.ticket.ok_or_else(|| {
            WarrantyError::internal(format!("commit of ticket {ticket_number} returned no ticket"))
        })
    }

    /// Opens the repair ticket of an `assigned` claim. The ticket inherits
    /// the claim's technician.
    #[instrument(skip_all, fields(actor = %actor.id, claim_id = %claim_id))]
    pub async fn create(&self, actor: &Actor, claim_id: ClaimId, request: CreateTicket) -> Result<RepairTicket> {
        actor.require_agent("create repair tickets")?;
        validate_create(&request)?;
        let wf = &self.workflow;

        within(self.timeout(), "ticket.create", async {
            if let Some(ticket) = self.replayed_ticket(request.request_key.as_ref(), claim_id).await? {
                return Ok(ticket);
            }
            let claim = wf.require_claim(claim_id).await?;
            if claim.status != ClaimStatus::Assigned {
                return Err(WarrantyError::invalid_state("claim", claim.status, "open a repair ticket for"));
            }
            if let Some(live) = wf.store.active_ticket(claim_id).await? {
                return Err(WarrantyError::Conflict(format!(
                    "claim {} already has repair ticket {}",
                    claim.claim_number, live.ticket_number
                )));
            }

            let now = wf.now();
            let year = utc_year(now);
            let sequence = wf.store.next_sequence(SequenceKind::Ticket, year).await?;
            let new = NewTicket {
                claim_id,
                ticket_number: SequenceKind::Ticket.format(year, sequence),
                priority: request.priority.unwrap_or(claim.priority),
                assigned_technician: claim.assigned_technician,
                estimated_hours: request.estimated_hours,
                estimated_completion_date: request
                    .estimated_completion_date
                    .or(claim.estimated_completion_date),
                description: request.description.trim().to_string(),
                special_instructions: request.special_instructions,
                required_parts: request.required_parts,
                estimated_cost: request.estimated_cost,
                customer_approval_required: request.customer_approval_required,
                created_by: actor.id,
                created_at: now,
            };
            let committed = wf
                .commit(
                    ClaimCommit {
                        expected_version: claim.version,
                        claim,
                        events: Vec::new(),
                        request_key: request.request_key,
                    },
                    Some(TicketWrite::Insert(new)),
                )
                .await?;
            let ticket = committed
                .ticket
                .ok_or_else(|| WarrantyError::internal("ticket insert returned no ticket"))?;
            info!(ticket = %ticket.ticket_number, status = %ticket.status, "repair ticket opened");
            Ok(ticket)
        })
        .await
    }

    /// Hands the ticket, and the claim with it, to another technician.
    pub async fn assign(&self, actor: &Actor, id: TicketId, request: AssignTicket) -> Result<RepairTicket> {
        actor.require_agent("assign repair tickets")?;
        let wf = &self.workflow;

        within(self.timeout(), "ticket.assign", async {
            let ticket = wf.require_ticket(id).await?;
            if let Some(done) = self.replayed_ticket(request.request_key.as_ref(), ticket.claim_id).await? {
                return Ok(done);
            }
            if matches!(ticket.status, TicketStatus::Completed | TicketStatus::Cancelled) {
                return Err(WarrantyError::invalid_state("repair ticket", ticket.status, "reassign"));
            }
            let now = wf.now();
            let mut claim = wf.require_claim(ticket.claim_id).await?;
            claim.assigned_technician = Some(request.technician_id);

            let mut next = ticket;
            next.assigned_technician = Some(request.technician_id);
            next.assigned_at = Some(now);
            if let Some(eta) = request.estimated_completion_date {
                next.estimated_completion_date = Some(eta);
                claim.estimated_completion_date = Some(eta);
            }
            if next.status == TicketStatus::Pending {
                next.status = TicketStatus::Assigned;
            }
            next.updated_at = now;

            let entry = event(
                actor,
                TimelineEventType::Assigned,
                format!("Ticket {} assigned to technician {}", next.ticket_number, request.technician_id),
                false,
                now,
            );
            self.apply(
                TicketStep {
                    claim,
                    ticket: next,
                    events: vec![entry],
                },
                request.request_key,
            )
            .await
        })
        .await
    }

    /// Starts the repair. The claim moves to `in_repair` with it.
    pub async fn start(&self, actor: &Actor, id: TicketId, request_key: Option<RequestKey>) -> Result<RepairTicket> {
        let ticket = within(self.timeout(), "ticket.get", self.workflow.require_ticket(id)).await?;
        let change = Change {
            request_key,
            ..Default::default()
        };
        within(
            self.timeout(),
            "ticket.start",
            self.workflow.transition(actor, ticket.claim_id, ClaimAction::Start, change),
        )
        .await?;
        within(self.timeout(), "ticket.get", self.workflow.require_ticket(id)).await
    }

    /// Records the finished work. The claim waits for the quality check
    /// before it can be resolved.
    #[instrument(skip_all, fields(actor = %actor.id, ticket_id = %id))]
    pub async fn complete(&self, actor: &Actor, id: TicketId, request: CompleteTicket) -> Result<RepairTicket> {
        validate_complete(&request)?;
        let wf = &self.workflow;

        let (ticket, overrun) = within(self.timeout(), "ticket.complete", async {
            let ticket = wf.require_ticket(id).await?;
            let is_technician = actor.has_role(Role::Technician) && ticket.assigned_technician == Some(actor.id);
            if !is_technician {
                actor.require_agent("complete repair tickets")?;
            }
            if let Some(done) = self.replayed_ticket(request.request_key.as_ref(), ticket.claim_id).await? {
                return Ok((done, false));
            }
            if ticket.status != TicketStatus::InProgress {
                return Err(WarrantyError::invalid_state("repair ticket", ticket.status, "complete"));
            }

            let now = wf.now();
            let total = request.labor_cost + request.parts_cost;
            let overrun = ticket.overruns_estimate(total, wf.settings.overrun_tolerance_percent);

            let mut next = ticket;
            next.status = TicketStatus::Completed;
            next.actual_hours = Some(request.actual_hours);
            next.used_parts = request.used_parts;
            next.repair_notes = request.repair_notes.clone();
            next.test_results = request.test_results;
            next.labor_cost = request.labor_cost;
            next.parts_cost = request.parts_cost;
            next.total_cost = Some(total);
            next.actual_completion_date = Some(now);
            next.quality_check_status = QualityCheckStatus::Pending;
            next.quality_checked_by = None;
            next.quality_checked_at = None;
            if overrun {
                next.customer_approval_required = true;
                next.customer_approval_status = CustomerApprovalStatus::Pending;
                next.customer_approved_at = None;
            }
            next.updated_at = now;

            let mut claim = wf.require_claim(next.claim_id).await?;
            claim.costs.repair = total;
            if request.repair_notes.is_some() {
                claim.repair_notes = request.repair_notes;
            }
            let entry = event(
                actor,
                TimelineEventType::RepairCompleted,
                format!(
                    "Ticket {} completed: {} hours, labor {}, parts {}",
                    next.ticket_number, request.actual_hours, request.labor_cost, request.parts_cost
                ),
                false,
                now,
            );
            let ticket = self
                .apply(
                    TicketStep {
                        claim,
                        ticket: next,
                        events: vec![entry],
                    },
                    request.request_key,
                )
                .await?;
            info!(ticket = %ticket.ticket_number, total = %total, overrun, "repair ticket completed");
            Ok((ticket, overrun))
        })
        .await?;

        if overrun {
            let claim = within(self.timeout(), "claim.get", wf.require_claim(ticket.claim_id)).await?;
            let estimate = ticket.estimated_cost.unwrap_or(Money::ZERO);
            let total = ticket.total_cost.unwrap_or(Money::ZERO);
            wf.notify_customer(
                &claim,
                APPROVAL_REQUIRED_TEMPLATE,
                [
                    ("ticket_number", ticket.ticket_number.clone()),
                    ("estimated_cost", estimate.to_string()),
                    ("total_cost", total.to_string()),
                ],
            )
            .await;
        }
        Ok(ticket)
    }

    /// Approves a completed ticket, or sends it back to the technician.
    #[instrument(skip_all, fields(actor = %actor.id, ticket_id = %id, approved = request.approved))]
    pub async fn quality_check(&self, actor: &Actor, id: TicketId, request: QualityCheck) -> Result<RepairTicket> {
        actor.require_agent("quality check repair tickets")?;
        let notes = if request.approved {
            request.notes.filter(|n| !n.trim().is_empty())
        } else {
            Some(required(request.notes, "notes")?)
        };
        let wf = &self.workflow;

        within(self.timeout(), "ticket.quality_check", async {
            let ticket = wf.require_ticket(id).await?;
            if let Some(done) = self.replayed_ticket(request.request_key.as_ref(), ticket.claim_id).await? {
                return Ok(done);
            }
            if ticket.status != TicketStatus::Completed
                || ticket.quality_check_status != QualityCheckStatus::Pending
            {
                return Err(WarrantyError::invalid_state(
                    "repair ticket",
                    format!("{}/qa {}", ticket.status, ticket.quality_check_status),
                    "quality check",
                ));
            }

            let now = wf.now();
            let mut claim = wf.require_claim(ticket.claim_id).await?;
            let mut next = ticket;
            next.quality_checked_by = Some(actor.id);
            next.quality_checked_at = Some(now);
            next.quality_notes = notes.clone();
            next.updated_at = now;

            let entry = if request.approved {
                next.quality_check_status = QualityCheckStatus::Approved;
                event(
                    actor,
                    TimelineEventType::QualityApproved,
                    format!("Quality check passed for ticket {}", next.ticket_number),
                    false,
                    now,
                )
            } else {
                // Reopen the same ticket; its cost is written again on the
                // next completion.
                next.quality_check_status = QualityCheckStatus::Rejected;
                next.status = TicketStatus::InProgress;
                next.total_cost = None;
                next.actual_completion_date = None;
                claim.costs.repair = Money::ZERO;
                event(
                    actor,
                    TimelineEventType::StatusUpdated,
                    format!(
                        "Quality check failed for ticket {}: {}",
                        next.ticket_number,
                        notes.as_deref().unwrap_or_default()
                    ),
                    false,
                    now,
                )
            };
            let ticket = self
                .apply(
                    TicketStep {
                        claim,
                        ticket: next,
                        events: vec![entry],
                    },
                    request.request_key,
                )
                .await?;
            info!(ticket = %ticket.ticket_number, qa = %ticket.quality_check_status, "quality check recorded");
            Ok(ticket)
        })
        .await
    }

    /// The claim's customer accepts or declines the repair cost.
    pub async fn customer_approval(
        &self,
        actor: &Actor,
        id: TicketId,
        request: CustomerApproval,
    ) -> Result<RepairTicket> {
        let wf = &self.workflow;

        within(self.timeout(), "ticket.customer_approval", async {
            let ticket = wf.require_ticket(id).await?;
            let claim = wf.require_claim(ticket.claim_id).await?;
            if actor.customer_id() != Some(claim.customer_id) {
                return Err(WarrantyError::Forbidden(format!(
                    "only the customer of claim {} may approve its repair",
                    claim.claim_number
                )));
            }
            if let Some(done) = self.replayed_ticket(request.request_key.as_ref(), claim.id).await? {
                return Ok(done);
            }
            if ticket.customer_approval_status != CustomerApprovalStatus::Pending {
                return Err(WarrantyError::invalid_state(
                    "customer approval",
                    ticket.customer_approval_status,
                    "decide",
                ));
            }

            let now = wf.now();
            let notes = request.notes.filter(|n| !n.trim().is_empty());
            let mut next = ticket;
            next.customer_approval_notes = notes;
            next.updated_at = now;
            let entry = if request.approved {
                next.customer_approval_status = CustomerApprovalStatus::Approved;
                next.customer_approved_at = Some(now);
                event(
                    actor,
                    TimelineEventType::CustomerApproved,
                    format!("Customer approved the repair cost of ticket {}", next.ticket_number),
                    true,
                    now,
                )
            } else {
                next.customer_approval_status = CustomerApprovalStatus::Rejected;
                event(
                    actor,
                    TimelineEventType::StatusUpdated,
                    format!("Customer declined the repair cost of ticket {}", next.ticket_number),
                    true,
                    now,
                )
            };
            self.apply(
                TicketStep {
                    claim,
                    ticket: next,
                    events: vec![entry],
                },
                request.request_key,
            )
            .await
        })
        .await
    }

    pub async fn get(&self, actor: &Actor, id: TicketId) -> Result<RepairTicket> {
        within(self.timeout(), "ticket.get", async {
            let ticket = self.workflow.require_ticket(id).await?;
            let claim = self.workflow.require_claim(ticket.claim_id).await?;
            authorize_read(actor, &claim)?;
            Ok(ticket)
        })
        .await
    }

    /// Every ticket of a claim, cancelled ones included.
    pub async fn for_claim(&self, actor: &Actor, claim_id: ClaimId) -> Result<Vec<RepairTicket>> {
        within(self.timeout(), "ticket.list", async {
            let claim = self.workflow.require_claim(claim_id).await?;
            authorize_read(actor, &claim)?;
            Ok(self.workflow.store.tickets_for_claim(claim_id).await?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warranty_core::ErrorKind;

    fn create() -> CreateTicket {
        CreateTicket {
            priority: None,
            estimated_hours: 2.5,
            description: "Replace the cracked hinge".into(),
            required_parts: vec!["hinge".into()],
            special_instructions: None,
            customer_approval_required: false,
            estimated_cost: None,
            estimated_completion_date: None,
            request_key: None,
        }
    }

    #[test]
    fn create_bounds() {
        assert!(validate_create(&create()).is_ok());

        let mut req = create();
        req.estimated_hours = 0.05;
        req.description = "short".into();
        match validate_create(&req).unwrap_err() {
            WarrantyError::InvalidArgument(fields) => {
                let names: Vec<_> = fields.iter().map(|f| f.field.as_str()).collect();
                assert_eq!(names, vec!["estimated_hours", "description"]);
            }
            other => panic!("unexpected {other:?}"),
        }

        let mut req = create();
        req.estimated_hours = 1000.5;
        assert_eq!(validate_create(&req).unwrap_err().kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn completion_needs_positive_hours() {
        let req = CompleteTicket {
            actual_hours: 0.0,
            ..Default::default()
        };
        assert_eq!(validate_complete(&req).unwrap_err().kind(), ErrorKind::InvalidArgument);
    }
}
