//! Repair tickets, the technician side of a claim.

use crate::ids::{ActorId, ClaimId, TicketId};
use crate::money::Money;
use crate::priority::Priority;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MIN_ESTIMATED_HOURS: f64 = 0.1;
pub const MAX_ESTIMATED_HOURS: f64 = 1000.0;
pub const MIN_DESCRIPTION_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Cancelled,
}

impl TicketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Pending => "pending",
            TicketStatus::Assigned => "assigned",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Completed => "completed",
            TicketStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_live(self) -> bool {
        self != TicketStatus::Cancelled
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityCheckStatus {
    Pending,
    Approved,
    Rejected,
}

impl QualityCheckStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QualityCheckStatus::Pending => "pending",
            QualityCheckStatus::Approved => "approved",
            QualityCheckStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for QualityCheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerApprovalStatus {
    NotRequired,
    Pending,
    Approved,
    Rejected,
}

impl CustomerApprovalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CustomerApprovalStatus::NotRequired => "not_required",
            CustomerApprovalStatus::Pending => "pending",
            CustomerApprovalStatus::Approved => "approved",
            CustomerApprovalStatus::Rejected => "rejected",
        }
    }

    pub fn is_cleared(self) -> bool {
        matches!(
            self,
            CustomerApprovalStatus::NotRequired | CustomerApprovalStatus::Approved
        )
    }
}

impl fmt::Display for CustomerApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairTicket {
    pub id: TicketId,
    pub claim_id: ClaimId,
    pub ticket_number: String,
    pub status: TicketStatus,
    pub priority: Priority,
    pub assigned_technician: Option<ActorId>,
    pub assigned_at: Option<Timestamp>,
    pub estimated_hours: f64,
    pub actual_hours: Option<f64>,
    pub estimated_completion_date: Option<Timestamp>,
    pub actual_completion_date: Option<Timestamp>,
    pub started_at: Option<Timestamp>,
    pub description: String,
    pub special_instructions: Option<String>,
    pub required_parts: Vec<String>,
    pub used_parts: Vec<String>,
    pub repair_notes: Option<String>,
    pub test_results: Option<String>,
    pub estimated_cost: Option<Money>,
    pub labor_cost: Money,
    pub parts_cost: Money,
    /// Set when the ticket completes; cleared if QA reopens it.
    pub total_cost: Option<Money>,
    pub quality_check_status: QualityCheckStatus,
    pub quality_checked_by: Option<ActorId>,
    pub quality_checked_at: Option<Timestamp>,
    pub quality_notes: Option<String>,
    pub customer_approval_required: bool,
    pub customer_approval_status: CustomerApprovalStatus,
    pub customer_approved_at: Option<Timestamp>,
    pub customer_approval_notes: Option<String>,
    pub created_by: ActorId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub version: u64,
}

impl RepairTicket {
    /// Whether this ticket lets its claim move to `repaired` or `replaced`.
    pub fn clears_resolution_gate(&self) -> bool {
        self.status == TicketStatus::Completed
            && self.quality_check_status == QualityCheckStatus::Approved
            && self.customer_approval_status.is_cleared()
    }

    /// Whether `total` overruns the estimate by more than `tolerance_percent`.
    pub fn overruns_estimate(&self, total: Money, tolerance_percent: u32) -> bool {
        match self.estimated_cost {
            Some(estimate) => {
                let ceiling = u128::from(estimate.cents()) * u128::from(100 + tolerance_percent);
                u128::from(total.cents()) * 100 > ceiling
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTicket {
    pub claim_id: ClaimId,
    pub ticket_number: String,
    pub priority: Priority,
    pub assigned_technician: Option<ActorId>,
    pub estimated_hours: f64,
    pub estimated_completion_date: Option<Timestamp>,
    pub description: String,
    pub special_instructions: Option<String>,
    pub required_parts: Vec<String>,
    pub estimated_cost: Option<Money>,
    pub customer_approval_required: bool,
    pub created_by: ActorId,
    pub created_at: Timestamp,
}

impl NewTicket {
    pub fn into_ticket(self, id: TicketId) -> RepairTicket {
        let status = if self.assigned_technician.is_some() {
            TicketStatus::Assigned
        } else {
            TicketStatus::Pending
        };
        RepairTicket {
            id,
            claim_id: self.claim_id,
            ticket_number: self.ticket_number,
            status,
            priority: self.priority,
            assigned_at: self.assigned_technician.map(|_| self.created_at),
            assigned_technician: self.assigned_technician,
            estimated_hours: self.estimated_hours,
            actual_hours: None,
            estimated_completion_date: self.estimated_completion_date,
            actual_completion_date: None,
            started_at: None,
            description: self.description,
            special_instructions: self.special_instructions,
            required_parts: self.required_parts,
            used_parts: Vec::new(),
            repair_notes: None,
            test_results: None,
            estimated_cost: self.estimated_cost,
            labor_cost: Money::ZERO,
            parts_cost: Money::ZERO,
            total_cost: None,
            quality_check_status: QualityCheckStatus::Pending,
            quality_checked_by: None,
            quality_checked_at: None,
            quality_notes: None,
            customer_approval_required: self.customer_approval_required,
            customer_approval_status: if self.customer_approval_required {
                CustomerApprovalStatus::Pending
            } else {
                CustomerApprovalStatus::NotRequired
            },
            customer_approved_at: None,
            customer_approval_notes: None,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.created_at,
            version: 0,
        }
    }
}

/// Ticket write carried inside a claim commit.
#[derive(Debug, Clone, PartialEq)]
pub enum TicketWrite {
    Insert(NewTicket),
    Update {
        ticket: RepairTicket,
        expected_version: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(estimated_cost: Option<Money>) -> RepairTicket {
        NewTicket {
            claim_id: ClaimId::new(1),
            ticket_number: "RPR-2024-000001".into(),
            priority: Priority::Normal,
            assigned_technician: Some(ActorId::new(7)),
            estimated_hours: 2.0,
            estimated_completion_date: None,
            description: "replace the charging port".into(),
            special_instructions: None,
            required_parts: vec!["usb-c port".into()],
            estimated_cost,
            customer_approval_required: false,
            created_by: ActorId::new(2),
            created_at: "2024-03-02T09:00:00Z".parse().unwrap(),
        }
        .into_ticket(TicketId::new(1))
    }

    #[test]
    fn new_ticket_with_technician_starts_assigned() {
        let t = ticket(None);
        assert_eq!(t.status, TicketStatus::Assigned);
        assert_eq!(t.assigned_at, Some(t.created_at));
        assert_eq!(t.customer_approval_status, CustomerApprovalStatus::NotRequired);
        assert!(!t.clears_resolution_gate());
    }

    #[test]
    fn gate_needs_completion_qa_and_approval() {
        let mut t = ticket(None);
        t.status = TicketStatus::Completed;
        assert!(!t.clears_resolution_gate());

        t.quality_check_status = QualityCheckStatus::Approved;
        assert!(t.clears_resolution_gate());

        t.customer_approval_status = CustomerApprovalStatus::Pending;
        assert!(!t.clears_resolution_gate());

        t.customer_approval_status = CustomerApprovalStatus::Approved;
        assert!(t.clears_resolution_gate());
    }

    #[test]
    fn overrun_uses_tolerance() {
        let t = ticket(Some(Money::from_major(100)));
        assert!(!t.overruns_estimate(Money::from_major(120), 20));
        assert!(t.overruns_estimate(Money::from_cents(12001), 20));
        assert!(!ticket(None).overruns_estimate(Money::from_major(1_000), 20));
    }
}
