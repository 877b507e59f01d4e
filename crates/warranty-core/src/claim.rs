//! Warranty claims and the claim state machine.

use crate::actor::ActorType;
use crate::barcode::BarcodeCode;
use crate::error::WarrantyError;
use crate::ids::{ActorId, BarcodeId, ClaimId, CustomerId, ProductId, StorefrontId, TimelineEventId};
use crate::money::Money;
use crate::priority::{Priority, Severity};
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Pending,
    Validated,
    Rejected,
    Assigned,
    InRepair,
    Repaired,
    Replaced,
    Shipped,
    Delivered,
    Completed,
    Cancelled,
    Disputed,
}

/// Operations that move a claim between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimAction {
    Validate,
    Reject,
    Cancel,
    Assign,
    Start,
    Repair,
    Replace,
    Ship,
    Deliver,
    Complete,
    Dispute,
    /// Returns a disputed claim to the status it was disputed from.
    /// Completing a disputed claim uses [`ClaimAction::Complete`].
    Resolve,
}

impl ClaimAction {
    pub const ALL: [ClaimAction; 12] = [
        ClaimAction::Validate,
        ClaimAction::Reject,
        ClaimAction::Cancel,
        ClaimAction::Assign,
        ClaimAction::Start,
        ClaimAction::Repair,
        ClaimAction::Replace,
        ClaimAction::Ship,
        ClaimAction::Deliver,
        ClaimAction::Complete,
        ClaimAction::Dispute,
        ClaimAction::Resolve,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ClaimAction::Validate => "validate",
            ClaimAction::Reject => "reject",
            ClaimAction::Cancel => "cancel",
            ClaimAction::Assign => "assign",
            ClaimAction::Start => "start",
            ClaimAction::Repair => "repair",
            ClaimAction::Replace => "replace",
            ClaimAction::Ship => "ship",
            ClaimAction::Deliver => "deliver",
            ClaimAction::Complete => "complete",
            ClaimAction::Dispute => "dispute",
            ClaimAction::Resolve => "resolve",
        }
    }

    /// Timeline event written when this action commits.
    pub fn event_type(self) -> TimelineEventType {
        match self {
            ClaimAction::Validate => TimelineEventType::Validated,
            ClaimAction::Reject => TimelineEventType::Rejected,
            ClaimAction::Assign => TimelineEventType::Assigned,
            ClaimAction::Start => TimelineEventType::RepairStarted,
            ClaimAction::Complete => TimelineEventType::Completed,
            ClaimAction::Cancel
            | ClaimAction::Repair
            | ClaimAction::Replace
            | ClaimAction::Ship
            | ClaimAction::Deliver
            | ClaimAction::Dispute
            | ClaimAction::Resolve => TimelineEventType::StatusUpdated,
        }
    }
}

impl fmt::Display for ClaimAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ClaimStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ClaimStatus::Pending => "pending",
            ClaimStatus::Validated => "validated",
            ClaimStatus::Rejected => "rejected",
            ClaimStatus::Assigned => "assigned",
            ClaimStatus::InRepair => "in_repair",
            ClaimStatus::Repaired => "repaired",
            ClaimStatus::Replaced => "replaced",
            ClaimStatus::Shipped => "shipped",
            ClaimStatus::Delivered => "delivered",
            ClaimStatus::Completed => "completed",
            ClaimStatus::Cancelled => "cancelled",
            ClaimStatus::Disputed => "disputed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ClaimStatus::Rejected | ClaimStatus::Completed | ClaimStatus::Cancelled
        )
    }

    /// The transition table. `disputed_from` is only consulted for
    /// [`ClaimAction::Resolve`].
    ///
    /// ```text
    /// pending    ──validate──▶  validated
    /// pending    ──reject────▶  rejected
    /// pending    ──cancel────▶  cancelled
    /// validated  ──assign────▶  assigned
    /// validated  ──cancel────▶  cancelled
    /// assigned   ──start─────▶  in_repair
    /// in_repair  ──repair────▶  repaired
    /// in_repair  ──replace───▶  replaced
    /// repaired   ──ship──────▶  shipped
    /// replaced   ──ship──────▶  shipped
    /// shipped    ──deliver───▶  delivered
    /// delivered  ──complete──▶  completed
    /// any non-terminal ──dispute──▶ disputed
    /// disputed   ──resolve───▶  prior status
    /// disputed   ──complete──▶  completed
    /// ```
    pub fn next(self, action: ClaimAction, disputed_from: Option<ClaimStatus>) -> Option<ClaimStatus> {
        use ClaimAction as A;
        use ClaimStatus as S;

        match (self, action) {
            (S::Pending, A::Validate) => Some(S::Validated),
            (S::Pending, A::Reject) => Some(S::Rejected),
            (S::Pending, A::Cancel) => Some(S::Cancelled),
            (S::Validated, A::Assign) => Some(S::Assigned),
            (S::Validated, A::Cancel) => Some(S::Cancelled),
            (S::Assigned, A::Start) => Some(S::InRepair),
            (S::InRepair, A::Repair) => Some(S::Repaired),
            (S::InRepair, A::Replace) => Some(S::Replaced),
            (S::Repaired, A::Ship) | (S::Replaced, A::Ship) => Some(S::Shipped),
            (S::Shipped, A::Deliver) => Some(S::Delivered),
            (S::Delivered, A::Complete) => Some(S::Completed),
            (S::Disputed, A::Complete) => Some(S::Completed),
            (S::Disputed, A::Resolve) => disputed_from.filter(|prior| *prior != S::Disputed),
            (S::Disputed, A::Dispute) => None,
            (status, A::Dispute) if !status.is_terminal() => Some(S::Disputed),
            _ => None,
        }
    }

    /// Actions that are legal from this status.
    pub fn allowed_actions(self, disputed_from: Option<ClaimStatus>) -> Vec<ClaimAction> {
        ClaimAction::ALL
            .into_iter()
            .filter(|action| self.next(*action, disputed_from).is_some())
            .collect()
    }

    /// Like [`ClaimStatus::next`] but reports an `invalid_transition` with
    /// the current status and the legal actions from it.
    pub fn apply(
        self,
        action: ClaimAction,
        disputed_from: Option<ClaimStatus>,
    ) -> Result<ClaimStatus, WarrantyError> {
        self.next(action, disputed_from)
            .ok_or_else(|| WarrantyError::InvalidTransition {
                from: self,
                action,
                allowed: self.allowed_actions(disputed_from),
            })
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Hardware,
    Software,
    Defect,
    Malfunction,
    Battery,
    Display,
    PhysicalDamage,
    WaterDamage,
    Other,
}

impl IssueCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueCategory::Hardware => "hardware",
            IssueCategory::Software => "software",
            IssueCategory::Defect => "defect",
            IssueCategory::Malfunction => "malfunction",
            IssueCategory::Battery => "battery",
            IssueCategory::Display => "display",
            IssueCategory::PhysicalDamage => "physical_damage",
            IssueCategory::WaterDamage => "water_damage",
            IssueCategory::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "hardware" => IssueCategory::Hardware,
            "software" => IssueCategory::Software,
            "defect" => IssueCategory::Defect,
            "malfunction" => IssueCategory::Malfunction,
            "battery" => IssueCategory::Battery,
            "display" => IssueCategory::Display,
            "physical_damage" => IssueCategory::PhysicalDamage,
            "water_damage" => IssueCategory::WaterDamage,
            "other" => IssueCategory::Other,
            _ => return None,
        })
    }
}

impl fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority assigned on validation.
///
/// `critical` → high; `high` severity on a defect or malfunction → high;
/// `medium` → normal; everything else → low.
pub fn default_priority(severity: Severity, category: IssueCategory) -> Priority {
    match (severity, category) {
        (Severity::Critical, _) => Priority::High,
        (Severity::High, IssueCategory::Defect | IssueCategory::Malfunction) => Priority::High,
        (Severity::Medium, _) => Priority::Normal,
        _ => Priority::Low,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionType {
    Repair,
    Replace,
    Refund,
}

impl ResolutionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ResolutionType::Repair => "repair",
            ResolutionType::Replace => "replace",
            ResolutionType::Refund => "refund",
        }
    }
}

impl fmt::Display for ResolutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Customer contact details copied onto the claim at submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactSnapshot {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub pickup_address: Option<String>,
}

/// Cost fields of a claim. The total is derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimCosts {
    pub repair: Money,
    pub shipping: Money,
    pub replacement: Money,
}

impl ClaimCosts {
    pub fn total(&self) -> Money {
        self.repair + self.shipping + self.replacement
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub id: ClaimId,
    pub claim_number: String,
    pub barcode_id: BarcodeId,
    pub barcode: BarcodeCode,
    pub customer_id: CustomerId,
    pub product_id: ProductId,
    pub storefront_id: Option<StorefrontId>,
    pub issue_category: IssueCategory,
    pub issue_description: String,
    pub severity: Severity,
    pub priority: Priority,
    pub status: ClaimStatus,
    pub previous_status: Option<ClaimStatus>,
    pub disputed_from: Option<ClaimStatus>,
    pub status_updated_at: Timestamp,
    pub status_updated_by: ActorId,
    pub claim_date: Timestamp,
    pub validated_at: Option<Timestamp>,
    pub validated_by: Option<ActorId>,
    pub completed_at: Option<Timestamp>,
    pub estimated_completion_date: Option<Timestamp>,
    pub actual_completion_date: Option<Timestamp>,
    pub resolution_type: Option<ResolutionType>,
    pub resolution_notes: Option<String>,
    pub replacement_product_id: Option<ProductId>,
    pub costs: ClaimCosts,
    pub contact: ContactSnapshot,
    pub customer_notes: Option<String>,
    pub admin_notes: Option<String>,
    pub repair_notes: Option<String>,
    pub rejection_reason: Option<String>,
    pub assigned_technician: Option<ActorId>,
    pub tags: Vec<String>,
    /// Optimistic concurrency token, bumped by every committed write.
    pub version: u64,
}

impl Claim {
    pub fn total_cost(&self) -> Money {
        self.costs.total()
    }

    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Moves the claim to `next`, keeping `previous_status` and the status
    /// stamps in step.
    pub fn set_status(&mut self, next: ClaimStatus, actor: ActorId, at: Timestamp) {
        self.previous_status = Some(self.status);
        self.status = next;
        self.status_updated_at = at;
        self.status_updated_by = actor;
    }
}

/// Insert payload for a claim in state `pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewClaim {
    pub claim_number: String,
    pub barcode_id: BarcodeId,
    pub barcode: BarcodeCode,
    pub customer_id: CustomerId,
    pub product_id: ProductId,
    pub storefront_id: Option<StorefrontId>,
    pub issue_category: IssueCategory,
    pub issue_description: String,
    pub severity: Severity,
    pub priority: Priority,
    pub contact: ContactSnapshot,
    pub customer_notes: Option<String>,
    pub tags: Vec<String>,
    pub submitted_by: ActorId,
    pub claim_date: Timestamp,
}

impl NewClaim {
    pub fn into_claim(self, id: ClaimId) -> Claim {
        Claim {
            id,
            claim_number: self.claim_number,
            barcode_id: self.barcode_id,
            barcode: self.barcode,
            customer_id: self.customer_id,
            product_id: self.product_id,
            storefront_id: self.storefront_id,
            issue_category: self.issue_category,
            issue_description: self.issue_description,
            severity: self.severity,
            priority: self.priority,
            status: ClaimStatus::Pending,
            previous_status: None,
            disputed_from: None,
            status_updated_at: self.claim_date,
            status_updated_by: self.submitted_by,
            claim_date: self.claim_date,
            validated_at: None,
            validated_by: None,
            completed_at: None,
            estimated_completion_date: None,
            actual_completion_date: None,
            resolution_type: None,
            resolution_notes: None,
            replacement_product_id: None,
            costs: ClaimCosts::default(),
            contact: self.contact,
            customer_notes: self.customer_notes,
            admin_notes: None,
            repair_notes: None,
            rejection_reason: None,
            assigned_technician: None,
            tags: self.tags,
            version: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEventType {
    Submitted,
    Validated,
    Rejected,
    Assigned,
    RepairStarted,
    RepairCompleted,
    QualityApproved,
    CustomerApproved,
    Completed,
    NoteAdded,
    AttachmentUploaded,
    StatusUpdated,
}

impl TimelineEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            TimelineEventType::Submitted => "submitted",
            TimelineEventType::Validated => "validated",
            TimelineEventType::Rejected => "rejected",
            TimelineEventType::Assigned => "assigned",
            TimelineEventType::RepairStarted => "repair_started",
            TimelineEventType::RepairCompleted => "repair_completed",
            TimelineEventType::QualityApproved => "quality_approved",
            TimelineEventType::CustomerApproved => "customer_approved",
            TimelineEventType::Completed => "completed",
            TimelineEventType::NoteAdded => "note_added",
            TimelineEventType::AttachmentUploaded => "attachment_uploaded",
            TimelineEventType::StatusUpdated => "status_updated",
        }
    }
}

impl fmt::Display for TimelineEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a claim's append-only timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub id: TimelineEventId,
    pub claim_id: ClaimId,
    /// Position in the claim's log, starting at 1.
    pub sequence: u64,
    pub event_type: TimelineEventType,
    pub description: String,
    pub actor_id: ActorId,
    pub actor_type: ActorType,
    pub timestamp: Timestamp,
    pub visible_to_customer: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTimelineEvent {
    pub event_type: TimelineEventType,
    pub description: String,
    pub actor_id: ActorId,
    pub actor_type: ActorType,
    pub timestamp: Timestamp,
    pub visible_to_customer: bool,
}

/// Client supplied key that makes a mutating request replay-safe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestKey(SmolStr);

impl RequestKey {
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(SmolStr::new(key.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A claim write with its timeline entries, applied atomically.
///
/// The store rejects the commit with `Conflict` unless the stored version
/// equals `expected_version`, then bumps the version, appends the events
/// and remembers `request_key` for replay detection.
#[derive(Debug, Clone)]
pub struct ClaimCommit {
    pub claim: Claim,
    pub expected_version: u64,
    pub events: Vec<NewTimelineEvent>,
    pub request_key: Option<RequestKey>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ClaimAction as A;
    use ClaimStatus as S;

    const ALL_STATUSES: [ClaimStatus; 12] = [
        S::Pending,
        S::Validated,
        S::Rejected,
        S::Assigned,
        S::InRepair,
        S::Repaired,
        S::Replaced,
        S::Shipped,
        S::Delivered,
        S::Completed,
        S::Cancelled,
        S::Disputed,
    ];

    #[test]
    fn happy_path_edges() {
        let mut status = S::Pending;
        for action in [
            A::Validate,
            A::Assign,
            A::Start,
            A::Repair,
            A::Ship,
            A::Deliver,
            A::Complete,
        ] {
            status = status.apply(action, None).unwrap();
        }
        assert_eq!(status, S::Completed);
    }

    #[test]
    fn pending_cannot_ship() {
        let err = S::Pending.apply(A::Ship, None).unwrap_err();
        match err {
            WarrantyError::InvalidTransition { from, action, allowed } => {
                assert_eq!(from, S::Pending);
                assert_eq!(action, A::Ship);
                assert_eq!(allowed, vec![A::Validate, A::Reject, A::Cancel, A::Dispute]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn terminal_statuses_allow_nothing() {
        for status in [S::Rejected, S::Completed, S::Cancelled] {
            assert!(status.is_terminal());
            assert!(status.allowed_actions(None).is_empty());
        }
    }

    #[test]
    fn every_non_terminal_status_can_be_disputed_once() {
        for status in ALL_STATUSES {
            let expected = !status.is_terminal() && status != S::Disputed;
            assert_eq!(status.next(A::Dispute, None).is_some(), expected, "{status}");
        }
    }

    #[test]
    fn dispute_resolves_to_prior_or_completed() {
        assert_eq!(S::Disputed.next(A::Resolve, Some(S::Shipped)), Some(S::Shipped));
        assert_eq!(S::Disputed.next(A::Resolve, None), None);
        assert_eq!(S::Disputed.next(A::Complete, Some(S::Shipped)), Some(S::Completed));
    }

    #[test]
    fn replacement_path_ships() {
        assert_eq!(S::InRepair.next(A::Replace, None), Some(S::Replaced));
        assert_eq!(S::Replaced.next(A::Ship, None), Some(S::Shipped));
        assert_eq!(S::Replaced.next(A::Deliver, None), None);
    }

    #[test]
    fn priority_rule() {
        use IssueCategory as C;
        assert_eq!(default_priority(Severity::Critical, C::Other), Priority::High);
        assert_eq!(default_priority(Severity::High, C::Defect), Priority::High);
        assert_eq!(default_priority(Severity::High, C::Malfunction), Priority::High);
        assert_eq!(default_priority(Severity::High, C::Hardware), Priority::Low);
        assert_eq!(default_priority(Severity::Medium, C::Hardware), Priority::Normal);
        assert_eq!(default_priority(Severity::Low, C::Defect), Priority::Low);
    }

    #[test]
    fn total_cost_is_the_sum() {
        let costs = ClaimCosts {
            repair: Money::from_major(100),
            shipping: Money::from_cents(1250),
            replacement: Money::ZERO,
        };
        assert_eq!(costs.total(), Money::from_cents(11250));
    }
}
