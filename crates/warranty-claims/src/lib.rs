//! Warranty claim workflow: the claim state machine, repair tickets and
//! claim attachments.
//!
//! The three services share one [`Workflow`], which carries the store, the
//! clock and the collaborators.

pub mod attachments;
pub mod claims;
pub mod settings;
pub mod tickets;
mod workflow;

pub use attachments::{AttachmentService, UploadAttachment};
pub use claims::{
    AddNote, AssignTechnician, BulkFailure, BulkItem, BulkReport, BulkUpdate, ClaimService,
    CompleteClaim, DisputeClaim, RejectClaim, RequestInfo, SubmitClaim, UpdateCosts, UpdateStatus,
    ValidateClaim,
};
pub use settings::{AttachmentPolicy, ClaimSettings, DEFAULT_MAX_ATTACHMENT_BYTES};
pub use tickets::{
    AssignTicket, CompleteTicket, CreateTicket, CustomerApproval, QualityCheck, TicketService,
};
pub use workflow::{
    Workflow, APPROVAL_REQUIRED_TEMPLATE, CLAIM_STATUS_TEMPLATE, CLAIM_SUBMITTED_TEMPLATE,
};
