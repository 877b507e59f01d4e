//! Core types and traits for the warranty subsystem.
//!
//! Everything the issuance, registry, claims and validator crates share
//! lives here: identifiers, entities and their status machines, the error
//! taxonomy, the caller model, and the repository and collaborator seams.

pub mod actor;
pub mod attachment;
pub mod barcode;
pub mod batch;
pub mod calendar;
pub mod claim;
pub mod clock;
pub mod collaborator;
pub mod deadline;
pub mod error;
pub mod ids;
pub mod money;
pub mod numbering;
pub mod priority;
pub mod repository;
pub mod ticket;

pub use actor::{Actor, ActorType, Role};
pub use attachment::{AttachmentType, ClaimAttachment, NewAttachment, ScanOutcome, ScanStatus};
pub use barcode::{
    Activation, BarcodeCode, BarcodeEvent, BarcodeEventKind, BarcodePrefix, BarcodeStatus,
    NewBarcode, PurchaseInfo, WarrantyBarcode, WarrantyWindow,
};
pub use batch::{
    Batch, BatchStatus, BatchTransition, ChunkCommit, CollisionRecord, CollisionResolution,
    CollisionType, NewBatch, NewCollision,
};
pub use claim::{
    Claim, ClaimAction, ClaimCommit, ClaimCosts, ClaimStatus, ContactSnapshot, IssueCategory,
    NewClaim, NewTimelineEvent, RequestKey, ResolutionType, TimelineEvent, TimelineEventType,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborator::{
    AttachmentScanner, CollaboratorError, CollaboratorResult, CustomerDirectory, NoopNotifier,
    NotificationPayload, Notifier, ProductCatalog, ProductInfo,
};
pub use error::{
    CorrelationId, ErrorKind, FieldViolation, Result, StorageError, StorageResult, Violations,
    WarrantyError,
};
pub use ids::{
    ActorId, AttachmentId, BarcodeId, BatchId, ClaimId, CollisionId, CustomerId, ProductId,
    StorefrontId, TicketId, TimelineEventId,
};
pub use money::Money;
pub use numbering::SequenceKind;
pub use priority::{Priority, Severity};
pub use repository::{
    AttachmentRepository, BarcodeFilter, BarcodeReader, BarcodeRepository, BatchFilter,
    BatchRepository, ClaimFilter, ClaimRepository, ClaimStore, CommittedClaim, IssuanceStore,
    Page, Paged, SequenceRepository, TicketRepository,
};
pub use ticket::{
    CustomerApprovalStatus, NewTicket, QualityCheckStatus, RepairTicket, TicketStatus, TicketWrite,
};
