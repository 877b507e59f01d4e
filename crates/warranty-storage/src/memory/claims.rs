use super::{IdAllocator, InMemoryStore};
use async_trait::async_trait;
use warranty_core::{
    AttachmentId, AttachmentRepository, BarcodeId, Claim, ClaimAttachment, ClaimCommit,
    ClaimFilter, ClaimId, ClaimRepository, CommittedClaim, NewAttachment, NewClaim,
    NewTimelineEvent, Page, Paged, RepairTicket, RequestKey, ScanOutcome, ScanStatus,
    StorageError, StorageResult, TicketId, TicketRepository, TicketWrite, TimelineEvent,
    TimelineEventId,
};

impl InMemoryStore {
    /// Stamps events onto the claim's log. Sequences continue from the last
    /// entry and timestamps never go backwards. Caller holds `claim_writes`.
    fn append_timeline_locked(
        &self,
        claim_id: ClaimId,
        events: Vec<NewTimelineEvent>,
    ) -> Vec<TimelineEvent> {
        let mut log = self.inner.timelines.entry(claim_id).or_default();
        let mut appended = Vec::with_capacity(events.len());
        for event in events {
            let (sequence, floor) = log
                .last()
                .map(|last| (last.sequence + 1, Some(last.timestamp)))
                .unwrap_or((1, None));
            let stamped = TimelineEvent {
                id: TimelineEventId::new(IdAllocator::next(&self.inner.ids.event)),
                claim_id,
                sequence,
                event_type: event.event_type,
                description: event.description,
                actor_id: event.actor_id,
                actor_type: event.actor_type,
                timestamp: floor.map_or(event.timestamp, |floor| floor.max(event.timestamp)),
                visible_to_customer: event.visible_to_customer,
            };
            log.push(stamped.clone());
            appended.push(stamped);
        }
        appended
    }

    fn live_ticket(&self, claim_id: ClaimId) -> Option<RepairTicket> {
        self.inner
            .tickets
            .iter()
            .filter(|t| t.claim_id == claim_id && t.status.is_live())
            .max_by_key(|t| t.id)
            .map(|t| t.value().clone())
    }

    fn check_request_key(&self, key: Option<&RequestKey>) -> StorageResult<()> {
        match key {
            Some(key) if self.inner.request_keys.contains_key(key) => {
                Err(StorageError::Duplicate(format!("request key {key}")))
            }
            _ => Ok(()),
        }
    }

    /// Checks a ticket write against stored state without applying it.
    fn check_ticket_write(&self, claim_id: ClaimId, write: &TicketWrite) -> StorageResult<()> {
        match write {
            TicketWrite::Insert(new) => {
                if new.claim_id != claim_id {
                    return Err(StorageError::Conflict("ticket belongs to another claim".into()));
                }
                if let Some(live) = self.live_ticket(claim_id) {
                    return Err(StorageError::Conflict(format!(
                        "claim already has live ticket {}",
                        live.ticket_number
                    )));
                }
                if self
                    .inner
                    .tickets
                    .iter()
                    .any(|t| t.ticket_number == new.ticket_number)
                {
                    return Err(StorageError::Duplicate(new.ticket_number.clone()));
                }
                Ok(())
            }
            TicketWrite::Update {
                ticket,
                expected_version,
            } => {
                let stored = self
                    .inner
                    .tickets
                    .get(&ticket.id)
                    .ok_or_else(|| StorageError::NotFound(ticket.id.to_string()))?;
                if stored.claim_id != claim_id {
                    return Err(StorageError::Conflict("ticket belongs to another claim".into()));
                }
                if stored.version != *expected_version {
                    return Err(StorageError::Conflict(format!(
                        "ticket {} is at version {}, expected {}",
                        stored.ticket_number, stored.version, expected_version
                    )));
                }
                Ok(())
            }
        }
    }

    fn apply_ticket_write(&self, write: TicketWrite) -> RepairTicket {
        let mut ticket = match write {
            TicketWrite::Insert(new) => {
                new.into_ticket(TicketId::new(IdAllocator::next(&self.inner.ids.ticket)))
            }
            TicketWrite::Update { ticket, .. } => ticket,
        };
        ticket.version += 1;
        self.inner.tickets.insert(ticket.id, ticket.clone());
        ticket
    }

    fn index_open_claim(&self, claim: &Claim) {
        if claim.is_open() {
            self.inner.open_claims.insert(claim.barcode_id, claim.id);
        } else {
            self.inner
                .open_claims
                .remove_if(&claim.barcode_id, |_, id| *id == claim.id);
        }
    }
}

#[async_trait]
impl ClaimRepository for InMemoryStore {
    async fn create_claim(
        &self,
        claim: NewClaim,
        submitted: NewTimelineEvent,
        request_key: Option<RequestKey>,
    ) -> StorageResult<CommittedClaim> {
        let _writes = self.inner.claim_writes.lock();

        if let Some(open) = self.inner.open_claims.get(&claim.barcode_id) {
            return Err(StorageError::Conflict(format!(
                "barcode already has open claim {}",
                *open
            )));
        }
        if self.inner.claim_numbers.contains_key(&claim.claim_number) {
            return Err(StorageError::Duplicate(claim.claim_number));
        }
        self.check_request_key(request_key.as_ref())?;

        let id = ClaimId::new(IdAllocator::next(&self.inner.ids.claim));
        let mut claim = claim.into_claim(id);
        claim.version = 1;

        self.inner.claim_numbers.insert(claim.claim_number.clone(), id);
        self.index_open_claim(&claim);
        self.inner.claims.insert(id, claim.clone());
        if let Some(key) = request_key {
            self.inner.request_keys.insert(key, id);
        }
        let events = self.append_timeline_locked(id, vec![submitted]);

        Ok(CommittedClaim {
            claim,
            events,
            ticket: None,
        })
    }

    async fn get_claim(&self, id: ClaimId) -> StorageResult<Option<Claim>> {
        Ok(self.inner.claims.get(&id).map(|row| row.clone()))
    }

    async fn get_claim_by_number(&self, number: &str) -> StorageResult<Option<Claim>> {
        let Some(id) = self.inner.claim_numbers.get(number).map(|id| *id) else {
            return Ok(None);
        };
        self.get_claim(id).await
    }

    async fn open_claim_for_barcode(&self, barcode_id: BarcodeId) -> StorageResult<Option<Claim>> {
        let Some(id) = self.inner.open_claims.get(&barcode_id).map(|id| *id) else {
            return Ok(None);
        };
        self.get_claim(id).await
    }

    async fn list_claims(&self, filter: &ClaimFilter, page: Page) -> StorageResult<Paged<Claim>> {
        let mut rows: Vec<_> = self
            .inner
            .claims
            .iter()
            .filter(|row| filter.matches(row.value()))
            .map(|row| row.value().clone())
            .collect();
        rows.sort_by(|a, b| b.claim_date.cmp(&a.claim_date).then(b.id.cmp(&a.id)));
        Ok(page.slice(rows))
    }

    async fn commit_claim(
        &self,
        commit: ClaimCommit,
        ticket: Option<TicketWrite>,
    ) -> StorageResult<CommittedClaim> {
        let _writes = self.inner.claim_writes.lock();
        let ClaimCommit {
            mut claim,
            expected_version,
            events,
            request_key,
        } = commit;

        let stored_version = self
            .inner
            .claims
            .get(&claim.id)
            .map(|row| row.version)
            .ok_or_else(|| StorageError::NotFound(claim.id.to_string()))?;
        if stored_version != expected_version {
            return Err(StorageError::Conflict(format!(
                "claim {} is at version {stored_version}, expected {expected_version}",
                claim.claim_number
            )));
        }
        if let Some(write) = &ticket {
            self.check_ticket_write(claim.id, write)?;
        }
        self.check_request_key(request_key.as_ref())?;

        claim.version = expected_version + 1;
        self.index_open_claim(&claim);
        self.inner.claims.insert(claim.id, claim.clone());
        let ticket = ticket.map(|write| self.apply_ticket_write(write));
        if let Some(key) = request_key {
            self.inner.request_keys.insert(key, claim.id);
        }
        let events = self.append_timeline_locked(claim.id, events);

        Ok(CommittedClaim {
            claim,
            events,
            ticket,
        })
    }

    async fn timeline(&self, id: ClaimId) -> StorageResult<Vec<TimelineEvent>> {
        Ok(self
            .inner
            .timelines
            .get(&id)
            .map(|log| log.clone())
            .unwrap_or_default())
    }

    async fn recall_request(&self, key: &RequestKey) -> StorageResult<Option<ClaimId>> {
        Ok(self.inner.request_keys.get(key).map(|id| *id))
    }

    async fn delete_claim(&self, id: ClaimId) -> StorageResult<bool> {
        let _writes = self.inner.claim_writes.lock();
        let Some((_, claim)) = self.inner.claims.remove(&id) else {
            return Ok(false);
        };
        self.inner.claim_numbers.remove(&claim.claim_number);
        self.inner
            .open_claims
            .remove_if(&claim.barcode_id, |_, open| *open == id);
        self.inner.timelines.remove(&id);
        self.inner.tickets.retain(|_, t| t.claim_id != id);
        self.inner.attachments.retain(|_, a| a.claim_id != id);
        self.inner.request_keys.retain(|_, claim_id| *claim_id != id);
        Ok(true)
    }
}

#[async_trait]
impl TicketRepository for InMemoryStore {
    async fn get_ticket(&self, id: TicketId) -> StorageResult<Option<RepairTicket>> {
        Ok(self.inner.tickets.get(&id).map(|t| t.clone()))
    }

    async fn active_ticket(&self, claim_id: ClaimId) -> StorageResult<Option<RepairTicket>> {
        Ok(self.live_ticket(claim_id))
    }

    async fn tickets_for_claim(&self, claim_id: ClaimId) -> StorageResult<Vec<RepairTicket>> {
        let mut tickets: Vec<_> = self
            .inner
            .tickets
            .iter()
            .filter(|t| t.claim_id == claim_id)
            .map(|t| t.value().clone())
            .collect();
        tickets.sort_by_key(|t| t.id);
        Ok(tickets)
    }
}

#[async_trait]
impl AttachmentRepository for InMemoryStore {
    async fn create_attachment(&self, attachment: NewAttachment) -> StorageResult<ClaimAttachment> {
        if !self.inner.claims.contains_key(&attachment.claim_id) {
            return Err(StorageError::NotFound(attachment.claim_id.to_string()));
        }
        let id = AttachmentId::new(IdAllocator::next(&self.inner.ids.attachment));
        let row = attachment.into_attachment(id);
        self.inner.attachments.insert(id, row.clone());
        Ok(row)
    }

    async fn get_attachment(&self, id: AttachmentId) -> StorageResult<Option<ClaimAttachment>> {
        Ok(self.inner.attachments.get(&id).map(|a| a.clone()))
    }

    async fn list_attachments(&self, claim_id: ClaimId) -> StorageResult<Vec<ClaimAttachment>> {
        let mut rows: Vec<_> = self
            .inner
            .attachments
            .iter()
            .filter(|a| a.claim_id == claim_id)
            .map(|a| a.value().clone())
            .collect();
        rows.sort_by_key(|a| a.id);
        Ok(rows)
    }

    async fn set_scan_result(
        &self,
        id: AttachmentId,
        outcome: ScanOutcome,
    ) -> StorageResult<ClaimAttachment> {
        let mut row = self
            .inner
            .attachments
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        if row.scan_status != ScanStatus::Pending {
            return Err(StorageError::Conflict(format!(
                "attachment {id} already scanned as {}",
                row.scan_status
            )));
        }
        row.scan_status = outcome.status();
        row.scan_detail = outcome.detail;
        row.scanned_at = Some(outcome.scanned_at);
        Ok(row.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::Timestamp;
    use warranty_core::{
        ActorId, ActorType, AttachmentType, BarcodeCode, ClaimStatus, ContactSnapshot, CustomerId,
        IssueCategory, NewTicket, Priority, ProductId, Severity, TimelineEventType,
    };

    fn ts(s: &str) -> Timestamp {
        s.parse().unwrap()
    }

    fn new_claim(number: &str, barcode: u64) -> NewClaim {
        NewClaim {
            claim_number: number.into(),
            barcode_id: BarcodeId::new(barcode),
            barcode: BarcodeCode::parse("WB-2024-00000001").unwrap(),
            customer_id: CustomerId::new(5),
            product_id: ProductId::new(1),
            storefront_id: None,
            issue_category: IssueCategory::Hardware,
            issue_description: "screen flickers after boot".into(),
            severity: Severity::Medium,
            priority: Priority::Normal,
            contact: ContactSnapshot {
                name: "Dana".into(),
                email: "dana@example.com".into(),
                phone: None,
                pickup_address: None,
            },
            customer_notes: None,
            tags: vec![],
            submitted_by: ActorId::new(5),
            claim_date: ts("2024-03-01T10:00:00Z"),
        }
    }

    fn event(kind: TimelineEventType, at: &str) -> NewTimelineEvent {
        NewTimelineEvent {
            event_type: kind,
            description: kind.to_string(),
            actor_id: ActorId::new(2),
            actor_type: ActorType::Agent,
            timestamp: ts(at),
            visible_to_customer: true,
        }
    }

    fn new_ticket(claim_id: ClaimId, number: &str) -> NewTicket {
        NewTicket {
            claim_id,
            ticket_number: number.into(),
            priority: Priority::Normal,
            assigned_technician: Some(ActorId::new(7)),
            estimated_hours: 1.5,
            estimated_completion_date: None,
            description: "swap the display assembly".into(),
            special_instructions: None,
            required_parts: vec![],
            estimated_cost: None,
            customer_approval_required: false,
            created_by: ActorId::new(2),
            created_at: ts("2024-03-02T00:00:00Z"),
        }
    }

    async fn submitted(store: &InMemoryStore) -> Claim {
        store
            .create_claim(
                new_claim("WAR-2024-000001", 1),
                event(TimelineEventType::Submitted, "2024-03-01T10:00:00Z"),
                None,
            )
            .await
            .unwrap()
            .claim
    }

    #[tokio::test]
    async fn one_open_claim_per_barcode() {
        let store = InMemoryStore::new();
        submitted(&store).await;

        let err = store
            .create_claim(
                new_claim("WAR-2024-000002", 1),
                event(TimelineEventType::Submitted, "2024-03-01T11:00:00Z"),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[tokio::test]
    async fn commit_checks_version_and_appends_in_order() {
        let store = InMemoryStore::new();
        let claim = submitted(&store).await;

        let mut next = claim.clone();
        next.set_status(ClaimStatus::Validated, ActorId::new(2), ts("2024-03-01T12:00:00Z"));
        let committed = store
            .commit_claim(
                ClaimCommit {
                    claim: next.clone(),
                    expected_version: claim.version,
                    // Earlier than the submission: clamped to keep the log monotonic.
                    events: vec![event(TimelineEventType::Validated, "2024-03-01T09:00:00Z")],
                    request_key: Some(RequestKey::new("req-1")),
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(committed.claim.version, claim.version + 1);
        assert_eq!(committed.events[0].sequence, 2);
        assert_eq!(committed.events[0].timestamp, ts("2024-03-01T10:00:00Z"));

        let stale = store
            .commit_claim(
                ClaimCommit {
                    claim: next,
                    expected_version: claim.version,
                    events: vec![],
                    request_key: None,
                },
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(stale, StorageError::Conflict(_)));

        assert_eq!(
            store.recall_request(&RequestKey::new("req-1")).await.unwrap(),
            Some(claim.id)
        );
        assert_eq!(store.timeline(claim.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn only_one_live_ticket_per_claim() {
        let store = InMemoryStore::new();
        let claim = submitted(&store).await;

        let first = store
            .commit_claim(
                ClaimCommit {
                    claim: claim.clone(),
                    expected_version: claim.version,
                    events: vec![],
                    request_key: None,
                },
                Some(TicketWrite::Insert(new_ticket(claim.id, "RPR-2024-000001"))),
            )
            .await
            .unwrap();
        let ticket = first.ticket.unwrap();
        assert_eq!(ticket.version, 1);

        let err = store
            .commit_claim(
                ClaimCommit {
                    claim: first.claim.clone(),
                    expected_version: first.claim.version,
                    events: vec![],
                    request_key: None,
                },
                Some(TicketWrite::Insert(new_ticket(claim.id, "RPR-2024-000002"))),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
        assert_eq!(store.active_ticket(claim.id).await.unwrap().unwrap().id, ticket.id);
    }

    #[tokio::test]
    async fn delete_cascades() {
        let store = InMemoryStore::new();
        let claim = submitted(&store).await;
        store
            .create_attachment(NewAttachment {
                claim_id: claim.id,
                filename: "receipt.pdf".into(),
                storage_ref: "s3://bucket/receipt.pdf".into(),
                size_bytes: 2048,
                mime_type: "application/pdf".into(),
                attachment_type: AttachmentType::Receipt,
                uploaded_by: ActorId::new(5),
                uploaded_at: ts("2024-03-01T10:05:00Z"),
            })
            .await
            .unwrap();

        assert!(store.delete_claim(claim.id).await.unwrap());
        assert!(store.get_claim(claim.id).await.unwrap().is_none());
        assert!(store.timeline(claim.id).await.unwrap().is_empty());
        assert!(store.list_attachments(claim.id).await.unwrap().is_empty());
        assert!(store.open_claim_for_barcode(claim.barcode_id).await.unwrap().is_none());
        assert!(!store.delete_claim(claim.id).await.unwrap());
    }

    #[tokio::test]
    async fn scan_result_is_set_once() {
        let store = InMemoryStore::new();
        let claim = submitted(&store).await;
        let attachment = store
            .create_attachment(NewAttachment {
                claim_id: claim.id,
                filename: "photo.jpg".into(),
                storage_ref: "blob/1".into(),
                size_bytes: 10,
                mime_type: "image/jpeg".into(),
                attachment_type: AttachmentType::Photo,
                uploaded_by: ActorId::new(5),
                uploaded_at: ts("2024-03-01T10:05:00Z"),
            })
            .await
            .unwrap();

        let outcome = ScanOutcome {
            passed: false,
            detail: Some("eicar".into()),
            scanned_at: ts("2024-03-01T10:06:00Z"),
        };
        let scanned = store.set_scan_result(attachment.id, outcome.clone()).await.unwrap();
        assert_eq!(scanned.scan_status, ScanStatus::Failed);

        let err = store.set_scan_result(attachment.id, outcome).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }
}
