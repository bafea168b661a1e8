//! Approval workflow.
//!
//! Routes trade candidates either straight to execution (below the
//! auto-approval ceiling) or to multi-party sign-off under an m-of-n
//! quorum. Approved candidates are queued for the treasury; the workflow
//! never talks to marketplaces.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::types::{ApprovalState, CandidateId, CoreError, SignerId, TradeCandidate};

// ---------------------------------------------------------------------------
// Quorum
// ---------------------------------------------------------------------------

/// `required` distinct approvals out of a fixed participant set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quorum {
    required: usize,
    participants: BTreeSet<SignerId>,
}

impl Quorum {
    pub fn new<I, S>(required: usize, participants: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<SignerId>,
    {
        let participants: BTreeSet<SignerId> = participants.into_iter().map(Into::into).collect();
        if required == 0 || required > participants.len() {
            return Err(CoreError::InvalidQuorum {
                required,
                participants: participants.len(),
            });
        }
        Ok(Self {
            required,
            participants,
        })
    }

    /// Every participant must approve.
    pub fn unanimous<I, S>(participants: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<SignerId>,
    {
        let participants: BTreeSet<SignerId> = participants.into_iter().map(Into::into).collect();
        Self::new(participants.len(), participants)
    }

    pub fn required(&self) -> usize {
        self.required
    }

    pub fn participants(&self) -> &BTreeSet<SignerId> {
        &self.participants
    }

    pub fn is_participant(&self, signer: &str) -> bool {
        self.participants.contains(signer)
    }

    pub fn is_met(&self, approvals: &BTreeSet<SignerId>) -> bool {
        approvals
            .iter()
            .filter(|s| self.participants.contains(*s))
            .count()
            >= self.required
    }

    /// Whether this quorum demands strictly more than `other`, either in
    /// absolute approvals or as a share of its participants.
    pub fn is_stricter_than(&self, other: &Quorum) -> bool {
        let mine = Decimal::from(self.required) / Decimal::from(self.participants.len());
        let theirs = Decimal::from(other.required) / Decimal::from(other.participants.len());
        self.required > other.required || mine > theirs
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Routing policy for new candidates. Candidates already submitted keep
/// the quorum and TTL they were submitted under.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalPolicy {
    /// Capital strictly below this is auto-approved.
    pub auto_approval_ceiling: Decimal,
    pub quorum: Quorum,
    /// Sign-off window for candidates awaiting approval.
    pub ttl: Duration,
    /// How long closed records stay queryable before `prune` drops them.
    pub retention: Duration,
}

impl ApprovalPolicy {
    /// 3-of-5 quorum, $5,000 ceiling, one hour to sign off, a day of history.
    pub fn with_signers<I, S>(signers: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<SignerId>,
    {
        Ok(Self {
            auto_approval_ceiling: dec!(5000),
            quorum: Quorum::new(3, signers)?,
            ttl: Duration::hours(1),
            retention: Duration::hours(24),
        })
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// Quorum progress of one candidate, for the signature collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApprovalProgress {
    pub candidate_id: CandidateId,
    pub state: ApprovalState,
    pub approvals: Vec<SignerId>,
    pub required: usize,
    pub participants: usize,
    pub expires_at: Option<DateTime<Utc>>,
    pub vetoed_by: Option<SignerId>,
}

struct Record {
    candidate: TradeCandidate,
    quorum: Quorum,
    approvals: BTreeSet<SignerId>,
    vetoed_by: Option<SignerId>,
    expires_at: Option<DateTime<Utc>>,
    /// When the record reached a terminal state.
    closed_at: Option<DateTime<Utc>>,
}

impl Record {
    fn state(&self) -> ApprovalState {
        self.candidate.approval_state
    }

    fn transition(&mut self, next: ApprovalState, now: DateTime<Utc>) {
        debug_assert!(self.state().can_transition_to(next));
        self.candidate.approval_state = next;
        if next.is_terminal() {
            self.closed_at = Some(now);
        }
    }

    /// Lazily expire an awaiting candidate whose window has passed.
    fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        match (self.state(), self.expires_at) {
            (ApprovalState::AwaitingSignoff, Some(deadline)) if now >= deadline => {
                self.transition(ApprovalState::Expired, now);
                info!(
                    candidate_id = %self.candidate.id,
                    approvals = self.approvals.len(),
                    required = self.quorum.required(),
                    "Candidate expired before reaching quorum"
                );
                true
            }
            _ => false,
        }
    }

    fn progress(&self) -> ApprovalProgress {
        ApprovalProgress {
            candidate_id: self.candidate.id,
            state: self.state(),
            approvals: self.approvals.iter().cloned().collect(),
            required: self.quorum.required(),
            participants: self.quorum.participants().len(),
            expires_at: self.expires_at,
            vetoed_by: self.vetoed_by.clone(),
        }
    }
}

struct Inner {
    policy: ApprovalPolicy,
    records: HashMap<CandidateId, Record>,
    /// Cleared candidates not yet handed to the treasury.
    cleared: Vec<TradeCandidate>,
}

pub struct ApprovalWorkflow {
    inner: Mutex<Inner>,
}

impl ApprovalWorkflow {
    pub fn new(policy: ApprovalPolicy) -> Self {
        Self {
            inner: Mutex::new(Inner {
                policy,
                records: HashMap::new(),
                cleared: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, CoreError> {
        self.inner
            .lock()
            .map_err(|_| CoreError::LockPoisoned("approval workflow"))
    }

    /// Swap the policy for subsequent submissions.
    pub fn reload(&self, policy: ApprovalPolicy) -> Result<(), CoreError> {
        self.lock()?.policy = policy;
        Ok(())
    }

    pub fn policy(&self) -> Result<ApprovalPolicy, CoreError> {
        Ok(self.lock()?.policy.clone())
    }

    /// Route a freshly gated candidate.
    pub fn submit(&self, mut candidate: TradeCandidate, now: DateTime<Utc>) -> Result<ApprovalState, CoreError> {
        if candidate.approval_state != ApprovalState::Pending {
            return Err(CoreError::CandidateClosed {
                id: candidate.id,
                state: candidate.approval_state,
            });
        }

        let mut inner = self.lock()?;
        if inner.records.contains_key(&candidate.id) {
            return Err(CoreError::CandidateClosed {
                id: candidate.id,
                state: candidate.approval_state,
            });
        }

        let policy = inner.policy.clone();
        let auto = candidate.proposed_capital < policy.auto_approval_ceiling;
        let (state, expires_at) = if auto {
            (ApprovalState::AutoApproved, None)
        } else {
            (ApprovalState::AwaitingSignoff, Some(now + policy.ttl))
        };
        candidate.approval_state = state;

        info!(
            candidate_id = %candidate.id,
            capital = %candidate.proposed_capital,
            ceiling = %policy.auto_approval_ceiling,
            state = %state,
            "Candidate submitted for approval"
        );

        if auto {
            inner.cleared.push(candidate.clone());
        }
        inner.records.insert(
            candidate.id,
            Record {
                candidate,
                quorum: policy.quorum,
                approvals: BTreeSet::new(),
                vetoed_by: None,
                expires_at,
                closed_at: auto.then_some(now),
            },
        );
        Ok(state)
    }

    /// Record one signer's approval.
    ///
    /// Duplicates are idempotent and approvals after `approved` are no-ops.
    /// An approval arriving after the TTL is refused with `QuorumTimeout`.
    pub fn approve(&self, id: CandidateId, signer: &str, now: DateTime<Utc>) -> Result<ApprovalState, CoreError> {
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        let record = inner
            .records
            .get_mut(&id)
            .ok_or(CoreError::UnknownCandidate(id))?;

        if !record.quorum.is_participant(signer) {
            warn!(candidate_id = %id, signer, "Approval from unknown signer");
            return Err(CoreError::UnknownSigner(signer.to_string()));
        }

        if record.expire_if_due(now) || record.state() == ApprovalState::Expired {
            return Err(CoreError::QuorumTimeout(id));
        }

        match record.state() {
            ApprovalState::Approved => {
                debug!(candidate_id = %id, signer, "Approval after quorum ignored");
                return Ok(ApprovalState::Approved);
            }
            ApprovalState::AwaitingSignoff => {}
            state => return Err(CoreError::CandidateClosed { id, state }),
        }

        if !record.approvals.insert(signer.to_string()) {
            debug!(candidate_id = %id, signer, "Duplicate approval ignored");
            return Ok(record.state());
        }

        info!(
            candidate_id = %id,
            signer,
            approvals = record.approvals.len(),
            required = record.quorum.required(),
            "Approval recorded"
        );

        if record.quorum.is_met(&record.approvals) {
            record.transition(ApprovalState::Approved, now);
            info!(candidate_id = %id, "Quorum reached, candidate approved");
            inner.cleared.push(record.candidate.clone());
        }
        Ok(record.state())
    }

    /// Reject immediately on any participant's veto.
    pub fn veto(&self, id: CandidateId, signer: &str, now: DateTime<Utc>) -> Result<ApprovalState, CoreError> {
        let mut inner = self.lock()?;
        let record = inner
            .records
            .get_mut(&id)
            .ok_or(CoreError::UnknownCandidate(id))?;

        if !record.quorum.is_participant(signer) {
            return Err(CoreError::UnknownSigner(signer.to_string()));
        }
        if record.expire_if_due(now) {
            return Err(CoreError::QuorumTimeout(id));
        }

        match record.state() {
            ApprovalState::AwaitingSignoff | ApprovalState::Pending => {
                record.transition(ApprovalState::Rejected, now);
                record.vetoed_by = Some(signer.to_string());
                warn!(candidate_id = %id, signer, "Candidate vetoed");
                Ok(ApprovalState::Rejected)
            }
            state => Err(CoreError::CandidateClosed { id, state }),
        }
    }

    /// Expire every awaiting candidate past its deadline. Idempotent.
    pub fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<CandidateId>, CoreError> {
        let mut inner = self.lock()?;
        let mut expired: Vec<CandidateId> = inner
            .records
            .values_mut()
            .filter_map(|r| r.expire_if_due(now).then_some(r.candidate.id))
            .collect();
        expired.sort();
        Ok(expired)
    }

    pub fn state(&self, id: CandidateId) -> Result<ApprovalState, CoreError> {
        let inner = self.lock()?;
        inner
            .records
            .get(&id)
            .map(Record::state)
            .ok_or(CoreError::UnknownCandidate(id))
    }

    pub fn progress(&self, id: CandidateId) -> Result<ApprovalProgress, CoreError> {
        let inner = self.lock()?;
        inner
            .records
            .get(&id)
            .map(Record::progress)
            .ok_or(CoreError::UnknownCandidate(id))
    }

    pub fn candidate(&self, id: CandidateId) -> Result<TradeCandidate, CoreError> {
        let inner = self.lock()?;
        inner
            .records
            .get(&id)
            .map(|r| r.candidate.clone())
            .ok_or(CoreError::UnknownCandidate(id))
    }

    /// Candidates still waiting for signatures.
    pub fn awaiting(&self) -> Result<Vec<ApprovalProgress>, CoreError> {
        let inner = self.lock()?;
        let mut out: Vec<ApprovalProgress> = inner
            .records
            .values()
            .filter(|r| r.state() == ApprovalState::AwaitingSignoff)
            .map(Record::progress)
            .collect();
        out.sort_by_key(|p| p.expires_at);
        Ok(out)
    }

    /// Forget closed records older than the retention window. Cleared
    /// candidates not yet drained are unaffected.
    pub fn prune(&self, now: DateTime<Utc>) -> Result<usize, CoreError> {
        let mut inner = self.lock()?;
        let cutoff = now - inner.policy.retention;
        let before = inner.records.len();
        inner
            .records
            .retain(|_, r| !matches!(r.closed_at, Some(closed) if closed <= cutoff));
        let pruned = before - inner.records.len();
        if pruned > 0 {
            debug!(pruned, remaining = inner.records.len(), "Closed approval records pruned");
        }
        Ok(pruned)
    }

    /// Candidates not yet paid for: awaiting sign-off, or cleared and not
    /// yet handed to the treasury.
    pub fn outstanding(&self) -> Result<Vec<TradeCandidate>, CoreError> {
        let inner = self.lock()?;
        let mut out: Vec<TradeCandidate> = inner
            .records
            .values()
            .filter(|r| r.state() == ApprovalState::AwaitingSignoff)
            .map(|r| r.candidate.clone())
            .collect();
        out.extend(inner.cleared.iter().cloned());
        Ok(out)
    }

    /// Hand over cleared candidates in the order they were cleared.
    pub fn drain_cleared(&self) -> Result<Vec<TradeCandidate>, CoreError> {
        Ok(std::mem::take(&mut self.lock()?.cleared))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
