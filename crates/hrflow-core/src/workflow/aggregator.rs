//! Approval quorum resolution.
//!
//! The aggregator only reads records and emits a verdict; it never mutates
//! anything. With `total` configured approvers and threshold `t`:
//!
//! - `approved >= t` resolves to `Approved`
//! - `approved + pending < t` resolves to `Rejected` (the threshold is out of reach)
//! - anything else is `Unresolved`
//!
//! Both decided outcomes are monotone: approvals never decrease and the
//! pending count never increases, so a verdict never flips once reached.

use std::collections::BTreeSet;

use hrflow_types::ActorId;
use hrflow_types::approval::{ApprovalRecord, ApprovalStatus, Verdict};
use hrflow_types::definition::Quorum;

/// Decision counts over a node's configured approvers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub approved: usize,
    pub rejected: usize,
    /// Approvers who may still act. A configured approver without a record
    /// counts as pending.
    pub pending: usize,
    pub skipped: usize,
}

impl Tally {
    /// Count decisions for `node_id`, considering only configured approvers.
    pub fn count(node_id: &str, approvers: &BTreeSet<ActorId>, records: &[ApprovalRecord]) -> Self {
        let mut tally = Tally::default();
        for approver in approvers {
            let status = records
                .iter()
                .find(|r| r.node_id == node_id && &r.approver_id == approver)
                .map(|r| r.status)
                .unwrap_or(ApprovalStatus::Pending);
            match status {
                ApprovalStatus::Approved => tally.approved += 1,
                ApprovalStatus::Rejected => tally.rejected += 1,
                ApprovalStatus::Pending => tally.pending += 1,
                ApprovalStatus::Skipped => tally.skipped += 1,
            }
        }
        tally
    }
}

/// Resolve a node's verdict from its tally.
pub fn verdict(quorum: Quorum, total: usize, tally: Tally) -> Verdict {
    let threshold = quorum.threshold(total);
    if tally.approved >= threshold {
        Verdict::Approved
    } else if tally.approved + tally.pending < threshold {
        Verdict::Rejected
    } else {
        Verdict::Unresolved
    }
}

/// Count and resolve in one step.
pub fn aggregate(
    node_id: &str,
    approvers: &BTreeSet<ActorId>,
    quorum: Quorum,
    records: &[ApprovalRecord],
) -> Verdict {
    let tally = Tally::count(node_id, approvers, records);
    verdict(quorum, approvers.len(), tally)
}
