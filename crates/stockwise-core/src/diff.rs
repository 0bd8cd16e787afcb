//! # Line Diffing
//!
//! Compares the lines a caller submitted against the lines already persisted
//! and tags every line with what must happen to it.
//!
//! ## Classification
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  incoming id == 0                      ──► Insert                       │
//! │  incoming id == persisted id, changed  ──► Update { before, after }     │
//! │  incoming id == persisted id, same     ──► Unchanged                    │
//! │  incoming id not persisted             ──► ReferentialMismatch (error)  │
//! │  persisted id never referenced         ──► Delete                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! "Changed" means quantity, amount, unit or product differ. A rate-only edit
//! with the same amount is `Unchanged` and is not copied.

use std::collections::{HashMap, HashSet};

use crate::delta::LedgerLine;
use crate::error::{CoreError, CoreResult};
use crate::types::{AuditInfo, BookingDetail, DetailLine, LineRequest};
use crate::NEW_ID;

// =============================================================================
// Diffable Line
// =============================================================================

/// A persisted line shape the differ can match, compare and rebuild.
pub trait DiffableLine: LedgerLine + Clone {
    /// Persisted id (`0` before insert).
    fn line_id(&self) -> i64;

    /// Maps a request into a fresh, unsaved line.
    fn from_request(request: &LineRequest) -> Self;

    /// True if the request changes a stock-relevant field.
    fn differs_from(&self, request: &LineRequest) -> bool;

    /// Copies request fields onto this line, keeping identity and audit.
    fn apply_request(&mut self, request: &LineRequest);
}

impl DiffableLine for DetailLine {
    fn line_id(&self) -> i64 {
        self.id
    }

    fn from_request(request: &LineRequest) -> Self {
        DetailLine {
            id: NEW_ID,
            transaction_id: NEW_ID,
            product_id: request.product_id.clone(),
            unit_id: request.unit_id.clone(),
            quantity: request.quantity,
            rate: request.rate,
            amount: request.amount,
            audit: AuditInfo::default(),
        }
    }

    fn differs_from(&self, request: &LineRequest) -> bool {
        self.quantity != request.quantity
            || self.amount != request.amount
            || self.unit_id != request.unit_id
            || self.product_id != request.product_id
    }

    fn apply_request(&mut self, request: &LineRequest) {
        self.product_id = request.product_id.clone();
        self.unit_id = request.unit_id.clone();
        self.quantity = request.quantity;
        self.rate = request.rate;
        self.amount = request.amount;
    }
}

impl DiffableLine for BookingDetail {
    fn line_id(&self) -> i64 {
        self.id
    }

    fn from_request(request: &LineRequest) -> Self {
        BookingDetail {
            id: NEW_ID,
            booking_id: NEW_ID,
            product_id: request.product_id.clone(),
            unit_id: request.unit_id.clone(),
            booked_quantity: request.quantity,
            rate: request.rate,
            amount: request.amount,
            base_quantity: Default::default(),
            base_rate: Default::default(),
            audit: AuditInfo::default(),
        }
    }

    fn differs_from(&self, request: &LineRequest) -> bool {
        self.booked_quantity != request.quantity
            || self.amount != request.amount
            || self.unit_id != request.unit_id
            || self.product_id != request.product_id
    }

    fn apply_request(&mut self, request: &LineRequest) {
        self.product_id = request.product_id.clone();
        self.unit_id = request.unit_id.clone();
        self.booked_quantity = request.quantity;
        self.rate = request.rate;
        self.amount = request.amount;
    }
}

impl From<&LineRequest> for DetailLine {
    fn from(request: &LineRequest) -> Self {
        <DetailLine as DiffableLine>::from_request(request)
    }
}

impl From<&LineRequest> for BookingDetail {
    fn from(request: &LineRequest) -> Self {
        <BookingDetail as DiffableLine>::from_request(request)
    }
}

// =============================================================================
// Line Command
// =============================================================================

/// What the persistence layer must do with one line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineCommand<L> {
    /// New line, not yet persisted.
    Insert(L),
    /// Persisted line whose values change.
    Update { before: L, after: L },
    /// Persisted line resubmitted as-is.
    Unchanged(L),
    /// Persisted line no longer referenced.
    Delete(L),
}

/// Tag of a [`LineCommand`] without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandTag {
    Insert,
    Update,
    Unchanged,
    Delete,
}

impl<L> LineCommand<L> {
    /// Returns the command tag.
    pub fn tag(&self) -> CommandTag {
        match self {
            LineCommand::Insert(_) => CommandTag::Insert,
            LineCommand::Update { .. } => CommandTag::Update,
            LineCommand::Unchanged(_) => CommandTag::Unchanged,
            LineCommand::Delete(_) => CommandTag::Delete,
        }
    }

    /// The line as it looks after the command is applied.
    ///
    /// For `Delete` this is the removed line.
    pub fn line(&self) -> &L {
        match self {
            LineCommand::Insert(line)
            | LineCommand::Unchanged(line)
            | LineCommand::Delete(line) => line,
            LineCommand::Update { after, .. } => after,
        }
    }

    /// Mutable access to the resulting line (used to derive values or stamp
    /// audit metadata before writing).
    pub fn line_mut(&mut self) -> &mut L {
        match self {
            LineCommand::Insert(line)
            | LineCommand::Unchanged(line)
            | LineCommand::Delete(line) => line,
            LineCommand::Update { after, .. } => after,
        }
    }

    /// Consumes the command, returning the resulting line.
    pub fn into_line(self) -> L {
        match self {
            LineCommand::Insert(line)
            | LineCommand::Unchanged(line)
            | LineCommand::Delete(line) => line,
            LineCommand::Update { after, .. } => after,
        }
    }

    /// Returns true if the line survives the reconciliation.
    pub fn is_live(&self) -> bool {
        !matches!(self, LineCommand::Delete(_))
    }
}

// =============================================================================
// Diff
// =============================================================================

/// Diffs incoming request lines against persisted lines.
///
/// ## Arguments
/// * `kind` - Label used in error messages ("purchase", "booking", ...)
/// * `existing` - Lines currently persisted for the header (empty for a new one)
/// * `incoming` - Lines the caller submitted
///
/// ## Returns
/// Commands for incoming lines in submission order, followed by `Delete`
/// commands for unreferenced persisted lines in persisted order.
///
/// ## Errors
/// `ReferentialMismatch` when an incoming id is not persisted, or when the
/// same persisted id is submitted twice.
pub fn diff_lines<L: DiffableLine>(
    kind: &str,
    existing: &[L],
    incoming: &[LineRequest],
) -> CoreResult<Vec<LineCommand<L>>> {
    let by_id: HashMap<i64, &L> = existing.iter().map(|l| (l.line_id(), l)).collect();
    let mut referenced: HashSet<i64> = HashSet::with_capacity(incoming.len());
    let mut commands = Vec::with_capacity(incoming.len() + existing.len());

    for request in incoming {
        if request.is_new() {
            commands.push(LineCommand::Insert(L::from_request(request)));
            continue;
        }

        let persisted = by_id
            .get(&request.id)
            .ok_or_else(|| CoreError::mismatch(kind, request.id))?;

        if !referenced.insert(request.id) {
            return Err(CoreError::mismatch(kind, request.id));
        }

        if persisted.differs_from(request) {
            let before = (*persisted).clone();
            let mut after = before.clone();
            after.apply_request(request);
            commands.push(LineCommand::Update { before, after });
        } else {
            commands.push(LineCommand::Unchanged((*persisted).clone()));
        }
    }

    for line in existing {
        if !referenced.contains(&line.line_id()) {
            commands.push(LineCommand::Delete(line.clone()));
        }
    }

    Ok(commands)
}

/// Tags every persisted line as `Delete` (whole-transaction removal).
pub fn delete_all<L: Clone>(existing: &[L]) -> Vec<LineCommand<L>> {
    existing.iter().cloned().map(LineCommand::Delete).collect()
}

// =============================================================================
// Unit Tests
// =============================================================================
