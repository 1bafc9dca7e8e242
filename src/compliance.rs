//! Operator compliance checks and the audit trail

use crate::errors::{ComplianceViolation, SettlementError, StoreResult};
use crate::models::{AuditLog, NewAuditLog};
use crate::store::Store;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

pub const JURISDICTION_BLOCK: &str = "compliance.jurisdiction_block";
pub const MAX_BET_BLOCK: &str = "compliance.max_bet_block";

pub const DEFAULT_AUDIT_LIMIT: usize = 50;

#[derive(Clone)]
pub struct ComplianceService {
    store: Arc<dyn Store>,
}

impl ComplianceService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// An operator without limits, or with an empty allow-list, accepts
    /// every jurisdiction.
    pub async fn check_jurisdiction(&self, operator_id: i64, jurisdiction: &str) -> Result<(), SettlementError> {
        let Some(limits) = self.store.operator_limits(operator_id).await? else {
            return Ok(());
        };
        if limits.allowed_jurisdictions.is_empty()
            || limits.allowed_jurisdictions.iter().any(|j| j == jurisdiction)
        {
            return Ok(());
        }
        Err(ComplianceViolation::JurisdictionNotAllowed(jurisdiction.to_string()).into())
    }

    /// A max bet of zero means no limit.
    pub async fn check_max_bet(&self, operator_id: i64, amount: f64) -> Result<(), SettlementError> {
        let Some(limits) = self.store.operator_limits(operator_id).await? else {
            return Ok(());
        };
        if limits.max_bet == 0.0 || amount <= limits.max_bet {
            return Ok(());
        }
        Err(ComplianceViolation::MaxBetExceeded {
            amount,
            max_bet: limits.max_bet,
        }
        .into())
    }

    /// Run both checks; a block is written to the audit log before the
    /// violation is returned.
    pub async fn check(
        &self,
        operator_id: i64,
        player_id: i64,
        jurisdiction: &str,
        amount: f64,
    ) -> Result<(), SettlementError> {
        if let Err(err) = self.check_jurisdiction(operator_id, jurisdiction).await {
            if matches!(err, SettlementError::ComplianceViolation(_)) {
                self.log(operator_id, Some(player_id), JURISDICTION_BLOCK, json!({ "jurisdiction": jurisdiction }))
                    .await;
            }
            return Err(err);
        }

        if let Err(err) = self.check_max_bet(operator_id, amount).await {
            if matches!(err, SettlementError::ComplianceViolation(_)) {
                self.log(operator_id, Some(player_id), MAX_BET_BLOCK, json!({ "amount": amount }))
                    .await;
            }
            return Err(err);
        }

        Ok(())
    }

    /// Best effort: a failed audit write is reported in the log only.
    pub async fn log(&self, operator_id: i64, player_id: Option<i64>, action: &str, details: Value) {
        let entry = NewAuditLog {
            operator_id,
            player_id,
            action: action.to_string(),
            details,
        };
        match self.store.insert_audit_log(entry).await {
            Ok(row) => info!(operator_id, audit_id = row.id, action, "Audit entry recorded"),
            Err(e) => warn!(operator_id, action, error = %e, "Failed to write audit entry"),
        }
    }

    pub async fn list_logs(
        &self,
        operator_id: i64,
        player_id: Option<i64>,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<AuditLog>> {
        self.store.list_audit_logs(operator_id, player_id, limit, offset).await
    }
}
