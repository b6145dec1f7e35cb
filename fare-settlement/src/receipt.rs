//! Receipt-code exchange
//!
//! A payee shows a scannable code; a payer confirms it and the ledger
//! moves the money payer→owner as one unit. Codes are consumed at most
//! once; the code id doubles as the transfer's idempotency key, so a
//! confirm retried across a crash cannot double-charge.
//!
//! # Lifecycle
//!
//! - `issue_code` creates a LIVE code and expires the owner's previous
//!   LIVE code (at most one per owner)
//! - `confirm_payment` checks LIVE + TTL + amount, transfers, then
//!   marks CONSUMED and records the receipt transaction
//! - A failed transfer leaves the code LIVE and untouched

use crate::{
    config::ReceiptConfig,
    types::{CodeStatus, ReceiptCode, ReceiptTransaction},
    Error, Result,
};
use balance_ledger::{BalanceLedger, ReferenceId, TransferOutcome, UserId};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Receipt-code exchange
pub struct ReceiptCodeExchange {
    /// All codes by id
    codes: DashMap<Uuid, ReceiptCode>,

    /// Live-code index: at most one entry per owner
    live_codes: DashMap<UserId, Uuid>,

    /// Receipt transactions by code id (exactly one per consumed code)
    transactions: DashMap<Uuid, ReceiptTransaction>,

    /// Money movement
    ledger: Arc<BalanceLedger>,

    /// TTL policy
    config: ReceiptConfig,
}

impl ReceiptCodeExchange {
    /// Create a new exchange
    pub fn new(ledger: Arc<BalanceLedger>, config: ReceiptConfig) -> Self {
        Self {
            codes: DashMap::new(),
            live_codes: DashMap::new(),
            transactions: DashMap::new(),
            ledger,
            config,
        }
    }

    /// Issue a LIVE code for an owner
    ///
    /// Any prior LIVE code of the same owner is expired. A `ttl` beyond
    /// the configured maximum is clamped; `None` uses the default.
    pub fn issue_code(
        &self,
        owner: &UserId,
        fixed_amount: Option<Decimal>,
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<ReceiptCode> {
        if let Some(amount) = fixed_amount {
            if amount <= Decimal::ZERO {
                return Err(Error::InvalidAmount(amount));
            }
        }

        let max_ttl = Duration::seconds(self.config.max_ttl_secs as i64);
        let ttl = ttl
            .unwrap_or_else(|| Duration::seconds(self.config.default_ttl_secs as i64))
            .min(max_ttl);

        let code = ReceiptCode {
            code_id: Uuid::now_v7(),
            owner: owner.clone(),
            fixed_amount,
            status: CodeStatus::Live,
            issued_at: now,
            expires_at: now + ttl,
        };
        self.codes.insert(code.code_id, code.clone());

        // At most one live code per owner: retire the previous one
        if let Some(previous) = self.live_codes.insert(owner.clone(), code.code_id) {
            if let Some(mut old) = self.codes.get_mut(&previous) {
                if old.status == CodeStatus::Live {
                    old.status = CodeStatus::Expired;
                }
            }
        }

        tracing::info!(owner = %owner, code = %code.code_id, "Receipt code issued");
        Ok(code)
    }

    /// Confirm a payment against a code
    ///
    /// With a fixed amount bound to the code, `stated_amount` must match
    /// it exactly. The transfer and the LIVE→CONSUMED transition execute
    /// as one unit; a transfer refusal leaves the code LIVE.
    pub fn confirm_payment(
        &self,
        payer: &UserId,
        code_id: Uuid,
        stated_amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<ReceiptTransaction> {
        let mut code = self
            .codes
            .get_mut(&code_id)
            .ok_or(Error::CodeNotFound(code_id))?;

        match code.status {
            CodeStatus::Consumed => return Err(Error::CodeConsumed(code_id)),
            CodeStatus::Expired => return Err(Error::CodeExpired(code_id)),
            CodeStatus::Live => {}
        }

        if code.is_expired(now) {
            code.status = CodeStatus::Expired;
            return Err(Error::CodeExpired(code_id));
        }

        if code.owner == *payer {
            return Err(Error::SelfPayment);
        }

        let amount = match code.fixed_amount {
            Some(fixed) => {
                if stated_amount != fixed {
                    return Err(Error::AmountMismatch {
                        expected: fixed,
                        actual: stated_amount,
                    });
                }
                fixed
            }
            None => {
                if stated_amount <= Decimal::ZERO {
                    return Err(Error::InvalidAmount(stated_amount));
                }
                stated_amount
            }
        };

        let reference = ReferenceId::from(code_id);
        let outcome = self
            .ledger
            .transfer(&reference, payer, &code.owner, amount)?;

        let transaction = match outcome {
            TransferOutcome::Applied { .. } => ReceiptTransaction {
                transaction_id: Uuid::now_v7(),
                payer: payer.clone(),
                receiver: code.owner.clone(),
                amount,
                code_id,
                settled_at: now,
            },
            // A retry after a crash between transfer and consume:
            // reuse the recorded transaction, or rebuild it from the
            // ledger entries
            TransferOutcome::AlreadySettled => match self.transactions.get(&code_id) {
                Some(existing) => existing.value().clone(),
                None => {
                    let entries = self.ledger.reference_entries(&reference)?;
                    let amount = entries
                        .first()
                        .map(|entry| entry.amount)
                        .unwrap_or(amount);
                    ReceiptTransaction {
                        transaction_id: Uuid::now_v7(),
                        payer: payer.clone(),
                        receiver: code.owner.clone(),
                        amount,
                        code_id,
                        settled_at: now,
                    }
                }
            },
        };

        code.status = CodeStatus::Consumed;
        self.transactions.insert(code_id, transaction.clone());

        tracing::info!(
            payer = %payer,
            receiver = %code.owner,
            code = %code_id,
            amount = %transaction.amount,
            "Receipt code consumed"
        );

        Ok(transaction)
    }

    /// Get a code by id
    pub fn get_code(&self, code_id: Uuid) -> Option<ReceiptCode> {
        self.codes.get(&code_id).map(|code| code.value().clone())
    }

    /// The owner's LIVE code, if any
    pub fn live_code_of(&self, owner: &UserId) -> Option<ReceiptCode> {
        let code_id = *self.live_codes.get(owner)?;
        self.codes
            .get(&code_id)
            .filter(|code| code.status == CodeStatus::Live)
            .map(|code| code.value().clone())
    }

    /// The receipt transaction recorded for a consumed code
    pub fn transaction_for_code(&self, code_id: Uuid) -> Option<ReceiptTransaction> {
        self.transactions
            .get(&code_id)
            .map(|transaction| transaction.value().clone())
    }
}
