use serde_json::json;

use sourcerer_core::{AggregateId, AggregateRoot, DomainError};
use sourcerer_events::{
    EventKind, Mutator, MutatorError, ReactionIntent, Reactor, ReactorError,
};

use crate::account::{Account, AccountEvent, AccountOpened, MoneyAdded, MoneySubtracted};

/// Email template requested when an account runs dry.
pub const ACCOUNT_BROKE_TEMPLATE: &str = "AccountBroke";

/// Projects money movements onto `Account::balance`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BalanceMutator;

impl BalanceMutator {
    fn ensure_account(account: &Account, target: AggregateId) -> Result<(), DomainError> {
        if account.id() != target {
            return Err(DomainError::AggregateMismatch {
                expected: account.id().to_string(),
                found: target.to_string(),
            });
        }
        Ok(())
    }

    fn ensure_positive(amount: i64) -> Result<(), DomainError> {
        if amount <= 0 {
            return Err(DomainError::validation("amount must be positive"));
        }
        Ok(())
    }
}

impl Mutator<Account, AccountEvent> for BalanceMutator {
    fn name(&self) -> &str {
        "BalanceMutator"
    }

    fn event_types(&self) -> &[&'static str] {
        &[
            AccountOpened::EVENT_TYPE,
            MoneyAdded::EVENT_TYPE,
            MoneySubtracted::EVENT_TYPE,
        ]
    }

    fn mutate(&self, account: &Account, event: &AccountEvent) -> Result<Account, MutatorError> {
        match event {
            AccountEvent::AccountOpened(e) => {
                Self::ensure_account(account, e.account_id)?;
                Ok(account.with_owner(&e.owner_email))
            }
            AccountEvent::MoneyAdded(e) => {
                Self::ensure_account(account, e.account_id)?;
                Self::ensure_positive(e.amount)?;
                let balance = account
                    .balance()
                    .checked_add(e.amount)
                    .ok_or_else(|| DomainError::invariant("balance overflow"))?;
                Ok(account.with_balance(balance))
            }
            AccountEvent::MoneySubtracted(e) => {
                Self::ensure_account(account, e.account_id)?;
                Self::ensure_positive(e.amount)?;
                let balance = account
                    .balance()
                    .checked_sub(e.amount)
                    .ok_or_else(|| DomainError::invariant("balance underflow"))?;
                Ok(account.with_balance(balance))
            }
            AccountEvent::DoNotStoreThisEvent(_) => Ok(account.clone()),
        }
    }
}

/// Requests an `AccountBroke` email when a withdrawal leaves the balance at or
/// below zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct BrokeReactor;

impl Reactor<Account, AccountEvent> for BrokeReactor {
    fn name(&self) -> &str {
        "BrokeReactor"
    }

    fn event_types(&self) -> &[&'static str] {
        &[MoneySubtracted::EVENT_TYPE]
    }

    fn react(
        &self,
        event: &AccountEvent,
        account: &Account,
    ) -> Result<Vec<ReactionIntent>, ReactorError> {
        let AccountEvent::MoneySubtracted(e) = event else {
            return Ok(vec![]);
        };
        if !account.is_broke() {
            return Ok(vec![]);
        }

        let recipient = account
            .owner_email()
            .map(str::to_string)
            .unwrap_or_else(|| format!("account-{}", account.id()));

        Ok(vec![ReactionIntent::email(
            ACCOUNT_BROKE_TEMPLATE,
            recipient,
            json!({
                "account_id": account.id(),
                "balance": account.balance(),
                "last_withdrawal": e.amount,
            }),
        )])
    }
}
