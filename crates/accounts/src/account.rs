use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sourcerer_core::{Aggregate, AggregateId, AggregateRoot};
use sourcerer_events::{Event, EventKind};

/// Aggregate root: Account.
///
/// All fields are derived from events by `BalanceMutator`; nothing else writes
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    id: AggregateId,
    owner_email: Option<String>,
    balance: i64,
    version: u64,
}

impl Account {
    pub fn owner_email(&self) -> Option<&str> {
        self.owner_email.as_deref()
    }

    pub fn balance(&self) -> i64 {
        self.balance
    }

    pub fn is_broke(&self) -> bool {
        self.balance <= 0
    }

    pub(crate) fn with_balance(&self, balance: i64) -> Self {
        Self {
            balance,
            ..self.clone()
        }
    }

    pub(crate) fn with_owner(&self, owner_email: &str) -> Self {
        Self {
            owner_email: Some(owner_email.to_string()),
            ..self.clone()
        }
    }
}

impl AggregateRoot for Account {
    fn id(&self) -> AggregateId {
        self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Aggregate for Account {
    const AGGREGATE_TYPE: &'static str = "account";

    fn empty(id: AggregateId) -> Self {
        Self {
            id,
            owner_email: None,
            balance: 0,
            version: 0,
        }
    }

    fn advance_version(&mut self) {
        self.version += 1;
    }
}

/// Event: AccountOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOpened {
    pub account_id: AggregateId,
    pub owner_email: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MoneyAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyAdded {
    pub account_id: AggregateId,
    pub amount: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MoneySubtracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneySubtracted {
    pub account_id: AggregateId,
    pub amount: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DoNotStoreThisEvent.
///
/// Transient signal; deliberately lacks the storable capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoNotStoreThisEvent {
    pub occurred_at: DateTime<Utc>,
}

impl EventKind for AccountOpened {
    const EVENT_TYPE: &'static str = "AccountOpened";
    const STORABLE: bool = true;
}

impl EventKind for MoneyAdded {
    const EVENT_TYPE: &'static str = "MoneyAdded";
    const STORABLE: bool = true;
}

impl EventKind for MoneySubtracted {
    const EVENT_TYPE: &'static str = "MoneySubtracted";
    const STORABLE: bool = true;
}

impl EventKind for DoNotStoreThisEvent {
    const EVENT_TYPE: &'static str = "DoNotStoreThisEvent";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountEvent {
    AccountOpened(AccountOpened),
    MoneyAdded(MoneyAdded),
    MoneySubtracted(MoneySubtracted),
    DoNotStoreThisEvent(DoNotStoreThisEvent),
}

impl AccountEvent {
    pub fn opened(account_id: AggregateId, owner_email: impl Into<String>) -> Self {
        AccountEvent::AccountOpened(AccountOpened {
            account_id,
            owner_email: owner_email.into(),
            occurred_at: Utc::now(),
        })
    }

    pub fn money_added(account_id: AggregateId, amount: i64) -> Self {
        AccountEvent::MoneyAdded(MoneyAdded {
            account_id,
            amount,
            occurred_at: Utc::now(),
        })
    }

    pub fn money_subtracted(account_id: AggregateId, amount: i64) -> Self {
        AccountEvent::MoneySubtracted(MoneySubtracted {
            account_id,
            amount,
            occurred_at: Utc::now(),
        })
    }

    pub fn do_not_store() -> Self {
        AccountEvent::DoNotStoreThisEvent(DoNotStoreThisEvent {
            occurred_at: Utc::now(),
        })
    }
}

impl Event for AccountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AccountEvent::AccountOpened(_) => AccountOpened::EVENT_TYPE,
            AccountEvent::MoneyAdded(_) => MoneyAdded::EVENT_TYPE,
            AccountEvent::MoneySubtracted(_) => MoneySubtracted::EVENT_TYPE,
            AccountEvent::DoNotStoreThisEvent(_) => DoNotStoreThisEvent::EVENT_TYPE,
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AccountEvent::AccountOpened(e) => e.occurred_at,
            AccountEvent::MoneyAdded(e) => e.occurred_at,
            AccountEvent::MoneySubtracted(e) => e.occurred_at,
            AccountEvent::DoNotStoreThisEvent(e) => e.occurred_at,
        }
    }

    fn aggregate_id(&self) -> Option<AggregateId> {
        match self {
            AccountEvent::AccountOpened(e) => Some(e.account_id),
            AccountEvent::MoneyAdded(e) => Some(e.account_id),
            AccountEvent::MoneySubtracted(e) => Some(e.account_id),
            AccountEvent::DoNotStoreThisEvent(_) => None,
        }
    }

    fn is_storable(&self) -> bool {
        match self {
            AccountEvent::AccountOpened(_) => AccountOpened::STORABLE,
            AccountEvent::MoneyAdded(_) => MoneyAdded::STORABLE,
            AccountEvent::MoneySubtracted(_) => MoneySubtracted::STORABLE,
            AccountEvent::DoNotStoreThisEvent(_) => DoNotStoreThisEvent::STORABLE,
        }
    }
}
