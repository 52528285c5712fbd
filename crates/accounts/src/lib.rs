//! Accounts domain module (event-projected).
//!
//! A small bank-account domain: money is added and subtracted through events,
//! `BalanceMutator` projects them onto the `Account` aggregate, and
//! `BrokeReactor` asks for an `AccountBroke` email once the balance is gone.
//! Pure domain logic only (no IO, no storage).

pub mod account;
pub mod balance;

pub use account::{
    Account, AccountEvent, AccountOpened, DoNotStoreThisEvent, MoneyAdded, MoneySubtracted,
};
pub use balance::{ACCOUNT_BROKE_TEMPLATE, BalanceMutator, BrokeReactor};
