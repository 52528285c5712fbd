use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};

use sourcerer_accounts::{Account, AccountEvent, BalanceMutator, BrokeReactor};
use sourcerer_core::AggregateId;
use sourcerer_events::LoggingIntentSink;
use sourcerer_infra::event_store::{EventFilter, EventStore};
use sourcerer_infra::{DispatchOutcome, Sourcerer};

use crate::Commands;

type AccountSourcerer = Sourcerer<Box<dyn EventStore>, Account, AccountEvent>;

fn sourcerer(store: Box<dyn EventStore>) -> AccountSourcerer {
    Sourcerer::builder(store)
        .add_mutator(BalanceMutator)
        .add_reactor(BrokeReactor)
        .sink(Arc::new(LoggingIntentSink))
        .build()
}

fn outcome_json(outcome: &DispatchOutcome<Account>) -> Value {
    json!({
        "stored": outcome.record.as_ref().map(|r| r.id),
        "account": outcome.aggregate_after,
        "intents": outcome.intents,
        "failed_reactors": outcome
            .failed_reactors
            .iter()
            .map(|f| json!({ "reactor": f.reactor, "error": f.error.to_string() }))
            .collect::<Vec<_>>(),
    })
}

/// Rebuild `account` from the log, then raise `event` against it.
fn raise_for(sourcerer: &AccountSourcerer, account: AggregateId, event: AccountEvent) -> Result<Value> {
    sourcerer.rebuild(account)?;
    let outcome = sourcerer.raise(event)?;
    Ok(outcome_json(&outcome))
}

pub fn execute(command: Commands, store: Box<dyn EventStore>) -> Result<Value> {
    let sourcerer = sourcerer(store);

    match command {
        Commands::Open { email, account } => {
            let account = account.unwrap_or_default();
            raise_for(&sourcerer, account, AccountEvent::opened(account, email))
        }
        Commands::Add { account, amount } => {
            raise_for(&sourcerer, account, AccountEvent::money_added(account, amount))
        }
        Commands::Subtract { account, amount } => raise_for(
            &sourcerer,
            account,
            AccountEvent::money_subtracted(account, amount),
        ),
        Commands::Ping => {
            let outcome = sourcerer.raise(AccountEvent::do_not_store())?;
            Ok(outcome_json(&outcome))
        }
        Commands::List {
            event_type,
            account,
            after,
        } => {
            let filter = EventFilter {
                event_type,
                aggregate_id: account,
            };
            let records = sourcerer
                .store()
                .list(filter)
                .after(after)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(serde_json::to_value(records)?)
        }
        Commands::Get { id } => {
            let record = sourcerer.store().get(id)?;
            Ok(serde_json::to_value(record)?)
        }
        Commands::Replay { account } => {
            let (state, report) = sourcerer.rebuild(account)?;
            if report.events_applied == 0 {
                bail!("no stored events for account {account}");
            }
            Ok(json!({ "account": state, "report": report }))
        }
        Commands::Balances => {
            let report = sourcerer.rebuild_all()?;
            let accounts = sourcerer.aggregates()?;
            Ok(json!({ "accounts": accounts, "report": report }))
        }
        Commands::Demo => demo(&sourcerer),
    }
}

fn demo(sourcerer: &AccountSourcerer) -> Result<Value> {
    let account = AggregateId::new();
    let steps = [
        AccountEvent::money_added(account, 1234),
        AccountEvent::money_subtracted(account, 1000),
        AccountEvent::money_subtracted(account, 1000),
    ];

    let mut results = Vec::with_capacity(steps.len());
    for event in steps {
        let outcome = sourcerer
            .raise(event)
            .context("demo event was not dispatched")?;
        results.push(outcome_json(&outcome));
    }

    tracing::info!(%account, "demo finished");
    Ok(json!({ "account": account, "steps": results }))
}
