// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use chrono::NaiveDate;
use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use invoice_ledger_rs::{
    AccountId, BillingActionPolicy, BillingFact, BillingPeriod, Dispatcher, FlatPricer,
    MemoryFacts, MemoryLedger, MemoryPayments, StaticTags, SubscriptionId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// Invoice Ledger - Reconcile billing facts into invoices
///
/// Reads billing facts from a CSV file, runs one reconciliation pass per
/// account at the target date, and outputs account summaries to stdout.
#[derive(Parser, Debug)]
#[command(name = "invoice-ledger-rs")]
#[command(about = "An invoice engine that reconciles billing-fact CSVs", long_about = None)]
struct Args {
    /// Path to CSV file with billing facts
    ///
    /// Expected format: type,account,subscription,date,amount,period,policy
    /// Example: cargo run -- facts.csv > accounts.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Reconciliation target date (defaults to today)
    #[arg(long)]
    target_date: Option<NaiveDate>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let target = args
        .target_date
        .unwrap_or_else(|| chrono::Local::now().date_naive());

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let loader = match load_facts(BufReader::new(file)) {
        Ok(loader) => loader,
        Err(e) => {
            eprintln!("Error reading facts: {}", e);
            process::exit(1);
        }
    };

    let engine = Dispatcher::new(
        Arc::new(MemoryLedger::new()),
        loader.facts.clone(),
        loader.pricer.clone(),
        Arc::new(MemoryPayments::new()),
        Arc::new(StaticTags::new()),
    );

    if let Err(e) = write_summaries(&engine, &loader, target, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `type, account, subscription, date, amount, period, policy`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(rename = "type")]
    fact_type: String,
    account: String,
    #[serde(default)]
    subscription: String,
    date: NaiveDate,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    amount: Option<Decimal>,
    #[serde(default)]
    period: String,
    #[serde(default)]
    policy: String,
}

/// Collected fact stream plus the name-to-identifier mappings the CSV
/// uses.
pub struct FactLoader {
    pub facts: Arc<MemoryFacts>,
    pub pricer: Arc<FlatPricer>,
    /// CSV account labels in first-seen order.
    pub accounts: BTreeMap<String, AccountId>,
    subscriptions: BTreeMap<String, SubscriptionId>,
}

impl FactLoader {
    fn new() -> Self {
        Self {
            facts: Arc::new(MemoryFacts::new()),
            pricer: Arc::new(FlatPricer::new()),
            accounts: BTreeMap::new(),
            subscriptions: BTreeMap::new(),
        }
    }

    fn account(&mut self, label: &str) -> AccountId {
        *self
            .accounts
            .entry(label.to_string())
            .or_insert_with(AccountId::new)
    }

    fn subscription(&mut self, label: &str) -> SubscriptionId {
        *self
            .subscriptions
            .entry(label.to_string())
            .or_insert_with(SubscriptionId::new)
    }

    /// Converts one CSV record into a billing fact and records it.
    ///
    /// Returns `false` for records that don't parse into a known fact;
    /// callers skip those.
    fn apply(&mut self, record: CsvRecord) -> bool {
        let account = self.account(&record.account);
        let period = match record.period.to_lowercase().as_str() {
            "" | "monthly" => BillingPeriod::Monthly,
            "annual" => BillingPeriod::Annual,
            _ => return false,
        };

        match record.fact_type.to_lowercase().as_str() {
            "start" => {
                let Some(rate) = record.amount else {
                    return false;
                };
                let subscription = self.subscription(&record.subscription);
                self.pricer.set_rate(subscription, rate, period);
                self.facts.push(
                    account,
                    BillingFact::SubscriptionStart {
                        subscription_id: subscription,
                        effective: record.date,
                        period,
                    },
                );
            }
            "change" => {
                let subscription = self.subscription(&record.subscription);
                self.facts.push(
                    account,
                    BillingFact::SubscriptionChange {
                        subscription_id: subscription,
                        effective: record.date,
                    },
                );
            }
            "cancel" => {
                let policy = match record.policy.to_lowercase().as_str() {
                    "" | "immediate" => BillingActionPolicy::Immediate,
                    "end_of_term" => BillingActionPolicy::EndOfTerm,
                    _ => return false,
                };
                let subscription = self.subscription(&record.subscription);
                self.facts.push(
                    account,
                    BillingFact::SubscriptionCancel {
                        subscription_id: subscription,
                        requested: record.date,
                        policy,
                    },
                );
            }
            "fixed" => {
                let Some(amount) = record.amount else {
                    return false;
                };
                let subscription = if record.subscription.is_empty() {
                    None
                } else {
                    Some(self.subscription(&record.subscription))
                };
                self.facts.push(
                    account,
                    BillingFact::FixedCharge {
                        subscription_id: subscription,
                        effective: record.date,
                        amount,
                    },
                );
            }
            "credit" => {
                let Some(amount) = record.amount else {
                    return false;
                };
                self.facts
                    .push(account, BillingFact::Credit { effective: record.date, amount });
            }
            _ => return false,
        }
        true
    }
}

/// Reads billing facts from a CSV reader.
///
/// Streaming parse; malformed rows and unknown fact types are skipped
/// rather than aborting the run.
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is
/// invalid.
pub fn load_facts<R: Read>(reader: R) -> Result<FactLoader, csv::Error> {
    let mut loader = FactLoader::new();

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for result in rdr.deserialize::<CsvRecord>() {
        match result {
            Ok(record) => {
                if !loader.apply(record) {
                    tracing::debug!("skipping unrecognized fact record");
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "skipping malformed row");
                continue;
            }
        }
    }

    Ok(loader)
}

/// One output row per account.
#[derive(Debug, Serialize)]
struct AccountSummary {
    account: String,
    invoices: usize,
    balance: Decimal,
    credit: Decimal,
}

/// Reconciles every account at `target` and writes summary rows.
///
/// # CSV Format
///
/// Columns: `account, invoices, balance, credit`, amounts at currency
/// scale.
///
/// # Errors
///
/// Returns a CSV error if writing fails. Accounts whose reconciliation
/// parks are reported on the row with a zeroed balance and logged.
pub fn write_summaries<W: Write>(
    engine: &Dispatcher,
    loader: &FactLoader,
    target: NaiveDate,
    writer: W,
) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    for (label, account) in &loader.accounts {
        if let Err(e) = engine.reconcile(*account, target) {
            tracing::warn!(account = %label, error = %e, "reconciliation failed");
        }
        let balance = engine.account_balance(*account).unwrap_or(Decimal::ZERO);
        wtr.serialize(AccountSummary {
            account: label.clone(),
            invoices: engine.invoices_for_account(*account, false).len(),
            balance: balance.round_dp(2),
            credit: engine.account_credit(*account).round_dp(2),
        })?;
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Cursor;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn engine_for(loader: &FactLoader) -> Dispatcher {
        Dispatcher::new(
            Arc::new(MemoryLedger::new()),
            loader.facts.clone(),
            loader.pricer.clone(),
            Arc::new(MemoryPayments::new()),
            Arc::new(StaticTags::new()),
        )
    }

    #[test]
    fn parse_simple_start() {
        let csv = "type,account,subscription,date,amount,period,policy\n\
                   start,a1,s1,2015-06-14,249.95,monthly,\n";
        let loader = load_facts(Cursor::new(csv)).unwrap();
        assert_eq!(loader.accounts.len(), 1);

        let engine = engine_for(&loader);
        let account = loader.accounts["a1"];
        let invoice = engine.reconcile(account, date(2015, 6, 14)).unwrap().unwrap();
        assert_eq!(invoice.raw_balance(), dec!(249.95));
    }

    #[test]
    fn parse_cancel_and_credit() {
        let csv = "type,account,subscription,date,amount,period,policy\n\
                   credit,a1,,2013-06-15,20.00,,\n\
                   start,a1,s1,2013-06-15,19.95,monthly,\n\
                   cancel,a1,s1,2013-07-01,,,immediate\n";
        let loader = load_facts(Cursor::new(csv)).unwrap();

        let engine = engine_for(&loader);
        let account = loader.accounts["a1"];
        engine.reconcile(account, date(2013, 7, 1)).unwrap().unwrap();
        // Prorated charge fully covered by credit.
        assert_eq!(engine.account_balance(account).unwrap(), Decimal::ZERO);
        assert_eq!(engine.account_credit(account), dec!(9.36));
    }

    #[test]
    fn skip_malformed_rows() {
        let csv = "type,account,subscription,date,amount,period,policy\n\
                   start,a1,s1,2015-06-14,249.95,monthly,\n\
                   bogus,row,that,is-not-a-date,x,y,z\n\
                   start,a2,s2,2015-06-14,10.00,monthly,\n";
        let loader = load_facts(Cursor::new(csv)).unwrap();
        assert_eq!(loader.accounts.len(), 2);
    }

    #[test]
    fn summaries_cover_every_account() {
        let csv = "type,account,subscription,date,amount,period,policy\n\
                   start,a1,s1,2015-06-14,100.00,monthly,\n\
                   start,a2,s2,2015-06-14,50.00,monthly,\n";
        let loader = load_facts(Cursor::new(csv)).unwrap();
        let engine = engine_for(&loader);

        let mut output = Vec::new();
        write_summaries(&engine, &loader, date(2015, 6, 14), &mut output).unwrap();

        let output = String::from_utf8(output).unwrap();
        assert!(output.contains("account,invoices,balance,credit"));
        assert!(output.contains("a1,1,100.00,0"));
        assert!(output.contains("a2,1,50.00,0"));
    }

    #[test]
    fn whitespace_is_trimmed() {
        let csv = "type,account,subscription,date,amount,period,policy\n \
                   start , a1 , s1 , 2015-06-14 , 249.95 , monthly ,\n";
        let loader = load_facts(Cursor::new(csv)).unwrap();
        assert_eq!(loader.accounts.len(), 1);
    }
}
