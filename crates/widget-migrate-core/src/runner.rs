use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

use crate::transforms::{
    bittrex_to_bch, coinmarketcap_v2, exchange_override, gdax_to_coinbasepro, quoine_spelling,
    BITTREX_TO_BCH, COINMARKETCAP, EXCHANGE_OVERRIDE, GDAX_TO_COINBASEPRO, QUOINE,
};
use crate::{
    ConfigRecord, FlagStore, MigrationError, RecordId, RecordStore, RecordWrite, SkipReason,
    RECORD_KEYS,
};

pub type Transform = fn(&ConfigRecord) -> Result<Vec<RecordWrite>, SkipReason>;

/// Values a dry run would have written, consulted before the store on later reads.
type PendingWrites = BTreeMap<(RecordId, String), String>;

#[derive(Clone, Copy)]
pub struct MigrationStep {
    /// Completion flag key. Never rename or reuse a shipped name.
    pub name: &'static str,
    pub description: &'static str,
    pub transform: Transform,
}

impl std::fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationStep")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Append-only, ordered set of migration steps.
#[derive(Debug, Clone, Default)]
pub struct MigrationRegistry {
    steps: Vec<MigrationStep>,
}

impl MigrationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every shipped migration in the order it must run.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            steps: vec![
                MigrationStep {
                    name: EXCHANGE_OVERRIDE,
                    description: "populate exchange-specific coin and currency names",
                    transform: exchange_override,
                },
                MigrationStep {
                    name: QUOINE,
                    description: "correct the QUIONE exchange misspelling",
                    transform: quoine_spelling,
                },
                MigrationStep {
                    name: COINMARKETCAP,
                    description: "remap coin names for the coinmarketcap v2 API",
                    transform: coinmarketcap_v2,
                },
                MigrationStep {
                    name: BITTREX_TO_BCH,
                    description: "follow bittrex renaming BCC to BCH",
                    transform: bittrex_to_bch,
                },
                MigrationStep {
                    name: GDAX_TO_COINBASEPRO,
                    description: "rename GDAX to COINBASEPRO",
                    transform: gdax_to_coinbasepro,
                },
            ],
        }
    }

    /// Append a step after every step already registered.
    ///
    /// # Errors
    /// Returns [`MigrationError::Registry`] when the name is empty or already registered.
    pub fn register(&mut self, step: MigrationStep) -> Result<(), MigrationError> {
        if step.name.trim().is_empty() {
            return Err(MigrationError::Registry("migration name must not be empty".to_string()));
        }
        if self.steps.iter().any(|existing| existing.name == step.name) {
            return Err(MigrationError::Registry(format!(
                "migration `{}` is already registered",
                step.name
            )));
        }
        self.steps.push(step);
        Ok(())
    }

    #[must_use]
    pub fn steps(&self) -> &[MigrationStep] {
        &self.steps
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|step| step.name).collect()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunOptions {
    /// Compute outcomes without writing records or flags. Later steps still observe
    /// the writes of earlier ones, so the report matches what a real run would do.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    AlreadyApplied,
    Applied,
    WouldApply,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordOutcome {
    Updated { writes: Vec<RecordWrite> },
    Unchanged,
    Skipped { reason: SkipReason },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordReport {
    pub record_id: RecordId,
    #[serde(flatten)]
    pub outcome: RecordOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepReport {
    pub name: String,
    pub status: StepStatus,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub records: Vec<RecordReport>,
}

impl StepReport {
    fn new(name: &str, status: StepStatus, records: Vec<RecordReport>) -> Self {
        let mut report = Self {
            name: name.to_string(),
            status,
            updated: 0,
            unchanged: 0,
            skipped: 0,
            records: Vec::new(),
        };
        for record in &records {
            match record.outcome {
                RecordOutcome::Updated { .. } => report.updated += 1,
                RecordOutcome::Unchanged => report.unchanged += 1,
                RecordOutcome::Skipped { .. } => report.skipped += 1,
            }
        }
        report.records = records;
        report
    }

    #[must_use]
    pub fn outcome(&self, record_id: RecordId) -> Option<&RecordOutcome> {
        self.records.iter().find(|record| record.record_id == record_id).map(|r| &r.outcome)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: Ulid,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub dry_run: bool,
    pub steps: Vec<StepReport>,
}

impl RunReport {
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|step| step.name == name)
    }

    /// Names of steps that executed (or would execute) during this run.
    #[must_use]
    pub fn executed(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|step| step.status != StepStatus::AlreadyApplied)
            .map(|step| step.name.as_str())
            .collect()
    }
}

/// Names of registered steps whose completion flag is unset.
///
/// # Errors
/// Returns [`MigrationError::Flags`] when a flag cannot be read.
pub fn pending<F>(
    registry: &MigrationRegistry,
    flags: &F,
) -> Result<Vec<&'static str>, MigrationError>
where
    F: FlagStore + ?Sized,
{
    let mut names = Vec::new();
    for step in registry.steps() {
        if !is_applied(flags, step.name)? {
            names.push(step.name);
        }
    }
    Ok(names)
}

/// Apply every unapplied step, in registration order, to every record.
///
/// Per-record failures are reported as [`RecordOutcome::Skipped`] and never retried;
/// the step is marked applied regardless.
///
/// # Errors
/// Returns an error when a completion flag cannot be read or written, or when the
/// record store cannot enumerate its records. The failing step stays unapplied.
pub fn run_all<F, S>(
    registry: &MigrationRegistry,
    flags: &mut F,
    records: &mut S,
    options: RunOptions,
) -> Result<RunReport, MigrationError>
where
    F: FlagStore + ?Sized,
    S: RecordStore + ?Sized,
{
    let mut report = RunReport {
        run_id: Ulid::new(),
        started_at: OffsetDateTime::now_utc(),
        dry_run: options.dry_run,
        steps: Vec::with_capacity(registry.steps().len()),
    };
    let mut pending_writes = PendingWrites::new();

    for step in registry.steps() {
        if is_applied(flags, step.name)? {
            tracing::debug!(migration = step.name, "already applied");
            report.steps.push(StepReport::new(step.name, StepStatus::AlreadyApplied, Vec::new()));
            continue;
        }

        let ids = records
            .record_ids()
            .map_err(|source| MigrationError::Enumerate { name: step.name.to_string(), source })?;
        tracing::info!(
            migration = step.name,
            records = ids.len(),
            dry_run = options.dry_run,
            "running migration"
        );

        let outcomes = ids
            .into_iter()
            .map(|record_id| RecordReport {
                record_id,
                outcome: migrate_record(step, records, &mut pending_writes, record_id, options),
            })
            .collect::<Vec<_>>();

        let status = if options.dry_run {
            StepStatus::WouldApply
        } else {
            flags
                .set_applied(step.name, true)
                .map_err(|source| MigrationError::Flags { name: step.name.to_string(), source })?;
            StepStatus::Applied
        };

        let step_report = StepReport::new(step.name, status, outcomes);
        tracing::info!(
            migration = step.name,
            updated = step_report.updated,
            unchanged = step_report.unchanged,
            skipped = step_report.skipped,
            "migration finished"
        );
        report.steps.push(step_report);
    }

    Ok(report)
}

fn is_applied<F>(flags: &F, name: &str) -> Result<bool, MigrationError>
where
    F: FlagStore + ?Sized,
{
    flags
        .is_applied(name)
        .map_err(|source| MigrationError::Flags { name: name.to_string(), source })
}

fn migrate_record<S>(
    step: &MigrationStep,
    records: &mut S,
    pending_writes: &mut PendingWrites,
    record_id: RecordId,
    options: RunOptions,
) -> RecordOutcome
where
    S: RecordStore + ?Sized,
{
    let result = load_record(records, pending_writes, record_id)
        .and_then(|record| (step.transform)(&record))
        .and_then(|writes| {
            if options.dry_run {
                for write in &writes {
                    pending_writes.insert((record_id, write.key.clone()), write.value.clone());
                }
            } else {
                records.set_all(record_id, &writes)?;
            }
            Ok(writes)
        });

    match result {
        Ok(writes) if writes.is_empty() => RecordOutcome::Unchanged,
        Ok(writes) => {
            tracing::debug!(
                migration = step.name,
                record = %record_id,
                writes = writes.len(),
                "record updated"
            );
            RecordOutcome::Updated { writes }
        }
        Err(reason) => {
            tracing::warn!(migration = step.name, record = %record_id, %reason, "record skipped");
            RecordOutcome::Skipped { reason }
        }
    }
}

fn load_record<S>(
    records: &S,
    pending_writes: &PendingWrites,
    record_id: RecordId,
) -> Result<ConfigRecord, SkipReason>
where
    S: RecordStore + ?Sized,
{
    let mut record = ConfigRecord::new(record_id);
    for key in RECORD_KEYS {
        let value = match pending_writes.get(&(record_id, key.to_string())) {
            Some(value) => Some(value.clone()),
            None => records.get(record_id, key)?,
        };
        if let Some(value) = value {
            record.values.insert(key.to_string(), value);
        }
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;

    use super::*;
    use crate::{
        MemoryFlagStore, MemoryRecordStore, StoreError, KEY_COIN, KEY_COIN_CUSTOM, KEY_CURRENCY,
        KEY_CURRENCY_CUSTOM, KEY_EXCHANGE,
    };

    fn run(
        registry: &MigrationRegistry,
        flags: &mut MemoryFlagStore,
        store: &mut MemoryRecordStore,
    ) -> RunReport {
        match run_all(registry, flags, store, RunOptions::default()) {
            Ok(report) => report,
            Err(err) => panic!("migration run failed: {err}"),
        }
    }

    fn value(store: &MemoryRecordStore, id: i64, key: &str) -> Option<String> {
        store.values(RecordId(id)).and_then(|values| values.get(key).cloned())
    }

    fn single(name: &'static str) -> MigrationRegistry {
        let mut registry = MigrationRegistry::new();
        let builtin = MigrationRegistry::builtin();
        let Some(step) = builtin.steps().iter().find(|step| step.name == name).copied() else {
            panic!("unknown builtin migration {name}");
        };
        if let Err(err) = registry.register(step) {
            panic!("failed to register {name}: {err}");
        }
        registry
    }

    fn seeded_store() -> MemoryRecordStore {
        let mut store = MemoryRecordStore::new();
        store.insert(RecordId(1), [(KEY_EXCHANGE, "KRAKEN"), (KEY_COIN, "BTC")]);
        store.insert(RecordId(2), [(KEY_EXCHANGE, "QUIONE"), (KEY_COIN, "BTC")]);
        store.insert(
            RecordId(3),
            [(KEY_EXCHANGE, "COINMARKETCAP"), (KEY_COIN, "IOTA"), (KEY_COIN_CUSTOM, "iota")],
        );
        store.insert(
            RecordId(4),
            [(KEY_EXCHANGE, "BITTREX"), (KEY_COIN, "BCH"), (KEY_CURRENCY, "USD")],
        );
        store.insert(RecordId(5), [(KEY_EXCHANGE, "GDAX"), (KEY_COIN, "ETH")]);
        store.insert(RecordId(6), [(KEY_EXCHANGE, "MTGOX"), (KEY_COIN, "BTC")]);
        store
    }

    #[test]
    fn builtin_registry_preserves_shipped_order() {
        assert_eq!(
            MigrationRegistry::builtin().names(),
            vec![EXCHANGE_OVERRIDE, QUOINE, COINMARKETCAP, BITTREX_TO_BCH, GDAX_TO_COINBASEPRO]
        );
    }

    #[test]
    fn register_rejects_duplicate_and_empty_names() {
        let mut registry = MigrationRegistry::builtin();
        let duplicate =
            MigrationStep { name: QUOINE, description: "again", transform: quoine_spelling };
        assert!(matches!(registry.register(duplicate), Err(MigrationError::Registry(_))));

        let empty = MigrationStep { name: " ", description: "blank", transform: quoine_spelling };
        assert!(matches!(registry.register(empty), Err(MigrationError::Registry(_))));
        assert_eq!(registry.steps().len(), 5);
    }

    #[test]
    fn run_all_applies_every_step_and_sets_flags() {
        let registry = MigrationRegistry::builtin();
        let mut flags = MemoryFlagStore::new();
        let mut store = seeded_store();

        let report = run(&registry, &mut flags, &mut store);

        assert_eq!(report.executed(), registry.names());
        assert_eq!(value(&store, 1, KEY_COIN_CUSTOM).as_deref(), Some("XBT"));
        assert_eq!(value(&store, 2, KEY_EXCHANGE).as_deref(), Some("QUOINE"));
        assert_eq!(value(&store, 3, KEY_COIN_CUSTOM).as_deref(), Some("MIOTA"));
        assert_eq!(value(&store, 4, KEY_COIN_CUSTOM).as_deref(), Some("BCH"));
        assert_eq!(value(&store, 4, KEY_CURRENCY_CUSTOM).as_deref(), Some("USDT"));
        assert_eq!(value(&store, 5, KEY_EXCHANGE).as_deref(), Some("COINBASEPRO"));
        for name in registry.names() {
            assert_eq!(flags.flags().get(name), Some(&true), "{name}");
        }
    }

    #[test]
    fn second_run_changes_nothing() {
        let registry = MigrationRegistry::builtin();
        let mut flags = MemoryFlagStore::new();
        let mut store = seeded_store();

        run(&registry, &mut flags, &mut store);
        let after_first = store.clone();
        let report = run(&registry, &mut flags, &mut store);

        assert_eq!(store, after_first);
        assert!(report.executed().is_empty());
        assert!(report.steps.iter().all(|step| step.status == StepStatus::AlreadyApplied));
    }

    #[test]
    fn applied_flags_leave_records_untouched() {
        let registry = MigrationRegistry::builtin();
        let mut flags = MemoryFlagStore::with_applied(registry.names());
        let mut store = seeded_store();
        let before = store.clone();

        run(&registry, &mut flags, &mut store);

        assert_eq!(store, before);
    }

    #[test]
    fn shipped_order_turns_bittrex_bcc_into_bch() {
        let mut store = MemoryRecordStore::new();
        store.insert(RecordId(1), [(KEY_EXCHANGE, "BITTREX"), (KEY_COIN, "BCH")]);
        let mut in_order = store.clone();
        let mut reversed = store;

        let mut flags = MemoryFlagStore::new();
        run(&single(EXCHANGE_OVERRIDE), &mut flags, &mut in_order);
        run(&single(BITTREX_TO_BCH), &mut flags, &mut in_order);
        assert_eq!(value(&in_order, 1, KEY_COIN_CUSTOM).as_deref(), Some("BCH"));

        let mut flags = MemoryFlagStore::new();
        run(&single(BITTREX_TO_BCH), &mut flags, &mut reversed);
        run(&single(EXCHANGE_OVERRIDE), &mut flags, &mut reversed);
        assert_eq!(value(&reversed, 1, KEY_COIN_CUSTOM).as_deref(), Some("BCC"));
    }

    #[test]
    fn unresolvable_record_is_skipped_and_step_completes() {
        let registry = single(EXCHANGE_OVERRIDE);
        let mut flags = MemoryFlagStore::new();
        let mut store = seeded_store();

        let report = run(&registry, &mut flags, &mut store);
        let Some(step) = report.step(EXCHANGE_OVERRIDE) else {
            panic!("missing step report");
        };

        assert_eq!(step.status, StepStatus::Applied);
        assert!(matches!(
            step.outcome(RecordId(6)),
            Some(RecordOutcome::Skipped { reason: SkipReason::Unresolved { .. } })
        ));
        assert_eq!(value(&store, 1, KEY_COIN_CUSTOM).as_deref(), Some("XBT"));
        assert_eq!(value(&store, 6, KEY_COIN_CUSTOM), None);
        assert_eq!(flags.flags().get(EXCHANGE_OVERRIDE), Some(&true));
    }

    #[test]
    fn storage_failure_on_one_record_is_swallowed() {
        let registry = single(QUOINE);
        let mut flags = MemoryFlagStore::new();
        let mut store = MemoryRecordStore::new();
        store.insert(RecordId(1), [(KEY_EXCHANGE, "QUIONE")]);
        store.insert(RecordId(2), [(KEY_EXCHANGE, "QUIONE")]);
        store.fail_record(RecordId(1));

        let report = run(&registry, &mut flags, &mut store);

        assert!(matches!(
            report.step(QUOINE).and_then(|step| step.outcome(RecordId(1))),
            Some(RecordOutcome::Skipped { reason: SkipReason::Storage { .. } })
        ));
        assert_eq!(value(&store, 2, KEY_EXCHANGE).as_deref(), Some("QUOINE"));
        assert_eq!(flags.flags().get(QUOINE), Some(&true));
    }

    #[test]
    fn dry_run_reports_without_writing() {
        let registry = MigrationRegistry::builtin();
        let mut flags = MemoryFlagStore::new();
        let mut store = seeded_store();
        let before = store.clone();

        let options = RunOptions { dry_run: true };
        let report = match run_all(&registry, &mut flags, &mut store, options) {
            Ok(report) => report,
            Err(err) => panic!("dry run failed: {err}"),
        };

        assert_eq!(store, before);
        assert!(flags.flags().is_empty());
        assert!(report.dry_run);
        assert!(report.steps.iter().all(|step| step.status == StepStatus::WouldApply));
        assert_eq!(report.step(QUOINE).map(|step| step.updated), Some(1));
    }

    #[test]
    fn dry_run_reports_what_a_real_run_does() {
        let registry = MigrationRegistry::builtin();
        let mut dry_store = seeded_store();
        let mut real_store = seeded_store();

        let mut dry_flags = MemoryFlagStore::new();
        let options = RunOptions { dry_run: true };
        let dry = match run_all(&registry, &mut dry_flags, &mut dry_store, options) {
            Ok(report) => report,
            Err(err) => panic!("dry run failed: {err}"),
        };
        let real = run(&registry, &mut MemoryFlagStore::new(), &mut real_store);

        assert_eq!(dry_store, seeded_store());
        assert_eq!(dry.steps.len(), real.steps.len());
        for (dry_step, real_step) in dry.steps.iter().zip(&real.steps) {
            assert_eq!(dry_step.name, real_step.name);
            assert_eq!(dry_step.records, real_step.records, "{}", dry_step.name);
        }
        let expected =
            RecordOutcome::Updated { writes: vec![RecordWrite::new(KEY_COIN_CUSTOM, "BCH")] };
        assert_eq!(
            dry.step(BITTREX_TO_BCH).and_then(|step| step.outcome(RecordId(4))),
            Some(&expected)
        );
    }

    #[test]
    fn records_added_between_steps_are_enumerated() {
        let registry = MigrationRegistry::builtin();
        let mut flags = MemoryFlagStore::with_applied([EXCHANGE_OVERRIDE]);
        let mut store = MemoryRecordStore::new();
        store.insert(RecordId(9), [(KEY_EXCHANGE, "GDAX")]);

        let report = run(&registry, &mut flags, &mut store);

        assert_eq!(
            report.executed(),
            vec![QUOINE, COINMARKETCAP, BITTREX_TO_BCH, GDAX_TO_COINBASEPRO]
        );
        assert_eq!(value(&store, 9, KEY_EXCHANGE).as_deref(), Some("COINBASEPRO"));
    }

    struct BrokenFlags;

    impl FlagStore for BrokenFlags {
        fn is_applied(&self, _name: &str) -> Result<bool, StoreError> {
            Err(StoreError::new("preferences unavailable"))
        }

        fn set_applied(&mut self, _name: &str, _applied: bool) -> Result<(), StoreError> {
            Err(StoreError::new("preferences unavailable"))
        }
    }

    #[test]
    fn flag_store_failure_aborts_before_touching_records() {
        let mut store = seeded_store();
        let before = store.clone();

        let result = run_all(
            &MigrationRegistry::builtin(),
            &mut BrokenFlags,
            &mut store,
            RunOptions::default(),
        );

        assert!(matches!(result, Err(MigrationError::Flags { .. })));
        assert_eq!(store, before);
    }

    #[test]
    fn pending_lists_unapplied_steps_in_order() -> Result<(), MigrationError> {
        let registry = MigrationRegistry::builtin();
        let flags = MemoryFlagStore::with_applied([QUOINE, BITTREX_TO_BCH]);
        assert_eq!(
            pending(&registry, &flags)?,
            vec![EXCHANGE_OVERRIDE, COINMARKETCAP, GDAX_TO_COINBASEPRO]
        );
        Ok(())
    }

    #[test]
    fn run_report_serializes_record_outcomes() {
        let registry = single(EXCHANGE_OVERRIDE);
        let mut flags = MemoryFlagStore::new();
        let mut store = seeded_store();
        let report = run(&registry, &mut flags, &mut store);

        let json = match serde_json::to_value(&report) {
            Ok(json) => json,
            Err(err) => panic!("report should serialize: {err}"),
        };
        let records = &json["steps"][0]["records"];
        assert_eq!(json["steps"][0]["status"], "applied");
        assert_eq!(records[0]["record_id"], 1);
        assert_eq!(records[0]["outcome"], "updated");
        assert_eq!(records[0]["writes"][0]["value"], "XBT");
        assert_eq!(records[5]["outcome"], "skipped");
        assert_eq!(records[5]["reason"]["kind"], "unresolved");
    }

    fn arb_record() -> impl Strategy<Value = BTreeMap<&'static str, &'static str>> {
        let exchanges = prop::sample::select(vec![
            "KRAKEN", "BITTREX", "BIT2C", "QUIONE", "GDAX", "COINMARKETCAP", "POLONIEX", "MTGOX",
        ]);
        let coins = prop::sample::select(vec!["BTC", "BCH", "IOTA", "DASH", "LTC", "PEPE"]);
        let currencies = prop::sample::select(vec!["USD", "TRY", "EUR", "XXX"]);
        let custom = prop::option::of(prop::sample::select(vec!["iota", "BCC", "XBT"]));
        (exchanges, coins, prop::option::of(currencies), custom).prop_map(
            |(exchange, coin, currency, custom)| {
                let mut values = BTreeMap::new();
                values.insert(KEY_EXCHANGE, exchange);
                values.insert(KEY_COIN, coin);
                if let Some(currency) = currency {
                    values.insert(KEY_CURRENCY, currency);
                }
                if let Some(custom) = custom {
                    values.insert(KEY_COIN_CUSTOM, custom);
                }
                values
            },
        )
    }

    proptest! {
        #[test]
        fn property_second_run_is_a_no_op(records in prop::collection::vec(arb_record(), 0..12)) {
            let registry = MigrationRegistry::builtin();
            let mut flags = MemoryFlagStore::new();
            let mut store = MemoryRecordStore::new();
            for (index, values) in records.iter().enumerate() {
                let id = i64::try_from(index).unwrap_or(i64::MAX);
                store.insert(RecordId(id), values.iter().map(|(k, v)| (*k, *v)));
            }

            run(&registry, &mut flags, &mut store);
            let after_first = store.clone();
            run(&registry, &mut flags, &mut store);

            prop_assert_eq!(store, after_first);
        }

        #[test]
        fn property_one_failing_record_does_not_affect_the_rest(
            count in 1_usize..10,
            failing_seed in any::<usize>(),
        ) {
            let failing = failing_seed % count;
            let mut store = MemoryRecordStore::new();
            let mut reference = MemoryRecordStore::new();
            for index in 0..count {
                let id = RecordId(i64::try_from(index).unwrap_or(i64::MAX));
                store.insert(id, [(KEY_EXCHANGE, "KRAKEN"), (KEY_COIN, "BTC")]);
                if index == failing {
                    store.insert(id, [(KEY_EXCHANGE, "MTGOX")]);
                } else {
                    reference.insert(
                        id,
                        [(KEY_EXCHANGE, "KRAKEN"), (KEY_COIN, "BTC"), (KEY_COIN_CUSTOM, "XBT")],
                    );
                }
            }

            let mut flags = MemoryFlagStore::new();
            let report = run(&single(EXCHANGE_OVERRIDE), &mut flags, &mut store);

            let failing_id = RecordId(i64::try_from(failing).unwrap_or(i64::MAX));
            prop_assert_eq!(flags.flags().get(EXCHANGE_OVERRIDE), Some(&true));
            prop_assert_eq!(report.step(EXCHANGE_OVERRIDE).map(|step| step.skipped), Some(1));
            for index in (0..count).filter(|index| *index != failing) {
                let id = RecordId(i64::try_from(index).unwrap_or(i64::MAX));
                prop_assert_eq!(store.values(id), reference.values(id));
            }
            prop_assert_eq!(value(&store, failing_id.0, KEY_COIN_CUSTOM), None);
        }
    }
}
