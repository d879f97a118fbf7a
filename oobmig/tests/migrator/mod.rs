use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use oobmig::{
    AuxTable, Bounds, Direction, Driver, DriverContext, FieldSpec, LocationCountDriver,
    Migrator, MigratorError, MigratorOptions, Row, Runner, RunnerConfig, Store,
    StepReport, SymbolsDriver, Value,
};

pub const TEMPLATES: [&str; 6] = [
    "lsif_data_definitions",
    "lsif_data_definitions_schema_versions",
    "codeintel_scip_symbols",
    "codeintel_scip_symbols_schema_versions",
    "codeintel_scip_symbol_names",
    "codeintel_scip_symbols_lookup",
];

fn definitions_table(prefix: &str) -> AuxTable {
    AuxTable::new(
        format!("{prefix}_{}", LocationCountDriver::TABLE),
        "dump_id",
        ["scheme", "identifier", "data", "num_locations", "schema_version"],
    )
    .casts([
        Some("text"),
        Some("text"),
        Some("text"),
        Some("integer"),
        Some("integer"),
    ])
}

fn definition(identifier: &str, data: &str, num_locations: i64, version: i64) -> Row {
    vec![
        Value::from("scip-go"),
        Value::from(identifier),
        Value::from(data),
        Value::Int(num_locations),
        Value::Int(version),
    ]
}

fn locations_options(prefix: &str, id: i32) -> MigratorOptions {
    MigratorOptions::builder(id, format!("{prefix}_{}", LocationCountDriver::TABLE)).build()
}

fn locations(store: &Store, prefix: &str, id: i32) -> anyhow::Result<Migrator> {
    Ok(Migrator::new(
        store.clone(),
        LocationCountDriver::new(),
        locations_options(prefix, id),
    )?)
}

pub async fn test_scenario(store: &Store, prefix: &str) -> anyhow::Result<()> {
    let migrator = locations(store, prefix, 1)?;
    let table = definitions_table(prefix);

    for partition in [42, 43, 44] {
        let rows = (0..200)
            .map(|i| definition(&format!("def{i:03}"), "[1,2,3]", 0, 1))
            .collect();
        store.insert(&table, partition, rows).await?;
    }

    // 42 is untracked, 45 has no rows left.
    for partition in [43, 44, 45] {
        store
            .record_bounds(migrator.spec(), partition, Bounds::new(1, 1))
            .await?;
    }

    assert_eq!(migrator.progress(Direction::Up).await?, 0.0);

    migrator.up().await?;
    assert_eq!(migrator.progress(Direction::Up).await?, 1.0 / 3.0);

    migrator.up().await?;
    assert_eq!(migrator.progress(Direction::Up).await?, 2.0 / 3.0);

    migrator.up().await?;
    assert_eq!(migrator.progress(Direction::Up).await?, 1.0);
    assert_eq!(
        store.bounds(migrator.spec()).await?,
        vec![(43, Bounds::new(2, 2)), (44, Bounds::new(2, 2))]
    );

    assert_eq!(migrator.step(Direction::Up).await?, None);

    let migrated = store.select(&table, 43).await?;
    assert_eq!(migrated.len(), 200);
    assert!(migrated
        .iter()
        .all(|row| row[3] == Value::Int(3) && row[4] == Value::Int(2)));

    let untracked = store.select(&table, 42).await?;
    assert!(untracked
        .iter()
        .all(|row| row[3] == Value::Int(0) && row[4] == Value::Int(1)));

    migrator.down().await?;
    assert_eq!(migrator.progress(Direction::Up).await?, 0.5);

    migrator.down().await?;
    assert_eq!(migrator.progress(Direction::Up).await?, 0.0);
    assert_eq!(migrator.progress(Direction::Down).await?, 1.0);

    assert_eq!(migrator.step(Direction::Down).await?, None);

    Ok(())
}

pub async fn test_batches(store: &Store, prefix: &str) -> anyhow::Result<()> {
    let options = MigratorOptions::builder(1, format!("{prefix}_{}", LocationCountDriver::TABLE))
        .batch_size(2)
        .build();
    let migrator = Migrator::new(store.clone(), LocationCountDriver::new(), options)?;
    let table = definitions_table(prefix);

    store
        .insert(
            &table,
            1,
            vec![
                definition("a", "[1]", 0, 1),
                definition("b", "[1,2]", 0, 1),
                definition("c", "[]", 0, 1),
            ],
        )
        .await?;
    store.track_partition(migrator.spec(), 1).await?;

    assert_eq!(
        migrator.step(Direction::Up).await?,
        Some(StepReport {
            partition_id: 1,
            direction: Direction::Up,
            rows_read: 2,
            rows_written: 2,
            skipped: 0,
            bounds: Some(Bounds::new(1, 2)),
        })
    );
    assert_eq!(migrator.progress(Direction::Up).await?, 0.0);

    assert_eq!(
        migrator.step(Direction::Up).await?,
        Some(StepReport {
            partition_id: 1,
            direction: Direction::Up,
            rows_read: 1,
            rows_written: 1,
            skipped: 0,
            bounds: Some(Bounds::new(2, 2)),
        })
    );
    assert_eq!(migrator.progress(Direction::Up).await?, 1.0);

    assert_eq!(
        store.select(&table, 1).await?,
        vec![
            definition("a", "[1]", 1, 2),
            definition("b", "[1,2]", 2, 2),
            definition("c", "[]", 0, 2),
        ]
    );

    Ok(())
}

pub async fn test_round_trip(store: &Store, prefix: &str) -> anyhow::Result<()> {
    let migrator = locations(store, prefix, 1)?;
    let table = definitions_table(prefix);

    store
        .insert(
            &table,
            5,
            vec![definition("a", "[1]", 0, 1), definition("b", "[1,2]", 0, 1)],
        )
        .await?;
    store.track_partition(migrator.spec(), 5).await?;

    migrator.up().await?;
    assert_eq!(
        store.select(&table, 5).await?,
        vec![definition("a", "[1]", 1, 2), definition("b", "[1,2]", 2, 2)]
    );

    // Counts are not restored; down resets them.
    migrator.down().await?;
    assert_eq!(
        store.select(&table, 5).await?,
        vec![definition("a", "[1]", 0, 1), definition("b", "[1,2]", 0, 1)]
    );
    assert_eq!(store.bounds(migrator.spec()).await?, vec![(5, Bounds::new(1, 1))]);
    assert_eq!(migrator.progress(Direction::Down).await?, 1.0);

    Ok(())
}

pub async fn test_skipped_rows(store: &Store, prefix: &str) -> anyhow::Result<()> {
    let migrator = locations(store, prefix, 1)?;
    let table = definitions_table(prefix);

    store
        .insert(
            &table,
            1,
            vec![definition("a", "[1]", 0, 1), definition("b", "{oops", 0, 1)],
        )
        .await?;
    store.track_partition(migrator.spec(), 1).await?;

    let report = migrator.step(Direction::Up).await?;
    assert_eq!(report.as_ref().map(|r| r.skipped), Some(1));
    assert_eq!(report.as_ref().map(|r| r.rows_written), Some(1));

    assert_eq!(
        store.select(&table, 1).await?,
        vec![definition("a", "[1]", 1, 2), definition("b", "{oops", 0, 1)]
    );

    // The partition stays eligible and its progress plateaus.
    assert_eq!(store.bounds(migrator.spec()).await?, vec![(1, Bounds::new(1, 2))]);
    assert_eq!(migrator.progress(Direction::Up).await?, 0.0);

    Ok(())
}

pub async fn test_skipped_rows_first(store: &Store, prefix: &str) -> anyhow::Result<()> {
    let options = MigratorOptions::builder(1, format!("{prefix}_{}", LocationCountDriver::TABLE))
        .batch_size(1)
        .build();
    let migrator = Migrator::new(store.clone(), LocationCountDriver::new(), options)?;
    let table = definitions_table(prefix);

    store
        .insert(
            &table,
            1,
            vec![definition("a", "{oops", 0, 1), definition("b", "[1]", 0, 1)],
        )
        .await?;
    store.track_partition(migrator.spec(), 1).await?;

    let first = migrator.step(Direction::Up).await?;
    assert_eq!(first.as_ref().map(|r| (r.rows_read, r.skipped)), Some((1, 1)));

    // The next batch starts after the skipped row.
    let second = migrator.step(Direction::Up).await?;
    assert_eq!(
        second,
        Some(StepReport {
            partition_id: 1,
            direction: Direction::Up,
            rows_read: 1,
            rows_written: 1,
            skipped: 0,
            bounds: Some(Bounds::new(1, 2)),
        })
    );

    assert_eq!(
        store.select(&table, 1).await?,
        vec![definition("a", "{oops", 0, 1), definition("b", "[1]", 1, 2)]
    );

    // Nothing is left past `b`, so the pass starts over at `a`.
    let third = migrator.step(Direction::Up).await?;
    assert_eq!(third.as_ref().map(|r| (r.rows_read, r.skipped)), Some((1, 1)));
    assert_eq!(migrator.progress(Direction::Up).await?, 0.0);

    Ok(())
}

/// Returns the keys without the update target.
struct ShortRows;

#[async_trait]
impl Driver for ShortRows {
    fn fields(&self) -> Vec<FieldSpec> {
        LocationCountDriver.fields()
    }

    async fn migrate_up(
        &self,
        _ctx: &mut DriverContext<'_>,
        _partition_id: i64,
        rows: Vec<Row>,
    ) -> anyhow::Result<Vec<Row>> {
        Ok(rows
            .into_iter()
            .map(|row| row.into_iter().take(2).collect())
            .collect())
    }

    async fn migrate_down(
        &self,
        _ctx: &mut DriverContext<'_>,
        _partition_id: i64,
        rows: Vec<Row>,
    ) -> anyhow::Result<Vec<Row>> {
        Ok(rows)
    }
}

pub async fn test_arity(store: &Store, prefix: &str) -> anyhow::Result<()> {
    let migrator = Migrator::new(store.clone(), ShortRows, locations_options(prefix, 1))?;
    let table = definitions_table(prefix);

    store
        .insert(&table, 3, vec![definition("a", "[1]", 0, 1)])
        .await?;
    store.track_partition(migrator.spec(), 3).await?;

    let Err(err) = migrator.up().await else {
        bail!("short rows were accepted");
    };

    assert_eq!(err.partition_id(), Some(3));
    assert!(matches!(
        err,
        MigratorError::Partition { ref source, .. }
            if matches!(**source, MigratorError::Arity { expected: 3, got: 2 })
    ));

    assert_eq!(
        store.select(&table, 3).await?,
        vec![definition("a", "[1]", 0, 1)]
    );
    assert_eq!(store.bounds(migrator.spec()).await?, vec![(3, Bounds::new(1, 1))]);

    Ok(())
}

/// Fails on one partition and counts locations everywhere else.
struct Poisoned(i64);

#[async_trait]
impl Driver for Poisoned {
    fn fields(&self) -> Vec<FieldSpec> {
        LocationCountDriver.fields()
    }

    async fn migrate_up(
        &self,
        ctx: &mut DriverContext<'_>,
        partition_id: i64,
        rows: Vec<Row>,
    ) -> anyhow::Result<Vec<Row>> {
        if partition_id == self.0 {
            bail!("corrupt payload");
        }

        LocationCountDriver.migrate_up(ctx, partition_id, rows).await
    }

    async fn migrate_down(
        &self,
        ctx: &mut DriverContext<'_>,
        partition_id: i64,
        rows: Vec<Row>,
    ) -> anyhow::Result<Vec<Row>> {
        LocationCountDriver.migrate_down(ctx, partition_id, rows).await
    }
}

pub async fn test_poisoned_partition(store: &Store, prefix: &str) -> anyhow::Result<()> {
    let migrator = Migrator::new(store.clone(), Poisoned(1), locations_options(prefix, 1))?;
    let table = definitions_table(prefix);

    for partition in [1, 2] {
        store
            .insert(&table, partition, vec![definition("a", "[1]", 0, 1)])
            .await?;
        store.track_partition(migrator.spec(), partition).await?;
    }

    let err = migrator.up().await.err();
    assert_eq!(err.as_ref().and_then(MigratorError::partition_id), Some(1));
    assert_eq!(
        err.map(|e| e.to_string()).as_deref(),
        Some("partition 1: driver: corrupt payload")
    );

    migrator.up().await?;
    assert_eq!(
        store.select(&table, 2).await?,
        vec![definition("a", "[1]", 1, 2)]
    );
    assert_eq!(migrator.progress(Direction::Up).await?, 0.5);

    // Once nothing else is left, the failing partition is tried again.
    let err = migrator.up().await.err();
    assert_eq!(err.as_ref().and_then(MigratorError::partition_id), Some(1));
    assert_eq!(migrator.progress(Direction::Up).await?, 0.5);

    Ok(())
}

fn name(id: i64, segment: &str, prefix_id: Option<i64>) -> Row {
    vec![Value::Int(id), Value::from(segment), Value::from(prefix_id)]
}

fn symbol(symbol_id: i64, document_lookup_id: i64) -> Row {
    vec![
        Value::Int(symbol_id),
        Value::Int(document_lookup_id),
        Value::Null,
        Value::Null,
        Value::Int(1),
    ]
}

fn migrated_symbol(symbol_id: i64, document_lookup_id: i64, precise: i64, fuzzy: i64) -> Row {
    vec![
        Value::Int(symbol_id),
        Value::Int(document_lookup_id),
        Value::Int(precise),
        Value::Int(fuzzy),
        Value::Int(2),
    ]
}

fn node(
    id: i64,
    segment_type: &str,
    quality: Option<&str>,
    text: &str,
    parent_id: Option<i64>,
) -> Row {
    vec![
        Value::Int(id),
        Value::from(segment_type),
        Value::from(quality),
        Value::from(text),
        Value::from(parent_id),
    ]
}

fn symbols_table(prefix: &str) -> AuxTable {
    AuxTable::new(
        format!("{prefix}_{}", SymbolsDriver::TABLE),
        SymbolsDriver::PARTITION_COLUMN,
        [
            "symbol_id",
            "document_lookup_id",
            "descriptor_suffix_id",
            "fuzzy_descriptor_suffix_id",
            "schema_version",
        ],
    )
    .casts([
        Some("integer"),
        Some("bigint"),
        Some("integer"),
        Some("integer"),
        Some("integer"),
    ])
}

fn symbols_migrator(
    store: &Store,
    prefix: &str,
    driver: SymbolsDriver,
    batch_size: usize,
) -> anyhow::Result<Migrator> {
    let options = MigratorOptions::builder(2, format!("{prefix}_{}", SymbolsDriver::TABLE))
        .partition_column(SymbolsDriver::PARTITION_COLUMN)
        .batch_size(batch_size)
        .build();

    Ok(Migrator::new(store.clone(), driver, options)?)
}

pub async fn test_symbols(store: &Store, prefix: &str) -> anyhow::Result<()> {
    let driver = SymbolsDriver::with_prefix(prefix);
    let names = driver.names_table();
    let lookup = driver.lookup_table();

    let migrator = symbols_migrator(store, prefix, driver, 1000)?;
    let symbols = symbols_table(prefix);

    store
        .insert(
            &names,
            7,
            vec![
                name(1, "scip-go gomod github.com/x/y v1 pkg/Server#", None),
                name(2, "Serve(+1).", Some(1)),
                name(3, "Close().", Some(1)),
                name(4, "nope", None),
            ],
        )
        .await?;
    store
        .insert(
            &symbols,
            7,
            vec![
                symbol(2, 10),
                symbol(3, 10),
                symbol(3, 11),
                symbol(4, 10),
                symbol(99, 10),
            ],
        )
        .await?;

    store
        .insert(
            &names,
            8,
            vec![name(
                1,
                "scip-go gomod github.com/x/y v1 pkg/Server#Close().",
                None,
            )],
        )
        .await?;
    store.insert(&symbols, 8, vec![symbol(1, 20)]).await?;

    for partition in [7, 8] {
        store.track_partition(migrator.spec(), partition).await?;
    }

    // 4 does not parse and 99 has no name.
    assert_eq!(
        migrator.step(Direction::Up).await?,
        Some(StepReport {
            partition_id: 7,
            direction: Direction::Up,
            rows_read: 5,
            rows_written: 3,
            skipped: 2,
            bounds: Some(Bounds::new(1, 2)),
        })
    );

    assert_eq!(
        store.select(&symbols, 7).await?,
        vec![
            migrated_symbol(2, 10, 7, 8),
            migrated_symbol(3, 10, 6, 6),
            migrated_symbol(3, 11, 6, 6),
            symbol(4, 10),
            symbol(99, 10),
        ]
    );

    let trie = vec![
        node(1, "SCHEME", None, "scip-go", None),
        node(2, "PACKAGE_MANAGER", None, "gomod", Some(1)),
        node(3, "PACKAGE_NAME", None, "github.com/x/y", Some(2)),
        node(4, "PACKAGE_VERSION", None, "v1", Some(3)),
        node(5, "DESCRIPTOR_NAMESPACE", None, "pkg/Server#", Some(4)),
        node(6, "DESCRIPTOR_SUFFIX", Some("BOTH"), "Close().", Some(5)),
        node(7, "DESCRIPTOR_SUFFIX", Some("PRECISE"), "Serve(+1).", Some(5)),
        node(8, "DESCRIPTOR_SUFFIX", Some("FUZZY"), "Serve().", Some(5)),
    ];
    assert_eq!(store.select(&lookup, 7).await?, trie);

    // Partition 7 kept rows behind, so 8 goes first.
    migrator.up().await?;
    assert_eq!(
        store.select(&symbols, 8).await?,
        vec![migrated_symbol(1, 20, 6, 6)]
    );
    assert_eq!(store.select(&lookup, 8).await?, trie[..6].to_vec());

    let retry = migrator.step(Direction::Up).await?;
    assert_eq!(retry.as_ref().map(|r| r.partition_id), Some(7));
    assert_eq!(retry.as_ref().map(|r| r.skipped), Some(2));
    assert_eq!(retry.as_ref().map(|r| r.rows_written), Some(0));
    assert_eq!(store.select(&lookup, 7).await?, trie);

    assert_eq!(migrator.progress(Direction::Up).await?, 0.5);

    assert!(matches!(
        migrator.down().await,
        Err(MigratorError::Irreversible(2))
    ));
    assert_eq!(migrator.progress(Direction::Down).await?, 0.0);

    Ok(())
}

pub async fn test_broken_name_chains(store: &Store, prefix: &str) -> anyhow::Result<()> {
    let driver = SymbolsDriver::with_prefix(prefix);
    let names = driver.names_table();
    let lookup = driver.lookup_table();
    let migrator = symbols_migrator(store, prefix, driver, 1000)?;
    let symbols = symbols_table(prefix);

    store
        .insert(
            &names,
            7,
            vec![
                name(1, "scip-go gomod github.com/x/y v1 pkg/Server#Close().", None),
                name(2, "Open().", Some(555)),
                name(3, "a", Some(4)),
                name(4, "b", Some(3)),
            ],
        )
        .await?;
    store
        .insert(&symbols, 7, vec![symbol(1, 10), symbol(2, 10), symbol(3, 10)])
        .await?;
    store.track_partition(migrator.spec(), 7).await?;

    assert_eq!(
        migrator.step(Direction::Up).await?,
        Some(StepReport {
            partition_id: 7,
            direction: Direction::Up,
            rows_read: 3,
            rows_written: 1,
            skipped: 2,
            bounds: Some(Bounds::new(1, 2)),
        })
    );

    assert_eq!(
        store.select(&symbols, 7).await?,
        vec![migrated_symbol(1, 10, 6, 6), symbol(2, 10), symbol(3, 10)]
    );
    assert_eq!(store.select(&lookup, 7).await?.len(), 6);

    Ok(())
}

pub async fn test_symbol_batches(store: &Store, prefix: &str) -> anyhow::Result<()> {
    let driver = SymbolsDriver::with_prefix(prefix);
    let names = driver.names_table();
    let lookup = driver.lookup_table();
    let migrator = symbols_migrator(store, prefix, driver, 1)?;
    let symbols = symbols_table(prefix);

    store
        .insert(
            &names,
            7,
            vec![
                name(1, "scip-go gomod github.com/x/y v1 pkg/Server#", None),
                name(2, "Close().", Some(1)),
                name(3, "Open().", Some(1)),
                name(4, "Serve(+1).", Some(1)),
            ],
        )
        .await?;
    store
        .insert(&symbols, 7, vec![symbol(2, 10), symbol(3, 10), symbol(4, 10)])
        .await?;
    store.track_partition(migrator.spec(), 7).await?;

    migrator.up().await?;
    migrator.up().await?;
    assert_eq!(store.select(&lookup, 7).await?.len(), 7);

    // A node written outside the migration invalidates the kept trie.
    store
        .insert(
            &lookup,
            7,
            vec![node(8, "DESCRIPTOR_SUFFIX", Some("BOTH"), "Other().", Some(5))],
        )
        .await?;

    migrator.up().await?;
    assert_eq!(migrator.progress(Direction::Up).await?, 1.0);

    assert_eq!(
        store.select(&symbols, 7).await?,
        vec![
            migrated_symbol(2, 10, 6, 6),
            migrated_symbol(3, 10, 7, 7),
            migrated_symbol(4, 10, 9, 10),
        ]
    );

    let stored = store.select(&lookup, 7).await?;
    assert_eq!(stored.len(), 10);
    assert_eq!(
        stored[8..].to_vec(),
        vec![
            node(9, "DESCRIPTOR_SUFFIX", Some("PRECISE"), "Serve(+1).", Some(5)),
            node(10, "DESCRIPTOR_SUFFIX", Some("FUZZY"), "Serve().", Some(5)),
        ]
    );

    Ok(())
}

pub async fn test_runner(store: &Store, prefix: &str) -> anyhow::Result<()> {
    let table = definitions_table(prefix);
    let options = MigratorOptions::builder(1, format!("{prefix}_{}", LocationCountDriver::TABLE))
        .interval(Duration::from_millis(10))
        .build();
    let migrator = Migrator::new(store.clone(), LocationCountDriver::new(), options)?;
    let spec = migrator.spec().clone();

    for partition in [1, 2, 3] {
        store
            .insert(&table, partition, vec![definition("a", "[1,2]", 0, 1)])
            .await?;
        store.track_partition(&spec, partition).await?;
    }

    let duplicate = Runner::new(RunnerConfig::default())
        .register(locations(store, prefix, 1)?, Direction::Up)?
        .register(locations(store, prefix, 1)?, Direction::Up)
        .err();
    assert!(matches!(
        duplicate,
        Some(MigratorError::DuplicateMigration(1))
    ));

    let runner = Runner::new(RunnerConfig::builder().workers(2).build())
        .register(migrator, Direction::Up)?;
    assert_eq!(runner.progress().await?, vec![(1, 0.0)]);

    let handle = runner.start();
    assert!(!handle.is_cancelled());

    let mut progress = 0.0;
    for _ in 0..500 {
        progress = store.progress(&spec, Direction::Up, 2).await?;
        if progress == 1.0 {
            break;
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    handle.shutdown().await;
    assert_eq!(progress, 1.0);

    for partition in [1, 2, 3] {
        assert_eq!(
            store.select(&table, partition).await?,
            vec![definition("a", "[1,2]", 2, 2)]
        );
    }

    Ok(())
}
