use oobmig_batch::{PlaceholderCache, Row, Value, MAX_POSTGRES_PARAMETERS};
use oobmig_store::{AuxTable, Bounds, Counts, Direction, FieldSpec, Store, TableSpec};

pub const TEMPLATES: [&str; 2] = ["items", "items_schema_versions"];

pub fn items(prefix: &str) -> TableSpec {
    TableSpec::new(
        format!("{prefix}_items"),
        vec![
            FieldSpec::primary_key("id", "integer"),
            FieldSpec::read_only("name", "text"),
            FieldSpec::update_only("score", "integer"),
        ],
    )
}

pub fn items_table(prefix: &str) -> AuxTable {
    AuxTable::new(
        format!("{prefix}_items"),
        "dump_id",
        ["id", "name", "score", "schema_version"],
    )
    .casts([Some("integer"), Some("text"), Some("integer"), Some("integer")])
}

fn item(id: i64, name: &str, score: Option<i64>, version: i64) -> Row {
    vec![
        Value::Int(id),
        Value::from(name),
        Value::from(score),
        Value::Int(version),
    ]
}

pub async fn test_select_partition(store: &Store, prefix: &str) -> anyhow::Result<()> {
    let spec = items(prefix);

    store.record_bounds(&spec, 1, Bounds::new(1, 1)).await?;
    store.record_bounds(&spec, 2, Bounds::new(1, 2)).await?;
    store.record_bounds(&spec, 3, Bounds::new(2, 2)).await?;

    let mut first = store.begin().await?;
    assert_eq!(first.select_partition(&spec, Direction::Up, 2, &[]).await?, Some(1));

    let mut second = store.begin().await?;
    assert_eq!(second.select_partition(&spec, Direction::Up, 2, &[]).await?, Some(2));

    let mut third = store.begin().await?;
    assert_eq!(third.select_partition(&spec, Direction::Up, 2, &[]).await?, None);
    third.rollback().await?;

    first.rollback().await?;

    let mut fourth = store.begin().await?;
    assert_eq!(fourth.select_partition(&spec, Direction::Up, 2, &[]).await?, Some(1));
    fourth.rollback().await?;
    second.rollback().await?;

    let mut down = store.begin().await?;
    assert_eq!(down.select_partition(&spec, Direction::Down, 2, &[]).await?, Some(2));
    down.rollback().await?;

    let mut excluding = store.begin().await?;
    assert_eq!(
        excluding
            .select_partition(&spec, Direction::Up, 2, &[1])
            .await?,
        Some(2)
    );
    excluding.rollback().await?;

    Ok(())
}

pub async fn test_read_write_batch(store: &Store, prefix: &str) -> anyhow::Result<()> {
    let spec = items(prefix);
    let table = items_table(prefix);
    let cache = PlaceholderCache::new();

    store
        .insert(
            &table,
            7,
            vec![
                item(3, "c", None, 1),
                item(1, "a", None, 1),
                item(2, "b", Some(5), 2),
            ],
        )
        .await?;

    let mut session = store.begin().await?;

    let rows = session.read_batch(&spec, 7, Direction::Up, 2, None, 10).await?;
    assert_eq!(
        rows,
        vec![
            vec![Value::Int(1), Value::from("a")],
            vec![Value::Int(3), Value::from("c")],
        ]
    );

    let limited = session.read_batch(&spec, 7, Direction::Up, 2, None, 1).await?;
    assert_eq!(limited, vec![vec![Value::Int(1), Value::from("a")]]);

    let resumed = session
        .read_batch(&spec, 7, Direction::Up, 2, Some(&[Value::Int(1)][..]), 10)
        .await?;
    assert_eq!(resumed, vec![vec![Value::Int(3), Value::from("c")]]);

    assert!(session
        .read_batch(&spec, 7, Direction::Up, 2, Some(&[Value::Int(3)][..]), 10)
        .await?
        .is_empty());

    let written = session
        .write_batch(
            &spec,
            7,
            vec![
                vec![Value::Int(1), Value::Int(10)],
                vec![Value::Int(3), Value::Int(30)],
                vec![Value::Int(2), Value::Int(5)],
            ],
            2,
            &cache,
            MAX_POSTGRES_PARAMETERS,
        )
        .await?;
    assert_eq!(written, 2);

    let bounds = session.refresh_bounds(&spec, 7).await?;
    assert_eq!(bounds, Some(Bounds::new(2, 2)));
    session.commit().await?;

    assert_eq!(
        store.select(&table, 7).await?,
        vec![
            item(1, "a", Some(10), 2),
            item(2, "b", Some(5), 2),
            item(3, "c", Some(30), 2),
        ]
    );
    assert_eq!(store.bounds(&spec).await?, vec![(7, Bounds::new(2, 2))]);

    let mut session = store.begin().await?;
    let rows = session.read_batch(&spec, 7, Direction::Down, 2, None, 10).await?;
    assert_eq!(rows.len(), 3);
    assert!(session
        .read_batch(&spec, 7, Direction::Up, 2, None, 10)
        .await?
        .is_empty());
    session.rollback().await?;

    Ok(())
}

pub async fn test_rollback(store: &Store, prefix: &str) -> anyhow::Result<()> {
    let spec = items(prefix);
    let table = items_table(prefix);
    let cache = PlaceholderCache::new();

    store.insert(&table, 8, vec![item(1, "a", None, 1)]).await?;

    let mut session = store.begin().await?;
    session
        .write_batch(
            &spec,
            8,
            vec![vec![Value::Int(1), Value::Int(9)]],
            2,
            &cache,
            MAX_POSTGRES_PARAMETERS,
        )
        .await?;
    session.refresh_bounds(&spec, 8).await?;
    session.rollback().await?;

    assert_eq!(store.select(&table, 8).await?, vec![item(1, "a", None, 1)]);
    assert!(store.bounds(&spec).await?.is_empty());

    Ok(())
}

pub async fn test_bookkeeping(store: &Store, prefix: &str) -> anyhow::Result<()> {
    let spec = items(prefix);
    let table = items_table(prefix);

    assert_eq!(store.progress(&spec, Direction::Up, 2).await?, 1.0);

    store
        .insert(&table, 1, vec![item(1, "a", None, 1), item(2, "b", None, 2)])
        .await?;
    store.insert(&table, 2, vec![item(1, "a", None, 2)]).await?;

    assert_eq!(store.track_partition(&spec, 1).await?, Some(Bounds::new(1, 2)));
    assert_eq!(store.track_partition(&spec, 2).await?, Some(Bounds::new(2, 2)));
    assert_eq!(store.track_partition(&spec, 3).await?, None);

    assert_eq!(
        store.counts(&spec, Direction::Up, 2).await?,
        Counts { done: 1, total: 2 }
    );
    assert_eq!(store.progress(&spec, Direction::Up, 2).await?, 0.5);
    assert_eq!(
        store.counts(&spec, Direction::Down, 2).await?,
        Counts { done: 0, total: 2 }
    );

    store.record_bounds(&spec, 3, Bounds::new(1, 1)).await?;
    assert_eq!(
        store.counts(&spec, Direction::Down, 2).await?,
        Counts { done: 1, total: 3 }
    );

    // No rows left for partition 3, so its bookkeeping row goes away.
    assert_eq!(store.track_partition(&spec, 3).await?, None);
    assert_eq!(
        store.bounds(&spec).await?,
        vec![(1, Bounds::new(1, 2)), (2, Bounds::new(2, 2))]
    );

    Ok(())
}

pub async fn test_concurrent_insert(store: &Store, prefix: &str) -> anyhow::Result<()> {
    let spec = items(prefix);
    let table = items_table(prefix);
    let cache = PlaceholderCache::new();

    store.insert(&table, 1, vec![item(1, "a", None, 1)]).await?;
    store.track_partition(&spec, 1).await?;

    let mut session = store.begin().await?;
    assert_eq!(session.select_partition(&spec, Direction::Up, 2, &[]).await?, Some(1));
    assert_eq!(
        session.read_batch(&spec, 1, Direction::Up, 2, None, 10).await?,
        vec![vec![Value::Int(1), Value::from("a")]]
    );

    // A writer keeps appending to the partition while the step is open.
    store.insert(&table, 1, vec![item(2, "z", None, 1)]).await?;

    session
        .write_batch(
            &spec,
            1,
            vec![vec![Value::Int(1), Value::Int(4)]],
            2,
            &cache,
            MAX_POSTGRES_PARAMETERS,
        )
        .await?;
    session.commit().await?;

    assert_eq!(
        store.select(&table, 1).await?,
        vec![item(1, "a", Some(4), 2), item(2, "z", None, 1)]
    );
    assert_eq!(store.track_partition(&spec, 1).await?, Some(Bounds::new(1, 2)));

    Ok(())
}

pub async fn test_filtered_aux(store: &Store, prefix: &str) -> anyhow::Result<()> {
    let table = items_table(prefix);

    store
        .insert(
            &table,
            4,
            vec![
                item(1, "a", None, 1),
                item(2, "b", Some(7), 1),
                item(5, "c", None, 2),
            ],
        )
        .await?;
    store.insert(&table, 6, vec![item(9, "x", None, 1)]).await?;

    let mut session = store.begin().await?;

    assert_eq!(
        session.read_aux_where(&table, 4, "id", &[5, 1, 9]).await?,
        vec![item(1, "a", None, 1), item(5, "c", None, 2)]
    );
    assert!(session.read_aux_where(&table, 4, "id", &[]).await?.is_empty());
    assert!(session
        .read_aux_where(&table, 4, "id; drop", &[1])
        .await
        .is_err());

    assert_eq!(session.max_aux(&table, 4, "id").await?, Some(5));
    assert_eq!(session.max_aux(&table, 4, "score").await?, Some(7));
    assert_eq!(session.max_aux(&table, 5, "id").await?, None);

    session.rollback().await?;

    Ok(())
}
