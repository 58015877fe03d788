use anyhow::Result;
use rust_orm::{Context, Database, Filter, Pager, Repository, SqlQuery, SqliteConfig, TableStore, Value};
use tempfile::NamedTempFile;

rust_orm::record! {
    #[table = "accounts"]
    #[derive(Debug, Clone, PartialEq)]
    struct Account {
        #[column = "ID"]
        id: i64,
        #[column = "owner,omitempty"]
        owner: String,
        #[column = "balance"]
        balance: f64,
    }
}

// Helper function to create a temporary file-based database
fn create_temp_db() -> Result<(Database, NamedTempFile)> {
    let temp_file = NamedTempFile::new()?;
    let config = SqliteConfig::new(temp_file.path().to_string_lossy());
    Ok((Database::open(&config)?, temp_file))
}

#[tokio::test]
async fn test_records_survive_reopen() -> Result<()> {
    let (db, temp_file) = create_temp_db()?;
    let ctx = Context::background();

    let accounts = TableStore::<Account>::new(db);
    accounts.create_table(&ctx).await?;
    accounts
        .insert(&ctx, &Account { id: 1, owner: "ana".into(), balance: 10.0 })
        .await?;
    drop(accounts);

    let reopened = Database::open(&SqliteConfig::new(temp_file.path().to_string_lossy()))?;
    let accounts = TableStore::<Account>::new(reopened);
    accounts.create_table(&ctx).await?;
    let found = accounts.find_by(&ctx, &Filter::new().with("ID", 1_i64)).await?;
    assert_eq!(found.owner, "ana");
    assert_eq!(accounts.list(&ctx, Pager::default()).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_uppercase_id_is_primary_key() -> Result<()> {
    let (db, _temp_file) = create_temp_db()?;
    let ctx = Context::background();
    let accounts = TableStore::<Account>::new(db.clone());
    accounts.create_table(&ctx).await?;

    let rows = db
        .query(
            &ctx,
            &SqlQuery::new("SELECT name, pk FROM pragma_table_info('accounts') ORDER BY cid"),
        )
        .await?;
    let pk: Vec<(Value, Value)> = rows
        .into_iter()
        .map(|mut row| {
            let pk = row.pop().map(|(_, v)| v).unwrap_or(Value::Null);
            let name = row.pop().map(|(_, v)| v).unwrap_or(Value::Null);
            (name, pk)
        })
        .collect();
    assert_eq!(
        pk,
        vec![
            (Value::from("ID"), Value::Integer(1)),
            (Value::from("owner"), Value::Integer(0)),
            (Value::from("balance"), Value::Integer(0)),
        ]
    );

    accounts
        .insert(&ctx, &Account { id: 7, owner: "bo".into(), balance: 1.0 })
        .await?;
    accounts
        .update(&ctx, &Account { id: 7, owner: "ignored".into(), balance: 2.5 }, &["balance"])
        .await?;
    let found = accounts.find_by(&ctx, &Filter::new().with("ID", 7_i64)).await?;
    assert_eq!(found, Account { id: 7, owner: "bo".into(), balance: 2.5 });
    Ok(())
}

#[tokio::test]
async fn test_column_names_ignore_case() -> Result<()> {
    let (db, _temp_file) = create_temp_db()?;
    let ctx = Context::background();
    let accounts = TableStore::<Account>::new(db);
    accounts.create_table(&ctx).await?;
    accounts
        .insert(&ctx, &Account { id: 3, owner: "cy".into(), balance: 1.0 })
        .await?;

    accounts
        .update(&ctx, &Account { id: 3, owner: "ignored".into(), balance: 9.0 }, &["Balance"])
        .await?;
    let found = accounts.find_by(&ctx, &Filter::new().with("id", 3_i64)).await?;
    assert_eq!(found, Account { id: 3, owner: "cy".into(), balance: 9.0 });
    Ok(())
}

#[tokio::test]
async fn test_values_are_bound_not_interpolated() -> Result<()> {
    let (db, _temp_file) = create_temp_db()?;
    let ctx = Context::background();
    let accounts = TableStore::<Account>::new(db.clone());
    accounts.create_table(&ctx).await?;

    let hostile = "x'); DROP TABLE accounts; --";
    accounts
        .insert(&ctx, &Account { id: 1, owner: hostile.into(), balance: 0.0 })
        .await?;

    let found = accounts.find_by(&ctx, &Filter::new().with("owner", hostile)).await?;
    assert_eq!(found.owner, hostile);
    let tables = db
        .query(&ctx, &SqlQuery::new("SELECT name FROM sqlite_master WHERE type = 'table'"))
        .await?;
    assert_eq!(tables, vec![vec![("name".to_string(), Value::from("accounts"))]]);
    Ok(())
}

#[test]
fn test_open_reports_path() {
    let config = SqliteConfig::new("/nonexistent-dir/for/sure/db.sqlite");
    let err = Database::open(&config).unwrap_err();
    assert_eq!(err.kind(), rust_orm::ErrorKind::Open);
    assert!(err.to_string().contains("/nonexistent-dir/for/sure/db.sqlite"));
}
