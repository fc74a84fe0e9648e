//! End-to-end query tests: bound plans in, streamed tuples out.

use catalog::{ColumnMeta, TableMeta};
use common::{Config, Row};
use database::Database;
use expr::{col, lit, AggFunc, Expr, Predicate, PredicateVec};
use planner::{OrderByKey, PlanNode};
use pretty_assertions::assert_eq;
use types::{SqlType, Value};

fn open_db(dir: &tempfile::TempDir) -> Database {
    let _ = env_logger::builder().is_test(true).try_init();
    Database::create(
        Config::builder()
            .path(dir.path().join("e2e.wren"))
            .buffer_pool_pages(64)
            .build(),
    )
    .unwrap()
}

fn users_table() -> TableMeta {
    TableMeta::new(
        "users",
        vec![
            ColumnMeta::new("id", SqlType::Int64),
            ColumnMeta::new("name", SqlType::Varchar),
            ColumnMeta::new("age", SqlType::Int64),
        ],
        0,
    )
}

/// INSERT INTO users VALUES (...), streamed through a Print node.
fn insert_users(db: &Database, rows: &[(i64, &str, i64)]) {
    let txn = db.begin();
    let plan = PlanNode::Insert {
        table: "users".into(),
        child: Box::new(PlanNode::Print {
            rows: rows
                .iter()
                .map(|(id, name, age)| vec![lit(*id), lit(*name), lit(*age)])
                .collect(),
            schema: db.scan_schema("users", 0).unwrap(),
        }),
    };
    let batch = db.execute(plan, &txn).unwrap();
    assert_eq!(batch.rows[0].values()[0], Value::Int(rows.len() as i64));
    db.commit(&txn).unwrap();
}

fn seq_scan(db: &Database, table: &str, base: u32, predicate: PredicateVec) -> PlanNode {
    PlanNode::SeqScan {
        table: table.into(),
        predicate,
        schema: db.scan_schema(table, base).unwrap(),
        bitset: 1 << (base / 10),
    }
}

fn preds(exprs: Vec<Expr>) -> PredicateVec {
    exprs
        .into_iter()
        .map(|e| Predicate::new(e, &|id| 1 << (id / 10)))
        .collect()
}

fn pred(expr: Expr) -> PredicateVec {
    preds(vec![expr])
}

#[test]
fn insert_filter_project_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    db.create_table(users_table()).unwrap();
    insert_users(&db, &[(1, "ada", 36), (2, "bob", 17), (3, "eve", 54)]);

    let txn = db.begin();
    let plan = PlanNode::Project {
        exprs: vec![col(1)],
        schema: expr::OutputSchema::new(vec![expr::OutputColumn::new(
            10,
            "name",
            SqlType::Varchar,
        )]),
        child: Box::new(PlanNode::Filter {
            predicate: pred(col(2).ge(lit(18i64))),
            child: Box::new(seq_scan(&db, "users", 0, PredicateVec::new())),
        }),
    };
    let batch = db.execute(plan, &txn).unwrap();
    assert_eq!(batch.columns, vec!["name"]);
    assert_eq!(
        batch.rows,
        vec![
            Row::new(vec![Value::Str("ada".into())]),
            Row::new(vec![Value::Str("eve".into())]),
        ]
    );
    db.commit(&txn).unwrap();
}

#[test]
fn pk_predicate_runs_as_a_range_scan() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    db.create_table(users_table()).unwrap();
    insert_users(
        &db,
        &[(1, "a", 1), (2, "b", 2), (3, "c", 3), (4, "d", 4), (5, "e", 5)],
    );

    let plan = seq_scan(
        &db,
        "users",
        0,
        preds(vec![col(0).ge(lit(2i64)), col(0).lt(lit(5i64))]),
    );
    let optimized = db.optimize(plan.clone());
    assert!(matches!(optimized, PlanNode::RangeScan { .. }));

    let txn = db.begin();
    let batch = db.execute(plan, &txn).unwrap();
    let ids: Vec<i64> = batch
        .rows
        .iter()
        .map(|r| r.values()[0].as_int().unwrap())
        .collect();
    assert_eq!(ids, vec![2, 3, 4]);
    db.commit(&txn).unwrap();
}

/// Hash join of L(id, v) and R(id, w) on ids: exactly the matching pairs.
#[test]
fn equi_join_runs_as_hash_join() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    for name in ["l", "r"] {
        db.create_table(TableMeta::new(
            name,
            vec![
                ColumnMeta::new("id", SqlType::Int64),
                ColumnMeta::new("v", SqlType::Varchar),
            ],
            0,
        ))
        .unwrap();
    }
    let txn = db.begin();
    for (table, rows) in [
        ("l", vec![(1i64, "a"), (2, "b"), (3, "c")]),
        ("r", vec![(2i64, "x"), (3, "y"), (4, "z")]),
    ] {
        let plan = PlanNode::Insert {
            table: table.into(),
            child: Box::new(PlanNode::Print {
                rows: rows.iter().map(|(id, v)| vec![lit(*id), lit(*v)]).collect(),
                schema: db.scan_schema(table, 0).unwrap(),
            }),
        };
        db.execute(plan, &txn).unwrap();
    }
    db.commit(&txn).unwrap();

    let plan = PlanNode::Join {
        predicate: pred(col(0).eq(col(10))),
        left: Box::new(seq_scan(&db, "l", 0, PredicateVec::new())),
        right: Box::new(seq_scan(&db, "r", 10, PredicateVec::new())),
    };
    let optimized = db.optimize(plan.clone());
    assert!(matches!(optimized, PlanNode::HashJoin { .. }));

    let txn = db.begin();
    let batch = db.execute(plan, &txn).unwrap();
    let mut rows: Vec<(i64, String, String)> = batch
        .rows
        .iter()
        .map(|r| {
            (
                r.values()[0].as_int().unwrap(),
                r.values()[1].as_str().unwrap().to_string(),
                r.values()[3].as_str().unwrap().to_string(),
            )
        })
        .collect();
    rows.sort();
    assert_eq!(
        rows,
        vec![(2, "b".into(), "x".into()), (3, "c".into(), "y".into())]
    );
    db.commit(&txn).unwrap();
}

#[test]
fn aggregate_order_limit_distinct_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    db.create_table(users_table()).unwrap();
    insert_users(
        &db,
        &[
            (1, "ada", 30),
            (2, "bob", 30),
            (3, "cyd", 40),
            (4, "dee", 40),
            (5, "eli", 40),
            (6, "fay", 50),
        ],
    );

    // SELECT age, COUNT(id) FROM users GROUP BY age HAVING COUNT(id) > 1
    let txn = db.begin();
    let agg_schema = expr::OutputSchema::new(vec![
        expr::OutputColumn::new(20, "age", SqlType::Int64),
        expr::OutputColumn::new(21, "n", SqlType::Int64),
    ]);
    let plan = PlanNode::Aggregate {
        group_by: vec![col(2)],
        having: Some(Expr::agg(AggFunc::Count, col(0)).gt(lit(1i64))),
        outputs: vec![col(2), Expr::agg(AggFunc::Count, col(0))],
        schema: agg_schema,
        child: Box::new(seq_scan(&db, "users", 0, PredicateVec::new())),
    };
    let batch = db.execute(plan, &txn).unwrap();
    let mut rows: Vec<(i64, i64)> = batch
        .rows
        .iter()
        .map(|r| {
            (
                r.values()[0].as_int().unwrap(),
                r.values()[1].as_int().unwrap(),
            )
        })
        .collect();
    rows.sort();
    assert_eq!(rows, vec![(30, 2), (40, 3)]);

    // SELECT DISTINCT age FROM users ORDER BY age DESC LIMIT 2 OFFSET 1
    let plan = PlanNode::Limit {
        limit: 2,
        offset: 1,
        child: Box::new(PlanNode::Order {
            keys: vec![OrderByKey {
                expr: col(10),
                desc: true,
            }],
            child: Box::new(PlanNode::Distinct {
                child: Box::new(PlanNode::Project {
                    exprs: vec![col(2)],
                    schema: expr::OutputSchema::new(vec![expr::OutputColumn::new(
                        10,
                        "age",
                        SqlType::Int64,
                    )]),
                    child: Box::new(seq_scan(&db, "users", 0, PredicateVec::new())),
                }),
            }),
        }),
    };
    let batch = db.execute(plan, &txn).unwrap();
    let ages: Vec<i64> = batch
        .rows
        .iter()
        .map(|r| r.values()[0].as_int().unwrap())
        .collect();
    assert_eq!(ages, vec![40, 30]);
    db.commit(&txn).unwrap();
}

#[test]
fn delete_through_a_plan() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    db.create_table(users_table()).unwrap();
    insert_users(&db, &[(1, "ada", 30), (2, "bob", 17), (3, "eve", 54)]);

    let txn = db.begin();
    let plan = PlanNode::Delete {
        table: "users".into(),
        child: Box::new(seq_scan(&db, "users", 0, pred(col(2).lt(lit(18i64))))),
    };
    let batch = db.execute(plan, &txn).unwrap();
    assert_eq!(batch.rows[0].values()[0], Value::Int(1));
    db.commit(&txn).unwrap();

    let txn = db.begin();
    let batch = db
        .execute(seq_scan(&db, "users", 0, PredicateVec::new()), &txn)
        .unwrap();
    assert_eq!(batch.rows.len(), 2);
    db.commit(&txn).unwrap();
}

#[test]
fn data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("e2e.wren");
    {
        let db = Database::create(
            Config::builder().path(path.clone()).buffer_pool_pages(16).build(),
        )
        .unwrap();
        db.create_table(users_table()).unwrap();
        insert_users(&db, &[(1, "ada", 36), (2, "bob", 17)]);
        db.flush().unwrap();
    }
    let db = Database::open(
        Config::builder().path(path).buffer_pool_pages(16).build(),
    )
    .unwrap();
    let txn = db.begin();
    let batch = db
        .execute(seq_scan(&db, "users", 0, PredicateVec::new()), &txn)
        .unwrap();
    assert_eq!(batch.rows.len(), 2);
    assert_eq!(batch.rows[0].values()[1], Value::Str("ada".into()));
    db.commit(&txn).unwrap();
}
