//! Ephemeral, explicit and retriable transactions against the in-memory
//! service.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use spanner_client::{
    CancellationToken, Column, Config, Connection, DatabaseName, Error, Mutation, RetrySettings,
    Row, SessionPoolManager, SessionPoolOptions, Statement, TimestampBound, TransactionOptions,
    Value, Write,
};
use spanner_protocol::{Code, CommitTransaction, RpcError, TransactionSelector};
use spanner_testing::{Method, MockSpanner, MockTransportFactory, RecordingClock};
use tokio_test::{assert_err, assert_ok};

fn database() -> DatabaseName {
    "projects/p/instances/i/databases/d".parse().unwrap()
}

fn pool_options(max: u32) -> SessionPoolOptions {
    let day = Duration::from_secs(24 * 60 * 60);
    SessionPoolOptions::new()
        .min_sessions(0)
        .max_sessions(max)
        .maintenance_interval(day)
        .idle_eviction_delay(day)
        .health_check_interval(day)
}

struct Fixture {
    spanner: Arc<MockSpanner>,
    clock: Arc<RecordingClock>,
    connection: Connection,
}

impl Fixture {
    async fn new() -> Self {
        Self::with_config(Config::new().database(database()).pool_options(pool_options(4))).await
    }

    async fn with_config(config: Config) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let spanner = Arc::new(MockSpanner::new());
        let clock = Arc::new(RecordingClock::new());
        let factory = Arc::new(MockTransportFactory::new(spanner.clone()));
        let manager = SessionPoolManager::with_clock(factory, clock.clone());
        let connection = Connection::new(config, manager);
        connection.open(&CancellationToken::new()).await.unwrap();
        Self {
            spanner,
            clock,
            connection,
        }
    }

    fn active_sessions(&self) -> usize {
        self.connection
            .session_pool_statistics()
            .unwrap()
            .active_sessions
    }
}

fn insert_singer(id: i64) -> Mutation {
    Mutation::Insert(Write {
        table: "singers".into(),
        columns: vec!["id".into()],
        values: vec![vec![Value::from(id)]],
    })
}

// Ephemeral

#[tokio::test(start_paused = true)]
async fn test_query_outside_transaction_uses_single_use_read() {
    let fixture = Fixture::new().await;
    fixture.spanner.set_query_result(
        "SELECT name FROM singers",
        vec![Column::new("name", "STRING")],
        vec![Row::new(vec!["Alice".into()]), Row::new(vec!["Bob".into()])],
    );
    let cancel = CancellationToken::new();

    let stream = fixture
        .connection
        .create_command("SELECT name FROM singers")
        .execute_query(&cancel)
        .await
        .unwrap();
    assert!(stream.holds_session());
    assert_eq!(stream.columns()[0].name, "name");
    assert_eq!(fixture.active_sessions(), 1);

    let rows = stream.collect_rows().await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].get(0).and_then(Value::as_str), Some("Bob"));
    assert_eq!(fixture.active_sessions(), 0);

    let request = fixture.spanner.executed().pop().unwrap();
    assert_eq!(
        request.transaction,
        TransactionSelector::SingleUse(TransactionOptions::ReadOnly(TimestampBound::Strong))
    );
}

#[tokio::test(start_paused = true)]
async fn test_dropped_row_stream_returns_its_session() {
    let fixture = Fixture::new().await;
    let stream = fixture
        .connection
        .create_command("SELECT 1")
        .execute_query(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(fixture.active_sessions(), 1);

    drop(stream);
    assert_eq!(fixture.active_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_query_honours_timestamp_bound() {
    let fixture = Fixture::new().await;
    let bound = TimestampBound::MaxStaleness(Duration::from_secs(15));

    fixture
        .connection
        .create_command("SELECT 1")
        .timestamp_bound(bound)
        .execute_query(&CancellationToken::new())
        .await
        .unwrap()
        .collect_rows()
        .await
        .unwrap();

    let request = fixture.spanner.executed().pop().unwrap();
    assert_eq!(
        request.transaction,
        TransactionSelector::SingleUse(TransactionOptions::ReadOnly(bound))
    );
}

#[tokio::test(start_paused = true)]
async fn test_dml_outside_transaction_begins_inline_and_commits() {
    let fixture = Fixture::new().await;
    fixture
        .spanner
        .set_row_count("UPDATE singers SET active = true", 5);

    let count = fixture
        .connection
        .create_command("UPDATE singers SET active = true")
        .execute_dml(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(count, 5);

    let request = fixture.spanner.executed().pop().unwrap();
    assert_eq!(
        request.transaction,
        TransactionSelector::Begin(TransactionOptions::ReadWrite)
    );
    let commits = fixture.spanner.commits();
    assert_eq!(commits.len(), 1);
    assert!(matches!(commits[0].transaction, CommitTransaction::Id(_)));
    assert_eq!(fixture.active_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_mutations_outside_transaction_commit_at_once() {
    let fixture = Fixture::new().await;

    let timestamp = fixture
        .connection
        .create_mutation_command(vec![insert_singer(1), insert_singer(2)])
        .execute_mutations(&CancellationToken::new())
        .await
        .unwrap();
    assert!(timestamp.is_some());

    let commits = fixture.spanner.commits();
    assert_eq!(commits.len(), 1);
    assert_eq!(
        commits[0].transaction,
        CommitTransaction::SingleUse(TransactionOptions::ReadWrite)
    );
    assert_eq!(commits[0].mutations.len(), 2);
    assert_eq!(fixture.spanner.call_count(Method::BeginTransaction), 0);
}

#[tokio::test(start_paused = true)]
async fn test_partitioned_dml_reports_lower_bound() {
    let fixture = Fixture::new().await;
    fixture
        .spanner
        .set_row_count("DELETE FROM albums WHERE true", 42);

    let count = fixture
        .connection
        .create_command("DELETE FROM albums WHERE true")
        .execute_partitioned_dml(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(count, 42);

    let begun = fixture.spanner.begun_transactions();
    assert_eq!(begun.len(), 1);
    assert_eq!(begun[0].1, TransactionOptions::PartitionedDml);
    assert!(fixture.spanner.commits().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_partitioned_dml_is_rejected_in_a_transaction() {
    let fixture = Fixture::new().await;
    let cancel = CancellationToken::new();
    let tx = fixture
        .connection
        .begin_transaction(TransactionOptions::ReadWrite, &cancel)
        .await
        .unwrap();

    let err = fixture
        .connection
        .create_command("DELETE FROM albums WHERE true")
        .transaction(&tx)
        .execute_partitioned_dml(&cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
    assert!(fixture.spanner.begun_transactions().len() == 1);
}

#[tokio::test(start_paused = true)]
async fn test_batch_dml_outside_transaction() {
    let fixture = Fixture::new().await;
    fixture.spanner.set_row_count("UPDATE a SET x = 1", 2);
    fixture.spanner.set_row_count("UPDATE b SET x = 1", 3);
    let cancel = CancellationToken::new();

    let counts = fixture
        .connection
        .execute_batch_dml(
            vec![
                Statement::new("UPDATE a SET x = 1"),
                Statement::new("UPDATE b SET x = 1"),
            ],
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(counts, vec![2, 3]);
    assert_eq!(fixture.spanner.commits().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_batch_dml_reports_partial_counts_and_rolls_back() {
    let fixture = Fixture::new().await;
    fixture.spanner.set_row_count("UPDATE a SET x = 1", 2);
    fixture.spanner.fail_statement(
        "UPDATE b SET x = 1",
        RpcError::new(Code::InvalidArgument, "column x does not exist"),
    );

    let err = fixture
        .connection
        .execute_batch_dml(
            vec![
                Statement::new("UPDATE a SET x = 1"),
                Statement::new("UPDATE b SET x = 1"),
                Statement::new("UPDATE c SET x = 1"),
            ],
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    match err {
        Error::BatchDml { row_counts, source } => {
            assert_eq!(row_counts, vec![2]);
            assert_eq!(source.code, Code::InvalidArgument);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(fixture.spanner.commits().is_empty());
    assert_eq!(fixture.spanner.rollbacks().len(), 1);
}

// Explicit

#[tokio::test(start_paused = true)]
async fn test_explicit_dml_carries_increasing_sequence_numbers() {
    let fixture = Fixture::new().await;
    let cancel = CancellationToken::new();
    let tx = fixture
        .connection
        .begin_transaction(TransactionOptions::ReadWrite, &cancel)
        .await
        .unwrap();

    for sql in ["UPDATE a SET x = 1", "UPDATE b SET x = 1"] {
        fixture
            .connection
            .create_command(sql)
            .transaction(&tx)
            .execute_dml(&cancel)
            .await
            .unwrap();
    }

    let executed = fixture.spanner.executed();
    let seqnos: Vec<i64> = executed.iter().map(|r| r.seqno).collect();
    assert_eq!(seqnos, vec![1, 2]);
    assert!(
        executed
            .iter()
            .all(|r| r.transaction == TransactionSelector::Id(tx.id().clone()))
    );
    assert_ok!(tx.commit(&cancel).await);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_mutations_are_buffered_until_commit() {
    let fixture = Fixture::new().await;
    let cancel = CancellationToken::new();
    let tx = fixture
        .connection
        .begin_transaction(TransactionOptions::ReadWrite, &cancel)
        .await
        .unwrap();

    let buffered = fixture
        .connection
        .create_mutation_command(vec![insert_singer(7)])
        .transaction(&tx)
        .execute_mutations(&cancel)
        .await
        .unwrap();
    assert_eq!(buffered, None);
    assert!(fixture.spanner.commits().is_empty());
    assert_eq!(fixture.active_sessions(), 1);

    let timestamp = tx.commit(&cancel).await.unwrap();
    assert!(timestamp.is_some());
    assert!(tx.is_completed());
    assert_eq!(fixture.active_sessions(), 0);

    let commits = fixture.spanner.commits();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].transaction, CommitTransaction::Id(tx.id().clone()));
    assert_eq!(commits[0].mutations, vec![insert_singer(7)]);
}

#[tokio::test(start_paused = true)]
async fn test_rollback_discards_buffered_mutations() {
    let fixture = Fixture::new().await;
    let cancel = CancellationToken::new();
    let tx = fixture
        .connection
        .begin_transaction(TransactionOptions::ReadWrite, &cancel)
        .await
        .unwrap();
    tx.buffer_mutations(vec![insert_singer(1)]).await.unwrap();

    tx.rollback(&cancel).await.unwrap();
    assert_eq!(fixture.spanner.rollbacks(), vec![tx.id().clone()]);
    assert!(fixture.spanner.commits().is_empty());
    assert_eq!(fixture.active_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_read_only_transaction_rejects_writes_and_completes_locally() {
    let fixture = Fixture::new().await;
    let cancel = CancellationToken::new();
    let tx = fixture
        .connection
        .begin_read_only_transaction(TimestampBound::ExactStaleness(Duration::from_secs(5)), &cancel)
        .await
        .unwrap();
    assert!(tx.read_timestamp().is_some());

    let dml = fixture
        .connection
        .create_command("UPDATE a SET x = 1")
        .transaction(&tx)
        .execute_dml(&cancel)
        .await;
    assert!(matches!(dml, Err(Error::InvalidState(_))));
    assert!(matches!(
        tx.buffer_mutations(vec![insert_singer(1)]).await,
        Err(Error::InvalidState(_))
    ));

    fixture
        .connection
        .create_command("SELECT 1")
        .transaction(&tx)
        .execute_query(&cancel)
        .await
        .unwrap()
        .collect_rows()
        .await
        .unwrap();

    assert_eq!(tx.commit(&cancel).await.unwrap(), None);
    assert_eq!(fixture.spanner.call_count(Method::Commit), 0);
    assert_eq!(fixture.active_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_single_use_only_bounds_are_rejected_for_transactions() {
    let fixture = Fixture::new().await;
    let cancel = CancellationToken::new();

    let err = fixture
        .connection
        .begin_read_only_transaction(TimestampBound::MaxStaleness(Duration::from_secs(10)), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    let err = fixture
        .connection
        .begin_transaction(TransactionOptions::PartitionedDml, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert_eq!(fixture.spanner.call_count(Method::BeginTransaction), 0);
}

#[tokio::test(start_paused = true)]
async fn test_completed_transaction_rejects_further_use() {
    let fixture = Fixture::new().await;
    let cancel = CancellationToken::new();
    let tx = fixture
        .connection
        .begin_transaction(TransactionOptions::ReadWrite, &cancel)
        .await
        .unwrap();
    tx.commit(&cancel).await.unwrap();

    assert!(matches!(tx.commit(&cancel).await, Err(Error::InvalidState(_))));
    assert!(matches!(tx.rollback(&cancel).await, Err(Error::InvalidState(_))));
    let dml = tx
        .execute_dml(Statement::new("UPDATE a SET x = 1"), &cancel)
        .await;
    assert!(matches!(dml, Err(Error::InvalidState(_))));
}

#[tokio::test(start_paused = true)]
async fn test_dropped_read_write_transaction_is_rolled_back() {
    let fixture = Fixture::new().await;
    let tx = fixture
        .connection
        .begin_transaction(TransactionOptions::ReadWrite, &CancellationToken::new())
        .await
        .unwrap();
    let id = tx.id().clone();

    drop(tx);
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    assert_eq!(fixture.spanner.rollbacks(), vec![id]);
    assert_eq!(fixture.active_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_expired_session_is_discarded_after_transaction() {
    let fixture = Fixture::new().await;
    let cancel = CancellationToken::new();
    let tx = fixture
        .connection
        .begin_transaction(TransactionOptions::ReadWrite, &cancel)
        .await
        .unwrap();
    fixture.spanner.expire_session(tx.session_name());

    let err = tx
        .execute_dml(Statement::new("UPDATE a SET x = 1"), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(Code::NotFound));

    assert_err!(tx.rollback(&cancel).await);
    let stats = fixture.connection.session_pool_statistics().unwrap();
    assert_eq!(stats.active_sessions, 0);
    assert_eq!(stats.idle_sessions, 0);
}

#[tokio::test(start_paused = true)]
async fn test_waiter_receives_released_session_at_capacity() {
    let fixture =
        Fixture::with_config(Config::new().database(database()).pool_options(pool_options(1)))
            .await;
    let cancel = CancellationToken::new();
    let tx = fixture
        .connection
        .begin_transaction(TransactionOptions::ReadWrite, &cancel)
        .await
        .unwrap();
    let held = tx.session_name().clone();

    let waiter = async {
        fixture
            .connection
            .create_command("SELECT 1")
            .execute_query(&cancel)
            .await
            .unwrap()
            .collect_rows()
            .await
            .unwrap()
    };
    let releaser = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let stats = fixture.connection.session_pool_statistics().unwrap();
        assert_eq!(stats.pending_acquisitions, 1);
        tx.commit(&cancel).await.unwrap();
    };
    tokio::join!(waiter, releaser);

    let query = fixture.spanner.executed().pop().unwrap();
    assert_eq!(query.session, held);
    assert_eq!(fixture.spanner.call_count(Method::CreateSession), 1);
}

// Retriable

#[tokio::test(start_paused = true)]
async fn test_retriable_transaction_reruns_after_aborted_commits() {
    let fixture = Fixture::new().await;
    fixture.spanner.abort_next_commits(2);
    let calls = Arc::new(AtomicUsize::new(0));

    let result = fixture
        .connection
        .run_with_retriable_transaction(&CancellationToken::new(), |tx| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tx.buffer_mutations(vec![insert_singer(3)]).await?;
                Ok("done")
            }
        })
        .await
        .unwrap();

    assert_eq!(result, "done");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(fixture.spanner.begun_transactions().len(), 3);
    assert_eq!(fixture.spanner.commits().len(), 1);
    // Each aborted commit waited at least the server's retry delay.
    let delays = fixture.clock.sleeps_shorter_than(Duration::from_secs(60));
    assert_eq!(delays.len(), 2);
    assert!(delays.iter().all(|d| *d >= Duration::from_millis(10)));
    assert_eq!(fixture.active_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_retriable_transaction_reruns_when_work_is_aborted() {
    let fixture = Fixture::new().await;
    let calls = Arc::new(AtomicUsize::new(0));

    let result = fixture
        .connection
        .run_with_retriable_transaction(&CancellationToken::new(), |_tx| {
            let calls = Arc::clone(&calls);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(Error::Rpc(RpcError::aborted("read conflict")));
                }
                Ok(())
            }
        })
        .await;

    assert_ok!(result);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    // The aborted attempt is abandoned, not rolled back.
    assert!(fixture.spanner.rollbacks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_retriable_transaction_returns_other_errors_unchanged() {
    let fixture = Fixture::new().await;
    let calls = Arc::new(AtomicUsize::new(0));

    let err = fixture
        .connection
        .run_with_retriable_transaction(&CancellationToken::new(), |_tx| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::InvalidArgument("negative balance".into()))
            }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidArgument(ref m) if m == "negative balance"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.spanner.rollbacks().len(), 1);
    assert!(fixture.spanner.commits().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_retriable_transaction_gives_up_after_max_attempts() {
    let config = Config::new()
        .database(database())
        .pool_options(pool_options(4))
        .transaction_retry(
            RetrySettings::default()
                .max_attempts(Some(2))
                .backoff(Duration::from_millis(10), Duration::from_millis(100)),
        );
    let fixture = Fixture::with_config(config).await;
    fixture.spanner.abort_next_commits(5);
    let calls = Arc::new(AtomicUsize::new(0));

    let err = fixture
        .connection
        .run_with_retriable_transaction(&CancellationToken::new(), |_tx| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap_err();

    assert!(err.is_aborted());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_retriable_transaction_starts_no_attempt() {
    let fixture = Fixture::new().await;
    let cancel = CancellationToken::new();
    cancel.cancel();
    let calls = Arc::new(AtomicUsize::new(0));

    let err = fixture
        .connection
        .run_with_retriable_transaction(&cancel, |_tx| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(fixture.spanner.call_count(Method::BeginTransaction), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_backoff_stops_retrying() {
    let fixture = Fixture::new().await;
    fixture.spanner.abort_next_commits(1);
    let cancel = CancellationToken::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let run = fixture
        .connection
        .run_with_retriable_transaction(&cancel, |_tx| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
    let canceller = async {
        // The first attempt finishes at once; the backoff is at least 10ms.
        tokio::time::sleep(Duration::from_millis(1)).await;
        cancel.cancel();
    };
    let (result, ()) = tokio::join!(run, canceller);

    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_loop_owns_commit_and_rollback() {
    let fixture = Fixture::new().await;

    fixture
        .connection
        .run_with_retriable_transaction(&CancellationToken::new(), |tx| async move {
            let cancel = CancellationToken::new();
            assert!(matches!(tx.commit(&cancel).await, Err(Error::InvalidState(_))));
            assert!(matches!(tx.rollback(&cancel).await, Err(Error::InvalidState(_))));
            tx.execute_dml(Statement::new("UPDATE a SET x = 1"), &cancel)
                .await
        })
        .await
        .unwrap();

    assert_eq!(fixture.spanner.commits().len(), 1);
}
