//! In-memory Spanner service.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures_util::StreamExt;
use hashbrown::HashMap;
use parking_lot::Mutex;
use spanner_protocol::{
    CallSettings, Code, Column, CommitRequest, CommitResponse, CommitTransaction, DatabaseName,
    ExecuteBatchDmlRequest, ExecuteSqlRequest, ResultSet, ResultSetStats, ResultStream, Row,
    RpcError, SessionInfo, SessionName, SpannerRpc, Statement, TransactionId, TransactionInfo,
    TransactionOptions, TransactionSelector,
};
use tokio::sync::watch;

/// RPC methods of [`SpannerRpc`], for scripting failures and counting calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// `CreateSession`.
    CreateSession,
    /// `BatchCreateSessions`.
    BatchCreateSessions,
    /// `DeleteSession`.
    DeleteSession,
    /// `GetSession`.
    GetSession,
    /// `BeginTransaction`.
    BeginTransaction,
    /// `Commit`.
    Commit,
    /// `Rollback`.
    Rollback,
    /// `ExecuteSql`.
    ExecuteSql,
    /// `ExecuteStreamingSql`.
    ExecuteStreamingSql,
    /// `ExecuteBatchDml`.
    ExecuteBatchDml,
}

#[derive(Debug)]
struct MockTransaction {
    session: SessionName,
    options: TransactionOptions,
    finished: bool,
}

#[derive(Debug, Default)]
struct MockState {
    sessions: HashMap<SessionName, SessionInfo>,
    deleted: Vec<SessionName>,
    calls: HashMap<Method, usize>,
    failures: HashMap<Method, VecDeque<RpcError>>,
    statement_failures: HashMap<String, RpcError>,
    aborts_remaining: usize,
    batch_limit: Option<usize>,
    create_delay: Option<Duration>,
    queries: HashMap<String, (Vec<Column>, Vec<Row>)>,
    row_counts: HashMap<String, i64>,
    transactions: HashMap<TransactionId, MockTransaction>,
    begun: Vec<(SessionName, TransactionOptions)>,
    executed: Vec<ExecuteSqlRequest>,
    batches: Vec<ExecuteBatchDmlRequest>,
    commits: Vec<CommitRequest>,
    rollbacks: Vec<TransactionId>,
}

/// An in-memory implementation of [`SpannerRpc`].
///
/// Sessions live until deleted or expired. Queries return scripted rows;
/// statements without a script return an empty result (queries) or a row
/// count of one (DML). Failures can be queued per method.
///
/// # Example
///
/// ```rust,ignore
/// let mock = Arc::new(MockSpanner::new());
/// mock.set_query_result("SELECT 1", vec![Column::new("n", "INT64")], vec![Row::new(vec![1i64.into()])]);
/// mock.abort_next_commits(2);
/// mock.fail_next(Method::CreateSession, RpcError::unavailable("try later"));
/// ```
#[derive(Debug)]
pub struct MockSpanner {
    state: Mutex<MockState>,
    next_transaction: AtomicU64,
    creation_open: watch::Sender<bool>,
}

impl Default for MockSpanner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSpanner {
    /// Create an empty service.
    #[must_use]
    pub fn new() -> Self {
        let (creation_open, _) = watch::channel(true);
        Self {
            state: Mutex::new(MockState::default()),
            next_transaction: AtomicU64::new(1),
            creation_open,
        }
    }

    /// Fail the next call of `method` with `error`. Queued errors are used in
    /// order.
    pub fn fail_next(&self, method: Method, error: RpcError) {
        self.state
            .lock()
            .failures
            .entry(method)
            .or_default()
            .push_back(error);
    }

    /// Fail every execution of `sql` with `error`.
    pub fn fail_statement(&self, sql: impl Into<String>, error: RpcError) {
        self.state
            .lock()
            .statement_failures
            .insert(sql.into(), error);
    }

    /// Abort the next `count` commits with `ABORTED`.
    pub fn abort_next_commits(&self, count: usize) {
        self.state.lock().aborts_remaining = count;
    }

    /// Cap the number of sessions returned by one batch creation.
    pub fn set_batch_limit(&self, limit: usize) {
        self.state.lock().batch_limit = Some(limit);
    }

    /// Delay every session creation.
    pub fn set_create_delay(&self, delay: Duration) {
        self.state.lock().create_delay = Some(delay);
    }

    /// Block session creation until [`resume_session_creation`] is called.
    ///
    /// [`resume_session_creation`]: Self::resume_session_creation
    pub fn pause_session_creation(&self) {
        self.creation_open.send_replace(false);
    }

    /// Let blocked session creations proceed.
    pub fn resume_session_creation(&self) {
        self.creation_open.send_replace(true);
    }

    /// Script the result of a query.
    pub fn set_query_result(&self, sql: impl Into<String>, columns: Vec<Column>, rows: Vec<Row>) {
        self.state.lock().queries.insert(sql.into(), (columns, rows));
    }

    /// Script the row count of a DML statement.
    pub fn set_row_count(&self, sql: impl Into<String>, count: i64) {
        self.state.lock().row_counts.insert(sql.into(), count);
    }

    /// Make a session disappear server-side, as if it had timed out.
    pub fn expire_session(&self, session: &SessionName) {
        self.state.lock().sessions.remove(session);
    }

    /// Number of calls made to `method`.
    #[must_use]
    pub fn call_count(&self, method: Method) -> usize {
        self.state.lock().calls.get(&method).copied().unwrap_or(0)
    }

    /// Sessions that currently exist.
    #[must_use]
    pub fn live_sessions(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Whether `session` currently exists.
    #[must_use]
    pub fn has_session(&self, session: &SessionName) -> bool {
        self.state.lock().sessions.contains_key(session)
    }

    /// Sessions deleted through `DeleteSession`, in order.
    #[must_use]
    pub fn deleted_sessions(&self) -> Vec<SessionName> {
        self.state.lock().deleted.clone()
    }

    /// Transactions begun, explicitly or inline.
    #[must_use]
    pub fn begun_transactions(&self) -> Vec<(SessionName, TransactionOptions)> {
        self.state.lock().begun.clone()
    }

    /// `ExecuteSql` and `ExecuteStreamingSql` requests, in order.
    #[must_use]
    pub fn executed(&self) -> Vec<ExecuteSqlRequest> {
        self.state.lock().executed.clone()
    }

    /// `ExecuteBatchDml` requests, in order.
    #[must_use]
    pub fn batches(&self) -> Vec<ExecuteBatchDmlRequest> {
        self.state.lock().batches.clone()
    }

    /// Successful commits, in order.
    #[must_use]
    pub fn commits(&self) -> Vec<CommitRequest> {
        self.state.lock().commits.clone()
    }

    /// Rolled back transactions, in order.
    #[must_use]
    pub fn rollbacks(&self) -> Vec<TransactionId> {
        self.state.lock().rollbacks.clone()
    }

    fn enter(&self, method: Method) -> Result<(), RpcError> {
        let mut state = self.state.lock();
        *state.calls.entry(method).or_insert(0) += 1;
        match state.failures.get_mut(&method).and_then(VecDeque::pop_front) {
            Some(error) => {
                tracing::debug!(?method, error = %error, "mock returning scripted failure");
                Err(error)
            }
            None => Ok(()),
        }
    }

    fn check_session(state: &MockState, session: &SessionName) -> Result<(), RpcError> {
        if state.sessions.contains_key(session) {
            Ok(())
        } else {
            Err(RpcError::not_found(format!("Session not found: {session}")))
        }
    }

    async fn wait_for_creation(&self) {
        let mut open = self.creation_open.subscribe();
        // The sender lives as long as `self`.
        let _ = open.wait_for(|open| *open).await;
        let delay = self.state.lock().create_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn new_session(state: &mut MockState, database: &DatabaseName) -> SessionInfo {
        let now = Utc::now();
        let info = SessionInfo {
            name: database.session(&uuid::Uuid::new_v4().simple().to_string()),
            create_time: Some(now),
            approximate_last_use_time: Some(now),
        };
        state.sessions.insert(info.name.clone(), info.clone());
        info
    }

    fn begin(
        &self,
        state: &mut MockState,
        session: &SessionName,
        options: TransactionOptions,
    ) -> TransactionInfo {
        let n = self.next_transaction.fetch_add(1, Ordering::SeqCst);
        let id = TransactionId::new(Bytes::from(n.to_be_bytes().to_vec()));
        state.transactions.insert(
            id.clone(),
            MockTransaction {
                session: session.clone(),
                options,
                finished: false,
            },
        );
        state.begun.push((session.clone(), options));
        TransactionInfo {
            id,
            read_timestamp: options.is_read_only().then(Utc::now),
        }
    }

    fn check_transaction(
        state: &MockState,
        session: &SessionName,
        id: &TransactionId,
    ) -> Result<TransactionOptions, RpcError> {
        match state.transactions.get(id) {
            Some(tx) if tx.finished => Err(RpcError::new(
                Code::FailedPrecondition,
                "transaction has already been committed or rolled back",
            )),
            Some(tx) if &tx.session != session => Err(RpcError::new(
                Code::InvalidArgument,
                "transaction belongs to another session",
            )),
            Some(tx) => Ok(tx.options),
            None => Err(RpcError::not_found("Transaction not found")),
        }
    }

    /// Resolve the selector of a statement, beginning a transaction inline
    /// if asked to.
    fn select(
        &self,
        state: &mut MockState,
        session: &SessionName,
        selector: &TransactionSelector,
    ) -> Result<(Option<TransactionOptions>, Option<TransactionInfo>), RpcError> {
        match selector {
            TransactionSelector::SingleUse(options) => Ok((Some(*options), None)),
            TransactionSelector::Begin(options) => {
                let info = self.begin(state, session, *options);
                Ok((Some(*options), Some(info)))
            }
            TransactionSelector::Id(id) => {
                Self::check_transaction(state, session, id).map(|o| (Some(o), None))
            }
        }
    }

    fn run_statement(
        state: &MockState,
        statement: &Statement,
    ) -> Result<(Vec<Column>, Vec<Row>, Option<ResultSetStats>), RpcError> {
        if let Some(error) = state.statement_failures.get(&statement.sql) {
            return Err(error.clone());
        }
        if let Some((columns, rows)) = state.queries.get(&statement.sql) {
            return Ok((columns.clone(), rows.clone(), None));
        }
        if is_query(&statement.sql) {
            return Ok((Vec::new(), Vec::new(), None));
        }
        let count = state.row_counts.get(&statement.sql).copied().unwrap_or(1);
        Ok((
            Vec::new(),
            Vec::new(),
            Some(ResultSetStats {
                row_count_exact: Some(count),
                row_count_lower_bound: None,
            }),
        ))
    }

    fn execute(&self, request: ExecuteSqlRequest) -> Result<ResultSet, RpcError> {
        let mut state = self.state.lock();
        Self::check_session(&state, &request.session)?;
        let (options, transaction) = self.select(&mut state, &request.session, &request.transaction)?;
        let (columns, rows, mut stats) = Self::run_statement(&state, &request.statement)?;

        if stats.is_some() && options.is_some_and(|o| o.is_read_only()) {
            return Err(RpcError::new(
                Code::FailedPrecondition,
                "DML statements are not allowed in read-only transactions",
            ));
        }
        if let (Some(TransactionOptions::PartitionedDml), Some(s)) = (options, stats.as_mut()) {
            s.row_count_lower_bound = s.row_count_exact.take();
        }

        state.executed.push(request);
        Ok(ResultSet {
            columns,
            rows,
            transaction,
            stats,
        })
    }
}

fn is_query(sql: &str) -> bool {
    let head = sql.trim_start().to_ascii_uppercase();
    head.starts_with("SELECT") || head.starts_with("WITH")
}

#[async_trait]
impl SpannerRpc for MockSpanner {
    async fn create_session(
        &self,
        database: &DatabaseName,
        _call: &CallSettings,
    ) -> Result<SessionInfo, RpcError> {
        self.enter(Method::CreateSession)?;
        self.wait_for_creation().await;
        Ok(Self::new_session(&mut self.state.lock(), database))
    }

    async fn batch_create_sessions(
        &self,
        database: &DatabaseName,
        count: usize,
        _call: &CallSettings,
    ) -> Result<Vec<SessionInfo>, RpcError> {
        self.enter(Method::BatchCreateSessions)?;
        self.wait_for_creation().await;
        let mut state = self.state.lock();
        let count = state.batch_limit.map_or(count, |limit| count.min(limit));
        Ok((0..count)
            .map(|_| Self::new_session(&mut state, database))
            .collect())
    }

    async fn delete_session(
        &self,
        session: &SessionName,
        _call: &CallSettings,
    ) -> Result<(), RpcError> {
        self.enter(Method::DeleteSession)?;
        let mut state = self.state.lock();
        state.deleted.push(session.clone());
        match state.sessions.remove(session) {
            Some(_) => Ok(()),
            None => Err(RpcError::not_found(format!("Session not found: {session}"))),
        }
    }

    async fn get_session(
        &self,
        session: &SessionName,
        _call: &CallSettings,
    ) -> Result<SessionInfo, RpcError> {
        self.enter(Method::GetSession)?;
        let state = self.state.lock();
        state
            .sessions
            .get(session)
            .cloned()
            .ok_or_else(|| RpcError::not_found(format!("Session not found: {session}")))
    }

    async fn begin_transaction(
        &self,
        session: &SessionName,
        options: &TransactionOptions,
        _call: &CallSettings,
    ) -> Result<TransactionInfo, RpcError> {
        self.enter(Method::BeginTransaction)?;
        let mut state = self.state.lock();
        Self::check_session(&state, session)?;
        Ok(self.begin(&mut state, session, *options))
    }

    async fn commit(
        &self,
        request: CommitRequest,
        _call: &CallSettings,
    ) -> Result<CommitResponse, RpcError> {
        self.enter(Method::Commit)?;
        let mut state = self.state.lock();
        Self::check_session(&state, &request.session)?;

        if let CommitTransaction::Id(id) = &request.transaction {
            let options = Self::check_transaction(&state, &request.session, id)?;
            if !matches!(options, TransactionOptions::ReadWrite) {
                return Err(RpcError::new(
                    Code::FailedPrecondition,
                    "only read-write transactions can be committed",
                ));
            }
            if let Some(tx) = state.transactions.get_mut(id) {
                tx.finished = true;
            }
        }

        if state.aborts_remaining > 0 {
            state.aborts_remaining -= 1;
            return Err(RpcError::aborted("Transaction was aborted due to a conflict")
                .with_retry_delay(Duration::from_millis(10)));
        }

        state.commits.push(request);
        Ok(CommitResponse {
            commit_timestamp: Utc::now(),
        })
    }

    async fn rollback(
        &self,
        session: &SessionName,
        transaction: &TransactionId,
        _call: &CallSettings,
    ) -> Result<(), RpcError> {
        self.enter(Method::Rollback)?;
        let mut state = self.state.lock();
        Self::check_session(&state, session)?;
        Self::check_transaction(&state, session, transaction)?;
        if let Some(tx) = state.transactions.get_mut(transaction) {
            tx.finished = true;
        }
        state.rollbacks.push(transaction.clone());
        Ok(())
    }

    async fn execute_sql(
        &self,
        request: ExecuteSqlRequest,
        _call: &CallSettings,
    ) -> Result<ResultSet, RpcError> {
        self.enter(Method::ExecuteSql)?;
        self.execute(request)
    }

    async fn execute_streaming_sql(
        &self,
        request: ExecuteSqlRequest,
        _call: &CallSettings,
    ) -> Result<ResultStream, RpcError> {
        self.enter(Method::ExecuteStreamingSql)?;
        let result = self.execute(request)?;
        Ok(ResultStream {
            columns: result.columns,
            transaction: result.transaction,
            rows: futures_util::stream::iter(result.rows.into_iter().map(Ok)).boxed(),
        })
    }

    async fn execute_batch_dml(
        &self,
        request: ExecuteBatchDmlRequest,
        _call: &CallSettings,
    ) -> Result<(Vec<i64>, Option<RpcError>), RpcError> {
        self.enter(Method::ExecuteBatchDml)?;
        let mut state = self.state.lock();
        Self::check_session(&state, &request.session)?;
        self.select(&mut state, &request.session, &request.transaction)?;

        let mut counts = Vec::with_capacity(request.statements.len());
        let mut failure = None;
        for statement in &request.statements {
            match Self::run_statement(&state, statement) {
                Ok((_, _, stats)) => {
                    counts.push(stats.and_then(|s| s.row_count_exact).unwrap_or(0));
                }
                Err(error) => {
                    failure = Some(error);
                    break;
                }
            }
        }
        state.batches.push(request);
        Ok((counts, failure))
    }
}
