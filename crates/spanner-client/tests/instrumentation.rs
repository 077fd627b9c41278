//! Span names and attribute keys emitted by connections and commands.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use spanner_client::instrumentation::{attributes, span_names};
use spanner_client::{
    CancellationToken, Config, Connection, DatabaseName, SessionPoolManager, SessionPoolOptions,
};
use spanner_testing::{MockSpanner, MockTransportFactory};
use tracing::span::{Attributes, Id};
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::Registry;

/// Collects the name and declared fields of every span opened.
#[derive(Clone, Default)]
struct SpanFields(Arc<Mutex<Vec<(&'static str, Vec<&'static str>)>>>);

impl SpanFields {
    fn fields_of(&self, span: &str) -> Vec<&'static str> {
        self.0
            .lock()
            .iter()
            .find(|(name, _)| *name == span)
            .map(|(_, fields)| fields.clone())
            .unwrap_or_else(|| panic!("no span named {span}"))
    }
}

impl<S: Subscriber> Layer<S> for SpanFields {
    fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: Context<'_, S>) {
        let metadata = attrs.metadata();
        let fields = metadata.fields().iter().map(|field| field.name()).collect();
        self.0.lock().push((metadata.name(), fields));
    }
}

fn config() -> Config {
    let day = Duration::from_secs(24 * 60 * 60);
    let database: DatabaseName = "projects/p/instances/i/databases/d".parse().unwrap();
    Config::new().database(database).pool_options(
        SessionPoolOptions::new()
            .min_sessions(0)
            .max_sessions(2)
            .maintenance_interval(day)
            .idle_eviction_delay(day)
            .health_check_interval(day),
    )
}

#[tokio::test(start_paused = true)]
async fn test_spans_carry_semantic_attribute_keys() {
    let spans = SpanFields::default();
    let _guard = tracing::subscriber::set_default(Registry::default().with(spans.clone()));

    let spanner = Arc::new(MockSpanner::new());
    spanner.set_row_count("UPDATE singers SET active = true", 3);
    let factory = Arc::new(MockTransportFactory::new(spanner.clone()));
    let connection = Connection::new(config(), SessionPoolManager::new(factory));
    let cancel = CancellationToken::new();
    connection.open(&cancel).await.unwrap();

    let rows = connection
        .create_command("UPDATE singers SET active = true")
        .execute_dml(&cancel)
        .await
        .unwrap();
    assert_eq!(rows, 3);
    connection
        .run_with_retriable_transaction(&cancel, |_tx| async { Ok(()) })
        .await
        .unwrap();

    let connect = spans.fields_of(span_names::CONNECT);
    assert!(connect.contains(&attributes::DB_SYSTEM));
    assert!(connect.contains(&attributes::DB_NAME));
    assert!(connect.contains(&attributes::SERVER_ADDRESS));

    let execute = spans.fields_of(span_names::EXECUTE);
    for key in [
        attributes::DB_STATEMENT,
        attributes::DB_OPERATION,
        attributes::DB_ROWS_AFFECTED,
    ] {
        assert!(execute.contains(&key), "{key} missing from {execute:?}");
    }

    let retriable = spans.fields_of(span_names::RETRIABLE_TRANSACTION);
    assert!(retriable.contains(&attributes::DB_ATTEMPT));
}
