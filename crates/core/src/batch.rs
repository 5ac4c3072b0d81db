//! Running several queries concurrently

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::query::PreparedQuery;
use crate::result::QueryResult;
use crate::scope::{Functions, Variables};

/// Run every query concurrently with the same variables and functions.
///
/// The first failure cancels the remaining queries; the batch then waits
/// for all of them and returns that first error. On success the results
/// come back in input order.
pub async fn run_batch(
    queries: &[Arc<dyn PreparedQuery>],
    ctx: &RunContext,
    variables: Arc<Variables>,
    functions: Arc<Functions>,
) -> Result<Vec<QueryResult>> {
    let batch_ctx = ctx.child();
    let mut tasks = JoinSet::new();

    for (index, query) in queries.iter().cloned().enumerate() {
        let task_ctx = batch_ctx.clone();
        let variables = variables.clone();
        let functions = functions.clone();
        tasks.spawn(async move {
            info!(
                request_id = task_ctx.request_id(),
                query = query.name(),
                runner_type = query.runner_type(),
                "running query"
            );
            let result = query.run(&task_ctx, &variables, &functions).await;
            (index, result)
        });
    }

    let mut results: Vec<Option<QueryResult>> = vec![None; queries.len()];
    let mut first_error: Option<Error> = None;

    while let Some(joined) = tasks.join_next().await {
        let (index, outcome) = match joined {
            Ok(finished) => finished,
            Err(join_err) => {
                let err = Error::backend(format!("query task failed: {join_err}"));
                if first_error.is_none() {
                    batch_ctx.cancel();
                    first_error = Some(err);
                }
                continue;
            }
        };
        let name = queries[index].name();
        match outcome {
            Ok(result) => {
                info!(
                    request_id = ctx.request_id(),
                    query = name,
                    rows = result.rows.len(),
                    "query finished"
                );
                results[index] = Some(result);
            }
            Err(err) if first_error.is_none() => {
                error!(request_id = ctx.request_id(), query = name, "query failed: {err}");
                batch_ctx.cancel();
                first_error = Some(err);
            }
            Err(err) => {
                debug!(request_id = ctx.request_id(), query = name, "query stopped: {err}");
            }
        }
    }

    if let Some(err) = first_error {
        return Err(err);
    }
    Ok(results.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Body;
    use crate::query::{Outcome, QueryBase, QueryRunner};
    use crate::scope::EvalScope;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug)]
    struct FakeRunner;

    impl QueryRunner for FakeRunner {
        fn name(&self) -> &str {
            "default"
        }

        fn runner_type(&self) -> &str {
            "fake"
        }

        fn prepare(&self, _base: QueryBase) -> Outcome<Arc<dyn PreparedQuery>> {
            Outcome::failed(crate::diagnostics::Diagnostics::new())
        }
    }

    #[derive(Debug)]
    struct SleepQuery {
        base: QueryBase,
        delay: Duration,
        fail: bool,
        cancelled: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PreparedQuery for SleepQuery {
        fn base(&self) -> &QueryBase {
            &self.base
        }

        async fn run(
            &self,
            ctx: &RunContext,
            _variables: &Variables,
            _functions: &Functions,
        ) -> Result<QueryResult> {
            match ctx.run_until_cancelled(tokio::time::sleep(self.delay)).await {
                Ok(()) if self.fail => Err(Error::backend(format!("{} exploded", self.name()))),
                Ok(()) => Ok(QueryResult::empty(self.name(), "sleep")),
                Err(err) => {
                    self.cancelled.fetch_add(1, Ordering::SeqCst);
                    Err(err)
                }
            }
        }
    }

    fn query(name: &str, delay_ms: u64, fail: bool, cancelled: &Arc<AtomicUsize>) -> Arc<dyn PreparedQuery> {
        let base = QueryBase::new(
            name,
            Arc::new(FakeRunner),
            Body::new(),
            Arc::new(EvalScope::new()),
        );
        Arc::new(SleepQuery {
            base,
            delay: Duration::from_millis(delay_ms),
            fail,
            cancelled: cancelled.clone(),
        })
    }

    async fn run(queries: &[Arc<dyn PreparedQuery>]) -> Result<Vec<QueryResult>> {
        run_batch(
            queries,
            &RunContext::new(),
            Arc::new(Variables::new()),
            Arc::new(Functions::new()),
        )
        .await
    }

    #[tokio::test]
    async fn test_results_in_input_order() {
        let cancelled = Arc::new(AtomicUsize::new(0));
        let queries = vec![
            query("slow", 60, false, &cancelled),
            query("fast", 1, false, &cancelled),
            query("medium", 20, false, &cancelled),
        ];
        let names: Vec<_> = run(&queries)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["slow", "fast", "medium"]);
        assert_eq!(cancelled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_first_error_cancels_siblings() {
        let cancelled = Arc::new(AtomicUsize::new(0));
        let queries = vec![
            query("long-a", 10_000, false, &cancelled),
            query("broken", 5, true, &cancelled),
            query("long-b", 10_000, false, &cancelled),
        ];
        let start = std::time::Instant::now();
        let err = run(&queries).await.unwrap_err();

        assert_eq!(err.to_string(), "Backend error: broken exploded");
        assert_eq!(cancelled.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        assert!(run(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_outer_cancellation_stops_batch() {
        let cancelled = Arc::new(AtomicUsize::new(0));
        let queries = vec![query("long", 10_000, false, &cancelled)];
        let ctx = RunContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        let err = run_batch(
            &queries,
            &ctx,
            Arc::new(Variables::new()),
            Arc::new(Functions::new()),
        )
        .await
        .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }
}
