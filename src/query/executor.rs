use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use crate::observe::EventSink;
use crate::query::planner::select_partitions;
use crate::query::{QueryDesc, QueryResponse, Series};
use crate::storage::partition::Partition;

/// Configuration for query execution
#[derive(Debug, Clone, Default)]
pub struct QueryConfig {
    /// Upper bound on partition fetches running at once across a query;
    /// `None` spawns one fetch per overlapping partition without limit
    pub max_concurrent_fetches: Option<usize>,
    /// Order the response by (source, metric) instead of completion order
    pub sort_series: bool,
}

impl QueryConfig {
    pub fn with_max_concurrent_fetches(mut self, limit: usize) -> Self {
        self.max_concurrent_fetches = Some(limit.max(1));
        self
    }

    pub fn with_sorted_series(mut self, sort: bool) -> Self {
        self.sort_series = sort;
        self
    }
}

/// Fans query descriptions out over partitions and merges the results
#[derive(Clone)]
pub struct QueryExecutor {
    config: QueryConfig,
    sink: Arc<dyn EventSink>,
}

impl QueryExecutor {
    pub fn new(config: QueryConfig, sink: Arc<dyn EventSink>) -> Self {
        Self { config, sink }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Runs every description concurrently against `partitions`.
    ///
    /// A failing partition contributes no points; the query itself never
    /// fails. Series arrive in completion order unless sorting is
    /// configured.
    pub async fn execute(
        &self,
        partitions: Arc<[Arc<dyn Partition>]>,
        descs: Vec<QueryDesc>,
    ) -> QueryResponse {
        let started = Instant::now();
        let num_descs = descs.len();
        let limiter = self
            .config
            .max_concurrent_fetches
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));

        let (tx, mut rx) = mpsc::channel(num_descs.max(1));
        let mut tasks = Vec::with_capacity(num_descs);

        for desc in descs {
            let tx = tx.clone();
            let partitions = Arc::clone(&partitions);
            let limiter = limiter.clone();
            let sink = Arc::clone(&self.sink);

            tasks.push(tokio::spawn(async move {
                if let Some(series) = fetch_series(&partitions, desc, limiter, sink).await {
                    // The receiver outlives every task
                    let _ = tx.send(series).await;
                }
            }));
        }
        drop(tx);

        let mut response = QueryResponse::default();
        while let Some(series) = rx.recv().await {
            response.series.push(series);
        }

        for task in tasks {
            if let Err(e) = task.await {
                self.sink.task_failed("fetch_series", &e.to_string());
            }
        }

        if self.config.sort_series {
            response
                .series
                .sort_by(|a, b| (&a.source, &a.metric).cmp(&(&b.source, &b.metric)));
        }

        self.sink
            .query_completed(num_descs, response.series.len(), started.elapsed());
        response
    }
}

/// Fetches one description from every overlapping partition
async fn fetch_series(
    partitions: &[Arc<dyn Partition>],
    desc: QueryDesc,
    limiter: Option<Arc<Semaphore>>,
    sink: Arc<dyn EventSink>,
) -> Option<Series> {
    let candidates = select_partitions(partitions, &desc);
    let names: Vec<String> = candidates.iter().map(|p| p.filename()).collect();
    sink.partitions_selected(&desc, &names);

    let desc = Arc::new(desc);
    let mut fetches = JoinSet::new();

    for partition in candidates {
        let permit = match &limiter {
            Some(limiter) => Arc::clone(limiter).acquire_owned().await.ok(),
            None => None,
        };
        let desc = Arc::clone(&desc);

        fetches.spawn_blocking(move || {
            let _permit = permit;
            let result = partition.fetch_points(&desc.source, &desc.metric, desc.start, desc.end);
            (partition, result)
        });
    }

    let mut points = Vec::new();
    while let Some(joined) = fetches.join_next().await {
        match joined {
            Ok((_, Ok(fetched))) => points.extend(fetched),
            Ok((partition, Err(e))) => {
                sink.partition_fetch_failed(&partition.filename(), &desc, &e.to_string());
            }
            Err(e) => sink.task_failed("fetch_points", &e.to_string()),
        }
    }

    // Partitions complete in any order and may overlap in time
    points.sort_by_key(|p| p.timestamp);

    Series::from_points(desc.source.clone(), desc.metric.clone(), points)
}
