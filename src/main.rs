use std::env;
use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use tessera::ingestion::{CsvParser, JsonParser, Parser};
use tessera::metrics;
use tessera::storage::{FileWal, WalConfig};
use tessera::{Database, EventSink, QueryConfig, QueryDesc, TracingSink};

const WAL_FILENAME: &str = "memory.wal";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Logs go to stderr so stdout carries only the query response
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Ok(addr) = env::var("TESSERA_METRICS_ADDR") {
        let addr: SocketAddr = addr.parse()?;
        metrics::init_metrics(addr)?;
        info!("Metrics server listening on {}", addr);
    }

    let data_dir = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./data"));
    let format = env::var("TESSERA_FORMAT").unwrap_or_else(|_| "csv".to_string());
    let parsers: Vec<Box<dyn Parser>> =
        vec![Box::new(CsvParser::new()), Box::new(JsonParser::new())];
    let parser = parsers
        .into_iter()
        .find(|parser| parser.supported_formats().contains(&format.as_str()))
        .ok_or_else(|| format!("Unsupported input format: {}", format))?;

    let sink: Arc<dyn EventSink> = Arc::new(TracingSink);
    let db = Database::new(QueryConfig::default().with_sorted_series(true), sink);

    let wal = Arc::new(FileWal::open(data_dir.join(WAL_FILENAME), WalConfig::default())?);
    let partition = db.recover_writable(wal).await?;
    info!(
        "Recovered {} points from {}",
        partition.num_points(),
        data_dir.display()
    );

    let mut input = Vec::new();
    tokio::io::stdin().read_to_end(&mut input).await?;
    let rows = parser.parse(&input)?;
    if !rows.is_empty() {
        let count = rows.len();
        db.insert(rows).await?;
        info!("Inserted {} rows", count);
    }

    let descs: Vec<QueryDesc> = partition
        .sources()
        .into_iter()
        .flat_map(|source| {
            partition
                .metrics(&source)
                .into_iter()
                .map(move |metric| QueryDesc::new(source.clone(), metric, i64::MIN, i64::MAX))
        })
        .collect();

    let response = db.query(&descs).await;
    println!("{}", serde_json::to_string_pretty(&response)?);

    Ok(())
}
