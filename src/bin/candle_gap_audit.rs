use candle_ingest::{
    audit_coverage, format_timestamp_utc, init_logging, logging_config_from_env,
    prepare_forecast_window, DatasetStore, IngestError, SyncConfig,
};
use tracing::{info, warn};

#[derive(Default, Debug, Clone, Copy)]
struct Totals {
    expected: u64,
    actual: u64,
    missing: u64,
    unordered: u64,
    misaligned: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging = logging_config_from_env();
    init_logging(&logging)?;

    let cfg = SyncConfig::from_env()?;
    let store = DatasetStore::new(cfg.store.clone());
    let keys = cfg.dataset_keys()?;

    println!(
        "Running candle gap audit for {} at {} under {} (lookback={} pred_len={})",
        cfg.inst_ids.join("/"),
        cfg.interval,
        cfg.store.data_root.display(),
        cfg.forecast.lookback,
        cfg.forecast.pred_len
    );

    let mut totals = Totals::default();
    let mut problems = Vec::new();

    for key in &keys {
        let path = store.path_for(key);
        let records = match store.load(key) {
            Ok(records) => records,
            Err(err) => {
                warn!(
                    component = "candle_gap_audit",
                    event = "audit.load.error",
                    dataset = %key,
                    error = %err
                );
                println!("\n{} | unreadable: {}", key, err);
                problems.push(format!("{key}: {err}"));
                continue;
            }
        };

        let coverage = audit_coverage(&records, key.interval);
        totals.expected += coverage.expected_points;
        totals.actual += coverage.actual_points;
        totals.missing += coverage.missing_points;
        totals.unordered += coverage.unordered_points;
        totals.misaligned += coverage.misaligned_points;

        info!(
            component = "candle_gap_audit",
            event = "audit.dataset",
            dataset = %key,
            expected = coverage.expected_points,
            actual = coverage.actual_points,
            missing = coverage.missing_points,
            gap_ranges = coverage.total_gap_ranges
        );

        println!(
            "\n{} | path={} first={} last={} expected={} actual={} missing={} unordered={} misaligned={}",
            key,
            path.display(),
            coverage.first_ts_ms.map(format_timestamp_utc).unwrap_or_else(|| "-".to_string()),
            coverage.last_ts_ms.map(format_timestamp_utc).unwrap_or_else(|| "-".to_string()),
            coverage.expected_points,
            coverage.actual_points,
            coverage.missing_points,
            coverage.unordered_points,
            coverage.misaligned_points
        );
        for (gap_start, gap_end) in &coverage.gap_ranges {
            println!(
                "  gap {} -> {}",
                format_timestamp_utc(*gap_start),
                format_timestamp_utc(*gap_end)
            );
        }
        if coverage.total_gap_ranges > coverage.gap_ranges.len() as u64 {
            println!(
                "  ... {} more gap ranges not listed",
                coverage.total_gap_ranges - coverage.gap_ranges.len() as u64
            );
        }
        if !coverage.is_contiguous() {
            problems.push(format!("{key}: {} missing bars", coverage.missing_points));
        }

        match prepare_forecast_window(&records, key.interval, &cfg.forecast) {
            Ok(window) => println!(
                "  forecast window ready | history={} step_ms={} gaps_in_window={} next={}",
                window.history.len(),
                window.step_ms,
                window.coverage.missing_points,
                window
                    .future_timestamps
                    .first()
                    .map(|ts| format_timestamp_utc(*ts))
                    .unwrap_or_else(|| "-".to_string())
            ),
            Err(err @ IngestError::InsufficientHistory { .. }) => {
                println!("  forecast window unavailable: {}", err);
                problems.push(format!("{key}: {err}"));
            }
            Err(err) => return Err(err.into()),
        }
    }

    println!(
        "\nTOTAL | expected={} actual={} missing={} unordered={} misaligned={}",
        totals.expected, totals.actual, totals.missing, totals.unordered, totals.misaligned
    );

    if problems.is_empty() {
        println!("RESULT: all datasets contiguous and forecast-ready.");
        Ok(())
    } else {
        Err(format!("audit found problems: {}", problems.join("; ")).into())
    }
}
