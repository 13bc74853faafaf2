use candle_ingest::{
    init_logging, log_app_start, log_ingest_summary, logging_config_from_env, DatasetStore,
    Ingestor, SyncConfig,
};

const APP: &str = "candle_sync";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging = logging_config_from_env();
    init_logging(&logging)?;

    let cfg = SyncConfig::from_env()?;
    log_app_start(APP, &logging, &cfg);

    let keys = cfg.dataset_keys()?;
    let fetcher = cfg.build_fetcher()?;
    let store = DatasetStore::new(cfg.store.clone());
    let ingestor = Ingestor::new(fetcher.as_ref(), &store, &cfg.pager);

    println!(
        "Candle sync start | source={} bar={} mode={} data_root={} instruments={}",
        cfg.source.as_str(),
        cfg.interval,
        cfg.mode.as_str(),
        cfg.store.data_root.display(),
        cfg.inst_ids.join(",")
    );

    let mut failed = Vec::new();
    for key in &keys {
        let report = ingestor.run(key, cfg.mode);
        log_ingest_summary(APP, &report);

        let stop = report.stop_reason.map(|s| s.as_str()).unwrap_or("none");
        if report.success {
            println!(
                "OK {} {} | mode={} rows={} fetched={} added={} replaced={} pages={} stop={} saved={} path={}",
                report.inst_id,
                report.bar,
                report.effective_mode.as_str(),
                report.rows,
                report.fetched,
                report.added,
                report.replaced,
                report.pages_fetched,
                stop,
                report.saved,
                report.path.display()
            );
        } else {
            println!(
                "FAILED {} {} | rows={} saved={} stop={} error={}",
                report.inst_id,
                report.bar,
                report.rows,
                report.saved,
                stop,
                report.error.as_deref().unwrap_or("unknown")
            );
            failed.push(key.to_string());
        }
    }

    if failed.is_empty() {
        println!("All datasets synced.");
        Ok(())
    } else {
        Err(format!(
            "{} of {} datasets failed: {}",
            failed.len(),
            keys.len(),
            failed.join(", ")
        )
        .into())
    }
}
