use anyhow::Result;
use clap::Parser;
use latchkey::*;
use log::*;
use std::sync::Arc;

fn main() -> Result<()> {
    env_logger::init();
    let config = Config::parse().check()?;
    info!("config: {config:?}");

    let task = AppendLine::new(&config.output).line(config.line.clone());
    task.reset()?;

    let store = Arc::new(MemStore::new());
    let report = config.pool().run(store.clone(), &task);
    report.log_summary();

    if store.peak() > 1 {
        anyhow::bail!("store held {} records at once", store.peak());
    }

    let n = verify_output(task.path(), &config.line, config.workers)?;
    info!("{} holds {n} records", task.path().display());

    Ok(())
}
