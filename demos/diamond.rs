use std::thread;
use std::time::Duration;

use nagare::Pipeline;

/// This example demonstrates the "diamond dependency" pattern.
///
/// Topology:
///
///         [fetch]
///         /     \
///    [parse]   [stats]
///         \     /
///         [report]
///
/// `fetch` runs once; `parse` and `stats` both consume its output and can
/// run in parallel; `report` joins the two branches back together.
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut pipeline = Pipeline::new();

    let fetch = pipeline.add_source("fetch", || {
        // Stand-in for a slow acquisition step.
        thread::sleep(Duration::from_millis(50));
        Ok(String::from("3 1 4 1 5 9 2 6"))
    })?;

    let parse = pipeline.add_stage(
        "parse",
        |raw: &String| {
            let values = raw
                .split_whitespace()
                .map(str::parse::<i64>)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(values)
        },
        fetch.clone(),
    )?;

    let stats = pipeline.add_stage(
        "stats",
        |raw: &String| Ok(raw.split_whitespace().count()),
        fetch.clone(),
    )?;

    let joined = pipeline.join("joined", &parse, &stats)?;

    let report = pipeline.add_stage(
        "report",
        |(values, count): &(Vec<i64>, usize)| {
            let total: i64 = values.iter().sum();
            Ok(format!("{count} values, sum {total}"))
        },
        joined,
    )?;

    // Print the wiring as a Mermaid diagram before running.
    println!("{pipeline}");

    let workers = thread::available_parallelism().map(|n| n.get().min(2))?;
    let summary = pipeline.run(&report, workers)?;
    println!("{summary}");

    Ok(())
}
