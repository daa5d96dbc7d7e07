use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use clap::{Parser, ValueEnum};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use e2e_tests::{posted, TestHarness};
use inf_types::{Bout, Notice};

const SMALL_MESSAGE_COUNT: usize = 200;
const MEDIUM_MESSAGE_COUNT: usize = 2_000;
const DEFAULT_ITERATIONS: usize = 3;
const IDENTITIES: [&str; 6] = ["alice", "bob", "carol", "dave", "erin", "frank"];

#[derive(Parser, Debug)]
#[command(name = "perf_bench", about = "inf index performance benchmark harness")]
struct Args {
    #[arg(long, value_enum, default_value = "small")]
    tier: DatasetTier,
    #[arg(long, default_value_t = DEFAULT_ITERATIONS)]
    iterations: usize,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    #[arg(long, default_value = "crates/e2e-tests/benchmarks")]
    out_dir: PathBuf,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum DatasetTier {
    Small,
    Medium,
}

/// Latency summary of one step, plus operations per second when counted.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct StepMetrics {
    samples: usize,
    median_ms: f64,
    p90_ms: f64,
    max_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    median_ops: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BenchmarkOutput {
    tier: DatasetTier,
    iterations: usize,
    generated_at: String,
    steps: BTreeMap<String, StepMetrics>,
}

#[derive(Default)]
struct SampleCollector {
    /// step -> (duration ms, operations)
    samples: BTreeMap<String, Vec<(f64, Option<usize>)>>,
}

impl SampleCollector {
    fn record(&mut self, step: &str, duration_ms: f64, ops: Option<usize>) {
        self.samples
            .entry(step.to_string())
            .or_default()
            .push((duration_ms, ops));
    }
}

fn main() -> Result<(), String> {
    let args = Args::parse();
    fs::create_dir_all(&args.out_dir).map_err(|e| format!("Failed to create out dir: {e}"))?;

    let mut collector = SampleCollector::default();
    for iteration in 0..args.iterations {
        let mut rng = StdRng::seed_from_u64(args.seed + iteration as u64);
        run_iteration(args.tier, &mut rng, &mut collector)?;
    }

    let output = BenchmarkOutput {
        tier: args.tier,
        iterations: args.iterations,
        generated_at: Utc::now().to_rfc3339(),
        steps: build_metrics(&collector),
    };

    let json = serde_json::to_string_pretty(&output).map_err(|e| e.to_string())?;
    let table = render_table(&output);
    write_outputs(&args.out_dir, &json, &table)?;

    println!("{}", table);
    println!("\n{}", json);
    Ok(())
}

fn run_iteration(
    tier: DatasetTier,
    rng: &mut StdRng,
    collector: &mut SampleCollector,
) -> Result<(), String> {
    let harness = TestHarness::new();
    let notices = synthetic_notices(tier, rng);

    let start = Instant::now();
    for notice in &notices {
        harness.engine.see(notice).map_err(|e| e.to_string())?;
    }
    collector.record("post", elapsed_ms(start), Some(notices.len()));

    run_queries("query.draft", &harness, collector)?;

    let start = Instant::now();
    harness.engine.compact().map_err(|e| e.to_string())?;
    collector.record("compact", elapsed_ms(start), None);

    run_queries("query.baseline", &harness, collector)?;

    let triples = harness.triples();
    let start = Instant::now();
    for notice in &notices {
        if let Notice::MessagePosted { message, .. } = notice {
            triples
                .put(message.number, "bout", &message.bout)
                .map_err(|e| e.to_string())?;
        }
    }
    collector.record("triples.put", elapsed_ms(start), Some(notices.len()));

    let start = Instant::now();
    let mut found = 0;
    for bout in 1..=bout_count(tier) {
        for id in triples.reverse("bout", &bout).map_err(|e| e.to_string())? {
            id.map_err(|e| e.to_string())?;
            found += 1;
        }
    }
    collector.record("triples.reverse", elapsed_ms(start), Some(found));
    triples.close().map_err(|e| e.to_string())?;
    Ok(())
}

fn run_queries(
    step: &str,
    harness: &TestHarness,
    collector: &mut SampleCollector,
) -> Result<(), String> {
    let queries = [
        "(equal $author.name 'alice')",
        "(and (talks-with 'bob') (not (seen-by 'bob')))",
        "(limit 20 (or (equal $bout.number 1) (equal $bout.number 2)))",
        "(unique $bout.number (talks-with 'carol'))",
    ];
    let start = Instant::now();
    for query in queries {
        harness.engine.find(query).map_err(|e| e.to_string())?;
    }
    collector.record(step, elapsed_ms(start), Some(queries.len()));
    Ok(())
}

fn bout_count(tier: DatasetTier) -> u64 {
    match tier {
        DatasetTier::Small => 10,
        DatasetTier::Medium => 50,
    }
}

fn synthetic_notices(tier: DatasetTier, rng: &mut StdRng) -> Vec<Notice> {
    let count = match tier {
        DatasetTier::Small => SMALL_MESSAGE_COUNT,
        DatasetTier::Medium => MEDIUM_MESSAGE_COUNT,
    };
    let bouts: Vec<Bout> = (1..=bout_count(tier))
        .map(|number| {
            let people = IDENTITIES
                .iter()
                .filter(|_| rng.random_bool(0.5))
                .copied()
                .collect::<Vec<_>>();
            Bout::new(number, format!("bout {}", number)).with_participants(people)
        })
        .collect();

    let mut notices = Vec::with_capacity(count * 2);
    for number in 1..=count as u64 {
        let bout = &bouts[rng.random_range(0..bouts.len())];
        let author = IDENTITIES[rng.random_range(0..IDENTITIES.len())];
        let notice = posted(number, bout, author, &format!("message {}", number));
        let seen = match &notice {
            Notice::MessagePosted { message, .. } if rng.random_bool(0.3) => {
                let reader = IDENTITIES[rng.random_range(0..IDENTITIES.len())];
                Some(Notice::MessageSeen {
                    message: message.clone(),
                    identity: reader.to_string(),
                })
            }
            _ => None,
        };
        notices.push(notice);
        notices.extend(seen);
    }
    notices
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Nearest-rank quantile of sorted values.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        n => sorted[((q * n as f64).ceil() as usize).clamp(1, n) - 1],
    }
}

fn build_metrics(collector: &SampleCollector) -> BTreeMap<String, StepMetrics> {
    collector
        .samples
        .iter()
        .map(|(step, samples)| {
            let mut millis: Vec<f64> = samples.iter().map(|(ms, _)| *ms).collect();
            millis.sort_by(f64::total_cmp);

            let mut rates: Vec<f64> = samples
                .iter()
                .filter_map(|(ms, ops)| ops.map(|ops| ops as f64 * 1000.0 / ms.max(f64::EPSILON)))
                .collect();
            rates.sort_by(f64::total_cmp);

            let metrics = StepMetrics {
                samples: samples.len(),
                median_ms: quantile(&millis, 0.5),
                p90_ms: quantile(&millis, 0.9),
                max_ms: millis.last().copied().unwrap_or_default(),
                median_ops: (!rates.is_empty()).then(|| quantile(&rates, 0.5)),
            };
            (step.clone(), metrics)
        })
        .collect()
}

fn render_table(output: &BenchmarkOutput) -> String {
    let header = format!(
        "{:<18}{:>12}{:>12}{:>12}{:>14}",
        "step", "median_ms", "p90_ms", "max_ms", "ops/s"
    );
    let mut lines = vec![
        format!("tier={:?} iterations={}", output.tier, output.iterations),
        header,
    ];
    for (step, m) in &output.steps {
        let ops = m
            .median_ops
            .map(|ops| format!("{:.0}", ops))
            .unwrap_or_else(|| "-".to_string());
        lines.push(format!(
            "{:<18}{:>12.2}{:>12.2}{:>12.2}{:>14}",
            step, m.median_ms, m.p90_ms, m.max_ms, ops
        ));
    }
    lines.join("\n")
}

fn write_outputs(out_dir: &Path, json: &str, table: &str) -> Result<(), String> {
    fs::write(out_dir.join("latest.json"), json).map_err(|e| e.to_string())?;
    fs::write(out_dir.join("latest.txt"), table).map_err(|e| e.to_string())?;
    Ok(())
}
