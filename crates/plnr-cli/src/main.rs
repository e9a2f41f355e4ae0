use anyhow::{bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use indexmap::IndexMap;
use plnr_core::prelude::*;
use plnr_core::{hash_value, logging, retry, ContentHash, RetryPolicy};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

fn cli() -> Command {
    Command::new("plnr")
        .version(plnr_core::VERSION)
        .about("Run analysis plans over datasets and argsets")
        .subcommand_required(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("run")
                .about("Build the demo plan and run every analysis")
                .arg(
                    Arg::new("parallel")
                        .long("parallel")
                        .action(ArgAction::SetTrue)
                        .help("Run analyses on a worker pool"),
                )
                .arg(
                    Arg::new("workers")
                        .long("workers")
                        .value_parser(value_parser!(usize))
                        .help("Worker count for --parallel (defaults to config, then CPU count)"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output results as JSON"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML configuration file (environment is used otherwise)"),
                )
                .arg(
                    Arg::new("readings")
                        .long("readings")
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON array of numbers to use instead of the synthetic series"),
                )
                .arg(
                    Arg::new("fail")
                        .long("fail")
                        .action(ArgAction::Append)
                        .help("Rebind the named analysis to a function that always fails"),
                ),
        )
        .subcommand(
            Command::new("hash")
                .about("Print the content hash of a JSON value")
                .arg(
                    Arg::new("value")
                        .required(true)
                        .help("JSON text, e.g. '{\"a\": [1, 2]}'"),
                ),
        )
}

fn main() -> ExitCode {
    let matches = cli().get_matches();
    logging::init_tracing(matches.get_flag("log-json"));

    let outcome = match matches.subcommand() {
        Some(("run", sub)) => run(sub),
        Some(("hash", sub)) => hash(sub).map(|()| true),
        _ => Ok(true),
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

/// Runs the demo plan; `Ok(false)` when any analysis failed
fn run(matches: &ArgMatches) -> anyhow::Result<bool> {
    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => PlanConfig::load(path)?,
        None => PlanConfig::from_env()?,
    };
    config.validate()?;

    let readings = matches.get_one::<PathBuf>("readings").map(PathBuf::as_path);
    let mut plan = demo_plan(config, readings)?;
    for name in matches.get_many::<String>("fail").into_iter().flatten() {
        let argset = plan.analyses().entry(name)?.argset().to_string();
        plan.remove_analysis(name);
        let target = name.clone();
        plan.add_analysis(
            Some(name),
            FnRef::function(move |_, _| bail!("forced failure of {target}")),
            Some(&argset),
        )?;
    }

    let results = if matches.get_flag("parallel") {
        plan.run_all_parallel(matches.get_one::<usize>("workers").copied())?
    } else {
        plan.run_all()?
    };

    if matches.get_flag("json") {
        let outcomes: IndexMap<&str, Value> = results
            .iter()
            .map(|(name, outcome)| {
                let entry = match outcome {
                    Ok(value) => json!({ "ok": value }),
                    Err(e) => json!({ "error": e.to_string() }),
                };
                (name, entry)
            })
            .collect();
        let hashes: IndexMap<String, String> = plan
            .data_hashes()?
            .into_iter()
            .map(|(name, hash)| (name, hash.to_string()))
            .collect();
        let report = json!({
            "results": outcomes,
            "summary": plan.summary(),
            "data_hashes": hashes,
            "workers": results.workers(),
            "elapsed_ms": results.elapsed().as_millis() as u64,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for (name, outcome) in results.iter() {
            match outcome {
                Ok(value) => println!("{name:<16} ok      {value}"),
                Err(e) => println!("{name:<16} FAILED  {e}"),
            }
        }
        println!(
            "\n{} succeeded, {} failed, {} workers, {:?}",
            results.succeeded(),
            results.failed(),
            results.workers(),
            results.elapsed()
        );
    }

    Ok(results.all_succeeded())
}

fn hash(matches: &ArgMatches) -> anyhow::Result<()> {
    let text = matches
        .get_one::<String>("value")
        .context("missing JSON value")?;
    let value: Value = serde_json::from_str(text).context("value is not valid JSON")?;
    let digest = hash_value(&value);
    tracing::debug!(short = %ContentHash::of_value(&value).short(), "hashed value");
    println!("{digest}");
    Ok(())
}

/// Deterministic pseudo-random series of `len` readings
fn series(len: u64) -> Vec<f64> {
    (0..len).map(|i| ((i * 37 + 11) % 101) as f64).collect()
}

/// Plan with two datasets and one analysis per (scale, window) combination
///
/// `readings` selects a JSON file as the readings source; the synthetic
/// series is used otherwise.
fn demo_plan(config: PlanConfig, readings: Option<&Path>) -> anyhow::Result<Plan> {
    let mut plan = Plan::with_config(config);

    plan.register_loader("series", |_, args| {
        let len = args.first().and_then(Value::as_u64).unwrap_or(64);
        Ok(json!(series(len)))
    })?;
    plan.register_loader("readings_file", |_, args| {
        let path = args
            .first()
            .and_then(Value::as_str)
            .context("readings_file expects a path argument")?;
        let text = retry(&RetryPolicy::new(3), || std::fs::read_to_string(path))
            .with_context(|| format!("cannot read {path}"))?;
        let readings: Vec<f64> =
            serde_json::from_str(&text).with_context(|| format!("{path} is not a JSON array of numbers"))?;
        Ok(json!(readings))
    })?;

    let source = match readings {
        Some(path) => Loader::named_with_args("readings_file", vec![json!(path.display().to_string())]),
        None => Loader::named_with_args("series", vec![json!(64)]),
    };
    plan.add_data("readings", source)?;
    plan.add_data("offset", Loader::direct(json!(10.0)))?;

    plan.register_function("windowed_mean", |data, argset| {
        let readings: Vec<f64> = data.get_as("readings")?;
        let offset: f64 = data.get_as("offset")?;
        let scale: f64 = argset.get_as("scale")?;
        let window: usize = argset.get_as("window")?;
        if window == 0 || window > readings.len() {
            bail!("window {window} out of range for {} readings", readings.len());
        }
        let tail = &readings[readings.len() - window..];
        let mean = tail.iter().sum::<f64>() / window as f64;
        Ok(json!(mean * scale + offset))
    })?;

    let names = plan.add_analysis_from_list(
        "windowed_mean",
        plnr_core::expand!("scale" => [1.0, 2.0, 3.0], "window" => [4, 16]),
        &BatchOptions::new(),
    )?;
    tracing::info!(analyses = names.len(), "demo plan ready");
    Ok(plan)
}
