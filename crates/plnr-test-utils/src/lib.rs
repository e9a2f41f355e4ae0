//! Testing utilities for plnr workspace
//!
//! Shared fixtures: sample tables, counting loaders, and analysis functions
//! with known behavior (deterministic, failing, panicking).

#![allow(missing_docs)]

use plnr_core::{fields, Argset, DataSnapshot, FnRef, Loader, Plan, Table};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Loader that counts its invocations
pub fn counting_loader(value: Value) -> (Loader, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let loader = Loader::function(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(value.clone())
    });
    (loader, calls)
}

/// `measurements`: integer readings used by the sample analyses
pub fn measurements() -> Value {
    json!([3, 1, 4, 1, 5, 9, 2, 6])
}

/// Table with a `region` name column and a numeric `scale` column
pub fn region_table(rows: usize) -> Table {
    let mut table = Table::new(["region", "scale"]);
    for i in 0..rows {
        table
            .push_row(vec![json!(format!("region_{i}")), json!(i as i64 + 1)])
            .unwrap();
    }
    table
}

/// Table with only a `scale` column
pub fn scale_table(rows: usize) -> Table {
    let mut table = Table::new(["scale"]);
    for i in 0..rows {
        table.push_row(vec![json!(i as i64 + 1)]).unwrap();
    }
    table
}

/// Deterministic analysis: sum of `measurements` times the argset's `scale`
pub fn scaled_sum(data: &DataSnapshot, argset: &Argset) -> anyhow::Result<Value> {
    let values: Vec<i64> = data.get_as("measurements")?;
    let scale: i64 = argset.get_as("scale")?;
    Ok(json!(values.iter().sum::<i64>() * scale))
}

/// Analysis that fails when the argset's `scale` is a multiple of `every`
pub fn failing_every(every: i64) -> FnRef {
    FnRef::function(move |data, argset| {
        let scale: i64 = argset.get_as("scale")?;
        if scale % every == 0 {
            anyhow::bail!("scale {scale} rejected");
        }
        scaled_sum(data, argset)
    })
}

/// Analysis that always panics
pub fn panicking() -> FnRef {
    FnRef::function(|_, argset| panic!("analysis {} exploded", argset.name()))
}

/// Plan with `measurements` data and the `scaled_sum` function registered
pub fn setup_test_plan() -> Plan {
    let mut plan = Plan::new();
    plan.add_data("measurements", Loader::direct(measurements()))
        .unwrap();
    plan.register_function("scaled_sum", scaled_sum).unwrap();
    plan
}

/// [`setup_test_plan`] plus one analysis per scale in `1..=n`, named `an_{scale}`
pub fn plan_with_analyses(n: i64) -> Plan {
    let mut plan = setup_test_plan();
    for scale in 1..=n {
        let name = format!("an_{scale}");
        plan.add_argset(Some(&name), fields! {"scale" => scale}).unwrap();
        plan.add_analysis(Some(&name), "scaled_sum", None).unwrap();
    }
    plan
}

/// Expected `scaled_sum` result for a scale
pub fn expected_scaled_sum(scale: i64) -> Value {
    json!(31 * scale)
}
