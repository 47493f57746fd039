//! Inputs for the `demo` subcommand: the dataset a local seller lists and
//! the selection the local buyer asks for.

use anyhow::{bail, Context, Result};
use std::path::Path;

use pod_protocol::engine::sim::Dataset;
use pod_protocol::trade::{DataKind, Range, Scheme, Selection, TradeMode};

use crate::cli::DemoArgs;

const SAMPLE_LEN: usize = 4096;
const SAMPLE_CITIES: [&str; 5] = ["lisbon", "porto", "faro", "braga", "evora"];

/// Load `--input`, or generate a sample of the kind `mode` trades.
pub fn load_dataset(mode: TradeMode, input: Option<&Path>) -> Result<Dataset> {
    match (mode.data_kind(), input) {
        (DataKind::Plain, Some(path)) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("failed to read input {}", path.display()))?;
            Ok(Dataset::Plain(bytes))
        }
        (DataKind::Plain, None) => Ok(Dataset::Plain(
            (0..SAMPLE_LEN).map(|i| (i % 251) as u8).collect(),
        )),
        (DataKind::Table, Some(path)) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read input {}", path.display()))?;
            parse_csv(&text).with_context(|| format!("bad table in {}", path.display()))
        }
        (DataKind::Table, None) => Ok(Dataset::Table {
            columns: vec!["id".to_string(), "city".to_string()],
            rows: (0..20)
                .map(|i| vec![i.to_string(), SAMPLE_CITIES[i % SAMPLE_CITIES.len()].to_string()])
                .collect(),
        }),
    }
}

/// Split a headed CSV without quoting support.
fn parse_csv(text: &str) -> Result<Dataset> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let header = lines.next().context("missing header row")?;
    let columns: Vec<String> = header.split(',').map(|c| c.trim().to_string()).collect();
    let mut rows = Vec::new();
    for (i, line) in lines.enumerate() {
        let row: Vec<String> = line.split(',').map(|c| c.trim().to_string()).collect();
        if row.len() != columns.len() {
            bail!("row {} has {} cells, header has {}", i + 1, row.len(), columns.len());
        }
        rows.push(row);
    }
    Ok(Dataset::Table { columns, rows })
}

/// Build the buyer's selection. OT phantoms default to the whole dataset
/// of `items` blocks or rows.
pub fn selection(args: &DemoArgs, items: u64) -> Result<Selection> {
    let mode = args.mode;
    if mode.scheme() == Scheme::VrfQuery {
        if args.values.is_empty() {
            bail!("{mode} needs at least one --value");
        }
        let phantoms = if mode.is_ot() {
            args.values.iter().chain(&args.decoys).cloned().collect()
        } else {
            Vec::new()
        };
        return Ok(Selection::Query {
            key: args.key.clone(),
            values: args.values.clone(),
            phantoms,
        });
    }

    let demands = vec![Range::new(args.start, args.count)];
    if !mode.is_ot() {
        return Ok(Selection::ranges(demands));
    }
    let (start, count) = args.phantom.unwrap_or((0, items));
    Ok(Selection::Ranges {
        demands,
        phantoms: vec![Range::new(start, count)],
    })
}
