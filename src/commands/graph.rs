//! `converge graph` - export the relationship graph

use anyhow::{Context as AnyhowContext, Result, bail};
use catalog::{ResourceGraph, SharedResource};
use std::fs;

use crate::cli::GraphArgs;
use crate::loader;
use crate::ui;

pub fn run(args: GraphArgs) -> Result<()> {
    let catalog_path = match &args.catalog {
        Some(path) => path.clone(),
        None => loader::default_path()?,
    };
    let catalog = loader::load(&catalog_path)?;
    let mut graph = catalog.relationship_graph();
    if args.reversed {
        graph = graph.reversal();
    }

    let Some(text) = render(&graph, &args)? else {
        ui::success("No dependency cycles");
        return Ok(());
    };

    match &args.output {
        Some(path) => {
            fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))?;
            ui::info(&format!("Graph written to {}", path.display()));
        }
        None => print!("{text}"),
    }
    Ok(())
}

/// `None` when only cycles were asked for and there are none
fn render(graph: &ResourceGraph<SharedResource>, args: &GraphArgs) -> Result<Option<String>> {
    if args.cycles {
        return Ok(graph.topsort().err().map(|cycle| cycle.to_dot(graph)));
    }
    if args.order {
        return match graph.topsort() {
            Ok(order) => Ok(Some(
                order
                    .into_iter()
                    .map(|vertex| format!("{}\n", graph.reference_of(vertex)))
                    .collect(),
            )),
            Err(cycle) => bail!("{}", cycle.message(graph).trim_end()),
        };
    }
    Ok(Some(graph.to_dot("Relationships")))
}
