use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use pgm_hub::inference::{marginal, marginals};
use pgm_hub::io::read_model;
use pgm_hub::types::{Error, Evidence};

/// Exact inference over a discrete probabilistic graphical model.
#[derive(Parser)]
#[command(name = "pgm-hub")]
#[command(about = "Exact inference over discrete probabilistic graphical models")]
#[command(version)]
struct Cli {
    /// Path to the graph file (JSON wire format).
    graph: PathBuf,

    /// Query variable. Omit to run belief propagation and print every
    /// variable's marginal instead of one.
    query: Option<String>,

    /// Point evidence, e.g. `--evidence A=1 --evidence B=0`. Repeatable.
    #[arg(long = "evidence", value_name = "VAR=STATE")]
    evidence: Vec<String>,

    /// Run full clique-tree belief propagation even when a query variable is given.
    #[arg(long)]
    bp: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(exit_code(&err))
        }
    }
}

fn run(cli: Cli) -> pgm_hub::types::Result<()> {
    let model = read_model(&cli.graph)?;
    let evidence = parse_evidence(&cli.evidence)?;

    if cli.bp || cli.query.is_none() {
        let all = marginals(&model, &evidence)?;
        for (var, probs) in &all {
            let rendered: Vec<String> = probs.iter().map(|p| format!("{p:.6}")).collect();
            println!("{var}: [{}]", rendered.join(", "));
        }
        return Ok(());
    }

    let query = cli.query.expect("checked above");
    let result = marginal(&model, &query, &evidence)?;
    let mut rows: Vec<(usize, f64)> = result
        .rows()
        .iter()
        .map(|r| (*r.assignment().get(&query).expect("row keeps the query variable"), r.weight()))
        .collect();
    rows.sort_by_key(|(state, _)| *state);
    let rendered: Vec<String> = rows.into_iter().map(|(_, w)| format!("{w:.6}")).collect();
    println!("{query}: [{}]", rendered.join(", "));
    Ok(())
}

fn parse_evidence(pairs: &[String]) -> pgm_hub::types::Result<Evidence> {
    let mut evidence = Evidence::default();
    for pair in pairs {
        let (var, state) = pair.split_once('=').ok_or_else(|| {
            Error::MalformedFactor("<evidence>".into(), format!("`{pair}` is not `var=state`"))
        })?;
        let state: usize = state.parse().map_err(|_| {
            Error::MalformedFactor(
                "<evidence>".into(),
                format!("evidence state `{state}` is not a non-negative integer"),
            )
        })?;
        evidence.insert(var.to_string(), state);
    }
    Ok(evidence)
}

fn exit_code(err: &Error) -> u8 {
    match err {
        Error::Io(_) => 2,
        Error::Json(_) => 3,
        Error::MalformedFactor(_, _) => 4,
        Error::UnknownVariable(_) => 5,
        Error::IncompatibleEvidence(_) => 6,
        Error::DegenerateFactor => 7,
        Error::NonTreeClusterGraph(_) => 8,
    }
}
