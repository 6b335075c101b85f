use abigraph::{
    Analyzer, BuildOptions, CanonicalizeOptions, Corpus, CorpusOptions, CorpusStats,
    DeclarationOrder,
};
use anyhow::Result;
use clap::Parser;
use log::{debug, info, warn};
use serde::Serialize;
use std::path::PathBuf;

/// abigraph - canonicalize the types of a compiled library across its
/// compilation units
#[derive(Parser)]
#[command(name = "abigraph")]
#[command(version)]
#[command(about = "build and canonicalize type graphs from DWARF debug info", long_about = None)]
struct Cli {
    /// path to the binary (.so, .dylib, .o, or dSYM)
    library: PathBuf,

    /// drop a whole struct/union when one of its members cannot be resolved
    #[arg(long)]
    strict_members: bool,

    /// compare every node from scratch instead of sharing canonical identities
    #[arg(long)]
    no_propagation: bool,

    /// ignore declaration order of members and enumerators
    #[arg(long)]
    sorted_members: bool,

    /// suppress informational messages (only show the report)
    #[arg(short = 'q', long)]
    quiet: bool,

    /// verbose logging to console (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// output a JSON report
    #[arg(short = 'j', long)]
    json: bool,
}

impl Cli {
    fn corpus_options(&self) -> CorpusOptions {
        CorpusOptions {
            build: BuildOptions {
                strict_members: self.strict_members,
            },
            canonicalize: CanonicalizeOptions {
                propagate: !self.no_propagation,
                declaration_order: if self.sorted_members {
                    DeclarationOrder::Sorted
                } else {
                    DeclarationOrder::Significant
                },
            },
        }
    }
}

#[derive(Serialize)]
struct UnitReport {
    name: String,
    nodes: usize,
    diagnostics: Vec<String>,
}

#[derive(Serialize)]
struct Report {
    library: String,
    options: CorpusOptions,
    units: Vec<UnitReport>,
    stats: CorpusStats,
    types: Vec<String>,
}

impl Report {
    fn new(library: &std::path::Path, options: CorpusOptions, corpus: &Corpus) -> Self {
        let graph = corpus.canonical_graph();

        // named representatives only; anonymous ones are spelled by their users
        let mut types: Vec<String> = graph
            .representatives()
            .into_iter()
            .filter(|rep| graph.node(*rep).and_then(|node| node.name()).is_some())
            .filter_map(|rep| corpus.describe(rep))
            .collect();
        types.sort();
        types.dedup();

        Self {
            library: library.display().to_string(),
            options,
            units: corpus
                .units()
                .iter()
                .map(|unit| UnitReport {
                    name: unit.name().to_string(),
                    nodes: unit.graph().arena().len(),
                    diagnostics: unit
                        .graph()
                        .diagnostics()
                        .iter()
                        .map(ToString::to_string)
                        .collect(),
                })
                .collect(),
            stats: graph.stats(),
            types,
        }
    }

    fn print(&self) {
        println!("{}", self.library);
        for unit in &self.units {
            println!(
                "  {:<40} {:>6} nodes {:>4} diagnostics",
                unit.name,
                unit.nodes,
                unit.diagnostics.len()
            );
        }

        println!();
        println!("{:<12} {:>8} {:>8}", "kind", "nodes", "classes");
        for (kind, counts) in &self.stats.kinds {
            println!(
                "{:<12} {:>8} {:>8}",
                kind, counts.nodes, counts.representatives
            );
        }
        println!(
            "{:<12} {:>8} {:>8}",
            "total", self.stats.nodes, self.stats.representatives
        );

        println!();
        for name in &self.types {
            println!("{};", name);
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logger(cli.verbose, cli.quiet);

    let options = cli.corpus_options();
    info!("library: {}", cli.library.display());
    debug!("options: {:?}", options);

    let analyzer = Analyzer::from_file(&cli.library)?;
    let corpus = analyzer.load_corpus(options)?;

    if corpus.units().is_empty() {
        warn!(
            "no compilation units found. maybe you compiled without debug info, or stripped the binary?"
        );
    }

    let report = Report::new(&cli.library, options, &corpus);
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        report.print();
    }

    Ok(())
}

fn init_logger(verbose: u8, quiet: bool) {
    // If quiet mode is enabled, only show warnings and errors
    let log_level = if quiet {
        log::LevelFilter::Warn
    } else {
        match verbose {
            0 => log::LevelFilter::Error,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false)
        .init();
}
