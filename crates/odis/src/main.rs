//! odis CLI - static Mach-O disassembler and lifter.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use odis::Pipeline;

#[derive(Parser)]
#[command(name = "odis")]
#[command(about = "Static Mach-O disassembler and lifter")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Analysis mode.
#[derive(Clone, Copy, Debug, ValueEnum, Default)]
enum AnalysisArg {
    /// Full CFG recovery from symbols and discovered call targets
    #[default]
    Cfg,
    /// Linear section sweep, no edges
    Linear,
}

#[derive(Subcommand)]
enum Commands {
    /// Lift an object file to textual IR
    Lift {
        /// Input Mach-O file
        #[arg(value_name = "OBJECT")]
        input: PathBuf,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Analysis mode
        #[arg(long, value_enum, default_value = "cfg")]
        analysis: AnalysisArg,

        /// Load-time slide added to every address (hex or decimal)
        #[arg(long, value_parser = parse_address, default_value = "0")]
        slide: u64,
    },
    /// Print image facts: entrypoint, sections, functions, imports
    Info {
        /// Input Mach-O file
        #[arg(value_name = "OBJECT")]
        input: PathBuf,

        /// Load-time slide added to every address (hex or decimal)
        #[arg(long, value_parser = parse_address, default_value = "0")]
        slide: u64,
    },
}

fn parse_address(value: &str) -> Result<u64, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|_| format!("invalid address '{value}'"))
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "odis=debug" } else { "odis=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(default_filter.parse().unwrap()),
        )
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Lift {
            input,
            output,
            analysis,
            slide,
        } => lift(&input, output.as_deref(), analysis, slide),
        Commands::Info { input, slide } => print_info(&input, slide),
    };

    if let Err(err) = result {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn lift(
    input: &std::path::Path,
    output: Option<&std::path::Path>,
    analysis: AnalysisArg,
    slide: u64,
) -> odis::Result<()> {
    info!(input = %input.display(), "lifting");
    let data = fs::read(input)?;
    let pipeline = Pipeline::load(&data, slide)?;
    let with_cfg = matches!(analysis, AnalysisArg::Cfg);
    let (module, stats) = pipeline.lift(with_cfg)?;

    match output {
        Some(path) => {
            let mut file = fs::File::create(path)?;
            odis::write_module(&mut file, &module)?;
            info!(output = %path.display(), "done");
        }
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            odis::write_module(&mut lock, &module)?;
            lock.flush()?;
        }
    }
    info!(
        functions = module.funcs.len(),
        translated = stats.translated,
        uniqued = stats.uniqued,
        "lifted"
    );
    Ok(())
}

fn print_info(input: &std::path::Path, slide: u64) -> odis::Result<()> {
    let data = fs::read(input)?;
    let pipeline = Pipeline::load(&data, slide)?;
    let image = pipeline.image();

    match image.entrypoint {
        Some(entry) => println!("entrypoint: {entry:#x}"),
        None => println!("entrypoint: unknown"),
    }

    println!("sections:");
    for section in &image.sections {
        println!(
            "  {:<20} {:#012x} size {:#x} {:?}",
            section.name,
            image.effective_addr(section.addr),
            section.size,
            section.class
        );
    }

    let starts = image.function_starts();
    println!("function starts: {}", starts.len());
    for addr in starts {
        println!("  {addr:#x}");
    }

    if !image.init_functions.is_empty() {
        println!("static initializers:");
        for addr in &image.init_functions {
            println!("  {addr:#x}");
        }
    }
    if !image.exit_functions.is_empty() {
        println!("static finalizers:");
        for addr in &image.exit_functions {
            println!("  {addr:#x}");
        }
    }

    let stubs = pipeline.symbolizer().entries();
    if !stubs.is_empty() {
        println!("import stubs:");
        for (addr, name) in stubs {
            println!("  {addr:#x} {name}");
        }
    }

    Ok(())
}
