/// roobyvm - Rooby Bytecode CLI
use roobyvm::bytecode::{Host, Vm};
use roobyvm::config::RuntimeConfig;
use std::env;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::{fmt, EnvFilter};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_usage() {
    eprintln!("roobyvm v{}", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    roobyvm [OPTIONS] <INPUT>");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -h, --help           Print this help message");
    eprintln!("    -v, --version        Print version information");
    eprintln!("    --check              Load only and report the sections found");
    eprintln!("    --disasm             Print a disassembly listing");
    eprintln!("    --run                Load and execute (default)");
    eprintln!("    --trace              Log every executed instruction");
    eprintln!("    --config <FILE>      Read configuration from FILE");
    eprintln!("    -q, --quiet          Only log errors");
    eprintln!("    --verbose            Log loader and VM activity");
    eprintln!();
    eprintln!("ARGUMENTS:");
    eprintln!("    <INPUT>              Input bytecode file (use '-' for stdin)");
    eprintln!();
    eprintln!("EXAMPLES:");
    eprintln!("    roobyvm program.robc");
    eprintln!("    roobyvm --disasm program.robc");
    eprintln!("    cat program.robc | roobyvm --check -");
}

fn print_version() {
    println!("roobyvm {}", VERSION);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Check,
    Disasm,
    Run,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

struct Options {
    input: Option<String>,
    config: Option<PathBuf>,
    mode: Mode,
    trace: bool,
    verbosity: Verbosity,
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();

    let mut input = None;
    let mut config = None;
    let mut mode = Mode::Run;
    let mut trace = false;
    let mut verbosity = Verbosity::Normal;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                process::exit(0);
            }
            "--check" => mode = Mode::Check,
            "--disasm" => mode = Mode::Disasm,
            "--run" => mode = Mode::Run,
            "--trace" => trace = true,
            "--config" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing config file after --config".to_string());
                }
                config = Some(PathBuf::from(&args[i]));
            }
            "-q" | "--quiet" => verbosity = Verbosity::Quiet,
            "--verbose" => verbosity = Verbosity::Verbose,
            arg if arg.starts_with('-') && arg != "-" => {
                return Err(format!("Unknown option: {}", arg));
            }
            arg => {
                if input.is_some() {
                    return Err("Multiple input files specified".to_string());
                }
                input = Some(arg.to_string());
            }
        }
        i += 1;
    }

    Ok(Options {
        input,
        config,
        mode,
        trace,
        verbosity,
    })
}

/// Install the stderr subscriber. `RUST_LOG` wins over flags and config.
fn init_logging(options: &Options, config: &RuntimeConfig) {
    let level = match options.verbosity {
        Verbosity::Quiet => "error".to_string(),
        Verbosity::Verbose => "debug".to_string(),
        Verbosity::Normal if options.trace => format!("{},roobyvm::vm=trace", config.log.level),
        Verbosity::Normal => config.log.level.clone(),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn read_input(input: &str) -> Result<String, String> {
    if input == "-" {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .map_err(|e| format!("Failed to read from stdin: {}", e))?;
        Ok(buffer)
    } else {
        let path = Path::new(input);
        if !path.exists() {
            return Err(format!("Input file not found: {}", input));
        }
        fs::read_to_string(path).map_err(|e| format!("Failed to read file '{}': {}", input, e))
    }
}

fn execute(text: &str, options: &Options, config: RuntimeConfig) -> Result<String, String> {
    let host = Host::with_standard_registry().with_options(config.loader.load_options());
    let mut vm_config = config.vm;
    vm_config.trace |= options.trace;
    let mut vm = Vm::with_config(host, vm_config);

    let sets = vm.load(text).map_err(|e| format!("Load error: {}", e))?;

    let mut output = String::new();
    match options.mode {
        Mode::Check => {
            for set in &sets {
                output.push_str(&format!(
                    "<{}> {} ({} instructions)\n",
                    set.label().name(),
                    set.label().kind().as_str(),
                    set.len()
                ));
            }
            output.push_str(&format!("ok: {} sections\n", sets.len()));
        }
        Mode::Disasm => {
            for set in &sets {
                output.push_str(&set.disassemble());
                output.push('\n');
            }
        }
        Mode::Run => {
            let value = vm.run().map_err(|e| format!("Runtime error: {}", e))?;
            output.push_str(&format!("{}\n", value));
        }
    }
    Ok(output)
}

fn main() {
    let options = match parse_args() {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            process::exit(1);
        }
    };

    let config = match RuntimeConfig::load(options.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    init_logging(&options, &config);

    let Some(input) = options.input.as_deref() else {
        eprintln!("Error: Missing input file");
        eprintln!();
        print_usage();
        process::exit(1);
    };

    let text = match read_input(input) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    match execute(&text, &options, config) {
        Ok(output) => print!("{}", output),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
