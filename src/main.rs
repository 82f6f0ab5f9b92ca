//! CLI entry point: REPL, file, or usage-error mode, plus a trace-mode diagnostic dump.
//!
//! A `clap::Parser` derive `Cli`, a `LogLevel` `ValueEnum` threaded in as `--mode`, and an
//! end-of-run diagnostic dump gated on trace mode that disassembles the compiled chunk.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use wisp::disasm::disassemble_chunk;
use wisp::treewalk::interpreter::{Interpreter, TreeWalkError};
use wisp::vm::{InterpretError, Vm};

#[derive(Parser)]
#[command(name = "wispc")]
#[command(version)]
#[command(about = "wisp: a bytecode VM and tree-walking interpreter for a small dynamic language", long_about = None)]
struct Cli {
    /// Script to run. Omit to start a REPL. Passing more than one is a usage error.
    inputs: Vec<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = LogLevel::Release)]
    mode: LogLevel,

    /// Which interpreter runs the program.
    #[arg(short, long, value_enum, default_value_t = Engine::Bytecode)]
    engine: Engine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Release,
    Debug,
    Trace,
}

impl LogLevel {
    fn filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Release => log::LevelFilter::Warn,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Engine {
    Bytecode,
    Treewalk,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::new().filter_level(cli.mode.filter()).init();

    match cli.inputs.as_slice() {
        [] => {
            run_repl(cli.engine, cli.mode);
            ExitCode::SUCCESS
        }
        [path] => run_file(path, cli.engine, cli.mode),
        _ => {
            eprintln!("Usage: wispc [path]");
            ExitCode::from(64)
        }
    }
}

fn run_repl(engine: Engine, mode: LogLevel) {
    let mut vm = Vm::new();
    let mut interpreter = Interpreter::new();
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        let _ = stdout.flush();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF (Ctrl-D)
            Ok(_) => {}
            Err(e) => {
                eprintln!("[Error] failed to read stdin: {e}");
                break;
            }
        }
        let line = line.trim_end_matches('\n');
        if line.is_empty() {
            continue;
        }

        if mode == LogLevel::Trace {
            trace_dump(line);
        }

        match engine {
            Engine::Bytecode => {
                if let Err(err) = vm.interpret(line) {
                    eprintln!("{err}");
                }
            }
            Engine::Treewalk => {
                if let Err(err) = interpreter.run(line) {
                    eprintln!("{err}");
                }
            }
        }
    }
}

fn run_file(path: &PathBuf, engine: Engine, mode: LogLevel) -> ExitCode {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("[Error] could not read {}: {e}", path.display());
            return ExitCode::from(74);
        }
    };

    if mode == LogLevel::Trace {
        trace_dump(&source);
    }

    match engine {
        Engine::Bytecode => {
            let mut vm = Vm::new();
            match vm.interpret(&source) {
                Ok(()) => ExitCode::from(0),
                Err(InterpretError::Compile(errs)) => {
                    for e in &errs {
                        eprintln!("{e}");
                    }
                    ExitCode::from(65)
                }
                Err(InterpretError::Runtime(e)) => {
                    eprintln!("{e}");
                    ExitCode::from(70)
                }
            }
        }
        Engine::Treewalk => {
            let mut interpreter = Interpreter::new();
            match interpreter.run(&source) {
                Ok(()) => ExitCode::from(0),
                Err(TreeWalkError::Compile(errs)) => {
                    for e in &errs {
                        eprintln!("{e}");
                    }
                    ExitCode::from(65)
                }
                Err(TreeWalkError::Resolve(errs)) => {
                    for e in &errs {
                        eprintln!("{e}");
                    }
                    ExitCode::from(65)
                }
                Err(TreeWalkError::Runtime(e)) => {
                    eprintln!("{e}");
                    ExitCode::from(70)
                }
            }
        }
    }
}

/// Compiles `source` afresh into a scratch heap purely to disassemble it — a second,
/// throwaway compile, kept separate from whichever `Vm`/`Interpreter` actually runs the
/// program so trace mode never shares mutable state with execution.
fn trace_dump(source: &str) {
    let mut heap = wisp::gc::Heap::new();
    match wisp::compiler::Compiler::compile(source, &mut heap) {
        Ok(function) => {
            let chunk = unsafe { &function.as_ref().data.chunk };
            println!("{}", disassemble_chunk(chunk, "script"));
        }
        Err(errs) => {
            for e in &errs {
                eprintln!("{e}");
            }
        }
    }
}
