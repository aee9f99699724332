use keel_lang::{
    diagnostics::{report_compile_error, report_io_error},
    language::build::{check_sources, compile, load_sources},
    target::BuildOptions,
};
use std::{env, fs, path::PathBuf, process};
use tracing::info;

const USAGE: &str = "Usage: keel [build|check] <source-dir> [--entry <package>] [--mode program|tool] [--out <file.c>]";
const LOG_ENV: &str = "KEEL_LOG";

struct CliArgs {
    command: String,
    root: PathBuf,
    entry: Option<String>,
    mode: Option<String>,
    out: Option<PathBuf>,
}

fn main() {
    setup_logging();
    let args = match parse_args(env::args().skip(1).collect()) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            eprintln!("{USAGE}");
            process::exit(2);
        }
    };

    let files = match load_sources(&args.root) {
        Ok(files) => files,
        Err(error) => {
            report_io_error(&args.root, &error);
            process::exit(1);
        }
    };
    info!(files = files.len(), root = %args.root.display(), "loaded sources");

    match args.command.as_str() {
        "check" => match check_sources(&files) {
            Ok(checked) => println!("ok: {} function(s) checked", checked.functions.len()),
            Err(error) => {
                report_compile_error(&files, &error);
                process::exit(1);
            }
        },
        "build" => {
            let options = match BuildOptions::from_sources(args.mode, args.entry) {
                Ok(options) => options,
                Err(message) => {
                    eprintln!("{message}");
                    process::exit(2);
                }
            };
            let compilation = match compile(&files, &options) {
                Ok(compilation) => compilation,
                Err(error) => {
                    report_compile_error(&files, &error);
                    process::exit(1);
                }
            };
            match &args.out {
                Some(path) => {
                    if let Err(error) = fs::write(path, &compilation.c_source) {
                        report_io_error(path, &error);
                        process::exit(1);
                    }
                    info!(out = %path.display(), "wrote C translation unit");
                }
                None => print!("{}", compilation.c_source),
            }
        }
        other => {
            eprintln!("Invalid command `{other}`. {USAGE}");
            process::exit(2);
        }
    }
}

fn parse_args(args: Vec<String>) -> Result<CliArgs, String> {
    let mut args = args.into_iter();
    let command = args.next().ok_or("missing command")?;
    let root = args.next().map(PathBuf::from).ok_or("missing source directory")?;
    let mut cli = CliArgs {
        command,
        root,
        entry: None,
        mode: None,
        out: None,
    };
    while let Some(flag) = args.next() {
        let mut value = || args.next().ok_or_else(|| format!("`{flag}` needs a value"));
        match flag.as_str() {
            "--entry" => cli.entry = Some(value()?),
            "--mode" => cli.mode = Some(value()?),
            "--out" | "-o" => cli.out = Some(PathBuf::from(value()?)),
            _ => return Err(format!("unknown flag `{flag}`")),
        }
    }
    Ok(cli)
}

fn setup_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let formatter = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = tracing_subscriber::registry().with(filter).with(formatter).try_init();
}
