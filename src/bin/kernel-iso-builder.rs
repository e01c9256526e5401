use std::path::PathBuf;
use std::process;

use anyhow::{bail, Result};
use kernel_iso_builder::config::{BuildConfig, DEFAULT_CONFIG_FILE};
use kernel_iso_builder::preflight::{check_required_tools, BUILD_TOOLS, RUN_TOOLS};
use kernel_iso_builder::{Pipeline, ToolFailure};

fn usage() -> &'static str {
    "Usage:\n  kernel-iso-builder build [--config <path>]\n  kernel-iso-builder run [--config <path>] [-- <extra qemu args>]\n  kernel-iso-builder clean [--config <path>]"
}

fn main() {
    if let Err(err) = real_main() {
        eprintln!("error: {:#}", err);
        process::exit(exit_code(&err));
    }
}

/// Propagate the failed tool's exit code when one is in the chain.
fn exit_code(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(tool) = cause.downcast_ref::<ToolFailure>() {
            if let Some(code) = tool.exit_code {
                return code;
            }
        }
    }
    1
}

fn real_main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        bail!(usage());
    };

    match command.as_str() {
        "build" => {
            let (config_path, rest) = parse_config_flag(rest)?;
            reject_extra_args(rest)?;
            check_required_tools(BUILD_TOOLS)?;
            Pipeline::new(load_config(config_path)?).build_image()
        }
        "run" => {
            let (flags, qemu_args) = split_passthrough(rest);
            let (config_path, flags) = parse_config_flag(flags)?;
            reject_extra_args(flags)?;
            check_required_tools(BUILD_TOOLS)?;
            check_required_tools(RUN_TOOLS)?;
            Pipeline::new(load_config(config_path)?).run_emulator(qemu_args)
        }
        "clean" => {
            let (config_path, rest) = parse_config_flag(rest)?;
            reject_extra_args(rest)?;
            Pipeline::new(load_config(config_path)?).clean()
        }
        _ => bail!(usage()),
    }
}

fn load_config(path: Option<PathBuf>) -> Result<BuildConfig> {
    match path {
        // An explicitly named config must exist; the default may be absent.
        Some(path) => BuildConfig::load(&path),
        None => BuildConfig::load_or_default(std::path::Path::new(DEFAULT_CONFIG_FILE)),
    }
}

/// Split `args` at the first `--`; everything after it is emulator
/// passthrough.
fn split_passthrough(args: &[String]) -> (&[String], &[String]) {
    match args.iter().position(|arg| arg == "--") {
        Some(pos) => (&args[..pos], &args[pos + 1..]),
        None => (args, &[]),
    }
}

fn parse_config_flag(args: &[String]) -> Result<(Option<PathBuf>, &[String])> {
    match args {
        [flag, path, rest @ ..] if flag == "--config" => {
            Ok((Some(PathBuf::from(path)), rest))
        }
        [flag] if flag == "--config" => bail!("--config requires a path\n{}", usage()),
        _ => Ok((None, args)),
    }
}

fn reject_extra_args(args: &[String]) -> Result<()> {
    if !args.is_empty() {
        bail!("unexpected argument '{}'\n{}", args[0], usage());
    }
    Ok(())
}
