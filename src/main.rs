//! Top level driver: reads one SSA function body, lowers it out of SSA form
//! and prints the result.

use std::path::Path;
use std::time;

use anyhow::{Context, Result};

use unssa::args::{self, LoweringConfig};
use unssa::ssa::parse::{parse_function, parse_typed_instance};
use unssa::ssa::TypedInstance;
use unssa::{lower_function, lower_typed_instance, AllocationReport};

// Helper macro to time evaluating an expression (like a function call.)
macro_rules! time {
  ( $x:expr ) => {{
    let t1 = time::Instant::now();
    let result = $x;
    (result, t1.elapsed())
  }};
}

/// Bodies with at least one `type` line go through the typed layer.
fn is_typed(text: &str) -> bool {
  text.lines().any(|line| line.trim_start().starts_with("type "))
}

fn print_types(instance: &TypedInstance) {
  let mut types = instance.types().iter().collect::<Vec<_>>();
  types.sort_by(|first, second| first.0.cmp(second.0));
  for (name, ty) in types {
    println!("type {}: {}", name, ty);
  }
}

fn print_report(report: &AllocationReport) -> Result<()> {
  let json = serde_json::to_string_pretty(report).context("cannot serialize allocation report")?;
  println!("{}", json);
  Ok(())
}

fn run() -> Result<()> {
  let cfg = args::parse_args()?;

  // make envlogger stdout
  env_logger::builder()
    .target(env_logger::Target::Stdout)
    .format_timestamp(None)
    .init();

  let lowering = match &cfg.config_file {
    Some(path) => LoweringConfig::from_file(Path::new(path))?,
    None => LoweringConfig::default(),
  };
  let text =
    std::fs::read_to_string(&cfg.file).with_context(|| format!("cannot read {}", cfg.file))?;

  if is_typed(&text) {
    let (instance, parse_time) = time!(parse_typed_instance(&text));
    let instance = instance.with_context(|| format!("cannot parse {}", cfg.file))?;
    if cfg.dump_ssa {
      print!("{}", instance.body());
    }
    let (lowered, lower_time) = time!(lower_typed_instance(instance, &lowering));
    let lowered = lowered?;
    if cfg.dump_cssa {
      print!("{}", lowered.cssa);
    }
    if cfg.dump_allocation {
      print_report(&lowered.report)?;
    }
    print_types(&lowered.result);
    print!("{}", lowered.result.body());
    if cfg.verbose {
      println!("Parse time: {} us", parse_time.as_micros());
      println!("Lowering: {} us", lower_time.as_micros());
    }
  } else {
    let (body, parse_time) = time!(parse_function(&text));
    let body = body.with_context(|| format!("cannot parse {}", cfg.file))?;
    if cfg.dump_ssa {
      print!("{}", body);
    }
    let (lowered, lower_time) = time!(lower_function(body, &lowering));
    let lowered = lowered?;
    if cfg.dump_cssa {
      print!("{}", lowered.cssa);
    }
    if cfg.dump_allocation {
      print_report(&lowered.report)?;
    }
    print!("{}", lowered.result);
    if cfg.verbose {
      println!("Parse time: {} us", parse_time.as_micros());
      println!("Lowering: {} us", lower_time.as_micros());
    }
  }
  Ok(())
}

fn main() {
  if let Err(e) = run() {
    eprintln!("{:#}", e);
    std::process::exit(1);
  }
}
