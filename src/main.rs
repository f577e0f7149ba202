//! tilegraph CLI
//!
//! Lists the built-in operators and runs one of them over a synthetic
//! two-band product.

use anyhow::{anyhow, bail, Context};
use std::io::Write;
use std::sync::Arc;
use tilegraph::prelude::*;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage(&args[0]);
        return;
    }

    let result = match args[1].as_str() {
        "list" => {
            list_operators();
            Ok(())
        }
        "info" => match args.get(2) {
            Some(alias) => operator_info(alias),
            None => Err(anyhow!("Please specify an operator alias")),
        },
        "run" => match args.get(2) {
            Some(alias) => run_operator(alias, &args[3..]),
            None => Err(anyhow!("Please specify an operator alias")),
        },
        "help" | "--help" | "-h" => {
            print_usage(&args[0]);
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage(&args[0]);
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        let configuration = e.downcast_ref::<ConfigurationError>().or_else(|| match e.downcast_ref::<TileGraphError>() {
            Some(TileGraphError::Configuration(inner)) => Some(inner),
            _ => None,
        });
        if let Some(fix) = configuration.and_then(ConfigurationError::suggested_fix) {
            eprintln!("Hint: {}", fix);
        }
        std::process::exit(1);
    }
}

fn print_usage(program: &str) {
    println!("tilegraph v{}", tilegraph::VERSION);
    println!();
    println!("Usage: {} <command> [options]", program);
    println!();
    println!("Commands:");
    println!("  list                 List all available operators");
    println!("  info <alias>         Show parameters and sources of an operator");
    println!("  run <alias> [opts]   Run an operator over a synthetic red/nir product");
    println!("  help                 Show this help message");
    println!();
    println!("Run options:");
    println!("  --size <WxH>         Product size (default: 1024x1024)");
    println!("  --tile <WxH>         Tile size (default: from config or 512x512)");
    println!("  --order <order>      row-band-column or row-column-band");
    println!("  --threads <n>        Worker threads, 0 for all cores");
    println!("  --config <file>      TOML execution config");
    println!("  --param <k=v>        Operator parameter, repeatable");
}

fn list_operators() {
    let registry = OperatorRegistry::with_builtins();
    println!("Available operators ({} total):", registry.len());
    println!();
    for category in registry.categories() {
        println!("  {}", category);
        for alias in registry.operators_by_category(category) {
            if let Some(metadata) = registry.get_metadata(alias) {
                println!("      {} - {}", alias, metadata.description);
            }
        }
        println!();
    }
}

fn operator_info(alias: &str) -> anyhow::Result<()> {
    let registry = OperatorRegistry::with_builtins();
    let metadata = registry
        .get_metadata(alias)
        .ok_or_else(|| anyhow!("Operator not found: {} (use 'list' to see available operators)", alias))?;

    println!("Operator: {}", metadata.alias);
    println!("Category: {}", metadata.category);
    println!("Version: {}", metadata.version);
    if !metadata.authors.is_empty() {
        println!("Authors: {}", metadata.authors);
    }
    println!();
    println!("Description:");
    println!("  {}", metadata.description);
    println!();

    if !metadata.schema.sources.is_empty() {
        println!("Sources:");
        for source in &metadata.schema.sources {
            let optional = if source.optional { " (optional)" } else { "" };
            println!("  {}{}", source.name, optional);
        }
        println!();
    }

    if !metadata.schema.parameters.is_empty() {
        println!("Parameters:");
        for param in &metadata.schema.parameters {
            let default = param
                .default_value
                .as_ref()
                .map(|v| format!(" = {}", v))
                .unwrap_or_default();
            println!("  {} [{}]{}", param.name, param.value_type, default);
            if let Some(interval) = &param.interval {
                println!("    range {}", interval);
            }
            if !param.value_set.is_empty() {
                let values: Vec<String> = param.value_set.iter().map(|v| v.to_string()).collect();
                println!("    one of {}", values.join(", "));
            }
            if !param.description.is_empty() {
                println!("    {}", param.description);
            }
        }
    }
    Ok(())
}

struct RunOptions {
    size: (u32, u32),
    config: ExecutionConfig,
    parameters: ParameterSet,
}

fn parse_run_options(args: &[String]) -> anyhow::Result<RunOptions> {
    let mut size = (1024, 1024);
    let mut config = ExecutionConfig::default();
    let mut tile = None;
    let mut order = None;
    let mut threads = None;
    let mut parameters = ParameterSet::new();

    let mut i = 0;
    while i < args.len() {
        let value = || {
            args.get(i + 1)
                .ok_or_else(|| anyhow!("Missing value for {}", args[i]))
        };
        match args[i].as_str() {
            "--size" => size = parse_dimensions(value()?)?,
            "--tile" => tile = Some(parse_dimensions(value()?)?),
            "--order" => order = Some(value()?.parse::<ExecutionOrder>()?),
            "--threads" => threads = Some(value()?.parse::<usize>().context("Invalid thread count")?),
            "--config" => {
                config = ExecutionConfig::from_toml_file(value()?)
                    .with_context(|| format!("Cannot load config {}", args[i + 1]))?
            }
            "--param" => {
                let (name, value) = ParameterSet::parse_assignment(value()?)?;
                parameters.insert(name, value);
            }
            other => bail!("Unknown option: {}", other),
        }
        i += 2;
    }

    if let Some((width, height)) = tile {
        config = config.with_tile_size(width, height);
    }
    if let Some(order) = order {
        config = config.with_order(order);
    }
    if let Some(threads) = threads {
        config = config.with_parallelism(threads);
    }
    Ok(RunOptions {
        size,
        config,
        parameters,
    })
}

/// A product with a `red` ramp and a `nir` ramp running the other way.
fn synthetic_product(width: u32, height: u32) -> anyhow::Result<RasterProduct> {
    let levels = MultiLevelModel::suggested_level_count(width, height, 256, 256);
    let mut product = RasterProduct::new("synthetic", "SYNTHETIC", width, height)
        .with_description("Synthetic red/nir gradients");
    let red = Raster::from_fn(width, height, DataType::UInt16, |x, _| (x % 1000) as f64);
    let nir = Raster::from_fn(width, height, DataType::UInt16, |_, y| (1000 - y % 1000) as f64);
    product.add_band(Band::from_raster("red", red, levels)?.with_unit("dn"))?;
    product.add_band(Band::from_raster("nir", nir, levels)?.with_unit("dn"))?;
    Ok(product)
}

fn run_operator(alias: &str, args: &[String]) -> anyhow::Result<()> {
    let options = parse_run_options(args)?;
    let registry = OperatorRegistry::with_builtins();
    let (width, height) = options.size;
    let source = Arc::new(synthetic_product(width, height)?);

    let mut parameters = options.parameters;
    if alias == "LinearTransform" && !parameters.contains("source_band") {
        println!("Using source_band=red");
        parameters.insert("source_band", "red");
    }

    let operator = registry.create(
        alias,
        OperatorConfig::new()
            .with_parameters(parameters)
            .with_source("source", source),
    )?;
    let mut node = OperatorNode::new(operator).with_config(options.config);
    let executor = OperatorExecutor::create(&mut node)?;

    println!(
        "Running {} over {}x{} pixels: {}x{} tiles, {} band groups, {} order",
        alias,
        width,
        height,
        executor.grid().columns(),
        executor.grid().rows(),
        executor.groups().len(),
        executor.order()
    );

    let tracker = ProgressTracker::new().with_callback(Box::new(|update| {
        if let ProgressUpdate::Progress { percent, .. } = update {
            print!("\r  {:5.1}%", percent);
            let _ = std::io::stdout().flush();
        }
    }));
    let stats = executor.run(&tracker)?;
    println!();
    println!(
        "Computed {} tiles in {} batches in {:.2?} ({:.1} tiles/s)",
        stats.work_items,
        stats.batches,
        stats.duration,
        stats.tiles_per_second()
    );

    let product = node.target_product()?;
    for band in product.bands() {
        let level = band.read_level(0)?;
        let valid: Vec<f64> = level
            .samples()
            .iter()
            .copied()
            .filter(|&v| !band.is_no_data(v))
            .collect();
        if valid.is_empty() {
            println!("  {:<12} no valid samples", band.name());
            continue;
        }
        let min = valid.iter().copied().fold(f64::INFINITY, f64::min);
        let max = valid.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = valid.iter().sum::<f64>() / valid.len() as f64;
        println!(
            "  {:<12} {:<8} min {:>10.4} max {:>10.4} mean {:>10.4}",
            band.name(),
            band.data_type(),
            min,
            max,
            mean
        );
    }

    let cache = node.context()?.cache().stats();
    println!(
        "Tile cache: {} computed, {} hits ({:.0}% hit ratio)",
        cache.misses,
        cache.hits,
        cache.hit_ratio() * 100.0
    );
    Ok(())
}

fn parse_dimensions(s: &str) -> anyhow::Result<(u32, u32)> {
    let (w, h) = s
        .split_once('x')
        .ok_or_else(|| anyhow!("Expected WxH, got '{}'", s))?;
    let w = w.trim().parse().with_context(|| format!("Invalid width in '{}'", s))?;
    let h = h.trim().parse().with_context(|| format!("Invalid height in '{}'", s))?;
    if w == 0 || h == 0 {
        bail!("Dimensions must be positive, got '{}'", s);
    }
    Ok((w, h))
}
