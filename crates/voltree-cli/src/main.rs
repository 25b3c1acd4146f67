//! Voltree CLI - drive implicit-surface trees from the command line

mod demos;
mod sources;

use std::f32::consts::TAU;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use image::{GrayImage, Luma};
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use voltree_core::prelude::{NodeId, Tree, Vec3, VolumeError};
use voltree_engine::{Engine, Settings, load_settings, save_settings};
use voltree_shader::ShaderAssembler;

use demos::{HANDLE_LABEL, Scene};

#[derive(Parser)]
#[command(name = "voltree")]
#[command(about = "Implicit-surface trees compiled to WGSL", long_about = None)]
#[command(version)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SceneArgs {
    /// Built-in scene
    #[arg(short, long, value_enum, default_value = "barrel")]
    scene: Scene,

    /// Raw little-endian f32 grid over [-1, 1]³, unioned into the scene
    #[arg(long)]
    volume: Option<PathBuf>,

    /// Samples per axis in the raw grid
    #[arg(long, default_value = "32")]
    volume_res: u32,
}

impl SceneArgs {
    fn build(&self) -> Result<Tree> {
        let mut tree = self.scene.build()?;
        if let Some(path) = &self.volume {
            demos::attach_raw_volume(&mut tree, path, self.volume_res)?;
        }
        Ok(tree)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the assembled shader for a scene
    Emit {
        #[command(flatten)]
        scene: SceneArgs,

        /// Print only the field expression
        #[arg(long)]
        expr_only: bool,

        /// WGSL template to splice into instead of the built-in ray marcher
        #[arg(long)]
        template: Option<PathBuf>,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Evaluate the field at points given as x,y,z
    Eval {
        #[command(flatten)]
        scene: SceneArgs,

        /// Points to evaluate
        #[arg(required = true, allow_hyphen_values = true, value_parser = parse_point)]
        points: Vec<Vec3>,

        /// Also read each point back from the root's baked cache
        #[arg(long)]
        cached: bool,
    },

    /// Run the caching pass, bake caches and optionally dump a slice
    Bake {
        #[command(flatten)]
        scene: SceneArgs,

        /// Force a cache on the root node
        #[arg(long)]
        cache_root: bool,

        /// Slot to dump
        #[arg(long, default_value = "0")]
        slot: u32,

        /// Z slice to dump (defaults to the middle)
        #[arg(long)]
        slice: Option<u32>,

        /// PNG file for the slice
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Drag the scene's handle and count shader rebuilds
    Drag {
        #[command(flatten)]
        scene: SceneArgs,

        /// Number of edits
        #[arg(short = 'n', long, default_value = "100")]
        steps: u32,

        /// Spin the handle as well as moving it
        #[arg(long)]
        rotate: bool,
    },

    /// Print the tree, its cost and the cache assignments
    Stats {
        #[command(flatten)]
        scene: SceneArgs,
    },

    /// Show settings, or write the defaults
    Config {
        /// Overwrite the settings file with defaults
        #[arg(long)]
        write_defaults: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let path = settings_path(cli.config);
    let settings = path.as_deref().map(load_settings).unwrap_or_default();

    match cli.command {
        Commands::Emit {
            scene,
            expr_only,
            template,
            output,
        } => {
            run_emit(&scene, settings, expr_only, template.as_deref(), output.as_deref())?;
        }
        Commands::Eval {
            scene,
            points,
            cached,
        } => {
            run_eval(&scene, settings, &points, cached)?;
        }
        Commands::Bake {
            scene,
            cache_root,
            slot,
            slice,
            output,
        } => {
            run_bake(&scene, settings, cache_root, slot, slice, output.as_deref())?;
        }
        Commands::Drag {
            scene,
            steps,
            rotate,
        } => {
            run_drag(&scene, settings, steps, rotate)?;
        }
        Commands::Stats { scene } => {
            run_stats(&scene, settings)?;
        }
        Commands::Config { write_defaults } => {
            run_config(path.as_deref(), &settings, write_defaults)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    // stdout carries shader text and reports
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn settings_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(|| dirs::config_dir().map(|p| p.join("voltree").join("settings.json")))
}

fn parse_point(s: &str) -> Result<Vec3, String> {
    let coords: Vec<f32> = s
        .split(',')
        .map(|c| c.trim().parse::<f32>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("'{}': {}", s, e))?;
    match coords.as_slice() {
        [x, y, z] => Ok(Vec3::new(*x, *y, *z)),
        _ => Err(format!("'{}': expected three comma-separated numbers", s)),
    }
}

fn run_emit(
    scene: &SceneArgs,
    settings: Settings,
    expr_only: bool,
    template: Option<&Path>,
    output: Option<&Path>,
) -> Result<()> {
    let mut tree = scene.build()?;
    let mut engine = Engine::with_settings(settings);
    if let Some(path) = template {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read template {}", path.display()))?;
        engine = engine.with_assembler(ShaderAssembler::with_template(text));
    }
    engine.update(&mut tree)?;

    let text = if expr_only {
        tree.emit_field()?
    } else {
        engine.shader().context("No shader was built")?.to_string()
    };

    match output {
        Some(path) => {
            fs::write(path, &text)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {} bytes to {}", text.len(), path.display());
        }
        None => println!("{}", text),
    }
    Ok(())
}

fn run_eval(scene: &SceneArgs, settings: Settings, points: &[Vec3], cached: bool) -> Result<()> {
    let mut tree = scene.build()?;
    let root = tree.root().context("Scene has no root")?;

    let mut engine = Engine::with_settings(settings);
    if cached {
        tree.set_requires_cache(root, true)?;
    }
    let frame = engine.update(&mut tree)?;
    report_failures(&tree, &frame.bake.failures);

    for p in points {
        let value = tree.evaluate(*p)?;
        let side = if value >= 0.0 { "inside" } else { "outside" };
        print!("({:.3}, {:.3}, {:.3})  {:>10.6}  {}", p.x, p.y, p.z, value, side);
        if cached {
            match tree.cached_value(root, *p, engine.store()) {
                Some(c) => print!("  cache {:>10.6}  (error {:.6})", c, (c - value).abs()),
                None => print!("  cache unavailable"),
            }
        }
        println!();
    }
    Ok(())
}

fn run_bake(
    scene: &SceneArgs,
    settings: Settings,
    cache_root: bool,
    slot: u32,
    slice: Option<u32>,
    output: Option<&Path>,
) -> Result<()> {
    let mut tree = scene.build()?;
    if cache_root {
        let root = tree.root().context("Scene has no root")?;
        tree.set_requires_cache(root, true)?;
    }

    let mut engine = Engine::with_settings(settings);
    let frame = engine.update(&mut tree)?;

    println!(
        "Caching: {} node(s), {} voxel(s)",
        frame.caching.assignments.len(),
        frame.caching.voxel_count()
    );
    for (node, s, res) in &frame.caching.assignments {
        println!("  slot {:>2}  {}  {}x{}x{}", s, describe(&tree, *node), res.x, res.y, res.z);
    }
    println!("Baked slots: {:?}", frame.bake.baked);
    report_failures(&tree, &frame.bake.failures);

    let Some(path) = output else {
        return Ok(());
    };
    let volume = engine
        .store()
        .get(slot)
        .with_context(|| format!("Slot {} holds no cache", slot))?;
    let z = slice.unwrap_or(volume.resolution.z / 2);
    let values = volume
        .slice(z)
        .with_context(|| format!("Slot {} has no slice {}", slot, z))?;

    let width = volume.resolution.x;
    let img = GrayImage::from_fn(width, volume.resolution.y, |x, y| {
        let v = values[(x + y * width) as usize];
        Luma([((v.clamp(-1.0, 1.0) * 0.5 + 0.5) * 255.0) as u8])
    });
    img.save(path)
        .with_context(|| format!("Failed to save {}", path.display()))?;
    println!("Saved slot {} slice {} to {}", slot, z, path.display());
    Ok(())
}

fn run_drag(scene: &SceneArgs, settings: Settings, steps: u32, rotate: bool) -> Result<()> {
    let mut tree = scene.build()?;
    let handle = tree
        .find(HANDLE_LABEL)
        .with_context(|| format!("Scene has no node labelled '{}'", HANDLE_LABEL))?;
    tree.set_parameterized(handle, true)?;
    let start = tree.transform_params(handle)?;

    let mut engine = Engine::with_settings(settings);
    engine.update(&mut tree)?;
    let baseline = engine.recompile_count();

    let mut uploads = 0;
    let mut rebakes = 0;
    let timer = Instant::now();
    for step in 1..=steps {
        let t = step as f32 / steps.max(1) as f32;
        let mut params = start;
        params.translate += Vec3::new(0.0, (t * TAU).sin() * 0.5, 0.0);
        if rotate {
            params.rotation.z = t * TAU;
        }
        tree.set_transform_params(handle, params)?;

        let frame = engine.update(&mut tree)?;
        uploads += frame.dirty_kinds.len();
        rebakes += frame.bake.baked.len();
    }
    let elapsed = timer.elapsed();

    println!("{} edit(s) in {:.2?}", steps, elapsed);
    println!("  shader rebuilds:   {}", engine.recompile_count() - baseline);
    println!("  parameter uploads: {}", uploads);
    println!("  cache rebakes:     {}", rebakes);
    Ok(())
}

fn run_stats(scene: &SceneArgs, settings: Settings) -> Result<()> {
    let mut tree = scene.build()?;
    let mut engine = Engine::with_settings(settings);
    let frame = engine.update(&mut tree)?;
    let root = tree.root().context("Scene has no root")?;
    let bounds = tree.bounds(root)?;

    println!("Nodes: {}", tree.node_count());
    println!("Total cost: {}", tree.total_cost()?);
    println!("Bounds: {} .. {}", bounds.min, bounds.max);
    println!();

    for id in tree.preorder() {
        let node = tree.node(id)?;
        let mut depth = 0;
        let mut up = node.parent();
        while let Some(parent) = up {
            depth += 1;
            up = tree.node(parent)?.parent();
        }
        let cache = match node.cache().slot {
            Some(slot) => {
                let r = node.cache().resolution;
                format!("  [cache slot {} {}x{}x{}]", slot, r.x, r.y, r.z)
            }
            None => String::new(),
        };
        println!(
            "{}{}  cost {}{}",
            "  ".repeat(depth),
            describe(&tree, id),
            tree.cost(id)?,
            cache
        );
    }

    println!();
    println!(
        "Cache voxels: {} of {}",
        frame.caching.voxel_count(),
        engine.settings().max_voxels
    );
    println!("Parameters: {}", engine.registry().len());
    println!("Shader: {} bytes", engine.shader().map_or(0, str::len));
    Ok(())
}

fn run_config(path: Option<&Path>, settings: &Settings, write_defaults: bool) -> Result<()> {
    let path = path.context("No config directory available; pass --config")?;
    if write_defaults {
        save_settings(path, &Settings::default())?;
        println!("Wrote default settings to {}", path.display());
        return Ok(());
    }

    println!("# {}", path.display());
    println!("{}", serde_json::to_string_pretty(settings)?);
    Ok(())
}

fn describe(tree: &Tree, id: NodeId) -> String {
    match tree.node(id) {
        Ok(node) => match node.label() {
            Some(label) => format!("{} '{}'", node.kind().name(), label),
            None => node.kind().name().to_string(),
        },
        Err(_) => format!("{}", id),
    }
}

fn report_failures(tree: &Tree, failures: &[(NodeId, VolumeError)]) {
    for (node, err) in failures {
        eprintln!("warning: {} failed to load: {}", describe(tree, *node), err);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn points_parse_from_comma_lists() {
        assert_eq!(parse_point("1,-2.5, 3").unwrap(), Vec3::new(1.0, -2.5, 3.0));
        assert!(parse_point("1,2").is_err());
        assert!(parse_point("1,x,3").is_err());
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "voltree", "-vv", "eval", "--scene", "slider", "0,0,0", "-1,0.5,0",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Eval { scene, points, .. } => {
                assert_eq!(scene.scene, Scene::Slider);
                assert_eq!(points, vec![Vec3::ZERO, Vec3::new(-1.0, 0.5, 0.0)]);
            }
            _ => panic!("expected eval"),
        }
    }

    #[test]
    fn explicit_config_path_wins() {
        let path = PathBuf::from("/tmp/voltree-test.json");
        assert_eq!(settings_path(Some(path.clone())), Some(path));
    }
}
