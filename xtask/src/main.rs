use anyhow::{Context, Result};
use burn::config::Config;
use burn_ndarray::NdArray;
use clap::{Args, Parser, Subcommand};
use highres_io::{MappingKind, PreprocessOptions, Volume};
use highres_model::{
    map_external_name, presets, Dimensions, HighResNet, HighResNetConfig, ParameterStatistics,
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

mod weights;

type Backend = NdArray<f32>;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Developer tasks for the HighResNet workspace")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ModelArgs {
    /// Network configuration (JSON); overrides the preset
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Preset to use without a configuration file (niftynet, planar, compact)
    #[arg(long, default_value = "niftynet")]
    preset: String,

    /// Input channels for the preset
    #[arg(long, default_value_t = 1)]
    in_channels: usize,

    /// Output channels for the preset
    #[arg(long, default_value_t = 160)]
    out_channels: usize,

    /// Named tensors (JSON) to load after initialization
    #[arg(short, long)]
    weights: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the structure of a network
    Summary {
        #[command(flatten)]
        model: ModelArgs,
    },

    /// List parameter names and shapes
    Parameters {
        #[command(flatten)]
        model: ModelArgs,

        /// Include batch-norm running statistics
        #[arg(long)]
        buffers: bool,

        /// Export the listed tensors to a JSON weights file
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Print count, mean, std, min and max of every parameter
    ParameterStats {
        #[command(flatten)]
        model: ModelArgs,
    },

    /// Print the receptive field in voxels and physical units
    ReceptiveField {
        #[command(flatten)]
        model: ModelArgs,

        /// Voxel spacing per axis
        #[arg(long, num_args = 1..=3, default_values_t = [1.0])]
        spacing: Vec<f64>,
    },

    /// Write a preset configuration to a JSON file
    InitConfig {
        /// Output file
        output: PathBuf,

        /// Preset (niftynet, planar, compact)
        #[arg(long, default_value = "niftynet")]
        preset: String,

        #[arg(long, default_value_t = 1)]
        in_channels: usize,

        #[arg(long, default_value_t = 160)]
        out_channels: usize,
    },

    /// Translate NiftyNet checkpoint names
    MapCheckpointNames {
        /// Names to translate
        names: Vec<String>,

        /// File with one name per line
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Mask and histogram-standardize a volume
    Preprocess {
        /// Input NIfTI volume
        input: PathBuf,

        /// Histogram model file
        model: PathBuf,

        /// Output NIfTI volume
        output: PathBuf,

        /// Landmark cutoff percentiles, as fractions
        #[arg(long, num_args = 2, default_values_t = [0.01, 0.99])]
        cutoff: Vec<f64>,

        /// Modality name in the histogram model
        #[arg(long, default_value = "Modality0")]
        modality: String,

        /// Landmarks delimiting the linear segments (quartile, percentile, median)
        #[arg(long, default_value = "percentile")]
        mapping: String,
    },

    /// Run a network over volumes and write the arg-max label map
    Segment {
        #[command(flatten)]
        model: ModelArgs,

        /// Output label volume
        #[arg(short, long)]
        output: PathBuf,

        /// One NIfTI volume per input channel
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Summary { model } => {
            let network = build_network(&model)?;
            println!("{}", network.summary());
        }
        Commands::Parameters {
            model,
            buffers,
            export,
        } => {
            list_parameters(&model, buffers, export.as_deref())?;
        }
        Commands::ParameterStats { model } => {
            parameter_stats(&model)?;
        }
        Commands::ReceptiveField { model, spacing } => {
            receptive_field(&model, &spacing)?;
        }
        Commands::InitConfig {
            output,
            preset,
            in_channels,
            out_channels,
        } => {
            let config = preset_config(&preset, in_channels, out_channels)?;
            config
                .save(&output)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            info!("Wrote {} configuration to {}", preset, output.display());
        }
        Commands::MapCheckpointNames { names, file } => {
            map_checkpoint_names(names, file.as_deref())?;
        }
        Commands::Preprocess {
            input,
            model,
            output,
            cutoff,
            modality,
            mapping,
        } => {
            let options = PreprocessOptions {
                cutoff: (cutoff[0], cutoff[1]),
                modality,
                mapping: mapping.parse::<MappingKind>()?,
            };
            highres_io::preprocess_with(&input, &model, &output, &options)?;
        }
        Commands::Segment {
            model,
            output,
            inputs,
        } => {
            segment(&model, &inputs, &output)?;
        }
    }

    Ok(())
}

fn preset_config(name: &str, in_channels: usize, out_channels: usize) -> Result<HighResNetConfig> {
    Ok(match name {
        "niftynet" => presets::niftynet(in_channels, out_channels),
        "planar" => presets::planar(in_channels, out_channels),
        "compact" => presets::compact(in_channels, out_channels),
        _ => anyhow::bail!("Unknown preset: {}. Use niftynet, planar or compact.", name),
    })
}

fn load_config(args: &ModelArgs) -> Result<HighResNetConfig> {
    match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(HighResNetConfig::from_json(&json)?)
        }
        None => preset_config(&args.preset, args.in_channels, args.out_channels),
    }
}

fn build_network(args: &ModelArgs) -> Result<HighResNet<Backend>> {
    let device = Default::default();
    let config = load_config(args)?;
    let network = config.init::<Backend>(&device)?;
    match &args.weights {
        Some(path) => {
            let tensors = weights::load(path)?;
            info!("Loading {} tensors from {}", tensors.len(), path.display());
            Ok(network.load_named_tensors(tensors)?)
        }
        None => Ok(network),
    }
}

fn list_parameters(args: &ModelArgs, buffers: bool, export: Option<&Path>) -> Result<()> {
    let network = build_network(args)?;
    let mut tensors = network.named_parameters();
    if buffers {
        tensors.extend(network.named_buffers());
    }

    for tensor in &tensors {
        println!("{:<70} {:?}", tensor.name, tensor.shape());
    }
    println!("{} tensors, {} parameters", tensors.len(), network.num_parameters());

    if let Some(path) = export {
        weights::save(path, &tensors)?;
        info!("Exported {} tensors to {}", tensors.len(), path.display());
    }
    Ok(())
}

fn parameter_stats(args: &ModelArgs) -> Result<()> {
    let network = build_network(args)?;
    println!(
        "{:<70} {:>8} {:>10} {:>10} {:>10} {:>10}",
        "name", "count", "mean", "std", "min", "max"
    );
    for tensor in network.named_parameters() {
        let stats = ParameterStatistics::of(&tensor)?;
        println!(
            "{:<70} {:>8} {:>10.4} {:>10.4} {:>10.4} {:>10.4}",
            stats.name, stats.count, stats.mean, stats.std, stats.min, stats.max
        );
    }
    Ok(())
}

fn receptive_field(args: &ModelArgs, spacing: &[f64]) -> Result<()> {
    let config = load_config(args)?;
    let rank = config.dimensions.rank();
    let spacing: Vec<f64> = match spacing {
        [s] => vec![*s; rank],
        many if many.len() == rank => many.to_vec(),
        many => anyhow::bail!(
            "Expected 1 or {} spacing values for a {} network, got {}",
            rank,
            config.dimensions,
            many.len()
        ),
    };

    let voxels = config.receptive_field()?;
    println!("Receptive field: {} voxels", voxels);
    let extent: Vec<String> = spacing
        .iter()
        .map(|s| format!("{:.2}", voxels as f64 * s))
        .collect();
    println!("Physical extent: {}", extent.join(" x "));
    Ok(())
}

fn map_checkpoint_names(mut names: Vec<String>, file: Option<&Path>) -> Result<()> {
    if let Some(path) = file {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        names.extend(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from),
        );
    }
    if names.is_empty() {
        warn!("No names given");
    }

    let mut unmapped = 0;
    for name in &names {
        match map_external_name(name) {
            Ok(mapped) => println!("{} -> {}", name, mapped),
            Err(e) => {
                warn!("{}", e);
                unmapped += 1;
            }
        }
    }
    if unmapped > 0 {
        anyhow::bail!("{} of {} names could not be mapped", unmapped, names.len());
    }
    Ok(())
}

fn segment(args: &ModelArgs, inputs: &[PathBuf], output: &Path) -> Result<()> {
    let network = build_network(args)?;
    anyhow::ensure!(
        network.dimensions() == Dimensions::Three,
        "Segmentation of NIfTI volumes needs a 3D network"
    );
    anyhow::ensure!(
        inputs.len() == network.in_channels(),
        "The network expects {} input volumes, got {}",
        network.in_channels(),
        inputs.len()
    );

    let volumes = inputs
        .iter()
        .map(|path| {
            highres_io::read_volume(path).with_context(|| format!("Failed to read {}", path.display()))
        })
        .collect::<Result<Vec<Volume>>>()?;
    let device = Default::default();
    let tensor = highres_io::volumes_to_tensor::<Backend>(&volumes, &device)?;

    info!("Segmenting {:?} volume", volumes[0].shape());
    let scores = network.try_forward(tensor)?;
    let labels = highres_io::label_map(scores)?;
    highres_io::write_volume(output, &volumes[0].with_data(labels)?)?;
    info!("Wrote label map to {}", output.display());
    Ok(())
}
