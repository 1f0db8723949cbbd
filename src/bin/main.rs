//! clusterproxy CLI - Work with datasets and models on a remote cluster
//!
//! Usage:
//!   clusterproxy [--url <url>] [--config <file>] [--memory] <command>
//!
//! Examples:
//!   clusterproxy --memory ls
//!   clusterproxy --memory predict --model iris_gbm --frame iris.hex
//!   clusterproxy --memory split --frame iris.hex --ratios 0.5 --iterations 10
//!   clusterproxy --url http://localhost:54321 show --model my_model

use clap::{Parser, Subcommand};
use clusterproxy::config::Settings;
use clusterproxy::frame::DatasetHandle;
use clusterproxy::key::RemoteKey;
use clusterproxy::model::ModelProxy;
use clusterproxy::stage::ArtifactUploader;
use clusterproxy::transport::protocol::KeysResponse;
use clusterproxy::transport::{
    ClusterTransport, ClusterTransportExt, Endpoint, HttpTransport, MemoryCluster, MemoryModel,
    NoParams,
};
use clusterproxy::{logging, ProxyResult};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "clusterproxy")]
#[command(about = "Inspect, split and score datasets and models held on a remote cluster")]
#[command(version)]
struct Cli {
    /// Path to a config file (default: search CLUSTERPROXY_CONFIG, ./clusterproxy.toml, user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cluster URL, overriding the config file
    #[arg(long, global = true)]
    url: Option<String>,

    /// Use an in-process demo cluster seeded with an iris frame and models
    #[arg(long, global = true)]
    memory: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List keys on the cluster
    Ls,

    /// Describe a frame
    Describe {
        /// Frame key
        key: String,
    },

    /// Run a model over a frame
    Predict {
        #[arg(short, long)]
        model: String,
        #[arg(short, long)]
        frame: String,
    },

    /// Score a model against a frame
    Metrics {
        #[arg(short, long)]
        model: String,
        #[arg(short, long)]
        frame: String,
    },

    /// Extract hidden-layer activations of a deep learning model
    Features {
        #[arg(short, long)]
        model: String,
        #[arg(short, long)]
        frame: String,
        /// Zero-indexed hidden layer
        #[arg(short, long, default_value_t = 0)]
        layer: u32,
    },

    /// Split a frame into row partitions
    Split {
        #[arg(short, long)]
        frame: String,
        /// Partition fractions; the last partition takes the remainder
        #[arg(short, long, value_delimiter = ',', default_value = "0.5")]
        ratios: Vec<f64>,
        /// Split the last partition again this many times
        #[arg(short, long, default_value_t = 1)]
        iterations: u32,
    },

    /// Show model details
    Show {
        #[arg(short, long)]
        model: String,
    },

    /// Remove a key from the cluster
    Rm {
        key: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => Settings::from_file(path),
        None => Settings::load(),
    }
    .unwrap_or_else(|e| {
        eprintln!("Warning: {}; using default settings", e);
        Settings::default()
    });
    if let Some(url) = &cli.url {
        settings.cluster.url = url.clone();
    }

    if let Err(e) = logging::init(&settings.logging) {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let transport: Arc<dyn ClusterTransport> = if cli.memory {
        Arc::new(demo_cluster())
    } else {
        match HttpTransport::from_settings(&settings.cluster) {
            Ok(t) => Arc::new(t),
            Err(e) => {
                eprintln!("Error connecting to {}: {}", settings.cluster.url, e);
                return ExitCode::FAILURE;
            }
        }
    };
    let uploader = ArtifactUploader::from_settings(transport.clone(), &settings.staging);

    let result = match cli.command {
        Commands::Ls => cmd_ls(transport.as_ref()),
        Commands::Describe { key } => cmd_describe(transport.as_ref(), &key),
        Commands::Predict { model, frame } => cmd_predict(&uploader, &model, &frame),
        Commands::Metrics { model, frame } => cmd_metrics(&uploader, &model, &frame),
        Commands::Features {
            model,
            frame,
            layer,
        } => cmd_features(&uploader, &model, &frame, layer),
        Commands::Split {
            frame,
            ratios,
            iterations,
        } => cmd_split(&uploader, &frame, &ratios, iterations),
        Commands::Show { model } => cmd_show(&uploader, &model),
        Commands::Rm { key } => cmd_rm(transport.as_ref(), &key),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn demo_cluster() -> MemoryCluster {
    let cluster = MemoryCluster::new();
    cluster.insert_frame(
        "iris.hex",
        &["sepal_len", "sepal_wid", "petal_len", "petal_wid", "class"],
        150,
    );
    let classes = ["setosa", "versicolor", "virginica"];
    cluster.insert_model("iris_gbm", MemoryModel::classifier("gbm", &classes));
    cluster.insert_model(
        "iris_dl",
        MemoryModel::classifier("deeplearning", &classes).with_hidden_layers(vec![10, 10, 5]),
    );
    cluster.insert_model("iris_km", MemoryModel::kmeans(3));
    cluster
}

/// Load a model without taking ownership of it; the model stays on the
/// cluster whatever the command does.
fn load_model(uploader: &ArtifactUploader, key: &str) -> ProxyResult<ModelProxy> {
    Ok(ModelProxy::load(uploader.shared_transport(), RemoteKey::new(key)?)?
        .borrowed()
        .with_uploader(uploader.clone()))
}

fn load_frame(uploader: &ArtifactUploader, key: &str) -> ProxyResult<DatasetHandle> {
    DatasetHandle::describe(uploader.transport(), &RemoteKey::new(key)?)
}

fn print_frame(handle: &DatasetHandle) {
    if let Some(key) = handle.frame_key() {
        println!("Frame: {}", key);
    }
    println!("Rows: {}", handle.row_count());
    println!("Columns ({}):", handle.column_count());
    for column in handle.columns() {
        println!("  - {} ({})", column.label(), column.key());
    }
}

fn cmd_ls(transport: &dyn ClusterTransport) -> ProxyResult<()> {
    let response: KeysResponse = transport.call(&Endpoint::Keys, NoParams {})?;
    if response.keys.is_empty() {
        println!("No keys.");
    }
    for key in &response.keys {
        println!("{}", key.name);
    }
    Ok(())
}

fn cmd_describe(transport: &dyn ClusterTransport, key: &str) -> ProxyResult<()> {
    let handle = DatasetHandle::describe(transport, &RemoteKey::new(key)?)?;
    print_frame(&handle);
    Ok(())
}

fn cmd_predict(uploader: &ArtifactUploader, model: &str, frame: &str) -> ProxyResult<()> {
    let frame = load_frame(uploader, frame)?;
    let model = load_model(uploader, model)?;
    print_frame(&model.predict(&frame)?);
    Ok(())
}

fn cmd_metrics(uploader: &ArtifactUploader, model: &str, frame: &str) -> ProxyResult<()> {
    let frame = load_frame(uploader, frame)?;
    let model = load_model(uploader, model)?;
    print!("{}", model.evaluate_metrics(&frame)?);
    Ok(())
}

fn cmd_features(
    uploader: &ArtifactUploader,
    model: &str,
    frame: &str,
    layer: u32,
) -> ProxyResult<()> {
    let frame = load_frame(uploader, frame)?;
    let model = load_model(uploader, model)?;
    print_frame(&model.extract_features(&frame, layer)?);
    Ok(())
}

fn cmd_split(
    uploader: &ArtifactUploader,
    frame: &str,
    ratios: &[f64],
    iterations: u32,
) -> ProxyResult<()> {
    let mut current = load_frame(uploader, frame)?;
    for iteration in 1..=iterations {
        let partitions = current.split(uploader, ratios)?;
        let rows: Vec<String> = partitions
            .iter()
            .map(|p| p.row_count().to_string())
            .collect();
        println!(
            "Iteration {}: {} rows -> [{}]",
            iteration,
            current.row_count(),
            rows.join(", ")
        );
        for partition in &partitions {
            if let Some(key) = partition.frame_key() {
                println!("  {}", key);
            }
        }
        match partitions.last() {
            Some(last) if last.row_count() > 1 => current = last.clone(),
            _ => break,
        }
    }
    Ok(())
}

fn cmd_show(uploader: &ArtifactUploader, model: &str) -> ProxyResult<()> {
    let model = load_model(uploader, model)?;
    print!("{}", model.render());
    Ok(())
}

fn cmd_rm(transport: &dyn ClusterTransport, key: &str) -> ProxyResult<()> {
    let key = RemoteKey::new(key)?;
    transport.remove(&key)?;
    println!("Removed {}", key);
    Ok(())
}
