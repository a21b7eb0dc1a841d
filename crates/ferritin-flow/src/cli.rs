use super::commands;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the irreps and tensor product paths of a MACE encoder.
    MaceLayout {
        /// JSON MACE configuration; defaults apply to missing fields.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Check a safetensors checkpoint and list its remapped parameters.
    InspectCheckpoint {
        #[arg(short, long)]
        checkpoint: PathBuf,
        #[arg(long, default_value = "esm2_650M")]
        esm_model_key: String,
    },
}

impl Cli {
    pub fn execute(self) -> anyhow::Result<()> {
        match self.command {
            Commands::MaceLayout { config } => commands::mace_layout::execute(config),
            Commands::InspectCheckpoint {
                checkpoint,
                esm_model_key,
            } => commands::inspect_checkpoint::execute(checkpoint, esm_model_key),
        }
    }
}
