use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ml_core::ReferenceLibrary;

use crate::coach::{self, CoachCliArgs, CoachConfig};

#[derive(Debug, Parser)]
#[command(name = "pose-coach", version, about = "Live pose scoring over MJPEG")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Stream the camera and score poses against a reference library.
    ///
    /// Scoring needs a build with the `with-ort` feature and `--model`;
    /// otherwise the annotated feed streams without pose feedback.
    Serve(CoachCliArgs),
    /// Validate a reference library and print a per-pose summary.
    Library {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
}

pub fn handle_command(command: Command) -> Result<()> {
    match command {
        Command::Serve(args) => coach::run(CoachConfig::try_from(args)?),
        Command::Library { path } => {
            print!("{}", library_summary(&path)?);
            Ok(())
        }
    }
}

fn library_summary(path: &Path) -> Result<String> {
    let library = ReferenceLibrary::load(path)
        .with_context(|| format!("invalid reference library {}", path.display()))?;
    let mut out = format!(
        "{}: {} pose(s), {} sample(s)\n",
        path.display(),
        library.pose_count(),
        library.sample_count()
    );
    for (name, samples) in library.iter() {
        out.push_str(&format!("  {name}: {} sample(s)\n", samples.len()));
    }
    Ok(out)
}
