//! Command-line configuration for nd2-export.
//!
//! # Commands
//!
//! - `info <PATH> [--json]` - print the axes, geometry, calibration and
//!   channels of a source file
//! - `export <INPUT> <OUTPUT> [axis selections] [--overwrite]` - export a
//!   subset to OME-TIFF
//!
//! # Axis Selections
//!
//! Each of `--position`, `--scene`, `--time`, `--channel` and `--z` takes
//! `all`, a single index (`3`), a range (`0-4`), or a comma-separated mix
//! (`0-2,7,9`). Omitted axes are exported in full.
//!
//! # Environment Variables
//!
//! - `ND2_EXPORT_VERBOSE` - Enable debug logging (default: false)
//! - `ND2_EXPORT_OVERWRITE` - Replace existing output files (default: false)

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::axes::AxisKind;
use crate::error::SelectionParseError;
use crate::selection::{AxisSelection, SelectionSpec};

// =============================================================================
// CLI Arguments
// =============================================================================

/// nd2-export - Export subsets of ND2 acquisitions to OME-TIFF.
///
/// Reads only the planes you select, keeping calibration, channel names and
/// timestamps.
#[derive(Parser, Debug, Clone)]
#[command(name = "nd2-export")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the axis metadata of a source file.
    Info(InfoConfig),

    /// Export a subset of a source file to OME-TIFF.
    Export(ExportConfig),
}

/// Arguments of the `info` command.
#[derive(Args, Debug, Clone)]
pub struct InfoConfig {
    /// Source file (ND2 or OME-TIFF).
    pub path: PathBuf,

    /// Print metadata as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false, env = "ND2_EXPORT_VERBOSE")]
    pub verbose: bool,
}

/// Arguments of the `export` command.
#[derive(Args, Debug, Clone)]
pub struct ExportConfig {
    /// Source file (ND2 or OME-TIFF).
    pub input: PathBuf,

    /// Destination OME-TIFF file.
    pub output: PathBuf,

    // =========================================================================
    // Axis Selections
    // =========================================================================
    /// Positions to export (e.g. "0-3", "1,4").
    #[arg(short, long)]
    pub position: Option<String>,

    /// Scenes to export.
    #[arg(long)]
    pub scene: Option<String>,

    /// Time points to export.
    #[arg(short, long)]
    pub time: Option<String>,

    /// Channels to export.
    #[arg(short, long)]
    pub channel: Option<String>,

    /// Z planes to export.
    #[arg(short, long)]
    pub z: Option<String>,

    // =========================================================================
    // Output
    // =========================================================================
    /// Replace the output file if it exists.
    #[arg(long, default_value_t = false, env = "ND2_EXPORT_OVERWRITE")]
    pub overwrite: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false, env = "ND2_EXPORT_VERBOSE")]
    pub verbose: bool,
}

impl ExportConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.input == self.output {
            return Err("Input and output must be different files".to_string());
        }

        if self.output.exists() && !self.overwrite {
            return Err(format!(
                "Output {} already exists. Pass --overwrite or set ND2_EXPORT_OVERWRITE=true",
                self.output.display()
            ));
        }

        self.selection().map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Parse the axis options into a selection.
    pub fn selection(&self) -> Result<SelectionSpec, SelectionParseError> {
        let mut spec = SelectionSpec::all();
        for (kind, value) in [
            (AxisKind::Position, &self.position),
            (AxisKind::Scene, &self.scene),
            (AxisKind::Time, &self.time),
            (AxisKind::Channel, &self.channel),
            (AxisKind::Z, &self.z),
        ] {
            if let Some(value) = value {
                spec.set(kind, AxisSelection::parse(value)?);
            }
        }
        Ok(spec)
    }
}

// =============================================================================
// Tests
// =============================================================================
