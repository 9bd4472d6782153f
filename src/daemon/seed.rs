use super::command::CliRunner;
use crate::error::{FixtureError, Result};
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

const SEED_ARCHIVE: &str = "busybox.tar";

/// Where the seed image comes from.
#[derive(Debug, Clone, Copy)]
pub struct SeedSource<'a> {
    pub image: &'a str,
    /// Host of the reference daemon; the CLI default when unset
    pub reference_host: Option<&'a str>,
}

/// Import the seed image into the instance behind `cli`.
///
/// The archive is exported from the reference daemon into `folder` unless one
/// is already there, and removed once the import succeeds.
pub async fn load_seed_image(id: &str, cli: &CliRunner, folder: &Path, source: SeedSource<'_>) -> Result<()> {
    let archive = folder.join(SEED_ARCHIVE);

    match fs::metadata(&archive) {
        Ok(_) => debug!("[{}] reusing {}", id, archive.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("[{}] saving {} image from reference daemon", id, source.image);
            export(cli, &archive, source).await?;
        }
        Err(e) => {
            return Err(FixtureError::SeedStat {
                path: archive,
                source: e,
            })
        }
    }

    let input = archive.display().to_string();
    cli.cmd("load", &["--input", input.as_str()])
        .await
        .map_err(|e| FixtureError::SeedImport {
            image: source.image.to_string(),
            output: match e {
                FixtureError::Command { output, .. } => output,
                other => other.to_string(),
            },
        })?;
    info!("[{}] loaded {} image", id, source.image);

    if let Err(e) = fs::remove_file(&archive) {
        warn!("[{}] could not remove {}: {}", id, archive.display(), e);
    }
    Ok(())
}

async fn export(cli: &CliRunner, archive: &Path, source: SeedSource<'_>) -> Result<()> {
    let host: Vec<&str> = match source.reference_host {
        Some(host) => vec!["--host", host],
        None => Vec::new(),
    };
    let output = archive.display().to_string();

    cli.cmd_with_args(&host, "save", &["--output", output.as_str(), source.image])
        .await
        .map(drop)
        .map_err(|e| FixtureError::SeedExport {
            image: source.image.to_string(),
            reason: e.to_string(),
        })
}
