use std::io::Write;
use std::path::Path;

use crate::commands::common::{connect, resolve_note_id};
use crate::error::CliError;

pub async fn run_image(
    id: &str,
    output: Option<&Path>,
    profile: Option<&str>,
) -> Result<(), CliError> {
    let client = connect(profile).await?;
    let note_id = resolve_note_id(&client, id).await?;

    let image = client
        .fetch_image(&note_id)
        .await?
        .ok_or_else(|| CliError::NoImage(note_id.to_string()))?;

    match output {
        Some(path) => {
            std::fs::write(path, &image.bytes)?;
            eprintln!(
                "Wrote {} bytes ({}) to {}",
                image.len(),
                image.content_type_or_default(),
                path.display()
            );
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&image.bytes)?;
            stdout.flush()?;
        }
    }

    Ok(())
}
