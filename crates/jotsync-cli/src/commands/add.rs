use std::path::Path;

use jotsync_core::NewNote;

use crate::commands::common::{connect, finish, read_image_file};
use crate::error::CliError;

pub async fn run_add(
    name: &str,
    description: Option<&str>,
    image_path: Option<&Path>,
    profile: Option<&str>,
) -> Result<(), CliError> {
    let mut new_note = NewNote::new(name);
    if let Some(description) = description {
        new_note = new_note.with_description(description);
    }
    if let Some(path) = image_path {
        new_note = new_note.with_image(read_image_file(path)?);
    }

    let client = connect(profile).await?;
    let id = client.create_note(new_note).await?;
    finish(&client).await?;

    println!("{id}");
    Ok(())
}
