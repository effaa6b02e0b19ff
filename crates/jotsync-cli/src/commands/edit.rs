use jotsync_core::NoteEdit;

use crate::commands::common::{connect, finish, resolve_note_id};
use crate::error::CliError;

pub async fn run_edit(
    id: &str,
    name: Option<String>,
    description: Option<String>,
    clear_description: bool,
    profile: Option<&str>,
) -> Result<(), CliError> {
    let edit = build_edit(name, description, clear_description)?;
    let client = connect(profile).await?;
    let note_id = resolve_note_id(&client, id).await?;

    client.edit_note(&note_id, edit).await?;
    finish(&client).await?;

    println!("{note_id}");
    Ok(())
}

pub fn build_edit(
    name: Option<String>,
    description: Option<String>,
    clear_description: bool,
) -> Result<NoteEdit, CliError> {
    let edit = NoteEdit {
        name,
        description: if clear_description {
            Some(None)
        } else {
            description.map(Some)
        },
    };
    if edit.is_empty() {
        return Err(CliError::EmptyEdit);
    }
    Ok(edit)
}
