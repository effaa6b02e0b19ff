use crate::commands::common::{connect, finish, resolve_note_id};
use crate::error::CliError;

pub async fn run_delete(id: &str, profile: Option<&str>) -> Result<(), CliError> {
    let client = connect(profile).await?;
    let note_id = resolve_note_id(&client, id).await?;

    client.delete_note(&note_id).await?;
    finish(&client).await?;

    println!("{note_id}");
    Ok(())
}
