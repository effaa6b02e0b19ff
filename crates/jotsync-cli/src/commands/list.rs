use crate::commands::common::{connect, format_note_lines, note_to_list_item, NoteListItem};
use crate::error::CliError;

pub async fn run_list(as_json: bool, profile: Option<&str>) -> Result<(), CliError> {
    let client = connect(profile).await?;
    let notes = client.notes().await;

    if as_json {
        let json_items = notes
            .iter()
            .map(note_to_list_item)
            .collect::<Vec<NoteListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if notes.is_empty() {
        println!("No notes");
    } else {
        for line in format_note_lines(&notes) {
            println!("{line}");
        }
    }

    Ok(())
}
