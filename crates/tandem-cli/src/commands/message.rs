use tandem_core::{MessageRole, RecordType};

use crate::cli::MessageCommands;
use crate::commands::common::{read_content, resolve_record, short_id, AppContext};
use crate::error::CliError;

pub async fn run_message(command: MessageCommands, ctx: &AppContext) -> Result<(), CliError> {
    match command {
        MessageCommands::Add {
            chat,
            role,
            content,
        } => {
            let content = read_content(&content)?.ok_or(CliError::EmptyContent)?;
            run_message_add(&chat, role.into(), &content, ctx).await
        }
        MessageCommands::Delete { id } => run_message_delete(&id, ctx).await,
    }
}

pub async fn run_message_add(
    chat_query: &str,
    role: MessageRole,
    content: &str,
    ctx: &AppContext,
) -> Result<(), CliError> {
    let conversation =
        resolve_record(chat_query, RecordType::Conversation, ctx.store.as_ref()).await?;
    let record = ctx
        .replica()
        .add_message(&conversation.id, role, content)
        .await?;
    println!(
        "Added {role} message {} to {}",
        short_id(record.id.as_str()),
        short_id(conversation.id.as_str())
    );
    Ok(())
}

pub async fn run_message_delete(query: &str, ctx: &AppContext) -> Result<(), CliError> {
    let record = resolve_record(query, RecordType::Message, ctx.store.as_ref()).await?;
    ctx.replica().delete(RecordType::Message, &record.id).await?;
    println!("Deleted message {}", short_id(record.id.as_str()));
    Ok(())
}
