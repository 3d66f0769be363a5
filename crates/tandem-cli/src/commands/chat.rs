use serde::Serialize;
use tandem_core::RecordType;

use crate::cli::ChatCommands;
use crate::commands::common::{
    conversation_title, conversation_to_list_item, format_conversation_lines, message_to_item,
    normalize_content, resolve_record, short_id, AppContext, ConversationListItem, MessageItem,
};
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct ConversationDetail {
    #[serde(flatten)]
    conversation: ConversationListItem,
    messages: Vec<MessageItem>,
}

pub async fn run_chat(command: ChatCommands, ctx: &AppContext) -> Result<(), CliError> {
    match command {
        ChatCommands::Create { title } => run_chat_create(&title, ctx).await,
        ChatCommands::List { limit, json } => run_chat_list(limit, json, ctx).await,
        ChatCommands::Show { id, json } => run_chat_show(&id, json, ctx).await,
        ChatCommands::Rename { id, title } => run_chat_rename(&id, &title, ctx).await,
        ChatCommands::Delete { id } => run_chat_delete(&id, ctx).await,
    }
}

pub async fn run_chat_create(title: &[String], ctx: &AppContext) -> Result<(), CliError> {
    let title = normalize_content(&title.join(" ")).ok_or(CliError::EmptyTitle)?;
    let record = ctx.replica().create_conversation(&title).await?;
    println!("Created conversation {}", short_id(record.id.as_str()));
    Ok(())
}

pub async fn run_chat_list(limit: usize, as_json: bool, ctx: &AppContext) -> Result<(), CliError> {
    let mut conversations = ctx.replica().conversations().await?;
    conversations.truncate(limit);

    if as_json {
        let items = conversations
            .iter()
            .map(conversation_to_list_item)
            .collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if conversations.is_empty() {
        println!("No conversations yet. Start one with `tandem chat new <title>`.");
        return Ok(());
    }

    for line in format_conversation_lines(&conversations) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_chat_show(query: &str, as_json: bool, ctx: &AppContext) -> Result<(), CliError> {
    let record = resolve_record(query, RecordType::Conversation, ctx.store.as_ref()).await?;
    let messages = ctx
        .replica()
        .messages(&record.id)
        .await?
        .iter()
        .map(message_to_item)
        .collect::<Result<Vec<_>, _>>()?;

    if as_json {
        let detail = ConversationDetail {
            conversation: conversation_to_list_item(&record),
            messages,
        };
        println!("{}", serde_json::to_string_pretty(&detail)?);
        return Ok(());
    }

    println!(
        "{}  {}  (v{}, {})",
        short_id(record.id.as_str()),
        conversation_title(&record),
        record.version,
        record.sync_status
    );
    for message in messages {
        println!("[{}] {}", message.role, message.content);
    }
    Ok(())
}

pub async fn run_chat_rename(
    query: &str,
    title: &[String],
    ctx: &AppContext,
) -> Result<(), CliError> {
    let title = normalize_content(&title.join(" ")).ok_or(CliError::EmptyTitle)?;
    let record = resolve_record(query, RecordType::Conversation, ctx.store.as_ref()).await?;
    let renamed = ctx.replica().rename_conversation(&record.id, &title).await?;
    println!(
        "Renamed conversation {} (v{})",
        short_id(renamed.id.as_str()),
        renamed.version
    );
    Ok(())
}

pub async fn run_chat_delete(query: &str, ctx: &AppContext) -> Result<(), CliError> {
    let record = resolve_record(query, RecordType::Conversation, ctx.store.as_ref()).await?;
    let removed = ctx.replica().delete_conversation(&record.id).await?;
    println!(
        "Deleted conversation {} and {removed} message(s)",
        short_id(record.id.as_str())
    );
    Ok(())
}
