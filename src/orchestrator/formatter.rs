use crate::models::internal::SummaryArtifact;

/// Human-readable rendering of an artifact for posting into a chat.
pub fn format_summary(artifact: &SummaryArtifact, title: &str) -> String {
    format!(
        "📊 **{title} - {date} Chat Summary**\n\
         \n\
         💬 Messages: {count}\n\
         🤖 AI provider: {provider}\n\
         ⏰ Generated at: {generated}\n\
         \n\
         ---\n\
         \n\
         {body}\n\
         \n\
         ---\n\
         _Generated automatically by chat-digest_",
        title = title,
        date = artifact.date.format("%Y-%m-%d"),
        count = artifact.message_count,
        provider = artifact.options.provider.to_uppercase(),
        generated = artifact.generated_at.format("%H:%M"),
        body = artifact.summary.trim(),
    )
}
