use serde::Serialize;

use deskhand_core::command::MAX_ASSIGN_COUNT;
use deskhand_core::domain::ticket::{Ticket, TicketId, TicketStats};
use deskhand_core::BulkActionKind;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextObject {
    #[serde(rename = "plain_text")]
    Plain { text: String },
    Mrkdwn { text: String },
}

impl TextObject {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::Plain { text: text.into() }
    }

    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self::Mrkdwn { text: text.into() }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Plain { text } | Self::Mrkdwn { text } => text,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonStyle {
    Primary,
    Danger,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "button")]
pub struct ButtonElement {
    pub action_id: String,
    pub text: TextObject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<ButtonStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ButtonElement {
    pub fn new(action_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            action_id: action_id.into(),
            text: TextObject::plain(label),
            style: None,
            value: None,
            url: None,
        }
    }

    pub fn style(mut self, style: ButtonStyle) -> Self {
        self.style = Some(style);
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Header {
        block_id: String,
        text: TextObject,
    },
    Section {
        block_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<TextObject>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        fields: Vec<TextObject>,
    },
    Actions {
        block_id: String,
        elements: Vec<ButtonElement>,
    },
    Context {
        block_id: String,
        elements: Vec<TextObject>,
    },
}

/// A chat message: `fallback_text` is always sent, `blocks` only when non-empty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageTemplate {
    pub fallback_text: String,
    pub blocks: Vec<Block>,
}

impl MessageTemplate {
    pub fn text(text: impl Into<String>) -> Self {
        Self { fallback_text: text.into(), blocks: Vec::new() }
    }

    /// Every button across all action blocks, in render order.
    pub fn buttons(&self) -> impl Iterator<Item = &ButtonElement> {
        self.blocks.iter().flat_map(|block| match block {
            Block::Actions { elements, .. } => elements.iter(),
            _ => [].iter(),
        })
    }
}

pub struct MessageBuilder {
    fallback_text: String,
    blocks: Vec<Block>,
}

impl MessageBuilder {
    pub fn new(fallback_text: impl Into<String>) -> Self {
        Self { fallback_text: fallback_text.into(), blocks: Vec::new() }
    }

    pub fn header(mut self, block_id: impl Into<String>, text: impl Into<String>) -> Self {
        self.blocks.push(Block::Header { block_id: block_id.into(), text: TextObject::plain(text) });
        self
    }

    pub fn section<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut SectionBuilder),
    {
        let mut builder = SectionBuilder::default();
        build(&mut builder);
        let (text, fields) = builder.build();
        self.blocks.push(Block::Section { block_id: block_id.into(), text, fields });
        self
    }

    pub fn actions<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut ActionsBuilder),
    {
        let mut builder = ActionsBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Actions { block_id: block_id.into(), elements: builder.build() });
        self
    }

    pub fn context<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut ContextBuilder),
    {
        let mut builder = ContextBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Context { block_id: block_id.into(), elements: builder.build() });
        self
    }

    pub fn build(self) -> MessageTemplate {
        MessageTemplate { fallback_text: self.fallback_text, blocks: self.blocks }
    }
}

#[derive(Default)]
pub struct SectionBuilder {
    text: Option<TextObject>,
    fields: Vec<TextObject>,
}

impl SectionBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::plain(text));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::mrkdwn(text));
        self
    }

    pub fn field(&mut self, text: impl Into<String>) -> &mut Self {
        self.fields.push(TextObject::mrkdwn(text));
        self
    }

    fn build(self) -> (Option<TextObject>, Vec<TextObject>) {
        let text = match (self.text, self.fields.is_empty()) {
            (Some(text), _) => Some(text),
            (None, true) => Some(TextObject::plain("")),
            (None, false) => None,
        };
        (text, self.fields)
    }
}

#[derive(Default)]
pub struct ActionsBuilder {
    elements: Vec<ButtonElement>,
}

impl ActionsBuilder {
    pub fn button(&mut self, button: ButtonElement) -> &mut Self {
        self.elements.push(button);
        self
    }

    fn build(self) -> Vec<ButtonElement> {
        self.elements
    }
}

#[derive(Default)]
pub struct ContextBuilder {
    elements: Vec<TextObject>,
}

impl ContextBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::plain(text));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::mrkdwn(text));
        self
    }

    fn build(self) -> Vec<TextObject> {
        self.elements
    }
}

pub const ACCESS_DENIED_TEXT: &str = "You need to be a Helper user to use this feature. Please make sure your Slack email matches your Helper email.";
pub const MISSING_REPLY_MESSAGE_TEXT: &str = "Please specify a message to send. For example: '@helper reply to all tickets about verification saying This issue has been resolved!'";
pub const CANCELED_TEXT: &str = "Operation canceled.";
pub const PROCESSING_TEXT: &str = "Processing your request...";

pub fn help_message() -> MessageTemplate {
    MessageBuilder::new("Here's what I can do")
        .header("deskhand.help.header.v1", "Here's what I can do")
        .section("deskhand.help.assign.v1", |section| {
            section.mrkdwn(format!(
                "*Assign tickets to yourself*\n• `give me 3 tickets about billing`\n• `find tickets regarding refunds`\nUp to {MAX_ASSIGN_COUNT} tickets per request, newest first."
            ));
        })
        .section("deskhand.help.stats.v1", |section| {
            section.mrkdwn(
                "*See your stats*\n• `ticket stats`\n• `how many tickets in the last 7 days`\n• `metrics for the last 12 hours`",
            );
        })
        .section("deskhand.help.close.v1", |section| {
            section.mrkdwn(
                "*Close tickets in bulk*\n• `close all tickets older than 30 days`\n• `close tickets about spam`\nI'll ask you to confirm before anything is closed.",
            );
        })
        .section("deskhand.help.reply.v1", |section| {
            section.mrkdwn(
                "*Reply to tickets in bulk*\n• `reply to tickets about verification saying This issue has been resolved!`\nI'll ask you to confirm before anything is sent.",
            );
        })
        .build()
}

/// "N day(s)" for whole-day windows, otherwise "N hours".
pub fn window_label(hours: u32) -> String {
    if hours >= 24 && hours % 24 == 0 {
        let days = hours / 24;
        format!("{days} day{}", if days > 1 { "s" } else { "" })
    } else {
        format!("{hours} hours")
    }
}

pub fn stats_message(hours: u32, stats: &TicketStats) -> MessageTemplate {
    let header = format!("Stats for the last {}", window_label(hours));
    MessageBuilder::new(header.clone())
        .header("deskhand.stats.header.v1", header)
        .section("deskhand.stats.counts.v1", |section| {
            section
                .field(format!("*Tickets you answered:* {}", stats.answered_by_operator))
                .field(format!("*Open tickets:* {}", stats.open_tickets))
                .field(format!("*Tickets closed:* {}", stats.closed_since));
        })
        .build()
}

/// A ticket rendered in a summary alongside its deep link.
pub struct TicketCard<'a> {
    pub ticket: &'a Ticket,
    pub url: String,
}

pub fn assignment_summary(assigned: &[TicketCard<'_>], failed: &[TicketId]) -> MessageTemplate {
    let headline = format!(
        "{} ticket{} assigned to you:",
        assigned.len(),
        if assigned.len() == 1 { "" } else { "s" }
    );

    let mut builder = MessageBuilder::new(headline.clone())
        .section("deskhand.assign.summary.v1", |section| {
            section.mrkdwn(format!("*{headline}*"));
        });

    for (index, card) in assigned.iter().enumerate() {
        let ticket = card.ticket;
        builder = builder
            .section(format!("deskhand.assign.ticket.{}.v1", index + 1), |section| {
                section.mrkdwn(format!(
                    "*{}*\nFrom: {} | {}",
                    ticket.subject,
                    ticket.sender_label(),
                    ticket.created_at.format("%Y-%m-%d %H:%M UTC")
                ));
            })
            .actions(format!("deskhand.assign.link.{}.v1", index + 1), |actions| {
                actions.button(
                    ButtonElement::new(format!("deskhand.view_ticket.{}", ticket.id), "View Ticket")
                        .url(card.url.clone()),
                );
            });
    }

    if !failed.is_empty() {
        builder = builder.context("deskhand.assign.failed.v1", |context| {
            context.mrkdwn(failed_line("assign", failed));
        });
    }

    builder.build()
}

pub fn close_prompt(
    matched: usize,
    search_term: Option<&str>,
    days_threshold: Option<u32>,
    descriptor_value: String,
) -> MessageTemplate {
    let mut summary = format!("You are about to close *{matched}* tickets");
    if let Some(term) = search_term {
        summary.push_str(&format!(" about \"{term}\""));
    }
    if let Some(days) = days_threshold {
        summary.push_str(&format!(" that are older than {days} days"));
    }
    summary.push_str(". Are you sure?");

    MessageBuilder::new(format!("Confirm closing {matched} tickets"))
        .section("deskhand.close.prompt.v1", |section| {
            section.mrkdwn(summary);
        })
        .actions("deskhand.close.actions.v1", |actions| {
            actions
                .button(
                    ButtonElement::new(BulkActionKind::Close.confirm_action_id(), "Yes, close them")
                        .style(ButtonStyle::Danger)
                        .value(descriptor_value),
                )
                .button(ButtonElement::new(BulkActionKind::Close.cancel_action_id(), "Cancel"));
        })
        .build()
}

pub fn reply_prompt(
    matched: usize,
    search_term: Option<&str>,
    message: &str,
    descriptor_value: String,
) -> MessageTemplate {
    let about = search_term.map(|term| format!(" about \"{term}\"")).unwrap_or_default();

    MessageBuilder::new(format!("Confirm replying to {matched} tickets"))
        .section("deskhand.reply.prompt.v1", |section| {
            section.mrkdwn(format!(
                "You are about to reply to *{matched}* tickets{about} with the following message:"
            ));
        })
        .section("deskhand.reply.body.v1", |section| {
            section.mrkdwn(format!("> {message}"));
        })
        .actions("deskhand.reply.actions.v1", |actions| {
            actions
                .button(
                    ButtonElement::new(BulkActionKind::Reply.confirm_action_id(), "Yes, send replies")
                        .style(ButtonStyle::Danger)
                        .value(descriptor_value),
                )
                .button(ButtonElement::new(BulkActionKind::Reply.cancel_action_id(), "Cancel"));
        })
        .build()
}

pub fn execution_summary(
    kind: BulkActionKind,
    succeeded: usize,
    failed: &[TicketId],
) -> MessageTemplate {
    let headline = match kind {
        BulkActionKind::Close => format!("Successfully closed {succeeded} tickets."),
        BulkActionKind::Reply => format!("Successfully replied to {succeeded} tickets."),
    };
    if failed.is_empty() {
        return MessageTemplate::text(headline);
    }

    let failures = failed_line(kind.as_str(), failed);
    MessageBuilder::new(format!("{headline} {failures}"))
        .section("deskhand.execute.summary.v1", |section| {
            section.mrkdwn(headline);
        })
        .context("deskhand.execute.failed.v1", |context| {
            context.mrkdwn(failures);
        })
        .build()
}

pub fn error_message(summary: &str, correlation_id: &str) -> MessageTemplate {
    MessageBuilder::new(summary.to_owned())
        .section("deskhand.error.summary.v1", |section| {
            section.mrkdwn(format!(":warning: {summary}"));
        })
        .context("deskhand.error.context.v1", |context| {
            context.plain(format!("Correlation ID: {correlation_id}"));
        })
        .build()
}

fn failed_line(verb: &str, failed: &[TicketId]) -> String {
    let ids = failed.iter().map(|id| format!("#{id}")).collect::<Vec<_>>().join(", ");
    format!("Could not {verb} {} ticket(s): {ids}", failed.len())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use deskhand_core::domain::tenant::TenantId;
    use deskhand_core::domain::ticket::{Ticket, TicketId, TicketStats, TicketStatus};
    use deskhand_core::BulkActionKind;

    use super::{
        assignment_summary, close_prompt, execution_summary, stats_message, window_label, Block,
        ButtonStyle, MessageBuilder, TextObject, TicketCard,
    };

    fn ticket(id: i64, subject: &str) -> Ticket {
        Ticket {
            id: TicketId(id),
            tenant_id: TenantId("acme".to_owned()),
            slug: format!("slug-{id}"),
            subject: subject.to_owned(),
            email_from: Some("jane@example.com".to_owned()),
            email_from_name: Some("Jane Doe".to_owned()),
            status: TicketStatus::Open,
            assigned_to: None,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).single().expect("valid date"),
            closed_at: None,
        }
    }

    #[test]
    fn message_builder_creates_typed_block_structure() {
        let message = MessageBuilder::new("fallback")
            .header("deskhand.header.v1", "Title")
            .section("deskhand.fields.v1", |section| {
                section.field("*A:* 1").field("*B:* 2");
            })
            .build();

        assert_eq!(message.blocks.len(), 2);
        assert!(matches!(
            &message.blocks[1],
            Block::Section { text: None, fields, .. } if fields.len() == 2
        ));
    }

    #[test]
    fn blocks_serialize_with_slack_type_tags() {
        let message = close_prompt(2, None, None, "{}".to_owned());
        let json = serde_json::to_value(&message.blocks).expect("serialize");

        assert_eq!(json[0]["type"], "section");
        assert_eq!(json[0]["text"]["type"], "mrkdwn");
        assert_eq!(json[1]["elements"][0]["type"], "button");
        assert_eq!(json[1]["elements"][0]["text"]["type"], "plain_text");
        assert!(json[1]["elements"][1].get("value").is_none());
    }

    #[test]
    fn window_label_uses_days_only_for_whole_days() {
        assert_eq!(window_label(24), "1 day");
        assert_eq!(window_label(168), "7 days");
        assert_eq!(window_label(36), "36 hours");
        assert_eq!(window_label(12), "12 hours");
    }

    #[test]
    fn stats_message_has_header_and_three_fields() {
        let stats = TicketStats { answered_by_operator: 4, open_tickets: 9, closed_since: 2 };
        let message = stats_message(48, &stats);

        assert!(matches!(
            &message.blocks[0],
            Block::Header { text: TextObject::Plain { text }, .. } if text == "Stats for the last 2 days"
        ));
        let Block::Section { fields, .. } = &message.blocks[1] else {
            panic!("expected section block");
        };
        assert_eq!(fields[0].text(), "*Tickets you answered:* 4");
        assert_eq!(fields[2].text(), "*Tickets closed:* 2");
    }

    #[test]
    fn assignment_summary_links_every_ticket() {
        let tickets = [ticket(1, "Billing"), ticket(2, "Refund")];
        let cards: Vec<_> = tickets
            .iter()
            .map(|ticket| TicketCard { ticket, url: format!("https://app/{}", ticket.slug) })
            .collect();

        let message = assignment_summary(&cards, &[]);
        let urls: Vec<_> = message.buttons().filter_map(|button| button.url.clone()).collect();

        assert_eq!(message.fallback_text, "2 tickets assigned to you:");
        assert_eq!(urls, vec!["https://app/slug-1", "https://app/slug-2"]);
        assert!(matches!(
            &message.blocks[1],
            Block::Section { text: Some(TextObject::Mrkdwn { text }), .. }
                if text.contains("From: Jane Doe | 2024-05-01 09:30 UTC")
        ));
    }

    #[test]
    fn close_prompt_describes_filters_and_carries_descriptor() {
        let message = close_prompt(3, Some("refunds"), Some(10), "signed".to_owned());
        let Block::Section { text: Some(text), .. } = &message.blocks[0] else {
            panic!("expected section block");
        };
        assert_eq!(
            text.text(),
            "You are about to close *3* tickets about \"refunds\" that are older than 10 days. Are you sure?"
        );

        let buttons: Vec<_> = message.buttons().collect();
        assert_eq!(buttons[0].action_id, "bulk_close_confirm");
        assert_eq!(buttons[0].style, Some(ButtonStyle::Danger));
        assert_eq!(buttons[0].value.as_deref(), Some("signed"));
        assert_eq!(buttons[1].action_id, "bulk_close_cancel");
    }

    #[test]
    fn execution_summary_lists_failed_tickets() {
        let clean = execution_summary(BulkActionKind::Reply, 4, &[]);
        assert_eq!(clean.fallback_text, "Successfully replied to 4 tickets.");
        assert!(clean.blocks.is_empty());

        let partial = execution_summary(BulkActionKind::Close, 2, &[TicketId(7), TicketId(9)]);
        assert_eq!(
            partial.fallback_text,
            "Successfully closed 2 tickets. Could not close 2 ticket(s): #7, #9"
        );
    }
}
