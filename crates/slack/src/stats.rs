use std::sync::Arc;

use chrono::{Duration, Utc};

use deskhand_core::command::StatsParams;
use deskhand_core::domain::ticket::{window_start, TicketStats};
use deskhand_db::repositories::TicketRepository;

use crate::blocks::stats_message;
use crate::bulk::{BulkActionError, CommandContext};
use crate::responder::ChatResponder;

/// Read-only activity summary for the requesting operator.
pub struct StatsReporter {
    tickets: Arc<dyn TicketRepository>,
    responder: Arc<dyn ChatResponder>,
}

impl StatsReporter {
    pub fn new(tickets: Arc<dyn TicketRepository>, responder: Arc<dyn ChatResponder>) -> Self {
        Self { tickets, responder }
    }

    pub async fn report(
        &self,
        ctx: &CommandContext,
        params: &StatsParams,
    ) -> Result<TicketStats, BulkActionError> {
        let since = window_start(Utc::now(), Duration::hours(i64::from(params.hours_ago)));
        let stats =
            self.tickets.stats(&ctx.tenant.id, &ctx.operator.operator_id, since).await?;

        self.responder.post(&ctx.thread, &stats_message(params.hours_ago, &stats)).await?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use deskhand_core::command::StatsParams;
    use deskhand_db::repositories::TicketRepository;

    use super::StatsReporter;
    use crate::bulk::tests::{context, Harness};

    #[tokio::test]
    async fn reports_window_counts_for_operator() {
        let harness = Harness::new();
        let answered = harness.ticket("Answered", "question", 0).await;
        harness.ticket("Still open", "question", 0).await;
        let ctx = context();
        harness
            .tickets
            .reply(&ctx.tenant.id, answered.id, &ctx.operator.operator_id, "Done")
            .await
            .expect("reply");
        harness
            .tickets
            .close(&ctx.tenant.id, answered.id, &ctx.operator.operator_id, "closed")
            .await
            .expect("close");

        let reporter = StatsReporter::new(harness.tickets.clone(), harness.responder.clone());
        let stats = reporter.report(&ctx, &StatsParams { hours_ago: 168 }).await.expect("stats");

        assert_eq!(stats.answered_by_operator, 1);
        assert_eq!(stats.open_tickets, 1);
        assert_eq!(stats.closed_since, 1);
        assert_eq!(harness.responder.texts().await, vec!["Stats for the last 7 days".to_owned()]);
    }
}
