//! The reconciliation loop behind the polling ingestion path.
//!
//! Webhooks cover repositories that registered one; polling covers
//! everything else, and re-announces anything a webhook delivery missed.
//! Each subscriber polls on their own GitHub credential, one API call per
//! (subscriber, repository) pair per cycle.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::time::MissedTickBehavior;
use tracing::Instrument as _;
use uuid::Uuid;

use crate::db::{Subscriber, Subscription};
use crate::handlers::{self, Context};

/// Runs poll cycles forever at the configured interval.
///
/// One cycle at a time: the loop awaits each cycle inline, and a tick that
/// lands while a cycle is still running is skipped rather than queued. A
/// failed cycle is logged and the next tick still fires.
pub async fn run_scheduled_polls(ctx: Arc<Context>) {
    let mut interval = tokio::time::interval(ctx.config.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        let span = tracing::info_span!("poll_cycle", cycle = %Uuid::new_v4());
        if let Err(err) = poll_cycle(&ctx).instrument(span).await {
            tracing::error!("poll cycle failed: {err:?}");
        }
    }
}

/// Polls every subscriber that has a GitHub credential.
///
/// Subscribers are processed concurrently and independently: one
/// subscriber's failure is logged without blocking any other subscriber's
/// watermark commit. Errors out only when the subscriber listing itself is
/// unavailable.
pub(crate) async fn poll_cycle(ctx: &Context) -> anyhow::Result<()> {
    let cycle_start = Utc::now();
    let subscribers = ctx
        .store
        .subscribers_with_tokens()
        .await
        .context("failed to list subscribers with GitHub credentials")?;
    tracing::debug!(subscribers = subscribers.len(), "starting poll cycle");

    let results = join_all(
        subscribers
            .iter()
            .map(|subscriber| poll_subscriber(ctx, subscriber, cycle_start)),
    )
    .await;
    for (subscriber, result) in subscribers.iter().zip(results) {
        if let Err(err) = result {
            tracing::error!(
                subscriber = subscriber.id,
                username = %subscriber.username,
                "failed to poll subscriptions: {err:?}"
            );
        }
    }
    Ok(())
}

async fn poll_subscriber(
    ctx: &Context,
    subscriber: &Subscriber,
    cycle_start: DateTime<Utc>,
) -> anyhow::Result<()> {
    let subscriptions = ctx
        .store
        .subscriptions_for_subscriber(subscriber.id)
        .await?;
    if subscriptions.is_empty() {
        return Ok(());
    }

    // One fetch per repository, not one per subscription.
    let mut groups: BTreeMap<String, Vec<Subscription>> = BTreeMap::new();
    for subscription in subscriptions {
        groups
            .entry(subscription.repo_full_name.clone())
            .or_default()
            .push(subscription);
    }

    let mut advanced = Vec::new();
    for (repo, group) in &groups {
        // The oldest watermark in the group bounds the fetch window; an
        // unset watermark means fetch without a lower bound.
        let since = group.iter().map(|s| s.last_checked_at).min().flatten();
        let issues = match ctx
            .github
            .issues_created_since(repo, &subscriber.github_token, since)
            .await
        {
            Ok(issues) => issues,
            Err(err) => {
                // Leave the watermark alone so the next cycle retries the
                // same window.
                tracing::warn!(
                    subscriber = subscriber.id,
                    %repo,
                    "fetch failed, skipping repository this cycle: {err:?}"
                );
                continue;
            }
        };

        // The fetch filter is coarse (GitHub's `since` keys on update
        // time); creation time is authoritative here.
        let mut fresh: Vec<_> = issues
            .into_iter()
            .filter(|issue| !issue.is_pull_request())
            .filter(|issue| since.is_none_or(|since| issue.created_at > since))
            .collect();
        fresh.sort_by_key(|issue| issue.created_at);

        for issue in &fresh {
            let delivered =
                handlers::deliver_notifications(ctx.notifier.as_ref(), repo, issue, group)
                    .await;
            if delivered > 0 {
                tracing::info!(
                    subscriber = subscriber.id,
                    %repo,
                    number = issue.number,
                    delivered,
                    "announced issue found by polling"
                );
            }
        }

        // Dispatch failures do not hold the group back; the watermark
        // still moves so the same issues are not re-announced forever.
        advanced.extend(group.iter().map(|s| s.id));
    }

    if !advanced.is_empty() {
        ctx.store
            .advance_watermarks(&advanced, cycle_start)
            .await
            .context("failed to persist watermarks")?;
    }
    Ok(())
}
