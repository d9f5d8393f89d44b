use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use subrec_core::{ConsentUpdate, ContactField, Subscriber, SubscriberKind, User};
use subrec_storage::{Predicate, RecordStore};
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::batch::write_in_batches;
use crate::JobConfig;

#[derive(Debug, Clone, Serialize)]
pub struct BackfillSummary {
    pub run_id: Uuid,
    pub candidates: usize,
    pub updated: usize,
}

/// Consent to apply given the newer email-side and phone-side subscribers of a
/// user. The later-created record wins; on equal timestamps the email side wins.
pub fn newest_consent(by_email: Option<&Subscriber>, by_phone: Option<&Subscriber>) -> Option<bool> {
    match (by_email, by_phone) {
        (Some(email), Some(phone)) if phone.created > email.created => Some(phone.gdpr_consent),
        (Some(email), _) => Some(email.gdpr_consent),
        (None, Some(phone)) => Some(phone.gdpr_consent),
        (None, None) => None,
    }
}

/// Copies consent from subscribers created after a user onto that user.
pub struct ConsentBackfillJob {
    store: Arc<dyn RecordStore>,
    config: JobConfig,
}

impl ConsentBackfillJob {
    pub fn new(store: Arc<dyn RecordStore>, config: JobConfig) -> Self {
        Self { store, config }
    }

    pub async fn run(&self) -> Result<BackfillSummary> {
        let run_id = Uuid::new_v4();
        async move {
            let candidates = self.candidates().await?;

            let mut updates = Vec::new();
            for user in &candidates {
                if let Some(gdpr_consent) = self.consent_for(user).await? {
                    updates.push(ConsentUpdate {
                        user_id: user.id,
                        gdpr_consent,
                    });
                }
            }
            debug!(pending = updates.len(), "consent updates collected");

            let store = self.store.as_ref();
            let updated = write_in_batches(
                "consent update",
                &updates,
                self.config.batch_size,
                |chunk| store.bulk_update_consent(chunk),
            )
            .await?;

            let summary = BackfillSummary {
                run_id,
                candidates: candidates.len(),
                updated,
            };
            info!(
                candidates = summary.candidates,
                updated = summary.updated,
                "consent backfill complete"
            );
            Ok(summary)
        }
        .instrument(info_span!("backfill_consent", %run_id))
        .await
    }

    /// Users sharing an email with any subscriber or a phone with any SMS subscriber.
    async fn candidates(&self) -> Result<Vec<User>> {
        let emails = self.keys(SubscriberKind::Email).await?;
        let phones = self.keys(SubscriberKind::Sms).await?;
        let filter = Predicate::is_in(ContactField::Email, emails)
            .or(Predicate::is_in(ContactField::Phone, phones));
        self.store
            .users(&filter)
            .await
            .context("loading candidate users")
    }

    async fn keys(&self, kind: SubscriberKind) -> Result<Vec<String>> {
        let rows = self
            .store
            .subscribers(kind, &Predicate::All)
            .await
            .with_context(|| format!("loading {kind} records"))?;
        Ok(rows.into_iter().map(|s| s.key).collect())
    }

    async fn consent_for(&self, user: &User) -> Result<Option<bool>> {
        let by_email = self.newer_subscriber(SubscriberKind::Email, user).await?;
        let by_phone = self.newer_subscriber(SubscriberKind::Sms, user).await?;
        Ok(newest_consent(by_email.as_ref(), by_phone.as_ref()))
    }

    async fn newer_subscriber(&self, kind: SubscriberKind, user: &User) -> Result<Option<Subscriber>> {
        let key_field = kind.key_field();
        let filter = Predicate::eq(key_field, user.field(key_field))
            .and(Predicate::created_after(user.created));
        let lookup = self
            .store
            .get_subscriber(kind, &filter)
            .await
            .with_context(|| format!("looking up newer {kind} for user {}", user.id))?;
        Ok(lookup.unique(kind.table())?)
    }
}
