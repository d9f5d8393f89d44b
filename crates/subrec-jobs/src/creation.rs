use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use subrec_core::{NewUser, Subscriber, SubscriberKind};
use subrec_storage::{ConflictReport, Lookup, Predicate, RecordStore};
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::batch::write_in_batches;
use crate::JobConfig;

#[derive(Debug, Clone, Default, Serialize)]
pub struct KindSummary {
    pub kind: String,
    pub report_path: String,
    pub scanned: usize,
    pub skipped_existing: usize,
    pub created_from_subscriber: usize,
    pub created_from_client: usize,
    pub conflicts: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreationSummary {
    pub run_id: Uuid,
    pub kinds: Vec<KindSummary>,
    pub users_created: usize,
}

impl CreationSummary {
    pub fn conflicts(&self) -> usize {
        self.kinds.iter().map(|k| k.conflicts).sum()
    }
}

/// Creates users for legacy subscribers that have none yet, enriching them from
/// a unique matching client where one exists.
pub struct CreationJob {
    store: Arc<dyn RecordStore>,
    config: JobConfig,
}

impl CreationJob {
    pub fn new(store: Arc<dyn RecordStore>, config: JobConfig) -> Self {
        Self { store, config }
    }

    pub async fn run(&self) -> Result<CreationSummary> {
        let run_id = Uuid::new_v4();
        async move {
            let mut pending = Vec::new();
            let mut kinds = Vec::with_capacity(SubscriberKind::ALL.len());
            for kind in SubscriberKind::ALL {
                let summary = self
                    .prepare_kind(kind, &mut pending)
                    .instrument(info_span!("subscriber_kind", %kind))
                    .await?;
                kinds.push(summary);
            }

            let store = self.store.as_ref();
            let users_created = write_in_batches(
                "user insert",
                &pending,
                self.config.batch_size,
                |chunk| store.bulk_create_users(chunk),
            )
            .await?;

            let summary = CreationSummary {
                run_id,
                kinds,
                users_created,
            };
            info!(
                users_created = summary.users_created,
                conflicts = summary.conflicts(),
                "user creation complete"
            );
            Ok(summary)
        }
        .instrument(info_span!("create_users", %run_id))
        .await
    }

    async fn prepare_kind(
        &self,
        kind: SubscriberKind,
        pending: &mut Vec<NewUser>,
    ) -> Result<KindSummary> {
        let (mut report, report_path) = ConflictReport::create_in(&self.config.report_dir, kind)
            .with_context(|| format!("opening conflict report for {kind}"))?;
        let key_field = kind.key_field();

        let all = self
            .store
            .subscribers(kind, &Predicate::All)
            .await
            .with_context(|| format!("loading {kind} records"))?;
        let keys = all.iter().map(|s| s.key.clone()).collect::<Vec<_>>();
        let taken = self
            .store
            .user_values(key_field, &Predicate::is_in(key_field, keys))
            .await
            .context("loading existing user keys")?;
        let remaining = self
            .store
            .subscribers(kind, &Predicate::is_in(key_field, taken).negate())
            .await
            .with_context(|| format!("loading unmatched {kind} records"))?;

        let mut summary = KindSummary {
            kind: kind.to_string(),
            report_path: report_path.display().to_string(),
            scanned: all.len(),
            skipped_existing: all.len().saturating_sub(remaining.len()),
            ..Default::default()
        };

        for subscriber in &remaining {
            match self.resolve(kind, subscriber).await? {
                Resolution::FromSubscriber(user) => {
                    summary.created_from_subscriber += 1;
                    pending.push(user);
                }
                Resolution::FromClient(user) => {
                    summary.created_from_client += 1;
                    pending.push(user);
                }
                Resolution::Conflict => {
                    report
                        .record(subscriber.id, &subscriber.key)
                        .with_context(|| format!("writing {}", summary.report_path))?;
                    summary.conflicts += 1;
                }
            }
        }

        info!(
            scanned = summary.scanned,
            skipped_existing = summary.skipped_existing,
            from_subscriber = summary.created_from_subscriber,
            from_client = summary.created_from_client,
            conflicts = summary.conflicts,
            "subscriber kind prepared"
        );
        Ok(summary)
    }

    async fn resolve(&self, kind: SubscriberKind, subscriber: &Subscriber) -> Result<Resolution> {
        let key_field = kind.key_field();
        let check_field = kind.check_field();
        let lookup = self
            .store
            .get_client(&Predicate::eq(key_field, subscriber.key.as_str()))
            .await
            .context("looking up client")?;

        match lookup {
            Lookup::Missing => Ok(Resolution::FromSubscriber(NewUser::from_subscriber(subscriber))),
            Lookup::One(client) => {
                // A user already owns the client's other contact under a different key.
                let collision = Predicate::eq(check_field, client.field(check_field))
                    .and(Predicate::eq(key_field, client.field(key_field)).negate());
                let collides = self
                    .store
                    .user_exists(&collision)
                    .await
                    .context("checking for conflicting user")?;
                if collides {
                    debug!(
                        subscriber_id = subscriber.id,
                        client_id = client.id,
                        "client collides with existing user"
                    );
                    Ok(Resolution::Conflict)
                } else {
                    Ok(Resolution::FromClient(NewUser::from_client(&client)))
                }
            }
            Lookup::Many(count) => {
                debug!(subscriber_id = subscriber.id, count, "ambiguous client match");
                Ok(Resolution::Conflict)
            }
        }
    }
}

enum Resolution {
    FromSubscriber(NewUser),
    FromClient(NewUser),
    Conflict,
}
