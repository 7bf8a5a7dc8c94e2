use sea_orm_migration::prelude::*;

mod m20260901_000001_create_plans;
mod m20260901_000002_create_payments;
mod m20260901_000003_create_entitlements;
mod m20260901_000004_create_webhook_events;
mod m20260901_000005_create_outbox_events;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260901_000001_create_plans::Migration),
            Box::new(m20260901_000002_create_payments::Migration),
            Box::new(m20260901_000003_create_entitlements::Migration),
            Box::new(m20260901_000004_create_webhook_events::Migration),
            Box::new(m20260901_000005_create_outbox_events::Migration),
        ]
    }
}
