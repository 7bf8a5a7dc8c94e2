use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Entitlements::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Entitlements::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Entitlements::UserId).string().not_null())
                    .col(ColumnDef::new(Entitlements::FamilyId).string())
                    .col(ColumnDef::new(Entitlements::FeatureCode).string().not_null())
                    .col(ColumnDef::new(Entitlements::PlanId).string().not_null())
                    .col(ColumnDef::new(Entitlements::SubscriptionId).string())
                    .col(ColumnDef::new(Entitlements::Status).string().not_null())
                    .col(
                        ColumnDef::new(Entitlements::GrantedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Entitlements::ExpiresAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Entitlements::UsageLimits).json_binary())
                    .col(ColumnDef::new(Entitlements::Metadata).json_binary())
                    .col(
                        ColumnDef::new(Entitlements::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Entitlements::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Natural key for idempotent grants (upsert target).
        manager
            .create_index(
                Index::create()
                    .table(Entitlements::Table)
                    .col(Entitlements::UserId)
                    .col(Entitlements::FeatureCode)
                    .col(Entitlements::PlanId)
                    .name("uq_entitlements_user_feature_plan")
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .table(Entitlements::Table)
                    .col(Entitlements::SubscriptionId)
                    .name("idx_entitlements_subscription_id")
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Entitlements::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Entitlements {
    Table,
    Id,
    UserId,
    FamilyId,
    FeatureCode,
    PlanId,
    SubscriptionId,
    Status,
    GrantedAt,
    ExpiresAt,
    UsageLimits,
    Metadata,
    CreatedAt,
    UpdatedAt,
}
