//! Schema migration for the relational backend.

use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(CreateTables)]
    }
}

#[derive(DeriveMigrationName)]
pub struct CreateTables;

#[async_trait::async_trait]
impl MigrationTrait for CreateTables {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Accounts::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Accounts::Id).string().not_null().primary_key())
                    .col(ColumnDef::new(Accounts::Username).string().not_null())
                    .col(ColumnDef::new(Accounts::PasswordHash).string().not_null())
                    .col(ColumnDef::new(Accounts::ApiToken).string().not_null())
                    .col(
                        ColumnDef::new(Accounts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Accounts::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_accounts_username")
                    .table(Accounts::Table)
                    .col(Accounts::Username)
                    .unique()
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_accounts_api_token")
                    .table(Accounts::Table)
                    .col(Accounts::ApiToken)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Secrets::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Secrets::AccountId).string().not_null())
                    .col(ColumnDef::new(Secrets::Key).string().not_null())
                    .col(ColumnDef::new(Secrets::Value).text().not_null())
                    .col(
                        ColumnDef::new(Secrets::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Secrets::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(Secrets::AccountId)
                            .col(Secrets::Key),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Flows::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Flows::AccountId).string().not_null())
                    .col(ColumnDef::new(Flows::FlowId).string().not_null())
                    .col(ColumnDef::new(Flows::Definition).binary().not_null())
                    .col(ColumnDef::new(Flows::Name).string().not_null())
                    .col(ColumnDef::new(Flows::Description).text().not_null())
                    .col(ColumnDef::new(Flows::Version).string().not_null())
                    .col(ColumnDef::new(Flows::Tags).text().not_null())
                    .col(ColumnDef::new(Flows::Category).string().not_null())
                    .col(ColumnDef::new(Flows::Status).string().not_null())
                    .col(
                        ColumnDef::new(Flows::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Flows::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .primary_key(Index::create().col(Flows::AccountId).col(Flows::FlowId))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(FlowVersions::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(FlowVersions::AccountId).string().not_null())
                    .col(ColumnDef::new(FlowVersions::FlowId).string().not_null())
                    .col(ColumnDef::new(FlowVersions::Version).string().not_null())
                    .col(ColumnDef::new(FlowVersions::Definition).binary().not_null())
                    .col(ColumnDef::new(FlowVersions::Description).text().not_null())
                    .col(
                        ColumnDef::new(FlowVersions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(FlowVersions::CreatedBy).string())
                    .primary_key(
                        Index::create()
                            .col(FlowVersions::AccountId)
                            .col(FlowVersions::FlowId)
                            .col(FlowVersions::Version),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Executions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Executions::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Executions::FlowId).string().not_null())
                    .col(ColumnDef::new(Executions::AccountId).string().not_null())
                    .col(ColumnDef::new(Executions::Status).string().not_null())
                    .col(
                        ColumnDef::new(Executions::StartTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Executions::EndTime).timestamp_with_time_zone())
                    .col(ColumnDef::new(Executions::Progress).double().not_null())
                    .col(ColumnDef::new(Executions::CurrentNodeId).string())
                    .col(ColumnDef::new(Executions::Results).text().not_null())
                    .col(ColumnDef::new(Executions::Error).string())
                    .col(ColumnDef::new(Executions::Metadata).text().not_null())
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_executions_account_start")
                    .table(Executions::Table)
                    .col(Executions::AccountId)
                    .col(Executions::StartTime)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ExecutionLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ExecutionLogs::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ExecutionLogs::ExecutionId).string().not_null())
                    .col(
                        ColumnDef::new(ExecutionLogs::Timestamp)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ExecutionLogs::NodeId).string())
                    .col(ColumnDef::new(ExecutionLogs::Level).string().not_null())
                    .col(ColumnDef::new(ExecutionLogs::Message).text().not_null())
                    .col(ColumnDef::new(ExecutionLogs::Data).text())
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_execution_logs_execution_ts")
                    .table(ExecutionLogs::Table)
                    .col(ExecutionLogs::ExecutionId)
                    .col(ExecutionLogs::Timestamp)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ExecutionLogs::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Executions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(FlowVersions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Flows::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Secrets::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Accounts::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Accounts {
    Table,
    Id,
    Username,
    PasswordHash,
    ApiToken,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Secrets {
    Table,
    AccountId,
    Key,
    Value,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Flows {
    Table,
    AccountId,
    FlowId,
    Definition,
    Name,
    Description,
    Version,
    Tags,
    Category,
    Status,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum FlowVersions {
    Table,
    AccountId,
    FlowId,
    Version,
    Definition,
    Description,
    CreatedAt,
    CreatedBy,
}

#[derive(DeriveIden)]
enum Executions {
    Table,
    Id,
    FlowId,
    AccountId,
    Status,
    StartTime,
    EndTime,
    Progress,
    CurrentNodeId,
    Results,
    Error,
    Metadata,
}

#[derive(DeriveIden)]
enum ExecutionLogs {
    Table,
    Id,
    ExecutionId,
    Timestamp,
    NodeId,
    Level,
    Message,
    Data,
}
