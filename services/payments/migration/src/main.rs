use sea_orm_migration::prelude::*;

use paywell_payments_migration::Migrator;

#[tokio::main]
async fn main() {
    cli::run_cli(Migrator).await;
}
