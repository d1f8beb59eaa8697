mod cli;
mod demo;
mod infra;
mod routes;
mod server;

use crisis_fusion::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
