pub mod telegram;

use anyhow::Result;

use crate::config::Config;

pub async fn run_with_config(config: Config) -> Result<()> {
    telegram::run_with_config(config).await
}
