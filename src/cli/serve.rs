use anyhow::Result;

use crate::api;
use crate::core::AppConfig;
use crate::relay::RelayMode;

pub async fn run(host: String, port: String, mode: RelayMode) -> Result<()> {
    let config = AppConfig::default().with_mode(mode);
    api::serve(host, port, config).await
}
