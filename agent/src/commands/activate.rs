//! `outpost activate`: obtain and verify the activation key, then exit.

use anyhow::Result;

use crate::app::Bootstrap;
use crate::infra::host::SystemProbe;

/// # Errors
///
/// Returns an error for any trust failure.
pub async fn run(boot: Bootstrap) -> Result<()> {
    let ctx = boot.establish(&SystemProbe::default()).await?;
    println!("{}", ctx.host_uuid());
    Ok(())
}
