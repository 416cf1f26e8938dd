use clap::Parser;
use keep_alerts::config::{Ctx, Env};
use keep_alerts::{launch, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = Env::parse();
    let ctx = Ctx::load_files(&env.config, &env.secrets)?;

    telemetry::setup_tracing(&ctx.log_level);

    launch(ctx).await
}
