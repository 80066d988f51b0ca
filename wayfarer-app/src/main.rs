use anyhow::Result;
use wayfarer_app::{init_tracing, Bootstrap, CliArgs, Repl};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = CliArgs::parse(std::env::args().skip(1))?;
    let boot = Bootstrap::load(&args)?;
    let mut repl = Repl::new(boot)?;
    repl.run().await
}
