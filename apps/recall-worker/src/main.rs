use clap::Parser;

use recall_worker::Args;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = Args::parse();

	recall_worker::run(args).await
}
