use clap::Parser;

use recall_api::Args;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = Args::parse();

	recall_api::run(args).await
}
