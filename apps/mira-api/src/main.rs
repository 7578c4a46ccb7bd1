use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	mira_api::run(mira_api::Args::parse()).await
}
