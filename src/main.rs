use anyhow::Result;

fn main() -> Result<()> {
    let args = sluice::cli::parse();
    sluice::app::run(args)
}
