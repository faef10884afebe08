use anyhow::Result;

fn main() -> Result<()> {
    phasebox::cli::run()
}
