use anyhow::Result;

fn main() -> Result<()> {
    let code = schroot::cli::run()?;
    std::process::exit(code);
}
