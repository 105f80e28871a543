fn main() -> anyhow::Result<()> {
    parley::cli::run_cli()
}
