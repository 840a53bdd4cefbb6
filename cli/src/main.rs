fn main() -> anyhow::Result<()> {
    widequad_cli::run()
}
