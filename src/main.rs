fn main() -> anyhow::Result<()> {
    ws_cli::run()
}
