fn main() -> anyhow::Result<()> {
    sharebench_cli::run()
}
