fn main() -> anyhow::Result<()> {
    flavorpack::run()
}
