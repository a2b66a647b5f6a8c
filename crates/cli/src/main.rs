fn main() -> miette::Result<()> {
	entrypoint_cli::run()
}
