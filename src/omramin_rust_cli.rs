use omramin_cli::omramin_cli_opts::OmraminCliOpts;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match OmraminCliOpts::process_args().await {
        Ok(()) => (),
        Err(e) => {
            if e.to_string().contains("Broken pipe") {
            } else {
                panic!("{e}")
            }
        }
    }
}
