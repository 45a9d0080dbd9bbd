use pump_client::app::RunOptions;

fn main() {
    let options = match parse_args(std::env::args().skip(1)) {
        Some(options) => options,
        None => return,
    };

    init_logging();

    if let Err(err) = pump_client::run(options) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Option<RunOptions> {
    let mut options = RunOptions::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("pump-client {}", pump_client::VERSION);
                return None;
            }
            "--help" | "-h" => {
                println!(
                    "pump-client: pump.io session and stream client.\n\n  --page <path[?query]>  Page to bootstrap as (default /)\n  --logout             Forget stored credentials and exit\n  --watch              Keep refreshing streams until Enter is pressed\n  --version, -V        Show version and exit\n  --help,    -h        Show this help message"
                );
                return None;
            }
            "--logout" => options.logout = true,
            "--watch" => options.watch = true,
            "--page" => {
                if let Some(page) = args.next() {
                    match page.split_once('?') {
                        Some((path, query)) => {
                            options.path = path.to_string();
                            options.query = Some(query.to_string());
                        }
                        None => options.path = page,
                    }
                }
            }
            _ => {}
        }
    }
    Some(options)
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}
