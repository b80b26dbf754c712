use routine_app::app::{run, AppConfig};

fn main() {
    tracing_subscriber::fmt::init();
    let config = AppConfig::from_env().unwrap_or_default();
    if let Err(err) = run(config) {
        eprintln!("Routine tracker stopped with an error: {err:#}");
        std::process::exit(1);
    }
}
